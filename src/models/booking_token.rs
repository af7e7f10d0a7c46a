use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Single-use capability to book one (candidate, round, interviewer set).
///
/// Only the SHA-256 of the token is stored; the plaintext lives in the booking URL.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BookingToken {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub candidate_id: Uuid,
    pub round_id: Uuid,
    pub interviewer_ids: Vec<Uuid>,
    pub slot_start: DateTime<Utc>,
    pub slot_end: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: Option<DateTime<Utc>>,
}

impl BookingToken {
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        !self.used && self.expires_at > now
    }
}
