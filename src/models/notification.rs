use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

pub const TEMPLATE_REJECTION: &str = "rejection";
pub const TEMPLATE_INTERVIEW_SCHEDULED: &str = "interview_scheduled";
pub const TEMPLATE_FINAL_OFFER: &str = "final_offer";

/// Outbox row. Status moves `pending -> sending -> sent | failed | skipped`,
/// and back to `pending` while retries remain.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub recipient: String,
    pub template: String,
    pub payload: JsonValue,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub http_status: Option<i32>,
    pub response_body: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}
