use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

pub const DEFAULT_DURATION_MINUTES: i32 = 60;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// One step of a job's hiring process. Rounds of a job are totally ordered by `round_order`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Round {
    pub id: Uuid,
    pub job_id: Uuid,
    pub name: String,
    pub round_order: i32,
    pub duration_minutes: Option<i32>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub evaluation_parameters: Json<Vec<String>>,
}

impl Round {
    pub fn slot_minutes(&self) -> i64 {
        self.duration_minutes
            .filter(|m| *m > 0)
            .unwrap_or(DEFAULT_DURATION_MINUTES) as i64
    }
}

/// Lightweight view used when walking from one round to the next.
#[derive(Debug, Clone, FromRow)]
pub struct RoundRef {
    pub id: Uuid,
    pub name: String,
    pub round_order: i32,
}
