use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Interviewer {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}
