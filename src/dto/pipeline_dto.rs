use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::candidate_round::RoundStatus;
use crate::models::evaluation::ParameterScore;
use crate::services::pipeline_service::{Enrollment, EvaluationInput, Transition};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionResponse {
    pub new_status: RoundStatus,
    /// `null` unless the candidate was promoted into another round.
    pub moved_to_round_id: Option<Uuid>,
    pub moved_to_round_name: Option<String>,
}

impl From<Transition> for TransitionResponse {
    fn from(t: Transition) -> Self {
        Self {
            new_status: t.status,
            moved_to_round_id: t.moved_to_round_id,
            moved_to_round_name: t.moved_to_round_name,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct RejectPayload {
    #[validate(length(max = 2000))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AssignInterviewersPayload {
    #[validate(length(min = 1))]
    pub interviewer_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SetStatusPayload {
    #[validate(length(min = 1))]
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RecordEvaluationPayload {
    pub interviewer_id: Uuid,
    #[validate(length(min = 1))]
    pub scores: Vec<ParameterScore>,
    pub feedback: Option<String>,
}

impl From<RecordEvaluationPayload> for EvaluationInput {
    fn from(p: RecordEvaluationPayload) -> Self {
        Self {
            interviewer_id: p.interviewer_id,
            scores: p.scores,
            feedback: p.feedback,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollResponse {
    pub round_id: Uuid,
    pub round_name: String,
    pub created: bool,
}

impl From<Enrollment> for EnrollResponse {
    fn from(e: Enrollment) -> Self {
        Self {
            round_id: e.round_id,
            round_name: e.round_name,
            created: e.created,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearSyncQueueResponse {
    pub cleared_count: usize,
}
