use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::pipeline_dto::{
        AssignInterviewersPayload, ClearSyncQueueResponse, EnrollResponse,
        RecordEvaluationPayload, RejectPayload, SetStatusPayload, TransitionResponse,
    },
    error::{Error, Result},
    models::candidate_round::CandidateRound,
    services::sync_queue::SyncQueueStatus,
    AppState,
};

#[utoipa::path(
    post,
    path = "/api/candidates/{candidate_id}/round/{round_id}/next",
    params(
        ("candidate_id" = Uuid, Path, description = "Candidate ID"),
        ("round_id" = Uuid, Path, description = "Round ID")
    ),
    responses(
        (status = 200, description = "Candidate advanced", body = Json<TransitionResponse>),
        (status = 404, description = "Candidate round not found")
    )
)]
#[axum::debug_handler]
pub async fn advance(
    State(state): State<AppState>,
    Path((candidate_id, round_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let transition = state.pipeline.advance(candidate_id, round_id).await?;
    Ok(Json(TransitionResponse::from(transition)))
}

#[utoipa::path(
    post,
    path = "/api/candidates/{candidate_id}/round/{round_id}/reject",
    params(
        ("candidate_id" = Uuid, Path, description = "Candidate ID"),
        ("round_id" = Uuid, Path, description = "Round ID")
    ),
    responses(
        (status = 200, description = "Candidate rejected", body = Json<TransitionResponse>),
        (status = 404, description = "Candidate round not found")
    )
)]
#[axum::debug_handler]
pub async fn reject(
    State(state): State<AppState>,
    Path((candidate_id, round_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let transition = state.pipeline.reject(candidate_id, round_id, None).await?;
    Ok(Json(TransitionResponse::from(transition)))
}

#[utoipa::path(
    post,
    path = "/api/candidates/{candidate_id}/round/{round_id}/reject-with-reason",
    params(
        ("candidate_id" = Uuid, Path, description = "Candidate ID"),
        ("round_id" = Uuid, Path, description = "Round ID")
    ),
    request_body = RejectPayload,
    responses(
        (status = 200, description = "Candidate rejected", body = Json<TransitionResponse>),
        (status = 400, description = "Invalid payload"),
        (status = 404, description = "Candidate round not found")
    )
)]
#[axum::debug_handler]
pub async fn reject_with_reason(
    State(state): State<AppState>,
    Path((candidate_id, round_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<RejectPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let transition = state
        .pipeline
        .reject(candidate_id, round_id, payload.reason)
        .await?;
    Ok(Json(TransitionResponse::from(transition)))
}

#[utoipa::path(
    post,
    path = "/api/candidates/{candidate_id}/round/{round_id}/assign-interviewers",
    params(
        ("candidate_id" = Uuid, Path, description = "Candidate ID"),
        ("round_id" = Uuid, Path, description = "Round ID")
    ),
    request_body = AssignInterviewersPayload,
    responses(
        (status = 200, description = "Interviewers assigned", body = Json<TransitionResponse>),
        (status = 400, description = "Empty or unknown interviewer list"),
        (status = 404, description = "Candidate round not found")
    )
)]
#[axum::debug_handler]
pub async fn assign_interviewers(
    State(state): State<AppState>,
    Path((candidate_id, round_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<AssignInterviewersPayload>,
) -> Result<impl IntoResponse> {
    if payload.interviewer_ids.is_empty() {
        return Err(Error::BadRequest(
            "At least one interviewer is required".to_string(),
        ));
    }
    let transition = state
        .pipeline
        .assign_interviewers(candidate_id, round_id, payload.interviewer_ids)
        .await?;
    Ok(Json(TransitionResponse::from(transition)))
}

#[utoipa::path(
    post,
    path = "/api/candidates/{candidate_id}/round/{round_id}/move-to-fresh",
    params(
        ("candidate_id" = Uuid, Path, description = "Candidate ID"),
        ("round_id" = Uuid, Path, description = "Round ID")
    ),
    responses(
        (status = 200, description = "Candidate moved back to fresh", body = Json<TransitionResponse>),
        (status = 404, description = "Candidate round not found")
    )
)]
#[axum::debug_handler]
pub async fn move_to_fresh(
    State(state): State<AppState>,
    Path((candidate_id, round_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let transition = state.pipeline.move_to_fresh(candidate_id, round_id).await?;
    Ok(Json(TransitionResponse::from(transition)))
}

#[utoipa::path(
    post,
    path = "/api/candidates/{candidate_id}/round/{round_id}/status",
    params(
        ("candidate_id" = Uuid, Path, description = "Candidate ID"),
        ("round_id" = Uuid, Path, description = "Round ID")
    ),
    request_body = SetStatusPayload,
    responses(
        (status = 200, description = "Status overridden", body = Json<TransitionResponse>),
        (status = 400, description = "Status not allowed"),
        (status = 404, description = "Candidate round not found")
    )
)]
#[axum::debug_handler]
pub async fn set_status(
    State(state): State<AppState>,
    Path((candidate_id, round_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<SetStatusPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let transition = state
        .pipeline
        .set_status(candidate_id, round_id, &payload.status)
        .await?;
    Ok(Json(TransitionResponse::from(transition)))
}

#[utoipa::path(
    post,
    path = "/api/candidates/{candidate_id}/round/{round_id}/reschedule",
    params(
        ("candidate_id" = Uuid, Path, description = "Candidate ID"),
        ("round_id" = Uuid, Path, description = "Round ID")
    ),
    responses(
        (status = 200, description = "Booked slot released", body = Json<TransitionResponse>),
        (status = 400, description = "Interview is not scheduled"),
        (status = 404, description = "Candidate round not found")
    )
)]
#[axum::debug_handler]
pub async fn reschedule(
    State(state): State<AppState>,
    Path((candidate_id, round_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let transition = state.pipeline.reschedule(candidate_id, round_id).await?;
    Ok(Json(TransitionResponse::from(transition)))
}

#[utoipa::path(
    post,
    path = "/api/candidates/{candidate_id}/round/{round_id}/evaluation",
    params(
        ("candidate_id" = Uuid, Path, description = "Candidate ID"),
        ("round_id" = Uuid, Path, description = "Round ID")
    ),
    request_body = RecordEvaluationPayload,
    responses(
        (status = 200, description = "Evaluation recorded", body = Json<CandidateRound>),
        (status = 400, description = "Invalid scores or interviewer not assigned"),
        (status = 404, description = "Candidate round not found")
    )
)]
#[axum::debug_handler]
pub async fn record_evaluation(
    State(state): State<AppState>,
    Path((candidate_id, round_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<RecordEvaluationPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let round = state
        .pipeline
        .record_evaluation(candidate_id, round_id, payload.into())
        .await?;
    Ok(Json(round))
}

#[utoipa::path(
    get,
    path = "/api/candidates/{candidate_id}/round/{round_id}",
    params(
        ("candidate_id" = Uuid, Path, description = "Candidate ID"),
        ("round_id" = Uuid, Path, description = "Round ID")
    ),
    responses(
        (status = 200, description = "Candidate round", body = Json<CandidateRound>),
        (status = 404, description = "Candidate round not found")
    )
)]
#[axum::debug_handler]
pub async fn get_candidate_round(
    State(state): State<AppState>,
    Path((candidate_id, round_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let round = state.pipeline.get(candidate_id, round_id).await?;
    Ok(Json(round))
}

#[utoipa::path(
    delete,
    path = "/api/candidates/{candidate_id}/round/{round_id}",
    params(
        ("candidate_id" = Uuid, Path, description = "Candidate ID"),
        ("round_id" = Uuid, Path, description = "Round ID")
    ),
    responses(
        (status = 204, description = "Candidate round removed"),
        (status = 404, description = "Candidate round not found")
    )
)]
#[axum::debug_handler]
pub async fn remove_candidate_round(
    State(state): State<AppState>,
    Path((candidate_id, round_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    state.pipeline.remove(candidate_id, round_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/candidates/{candidate_id}/jobs/{job_id}/enroll",
    params(
        ("candidate_id" = Uuid, Path, description = "Candidate ID"),
        ("job_id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 201, description = "Candidate entered the first round", body = Json<EnrollResponse>),
        (status = 200, description = "Candidate was already enrolled", body = Json<EnrollResponse>),
        (status = 404, description = "Candidate or job not found")
    )
)]
#[axum::debug_handler]
pub async fn enroll(
    State(state): State<AppState>,
    Path((candidate_id, job_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let enrollment = state.pipeline.enroll(candidate_id, job_id).await?;
    let status = if enrollment.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(EnrollResponse::from(enrollment))))
}

#[utoipa::path(
    get,
    path = "/api/candidates/sync-queue-status",
    responses(
        (status = 200, description = "Sync queue snapshot", body = Json<SyncQueueStatus>)
    )
)]
#[axum::debug_handler]
pub async fn sync_queue_status(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let status = state
        .sync_queue
        .status()
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;
    Ok(Json(status))
}

#[utoipa::path(
    post,
    path = "/api/candidates/clear-sync-queue",
    responses(
        (status = 200, description = "Pending sync work dropped", body = Json<ClearSyncQueueResponse>)
    )
)]
#[axum::debug_handler]
pub async fn clear_sync_queue(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let cleared_count = state
        .sync_queue
        .clear()
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;
    Ok(Json(ClearSyncQueueResponse { cleared_count }))
}
