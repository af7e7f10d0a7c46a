pub mod calendar;
pub mod candidate_rounds;
pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::config::Config;
use crate::middleware::rate_limit;
use crate::AppState;

/// Everything served under `/api`. HR and candidate-facing routes get separate
/// per-client budgets.
pub fn router(config: &Config) -> Router<AppState> {
    let hr_api = Router::new()
        .route(
            "/candidates/:candidate_id/round/:round_id",
            get(candidate_rounds::get_candidate_round)
                .delete(candidate_rounds::remove_candidate_round),
        )
        .route(
            "/candidates/:candidate_id/round/:round_id/next",
            post(candidate_rounds::advance),
        )
        .route(
            "/candidates/:candidate_id/round/:round_id/reject",
            post(candidate_rounds::reject),
        )
        .route(
            "/candidates/:candidate_id/round/:round_id/reject-with-reason",
            post(candidate_rounds::reject_with_reason),
        )
        .route(
            "/candidates/:candidate_id/round/:round_id/assign-interviewers",
            post(candidate_rounds::assign_interviewers),
        )
        .route(
            "/candidates/:candidate_id/round/:round_id/move-to-fresh",
            post(candidate_rounds::move_to_fresh),
        )
        .route(
            "/candidates/:candidate_id/round/:round_id/status",
            post(candidate_rounds::set_status),
        )
        .route(
            "/candidates/:candidate_id/round/:round_id/reschedule",
            post(candidate_rounds::reschedule),
        )
        .route(
            "/candidates/:candidate_id/round/:round_id/evaluation",
            post(candidate_rounds::record_evaluation),
        )
        .route(
            "/candidates/:candidate_id/jobs/:job_id/enroll",
            post(candidate_rounds::enroll),
        )
        .route(
            "/candidates/sync-queue-status",
            get(candidate_rounds::sync_queue_status),
        )
        .route(
            "/candidates/clear-sync-queue",
            post(candidate_rounds::clear_sync_queue),
        )
        .route(
            "/calendar/generate-booking-link",
            post(calendar::generate_booking_link),
        )
        .route("/calendar/cleanup-tokens", post(calendar::cleanup_tokens))
        .layer(axum::middleware::from_fn_with_state(
            rate_limit::new_rps_state(config.integration_rps),
            rate_limit::rps_middleware,
        ));

    let public_api = Router::new()
        .route(
            "/calendar/available-slots/:token",
            get(calendar::available_slots),
        )
        .route("/calendar/book-slot/:token", post(calendar::book_slot))
        .route(
            "/calendar/request-reassignment/:token",
            post(calendar::request_reassignment),
        )
        .layer(axum::middleware::from_fn_with_state(
            rate_limit::new_rps_state(config.public_rps),
            rate_limit::rps_middleware,
        ));

    let api = Router::new()
        .route("/health", get(health::health))
        .merge(hr_api)
        .merge(public_api);

    Router::new().nest("/api", api)
}
