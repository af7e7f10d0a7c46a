use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
};
use chrono::Utc;
use serde_json::json;

use crate::{
    dto::calendar_dto::{
        AvailableSlotsResponse, BookSlotPayload, BookSlotResponse, BookingLinkResponse,
        CleanupResponse, GenerateBookingLinkPayload, SlotResponse,
    },
    error::Result,
    utils::time::to_local_rfc3339,
    AppState,
};

#[utoipa::path(
    post,
    path = "/api/calendar/generate-booking-link",
    request_body = GenerateBookingLinkPayload,
    responses(
        (status = 200, description = "Booking link created", body = Json<BookingLinkResponse>),
        (status = 400, description = "No interviewers or round closed"),
        (status = 404, description = "Candidate round not found")
    )
)]
#[axum::debug_handler]
pub async fn generate_booking_link(
    State(state): State<AppState>,
    Json(payload): Json<GenerateBookingLinkPayload>,
) -> Result<impl IntoResponse> {
    let link = state.booking.generate_booking_link(payload.into()).await?;
    Ok(Json(BookingLinkResponse::from(link)))
}

#[utoipa::path(
    get,
    path = "/api/calendar/available-slots/{token}",
    params(
        ("token" = String, Path, description = "Booking token")
    ),
    responses(
        (status = 200, description = "Bookable slots", body = Json<AvailableSlotsResponse>),
        (status = 400, description = "Invalid or expired booking link")
    )
)]
#[axum::debug_handler]
pub async fn available_slots(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse> {
    let listing = state.booking.list_slots(&token).await?;
    let offset = state.booking.offset();
    let slots = listing
        .slots
        .iter()
        .map(|slot| SlotResponse {
            start: to_local_rfc3339(&offset, slot.start),
            end: to_local_rfc3339(&offset, slot.end),
        })
        .collect();
    Ok(Json(AvailableSlotsResponse {
        round_name: listing.round_name,
        duration_minutes: listing.duration_minutes,
        slots,
    }))
}

#[utoipa::path(
    post,
    path = "/api/calendar/book-slot/{token}",
    params(
        ("token" = String, Path, description = "Booking token")
    ),
    request_body = BookSlotPayload,
    responses(
        (status = 200, description = "Interview booked", body = Json<BookSlotResponse>),
        (status = 400, description = "Invalid link or slot"),
        (status = 409, description = "Slot was taken concurrently")
    )
)]
#[axum::debug_handler]
pub async fn book_slot(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<BookSlotPayload>,
) -> Result<impl IntoResponse> {
    let booking = state
        .booking
        .book_slot(&token, payload.start.with_timezone(&Utc))
        .await?;
    let offset = state.booking.offset();
    Ok(Json(BookSlotResponse {
        scheduled_time: to_local_rfc3339(&offset, booking.window.start),
        end_time: to_local_rfc3339(&offset, booking.window.end),
        meet_link: booking.meet_link,
    }))
}

#[utoipa::path(
    post,
    path = "/api/calendar/request-reassignment/{token}",
    params(
        ("token" = String, Path, description = "Booking token")
    ),
    responses(
        (status = 200, description = "Reassignment requested"),
        (status = 400, description = "Invalid or expired booking link")
    )
)]
#[axum::debug_handler]
pub async fn request_reassignment(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse> {
    state.booking.request_reassignment(&token).await?;
    Ok(Json(json!({ "success": true })))
}

#[utoipa::path(
    post,
    path = "/api/calendar/cleanup-tokens",
    responses(
        (status = 200, description = "Expired and used tokens removed", body = Json<CleanupResponse>)
    )
)]
#[axum::debug_handler]
pub async fn cleanup_tokens(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let cleaned_count = state.booking.cleanup_tokens().await?;
    Ok(Json(CleanupResponse { cleaned_count }))
}
