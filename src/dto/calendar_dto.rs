use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::booking_service::{BookingLink, BookingLinkRequest};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBookingLinkPayload {
    pub candidate_id: Uuid,
    pub round_id: Uuid,
    /// Falls back to the interviewers currently assigned to the round.
    pub interviewer_ids: Option<Vec<Uuid>>,
}

impl From<GenerateBookingLinkPayload> for BookingLinkRequest {
    fn from(p: GenerateBookingLinkPayload) -> Self {
        Self {
            candidate_id: p.candidate_id,
            round_id: p.round_id,
            interviewer_ids: p.interviewer_ids,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingLinkResponse {
    pub booking_url: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl From<BookingLink> for BookingLinkResponse {
    fn from(link: BookingLink) -> Self {
        Self {
            booking_url: link.url,
            token: link.token,
            expires_at: link.expires_at,
        }
    }
}

/// Slot start and end in the organisation's time zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotResponse {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableSlotsResponse {
    pub round_name: String,
    pub duration_minutes: i64,
    pub slots: Vec<SlotResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSlotPayload {
    pub start: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSlotResponse {
    pub scheduled_time: String,
    pub end_time: String,
    pub meet_link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub cleaned_count: u64,
}
