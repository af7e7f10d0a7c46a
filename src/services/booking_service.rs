use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::candidate_round::RoundStatus;
use crate::models::interviewer::Interviewer;
use crate::models::notification::TEMPLATE_INTERVIEW_SCHEDULED;
use crate::models::round::{Round, DEFAULT_DURATION_MINUTES};
use crate::services::background::BackgroundTasks;
use crate::services::booking_token_service::{BookingTokenService, NewBookingToken};
use crate::services::calendar_service::{CalendarProvider, EventRequest};
use crate::services::notification_service::NotificationService;
use crate::services::pipeline_service::{replace_assignments, ROUND_NOT_FOUND};
use crate::services::slot_service::{SlotRequest, SlotService, TimeWindow};
use crate::services::sync_queue::SyncQueue;
use crate::utils::time::{at_local, now, to_local_rfc3339};

pub const INVALID_LINK: &str = "Invalid or expired booking link";
pub const SLOT_TAKEN: &str =
    "This slot was just taken. Please reload available slots and try again.";

/// Booking links for rounds without an end date stay open this long.
const OPEN_ENDED_BOOKING_DAYS: i64 = 14;

fn invalid_link() -> Error {
    Error::BadRequest(INVALID_LINK.to_string())
}

/// Advisory-lock key for one (identity, grid cell) pair.
pub fn slot_lock_key(subject_id: Uuid, cell_start: DateTime<Utc>) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(subject_id.as_bytes());
    hasher.update(cell_start.to_rfc3339_opts(SecondsFormat::Secs, true).as_bytes());
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(head)
}

fn floor_to_step(instant: DateTime<Utc>, step_minutes: i64) -> DateTime<Utc> {
    let step_secs = step_minutes.max(1) * 60;
    let excess = instant.timestamp().rem_euclid(step_secs);
    instant
        - Duration::seconds(excess)
        - Duration::nanoseconds(instant.timestamp_subsec_nanos() as i64)
}

/// Keys for every grid cell the window touches, per subject. Two windows that
/// overlap for any subject share at least one key.
pub fn slot_lock_keys(subject_ids: &[Uuid], window: &TimeWindow, step_minutes: i64) -> Vec<i64> {
    let step = Duration::minutes(step_minutes.max(1));
    let mut keys = Vec::new();
    let mut cell = floor_to_step(window.start, step_minutes);
    while cell < window.end {
        keys.extend(subject_ids.iter().map(|id| slot_lock_key(*id, cell)));
        cell = cell + step;
    }
    keys.sort_unstable();
    keys.dedup();
    keys
}

/// Range a new booking link covers: from the later of the round's start date and
/// now, up to the end of the round's last day.
pub fn booking_window(
    offset: &FixedOffset,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> Option<TimeWindow> {
    let start = start_date
        .and_then(|day| at_local(offset, day, NaiveTime::MIN))
        .map_or(now, |midnight| midnight.max(now));
    let end = match end_date {
        Some(day) => at_local(offset, day.succ_opt()?, NaiveTime::MIN)?,
        None => start + Duration::days(OPEN_ENDED_BOOKING_DAYS),
    };
    (end > start).then(|| TimeWindow::new(start, end))
}

#[derive(Debug, Clone)]
pub struct BookingLinkRequest {
    pub candidate_id: Uuid,
    pub round_id: Uuid,
    pub interviewer_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingLink {
    pub url: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotListing {
    pub round_name: String,
    pub duration_minutes: i64,
    pub slots: Vec<TimeWindow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Booking {
    pub window: TimeWindow,
    pub meet_link: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct LockedBookingTarget {
    status: RoundStatus,
    round_name: String,
    duration_minutes: Option<i32>,
    candidate_name: String,
    candidate_email: String,
}

#[derive(Clone)]
pub struct BookingService {
    pool: PgPool,
    tokens: BookingTokenService,
    slots: SlotService,
    calendar: Arc<dyn CalendarProvider>,
    sync_queue: SyncQueue,
    background: BackgroundTasks,
    notifications: NotificationService,
    public_base_url: String,
}

impl BookingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        tokens: BookingTokenService,
        slots: SlotService,
        calendar: Arc<dyn CalendarProvider>,
        sync_queue: SyncQueue,
        background: BackgroundTasks,
        notifications: NotificationService,
        public_base_url: String,
    ) -> Self {
        Self {
            pool,
            tokens,
            slots,
            calendar,
            sync_queue,
            background,
            notifications,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.slots.business().offset
    }

    async fn load_round(&self, round_id: Uuid) -> Result<Round> {
        sqlx::query_as::<_, Round>(
            r#"
            SELECT id, job_id, name, round_order, duration_minutes, start_date, end_date, evaluation_parameters
            FROM rounds WHERE id = $1
            "#,
        )
        .bind(round_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound("Round not found".to_string()))
    }

    pub async fn generate_booking_link(&self, request: BookingLinkRequest) -> Result<BookingLink> {
        let status: RoundStatus = sqlx::query_scalar(
            "SELECT status FROM candidate_rounds WHERE candidate_id = $1 AND round_id = $2",
        )
        .bind(request.candidate_id)
        .bind(request.round_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(ROUND_NOT_FOUND.to_string()))?;
        if status.is_terminal() {
            return Err(Error::BadRequest(format!(
                "Cannot create a booking link for a {} round",
                status
            )));
        }

        let interviewer_ids = match request.interviewer_ids {
            Some(mut ids) if !ids.is_empty() => {
                ids.sort();
                ids.dedup();
                let known: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM interviewers WHERE id = ANY($1)")
                        .bind(&ids)
                        .fetch_one(&self.pool)
                        .await?;
                if known != ids.len() as i64 {
                    return Err(Error::BadRequest("Unknown interviewer id".to_string()));
                }
                ids
            }
            _ => {
                sqlx::query_scalar::<_, Uuid>(
                    r#"
                    SELECT interviewer_id FROM interview_assignments
                    WHERE candidate_id = $1 AND round_id = $2
                    ORDER BY interviewer_id
                    "#,
                )
                .bind(request.candidate_id)
                .bind(request.round_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        if interviewer_ids.is_empty() {
            return Err(Error::BadRequest(
                "Assign interviewers before generating a booking link".to_string(),
            ));
        }

        let round = self.load_round(request.round_id).await?;
        let window = booking_window(&self.offset(), round.start_date, round.end_date, now())
            .ok_or_else(|| {
                Error::BadRequest("The booking period for this round has ended".to_string())
            })?;

        let issued = self
            .tokens
            .create(NewBookingToken {
                candidate_id: request.candidate_id,
                round_id: request.round_id,
                interviewer_ids,
                window,
            })
            .await?;

        Ok(BookingLink {
            url: format!("{}/book/{}", self.public_base_url, issued.token),
            token: issued.token,
            expires_at: issued.expires_at,
        })
    }

    pub async fn list_slots(&self, token: &str) -> Result<SlotListing> {
        let record = self.tokens.redeem(token).await?.ok_or_else(invalid_link)?;
        let round = self.load_round(record.round_id).await?;
        let duration_minutes = round.slot_minutes();

        let slots = self
            .slots
            .available_for(&SlotRequest {
                candidate_id: record.candidate_id,
                round_id: record.round_id,
                interviewer_ids: record.interviewer_ids.clone(),
                range: TimeWindow::new(record.slot_start, record.slot_end),
                duration_minutes,
            })
            .await?;

        Ok(SlotListing {
            round_name: round.name,
            duration_minutes,
            slots,
        })
    }

    /// Books `start` for the token's candidate round. Exactly one of any set of
    /// concurrent bookings that share an interviewer (or the candidate) and overlap
    /// in time succeeds; the rest get a conflict.
    pub async fn book_slot(&self, token: &str, start: DateTime<Utc>) -> Result<Booking> {
        let mut tx = self.pool.begin().await?;

        let record = self
            .tokens
            .lock_active(&mut tx, token)
            .await?
            .ok_or_else(invalid_link)?;

        let target = sqlx::query_as::<_, LockedBookingTarget>(
            r#"
            SELECT cr.status, r.name AS round_name, r.duration_minutes,
                   c.name AS candidate_name, c.email AS candidate_email
            FROM candidate_rounds cr
            JOIN rounds r ON r.id = cr.round_id
            JOIN candidates c ON c.id = cr.candidate_id
            WHERE cr.candidate_id = $1 AND cr.round_id = $2
            FOR UPDATE OF cr
            "#,
        )
        .bind(record.candidate_id)
        .bind(record.round_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound(ROUND_NOT_FOUND.to_string()))?;
        if target.status.is_terminal() {
            return Err(Error::BadRequest(
                "This interview round is already closed".to_string(),
            ));
        }

        let duration = target
            .duration_minutes
            .filter(|m| *m > 0)
            .unwrap_or(DEFAULT_DURATION_MINUTES) as i64;
        let window = TimeWindow::starting_at(start, duration);
        let business = self.slots.business();

        if window.start < record.slot_start
            || window.end > record.slot_end
            || !business.is_bookable_window(&window)
        {
            return Err(Error::BadRequest(
                "Selected time is not an available slot".to_string(),
            ));
        }
        if window.start <= now() {
            return Err(Error::BadRequest("Selected time is in the past".to_string()));
        }

        let mut subjects = record.interviewer_ids.clone();
        subjects.push(record.candidate_id);
        for key in slot_lock_keys(&subjects, &window, business.step_minutes) {
            let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
                .bind(key)
                .fetch_one(&mut *tx)
                .await?;
            if !acquired {
                warn!(
                    candidate_id = %record.candidate_id,
                    round_id = %record.round_id,
                    start = %window.start,
                    "slot lock held by a concurrent booking"
                );
                return Err(Error::Conflict(SLOT_TAKEN.to_string()));
            }
        }

        let clash: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT cr.id
            FROM candidate_rounds cr
            JOIN rounds r ON r.id = cr.round_id
            WHERE cr.status = 'scheduled'
              AND cr.scheduled_time IS NOT NULL
              AND cr.scheduled_time < $2
              AND cr.scheduled_time + make_interval(mins => COALESCE(r.duration_minutes, 60)) > $1
              AND NOT (cr.candidate_id = $3 AND cr.round_id = $4)
              AND (
                  cr.candidate_id = $3
                  OR EXISTS (
                      SELECT 1 FROM interview_assignments ia
                      WHERE ia.candidate_id = cr.candidate_id
                        AND ia.round_id = cr.round_id
                        AND ia.interviewer_id = ANY($5)
                  )
              )
            LIMIT 1
            FOR UPDATE OF cr
            "#,
        )
        .bind(window.start)
        .bind(window.end)
        .bind(record.candidate_id)
        .bind(record.round_id)
        .bind(&record.interviewer_ids)
        .fetch_optional(&mut *tx)
        .await?;
        if clash.is_some() {
            warn!(
                candidate_id = %record.candidate_id,
                round_id = %record.round_id,
                start = %window.start,
                "slot overlaps an existing interview"
            );
            return Err(Error::Conflict(SLOT_TAKEN.to_string()));
        }

        let interviewers = sqlx::query_as::<_, Interviewer>(
            "SELECT id, name, email FROM interviewers WHERE id = ANY($1) ORDER BY email",
        )
        .bind(&record.interviewer_ids)
        .fetch_all(&mut *tx)
        .await?;
        let mut attendee_emails: Vec<String> =
            interviewers.into_iter().map(|i| i.email).collect();
        attendee_emails.push(target.candidate_email.clone());

        let event = self
            .calendar
            .create_event(&EventRequest {
                summary: format!("{}: {}", target.round_name, target.candidate_name),
                description: format!(
                    "Interview with {} ({} round)",
                    target.candidate_name, target.round_name
                ),
                start: window.start,
                end: window.end,
                attendee_emails,
            })
            .await
            .map_err(|e| {
                warn!(candidate_id = %record.candidate_id, error = %e, "calendar event creation failed");
                Error::Anyhow(e)
            })?;

        sqlx::query(
            r#"
            UPDATE candidate_rounds
            SET status = 'scheduled', scheduled_time = $3, meet_link = $4, calendar_event_id = $5,
                requested_reassignment = FALSE, updated_at = NOW()
            WHERE candidate_id = $1 AND round_id = $2
            "#,
        )
        .bind(record.candidate_id)
        .bind(record.round_id)
        .bind(window.start)
        .bind(&event.meeting_link)
        .bind(&event.event_id)
        .execute(&mut *tx)
        .await?;
        replace_assignments(&mut tx, record.candidate_id, record.round_id, &record.interviewer_ids)
            .await?;
        self.tokens.mark_used_in(&mut tx, record.id).await?;
        tx.commit().await?;

        info!(
            candidate_id = %record.candidate_id,
            round_id = %record.round_id,
            from = %target.status,
            to = %RoundStatus::Scheduled,
            start = %window.start,
            "interview booked"
        );
        self.sync_queue.enqueue(record.candidate_id, record.round_id);

        let notifications = self.notifications.clone();
        let payload = json!({
            "candidate_name": target.candidate_name,
            "round_name": target.round_name,
            "scheduled_time": to_local_rfc3339(&self.offset(), window.start),
            "meet_link": event.meeting_link,
        });
        let recipient = target.candidate_email;
        self.background.spawn("interview_scheduled_notification", async move {
            notifications
                .notify(&recipient, TEMPLATE_INTERVIEW_SCHEDULED, &payload)
                .await?;
            Ok(())
        });

        Ok(Booking {
            window,
            meet_link: event.meeting_link,
        })
    }

    /// The candidate cannot make any offered time. Consumes the link.
    pub async fn request_reassignment(&self, token: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let record = self
            .tokens
            .lock_active(&mut tx, token)
            .await?
            .ok_or_else(invalid_link)?;

        let updated = sqlx::query(
            r#"
            UPDATE candidate_rounds
            SET requested_reassignment = TRUE, updated_at = NOW()
            WHERE candidate_id = $1 AND round_id = $2
            "#,
        )
        .bind(record.candidate_id)
        .bind(record.round_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::NotFound(ROUND_NOT_FOUND.to_string()));
        }
        self.tokens.mark_used_in(&mut tx, record.id).await?;
        tx.commit().await?;

        info!(candidate_id = %record.candidate_id, round_id = %record.round_id, "candidate requested reassignment");
        self.sync_queue.enqueue(record.candidate_id, record.round_id);
        Ok(())
    }

    pub async fn cleanup_tokens(&self) -> Result<u64> {
        self.tokens.cleanup_expired().await
    }
}
