use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::models::interviewer::Interviewer;
use crate::services::calendar_service::CalendarProvider;
use crate::utils::holidays;
use crate::utils::time::{at_local, local_date};

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn starting_at(start: DateTime<Utc>, minutes: i64) -> Self {
        Self::new(start, start + Duration::minutes(minutes))
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

/// Business hours of the organisation, evaluated in one fixed time zone.
#[derive(Debug, Clone, Copy)]
pub struct BusinessCalendar {
    pub offset: FixedOffset,
    pub day_start: NaiveTime,
    pub day_end: NaiveTime,
    pub lunch_start: NaiveTime,
    pub lunch_end: NaiveTime,
    pub step_minutes: i64,
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

impl BusinessCalendar {
    pub fn new(offset: FixedOffset) -> Self {
        Self {
            offset,
            day_start: hm(9, 0),
            day_end: hm(17, 0),
            lunch_start: hm(13, 0),
            lunch_end: hm(14, 0),
            step_minutes: 30,
        }
    }

    /// Every slot of `duration_minutes` that fits inside business hours on `day`,
    /// skipping those that touch the lunch break. Does not look at holidays.
    pub fn day_grid(&self, day: NaiveDate, duration_minutes: i64) -> Vec<TimeWindow> {
        if duration_minutes <= 0 || self.step_minutes <= 0 {
            return Vec::new();
        }
        let bounds = (
            at_local(&self.offset, day, self.day_start),
            at_local(&self.offset, day, self.day_end),
            at_local(&self.offset, day, self.lunch_start),
            at_local(&self.offset, day, self.lunch_end),
        );
        let (Some(open), Some(close), Some(lunch_start), Some(lunch_end)) = bounds else {
            return Vec::new();
        };
        let lunch = TimeWindow::new(lunch_start, lunch_end);
        let step = Duration::minutes(self.step_minutes);

        let mut grid = Vec::new();
        let mut start = open;
        loop {
            let slot = TimeWindow::starting_at(start, duration_minutes);
            if slot.end > close {
                break;
            }
            if !slot.overlaps(&lunch) {
                grid.push(slot);
            }
            start += step;
        }
        grid
    }

    /// Whether `window` is exactly one of the grid slots of a business day.
    pub fn is_bookable_window(&self, window: &TimeWindow) -> bool {
        let day = local_date(&self.offset, window.start);
        holidays::is_business_day(day) && self.day_grid(day, window.minutes()).contains(window)
    }
}

pub struct AvailabilityQuery<'a> {
    pub first_day: NaiveDate,
    pub last_day: NaiveDate,
    pub duration_minutes: i64,
    /// Slots starting earlier than this are never offered.
    pub not_before: DateTime<Utc>,
    /// Busy intervals per interviewer of the set, calendar and storage merged.
    pub interviewer_busy: &'a HashMap<Uuid, Vec<TimeWindow>>,
    /// Every other interview already scheduled in the range.
    pub scheduled: &'a [TimeWindow],
}

/// Ordered list of windows in which every interviewer of the set is free.
pub fn available_slots(
    calendar: &BusinessCalendar,
    query: &AvailabilityQuery<'_>,
) -> Vec<TimeWindow> {
    let mut slots = Vec::new();
    let mut day = query.first_day;

    while day <= query.last_day {
        if holidays::is_business_day(day) {
            for slot in calendar.day_grid(day, query.duration_minutes) {
                if slot.start < query.not_before {
                    continue;
                }
                let interviewer_busy = query
                    .interviewer_busy
                    .values()
                    .flatten()
                    .any(|busy| busy.overlaps(&slot));
                let taken = query.scheduled.iter().any(|booked| booked.overlaps(&slot));
                if !interviewer_busy && !taken {
                    slots.push(slot);
                }
            }
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }

    slots
}

#[derive(Debug, Clone, FromRow)]
struct ScheduledInterview {
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    interviewer_ids: Vec<Uuid>,
}

/// Splits stored interviews into per-interviewer busy lists for the set and the
/// flat list of every scheduled window, whoever it belongs to.
fn stored_busy(
    interviewer_ids: &[Uuid],
    scheduled: &[ScheduledInterview],
) -> (HashMap<Uuid, Vec<TimeWindow>>, Vec<TimeWindow>) {
    let mut busy: HashMap<Uuid, Vec<TimeWindow>> =
        interviewer_ids.iter().map(|id| (*id, Vec::new())).collect();
    let mut windows = Vec::with_capacity(scheduled.len());

    for interview in scheduled {
        let window = TimeWindow::new(interview.window_start, interview.window_end);
        for id in &interview.interviewer_ids {
            if let Some(list) = busy.get_mut(id) {
                list.push(window);
            }
        }
        windows.push(window);
    }

    (busy, windows)
}

/// What a booking token asks availability for.
#[derive(Debug, Clone)]
pub struct SlotRequest {
    pub candidate_id: Uuid,
    pub round_id: Uuid,
    pub interviewer_ids: Vec<Uuid>,
    pub range: TimeWindow,
    pub duration_minutes: i64,
}

#[derive(Clone)]
pub struct SlotService {
    pool: PgPool,
    calendar: Arc<dyn CalendarProvider>,
    business: BusinessCalendar,
}

impl SlotService {
    pub fn new(pool: PgPool, calendar: Arc<dyn CalendarProvider>, business: BusinessCalendar) -> Self {
        Self {
            pool,
            calendar,
            business,
        }
    }

    pub fn business(&self) -> &BusinessCalendar {
        &self.business
    }

    pub async fn available_for(&self, request: &SlotRequest) -> Result<Vec<TimeWindow>> {
        let range = request.range;
        let scheduled = self
            .scheduled_between(range, request)
            .await?;

        let (mut interviewer_busy, scheduled_windows) =
            stored_busy(&request.interviewer_ids, &scheduled);

        let interviewers = sqlx::query_as::<_, Interviewer>(
            "SELECT id, name, email FROM interviewers WHERE id = ANY($1)",
        )
        .bind(&request.interviewer_ids)
        .fetch_all(&self.pool)
        .await?;

        for interviewer in interviewers {
            match self
                .calendar
                .free_busy(&interviewer.email, range.start, range.end)
                .await
            {
                Ok(busy) => {
                    interviewer_busy
                        .entry(interviewer.id)
                        .or_default()
                        .extend(busy);
                }
                Err(e) => warn!(
                    interviewer_id = %interviewer.id,
                    error = %e,
                    "freeBusy lookup failed, using stored interviews only"
                ),
            }
        }

        let last_instant = range.end - Duration::seconds(1);
        let query = AvailabilityQuery {
            first_day: local_date(&self.business.offset, range.start),
            last_day: local_date(&self.business.offset, last_instant.max(range.start)),
            duration_minutes: request.duration_minutes,
            not_before: range.start.max(crate::utils::time::now()),
            interviewer_busy: &interviewer_busy,
            scheduled: &scheduled_windows,
        };

        let slots: Vec<TimeWindow> = available_slots(&self.business, &query)
            .into_iter()
            .filter(|slot| slot.end <= range.end)
            .collect();

        debug!(
            candidate_id = %request.candidate_id,
            round_id = %request.round_id,
            slots = slots.len(),
            "computed available slots"
        );
        Ok(slots)
    }

    async fn scheduled_between(
        &self,
        range: TimeWindow,
        request: &SlotRequest,
    ) -> Result<Vec<ScheduledInterview>> {
        let rows = sqlx::query_as::<_, ScheduledInterview>(
            r#"
            SELECT cr.scheduled_time AS window_start,
                   cr.scheduled_time + make_interval(mins => COALESCE(r.duration_minutes, 60)) AS window_end,
                   COALESCE(
                       (SELECT array_agg(ia.interviewer_id)
                        FROM interview_assignments ia
                        WHERE ia.candidate_id = cr.candidate_id AND ia.round_id = cr.round_id),
                       '{}'::uuid[]
                   ) AS interviewer_ids
            FROM candidate_rounds cr
            JOIN rounds r ON r.id = cr.round_id
            WHERE cr.status = 'scheduled'
              AND cr.scheduled_time IS NOT NULL
              AND cr.scheduled_time < $2
              AND cr.scheduled_time + make_interval(mins => COALESCE(r.duration_minutes, 60)) > $1
              AND NOT (cr.candidate_id = $3 AND cr.round_id = $4)
            ORDER BY cr.scheduled_time
            "#,
        )
        .bind(range.start)
        .bind(range.end)
        .bind(request.candidate_id)
        .bind(request.round_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
