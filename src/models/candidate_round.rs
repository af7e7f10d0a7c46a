use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::evaluation::EvaluationScores;

/// Status of a candidate inside one interview round.
///
/// `Accepted` and `Rejected` are terminal for the round. Stored as the
/// `round_status` Postgres enum so an unknown value cannot be persisted either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "round_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Fresh,
    InProgress,
    Scheduled,
    Completed,
    Accepted,
    Rejected,
}

/// What `advance` has to do from a given status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Move along the ladder within the same round.
    Step(RoundStatus),
    /// The round is done: accept it and promote into the next round, if any.
    Promote,
    /// Terminal already; nothing changes.
    Settled,
}

impl RoundStatus {
    pub const ALL: [RoundStatus; 6] = [
        RoundStatus::Fresh,
        RoundStatus::InProgress,
        RoundStatus::Scheduled,
        RoundStatus::Completed,
        RoundStatus::Accepted,
        RoundStatus::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RoundStatus::Fresh => "fresh",
            RoundStatus::InProgress => "in_progress",
            RoundStatus::Scheduled => "scheduled",
            RoundStatus::Completed => "completed",
            RoundStatus::Accepted => "accepted",
            RoundStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RoundStatus::Accepted | RoundStatus::Rejected)
    }

    pub fn advance(self) -> Advance {
        match self {
            RoundStatus::Fresh => Advance::Step(RoundStatus::InProgress),
            RoundStatus::InProgress => Advance::Step(RoundStatus::Scheduled),
            RoundStatus::Scheduled => Advance::Step(RoundStatus::Completed),
            RoundStatus::Completed => Advance::Promote,
            RoundStatus::Accepted | RoundStatus::Rejected => Advance::Settled,
        }
    }

    /// Statuses an administrator may force directly. `fresh` is only reachable
    /// through `move_to_fresh`, which also clears the reassignment flag.
    pub fn parse_override(raw: &str) -> Option<RoundStatus> {
        match raw.parse::<RoundStatus>() {
            Ok(RoundStatus::Fresh) | Err(_) => None,
            Ok(status) => Some(status),
        }
    }

    /// Row ordering used in the external mirror: live candidates first, closed ones last.
    pub fn sort_rank(self) -> u8 {
        match self {
            RoundStatus::Scheduled => 0,
            RoundStatus::InProgress => 1,
            RoundStatus::Fresh => 2,
            RoundStatus::Completed => 3,
            RoundStatus::Accepted => 4,
            RoundStatus::Rejected => 5,
        }
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoundStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoundStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim())
            .ok_or_else(|| format!("unknown round status '{}'", s))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CandidateRound {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub round_id: Uuid,
    pub status: RoundStatus,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub meet_link: Option<String>,
    pub calendar_event_id: Option<String>,
    pub assigned_interviewers: Vec<Uuid>,
    pub evaluation_scores: Json<EvaluationScores>,
    pub feedback: Option<String>,
    pub rejection_reason: Option<String>,
    pub requested_reassignment: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub const CANDIDATE_ROUND_SELECT: &str = r#"
    SELECT cr.id, cr.candidate_id, cr.round_id, cr.status, cr.scheduled_time, cr.meet_link,
           cr.calendar_event_id,
           COALESCE(
               (SELECT array_agg(ia.interviewer_id ORDER BY ia.interviewer_id)
                FROM interview_assignments ia
                WHERE ia.candidate_id = cr.candidate_id AND ia.round_id = cr.round_id),
               '{}'::uuid[]
           ) AS assigned_interviewers,
           cr.evaluation_scores, cr.feedback, cr.rejection_reason, cr.requested_reassignment,
           cr.created_at, cr.updated_at
    FROM candidate_rounds cr
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_walks_the_ladder_in_order() {
        let mut status = RoundStatus::Fresh;
        let mut visited = vec![];
        while let Advance::Step(next) = status.advance() {
            visited.push(next);
            status = next;
        }
        assert_eq!(
            visited,
            vec![
                RoundStatus::InProgress,
                RoundStatus::Scheduled,
                RoundStatus::Completed
            ]
        );
        assert_eq!(status.advance(), Advance::Promote);
    }

    #[test]
    fn terminal_statuses_never_move() {
        for status in [RoundStatus::Accepted, RoundStatus::Rejected] {
            assert!(status.is_terminal());
            assert_eq!(status.advance(), Advance::Settled);
        }
        assert!(!RoundStatus::Completed.is_terminal());
    }

    #[test]
    fn override_allow_list_excludes_fresh_and_garbage() {
        assert_eq!(RoundStatus::parse_override("fresh"), None);
        assert_eq!(RoundStatus::parse_override("on_hold"), None);
        assert_eq!(
            RoundStatus::parse_override("completed"),
            Some(RoundStatus::Completed)
        );
        assert_eq!(
            RoundStatus::parse_override(" rejected "),
            Some(RoundStatus::Rejected)
        );
    }

    #[test]
    fn string_form_round_trips_through_serde() {
        for status in RoundStatus::ALL {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, serde_json::json!(status.as_str()));
            assert_eq!(status.as_str().parse::<RoundStatus>().unwrap(), status);
        }
    }
}
