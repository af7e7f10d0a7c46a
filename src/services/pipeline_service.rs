use serde::Serialize;
use serde_json::json;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::candidate::Candidate;
use crate::models::candidate_round::{Advance, CandidateRound, RoundStatus, CANDIDATE_ROUND_SELECT};
use crate::models::evaluation::{EvaluationScores, ParameterScore};
use crate::models::notification::{TEMPLATE_FINAL_OFFER, TEMPLATE_REJECTION};
use crate::models::round::{Job, RoundRef};
use crate::services::ai_service::AIService;
use crate::services::background::BackgroundTasks;
use crate::services::collaboration_service::{ChannelProvisionPayload, CollaborationService};
use crate::services::notification_service::NotificationService;
use crate::services::sync_queue::SyncQueue;

pub const ROUND_NOT_FOUND: &str = "Candidate round not found";

/// Rounds from this position on get a collaboration channel when a candidate enters them.
const COLLABORATION_FROM_ROUND: i32 = 2;

const MAX_SCORE: i64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub status: RoundStatus,
    pub moved_to_round_id: Option<Uuid>,
    pub moved_to_round_name: Option<String>,
}

impl Transition {
    fn stay(status: RoundStatus) -> Self {
        Self {
            status,
            moved_to_round_id: None,
            moved_to_round_name: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Enrollment {
    pub round_id: Uuid,
    pub round_name: String,
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct EvaluationInput {
    pub interviewer_id: Uuid,
    pub scores: Vec<ParameterScore>,
    pub feedback: Option<String>,
}

#[derive(Debug, FromRow)]
struct LockedRound {
    status: RoundStatus,
    job_id: Uuid,
    round_order: i32,
    round_name: String,
}

#[derive(Debug, FromRow)]
struct RoundFeedback {
    round_name: String,
    feedback: Option<String>,
    evaluation_scores: Json<EvaluationScores>,
}

async fn lock_round(
    tx: &mut Transaction<'_, Postgres>,
    candidate_id: Uuid,
    round_id: Uuid,
) -> Result<LockedRound> {
    sqlx::query_as::<_, LockedRound>(
        r#"
        SELECT cr.status, r.job_id, r.round_order, r.name AS round_name
        FROM candidate_rounds cr
        JOIN rounds r ON r.id = cr.round_id
        WHERE cr.candidate_id = $1 AND cr.round_id = $2
        FOR UPDATE OF cr
        "#,
    )
    .bind(candidate_id)
    .bind(round_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| Error::NotFound(ROUND_NOT_FOUND.to_string()))
}

async fn write_status(
    tx: &mut Transaction<'_, Postgres>,
    candidate_id: Uuid,
    round_id: Uuid,
    status: RoundStatus,
) -> Result<()> {
    sqlx::query(
        "UPDATE candidate_rounds SET status = $3, updated_at = NOW() WHERE candidate_id = $1 AND round_id = $2",
    )
    .bind(candidate_id)
    .bind(round_id)
    .bind(status)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Delete-then-insert of the interviewer set, inside the caller's transaction.
pub(crate) async fn replace_assignments(
    tx: &mut Transaction<'_, Postgres>,
    candidate_id: Uuid,
    round_id: Uuid,
    interviewer_ids: &[Uuid],
) -> Result<()> {
    sqlx::query("DELETE FROM interview_assignments WHERE candidate_id = $1 AND round_id = $2")
        .bind(candidate_id)
        .bind(round_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query(
        r#"
        INSERT INTO interview_assignments (candidate_id, round_id, interviewer_id)
        SELECT $1, $2, UNNEST($3::uuid[])
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(candidate_id)
    .bind(round_id)
    .bind(interviewer_ids)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn candidate_and_job(
    pool: &PgPool,
    candidate_id: Uuid,
    job_id: Uuid,
) -> anyhow::Result<(Candidate, Job)> {
    let candidate = sqlx::query_as::<_, Candidate>(
        "SELECT id, name, email, phone, created_at, updated_at FROM candidates WHERE id = $1",
    )
    .bind(candidate_id)
    .fetch_one(pool)
    .await?;
    let job = sqlx::query_as::<_, Job>("SELECT id, name, created_at FROM jobs WHERE id = $1")
        .bind(job_id)
        .fetch_one(pool)
        .await?;
    Ok((candidate, job))
}

fn feedback_summary(rounds: &[RoundFeedback]) -> String {
    rounds
        .iter()
        .map(|round| {
            let mut line = format!("{}:", round.round_name);
            if let Some(avg) = round.evaluation_scores.overall_average() {
                line.push_str(&format!(" average score {}.", avg.normalize()));
            }
            if let Some(feedback) = round
                .feedback
                .as_deref()
                .map(str::trim)
                .filter(|f| !f.is_empty())
            {
                line.push(' ');
                line.push_str(feedback);
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Clone)]
pub struct PipelineService {
    pool: PgPool,
    sync_queue: SyncQueue,
    background: BackgroundTasks,
    notifications: NotificationService,
    ai: AIService,
    collaboration: CollaborationService,
}

impl PipelineService {
    pub fn new(
        pool: PgPool,
        sync_queue: SyncQueue,
        background: BackgroundTasks,
        notifications: NotificationService,
        ai: AIService,
        collaboration: CollaborationService,
    ) -> Self {
        Self {
            pool,
            sync_queue,
            background,
            notifications,
            ai,
            collaboration,
        }
    }

    pub async fn get(&self, candidate_id: Uuid, round_id: Uuid) -> Result<CandidateRound> {
        sqlx::query_as::<_, CandidateRound>(&format!(
            "{} WHERE cr.candidate_id = $1 AND cr.round_id = $2",
            CANDIDATE_ROUND_SELECT
        ))
        .bind(candidate_id)
        .bind(round_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(ROUND_NOT_FOUND.to_string()))
    }

    /// Puts the candidate into the first round of the job. Entering twice is a no-op.
    pub async fn enroll(&self, candidate_id: Uuid, job_id: Uuid) -> Result<Enrollment> {
        let candidate_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM candidates WHERE id = $1)")
                .bind(candidate_id)
                .fetch_one(&self.pool)
                .await?;
        if !candidate_exists {
            return Err(Error::NotFound("Candidate not found".to_string()));
        }

        let first = sqlx::query_as::<_, RoundRef>(
            "SELECT id, name, round_order FROM rounds WHERE job_id = $1 ORDER BY round_order ASC LIMIT 1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound("Job not found or has no rounds".to_string()))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO candidate_rounds (candidate_id, round_id, status)
            VALUES ($1, $2, 'fresh')
            ON CONFLICT (candidate_id, round_id) DO NOTHING
            "#,
        )
        .bind(candidate_id)
        .bind(first.id)
        .execute(&self.pool)
        .await?;

        let created = inserted.rows_affected() == 1;
        if created {
            info!(candidate_id = %candidate_id, round_id = %first.id, "candidate enrolled");
            self.sync_queue.enqueue(candidate_id, first.id);
        }

        Ok(Enrollment {
            round_id: first.id,
            round_name: first.name,
            created,
        })
    }

    pub async fn advance(&self, candidate_id: Uuid, round_id: Uuid) -> Result<Transition> {
        let mut tx = self.pool.begin().await?;
        let current = lock_round(&mut tx, candidate_id, round_id).await?;

        let (transition, next_round) = match current.status.advance() {
            Advance::Settled => {
                info!(
                    candidate_id = %candidate_id,
                    round_id = %round_id,
                    status = %current.status,
                    "advance on a closed round ignored"
                );
                return Ok(Transition::stay(current.status));
            }
            Advance::Step(next) => {
                write_status(&mut tx, candidate_id, round_id, next).await?;
                (Transition::stay(next), None)
            }
            Advance::Promote => {
                write_status(&mut tx, candidate_id, round_id, RoundStatus::Accepted).await?;
                let next = sqlx::query_as::<_, RoundRef>(
                    "SELECT id, name, round_order FROM rounds WHERE job_id = $1 AND round_order = $2",
                )
                .bind(current.job_id)
                .bind(current.round_order + 1)
                .fetch_optional(&mut *tx)
                .await?;

                if let Some(next) = &next {
                    sqlx::query(
                        r#"
                        INSERT INTO candidate_rounds (candidate_id, round_id, status)
                        VALUES ($1, $2, 'fresh')
                        ON CONFLICT (candidate_id, round_id) DO NOTHING
                        "#,
                    )
                    .bind(candidate_id)
                    .bind(next.id)
                    .execute(&mut *tx)
                    .await?;
                }

                let transition = Transition {
                    status: RoundStatus::Accepted,
                    moved_to_round_id: next.as_ref().map(|n| n.id),
                    moved_to_round_name: next.as_ref().map(|n| n.name.clone()),
                };
                (transition, next)
            }
        };

        tx.commit().await?;
        info!(
            candidate_id = %candidate_id,
            round_id = %round_id,
            from = %current.status,
            to = %transition.status,
            moved_to_round_id = ?transition.moved_to_round_id,
            "round status changed"
        );

        self.sync_queue.enqueue(candidate_id, round_id);
        if current.status == RoundStatus::Completed {
            match next_round {
                Some(next) => {
                    self.sync_queue.enqueue(candidate_id, next.id);
                    if next.round_order >= COLLABORATION_FROM_ROUND {
                        self.provision_channel(candidate_id, current.job_id, next);
                    }
                }
                None => self.trigger_final_offer(candidate_id, current.job_id),
            }
        }

        Ok(transition)
    }

    pub async fn reject(
        &self,
        candidate_id: Uuid,
        round_id: Uuid,
        reason: Option<String>,
    ) -> Result<Transition> {
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        let mut tx = self.pool.begin().await?;
        let current = lock_round(&mut tx, candidate_id, round_id).await?;
        sqlx::query(
            r#"
            UPDATE candidate_rounds
            SET status = 'rejected', rejection_reason = COALESCE($3, rejection_reason), updated_at = NOW()
            WHERE candidate_id = $1 AND round_id = $2
            "#,
        )
        .bind(candidate_id)
        .bind(round_id)
        .bind(&reason)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(
            candidate_id = %candidate_id,
            round_id = %round_id,
            from = %current.status,
            to = %RoundStatus::Rejected,
            "round status changed"
        );

        self.sync_queue.enqueue(candidate_id, round_id);
        self.send_rejection(candidate_id, current, reason);
        Ok(Transition::stay(RoundStatus::Rejected))
    }

    /// Undoes an in-flight assignment.
    pub async fn move_to_fresh(&self, candidate_id: Uuid, round_id: Uuid) -> Result<Transition> {
        let mut tx = self.pool.begin().await?;
        let current = lock_round(&mut tx, candidate_id, round_id).await?;
        sqlx::query(
            r#"
            UPDATE candidate_rounds
            SET status = 'fresh', requested_reassignment = FALSE, updated_at = NOW()
            WHERE candidate_id = $1 AND round_id = $2
            "#,
        )
        .bind(candidate_id)
        .bind(round_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(candidate_id = %candidate_id, round_id = %round_id, from = %current.status, to = %RoundStatus::Fresh, "round status changed");
        self.sync_queue.enqueue(candidate_id, round_id);
        Ok(Transition::stay(RoundStatus::Fresh))
    }

    pub async fn assign_interviewers(
        &self,
        candidate_id: Uuid,
        round_id: Uuid,
        mut interviewer_ids: Vec<Uuid>,
    ) -> Result<Transition> {
        interviewer_ids.sort();
        interviewer_ids.dedup();
        if interviewer_ids.is_empty() {
            return Err(Error::BadRequest(
                "At least one interviewer is required".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        let current = lock_round(&mut tx, candidate_id, round_id).await?;

        let known: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM interviewers WHERE id = ANY($1)")
            .bind(&interviewer_ids)
            .fetch_one(&mut *tx)
            .await?;
        if known != interviewer_ids.len() as i64 {
            return Err(Error::BadRequest("Unknown interviewer id".to_string()));
        }

        replace_assignments(&mut tx, candidate_id, round_id, &interviewer_ids).await?;
        write_status(&mut tx, candidate_id, round_id, RoundStatus::InProgress).await?;
        tx.commit().await?;

        info!(
            candidate_id = %candidate_id,
            round_id = %round_id,
            from = %current.status,
            to = %RoundStatus::InProgress,
            interviewers = interviewer_ids.len(),
            "interviewers assigned"
        );
        self.sync_queue.enqueue(candidate_id, round_id);
        Ok(Transition::stay(RoundStatus::InProgress))
    }

    /// Administrative override outside the `advance` ladder.
    pub async fn set_status(&self, candidate_id: Uuid, round_id: Uuid, raw: &str) -> Result<Transition> {
        let status = RoundStatus::parse_override(raw).ok_or_else(|| {
            Error::BadRequest(format!(
                "Invalid status '{}'. Allowed: in_progress, scheduled, completed, accepted, rejected",
                raw
            ))
        })?;

        let mut tx = self.pool.begin().await?;
        let current = lock_round(&mut tx, candidate_id, round_id).await?;
        write_status(&mut tx, candidate_id, round_id, status).await?;
        tx.commit().await?;

        info!(candidate_id = %candidate_id, round_id = %round_id, from = %current.status, to = %status, "round status overridden");
        self.sync_queue.enqueue(candidate_id, round_id);
        Ok(Transition::stay(status))
    }

    /// Releases the booked time and sends the round back to `in_progress`.
    pub async fn reschedule(&self, candidate_id: Uuid, round_id: Uuid) -> Result<Transition> {
        let mut tx = self.pool.begin().await?;
        let current = lock_round(&mut tx, candidate_id, round_id).await?;
        if current.status != RoundStatus::Scheduled {
            return Err(Error::BadRequest(
                "Only scheduled interviews can be rescheduled".to_string(),
            ));
        }
        sqlx::query(
            r#"
            UPDATE candidate_rounds
            SET status = 'in_progress', scheduled_time = NULL, meet_link = NULL,
                calendar_event_id = NULL, updated_at = NOW()
            WHERE candidate_id = $1 AND round_id = $2
            "#,
        )
        .bind(candidate_id)
        .bind(round_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(candidate_id = %candidate_id, round_id = %round_id, "interview slot released for rescheduling");
        self.sync_queue.enqueue(candidate_id, round_id);
        Ok(Transition::stay(RoundStatus::InProgress))
    }

    pub async fn record_evaluation(
        &self,
        candidate_id: Uuid,
        round_id: Uuid,
        input: EvaluationInput,
    ) -> Result<CandidateRound> {
        if input.scores.is_empty() {
            return Err(Error::BadRequest("At least one score is required".to_string()));
        }
        let max = rust_decimal::Decimal::from(MAX_SCORE);
        if let Some(bad) = input
            .scores
            .iter()
            .find(|s| s.score.is_sign_negative() || s.score > max)
        {
            return Err(Error::BadRequest(format!(
                "Score for '{}' must be between 0 and {}",
                bad.parameter, MAX_SCORE
            )));
        }

        let mut tx = self.pool.begin().await?;
        let (Json(mut evaluation), Json(parameters)) =
            sqlx::query_as::<_, (Json<EvaluationScores>, Json<Vec<String>>)>(
                r#"
                SELECT cr.evaluation_scores, r.evaluation_parameters
                FROM candidate_rounds cr
                JOIN rounds r ON r.id = cr.round_id
                WHERE cr.candidate_id = $1 AND cr.round_id = $2
                FOR UPDATE OF cr
                "#,
            )
            .bind(candidate_id)
            .bind(round_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound(ROUND_NOT_FOUND.to_string()))?;

        let assigned: bool = sqlx::query_scalar(
            r#"SELECT EXISTS(
                   SELECT 1 FROM interview_assignments
                   WHERE candidate_id = $1 AND round_id = $2 AND interviewer_id = $3
               )"#,
        )
        .bind(candidate_id)
        .bind(round_id)
        .bind(input.interviewer_id)
        .fetch_one(&mut *tx)
        .await?;
        if !assigned {
            return Err(Error::BadRequest(
                "Interviewer is not assigned to this candidate round".to_string(),
            ));
        }

        if !parameters.is_empty() {
            if let Some(unknown) = input
                .scores
                .iter()
                .find(|s| !parameters.contains(&s.parameter))
            {
                return Err(Error::BadRequest(format!(
                    "Unknown evaluation parameter '{}'",
                    unknown.parameter
                )));
            }
        }

        evaluation.record(input.interviewer_id, input.scores);
        let feedback = input
            .feedback
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty());

        sqlx::query(
            r#"
            UPDATE candidate_rounds
            SET evaluation_scores = $3, feedback = COALESCE($4, feedback), updated_at = NOW()
            WHERE candidate_id = $1 AND round_id = $2
            "#,
        )
        .bind(candidate_id)
        .bind(round_id)
        .bind(Json(&evaluation))
        .bind(&feedback)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(candidate_id = %candidate_id, round_id = %round_id, interviewer_id = %input.interviewer_id, "evaluation recorded");
        self.sync_queue.enqueue(candidate_id, round_id);
        self.get(candidate_id, round_id).await
    }

    /// HR removal. Assignments and booking tokens go with the row.
    pub async fn remove(&self, candidate_id: Uuid, round_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let tab: String = sqlx::query_scalar(
            r#"
            SELECT j.name
            FROM candidate_rounds cr
            JOIN rounds r ON r.id = cr.round_id
            JOIN jobs j ON j.id = r.job_id
            WHERE cr.candidate_id = $1 AND cr.round_id = $2
            FOR UPDATE OF cr
            "#,
        )
        .bind(candidate_id)
        .bind(round_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound(ROUND_NOT_FOUND.to_string()))?;

        sqlx::query("DELETE FROM candidate_rounds WHERE candidate_id = $1 AND round_id = $2")
            .bind(candidate_id)
            .bind(round_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(candidate_id = %candidate_id, round_id = %round_id, "candidate round removed");
        self.sync_queue.enqueue_removal(candidate_id, round_id, tab);
        Ok(())
    }

    fn send_rejection(&self, candidate_id: Uuid, round: LockedRound, reason: Option<String>) {
        let pool = self.pool.clone();
        let notifications = self.notifications.clone();
        self.background.spawn("rejection_notification", async move {
            let (candidate, job) = candidate_and_job(&pool, candidate_id, round.job_id).await?;
            notifications
                .notify(
                    &candidate.email,
                    TEMPLATE_REJECTION,
                    &json!({
                        "candidate_name": candidate.name,
                        "job_name": job.name,
                        "round_name": round.round_name,
                        "reason": reason,
                    }),
                )
                .await?;
            Ok(())
        });
    }

    fn provision_channel(&self, candidate_id: Uuid, job_id: Uuid, round: RoundRef) {
        if !self.collaboration.is_enabled() {
            return;
        }
        let pool = self.pool.clone();
        let collaboration = self.collaboration.clone();
        self.background.spawn("collaboration_channel", async move {
            let (candidate, job) = candidate_and_job(&pool, candidate_id, job_id).await?;
            collaboration
                .provision_channel(ChannelProvisionPayload {
                    event_type: "provision_channel".to_string(),
                    candidate_id,
                    candidate_name: candidate.name,
                    job_name: job.name,
                    round_id: round.id,
                    round_name: round.name,
                    round_order: round.round_order,
                    requested_at: chrono::Utc::now().to_rfc3339(),
                })
                .await
        });
    }

    fn trigger_final_offer(&self, candidate_id: Uuid, job_id: Uuid) {
        let this = self.clone();
        self.background.spawn("final_offer", async move {
            this.send_final_offer(candidate_id, job_id).await
        });
    }

    async fn send_final_offer(&self, candidate_id: Uuid, job_id: Uuid) -> anyhow::Result<()> {
        let (candidate, job) = candidate_and_job(&self.pool, candidate_id, job_id).await?;
        let rounds = sqlx::query_as::<_, RoundFeedback>(
            r#"
            SELECT r.name AS round_name, cr.feedback, cr.evaluation_scores
            FROM candidate_rounds cr
            JOIN rounds r ON r.id = cr.round_id
            WHERE cr.candidate_id = $1 AND r.job_id = $2
            ORDER BY r.round_order
            "#,
        )
        .bind(candidate_id)
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        let summary = feedback_summary(&rounds);
        let email = self
            .ai
            .draft_offer_email(&candidate.name, &job.name, &summary)
            .await?;
        self.notifications
            .notify(
                &candidate.email,
                TEMPLATE_FINAL_OFFER,
                &json!({
                    "candidate_name": candidate.name,
                    "job_name": job.name,
                    "subject": email.subject,
                    "body": email.body,
                }),
            )
            .await?;

        info!(candidate_id = %candidate_id, job_id = %job_id, "final offer drafted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn feedback_summary_lists_rounds_in_order() {
        let mut scores = EvaluationScores::default();
        scores.record(
            Uuid::new_v4(),
            vec![ParameterScore {
                parameter: "design".into(),
                score: Decimal::new(4, 0),
                comment: None,
            }],
        );
        let rounds = vec![
            RoundFeedback {
                round_name: "Screening".into(),
                feedback: Some("  Clear communicator. ".into()),
                evaluation_scores: Json(EvaluationScores::default()),
            },
            RoundFeedback {
                round_name: "Technical".into(),
                feedback: None,
                evaluation_scores: Json(scores),
            },
        ];
        assert_eq!(
            feedback_summary(&rounds),
            "Screening: Clear communicator.\nTechnical: average score 4."
        );
    }
}
