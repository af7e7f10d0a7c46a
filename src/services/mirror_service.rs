use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::candidate_round::RoundStatus;
use crate::models::evaluation::EvaluationScores;
use crate::services::sync_queue::{SyncExecutor, SyncKey, SyncKind};
use crate::utils::time::to_local_rfc3339;

/// Everything the mirror row is derived from, read in one query.
#[derive(Debug, Clone, FromRow)]
pub struct CandidateSnapshot {
    pub candidate_id: Uuid,
    pub round_id: Uuid,
    pub candidate_name: String,
    pub candidate_email: String,
    pub job_name: String,
    pub round_name: String,
    pub round_order: i32,
    pub status: RoundStatus,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub meet_link: Option<String>,
    pub interviewer_names: Vec<String>,
    pub evaluation_scores: Json<EvaluationScores>,
    pub feedback: Option<String>,
    pub rejection_reason: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One row of the external document. `key` is the stable identity the row is matched on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorRow {
    pub key: String,
    pub candidate: String,
    pub email: String,
    pub round: String,
    pub round_order: i32,
    pub status: RoundStatus,
    pub scheduled_time: String,
    pub meet_link: String,
    pub interviewers: String,
    pub average_score: String,
    pub feedback: String,
    pub rejection_reason: String,
    pub updated_at: String,
}

pub fn row_key(candidate_id: Uuid, round_id: Uuid) -> String {
    format!("{}/{}", candidate_id, round_id)
}

impl MirrorRow {
    /// Pure function of the snapshot, so projecting the same state twice gives the same row.
    pub fn project(snapshot: &CandidateSnapshot, offset: &FixedOffset) -> Self {
        let local = |instant: Option<DateTime<Utc>>| {
            instant
                .map(|t| to_local_rfc3339(offset, t))
                .unwrap_or_default()
        };
        Self {
            key: row_key(snapshot.candidate_id, snapshot.round_id),
            candidate: snapshot.candidate_name.clone(),
            email: snapshot.candidate_email.clone(),
            round: snapshot.round_name.clone(),
            round_order: snapshot.round_order,
            status: snapshot.status,
            scheduled_time: local(snapshot.scheduled_time),
            meet_link: snapshot.meet_link.clone().unwrap_or_default(),
            interviewers: snapshot.interviewer_names.join(", "),
            average_score: snapshot
                .evaluation_scores
                .overall_average()
                .map(|avg| avg.normalize().to_string())
                .unwrap_or_default(),
            feedback: snapshot.feedback.clone().unwrap_or_default(),
            rejection_reason: snapshot.rejection_reason.clone().unwrap_or_default(),
            updated_at: local(snapshot.updated_at),
        }
    }
}

/// External document API the mirror is written through.
#[async_trait]
pub trait MirrorDocument: Send + Sync {
    async fn upsert_row(
        &self,
        document_id: &str,
        tab: &str,
        key_column: &str,
        row: &MirrorRow,
    ) -> anyhow::Result<()>;

    async fn delete_row(
        &self,
        document_id: &str,
        tab: &str,
        key_column: &str,
        key_value: &str,
    ) -> anyhow::Result<()>;

    /// Re-orders the tab so live candidates come first.
    async fn sort_by_status(&self, document_id: &str, tab: &str) -> anyhow::Result<()>;
}

/// Reads the current state of a candidate round.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(
        &self,
        candidate_id: Uuid,
        round_id: Uuid,
    ) -> anyhow::Result<Option<CandidateSnapshot>>;
}

#[derive(Clone)]
pub struct PgSnapshotSource {
    pool: PgPool,
}

impl PgSnapshotSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotSource for PgSnapshotSource {
    async fn snapshot(
        &self,
        candidate_id: Uuid,
        round_id: Uuid,
    ) -> anyhow::Result<Option<CandidateSnapshot>> {
        let row = sqlx::query_as::<_, CandidateSnapshot>(
            r#"
            SELECT cr.candidate_id, cr.round_id,
                   c.name AS candidate_name, c.email AS candidate_email,
                   j.name AS job_name, r.name AS round_name, r.round_order,
                   cr.status, cr.scheduled_time, cr.meet_link,
                   COALESCE(
                       (SELECT array_agg(i.name ORDER BY i.name)
                        FROM interview_assignments ia
                        JOIN interviewers i ON i.id = ia.interviewer_id
                        WHERE ia.candidate_id = cr.candidate_id AND ia.round_id = cr.round_id),
                       '{}'::text[]
                   ) AS interviewer_names,
                   cr.evaluation_scores, cr.feedback, cr.rejection_reason, cr.updated_at
            FROM candidate_rounds cr
            JOIN candidates c ON c.id = cr.candidate_id
            JOIN rounds r ON r.id = cr.round_id
            JOIN jobs j ON j.id = r.job_id
            WHERE cr.candidate_id = $1 AND cr.round_id = $2
            "#,
        )
        .bind(candidate_id)
        .bind(round_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

/// Executes sync tasks: one tab per job, one row per candidate round.
pub struct MirrorWriter {
    source: Arc<dyn SnapshotSource>,
    document: Arc<dyn MirrorDocument>,
    document_id: String,
    key_column: String,
    offset: FixedOffset,
}

impl MirrorWriter {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        document: Arc<dyn MirrorDocument>,
        document_id: String,
        key_column: String,
        offset: FixedOffset,
    ) -> Self {
        Self {
            source,
            document,
            document_id,
            key_column,
            offset,
        }
    }
}

#[async_trait]
impl SyncExecutor for MirrorWriter {
    async fn execute(&self, key: SyncKey, kind: &SyncKind) -> anyhow::Result<()> {
        match kind {
            SyncKind::Sync => {
                let Some(snapshot) = self.source.snapshot(key.candidate_id, key.round_id).await?
                else {
                    debug!(candidate_id = %key.candidate_id, round_id = %key.round_id, "candidate round gone, nothing to mirror");
                    return Ok(());
                };
                let row = MirrorRow::project(&snapshot, &self.offset);
                self.document
                    .upsert_row(&self.document_id, &snapshot.job_name, &self.key_column, &row)
                    .await?;
                self.document
                    .sort_by_status(&self.document_id, &snapshot.job_name)
                    .await
            }
            SyncKind::Remove { tab } => {
                self.document
                    .delete_row(
                        &self.document_id,
                        tab,
                        &self.key_column,
                        &row_key(key.candidate_id, key.round_id),
                    )
                    .await
            }
        }
    }
}

/// In-process document, used when no mirror API is configured.
#[derive(Default)]
pub struct InMemoryMirror {
    tabs: Mutex<HashMap<(String, String), Vec<MirrorRow>>>,
}

impl InMemoryMirror {
    pub fn rows(&self, document_id: &str, tab: &str) -> Vec<MirrorRow> {
        self.tabs
            .lock()
            .map(|tabs| {
                tabs.get(&(document_id.to_string(), tab.to_string()))
                    .cloned()
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    fn with_tab<T>(
        &self,
        document_id: &str,
        tab: &str,
        f: impl FnOnce(&mut Vec<MirrorRow>) -> T,
    ) -> anyhow::Result<T> {
        let mut tabs = self
            .tabs
            .lock()
            .map_err(|_| anyhow::anyhow!("in-memory mirror lock poisoned"))?;
        let rows = tabs
            .entry((document_id.to_string(), tab.to_string()))
            .or_default();
        Ok(f(rows))
    }
}

#[async_trait]
impl MirrorDocument for InMemoryMirror {
    async fn upsert_row(
        &self,
        document_id: &str,
        tab: &str,
        _key_column: &str,
        row: &MirrorRow,
    ) -> anyhow::Result<()> {
        self.with_tab(document_id, tab, |rows| {
            match rows.iter_mut().find(|existing| existing.key == row.key) {
                Some(existing) => *existing = row.clone(),
                None => rows.push(row.clone()),
            }
        })
    }

    async fn delete_row(
        &self,
        document_id: &str,
        tab: &str,
        _key_column: &str,
        key_value: &str,
    ) -> anyhow::Result<()> {
        self.with_tab(document_id, tab, |rows| rows.retain(|row| row.key != key_value))
    }

    async fn sort_by_status(&self, document_id: &str, tab: &str) -> anyhow::Result<()> {
        self.with_tab(document_id, tab, |rows| {
            rows.sort_by_key(|row| (row.status.sort_rank(), row.round_order))
        })
    }
}

/// REST document API: rows are addressed by `keyColumn` inside a named tab.
#[derive(Clone)]
pub struct HttpMirror {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpMirror {
    pub fn new(client: Client, base_url: String, api_token: Option<String>) -> Self {
        info!("Mirror integration enabled, API base: {}", base_url);
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> anyhow::Result<()> {
        let mut req = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body);
        if let Some(token) = &self.api_token {
            req = req.bearer_auth(token);
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            anyhow::bail!("mirror API {} returned {}: {}", path, status, text);
        }
        Ok(())
    }
}

#[async_trait]
impl MirrorDocument for HttpMirror {
    async fn upsert_row(
        &self,
        document_id: &str,
        tab: &str,
        key_column: &str,
        row: &MirrorRow,
    ) -> anyhow::Result<()> {
        self.post(
            "/rows/upsert",
            json!({
                "documentId": document_id,
                "tabName": tab,
                "keyColumn": key_column,
                "keyValue": row.key,
                "row": row,
            }),
        )
        .await
    }

    async fn delete_row(
        &self,
        document_id: &str,
        tab: &str,
        key_column: &str,
        key_value: &str,
    ) -> anyhow::Result<()> {
        self.post(
            "/rows/delete",
            json!({
                "documentId": document_id,
                "tabName": tab,
                "keyColumn": key_column,
                "keyValue": key_value,
            }),
        )
        .await
    }

    async fn sort_by_status(&self, document_id: &str, tab: &str) -> anyhow::Result<()> {
        let order: Vec<&str> = {
            let mut statuses = RoundStatus::ALL.to_vec();
            statuses.sort_by_key(|s| s.sort_rank());
            statuses.into_iter().map(RoundStatus::as_str).collect()
        };
        self.post(
            "/tabs/sort",
            json!({
                "documentId": document_id,
                "tabName": tab,
                "column": "status",
                "order": order,
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::evaluation::ParameterScore;
    use rust_decimal::Decimal;

    fn tokyo() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    fn snapshot(status: RoundStatus) -> CandidateSnapshot {
        let mut scores = EvaluationScores::default();
        scores.record(
            Uuid::new_v4(),
            vec![ParameterScore {
                parameter: "communication".into(),
                score: Decimal::new(45, 1),
                comment: None,
            }],
        );
        CandidateSnapshot {
            candidate_id: Uuid::new_v4(),
            round_id: Uuid::new_v4(),
            candidate_name: "Aiko Tanaka".into(),
            candidate_email: "aiko@example.com".into(),
            job_name: "Backend Engineer".into(),
            round_name: "Technical".into(),
            round_order: 1,
            status,
            scheduled_time: None,
            meet_link: None,
            interviewer_names: vec!["Ken".into(), "Mei".into()],
            evaluation_scores: Json(scores),
            feedback: None,
            rejection_reason: None,
            updated_at: None,
        }
    }

    fn writer(source: MockSnapshotSource, mirror: Arc<InMemoryMirror>) -> MirrorWriter {
        MirrorWriter::new(
            Arc::new(source),
            mirror,
            "doc".into(),
            "Key".into(),
            tokyo(),
        )
    }

    #[test]
    fn projection_is_keyed_and_flattened() {
        let snap = snapshot(RoundStatus::Scheduled);
        let row = MirrorRow::project(&snap, &tokyo());
        assert_eq!(row.key, row_key(snap.candidate_id, snap.round_id));
        assert_eq!(row.interviewers, "Ken, Mei");
        assert_eq!(row.average_score, "4.5");
        assert_eq!(row, MirrorRow::project(&snap, &tokyo()));
    }

    #[tokio::test]
    async fn repeated_syncs_update_in_place() {
        let snap = snapshot(RoundStatus::InProgress);
        let key = SyncKey::new(snap.candidate_id, snap.round_id);
        let mut source = MockSnapshotSource::new();
        let returned = snap.clone();
        source
            .expect_snapshot()
            .times(3)
            .returning(move |_, _| Ok(Some(returned.clone())));

        let mirror = Arc::new(InMemoryMirror::default());
        let writer = writer(source, mirror.clone());
        for _ in 0..3 {
            writer.execute(key, &SyncKind::Sync).await.unwrap();
        }
        let rows = mirror.rows("doc", "Backend Engineer");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, RoundStatus::InProgress);
    }

    #[tokio::test]
    async fn removal_deletes_only_that_row() {
        let mirror = Arc::new(InMemoryMirror::default());
        let keep = MirrorRow::project(&snapshot(RoundStatus::Fresh), &tokyo());
        let snap = snapshot(RoundStatus::Rejected);
        let drop = MirrorRow::project(&snap, &tokyo());
        for row in [&keep, &drop] {
            mirror.upsert_row("doc", "Backend Engineer", "Key", row).await.unwrap();
        }

        let writer = writer(MockSnapshotSource::new(), mirror.clone());
        let kind = SyncKind::Remove {
            tab: "Backend Engineer".into(),
        };
        writer
            .execute(SyncKey::new(snap.candidate_id, snap.round_id), &kind)
            .await
            .unwrap();
        assert_eq!(mirror.rows("doc", "Backend Engineer"), vec![keep]);
    }

    #[tokio::test]
    async fn rows_sort_live_candidates_first() {
        let mirror = InMemoryMirror::default();
        for status in [RoundStatus::Rejected, RoundStatus::Fresh, RoundStatus::Scheduled] {
            let row = MirrorRow::project(&snapshot(status), &tokyo());
            mirror.upsert_row("doc", "t", "Key", &row).await.unwrap();
        }
        mirror.sort_by_status("doc", "t").await.unwrap();
        let statuses: Vec<_> = mirror.rows("doc", "t").into_iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![RoundStatus::Scheduled, RoundStatus::Fresh, RoundStatus::Rejected]
        );
    }

    #[tokio::test]
    async fn vanished_round_is_not_an_error() {
        let mut source = MockSnapshotSource::new();
        source.expect_snapshot().returning(|_, _| Ok(None));
        let mirror = Arc::new(InMemoryMirror::default());
        let writer = writer(source, mirror.clone());
        writer
            .execute(SyncKey::new(Uuid::new_v4(), Uuid::new_v4()), &SyncKind::Sync)
            .await
            .unwrap();
    }
}
