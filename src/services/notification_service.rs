use crate::error::Result;
use crate::models::notification::Notification;
use reqwest::Client;
use serde_json::{json, Value as JsonValue};
use sqlx::{PgPool, Row};
use tracing::{debug, warn};
use uuid::Uuid;

const NOTIFICATION_COLUMNS: &str = "id, recipient, template, payload, status, attempts, max_attempts, next_retry_at, http_status, response_body, created_at, updated_at";

#[derive(Clone)]
pub struct NotificationService {
    pool: PgPool,
    client: Client,
    target_url: Option<String>,
    secret: Option<String>,
}

impl NotificationService {
    pub fn new(
        pool: PgPool,
        client: Client,
        target_url: Option<String>,
        secret: Option<String>,
    ) -> Self {
        Self {
            pool,
            client,
            target_url,
            secret,
        }
    }

    /// Records the notification; delivery happens in `run_once`.
    pub async fn notify(
        &self,
        recipient: &str,
        template: &str,
        payload: &JsonValue,
    ) -> Result<Notification> {
        let row = sqlx::query_as::<_, Notification>(&format!(
            r#"
            INSERT INTO notification_outbox (recipient, template, payload, status)
            VALUES ($1, $2, $3, 'pending')
            RETURNING {}
            "#,
            NOTIFICATION_COLUMNS
        ))
        .bind(recipient)
        .bind(template)
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;
        debug!(notification_id = %row.id, template, "notification queued");
        Ok(row)
    }

    pub async fn deliver_once(&self, id: Uuid) -> Result<()> {
        let notification = sqlx::query_as::<_, Notification>(&format!(
            "SELECT {} FROM notification_outbox WHERE id = $1",
            NOTIFICATION_COLUMNS
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        let Some(target_url) = &self.target_url else {
            sqlx::query(
                r#"UPDATE notification_outbox SET status = 'skipped', attempts = attempts + 1, updated_at = NOW() WHERE id = $1"#,
            )
            .bind(id)
            .execute(&self.pool)
            .await?;
            return Ok(());
        };

        let mut req = self.client.post(target_url).json(&json!({
            "id": notification.id,
            "recipient": notification.recipient,
            "template": notification.template,
            "payload": notification.payload,
        }));
        if let Some(secret) = &self.secret {
            req = req.header("X-Webhook-Secret", secret);
        }

        match req.send().await {
            Ok(resp) => {
                let status = resp.status().as_u16() as i32;
                let body = resp.text().await.unwrap_or_default();
                sqlx::query(
                    r#"UPDATE notification_outbox SET http_status = $1, response_body = $2, status = CASE WHEN $1 BETWEEN 200 AND 299 THEN 'sent' ELSE 'failed' END, attempts = attempts + 1, updated_at = NOW() WHERE id = $3"#,
                )
                .bind(status)
                .bind(body)
                .bind(id)
                .execute(&self.pool)
                .await?;
            }
            Err(err) => {
                sqlx::query(
                    r#"UPDATE notification_outbox SET response_body = $1, status = 'failed', attempts = attempts + 1, updated_at = NOW() WHERE id = $2"#,
                )
                .bind(err.to_string())
                .bind(id)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    /// Delivers at most one due notification. Returns whether one was claimed.
    pub async fn run_once(&self) -> Result<bool> {
        let claimed = sqlx::query(
            r#"UPDATE notification_outbox SET status = 'sending', updated_at = NOW()
               WHERE id = (
                   SELECT id FROM notification_outbox
                   WHERE status = 'pending' AND (next_retry_at IS NULL OR next_retry_at <= NOW())
                   ORDER BY created_at ASC
                   FOR UPDATE SKIP LOCKED
                   LIMIT 1
               )
               RETURNING id"#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = claimed else { return Ok(false) };
        let id: Uuid = row.try_get("id")?;

        if let Err(e) = self.deliver_once(id).await {
            warn!(notification_id = %id, error = %e, "notification delivery errored");
            sqlx::query(
                r#"UPDATE notification_outbox SET status = 'failed', attempts = attempts + 1, updated_at = NOW() WHERE id = $1 AND status = 'sending'"#,
            )
            .bind(id)
            .execute(&self.pool)
            .await?;
        }

        let row = sqlx::query("SELECT attempts, max_attempts, status FROM notification_outbox WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        let attempts: i32 = row.try_get("attempts")?;
        let max_attempts: i32 = row.try_get("max_attempts")?;
        let status: String = row.try_get("status")?;

        if status == "failed" && attempts < max_attempts {
            sqlx::query(
                r#"UPDATE notification_outbox
                   SET status = 'pending',
                       next_retry_at = NOW() + make_interval(secs => LEAST(3600, 30 * power(2::float, GREATEST(0, attempts - 1))::int))
                   WHERE id = $1"#,
            )
            .bind(id)
            .execute(&self.pool)
            .await?;
        } else if status == "failed" {
            warn!(notification_id = %id, attempts, "notification permanently failed");
        }

        Ok(true)
    }
}
