use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::booking_token::BookingToken;
use crate::services::slot_service::TimeWindow;
use crate::utils::token::{generate_access_token, hash_token, BOOKING_TOKEN_LENGTH};

const TOKEN_COLUMNS: &str = "id, token_hash, candidate_id, round_id, interviewer_ids, slot_start, slot_end, expires_at, used, created_at";

#[derive(Debug, Clone)]
pub struct NewBookingToken {
    pub candidate_id: Uuid,
    pub round_id: Uuid,
    pub interviewer_ids: Vec<Uuid>,
    pub window: TimeWindow,
}

/// The plaintext token is only ever available here, right after creation.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub record: BookingToken,
}

#[derive(Clone)]
pub struct BookingTokenService {
    pool: PgPool,
    ttl: Duration,
}

impl BookingTokenService {
    pub fn new(pool: PgPool, ttl_hours: i64) -> Self {
        Self {
            pool,
            ttl: Duration::hours(ttl_hours.max(1)),
        }
    }

    pub async fn create(&self, new: NewBookingToken) -> Result<IssuedToken> {
        if new.interviewer_ids.is_empty() {
            return Err(Error::BadRequest(
                "A booking link needs at least one interviewer".to_string(),
            ));
        }

        let token = generate_access_token(BOOKING_TOKEN_LENGTH);
        let expires_at = Utc::now() + self.ttl;

        let record = sqlx::query_as::<_, BookingToken>(&format!(
            r#"
            INSERT INTO booking_tokens
                (token_hash, candidate_id, round_id, interviewer_ids, slot_start, slot_end, expires_at, used)
            VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE)
            RETURNING {}
            "#,
            TOKEN_COLUMNS
        ))
        .bind(hash_token(&token))
        .bind(new.candidate_id)
        .bind(new.round_id)
        .bind(&new.interviewer_ids)
        .bind(new.window.start)
        .bind(new.window.end)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;

        info!(
            candidate_id = %new.candidate_id,
            round_id = %new.round_id,
            expires_at = %expires_at,
            "booking token issued"
        );

        Ok(IssuedToken {
            token,
            expires_at,
            record,
        })
    }

    /// Unused and unexpired tokens only. Expired, used and unknown tokens all come back
    /// as `None` so callers cannot tell them apart.
    pub async fn redeem(&self, token: &str) -> Result<Option<BookingToken>> {
        let row = sqlx::query_as::<_, BookingToken>(&format!(
            "SELECT {} FROM booking_tokens WHERE token_hash = $1 AND used = FALSE AND expires_at > NOW()",
            TOKEN_COLUMNS
        ))
        .bind(hash_token(token))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Same filter as `redeem`, but row-locked for the rest of `tx`.
    pub async fn lock_active(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        token: &str,
    ) -> Result<Option<BookingToken>> {
        let row = sqlx::query_as::<_, BookingToken>(&format!(
            "SELECT {} FROM booking_tokens WHERE token_hash = $1 AND used = FALSE AND expires_at > NOW() FOR UPDATE",
            TOKEN_COLUMNS
        ))
        .bind(hash_token(token))
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row)
    }

    /// One-way; returns whether this call flipped the flag.
    pub async fn mark_used(&self, token: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE booking_tokens SET used = TRUE WHERE token_hash = $1 AND used = FALSE")
                .bind(hash_token(token))
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_used_in(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        token_id: Uuid,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE booking_tokens SET used = TRUE WHERE id = $1 AND used = FALSE")
            .bind(token_id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn cleanup_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM booking_tokens WHERE used = TRUE OR expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        let removed = result.rows_affected();
        if removed > 0 {
            info!(removed, "expired booking tokens cleaned up");
        }
        Ok(removed)
    }
}
