#![allow(dead_code)]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Weekday};
use interview_pipeline::{
    config::Config,
    database::pool::create_pool,
    routes,
    services::{calendar_service::OfflineCalendar, mirror_service::InMemoryMirror},
    utils::holidays::is_business_day,
    AppState, Collaborators,
};
use rand::Rng;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

pub struct TestApp {
    pub pool: PgPool,
    pub config: Config,
    pub state: AppState,
    pub router: Router,
    pub mirror: Arc<InMemoryMirror>,
}

/// `None` when no database is configured; callers return early.
pub async fn setup() -> Option<TestApp> {
    dotenvy::dotenv().ok();
    if env::var("DATABASE_URL").is_err() {
        eprintln!("DATABASE_URL not set, skipping database-backed test");
        return None;
    }
    env::set_var("SERVER_ADDRESS", "127.0.0.1:0");
    env::set_var("PUBLIC_RPS", "1000");
    env::set_var("INTEGRATION_RPS", "1000");
    env::set_var("SYNC_DEBOUNCE_MS", "50");
    env::set_var("SYNC_INTER_TASK_DELAY_MS", "10");
    env::set_var("PUBLIC_BASE_URL", "http://localhost:3000");

    let config = Config::from_env().expect("config");
    let pool = create_pool(&config).await.expect("pool");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");

    let mirror = Arc::new(InMemoryMirror::default());
    let collaborators = Collaborators {
        calendar: Arc::new(OfflineCalendar),
        mirror: mirror.clone(),
    };
    let state = AppState::with_collaborators(
        pool.clone(),
        &config,
        reqwest::Client::new(),
        collaborators,
    );
    let router = routes::router(&config).with_state(state.clone());

    Some(TestApp {
        pool,
        config,
        state,
        router,
        mirror,
    })
}

/// Monday to Friday of a week with no holidays. Seeded jobs each get their own week
/// so interviews booked by other tests (or earlier runs) never share its slots.
#[derive(Debug, Clone, Copy)]
pub struct RoundWeek {
    pub monday: NaiveDate,
}

impl RoundWeek {
    pub fn random() -> Self {
        let base = NaiveDate::from_ymd_opt(2040, 1, 2).expect("date");
        assert_eq!(base.weekday(), Weekday::Mon);
        let mut rng = rand::thread_rng();
        loop {
            let monday = base + ChronoDuration::weeks(rng.gen_range(0..2600));
            if (0..5).all(|d| is_business_day(monday + ChronoDuration::days(d))) {
                return Self { monday };
            }
        }
    }

    /// `offset` days after Monday.
    pub fn day(&self, offset: i64) -> NaiveDate {
        self.monday + ChronoDuration::days(offset)
    }

    /// Org-local RFC 3339 instant, as the API renders it.
    pub fn at(&self, offset: i64, hour: u32, minute: u32) -> String {
        format!("{}T{:02}:{:02}:00+09:00", self.day(offset), hour, minute)
    }
}

/// A job whose rounds run over a fresh random week.
pub async fn seed_job(pool: &PgPool, round_names: &[&str]) -> (Uuid, String, Vec<Uuid>) {
    seed_job_in(pool, round_names, RoundWeek::random()).await
}

/// A job whose rounds run Monday to Friday of `week`.
pub async fn seed_job_in(
    pool: &PgPool,
    round_names: &[&str],
    week: RoundWeek,
) -> (Uuid, String, Vec<Uuid>) {
    let job_name = format!("Job {}", Uuid::new_v4());
    let job_id: Uuid = sqlx::query_scalar("INSERT INTO jobs (name) VALUES ($1) RETURNING id")
        .bind(&job_name)
        .fetch_one(pool)
        .await
        .expect("seed job");

    let mut round_ids = Vec::new();
    for (i, name) in round_names.iter().enumerate() {
        let id: Uuid = sqlx::query_scalar(
            r#"INSERT INTO rounds (job_id, name, round_order, duration_minutes, start_date, end_date)
               VALUES ($1, $2, $3, 60, $4, $5) RETURNING id"#,
        )
        .bind(job_id)
        .bind(*name)
        .bind(i as i32 + 1)
        .bind(week.day(0))
        .bind(week.day(4))
        .fetch_one(pool)
        .await
        .expect("seed round");
        round_ids.push(id);
    }
    (job_id, job_name, round_ids)
}

pub async fn seed_candidate(pool: &PgPool) -> (Uuid, String) {
    let id = Uuid::new_v4();
    let email = format!("candidate_{}@example.com", id);
    sqlx::query("INSERT INTO candidates (id, name, email) VALUES ($1, $2, $3)")
        .bind(id)
        .bind("Test Candidate")
        .bind(&email)
        .execute(pool)
        .await
        .expect("seed candidate");
    (id, email)
}

pub async fn seed_interviewer(pool: &PgPool) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO interviewers (id, name, email) VALUES ($1, $2, $3)")
        .bind(id)
        .bind("Test Interviewer")
        .bind(format!("interviewer_{}@example.com", id))
        .execute(pool)
        .await
        .expect("seed interviewer");
    id
}

pub async fn call(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<JsonValue>,
) -> (StatusCode, JsonValue) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(builder.body(body).expect("request"))
        .await
        .expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body");
    let json = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null)
    };
    (status, json)
}

/// Polls `check` until it holds or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
