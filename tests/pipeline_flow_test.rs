mod common;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use common::{call, eventually, seed_candidate, seed_interviewer, seed_job, setup};
use interview_pipeline::services::mirror_service::row_key;
use serde_json::json;

#[tokio::test]
async fn completed_round_promotes_into_next_round() {
    let Some(app) = setup().await else { return };
    let (job_id, _, rounds) = seed_job(&app.pool, &["Screening", "Technical"]).await;
    let (candidate_id, _) = seed_candidate(&app.pool).await;
    let base = format!("/api/candidates/{}/round/{}", candidate_id, rounds[0]);

    let (status, body) = call(
        &app.router,
        Method::POST,
        &format!("/api/candidates/{}/jobs/{}/enroll", candidate_id, job_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["roundId"], json!(rounds[0]));

    let (status, body) = call(
        &app.router,
        Method::POST,
        &format!("/api/candidates/{}/jobs/{}/enroll", candidate_id, job_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], json!(false));

    let (status, _) = call(
        &app.router,
        Method::POST,
        &format!("{}/status", base),
        Some(json!({ "status": "completed" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app.router, Method::POST, &format!("{}/next", base), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["newStatus"], "accepted");
    assert_eq!(body["movedToRoundId"], json!(rounds[1]));
    assert_eq!(body["movedToRoundName"], "Technical");

    let (status, body) = call(
        &app.router,
        Method::GET,
        &format!("/api/candidates/{}/round/{}", candidate_id, rounds[1]),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "fresh");

    // Accepted is terminal: a second advance changes nothing and creates nothing.
    let (status, body) = call(&app.router, Method::POST, &format!("{}/next", base), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["newStatus"], "accepted");
    assert!(body["movedToRoundId"].is_null());
    assert!(body["movedToRoundName"].is_null());

    let rows: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM candidate_rounds WHERE candidate_id = $1")
            .bind(candidate_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(rows, 2);
}

#[tokio::test]
async fn last_round_acceptance_queues_exactly_one_offer() {
    let Some(app) = setup().await else { return };
    let (job_id, _, rounds) = seed_job(&app.pool, &["Final"]).await;
    let (candidate_id, email) = seed_candidate(&app.pool).await;
    let base = format!("/api/candidates/{}/round/{}", candidate_id, rounds[0]);

    call(
        &app.router,
        Method::POST,
        &format!("/api/candidates/{}/jobs/{}/enroll", candidate_id, job_id),
        None,
    )
    .await;
    call(
        &app.router,
        Method::POST,
        &format!("{}/status", base),
        Some(json!({ "status": "completed" })),
    )
    .await;

    let (status, body) = call(&app.router, Method::POST, &format!("{}/next", base), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["newStatus"], "accepted");
    assert!(body["movedToRoundId"].is_null());
    assert!(body["movedToRoundName"].is_null());

    let offers = || {
        let pool = app.pool.clone();
        let email = email.clone();
        async move {
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM notification_outbox WHERE recipient = $1 AND template = 'final_offer'",
            )
            .bind(email)
            .fetch_one(&pool)
            .await
            .unwrap_or(0)
        }
    };
    assert!(eventually(Duration::from_secs(5), || async { offers().await == 1 }).await);

    call(&app.router, Method::POST, &format!("{}/next", base), None).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(offers().await, 1);
}

#[tokio::test]
async fn ladder_walk_is_mirrored() {
    let Some(app) = setup().await else { return };
    let (job_id, job_name, rounds) = seed_job(&app.pool, &["Screening"]).await;
    let (candidate_id, _) = seed_candidate(&app.pool).await;
    let base = format!("/api/candidates/{}/round/{}", candidate_id, rounds[0]);

    call(
        &app.router,
        Method::POST,
        &format!("/api/candidates/{}/jobs/{}/enroll", candidate_id, job_id),
        None,
    )
    .await;

    for expected in ["in_progress", "scheduled", "completed"] {
        let (status, body) =
            call(&app.router, Method::POST, &format!("{}/next", base), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["newStatus"], expected);
    }

    let key = row_key(candidate_id, rounds[0]);
    let document_id = app.config.sync.document_id.clone();
    let mirrored = eventually(Duration::from_secs(5), || {
        let rows = app.mirror.rows(&document_id, &job_name);
        let key = key.clone();
        async move {
            rows.iter()
                .any(|row| row.key == key && row.status.as_str() == "completed")
        }
    })
    .await;
    assert!(mirrored, "mirror row never reached the final status");

    let (status, _) = call(&app.router, Method::DELETE, &base, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let removed = eventually(Duration::from_secs(5), || {
        let rows = app.mirror.rows(&document_id, &job_name);
        let key = key.clone();
        async move { rows.iter().all(|row| row.key != key) }
    })
    .await;
    assert!(removed, "mirror row survived removal");
}

#[tokio::test]
async fn reject_records_reason_and_unknown_rounds_are_404() {
    let Some(app) = setup().await else { return };
    let (job_id, _, rounds) = seed_job(&app.pool, &["Screening"]).await;
    let (candidate_id, _) = seed_candidate(&app.pool).await;
    let base = format!("/api/candidates/{}/round/{}", candidate_id, rounds[0]);

    let (status, _) = call(&app.router, Method::POST, &format!("{}/next", base), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    call(
        &app.router,
        Method::POST,
        &format!("/api/candidates/{}/jobs/{}/enroll", candidate_id, job_id),
        None,
    )
    .await;

    let (status, body) = call(
        &app.router,
        Method::POST,
        &format!("{}/reject-with-reason", base),
        Some(json!({ "reason": "Position filled" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["newStatus"], "rejected");

    let (_, body) = call(&app.router, Method::GET, &base, None).await;
    assert_eq!(body["rejection_reason"], "Position filled");

    let (status, body) = call(
        &app.router,
        Method::POST,
        &format!("{}/status", base),
        Some(json!({ "status": "fresh" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Invalid status"));
}

#[tokio::test]
async fn assignment_and_evaluation_rules() {
    let Some(app) = setup().await else { return };
    let (job_id, _, rounds) = seed_job(&app.pool, &["Technical"]).await;
    let (candidate_id, _) = seed_candidate(&app.pool).await;
    let interviewer = seed_interviewer(&app.pool).await;
    let outsider = seed_interviewer(&app.pool).await;
    let base = format!("/api/candidates/{}/round/{}", candidate_id, rounds[0]);

    call(
        &app.router,
        Method::POST,
        &format!("/api/candidates/{}/jobs/{}/enroll", candidate_id, job_id),
        None,
    )
    .await;

    let (status, _) = call(
        &app.router,
        Method::POST,
        &format!("{}/assign-interviewers", base),
        Some(json!({ "interviewerIds": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &app.router,
        Method::POST,
        &format!("{}/assign-interviewers", base),
        Some(json!({ "interviewerIds": [interviewer, interviewer] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["newStatus"], "in_progress");

    let (status, _) = call(
        &app.router,
        Method::POST,
        &format!("{}/evaluation", base),
        Some(json!({
            "interviewerId": outsider,
            "scores": [{ "parameter": "design", "score": 4 }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &app.router,
        Method::POST,
        &format!("{}/evaluation", base),
        Some(json!({
            "interviewerId": interviewer,
            "scores": [{ "parameter": "design", "score": 4 }],
            "feedback": "Solid fundamentals"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["feedback"], "Solid fundamentals");
    assert_eq!(body["assigned_interviewers"], json!([interviewer]));
    assert!(body["evaluation_scores"]["by_interviewer"][interviewer.to_string()].is_array());

    let (status, _) = call(
        &app.router,
        Method::POST,
        &format!("{}/reschedule", base),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
