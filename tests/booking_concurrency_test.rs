mod common;

use axum::http::{Method, StatusCode};
use common::{call, seed_candidate, seed_interviewer, seed_job_in, setup, RoundWeek, TestApp};
use interview_pipeline::services::booking_service::SLOT_TAKEN;
use serde_json::json;
use uuid::Uuid;

/// Enrolls a fresh candidate into `round_id` with `interviewer` and returns a booking token.
async fn candidate_with_token(app: &TestApp, job_id: Uuid, round_id: Uuid, interviewer: Uuid) -> String {
    let (candidate_id, _) = seed_candidate(&app.pool).await;
    let (status, _) = call(
        &app.router,
        Method::POST,
        &format!("/api/candidates/{}/jobs/{}/enroll", candidate_id, job_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = call(
        &app.router,
        Method::POST,
        &format!(
            "/api/candidates/{}/round/{}/assign-interviewers",
            candidate_id, round_id
        ),
        Some(json!({ "interviewerIds": [interviewer] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app.router,
        Method::POST,
        "/api/calendar/generate-booking-link",
        Some(json!({ "candidateId": candidate_id, "roundId": round_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_string();
    assert!(body["bookingUrl"].as_str().unwrap().ends_with(&token));
    token
}

#[tokio::test]
async fn concurrent_bookings_of_one_slot_have_a_single_winner() {
    let Some(app) = setup().await else { return };
    let week = RoundWeek::random();
    let (job_id, _, rounds) = seed_job_in(&app.pool, &["Technical"], week).await;
    let interviewer = seed_interviewer(&app.pool).await;

    let mut tokens = Vec::new();
    for _ in 0..5 {
        tokens.push(candidate_with_token(&app, job_id, rounds[0], interviewer).await);
    }

    let (status, body) = call(
        &app.router,
        Method::GET,
        &format!("/api/calendar/available-slots/{}", tokens[0]),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["durationMinutes"], 60);
    let starts: Vec<&str> = body["slots"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["start"].as_str().unwrap())
        .collect();
    assert!(starts.contains(&week.at(1, 10, 0).as_str()));

    let handles: Vec<_> = tokens
        .iter()
        .map(|token| {
            let router = app.router.clone();
            let uri = format!("/api/calendar/book-slot/{}", token);
            tokio::spawn(async move {
                call(
                    &router,
                    Method::POST,
                    &uri,
                    Some(json!({ "start": week.at(1, 10, 0) })),
                )
                .await
            })
        })
        .collect();

    let mut won = 0;
    let mut conflicts = 0;
    for handle in handles {
        let (status, body) = handle.await.unwrap();
        match status {
            StatusCode::OK => {
                won += 1;
                assert_eq!(body["scheduledTime"], week.at(1, 10, 0));
                assert_eq!(body["endTime"], week.at(1, 11, 0));
            }
            StatusCode::CONFLICT => {
                conflicts += 1;
                assert_eq!(body["error"], SLOT_TAKEN);
            }
            other => panic!("unexpected status {}: {}", other, body),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(conflicts, 4);

    let scheduled: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM candidate_rounds cr
           JOIN interview_assignments ia ON ia.candidate_id = cr.candidate_id AND ia.round_id = cr.round_id
           WHERE ia.interviewer_id = $1 AND cr.status = 'scheduled'"#,
    )
    .bind(interviewer)
    .fetch_one(&app.pool)
    .await
    .unwrap();
    assert_eq!(scheduled, 1);
}

#[tokio::test]
async fn overlapping_and_adjacent_bookings() {
    let Some(app) = setup().await else { return };
    let week = RoundWeek::random();
    let (job_id, _, rounds) = seed_job_in(&app.pool, &["Technical"], week).await;
    let interviewer = seed_interviewer(&app.pool).await;

    let first = candidate_with_token(&app, job_id, rounds[0], interviewer).await;
    let second = candidate_with_token(&app, job_id, rounds[0], interviewer).await;

    let (status, _) = call(
        &app.router,
        Method::POST,
        &format!("/api/calendar/book-slot/{}", first),
        Some(json!({ "start": week.at(2, 10, 0) })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app.router,
        Method::POST,
        &format!("/api/calendar/book-slot/{}", second),
        Some(json!({ "start": week.at(2, 10, 30) })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], SLOT_TAKEN);

    let (_, body) = call(
        &app.router,
        Method::GET,
        &format!("/api/calendar/available-slots/{}", second),
        None,
    )
    .await;
    let starts: Vec<&str> = body["slots"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["start"].as_str().unwrap())
        .collect();
    assert!(!starts.contains(&week.at(2, 10, 0).as_str()));
    assert!(!starts.contains(&week.at(2, 10, 30).as_str()));
    assert!(starts.contains(&week.at(2, 11, 0).as_str()));

    let (status, _) = call(
        &app.router,
        Method::POST,
        &format!("/api/calendar/book-slot/{}", second),
        Some(json!({ "start": week.at(2, 11, 0) })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Tokens are single-use.
    let (status, body) = call(
        &app.router,
        Method::POST,
        &format!("/api/calendar/book-slot/{}", first),
        Some(json!({ "start": week.at(3, 10, 0) })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid or expired booking link");
}

#[tokio::test]
async fn slots_outside_business_hours_are_refused() {
    let Some(app) = setup().await else { return };
    let week = RoundWeek::random();
    let (job_id, _, rounds) = seed_job_in(&app.pool, &["Technical"], week).await;
    let interviewer = seed_interviewer(&app.pool).await;
    let token = candidate_with_token(&app, job_id, rounds[0], interviewer).await;

    for start in [
        week.at(1, 13, 0),
        week.at(1, 16, 30),
        week.at(5, 10, 0),
    ] {
        let (status, _) = call(
            &app.router,
            Method::POST,
            &format!("/api/calendar/book-slot/{}", token),
            Some(json!({ "start": start })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{} should be refused", start);
    }

    let (status, body) = call(
        &app.router,
        Method::GET,
        &format!("/api/calendar/available-slots/{}", token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["slots"].as_array().unwrap().is_empty());
}
