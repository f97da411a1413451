mod common;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{Request, StatusCode},
    Json,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use agenda_cell::handlers::*;
use agenda_cell::models::{
    CancelSlotRequest, CancellationKind, EnqueueWaitlistRequest, EventRequest, MonthGoalRequest,
};
use agenda_cell::{agenda_routes, SchedulingError, SlotKey};
use shared_models::error::AppError;

use common::*;

fn slot_path(h: &Harness, raw: &str) -> Path<(Uuid, i32, u32, String)> {
    Path((h.professional_id, 2025, 5, raw.to_string()))
}

#[tokio::test]
async fn initialize_and_get_month() {
    let h = Harness::new().await;

    let Json(body) = initialize_month(State(h.state.clone()), Path((h.professional_id, 2025, 5)))
        .await
        .unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["slot_count"], 44);

    let Json(body) = get_month(State(h.state.clone()), Path((h.professional_id, 2025, 5)))
        .await
        .unwrap();
    assert_eq!(body["agenda"]["slots"]["05_0900"]["status"], "available");
    assert_eq!(body["agenda"]["slots"]["05_0900"]["time"], "09:00");
}

#[tokio::test]
async fn invalid_month_is_a_validation_error() {
    let h = Harness::new().await;
    let result = initialize_month(State(h.state.clone()), Path((h.professional_id, 2025, 13))).await;
    assert!(matches!(result, Err(AppError::ValidationError(_))));
}

#[tokio::test]
async fn malformed_slot_key_is_rejected() {
    let h = Harness::new().await;
    h.initialize(2025, 5).await;

    let result = reopen_slot(State(h.state.clone()), slot_path(&h, "5_900")).await;
    assert!(matches!(result, Err(AppError::ValidationError(_))));
}

#[tokio::test]
async fn book_then_double_book_maps_to_conflict() {
    let h = Harness::new().await;
    h.initialize(2025, 5).await;
    let ana = h.patient("Ana Souza").await;

    let Json(body) = book_slot(State(h.state.clone()), slot_path(&h, "05_0900"), Json(book_existing(ana.id)))
        .await
        .unwrap();
    assert_eq!(body["transition"]["slot"]["status"], "booked");
    assert_eq!(body["transition"]["patient_sync"]["outcome"], "applied");
    assert!(body["warning"].is_null());

    let result = book_slot(State(h.state.clone()), slot_path(&h, "05_0900"), Json(book_existing(ana.id))).await;
    let err = result.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn partial_failure_is_reported_as_warning() {
    let h = Harness::new().await;
    h.initialize(2025, 5).await;
    let ana = h.patient("Ana Souza").await;
    book_slot(State(h.state.clone()), slot_path(&h, "05_0900"), Json(book_existing(ana.id)))
        .await
        .unwrap();

    h.directory.set_read_only(true);
    let Json(body) = cancel_slot(
        State(h.state.clone()),
        slot_path(&h, "05_0900"),
        Json(CancelSlotRequest { reason: "No show".to_string(), kind: CancellationKind::NoShow }),
    )
    .await
    .unwrap();

    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Absence");
    assert_eq!(body["transition"]["slot"]["status"], "cancelled");
    assert_eq!(body["transition"]["patient_sync"]["outcome"], "failed");
    assert!(body["warning"].as_str().unwrap().contains("patient record"));
}

#[tokio::test]
async fn missing_template_maps_to_not_found() {
    let h = Harness::new().await;
    let result = get_settings(State(h.state.clone()), Path(Uuid::new_v4())).await;
    assert_eq!(result.unwrap_err().status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn month_goal_round_trip() {
    let h = Harness::new().await;
    h.initialize(2025, 5).await;

    let Json(body) = set_month_goal(
        State(h.state.clone()),
        Path((h.professional_id, 2025, 5)),
        Json(MonthGoalRequest { goal: Some("Fill Fridays".to_string()) }),
    )
    .await
    .unwrap();
    assert_eq!(body["month_goal"], "Fill Fridays");
}

#[tokio::test]
async fn event_conflicts_and_waitlist_via_handlers() {
    let h = Harness::new().await;
    h.initialize(2025, 5).await;
    let ana = h.patient("Ana Souza").await;
    book_slot(State(h.state.clone()), slot_path(&h, "29_0900"), Json(book_existing(ana.id)))
        .await
        .unwrap();

    let Json(body) = create_event(
        State(h.state.clone()),
        Path(h.professional_id),
        Json(EventRequest {
            title: "Congress".to_string(),
            start_date: date(2025, 5, 28),
            end_date: date(2025, 5, 30),
        }),
    )
    .await
    .unwrap();
    assert_eq!(body["has_conflicts"], true);
    assert_eq!(body["application"]["blocked_slots"], 5);

    let Json(body) = detect_conflicts(
        State(h.state.clone()),
        Path(h.professional_id),
        Query(ConflictQuery { start: date(2025, 5, 28), end: date(2025, 5, 30) }),
    )
    .await
    .unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(body["conflicts"][0]["slot_key"], "29_0900");
    assert_eq!(body["conflicts"][0]["patient_name"], "Ana Souza");

    let Json(body) = enqueue_waitlist(
        State(h.state.clone()),
        Path(h.professional_id),
        Json(EnqueueWaitlistRequest {
            patient_id: None,
            patient_name: "Bruno Lima".to_string(),
            phone: Some("555-0102".to_string()),
            notes: None,
        }),
    )
    .await
    .unwrap();
    let entry_id: Uuid = serde_json::from_value(body["entry"]["id"].clone()).unwrap();

    let Json(body) = list_waitlist(State(h.state.clone()), Path(h.professional_id)).await.unwrap();
    assert_eq!(body["total"], 1);

    remove_waitlist_entry(State(h.state.clone()), Path((h.professional_id, entry_id)))
        .await
        .unwrap();
    let result = remove_waitlist_entry(State(h.state.clone()), Path((h.professional_id, entry_id))).await;
    assert_eq!(result.unwrap_err().status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn audit_handler_returns_report() {
    let h = Harness::new().await;
    h.patient("Ana Souza").await;

    let Json(body) = run_audit(State(h.state.clone()), Path(h.professional_id)).await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["report"]["patients_scanned"], 1);
}

#[test]
fn error_mapping_covers_every_category() {
    let key = SlotKey::parse("05_0900").unwrap();
    let cases = vec![
        (SchedulingError::Validation("x".into()), StatusCode::BAD_REQUEST),
        (SchedulingError::MonthNotInitialized("2025_05".into()), StatusCode::NOT_FOUND),
        (SchedulingError::SlotNotFound(key.clone()), StatusCode::NOT_FOUND),
        (SchedulingError::SlotAlreadyExists(key.clone()), StatusCode::CONFLICT),
        (
            SchedulingError::StaleSlot { key, expected: "available".into(), actual: "booked".into() },
            StatusCode::CONFLICT,
        ),
        (SchedulingError::Storage("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        (SchedulingError::Directory("denied".into()), StatusCode::BAD_GATEWAY),
    ];
    for (error, status) in cases {
        assert_eq!(map_error(error).status_code(), status);
    }
}

#[tokio::test]
async fn router_serves_nested_routes() {
    let h = Harness::new().await;
    let app = agenda_routes(h.state.clone());

    let request = Request::builder()
        .method("POST")
        .uri(format!("/professionals/{}/months/2025/5/initialize", h.professional_id))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::builder()
        .method("POST")
        .uri(format!("/professionals/{}/months/2025/5/slots/05_0900/block", h.professional_id))
        .header("content-type", "application/json")
        .body(Body::from(json!({ "reason": "Supervision" }).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["transition"]["slot"]["status"], "blocked");
    assert_eq!(body["transition"]["slot"]["price"], 0.0);

    let request = Request::builder()
        .method("GET")
        .uri(format!("/professionals/{}/months/2025/6", h.professional_id))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
