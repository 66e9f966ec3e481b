use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Datelike, Days, NaiveDate, Utc, Weekday};
use serde_json::{json, Value};
use tower::ServiceExt;

use appointment_cell::router::appointment_routes;
use appointment_cell::services::active_slot_constraint;
use shared_database::{InMemoryRecordStore, UniqueConstraint};
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

fn clinic_store() -> Arc<InMemoryRecordStore> {
    let store = InMemoryRecordStore::new()
        .with_constraint(active_slot_constraint())
        .with_constraint(UniqueConstraint::new("patients", &["document_number"]));
    store.seed("insurers", vec![json!({ "id": 1, "name": "Sanitas" })]);
    store.seed("specialties", vec![json!({ "id": 1, "name": "Traumatología" })]);
    store.seed(
        "services",
        vec![json!({ "id": 10, "name": "Primera visita", "price": 60.0, "specialty_id": 1, "insurer_id": null })],
    );
    Arc::new(store)
}

/// A Monday at least a week ahead, so bookings never land in the past.
fn upcoming_monday() -> NaiveDate {
    let mut day = Utc::now().date_naive() + Days::new(7);
    while day.weekday() != Weekday::Mon {
        day = day + Days::new(1);
    }
    day
}

fn app(config: &TestConfig) -> Router {
    appointment_routes(config.to_state(clinic_store()))
}

fn admin_token(config: &TestConfig) -> String {
    JwtTestUtils::create_test_token(&TestUser::admin("desk@clinic.es"), &config.jwt_secret, None)
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri).method(method);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn patient_json(document: &str) -> Value {
    json!({
        "first_name": "Marta",
        "last_name": "Gil",
        "document_type": "NIF",
        "document_number": document,
        "phone": "600111222",
        "email": "marta@example.com",
        "address": "Calle Sol 3"
    })
}

fn booking_json(date: NaiveDate, time: &str, document: &str) -> Value {
    json!({
        "insurer": "private",
        "specialty_id": 1,
        "service_id": 10,
        "date": date.to_string(),
        "time": time,
        "patient": patient_json(document)
    })
}

#[tokio::test]
async fn schedule_is_public_and_closed_on_saturday() {
    let config = TestConfig::default();
    let response = app(&config)
        .oneshot(request("GET", "/schedule/2024-06-08", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["is_open"], false);
    assert_eq!(body["slots"], json!([]));
}

#[tokio::test]
async fn friday_schedule_lists_sixteen_slots() {
    let config = TestConfig::default();
    let response = app(&config)
        .oneshot(request("GET", "/schedule/2024-06-07", None, None))
        .await
        .unwrap();

    let body = body_json(response).await;
    let slots = body["slots"].as_array().unwrap();
    assert_eq!(slots.len(), 16);
    assert_eq!(slots[0], "09:00");
    assert_eq!(slots[15], "19:30");
}

#[tokio::test]
async fn invalid_month_is_rejected() {
    let config = TestConfig::default();
    let response = app(&config)
        .oneshot(request("GET", "/availability/month/2024/13", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn admin_booking_takes_the_slot_off_availability() {
    let config = TestConfig::default();
    let app = app(&config);
    let token = admin_token(&config);
    let monday = upcoming_monday();

    let response = app
        .clone()
        .oneshot(request("POST", "/", Some(&token), Some(booking_json(monday, "09:00", "12345678Z"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created = body_json(response).await;
    assert_eq!(created["channel"], "Phone");
    assert_eq!(created["status"], "confirmed");

    let response = app
        .clone()
        .oneshot(request("GET", &format!("/availability/{}", monday), None, None))
        .await
        .unwrap();
    let slots = body_json(response).await;
    let morning = slots["morning"].as_array().unwrap();
    assert_eq!(morning.len(), 9);
    assert!(!morning.contains(&json!("09:00")));

    // Rescheduling views may ask to see the appointment's own slot as free
    let uri = format!("/availability/{}?exclude={}", monday, created["id"].as_str().unwrap());
    let response = app.oneshot(request("GET", &uri, None, None)).await.unwrap();
    let slots = body_json(response).await;
    assert!(slots["morning"].as_array().unwrap().contains(&json!("09:00")));
}

#[tokio::test]
async fn double_booking_returns_conflict() {
    let config = TestConfig::default();
    let app = app(&config);
    let token = admin_token(&config);
    let monday = upcoming_monday();

    let first = app
        .clone()
        .oneshot(request("POST", "/", Some(&token), Some(booking_json(monday, "10:00", "12345678Z"))))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(request("POST", "/", Some(&token), Some(booking_json(monday, "10:00", "87654321X"))))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn admin_routes_require_an_admin() {
    let config = TestConfig::default();

    let response = app(&config).oneshot(request("GET", "/", None, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let staff = JwtTestUtils::create_test_token(&TestUser::staff("nurse@clinic.es"), &config.jwt_secret, None);
    let response = app(&config).oneshot(request("GET", "/", Some(&staff), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn reschedule_cancel_and_list() {
    let config = TestConfig::default();
    let app = app(&config);
    let token = admin_token(&config);
    let monday = upcoming_monday();

    let created = body_json(
        app.clone()
            .oneshot(request("POST", "/", Some(&token), Some(booking_json(monday, "16:00", "12345678Z"))))
            .await
            .unwrap(),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(request("PUT", &format!("/{}", id), Some(&token), Some(json!({ "time": "16:30" }))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["time"], "16:30");

    let response = app
        .clone()
        .oneshot(request("GET", &format!("/?date={}", monday), Some(&token), None))
        .await
        .unwrap();
    let listed = body_json(response).await;
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["appointments"][0]["patient_name"], "Marta Gil");

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/{}/cancel", id),
            Some(&token),
            Some(json!({ "reason": "Patient request" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["appointment"]["status"], "cancelled");

    let response = app
        .oneshot(request("GET", &format!("/calendar/week/{}", monday), Some(&token), None))
        .await
        .unwrap();
    let week = body_json(response).await;
    assert_eq!(week["days"].as_array().unwrap().len(), 7);
    assert_eq!(week["total"], 0);
}

#[tokio::test]
async fn unknown_appointment_is_not_found() {
    let config = TestConfig::default();
    let token = admin_token(&config);
    let uri = format!("/{}", uuid::Uuid::new_v4());

    let response = app(&config).oneshot(request("GET", &uri, Some(&token), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn booking_session_walkthrough() {
    let config = TestConfig::default();
    let app = app(&config);
    let monday = upcoming_monday();

    let session = body_json(app.clone().oneshot(request("POST", "/sessions", None, None)).await.unwrap()).await;
    let id = session["id"].as_str().unwrap().to_string();
    assert_eq!(session["step"], "service");

    // Step one is still empty
    let response = app
        .clone()
        .oneshot(request("POST", &format!("/sessions/{}/advance", id), None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let patch = json!({ "insurer": "private", "specialty_id": 1, "service_id": 10 });
    let response = app
        .clone()
        .oneshot(request("PATCH", &format!("/sessions/{}", id), None, Some(patch)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let advanced = body_json(
        app.clone()
            .oneshot(request("POST", &format!("/sessions/{}/advance", id), None, None))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(advanced["step"], "slot");

    let patch = json!({
        "date": monday.to_string(),
        "time": "12:30",
        "patient": patient_json("12345678Z"),
        "consents": { "adult": true, "appointment_rules": true, "privacy": true, "terms": true }
    });
    app.clone()
        .oneshot(request("PATCH", &format!("/sessions/{}", id), None, Some(patch)))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(request("POST", &format!("/sessions/{}/submit", id), None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let submitted = body_json(response).await;
    assert_eq!(submitted["appointment"]["channel"], "Web");
    assert_eq!(submitted["appointment"]["time"], "12:30");

    let response = app
        .oneshot(request("GET", &format!("/sessions/{}", id), None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn discarding_a_session_twice_is_not_found() {
    let config = TestConfig::default();
    let app = app(&config);

    let session = body_json(app.clone().oneshot(request("POST", "/sessions", None, None)).await.unwrap()).await;
    let uri = format!("/sessions/{}", session["id"].as_str().unwrap());

    let response = app.clone().oneshot(request("DELETE", &uri, None, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(request("DELETE", &uri, None, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_without_a_body_uses_the_default_reason() {
    let config = TestConfig::default();
    let app = app(&config);
    let token = admin_token(&config);
    let monday = upcoming_monday();

    let created = body_json(
        app.clone()
            .oneshot(request("POST", "/", Some(&token), Some(booking_json(monday, "11:00", "12345678Z"))))
            .await
            .unwrap(),
    )
    .await;
    let uri = format!("/{}/cancel", created["id"].as_str().unwrap());

    let response = app.clone().oneshot(request("POST", &uri, Some(&token), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first = body_json(response).await;
    assert_eq!(first["appointment"]["status"], "cancelled");
    assert_eq!(first["appointment"]["cancellation_reason"], "Cancelled by the clinic");

    // A second cancel leaves the first one's record alone
    let response = app.oneshot(request("POST", &uri, Some(&token), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let second = body_json(response).await;
    assert_eq!(second["appointment"]["status"], "cancelled");
    assert_eq!(second["appointment"]["cancelled_at"], first["appointment"]["cancelled_at"]);
}

#[tokio::test]
async fn month_calendar_lists_every_day_with_its_bookings() {
    let config = TestConfig::default();
    let app = app(&config);
    let token = admin_token(&config);
    let monday = upcoming_monday();

    app.clone()
        .oneshot(request("POST", "/", Some(&token), Some(booking_json(monday, "09:30", "12345678Z"))))
        .await
        .unwrap();

    let uri = format!("/calendar/month/{}/{}", monday.year(), monday.month());
    let response = app.clone().oneshot(request("GET", &uri, Some(&token), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let calendar = body_json(response).await;
    assert_eq!(calendar["total"], 1);

    let days = calendar["days"].as_array().unwrap();
    assert!(days.len() >= 28);
    let booked = days
        .iter()
        .find(|day| day["date"] == monday.to_string())
        .unwrap();
    assert_eq!(booked["appointments"][0]["time"], "09:30");

    let response = app
        .oneshot(request("GET", "/calendar/month/2024/13", Some(&token), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
