use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{FixedOffset, NaiveDate};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::models::{AppointmentError, BookingDraft, Channel, InsurerChoice, TimeSlot};
use appointment_cell::services::BookingService;
use patient_cell::{DocumentType, PatientData};
use shared_database::SupabaseRecordStore;
use shared_utils::test_utils::TestConfig;

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
}

fn draft() -> BookingDraft {
    BookingDraft {
        insurer: Some(InsurerChoice::Private),
        specialty_id: Some(1),
        service_id: Some(10),
        date: Some(monday()),
        time: Some("09:00".parse::<TimeSlot>().unwrap()),
        patient: PatientData {
            first_name: "Ana".to_string(),
            last_name: "López".to_string(),
            document_type: DocumentType::Nif,
            document_number: "12345678Z".to_string(),
            ..PatientData::default()
        },
    }
}

async fn supabase_booking(mock_server: &MockServer) -> BookingService {
    let config = TestConfig {
        supabase_url: mock_server.uri(),
        ..TestConfig::default()
    };
    let store = Arc::new(SupabaseRecordStore::new(&config.to_app_config()));
    BookingService::new(store, FixedOffset::east_opt(3600).unwrap())
        .with_today(NaiveDate::from_ymd_opt(2024, 6, 3).unwrap())
}

async fn mount_catalog_and_patient(mock_server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/services"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 10, "name": "Primera visita", "price": 60.0, "specialty_id": 1, "insurer_id": null }
        ])))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "document_number": "12345678Z", "document_type": "NIF", "first_name": "Ana", "last_name": "López" }
        ])))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn occupancy_check_asks_for_non_cancelled_rows_of_the_day() {
    let mock_server = MockServer::start().await;
    mount_catalog_and_patient(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("date", "eq.2024-06-10"))
        .and(query_param("status", "neq.cancelled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "6f1c2a52-7d8e-4a0b-9c3d-2e1f0a9b8c7d",
            "code": "CLF-1006240900",
            "date": "2024-06-10",
            "time": "09:00:00",
            "patient_document": "87654321X",
            "service_id": 10,
            "channel_id": 4,
            "status": "confirmed",
            "active": true
        }])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let err = supabase_booking(&mock_server).await.create(&draft(), Channel::Web).await.unwrap_err();
    assert_matches!(err, AppointmentError::SlotConflict { .. });
}

#[tokio::test]
async fn unique_index_rejection_is_a_slot_conflict() {
    let mock_server = MockServer::start().await;
    mount_catalog_and_patient(&mock_server).await;

    // The slot looked free, but another booking won the race to the index
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .and(header("Prefer", "return=representation"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint \"appointments_active_slot\""
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let err = supabase_booking(&mock_server).await.create(&draft(), Channel::Web).await.unwrap_err();
    assert_matches!(err, AppointmentError::SlotConflict { date, .. } if date == monday());
}

#[tokio::test]
async fn server_errors_surface_as_store_unavailable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
        .mount(&mock_server)
        .await;

    let err = supabase_booking(&mock_server).await.create(&draft(), Channel::Web).await.unwrap_err();
    assert_matches!(err, AppointmentError::StoreUnavailable(_));
}
