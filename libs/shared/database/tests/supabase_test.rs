use assert_matches::assert_matches;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_config::AppConfig;
use shared_database::{Filter, RecordStore, StoreError, SupabaseRecordStore};

fn config_for(server: &MockServer) -> AppConfig {
    AppConfig {
        supabase_url: server.uri(),
        supabase_anon_key: "test-anon-key".to_string(),
        supabase_jwt_secret: "secret".to_string(),
        ..AppConfig::default()
    }
}

#[tokio::test]
async fn query_translates_filters_to_postgrest() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("date", "eq.2024-06-10"))
        .and(query_param("status", "neq.cancelled"))
        .and(header("apikey", "test-anon-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "a", "date": "2024-06-10", "time": "09:00:00" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let store = SupabaseRecordStore::new(&config_for(&server));
    let rows = store
        .query(
            "appointments",
            &[Filter::eq("date", "2024-06-10"), Filter::neq("status", "cancelled")],
        )
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["time"], "09:00:00");
}

#[tokio::test]
async fn insert_requests_representation() {
    let server = MockServer::start().await;
    let row = json!({ "document_number": "12345678A", "first_name": "Ana" });

    Mock::given(method("POST"))
        .and(path("/rest/v1/patients"))
        .and(header("Prefer", "return=representation"))
        .and(body_json(row.clone()))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([row.clone()])))
        .mount(&server)
        .await;

    let store = SupabaseRecordStore::new(&config_for(&server));
    let inserted = store.insert("patients", row.clone()).await.unwrap();
    assert_eq!(inserted, row);
}

#[tokio::test]
async fn duplicate_key_maps_to_unique_violation() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint \"appointments_active_slot\""
        })))
        .mount(&server)
        .await;

    let store = SupabaseRecordStore::new(&config_for(&server));
    let err = store
        .insert("appointments", json!({ "date": "2024-06-10", "time": "09:00:00" }))
        .await
        .unwrap_err();

    assert_matches!(err, StoreError::UniqueViolation(_));
}

#[tokio::test]
async fn server_failure_maps_to_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let store = SupabaseRecordStore::new(&config_for(&server));
    let err = store
        .update("appointments", &[Filter::eq("id", "a")], json!({ "status": "cancelled" }))
        .await
        .unwrap_err();

    assert_matches!(err, StoreError::Unavailable(_));
}

#[tokio::test]
async fn unreachable_store_is_unavailable() {
    let config = AppConfig {
        supabase_url: "http://127.0.0.1:9".to_string(),
        supabase_anon_key: "key".to_string(),
        store_timeout_secs: 1,
        ..AppConfig::default()
    };

    let store = SupabaseRecordStore::new(&config);
    let err = store.query("insurers", &[]).await.unwrap_err();
    assert_matches!(err, StoreError::Unavailable(_));
}
