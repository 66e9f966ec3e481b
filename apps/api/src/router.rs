use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use appointment_cell::router::appointment_routes;
use auth_cell::router::auth_routes;
use catalog_cell::router::catalog_routes;
use patient_cell::router::patient_routes;
use shared_database::AppState;

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "store_configured": state.config.is_configured()
    }))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic booking API is running!" }))
        .route("/health", get(health))
        .with_state(state.clone())
        .nest("/auth", auth_routes(state.clone()))
        .nest("/catalog", catalog_routes(state.clone()))
        .nest("/patients", patient_routes(state.clone()))
        .nest("/appointments", appointment_routes(state))
}
