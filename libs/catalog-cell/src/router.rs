use axum::{routing::get, Router};

use shared_database::AppState;

use crate::handlers::*;

pub fn catalog_routes(state: AppState) -> Router {
    Router::new()
        .route("/insurers", get(list_insurers))
        .route("/specialties", get(list_specialties))
        .route("/services", get(list_services))
        .with_state(state)
}
