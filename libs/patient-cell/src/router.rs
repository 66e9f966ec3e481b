use axum::{middleware, routing::get, Router};

use shared_database::AppState;
use shared_utils::extractor::admin_middleware;

use crate::handlers::*;

/// Patient registry lookups for the admin dashboard.
pub fn patient_routes(state: AppState) -> Router {
    Router::new()
        .route("/search", get(search_patients))
        .route("/{document}", get(get_patient))
        .layer(middleware::from_fn_with_state(state.config.clone(), admin_middleware))
        .with_state(state)
}
