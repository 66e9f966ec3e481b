use axum::{
    extract::{Query, State},
    Json,
};
use serde_json::{json, Value};

use shared_database::AppState;
use shared_models::error::AppError;

use crate::models::{CatalogQuery, InsurerScope};
use crate::services::CatalogService;

#[axum::debug_handler]
pub async fn list_insurers(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let service = CatalogService::new(state.store.clone());
    let insurers = service.list_insurers().await?;
    Ok(Json(json!({ "insurers": insurers })))
}

#[axum::debug_handler]
pub async fn list_specialties(
    State(state): State<AppState>,
    Query(query): Query<CatalogQuery>,
) -> Result<Json<Value>, AppError> {
    let service = CatalogService::new(state.store.clone());
    let scope = InsurerScope::from_params(query.insurer, query.private);

    let specialties = service.list_specialties(scope).await?;
    Ok(Json(json!({ "specialties": specialties })))
}

#[axum::debug_handler]
pub async fn list_services(
    State(state): State<AppState>,
    Query(query): Query<CatalogQuery>,
) -> Result<Json<Value>, AppError> {
    let service = CatalogService::new(state.store.clone());
    let scope = InsurerScope::from_params(query.insurer, query.private);

    let services = service.list_services(query.specialty, scope).await?;
    Ok(Json(json!({ "services": services })))
}
