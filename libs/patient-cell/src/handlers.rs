use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};

use shared_database::AppState;
use shared_models::error::AppError;

use crate::models::{PatientError, PatientSearchQuery};
use crate::services::PatientService;

#[axum::debug_handler]
pub async fn search_patients(
    State(state): State<AppState>,
    Query(query): Query<PatientSearchQuery>,
) -> Result<Json<Value>, AppError> {
    let service = PatientService::new(state.store.clone());

    let patients = service.search(&query.q).await?;

    Ok(Json(json!({
        "patients": patients,
        "total": patients.len()
    })))
}

#[axum::debug_handler]
pub async fn get_patient(
    State(state): State<AppState>,
    Path(document): Path<String>,
) -> Result<Json<Value>, AppError> {
    let service = PatientService::new(state.store.clone());

    let patient = service
        .get_by_document(&document)
        .await?
        .ok_or(PatientError::NotFound)?;

    Ok(Json(json!(patient)))
}
