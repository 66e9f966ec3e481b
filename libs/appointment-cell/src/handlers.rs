// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_database::AppState;
use shared_models::error::AppError;

use crate::models::{
    AppointmentListQuery, AvailabilityQuery, CancelAppointmentRequest, Channel,
    CreateAppointmentRequest, StatusChangeRequest, UpdateAppointmentRequest,
};
use crate::services::schedule::{schedule_for, week_of};
use crate::services::{AvailabilityService, BookingService, BookingSessionPatch, SessionError, SessionRegistry};

/// Router state for the appointment cell: the shared app state plus the
/// open booking sessions.
#[derive(Clone)]
pub struct AppointmentState {
    pub app: AppState,
    pub sessions: Arc<SessionRegistry>,
}

impl AppointmentState {
    pub fn new(app: AppState) -> Self {
        Self {
            app,
            sessions: Arc::new(SessionRegistry::new()),
        }
    }

    fn booking(&self) -> BookingService {
        BookingService::from_state(&self.app)
    }

    fn availability(&self) -> AvailabilityService {
        AvailabilityService::new(self.app.store.clone())
    }
}

// ==============================================================================
// PUBLIC CALENDAR & AVAILABILITY
// ==============================================================================

#[axum::debug_handler]
pub async fn get_schedule(
    Path(date): Path<NaiveDate>,
) -> Result<Json<Value>, AppError> {
    Ok(Json(json!(schedule_for(date))))
}

#[axum::debug_handler]
pub async fn get_availability(
    State(state): State<AppointmentState>,
    Path(date): Path<NaiveDate>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Value>, AppError> {
    let slots = state.availability().available_slots(date, query.exclude).await?;

    Ok(Json(json!(slots)))
}

#[axum::debug_handler]
pub async fn get_month_availability(
    State(state): State<AppointmentState>,
    Path((year, month)): Path<(i32, u32)>,
) -> Result<Json<Value>, AppError> {
    let days = state.availability().month(year, month).await?;

    Ok(Json(json!({
        "year": year,
        "month": month,
        "days": days
    })))
}

// ==============================================================================
// BOOKING SESSION HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn start_session(
    State(state): State<AppointmentState>,
) -> Result<Json<Value>, AppError> {
    let session = state.sessions.create().await;
    Ok(Json(json!(session)))
}

#[axum::debug_handler]
pub async fn get_session(
    State(state): State<AppointmentState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let session = state.sessions.get(session_id).await?;
    Ok(Json(json!(session)))
}

#[axum::debug_handler]
pub async fn update_session(
    State(state): State<AppointmentState>,
    Path(session_id): Path<Uuid>,
    Json(patch): Json<BookingSessionPatch>,
) -> Result<Json<Value>, AppError> {
    let session = state.sessions.update(session_id, patch).await?;
    Ok(Json(json!(session)))
}

#[axum::debug_handler]
pub async fn discard_session(
    State(state): State<AppointmentState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    if !state.sessions.discard(session_id).await {
        return Err(SessionError::NotFound.into());
    }

    Ok(Json(json!({
        "success": true,
        "message": "Booking session discarded"
    })))
}

#[axum::debug_handler]
pub async fn advance_session(
    State(state): State<AppointmentState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let session = state.sessions.advance(session_id).await?;
    Ok(Json(json!(session)))
}

#[axum::debug_handler]
pub async fn back_session(
    State(state): State<AppointmentState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let session = state.sessions.back(session_id).await?;
    Ok(Json(json!(session)))
}

#[axum::debug_handler]
pub async fn reset_session(
    State(state): State<AppointmentState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let session = state.sessions.reset(session_id).await?;
    Ok(Json(json!(session)))
}

#[axum::debug_handler]
pub async fn submit_session(
    State(state): State<AppointmentState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.sessions.submit(session_id, &state.booking()).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": format!("Appointment {} confirmed", appointment.code)
    })))
}

// ==============================================================================
// ADMIN APPOINTMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_appointments(
    State(state): State<AppointmentState>,
    Query(query): Query<AppointmentListQuery>,
) -> Result<Json<Value>, AppError> {
    let appointments = state.booking().list(query.date).await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<AppointmentState>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let channel = request.channel.unwrap_or(Channel::Phone);
    let appointment = state.booking().create(&request.draft, channel).await?;

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.booking().get(appointment_id).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn update_appointment(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.booking().update(appointment_id, request).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<Uuid>,
    body: Option<Json<CancelAppointmentRequest>>,
) -> Result<Json<Value>, AppError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let appointment = state.booking().cancel(appointment_id, request.reason).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment cancelled"
    })))
}

#[axum::debug_handler]
pub async fn change_appointment_status(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<StatusChangeRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.booking().change_status(appointment_id, request.status).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn get_week(
    State(state): State<AppointmentState>,
    Path(date): Path<NaiveDate>,
) -> Result<Json<Value>, AppError> {
    let days = state.booking().week(date).await?;
    let total: usize = days.iter().map(|d| d.appointments.len()).sum();

    Ok(Json(json!({
        "week_start": week_of(date).first(),
        "days": days,
        "total": total
    })))
}

#[axum::debug_handler]
pub async fn get_month_calendar(
    State(state): State<AppointmentState>,
    Path((year, month)): Path<(i32, u32)>,
) -> Result<Json<Value>, AppError> {
    let days = state.booking().month(year, month).await?;
    let total: usize = days.iter().map(|d| d.appointments.len()).sum();

    Ok(Json(json!({
        "year": year,
        "month": month,
        "days": days,
        "total": total
    })))
}
