// libs/appointment-cell/src/router.rs
use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_database::AppState;
use shared_utils::extractor::admin_middleware;

use crate::handlers::{self, AppointmentState};

pub fn appointment_routes(state: AppState) -> Router {
    let admin_layer = middleware::from_fn_with_state(state.config.clone(), admin_middleware);
    let state = AppointmentState::new(state);

    // Patient-facing: calendar reads and the booking wizard
    let public_routes = Router::new()
        .route("/schedule/{date}", get(handlers::get_schedule))
        .route("/availability/{date}", get(handlers::get_availability))
        .route("/availability/month/{year}/{month}", get(handlers::get_month_availability))
        .route("/sessions", post(handlers::start_session))
        .route(
            "/sessions/{session_id}",
            get(handlers::get_session)
                .patch(handlers::update_session)
                .delete(handlers::discard_session),
        )
        .route("/sessions/{session_id}/advance", post(handlers::advance_session))
        .route("/sessions/{session_id}/back", post(handlers::back_session))
        .route("/sessions/{session_id}/reset", post(handlers::reset_session))
        .route("/sessions/{session_id}/submit", post(handlers::submit_session));

    // Clinic staff dashboard
    let admin_routes = Router::new()
        .route("/", get(handlers::list_appointments).post(handlers::create_appointment))
        .route("/calendar/week/{date}", get(handlers::get_week))
        .route("/calendar/month/{year}/{month}", get(handlers::get_month_calendar))
        .route(
            "/{appointment_id}",
            get(handlers::get_appointment).put(handlers::update_appointment),
        )
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/{appointment_id}/status", post(handlers::change_appointment_status))
        .layer(admin_layer);

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .with_state(state)
}
