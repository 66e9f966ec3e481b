// libs/appointment-cell/src/services/booking.rs
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use catalog_cell::{CatalogService, Service, PRIVATE_INSURER_LABEL};
use patient_cell::PatientService;
use shared_database::{AppState, RecordStore, StoreError};
use shared_models::validation::FieldError;

use crate::models::{
    booking_code, Appointment, AppointmentError, AppointmentStatus, BookingDraft, CalendarDay,
    Channel, InsurerChoice, TimeSlot, UpdateAppointmentRequest,
};
use crate::services::availability::is_slot_free;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::repository::AppointmentRepository;
use crate::services::schedule::{clinic_today, month_days, schedule_for, week_of};

pub const DEFAULT_CANCELLATION_REASON: &str = "Cancelled by the clinic";

/// Creates, edits and cancels appointments while keeping at most one
/// active appointment per slot.
///
/// The availability check before a write is advisory. The store's unique
/// constraint on active `(date, time)` pairs is what settles a race, and a
/// rejection from it is reported as [`AppointmentError::SlotConflict`].
pub struct BookingService {
    appointments: AppointmentRepository,
    patients: PatientService,
    catalog: CatalogService,
    lifecycle: AppointmentLifecycleService,
    clinic_offset: FixedOffset,
    pinned_today: Option<NaiveDate>,
}

impl BookingService {
    pub fn new(store: Arc<dyn RecordStore>, clinic_offset: FixedOffset) -> Self {
        Self {
            appointments: AppointmentRepository::new(Arc::clone(&store)),
            patients: PatientService::new(Arc::clone(&store)),
            catalog: CatalogService::new(store),
            lifecycle: AppointmentLifecycleService::new(),
            clinic_offset,
            pinned_today: None,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(Arc::clone(&state.store), state.config.clinic_offset())
    }

    /// Fix the date considered "today" instead of reading the clock.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.pinned_today = Some(today);
        self
    }

    fn today(&self) -> NaiveDate {
        self.pinned_today
            .unwrap_or_else(|| clinic_today(self.clinic_offset))
    }

    /// Book the draft's slot for its patient, registering the patient first
    /// when their document number is new.
    pub async fn create(&self, draft: &BookingDraft, channel: Channel) -> Result<Appointment, AppointmentError> {
        let (date, time, service_id) = required_selections(draft)?;
        info!("Booking {} {} via {:?} for {}", date, time, channel, draft.patient.normalized_document());

        self.validate_slot(date, time)?;
        let service = self.require_service(service_id, draft.insurer).await?;
        let patient = self.patients.ensure_exists(&draft.patient).await?;

        let existing = self.appointments.active_on(date).await?;
        if !is_slot_free(date, time, &existing, None) {
            warn!("Slot {} {} already booked", date, time);
            return Err(AppointmentError::SlotConflict { date, time });
        }

        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            code: booking_code(date, time),
            date,
            time,
            patient_document: patient.document_number.clone(),
            service_id: service.id,
            specialty_id: Some(service.specialty_id),
            insurer_id: draft
                .insurer
                .map_or(service.insurer_id, |choice| choice.insurer_id()),
            channel,
            status: AppointmentStatus::Confirmed,
            active: true,
            cancellation_reason: None,
            cancelled_at: None,
            created_at: Some(now),
            updated_at: Some(now),
            patient_name: None,
            service_name: None,
            insurer_name: None,
        };

        let mut stored = self
            .appointments
            .insert(&appointment)
            .await
            .map_err(|e| write_error(e, date, time))?;

        stored.patient_name = Some(patient.full_name());
        stored.service_name = Some(service.name);
        info!("Appointment {} ({}) booked", stored.id, stored.code);
        Ok(stored)
    }

    /// Cancel an appointment, freeing its slot. Cancelling twice is a no-op.
    pub async fn cancel(&self, id: Uuid, reason: Option<String>) -> Result<Appointment, AppointmentError> {
        debug!("Cancelling appointment: {}", id);

        let current = self.find(id).await?;
        if current.status == AppointmentStatus::Cancelled {
            debug!("Appointment {} already cancelled", id);
            return Ok(current);
        }
        self.lifecycle
            .validate_status_transition(current.status, AppointmentStatus::Cancelled)?;

        let now = Utc::now().to_rfc3339();
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_CANCELLATION_REASON.to_string());

        let patch = json!({
            "status": AppointmentStatus::Cancelled,
            "active": false,
            "cancellation_reason": reason,
            "cancelled_at": now,
            "updated_at": now,
        });

        let cancelled = self
            .appointments
            .patch(id, patch)
            .await?
            .ok_or(AppointmentError::NotFound)?;

        info!("Appointment {} cancelled, slot {} {} released", id, cancelled.date, cancelled.time);
        Ok(cancelled)
    }

    /// Reschedule or edit an appointment. Absent fields keep their value;
    /// catalog references must be re-selected explicitly (id `0` is rejected)
    /// and a new insurer or specialty needs a service picked alongside it.
    pub async fn update(
        &self,
        id: Uuid,
        changes: UpdateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Updating appointment: {}", id);

        let current = self.find(id).await?;
        if !self.lifecycle.is_editable(current.status) {
            warn!("Attempt to edit appointment {} in status {}", id, current.status);
            return Err(AppointmentError::NotEditable(current.status));
        }

        let errors = placeholder_errors(&changes);
        if !errors.is_empty() {
            return Err(AppointmentError::Validation(errors));
        }

        let date = changes.date.unwrap_or(current.date);
        let time = changes.time.unwrap_or(current.time);
        let mut patch = Map::new();

        if date != current.date || time != current.time {
            self.validate_slot(date, time)?;

            let existing = self.appointments.active_on(date).await?;
            if !is_slot_free(date, time, &existing, Some(id)) {
                warn!("Cannot move {} to {} {}: slot taken", id, date, time);
                return Err(AppointmentError::SlotConflict { date, time });
            }

            patch.insert("date".to_string(), json!(date.format("%Y-%m-%d").to_string()));
            patch.insert("time".to_string(), json!(time.to_db_string()));
            patch.insert("code".to_string(), json!(booking_code(date, time)));
        }

        if let Some(service_id) = changes.service_id {
            let insurer = changes
                .insurer
                .unwrap_or(InsurerChoice::from_insurer_id(current.insurer_id));
            let service = self.require_service(service_id, Some(insurer)).await?;
            if changes.specialty_id.is_some_and(|id| id != service.specialty_id) {
                return Err(AppointmentError::field(
                    "specialty_id",
                    "Service does not belong to the selected specialty",
                ));
            }
            patch.insert("service_id".to_string(), json!(service.id));
            patch.insert("specialty_id".to_string(), json!(service.specialty_id));
            patch.insert("insurer_id".to_string(), json!(insurer.insurer_id()));
        } else if changes.insurer.is_some() || changes.specialty_id.is_some() {
            // The stored service was picked for the old insurer and specialty
            return Err(AppointmentError::field("service_id", "Select a service"));
        }
        if let Some(channel) = changes.channel {
            patch.insert("channel_id".to_string(), json!(channel.method_id()));
        }

        if patch.is_empty() {
            debug!("Nothing to update for appointment {}", id);
            return Ok(current);
        }
        patch.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let updated = self
            .appointments
            .patch(id, Value::Object(patch))
            .await
            .map_err(|e| write_error(e, date, time))?
            .ok_or(AppointmentError::NotFound)?;

        info!("Appointment {} updated successfully", id);
        Ok(updated)
    }

    pub async fn change_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Appointment, AppointmentError> {
        if status == AppointmentStatus::Cancelled {
            return self.cancel(id, None).await;
        }

        let current = self.find(id).await?;
        self.lifecycle.validate_status_transition(current.status, status)?;

        let patch = json!({
            "status": status,
            "updated_at": Utc::now().to_rfc3339(),
        });
        let updated = self
            .appointments
            .patch(id, patch)
            .await?
            .ok_or(AppointmentError::NotFound)?;

        info!("Appointment {} moved from {} to {}", id, current.status, status);
        Ok(updated)
    }

    pub async fn get(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        let mut appointments = vec![self.find(id).await?];
        self.attach_labels(&mut appointments).await?;
        appointments.pop().ok_or(AppointmentError::NotFound)
    }

    /// Active appointments, optionally for one date, ordered by slot.
    pub async fn list(&self, date: Option<NaiveDate>) -> Result<Vec<Appointment>, AppointmentError> {
        let mut appointments = self.appointments.active(date).await?;
        self.attach_labels(&mut appointments).await?;
        Ok(appointments)
    }

    /// The Monday-to-Sunday week around `date` with its active appointments.
    pub async fn week(&self, date: NaiveDate) -> Result<Vec<CalendarDay>, AppointmentError> {
        self.calendar(week_of(date)).await
    }

    /// Every day of a calendar month with its active appointments.
    pub async fn month(&self, year: i32, month: u32) -> Result<Vec<CalendarDay>, AppointmentError> {
        let days = month_days(year, month)
            .ok_or_else(|| AppointmentError::field("month", "Invalid year or month"))?;
        self.calendar(days).await
    }

    async fn calendar(&self, days: Vec<NaiveDate>) -> Result<Vec<CalendarDay>, AppointmentError> {
        let mut appointments = self.appointments.active_on_dates(&days).await?;
        self.attach_labels(&mut appointments).await?;

        Ok(days
            .into_iter()
            .map(|day| CalendarDay {
                date: day,
                is_open: schedule_for(day).is_open,
                appointments: appointments.iter().filter(|a| a.date == day).cloned().collect(),
            })
            .collect())
    }

    async fn find(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        self.appointments
            .find(id)
            .await?
            .ok_or(AppointmentError::NotFound)
    }

    /// A slot may be booked if it is in the day's template and not in the past.
    fn validate_slot(&self, date: NaiveDate, time: TimeSlot) -> Result<(), AppointmentError> {
        if date < self.today() {
            return Err(AppointmentError::field("date", "Date is in the past"));
        }

        let schedule = schedule_for(date);
        if !schedule.is_open {
            return Err(AppointmentError::field("date", "The clinic is closed on this day"));
        }
        if !schedule.slots.contains(&time) {
            return Err(AppointmentError::field("time", "Outside opening hours"));
        }
        Ok(())
    }

    async fn require_service(
        &self,
        service_id: i64,
        insurer: Option<InsurerChoice>,
    ) -> Result<Service, AppointmentError> {
        let service = self
            .catalog
            .get_service(service_id)
            .await?
            .ok_or_else(|| AppointmentError::field("service_id", "Unknown service"))?;

        if let Some(choice) = insurer {
            if !service.is_offered_under(choice.scope()) {
                return Err(AppointmentError::field(
                    "service_id",
                    "Service is not available for the selected insurer",
                ));
            }
        }
        Ok(service)
    }

    /// Fill in patient, service and insurer names for display.
    async fn attach_labels(&self, appointments: &mut [Appointment]) -> Result<(), AppointmentError> {
        if appointments.is_empty() {
            return Ok(());
        }

        let documents: Vec<String> = appointments
            .iter()
            .map(|a| a.patient_document.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let service_ids: Vec<i64> = appointments
            .iter()
            .map(|a| a.service_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let insurer_ids: Vec<i64> = appointments
            .iter()
            .filter_map(|a| a.insurer_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let patients: HashMap<String, String> = self
            .patients
            .find_many(&documents)
            .await?
            .into_iter()
            .map(|p| (p.document_number.clone(), p.full_name()))
            .collect();
        let services: HashMap<i64, String> = self
            .catalog
            .services_by_ids(&service_ids)
            .await?
            .into_iter()
            .map(|s| (s.id, s.name))
            .collect();
        let insurers: HashMap<i64, String> = self
            .catalog
            .insurers_by_ids(&insurer_ids)
            .await?
            .into_iter()
            .map(|i| (i.id, i.name))
            .collect();

        for appointment in appointments.iter_mut() {
            appointment.patient_name = patients.get(&appointment.patient_document).cloned();
            appointment.service_name = services.get(&appointment.service_id).cloned();
            appointment.insurer_name = match appointment.insurer_id {
                Some(id) => insurers.get(&id).cloned(),
                None => Some(PRIVATE_INSURER_LABEL.to_string()),
            };
        }
        Ok(())
    }
}

fn required_selections(draft: &BookingDraft) -> Result<(NaiveDate, TimeSlot, i64), AppointmentError> {
    let mut errors = Vec::new();

    if draft.service_id.filter(|id| *id > 0).is_none() {
        errors.push(FieldError::new("service_id", "Select a service"));
    }
    if draft.date.is_none() {
        errors.push(FieldError::new("date", "Select a date"));
    }
    if draft.time.is_none() {
        errors.push(FieldError::new("time", "Select a time"));
    }
    if draft.patient.document_number.trim().is_empty() {
        errors.push(FieldError::new("document_number", "Required field"));
    }

    match (draft.date, draft.time, draft.service_id) {
        (Some(date), Some(time), Some(service_id)) if errors.is_empty() => Ok((date, time, service_id)),
        _ => Err(AppointmentError::Validation(errors)),
    }
}

fn placeholder_errors(changes: &UpdateAppointmentRequest) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if changes.service_id.is_some_and(|id| id <= 0) {
        errors.push(FieldError::new("service_id", "Select a service"));
    }
    if changes.specialty_id.is_some_and(|id| id <= 0) {
        errors.push(FieldError::new("specialty_id", "Select a specialty"));
    }
    if matches!(changes.insurer, Some(InsurerChoice::Insurer(id)) if id <= 0) {
        errors.push(FieldError::new("insurer", "Select an insurer"));
    }
    errors
}

fn write_error(err: StoreError, date: NaiveDate, time: TimeSlot) -> AppointmentError {
    if err.is_unique_violation() {
        warn!("Store rejected a second booking for {} {}", date, time);
        AppointmentError::SlotConflict { date, time }
    } else {
        error!("Failed to write appointment for {} {}: {}", date, time, err);
        AppointmentError::from(err)
    }
}
