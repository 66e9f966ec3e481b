// libs/appointment-cell/src/services/session.rs
use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use patient_cell::services::validation::{normalize_phone, validate_consents, validate_personal_data};
use patient_cell::{Consents, PatientDataPatch};
use shared_models::error::AppError;
use shared_models::validation::{describe, FieldError};

use crate::models::{Appointment, AppointmentError, BookingDraft, Channel, InsurerChoice, TimeSlot};
use crate::services::booking::BookingService;

const DEFAULT_IDLE_TTL_MINUTES: i64 = 120;

/// Wizard steps, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStep {
    Service,
    Slot,
    Confirmation,
}

impl BookingStep {
    pub const ALL: [BookingStep; 3] = [BookingStep::Service, BookingStep::Slot, BookingStep::Confirmation];

    pub fn number(&self) -> u8 {
        match self {
            BookingStep::Service => 1,
            BookingStep::Slot => 2,
            BookingStep::Confirmation => 3,
        }
    }

    pub fn next(&self) -> Option<Self> {
        match self {
            BookingStep::Service => Some(BookingStep::Slot),
            BookingStep::Slot => Some(BookingStep::Confirmation),
            BookingStep::Confirmation => None,
        }
    }

    pub fn previous(&self) -> Option<Self> {
        match self {
            BookingStep::Service => None,
            BookingStep::Slot => Some(BookingStep::Service),
            BookingStep::Confirmation => Some(BookingStep::Slot),
        }
    }
}

/// Field-wise changes to a session. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingSessionPatch {
    pub insurer: Option<InsurerChoice>,
    pub specialty_id: Option<i64>,
    pub service_id: Option<i64>,
    pub date: Option<NaiveDate>,
    pub time: Option<TimeSlot>,
    pub patient: Option<PatientDataPatch>,
    pub consents: Option<Consents>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("Booking session not found")]
    NotFound,

    #[error("Step {} is incomplete: {}", .step.number(), describe(.errors))]
    Incomplete {
        step: BookingStep,
        errors: Vec<FieldError>,
    },

    #[error("Already at the last step")]
    NoNextStep,

    #[error("Already at the first step")]
    NoPreviousStep,

    #[error(transparent)]
    Booking(#[from] AppointmentError),
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound => AppError::NotFound(err.to_string()),
            SessionError::Incomplete { errors, .. } => AppError::InvalidFields(errors),
            SessionError::NoNextStep | SessionError::NoPreviousStep => AppError::BadRequest(err.to_string()),
            SessionError::Booking(inner) => AppError::from(inner),
        }
    }
}

/// One patient's progress through the booking wizard.
#[derive(Debug, Clone, Serialize)]
pub struct BookingSession {
    pub id: Uuid,
    pub step: BookingStep,
    pub draft: BookingDraft,
    pub consents: Consents,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for BookingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingSession {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            step: BookingStep::Service,
            draft: BookingDraft::default(),
            consents: Consents::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge `patch` into the session. Picking a new date drops the chosen
    /// time unless the same patch sets one.
    pub fn update(&mut self, patch: BookingSessionPatch) {
        if let Some(insurer) = patch.insurer {
            self.draft.insurer = Some(insurer);
        }
        if let Some(specialty_id) = patch.specialty_id {
            self.draft.specialty_id = Some(specialty_id);
        }
        if let Some(service_id) = patch.service_id {
            self.draft.service_id = Some(service_id);
        }
        if let Some(date) = patch.date {
            if self.draft.date != Some(date) {
                self.draft.time = None;
            }
            self.draft.date = Some(date);
        }
        if let Some(time) = patch.time {
            self.draft.time = Some(time);
        }
        if let Some(mut patient) = patch.patient {
            patient.phone = patient.phone.map(|p| normalize_phone(&p));
            self.draft.patient.apply(patient);
        }
        if let Some(consents) = patch.consents {
            self.consents = consents;
        }
        self.updated_at = Utc::now();
    }

    /// What is still missing for `step`. Empty when the step is complete.
    pub fn step_errors(&self, step: BookingStep) -> Vec<FieldError> {
        let mut errors = Vec::new();
        match step {
            BookingStep::Service => {
                if self.draft.insurer.is_none() {
                    errors.push(FieldError::new("insurer", "Select an insurer or private"));
                }
                if self.draft.specialty_id.filter(|id| *id > 0).is_none() {
                    errors.push(FieldError::new("specialty_id", "Select a specialty"));
                }
                if self.draft.service_id.filter(|id| *id > 0).is_none() {
                    errors.push(FieldError::new("service_id", "Select a service"));
                }
            }
            BookingStep::Slot => {
                if self.draft.date.is_none() {
                    errors.push(FieldError::new("date", "Select a date"));
                }
                if self.draft.time.is_none() {
                    errors.push(FieldError::new("time", "Select a time"));
                }
            }
            BookingStep::Confirmation => {
                errors.extend(validate_personal_data(&self.draft.patient));
                errors.extend(validate_consents(&self.consents));
            }
        }
        errors
    }

    pub fn is_step_complete(&self, step: BookingStep) -> bool {
        self.step_errors(step).is_empty()
    }

    pub fn is_complete(&self) -> bool {
        BookingStep::ALL.iter().all(|step| self.is_step_complete(*step))
    }

    /// Move to the next step. Refuses while the current step is incomplete.
    pub fn advance(&mut self) -> Result<BookingStep, SessionError> {
        let next = self.step.next().ok_or(SessionError::NoNextStep)?;
        let errors = self.step_errors(self.step);
        if !errors.is_empty() {
            return Err(SessionError::Incomplete {
                step: self.step,
                errors,
            });
        }
        self.step = next;
        self.updated_at = Utc::now();
        Ok(next)
    }

    pub fn back(&mut self) -> Result<BookingStep, SessionError> {
        let previous = self.step.previous().ok_or(SessionError::NoPreviousStep)?;
        self.step = previous;
        self.updated_at = Utc::now();
        Ok(previous)
    }

    pub fn reset(&mut self) {
        self.step = BookingStep::Service;
        self.draft = BookingDraft::default();
        self.consents = Consents::default();
        self.updated_at = Utc::now();
    }

    fn first_incomplete(&self) -> Option<SessionError> {
        BookingStep::ALL.iter().find_map(|step| {
            let errors = self.step_errors(*step);
            (!errors.is_empty()).then_some(SessionError::Incomplete { step: *step, errors })
        })
    }
}

/// In-process store of open wizard sessions.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, BookingSession>>,
    idle_ttl: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_idle_ttl(Duration::minutes(DEFAULT_IDLE_TTL_MINUTES))
    }

    /// Sessions untouched for longer than `idle_ttl` are dropped on the next `create`.
    pub fn with_idle_ttl(idle_ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_ttl,
        }
    }

    pub async fn create(&self) -> BookingSession {
        let session = BookingSession::new();
        let cutoff = Utc::now() - self.idle_ttl;

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.updated_at >= cutoff);
        if sessions.len() < before {
            debug!("Dropped {} idle booking sessions", before - sessions.len());
        }
        sessions.insert(session.id, session.clone());

        debug!("Opened booking session {}", session.id);
        session
    }

    pub async fn get(&self, id: Uuid) -> Result<BookingSession, SessionError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(SessionError::NotFound)
    }

    pub async fn update(&self, id: Uuid, patch: BookingSessionPatch) -> Result<BookingSession, SessionError> {
        self.modify(id, |session| {
            session.update(patch);
            Ok(())
        })
        .await
    }

    pub async fn advance(&self, id: Uuid) -> Result<BookingSession, SessionError> {
        self.modify(id, |session| session.advance().map(|_| ())).await
    }

    pub async fn back(&self, id: Uuid) -> Result<BookingSession, SessionError> {
        self.modify(id, |session| session.back().map(|_| ())).await
    }

    pub async fn reset(&self, id: Uuid) -> Result<BookingSession, SessionError> {
        self.modify(id, |session| {
            session.reset();
            Ok(())
        })
        .await
    }

    pub async fn discard(&self, id: Uuid) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Book the session's selections as a web booking. The session is only
    /// discarded once the store has accepted the appointment.
    pub async fn submit(&self, id: Uuid, booking: &BookingService) -> Result<Appointment, SessionError> {
        let session = self.get(id).await?;
        if let Some(incomplete) = session.first_incomplete() {
            return Err(incomplete);
        }

        let appointment = booking.create(&session.draft, Channel::Web).await?;

        self.discard(id).await;
        info!("Booking session {} submitted as appointment {}", id, appointment.code);
        Ok(appointment)
    }

    async fn modify<F>(&self, id: Uuid, change: F) -> Result<BookingSession, SessionError>
    where
        F: FnOnce(&mut BookingSession) -> Result<(), SessionError>,
    {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or(SessionError::NotFound)?;
        change(session)?;
        Ok(session.clone())
    }
}
