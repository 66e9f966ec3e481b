// libs/appointment-cell/src/models.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use uuid::Uuid;

use catalog_cell::{CatalogError, InsurerScope};
use patient_cell::{PatientData, PatientError};
use shared_database::StoreError;
use shared_models::error::AppError;
use shared_models::validation::{describe, FieldError};

pub const APPOINTMENTS_TABLE: &str = "appointments";

// ==============================================================================
// CALENDAR PRIMITIVES
// ==============================================================================

/// A bookable start time on the 30-minute grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeSlot {
    hour: u8,
    minute: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeSlotError {
    #[error("Malformed time '{0}', expected HH:MM")]
    Malformed(String),

    #[error("Time {hour:02}:{minute:02} is not on the 30-minute grid")]
    OffGrid { hour: u32, minute: u32 },
}

impl TimeSlot {
    pub const GRANULARITY_MINUTES: u8 = 30;

    pub fn new(hour: u32, minute: u32) -> Result<Self, TimeSlotError> {
        if hour >= 24 || minute % Self::GRANULARITY_MINUTES as u32 != 0 || minute >= 60 {
            return Err(TimeSlotError::OffGrid { hour, minute });
        }
        Ok(Self {
            hour: hour as u8,
            minute: minute as u8,
        })
    }

    /// Grid times known at compile time (the opening-hours template).
    pub(crate) const fn at(hour: u8, minute: u8) -> Self {
        Self { hour, minute }
    }

    pub fn hour(&self) -> u32 {
        self.hour as u32
    }

    pub fn minute(&self) -> u32 {
        self.minute as u32
    }

    pub fn minutes_since_midnight(&self) -> u32 {
        self.hour() * 60 + self.minute()
    }

    /// The following grid time, `None` past 23:30.
    pub fn next(&self) -> Option<Self> {
        let next = self.minutes_since_midnight() + Self::GRANULARITY_MINUTES as u32;
        Self::new(next / 60, next % 60).ok()
    }

    /// `HH:MM:SS`, the store's `time` column format.
    pub fn to_db_string(&self) -> String {
        format!("{:02}:{:02}:00", self.hour, self.minute)
    }

    pub fn as_naive_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour(), self.minute(), 0).unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeSlot {
    type Err = TimeSlotError;

    /// Accepts `HH:MM` and `HH:MM:SS` (seconds must be zero).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || TimeSlotError::Malformed(s.to_string());
        let parts: Vec<&str> = s.trim().split(':').collect();
        if !(2..=3).contains(&parts.len()) || parts.iter().any(|p| p.len() != 2) {
            return Err(malformed());
        }

        let numbers = parts
            .iter()
            .map(|p| p.parse::<u32>().map_err(|_| malformed()))
            .collect::<Result<Vec<_>, _>>()?;

        if numbers.get(2).is_some_and(|seconds| *seconds != 0) {
            return Err(malformed());
        }
        TimeSlot::new(numbers[0], numbers[1])
    }
}

impl Serialize for TimeSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeSlot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Bookable times of one date. Derived from the weekday, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaySchedule {
    pub date: NaiveDate,
    pub is_open: bool,
    pub slots: Vec<TimeSlot>,
}

// ==============================================================================
// AVAILABILITY VIEWS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableSlots {
    pub date: NaiveDate,
    pub morning: Vec<TimeSlot>,
    pub afternoon: Vec<TimeSlot>,
    pub is_closed: bool,
}

impl AvailableSlots {
    pub fn is_empty(&self) -> bool {
        self.morning.is_empty() && self.afternoon.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = &TimeSlot> {
        self.morning.iter().chain(self.afternoon.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayStatus {
    Available,
    Full,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotAvailability {
    pub time: TimeSlot,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub status: DayStatus,
    pub slots: Vec<SlotAvailability>,
}

/// One column of the admin week view.
#[derive(Debug, Clone, Serialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub is_open: bool,
    pub appointments: Vec<Appointment>,
}

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

/// How the booking reached the clinic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    Web,
    WhatsApp,
    InPerson,
    Phone,
}

impl Channel {
    /// Id of the booking method in the store.
    pub fn method_id(&self) -> i64 {
        match self {
            Channel::Web => 1,
            Channel::WhatsApp => 2,
            Channel::InPerson => 3,
            Channel::Phone => 4,
        }
    }

    pub fn from_method_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(Channel::Web),
            2 => Some(Channel::WhatsApp),
            3 => Some(Channel::InPerson),
            4 => Some(Channel::Phone),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Confirmed,
    CheckedIn,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::Completed)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::CheckedIn => write!(f, "checked-in"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Appointment {
    pub id: Uuid,
    pub code: String,
    pub date: NaiveDate,
    pub time: TimeSlot,
    pub patient_document: String,
    pub service_id: i64,
    pub specialty_id: Option<i64>,
    pub insurer_id: Option<i64>,
    pub channel: Channel,
    pub status: AppointmentStatus,
    pub active: bool,
    pub cancellation_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insurer_name: Option<String>,
}

impl Appointment {
    /// Whether the appointment holds its slot.
    pub fn is_active(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }

    pub fn occupies(&self, date: NaiveDate, time: TimeSlot) -> bool {
        self.is_active() && self.date == date && self.time == time
    }

    pub fn to_row(&self) -> Value {
        json!({
            "id": self.id,
            "code": self.code,
            "date": self.date.format("%Y-%m-%d").to_string(),
            "time": self.time.to_db_string(),
            "patient_document": self.patient_document,
            "service_id": self.service_id,
            "specialty_id": self.specialty_id,
            "insurer_id": self.insurer_id,
            "channel_id": self.channel.method_id(),
            "status": self.status,
            "active": self.active,
            "cancellation_reason": self.cancellation_reason,
            "cancelled_at": self.cancelled_at.map(|t| t.to_rfc3339()),
            "created_at": self.created_at.map(|t| t.to_rfc3339()),
            "updated_at": self.updated_at.map(|t| t.to_rfc3339()),
        })
    }
}

/// Human-facing booking code, `CLF-DDMMYYHHMM`. Derived from the slot,
/// so it is only unique among active appointments.
pub fn booking_code(date: NaiveDate, time: TimeSlot) -> String {
    format!("CLF-{}{:02}{:02}", date.format("%d%m%y"), time.hour(), time.minute())
}

/// An appointment row as the store returns it.
#[derive(Debug, Clone, Deserialize)]
pub struct AppointmentRow {
    pub id: Uuid,
    #[serde(default)]
    pub code: Option<String>,
    pub date: NaiveDate,
    pub time: TimeSlot,
    pub patient_document: String,
    pub service_id: i64,
    #[serde(default)]
    pub specialty_id: Option<i64>,
    #[serde(default)]
    pub insurer_id: Option<i64>,
    #[serde(default)]
    pub channel_id: Option<i64>,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<AppointmentRow> for Appointment {
    fn from(row: AppointmentRow) -> Self {
        let channel = row
            .channel_id
            .and_then(Channel::from_method_id)
            .unwrap_or(Channel::Web);

        Self {
            id: row.id,
            code: row.code.unwrap_or_else(|| booking_code(row.date, row.time)),
            date: row.date,
            time: row.time,
            patient_document: row.patient_document,
            service_id: row.service_id,
            specialty_id: row.specialty_id,
            insurer_id: row.insurer_id,
            channel,
            status: row.status,
            active: row.active.unwrap_or(row.status != AppointmentStatus::Cancelled),
            cancellation_reason: row.cancellation_reason,
            cancelled_at: row.cancelled_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            patient_name: None,
            service_name: None,
            insurer_name: None,
        }
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

/// The patient's insurer choice on the first booking step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsurerChoice {
    Private,
    Insurer(i64),
}

impl InsurerChoice {
    /// The choice a stored `insurer_id` stands for; no insurer means private.
    pub fn from_insurer_id(insurer_id: Option<i64>) -> Self {
        insurer_id.map_or(InsurerChoice::Private, InsurerChoice::Insurer)
    }

    pub fn insurer_id(&self) -> Option<i64> {
        match self {
            InsurerChoice::Private => None,
            InsurerChoice::Insurer(id) => Some(*id),
        }
    }

    pub fn scope(&self) -> InsurerScope {
        match self {
            InsurerChoice::Private => InsurerScope::PrivateOnly,
            InsurerChoice::Insurer(id) => InsurerScope::Insurer(*id),
        }
    }
}

/// Everything needed to book: catalog selections, slot, and the patient.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookingDraft {
    pub insurer: Option<InsurerChoice>,
    pub specialty_id: Option<i64>,
    pub service_id: Option<i64>,
    pub date: Option<NaiveDate>,
    pub time: Option<TimeSlot>,
    #[serde(default)]
    pub patient: PatientData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAppointmentRequest {
    #[serde(flatten)]
    pub draft: BookingDraft,
    pub channel: Option<Channel>,
}

/// Admin edit. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub date: Option<NaiveDate>,
    pub time: Option<TimeSlot>,
    pub service_id: Option<i64>,
    pub specialty_id: Option<i64>,
    pub insurer: Option<InsurerChoice>,
    pub channel: Option<Channel>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusChangeRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentListQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AvailabilityQuery {
    pub exclude: Option<Uuid>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AppointmentError {
    #[error("Validation failed: {}", describe(.0))]
    Validation(Vec<FieldError>),

    #[error("Slot {date} {time} is already booked")]
    SlotConflict { date: NaiveDate, time: TimeSlot },

    #[error("Appointment not found")]
    NotFound,

    #[error("Appointment cannot move from {from} to {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Appointment cannot be edited in status {0}")]
    NotEditable(AppointmentStatus),

    #[error("Record store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl AppointmentError {
    pub fn field(field: &str, message: &str) -> Self {
        AppointmentError::Validation(vec![FieldError::new(field, message)])
    }
}

impl From<StoreError> for AppointmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(message) => AppointmentError::StoreUnavailable(message),
            other => AppointmentError::DatabaseError(other.to_string()),
        }
    }
}

impl From<PatientError> for AppointmentError {
    fn from(err: PatientError) -> Self {
        match err {
            PatientError::Validation(fields) => AppointmentError::Validation(fields),
            PatientError::StoreUnavailable(message) => AppointmentError::StoreUnavailable(message),
            other => AppointmentError::DatabaseError(other.to_string()),
        }
    }
}

impl From<CatalogError> for AppointmentError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::StoreUnavailable(message) => AppointmentError::StoreUnavailable(message),
            CatalogError::DatabaseError(message) => AppointmentError::DatabaseError(message),
        }
    }
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        match err {
            AppointmentError::Validation(fields) => AppError::InvalidFields(fields),
            AppointmentError::SlotConflict { .. } => AppError::Conflict(err.to_string()),
            AppointmentError::NotFound => AppError::NotFound(err.to_string()),
            AppointmentError::InvalidStatusTransition { .. } | AppointmentError::NotEditable(_) => {
                AppError::BadRequest(err.to_string())
            }
            AppointmentError::StoreUnavailable(message) => AppError::ServiceUnavailable(message),
            AppointmentError::DatabaseError(message) => AppError::Internal(message),
        }
    }
}
