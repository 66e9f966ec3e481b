// libs/appointment-cell/src/services/repository.rs
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::Value;
use tracing::{debug, error};
use uuid::Uuid;

use shared_database::{Filter, RecordStore, StoreError, UniqueConstraint};

use crate::models::{
    Appointment, AppointmentError, AppointmentRow, AppointmentStatus, APPOINTMENTS_TABLE,
};

/// The store-side guard against double booking: at most one
/// non-cancelled appointment per `(date, time)`.
pub fn active_slot_constraint() -> UniqueConstraint {
    UniqueConstraint::new(APPOINTMENTS_TABLE, &["date", "time"])
        .when(Filter::neq("status", AppointmentStatus::Cancelled.to_string()))
}

fn date_value(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn not_cancelled() -> Filter {
    Filter::neq("status", AppointmentStatus::Cancelled.to_string())
}

/// Typed access to the `appointments` table.
#[derive(Clone)]
pub struct AppointmentRepository {
    store: Arc<dyn RecordStore>,
}

impl AppointmentRepository {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        let rows = self
            .fetch(&[Filter::eq("id", id.to_string())])
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Appointments holding a slot on `date`.
    pub async fn active_on(&self, date: NaiveDate) -> Result<Vec<Appointment>, AppointmentError> {
        self.fetch(&[Filter::eq("date", date_value(date)), not_cancelled()])
            .await
    }

    pub async fn active_on_dates(&self, dates: &[NaiveDate]) -> Result<Vec<Appointment>, AppointmentError> {
        if dates.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch(&[
            Filter::is_in("date", dates.iter().map(|d| date_value(*d))),
            not_cancelled(),
        ])
        .await
    }

    pub async fn active(&self, date: Option<NaiveDate>) -> Result<Vec<Appointment>, AppointmentError> {
        match date {
            Some(date) => self.active_on(date).await,
            None => self.fetch(&[not_cancelled()]).await,
        }
    }

    /// Insert a new appointment. A unique-constraint rejection is returned
    /// as-is so the caller can report which slot was lost.
    pub async fn insert(&self, appointment: &Appointment) -> Result<Appointment, StoreError> {
        let row = self.store.insert(APPOINTMENTS_TABLE, appointment.to_row()).await?;
        decode(row).map_err(|e| StoreError::Decode(e.to_string()))
    }

    /// Patch one appointment. `Ok(None)` when the id matched nothing.
    pub async fn patch(&self, id: Uuid, patch: Value) -> Result<Option<Appointment>, StoreError> {
        let rows = self
            .store
            .update(APPOINTMENTS_TABLE, &[Filter::eq("id", id.to_string())], patch)
            .await?;

        rows.into_iter()
            .next()
            .map(|row| decode(row).map_err(|e| StoreError::Decode(e.to_string())))
            .transpose()
    }

    async fn fetch(&self, filters: &[Filter]) -> Result<Vec<Appointment>, AppointmentError> {
        let rows = self.store.query(APPOINTMENTS_TABLE, filters).await.map_err(|e| {
            error!("Failed to fetch appointments: {}", e);
            AppointmentError::from(e)
        })?;
        debug!("Fetched {} appointment rows", rows.len());

        let mut appointments = rows
            .into_iter()
            .map(decode)
            .collect::<Result<Vec<_>, _>>()?;
        appointments.sort_by_key(|a| (a.date, a.time));
        Ok(appointments)
    }
}

fn decode(row: Value) -> Result<Appointment, AppointmentError> {
    serde_json::from_value::<AppointmentRow>(row)
        .map(Appointment::from)
        .map_err(|e| AppointmentError::DatabaseError(format!("Malformed appointment row: {}", e)))
}
