// libs/appointment-cell/src/services/availability.rs
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;
use uuid::Uuid;

use shared_database::RecordStore;

use crate::models::{
    Appointment, AppointmentError, AvailableSlots, DayAvailability, DayStatus, SlotAvailability,
    TimeSlot,
};
use crate::services::repository::AppointmentRepository;
use crate::services::schedule::{is_morning, month_days, schedule_for};

/// Times on `date` held by active appointments other than `exclude`.
pub fn occupied_times(
    date: NaiveDate,
    existing: &[Appointment],
    exclude: Option<Uuid>,
) -> BTreeSet<TimeSlot> {
    existing
        .iter()
        .filter(|a| a.date == date && a.is_active())
        .filter(|a| Some(a.id) != exclude)
        .map(|a| a.time)
        .collect()
}

/// Free template slots of `date`, split into morning and afternoon.
///
/// `exclude` lets a rescheduled appointment keep seeing its own slot as free.
pub fn available_slots(
    date: NaiveDate,
    existing: &[Appointment],
    exclude: Option<Uuid>,
) -> AvailableSlots {
    let schedule = schedule_for(date);
    if !schedule.is_open {
        return AvailableSlots {
            date,
            morning: Vec::new(),
            afternoon: Vec::new(),
            is_closed: true,
        };
    }

    let occupied = occupied_times(date, existing, exclude);
    let (morning, afternoon): (Vec<TimeSlot>, Vec<TimeSlot>) = schedule
        .slots
        .into_iter()
        .filter(|slot| !occupied.contains(slot))
        .partition(|slot| is_morning(*slot));

    AvailableSlots {
        date,
        morning,
        afternoon,
        is_closed: false,
    }
}

/// Single-slot form of [`available_slots`]: only checks occupancy, not the template.
pub fn is_slot_free(
    date: NaiveDate,
    time: TimeSlot,
    existing: &[Appointment],
    exclude: Option<Uuid>,
) -> bool {
    !existing
        .iter()
        .filter(|a| Some(a.id) != exclude)
        .any(|a| a.occupies(date, time))
}

pub fn day_availability(date: NaiveDate, existing: &[Appointment]) -> DayAvailability {
    let schedule = schedule_for(date);
    if !schedule.is_open {
        return DayAvailability {
            date,
            status: DayStatus::Closed,
            slots: Vec::new(),
        };
    }

    let occupied = occupied_times(date, existing, None);
    let slots: Vec<SlotAvailability> = schedule
        .slots
        .into_iter()
        .map(|time| SlotAvailability {
            time,
            available: !occupied.contains(&time),
        })
        .collect();

    let status = if slots.iter().any(|s| s.available) {
        DayStatus::Available
    } else {
        DayStatus::Full
    };

    DayAvailability { date, status, slots }
}

/// [`day_availability`] for every day of a month, `None` for an invalid month.
pub fn month_overview(
    year: i32,
    month: u32,
    existing: &[Appointment],
) -> Option<Vec<DayAvailability>> {
    let days = month_days(year, month)?;
    Some(days.into_iter().map(|d| day_availability(d, existing)).collect())
}

/// Availability read straight from the store. Nothing is cached, every
/// call sees the appointments as they are now.
pub struct AvailabilityService {
    appointments: AppointmentRepository,
}

impl AvailabilityService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            appointments: AppointmentRepository::new(store),
        }
    }

    pub async fn available_slots(
        &self,
        date: NaiveDate,
        exclude: Option<Uuid>,
    ) -> Result<AvailableSlots, AppointmentError> {
        if !schedule_for(date).is_open {
            return Ok(available_slots(date, &[], exclude));
        }

        let existing = self.appointments.active_on(date).await?;
        let slots = available_slots(date, &existing, exclude);
        debug!(
            "{} has {} free slots ({} booked)",
            date,
            slots.all().count(),
            existing.len()
        );
        Ok(slots)
    }

    pub async fn day(&self, date: NaiveDate) -> Result<DayAvailability, AppointmentError> {
        let existing = self.appointments.active_on(date).await?;
        Ok(day_availability(date, &existing))
    }

    pub async fn month(&self, year: i32, month: u32) -> Result<Vec<DayAvailability>, AppointmentError> {
        let days = month_days(year, month)
            .ok_or_else(|| AppointmentError::field("month", "Invalid year or month"))?;

        let open_days: Vec<NaiveDate> = days.iter().copied().filter(|d| schedule_for(*d).is_open).collect();
        let existing = self.appointments.active_on_dates(&open_days).await?;

        Ok(days.into_iter().map(|d| day_availability(d, &existing)).collect())
    }
}
