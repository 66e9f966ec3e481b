// libs/appointment-cell/src/services/schedule.rs
use chrono::{Datelike, Days, FixedOffset, NaiveDate, Utc, Weekday};

use crate::models::{DaySchedule, TimeSlot};

const MORNING_FIRST: TimeSlot = TimeSlot::at(9, 0);
const MORNING_LAST: TimeSlot = TimeSlot::at(13, 30);
const AFTERNOON_FIRST: TimeSlot = TimeSlot::at(16, 0);
const FRIDAY_AFTERNOON_FIRST: TimeSlot = TimeSlot::at(17, 0);
const AFTERNOON_LAST: TimeSlot = TimeSlot::at(19, 30);

/// Slots before this time belong to the morning block.
pub const AFTERNOON_BOUNDARY: TimeSlot = TimeSlot::at(14, 0);

fn slot_range(first: TimeSlot, last: TimeSlot) -> Vec<TimeSlot> {
    std::iter::successors(Some(first), TimeSlot::next)
        .take_while(|slot| *slot <= last)
        .collect()
}

pub fn is_open(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// The clinic's opening-hours template for `date`.
///
/// Monday to Thursday: 09:00-13:30 and 16:00-19:30. Friday: 09:00-13:30 and
/// 17:00-19:30. Weekends closed. Times are slot starts, every 30 minutes.
pub fn schedule_for(date: NaiveDate) -> DaySchedule {
    let afternoon_first = match date.weekday() {
        Weekday::Sat | Weekday::Sun => {
            return DaySchedule {
                date,
                is_open: false,
                slots: Vec::new(),
            }
        }
        Weekday::Fri => FRIDAY_AFTERNOON_FIRST,
        _ => AFTERNOON_FIRST,
    };

    let mut slots = slot_range(MORNING_FIRST, MORNING_LAST);
    slots.extend(slot_range(afternoon_first, AFTERNOON_LAST));

    DaySchedule {
        date,
        is_open: true,
        slots,
    }
}

/// Whether `time` is a bookable start on `date`.
pub fn contains(date: NaiveDate, time: TimeSlot) -> bool {
    schedule_for(date).slots.contains(&time)
}

pub fn is_morning(time: TimeSlot) -> bool {
    time < AFTERNOON_BOUNDARY
}

/// Monday through Sunday of the week containing `date`.
pub fn week_of(date: NaiveDate) -> Vec<NaiveDate> {
    let offset = u64::from(date.weekday().num_days_from_monday());
    let Some(monday) = date.checked_sub_days(Days::new(offset)) else {
        return Vec::new();
    };
    monday.iter_days().take(7).collect()
}

/// Every date of a calendar month, `None` for an invalid year/month.
pub fn month_days(year: i32, month: u32) -> Option<Vec<NaiveDate>> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    Some(first.iter_days().take_while(|d| d.month() == month).collect())
}

/// Today on the clinic's wall clock.
pub fn clinic_today(offset: FixedOffset) -> NaiveDate {
    Utc::now().with_timezone(&offset).date_naive()
}
