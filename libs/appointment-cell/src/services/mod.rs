pub mod availability;
pub mod booking;
pub mod lifecycle;
pub mod repository;
pub mod schedule;
pub mod session;

pub use availability::AvailabilityService;
pub use booking::BookingService;
pub use lifecycle::AppointmentLifecycleService;
pub use repository::{active_slot_constraint, AppointmentRepository};
pub use session::{BookingSession, BookingSessionPatch, BookingStep, SessionError, SessionRegistry};
