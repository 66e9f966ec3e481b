pub mod models;
pub mod handlers;
pub mod router;
pub mod services;

pub use handlers::AppointmentState;
pub use models::*;
pub use router::*;
pub use services::{AvailabilityService, BookingService, SessionRegistry};
