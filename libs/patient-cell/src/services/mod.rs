pub mod patient;
pub mod validation;

pub use patient::PatientService;
pub use validation::{normalize_phone, validate_patient_data};
