use std::sync::LazyLock;

use regex::Regex;

use shared_models::validation::FieldError;

use crate::models::{Consents, DocumentType, PatientData};

static EMAIL_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok());
static NIF_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^[0-9]{8}[A-Z]$").ok());
static NIE_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^[XYZ][0-9]{7}[A-Z]$").ok());

pub const PHONE_PREFIX: &str = "+34";
/// `+34 ` followed by nine digits.
const MIN_PHONE_LENGTH: usize = 13;

fn is_match(regex: &Option<Regex>, value: &str) -> bool {
    regex.as_ref().is_some_and(|regex| regex.is_match(value))
}

pub fn is_valid_email(email: &str) -> bool {
    is_match(&EMAIL_REGEX, email.trim())
}

pub fn is_valid_document(document_type: DocumentType, number: &str) -> bool {
    let regex = match document_type {
        DocumentType::Nif => &*NIF_REGEX,
        DocumentType::Nie => &*NIE_REGEX,
    };
    is_match(regex, number.trim())
}

/// Force the Spanish prefix and strip everything that is not a digit.
pub fn normalize_phone(input: &str) -> String {
    let local = input.trim().strip_prefix(PHONE_PREFIX).unwrap_or(input);
    let digits: String = local.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("{} {}", PHONE_PREFIX, digits)
}

pub fn is_valid_phone(phone: &str) -> bool {
    phone.starts_with(PHONE_PREFIX) && phone.chars().count() >= MIN_PHONE_LENGTH
}

/// Field-level checks on the patient's personal data only.
pub fn validate_personal_data(data: &PatientData) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if data.first_name.trim().is_empty() {
        errors.push(FieldError::new("first_name", "Required field"));
    }
    if data.last_name.trim().is_empty() {
        errors.push(FieldError::new("last_name", "Required field"));
    }
    if !is_valid_email(&data.email) {
        errors.push(FieldError::new("email", "Invalid email"));
    }
    if data.address.trim().is_empty() {
        errors.push(FieldError::new("address", "Address is required"));
    }
    if !is_valid_document(data.document_type, &data.document_number) {
        errors.push(FieldError::new(
            "document_number",
            format!("Invalid {} format", data.document_type),
        ));
    }
    if !is_valid_phone(&data.phone) {
        errors.push(FieldError::new("phone", "Incomplete phone number"));
    }

    errors
}

pub fn validate_consents(consents: &Consents) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if !consents.adult {
        errors.push(FieldError::new("adult", "You must confirm you are of age"));
    }
    if !consents.appointment_rules {
        errors.push(FieldError::new("appointment_rules", "You must accept the appointment policy"));
    }
    if !consents.privacy {
        errors.push(FieldError::new("privacy", "You must accept the privacy policy"));
    }
    if !consents.terms {
        errors.push(FieldError::new("terms", "You must accept the terms and conditions"));
    }

    errors
}

/// Everything the confirmation step requires before a booking is submitted.
pub fn validate_patient_data(data: &PatientData, consents: &Consents) -> Result<(), Vec<FieldError>> {
    let mut errors = validate_personal_data(data);
    errors.extend(validate_consents(consents));

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
