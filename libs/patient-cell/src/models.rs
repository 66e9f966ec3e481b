use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shared_database::StoreError;
use shared_models::error::AppError;
use shared_models::validation::{describe, FieldError};

pub const PATIENTS_TABLE: &str = "patients";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentType {
    #[default]
    Nif,
    Nie,
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentType::Nif => write!(f, "NIF"),
            DocumentType::Nie => write!(f, "NIE"),
        }
    }
}

/// A patient as stored in the registry. The document number is the natural key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    pub document_number: String,
    #[serde(default)]
    pub document_type: DocumentType,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Patient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Personal data typed into the booking form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PatientData {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub document_type: DocumentType,
    #[serde(default)]
    pub document_number: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub address: String,
}

impl PatientData {
    /// Document number in its stored form: trimmed and upper-cased.
    pub fn normalized_document(&self) -> String {
        self.document_number.trim().to_uppercase()
    }

    pub fn apply(&mut self, patch: PatientDataPatch) {
        if let Some(first_name) = patch.first_name {
            self.first_name = first_name;
        }
        if let Some(last_name) = patch.last_name {
            self.last_name = last_name;
        }
        if let Some(document_type) = patch.document_type {
            self.document_type = document_type;
        }
        if let Some(document_number) = patch.document_number {
            self.document_number = document_number;
        }
        if let Some(phone) = patch.phone {
            self.phone = phone;
        }
        if let Some(email) = patch.email {
            self.email = email;
        }
        if let Some(address) = patch.address {
            self.address = address;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PatientDataPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub document_type: Option<DocumentType>,
    pub document_number: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
}

/// Consents the patient gives on the confirmation step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Consents {
    #[serde(default)]
    pub adult: bool,
    #[serde(default)]
    pub appointment_rules: bool,
    #[serde(default)]
    pub privacy: bool,
    #[serde(default)]
    pub terms: bool,
    /// Optional marketing opt-in, never required.
    #[serde(default)]
    pub commercial: bool,
}

impl Consents {
    pub fn all_required() -> Self {
        Self {
            adult: true,
            appointment_rules: true,
            privacy: true,
            terms: true,
            commercial: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatientSearchQuery {
    pub q: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PatientError {
    #[error("Patient not found")]
    NotFound,

    #[error("Patient with document {0} already exists")]
    AlreadyExists(String),

    #[error("Invalid patient data: {}", describe(.0))]
    Validation(Vec<FieldError>),

    #[error("Record store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<StoreError> for PatientError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(message) => PatientError::StoreUnavailable(message),
            other => PatientError::DatabaseError(other.to_string()),
        }
    }
}

impl From<PatientError> for AppError {
    fn from(err: PatientError) -> Self {
        match err {
            PatientError::NotFound => AppError::NotFound("Patient not found".to_string()),
            PatientError::AlreadyExists(document) => {
                AppError::Conflict(format!("Patient {} already exists", document))
            }
            PatientError::Validation(fields) => AppError::InvalidFields(fields),
            PatientError::StoreUnavailable(message) => AppError::ServiceUnavailable(message),
            PatientError::DatabaseError(message) => AppError::Internal(message),
        }
    }
}
