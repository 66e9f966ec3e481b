use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A conditional write lost against an existing row (unique constraint).
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Network failure, timeout, or a 5xx from the store.
    #[error("Record store unavailable: {0}")]
    Unavailable(String),

    #[error("Record store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Failed to decode store response: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Decode(err.to_string())
    }
}
