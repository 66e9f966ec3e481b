use serde::{Deserialize, Serialize};
use serde_json::Value;

use shared_database::StoreError;
use shared_models::error::AppError;

pub const USERS_TABLE: &str = "users";

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: AuthenticatedUser,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AuthenticatedUser {
    pub id: String,
    pub username: String,
    pub role: String,
}

/// A dashboard account as stored. `password_hash` is the lowercase hex
/// SHA-256 digest of the password.
#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub id: Value,
    pub username: String,
    pub password_hash: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl UserRecord {
    pub fn id_string(&self) -> String {
        match &self.id {
            Value::String(id) => id.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Authentication service unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Authentication failed: {0}")]
    Internal(String),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(message) => AuthError::StoreUnavailable(message),
            other => AuthError::Internal(other.to_string()),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => AppError::Auth(err.to_string()),
            AuthError::StoreUnavailable(message) => AppError::ServiceUnavailable(message),
            AuthError::Internal(message) => AppError::Internal(message),
        }
    }
}
