use std::sync::Arc;

use chrono::Duration;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use shared_database::{Filter, RecordStore};
use shared_models::auth::ADMIN_ROLE;
use shared_utils::jwt::{issue_token, TokenSubject};

use crate::models::{AuthError, AuthenticatedUser, LoginResponse, UserRecord, USERS_TABLE};

const TOKEN_TTL_HOURS: i64 = 8;

/// Lowercase hex SHA-256 digest, the format stored in `users.password_hash`.
pub fn hash_password(password: &str) -> String {
    Sha256::digest(password.as_bytes())
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

fn digests_match(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

pub struct AuthService {
    store: Arc<dyn RecordStore>,
    jwt_secret: String,
}

impl AuthService {
    pub fn new(store: Arc<dyn RecordStore>, jwt_secret: &str) -> Self {
        Self {
            store,
            jwt_secret: jwt_secret.to_string(),
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, AuthError> {
        let username = username.trim();
        debug!("Login attempt for {}", username);

        if username.is_empty() || password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let rows = self
            .store
            .query(USERS_TABLE, &[Filter::eq("username", username)])
            .await?;

        let Some(row) = rows.into_iter().next() else {
            warn!("Login rejected: unknown user {}", username);
            return Err(AuthError::InvalidCredentials);
        };
        let user: UserRecord =
            serde_json::from_value(row).map_err(|e| AuthError::Internal(e.to_string()))?;

        let supplied = hash_password(password);
        if !digests_match(&supplied, &user.password_hash.trim().to_lowercase()) {
            warn!("Login rejected: password mismatch for {}", username);
            return Err(AuthError::InvalidCredentials);
        }

        let id = user.id_string();
        let role = user.role.clone().unwrap_or_else(|| ADMIN_ROLE.to_string());
        let subject = TokenSubject {
            id: &id,
            email: user.email.as_deref(),
            role: &role,
            name: Some(&user.username),
        };
        let ttl = Duration::hours(TOKEN_TTL_HOURS);
        let token = issue_token(&subject, &self.jwt_secret, ttl).map_err(AuthError::Internal)?;

        info!("User {} logged in", user.username);

        Ok(LoginResponse {
            token,
            token_type: "Bearer".to_string(),
            expires_in: ttl.num_seconds(),
            user: AuthenticatedUser {
                id,
                username: user.username,
                role,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use shared_database::InMemoryRecordStore;
    use shared_utils::jwt::validate_token;

    const SECRET: &str = "unit-test-secret";

    fn store_with_admin() -> Arc<InMemoryRecordStore> {
        let store = Arc::new(InMemoryRecordStore::new());
        store.seed(
            USERS_TABLE,
            vec![json!({
                "id": 1,
                "username": "recepcion",
                "password_hash": hash_password("s3cret"),
            })],
        );
        store
    }

    #[test]
    fn hash_is_hex_sha256() {
        assert_eq!(
            hash_password("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn valid_credentials_issue_admin_token() {
        let service = AuthService::new(store_with_admin(), SECRET);
        let response = service.login("recepcion", "s3cret").await.unwrap();

        assert_eq!(response.user.role, ADMIN_ROLE);
        assert_eq!(response.user.id, "1");

        let user = validate_token(&response.token, SECRET).unwrap();
        assert!(user.is_admin());
        assert_eq!(user.id, "1");
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_the_same() {
        let service = AuthService::new(store_with_admin(), SECRET);

        assert_matches!(
            service.login("recepcion", "nope").await,
            Err(AuthError::InvalidCredentials)
        );
        assert_matches!(
            service.login("nobody", "s3cret").await,
            Err(AuthError::InvalidCredentials)
        );
        assert_matches!(service.login("", "").await, Err(AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn outage_is_not_reported_as_bad_credentials() {
        let store = store_with_admin();
        store.set_unavailable(true);
        let service = AuthService::new(store, SECRET);
        assert_matches!(
            service.login("recepcion", "s3cret").await,
            Err(AuthError::StoreUnavailable(_))
        );
    }
}
