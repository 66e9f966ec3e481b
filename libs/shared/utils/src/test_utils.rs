use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{AppState, RecordStore};
use shared_models::auth::User;

use crate::jwt::{issue_token, TokenSubject};

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub clinic_utc_offset_minutes: i32,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            clinic_utc_offset_minutes: 60,
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            clinic_utc_offset_minutes: self.clinic_utc_offset_minutes,
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }

    /// Application state wired to the given store instead of Supabase.
    pub fn to_state(&self, store: Arc<dyn RecordStore>) -> AppState {
        AppState::new(self.to_app_config(), store)
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "staff".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn staff(email: &str) -> Self {
        Self::new(email, "staff")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let subject = TokenSubject {
            id: &user.id,
            email: Some(&user.email),
            role: &user.role,
            name: None,
        };
        issue_token(&subject, secret, Duration::hours(exp_hours.unwrap_or(24)))
            .expect("test secret is never empty")
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::validate_token;

    #[test]
    fn test_config_creation() {
        let config = TestConfig::default();
        let app_config = config.to_app_config();

        assert_eq!(app_config.supabase_url, "http://localhost:54321");
        assert_eq!(app_config.supabase_anon_key, "test-anon-key");
        assert!(!app_config.supabase_jwt_secret.is_empty());
    }

    #[test]
    fn test_user_creation() {
        let user = TestUser::admin("desk@example.com");
        assert_eq!(user.email, "desk@example.com");
        assert_eq!(user.role, "admin");
        assert!(user.to_user().is_admin());
    }

    #[test]
    fn test_token_validates_with_same_secret() {
        let config = TestConfig::default();
        let user = TestUser::staff("staff@example.com");
        let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, None);

        let validated = validate_token(&token, &config.jwt_secret).unwrap();
        assert_eq!(validated.id, user.id);
        assert_eq!(validated.role.as_deref(), Some("staff"));
    }

    #[test]
    fn test_invalid_tokens_are_rejected() {
        let config = TestConfig::default();
        let user = TestUser::default();

        assert!(validate_token(&JwtTestUtils::create_expired_token(&user, &config.jwt_secret), &config.jwt_secret).is_err());
        assert!(validate_token(&JwtTestUtils::create_invalid_signature_token(&user), &config.jwt_secret).is_err());
        assert!(validate_token(&JwtTestUtils::create_malformed_token(), &config.jwt_secret).is_err());
    }
}
