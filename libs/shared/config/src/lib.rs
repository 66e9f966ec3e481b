use std::env;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use tracing::warn;

const DEFAULT_CLINIC_UTC_OFFSET_MINUTES: i32 = 60;
const DEFAULT_STORE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    /// Offset of the clinic's wall clock from UTC, in minutes.
    pub clinic_utc_offset_minutes: i32,
    pub store_timeout_secs: u64,
    pub bind_address: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            clinic_utc_offset_minutes: parse_or_default(
                "CLINIC_UTC_OFFSET_MINUTES",
                DEFAULT_CLINIC_UTC_OFFSET_MINUTES,
            ),
            store_timeout_secs: parse_or_default("STORE_TIMEOUT_SECS", DEFAULT_STORE_TIMEOUT_SECS),
            bind_address: env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string()),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    /// The clinic's local offset. Out-of-range values fall back to UTC.
    pub fn clinic_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.clinic_utc_offset_minutes * 60).unwrap_or_else(|| {
            warn!(
                "CLINIC_UTC_OFFSET_MINUTES={} is out of range, using UTC",
                self.clinic_utc_offset_minutes
            );
            Utc.fix()
        })
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

fn parse_or_default<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_jwt_secret: String::new(),
            clinic_utc_offset_minutes: DEFAULT_CLINIC_UTC_OFFSET_MINUTES,
            store_timeout_secs: DEFAULT_STORE_TIMEOUT_SECS,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clinic_offset_uses_minutes() {
        let config = AppConfig {
            clinic_utc_offset_minutes: 120,
            ..AppConfig::default()
        };
        assert_eq!(config.clinic_offset().local_minus_utc(), 7200);
    }

    #[test]
    fn out_of_range_offset_falls_back_to_utc() {
        let config = AppConfig {
            clinic_utc_offset_minutes: 100_000,
            ..AppConfig::default()
        };
        assert_eq!(config.clinic_offset().local_minus_utc(), 0);
    }

    #[test]
    fn unconfigured_by_default() {
        assert!(!AppConfig::default().is_configured());
    }
}
