use serde::{Deserialize, Serialize};
use tracing::warn;

use shared_database::{Filter, StoreError};
use shared_models::error::AppError;

pub const INSURERS_TABLE: &str = "insurers";
pub const SPECIALTIES_TABLE: &str = "specialties";
pub const SERVICES_TABLE: &str = "services";

/// Label shown for appointments and services with no insurer.
pub const PRIVATE_INSURER_LABEL: &str = "Private";
pub const DEFAULT_SERVICE_DURATION_MINUTES: u32 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insurer {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specialty {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub price: f64,
    pub duration_minutes: u32,
    pub specialty_id: i64,
    /// `None` for private-patient services.
    pub insurer_id: Option<i64>,
}

impl Service {
    pub fn is_private(&self) -> bool {
        self.insurer_id.is_none()
    }

    /// Whether a patient choosing `scope` may book this service.
    pub fn is_offered_under(&self, scope: InsurerScope) -> bool {
        match scope {
            InsurerScope::Any => true,
            InsurerScope::PrivateOnly => self.is_private(),
            InsurerScope::Insurer(id) => self.insurer_id.map_or(true, |own| own == id),
        }
    }
}

/// Which services a patient may pick from, given their insurer choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsurerScope {
    #[default]
    Any,
    /// Private patients: services with no insurer.
    PrivateOnly,
    /// An insurer's own services plus the private ones.
    Insurer(i64),
}

impl InsurerScope {
    pub fn from_params(insurer: Option<i64>, private: bool) -> Self {
        match (insurer, private) {
            (_, true) => InsurerScope::PrivateOnly,
            (Some(id), false) => InsurerScope::Insurer(id),
            (None, false) => InsurerScope::Any,
        }
    }

    pub fn service_filters(&self) -> Vec<Filter> {
        match self {
            InsurerScope::Any => Vec::new(),
            InsurerScope::PrivateOnly => vec![Filter::is_null("insurer_id")],
            InsurerScope::Insurer(id) => vec![Filter::any_of(vec![
                Filter::eq("insurer_id", *id),
                Filter::is_null("insurer_id"),
            ])],
        }
    }
}

// Rows as they come out of the store. Every column is optional so a
// half-filled catalog row degrades to defaults instead of failing a listing.

#[derive(Debug, Clone, Deserialize)]
pub struct InsurerRecord {
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpecialtyRecord {
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceRecord {
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub specialty_id: Option<i64>,
    #[serde(default)]
    pub insurer_id: Option<i64>,
}

fn label(name: Option<String>, fallback: &str) -> String {
    name.map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

impl InsurerRecord {
    pub fn normalize(self) -> Option<Insurer> {
        let Some(id) = self.id else {
            warn!("Skipping insurer row without id");
            return None;
        };
        Some(Insurer {
            id,
            name: label(self.name, "Unnamed insurer"),
        })
    }
}

impl SpecialtyRecord {
    pub fn normalize(self) -> Option<Specialty> {
        let Some(id) = self.id else {
            warn!("Skipping specialty row without id");
            return None;
        };
        Some(Specialty {
            id,
            name: label(self.name, "Unnamed specialty"),
        })
    }
}

impl ServiceRecord {
    pub fn normalize(self) -> Option<Service> {
        let (Some(id), Some(specialty_id)) = (self.id, self.specialty_id) else {
            warn!("Skipping service row without id or specialty: {:?}", self.id);
            return None;
        };
        Some(Service {
            id,
            name: label(self.name, "Unnamed service"),
            price: self.price.unwrap_or(0.0),
            duration_minutes: self
                .duration_minutes
                .filter(|d| *d > 0)
                .unwrap_or(DEFAULT_SERVICE_DURATION_MINUTES),
            specialty_id,
            insurer_id: self.insurer_id,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CatalogQuery {
    pub insurer: Option<i64>,
    pub specialty: Option<i64>,
    #[serde(default)]
    pub private: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CatalogError {
    #[error("Catalog unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Catalog error: {0}")]
    DatabaseError(String),
}

impl From<StoreError> for CatalogError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(message) => CatalogError::StoreUnavailable(message),
            other => CatalogError::DatabaseError(other.to_string()),
        }
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::StoreUnavailable(message) => AppError::ServiceUnavailable(message),
            CatalogError::DatabaseError(message) => AppError::Internal(message),
        }
    }
}
