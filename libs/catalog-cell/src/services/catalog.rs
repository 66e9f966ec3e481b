use std::collections::BTreeSet;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use shared_database::{Filter, RecordStore};

use crate::models::{
    CatalogError, Insurer, InsurerRecord, InsurerScope, Service, ServiceRecord, Specialty,
    SpecialtyRecord, INSURERS_TABLE, SERVICES_TABLE, SPECIALTIES_TABLE,
};

pub struct CatalogService {
    store: Arc<dyn RecordStore>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn list_insurers(&self) -> Result<Vec<Insurer>, CatalogError> {
        debug!("Listing insurers");
        let rows = self.store.query(INSURERS_TABLE, &[]).await?;
        let mut insurers: Vec<Insurer> = decode_rows::<InsurerRecord>(rows)
            .into_iter()
            .filter_map(InsurerRecord::normalize)
            .collect();
        insurers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(insurers)
    }

    /// Specialties a patient can pick under `scope`: every specialty for
    /// [`InsurerScope::Any`], otherwise those with at least one service in scope.
    pub async fn list_specialties(&self, scope: InsurerScope) -> Result<Vec<Specialty>, CatalogError> {
        debug!("Listing specialties for {:?}", scope);

        let filters = match scope {
            InsurerScope::Any => Vec::new(),
            _ => {
                let services = self.list_services(None, scope).await?;
                let ids: BTreeSet<i64> = services.iter().map(|s| s.specialty_id).collect();
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                vec![Filter::is_in("id", ids)]
            }
        };

        let rows = self.store.query(SPECIALTIES_TABLE, &filters).await?;
        let mut specialties: Vec<Specialty> = decode_rows::<SpecialtyRecord>(rows)
            .into_iter()
            .filter_map(SpecialtyRecord::normalize)
            .collect();
        specialties.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(specialties)
    }

    /// Services of a specialty (all specialties when `None` or `0`) under `scope`.
    pub async fn list_services(
        &self,
        specialty_id: Option<i64>,
        scope: InsurerScope,
    ) -> Result<Vec<Service>, CatalogError> {
        let mut filters = scope.service_filters();
        if let Some(id) = specialty_id.filter(|id| *id > 0) {
            filters.push(Filter::eq("specialty_id", id));
        }

        let rows = self.store.query(SERVICES_TABLE, &filters).await?;
        let mut services = normalize_services(rows);
        services.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("Found {} services for {:?}", services.len(), scope);
        Ok(services)
    }

    pub async fn get_service(&self, id: i64) -> Result<Option<Service>, CatalogError> {
        let rows = self.store.query(SERVICES_TABLE, &[Filter::eq("id", id)]).await?;
        Ok(normalize_services(rows).into_iter().next())
    }

    pub async fn services_by_ids(&self, ids: &[i64]) -> Result<Vec<Service>, CatalogError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .store
            .query(SERVICES_TABLE, &[Filter::is_in("id", ids.iter().copied())])
            .await?;
        Ok(normalize_services(rows))
    }

    pub async fn insurers_by_ids(&self, ids: &[i64]) -> Result<Vec<Insurer>, CatalogError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .store
            .query(INSURERS_TABLE, &[Filter::is_in("id", ids.iter().copied())])
            .await?;
        Ok(decode_rows::<InsurerRecord>(rows)
            .into_iter()
            .filter_map(InsurerRecord::normalize)
            .collect())
    }
}

fn normalize_services(rows: Vec<Value>) -> Vec<Service> {
    decode_rows::<ServiceRecord>(rows)
        .into_iter()
        .filter_map(ServiceRecord::normalize)
        .collect()
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value(row) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping malformed catalog row: {}", e);
                None
            }
        })
        .collect()
}
