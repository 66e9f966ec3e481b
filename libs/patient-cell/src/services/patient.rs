use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use shared_database::{Filter, RecordStore, StoreError};
use shared_models::validation::FieldError;

use crate::models::{Patient, PatientData, PatientError, PATIENTS_TABLE};

pub const SEARCH_LIMIT: usize = 10;

pub struct PatientService {
    store: Arc<dyn RecordStore>,
}

impl PatientService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn get_by_document(&self, document_number: &str) -> Result<Option<Patient>, PatientError> {
        let document = document_number.trim().to_uppercase();
        debug!("Looking up patient by document {}", document);

        let rows = self
            .store
            .query(PATIENTS_TABLE, &[Filter::eq("document_number", document.as_str())])
            .await?;

        rows.into_iter().next().map(parse_patient).transpose()
    }

    /// Patients for a set of document numbers, used to label appointment lists.
    pub async fn find_many(&self, documents: &[String]) -> Result<Vec<Patient>, PatientError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self
            .store
            .query(PATIENTS_TABLE, &[Filter::is_in("document_number", documents.iter().map(String::as_str))])
            .await?;

        rows.into_iter().map(parse_patient).collect()
    }

    /// Case-insensitive substring search over document number and name.
    pub async fn search(&self, term: &str) -> Result<Vec<Patient>, PatientError> {
        let term = sanitize_term(term);
        let Some(first_word) = term.split_whitespace().next() else {
            return Ok(Vec::new());
        };
        debug!("Searching patients for '{}'", term);

        let filter = Filter::any_of(vec![
            Filter::contains("document_number", first_word),
            Filter::contains("first_name", first_word),
            Filter::contains("last_name", first_word),
        ]);
        let rows = self.store.query(PATIENTS_TABLE, &[filter]).await?;

        let needle = term.to_lowercase();
        let mut patients = rows
            .into_iter()
            .map(parse_patient)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|p| {
                p.document_number.to_lowercase().contains(&needle)
                    || p.full_name().to_lowercase().contains(&needle)
            })
            .collect::<Vec<_>>();

        patients.sort_by(|a, b| {
            a.last_name
                .cmp(&b.last_name)
                .then_with(|| a.first_name.cmp(&b.first_name))
        });
        patients.truncate(SEARCH_LIMIT);
        Ok(patients)
    }

    pub async fn create(&self, data: &PatientData) -> Result<Patient, PatientError> {
        let errors = identity_errors(data);
        if !errors.is_empty() {
            return Err(PatientError::Validation(errors));
        }

        let document = data.normalized_document();
        let row = json!({
            "document_number": document,
            "document_type": data.document_type,
            "first_name": data.first_name.trim(),
            "last_name": data.last_name.trim(),
            "email": non_blank(&data.email),
            "phone": non_blank(&data.phone),
            "address": non_blank(&data.address),
            "created_at": Utc::now().to_rfc3339(),
        });

        let stored = self.store.insert(PATIENTS_TABLE, row).await.map_err(|e| match e {
            StoreError::UniqueViolation(_) => PatientError::AlreadyExists(document.clone()),
            other => PatientError::from(other),
        })?;

        let patient = parse_patient(stored)?;
        info!("Registered patient {}", patient.document_number);
        Ok(patient)
    }

    /// Return the patient with this document number, registering them first
    /// when absent. Never creates a second record for the same document.
    pub async fn ensure_exists(&self, data: &PatientData) -> Result<Patient, PatientError> {
        if let Some(existing) = self.get_by_document(&data.document_number).await? {
            debug!("Patient {} already registered", existing.document_number);
            return Ok(existing);
        }

        match self.create(data).await {
            Err(PatientError::AlreadyExists(document)) => {
                warn!("Patient {} registered concurrently, re-reading", document);
                self.get_by_document(&document)
                    .await?
                    .ok_or(PatientError::NotFound)
            }
            other => other,
        }
    }
}

/// The minimum needed to register someone: who they are.
pub fn identity_errors(data: &PatientData) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if data.document_number.trim().is_empty() {
        errors.push(FieldError::new("document_number", "Required field"));
    }
    if data.first_name.trim().is_empty() {
        errors.push(FieldError::new("first_name", "Required field"));
    }
    if data.last_name.trim().is_empty() {
        errors.push(FieldError::new("last_name", "Required field"));
    }
    errors
}

fn parse_patient(row: Value) -> Result<Patient, PatientError> {
    serde_json::from_value(row).map_err(|e| PatientError::DatabaseError(e.to_string()))
}

fn non_blank(value: &str) -> Value {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Value::Null
    } else {
        Value::String(trimmed.to_string())
    }
}

// PostgREST reserves these inside `or=(...)` expressions.
fn sanitize_term(term: &str) -> String {
    term.chars()
        .filter(|c| !matches!(c, ',' | '(' | ')' | '*' | '"'))
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use shared_database::{InMemoryRecordStore, UniqueConstraint};

    fn store() -> Arc<InMemoryRecordStore> {
        Arc::new(
            InMemoryRecordStore::new()
                .with_constraint(UniqueConstraint::new(PATIENTS_TABLE, &["document_number"])),
        )
    }

    fn data(document: &str, first: &str, last: &str) -> PatientData {
        PatientData {
            first_name: first.to_string(),
            last_name: last.to_string(),
            document_number: document.to_string(),
            ..PatientData::default()
        }
    }

    #[tokio::test]
    async fn ensure_exists_registers_once() {
        let store = store();
        let service = PatientService::new(store.clone());

        let first = service.ensure_exists(&data("12345678z", "Ana", "López")).await.unwrap();
        let second = service.ensure_exists(&data("12345678Z", "Ana María", "López")).await.unwrap();

        assert_eq!(first.document_number, "12345678Z");
        assert_eq!(second.first_name, "Ana");
        assert_eq!(store.rows(PATIENTS_TABLE).len(), 1);
    }

    #[tokio::test]
    async fn create_requires_identity() {
        let service = PatientService::new(store());
        let err = service.create(&data("", "", "López")).await.unwrap_err();
        assert_matches!(err, PatientError::Validation(fields) if fields.len() == 2);
    }

    #[tokio::test]
    async fn create_reports_duplicates() {
        let service = PatientService::new(store());
        service.create(&data("12345678Z", "Ana", "López")).await.unwrap();
        let err = service.create(&data("12345678Z", "Ana", "López")).await.unwrap_err();
        assert_matches!(err, PatientError::AlreadyExists(doc) if doc == "12345678Z");
    }

    #[tokio::test]
    async fn search_matches_name_or_document() {
        let service = PatientService::new(store());
        service.create(&data("12345678Z", "Ana", "López")).await.unwrap();
        service.create(&data("X1234567L", "Pedro", "Sánchez")).await.unwrap();

        let by_name = service.search("lóp").await.unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].first_name, "Ana");

        let by_document = service.search("x123").await.unwrap();
        assert_eq!(by_document[0].last_name, "Sánchez");

        let full_name = service.search("pedro sánchez").await.unwrap();
        assert_eq!(full_name.len(), 1);

        assert!(service.search("   ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_is_capped() {
        let service = PatientService::new(store());
        for i in 0..15 {
            service
                .create(&data(&format!("{:08}A", i), "Paciente", &format!("García {:02}", i)))
                .await
                .unwrap();
        }
        assert_eq!(service.search("garcía").await.unwrap().len(), SEARCH_LIMIT);
    }

    #[tokio::test]
    async fn store_outage_is_reported() {
        let store = store();
        store.set_unavailable(true);
        let service = PatientService::new(store);
        let err = service.get_by_document("12345678Z").await.unwrap_err();
        assert_matches!(err, PatientError::StoreUnavailable(_));
    }
}
