use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::{matches_all, Filter, RecordStore};

/// Unique key over `columns`, optionally restricted to rows matching
/// `condition` (a partial index).
#[derive(Debug, Clone)]
pub struct UniqueConstraint {
    pub table: String,
    pub columns: Vec<String>,
    pub condition: Option<Filter>,
}

impl UniqueConstraint {
    pub fn new(table: &str, columns: &[&str]) -> Self {
        Self {
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            condition: None,
        }
    }

    pub fn when(mut self, condition: Filter) -> Self {
        self.condition = Some(condition);
        self
    }

    fn applies_to(&self, row: &Value) -> bool {
        self.condition.as_ref().map_or(true, |c| c.matches(row))
    }

    /// Key of the row, or `None` when any key column is null (SQL unique
    /// indexes never collide on nulls).
    fn key<'a>(&self, row: &'a Value) -> Option<Vec<&'a Value>> {
        self.columns
            .iter()
            .map(|c| row.get(c).filter(|v| !v.is_null()))
            .collect()
    }

    fn describe(&self) -> String {
        format!("{}({})", self.table, self.columns.join(", "))
    }
}

/// Process-local [`RecordStore`] for tests and local runs.
///
/// Every write runs under one lock, so unique constraints are checked and
/// applied atomically, the same guarantee a database index gives.
#[derive(Default)]
pub struct InMemoryRecordStore {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    constraints: Vec<UniqueConstraint>,
    unavailable: AtomicBool,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_constraint(mut self, constraint: UniqueConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        if let Ok(mut tables) = self.tables.lock() {
            tables.entry(table.to_string()).or_default().extend(rows);
        }
    }

    /// Snapshot of every row in `table`.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .lock()
            .map(|tables| tables.get(table).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Simulate an outage: every subsequent call fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<Value>>>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store marked unavailable".to_string()));
        }
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }

    /// Check `candidate` (to be stored at `position`, or appended when `None`)
    /// against every constraint of `table`.
    fn check_constraints(
        &self,
        table: &str,
        rows: &[Value],
        candidate: &Value,
        position: Option<usize>,
    ) -> Result<(), StoreError> {
        for constraint in self.constraints.iter().filter(|c| c.table == table) {
            if !constraint.applies_to(candidate) {
                continue;
            }
            let Some(key) = constraint.key(candidate) else {
                continue;
            };

            let clash = rows.iter().enumerate().any(|(index, other)| {
                Some(index) != position
                    && constraint.applies_to(other)
                    && constraint.key(other).as_ref() == Some(&key)
            });

            if clash {
                warn!("Unique constraint {} rejected write", constraint.describe());
                return Err(StoreError::UniqueViolation(constraint.describe()));
            }
        }
        Ok(())
    }
}

fn merge(row: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(changes)) = (row, patch) {
        for (key, value) in changes {
            target.insert(key.clone(), value.clone());
        }
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn query(&self, table: &str, filters: &[Filter]) -> Result<Vec<Value>, StoreError> {
        let tables = self.lock()?;
        let rows = tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches_all(filters, row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value, StoreError> {
        if !row.is_object() {
            return Err(StoreError::Rejected {
                status: 400,
                message: "row must be a JSON object".to_string(),
            });
        }

        let mut tables = self.lock()?;
        let rows = tables.entry(table.to_string()).or_default();
        self.check_constraints(table, rows, &row, None)?;
        rows.push(row.clone());
        debug!("Inserted row into {} ({} rows)", table, rows.len());
        Ok(row)
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Value,
    ) -> Result<Vec<Value>, StoreError> {
        let mut tables = self.lock()?;
        let Some(rows) = tables.get_mut(table) else {
            return Ok(Vec::new());
        };

        let targets: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, row)| matches_all(filters, row))
            .map(|(index, _)| index)
            .collect();

        // Stage the whole update first so a violation leaves the table untouched.
        let mut staged = rows.clone();
        for &index in &targets {
            merge(&mut staged[index], &patch);
        }
        for &index in &targets {
            self.check_constraints(table, &staged, &staged[index], Some(index))?;
        }

        let updated = targets.iter().map(|&index| staged[index].clone()).collect();
        *rows = staged;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn slot_store() -> InMemoryRecordStore {
        InMemoryRecordStore::new().with_constraint(
            UniqueConstraint::new("appointments", &["date", "time"])
                .when(Filter::eq("active", true)),
        )
    }

    #[tokio::test]
    async fn partial_unique_constraint_rejects_second_active_row() {
        let store = slot_store();
        store
            .insert("appointments", json!({ "id": "a", "date": "2024-06-10", "time": "09:00:00", "active": true }))
            .await
            .unwrap();

        let err = store
            .insert("appointments", json!({ "id": "b", "date": "2024-06-10", "time": "09:00:00", "active": true }))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(store.rows("appointments").len(), 1);
    }

    #[tokio::test]
    async fn inactive_rows_do_not_hold_the_key() {
        let store = slot_store();
        store.seed(
            "appointments",
            vec![json!({ "id": "a", "date": "2024-06-10", "time": "09:00:00", "active": false })],
        );

        store
            .insert("appointments", json!({ "id": "b", "date": "2024-06-10", "time": "09:00:00", "active": true }))
            .await
            .unwrap();
        assert_eq!(store.rows("appointments").len(), 2);
    }

    #[tokio::test]
    async fn update_into_taken_key_is_rejected_atomically() {
        let store = slot_store();
        store.seed(
            "appointments",
            vec![
                json!({ "id": "a", "date": "2024-06-10", "time": "09:00:00", "active": true }),
                json!({ "id": "b", "date": "2024-06-10", "time": "09:30:00", "active": true }),
            ],
        );

        let err = store
            .update("appointments", &[Filter::eq("id", "b")], json!({ "time": "09:00:00" }))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());

        let rows = store.query("appointments", &[Filter::eq("id", "b")]).await.unwrap();
        assert_eq!(rows[0]["time"], "09:30:00");
    }

    #[tokio::test]
    async fn update_of_own_row_keeps_key() {
        let store = slot_store();
        store.seed(
            "appointments",
            vec![json!({ "id": "a", "date": "2024-06-10", "time": "09:00:00", "active": true, "status": "confirmed" })],
        );

        let updated = store
            .update("appointments", &[Filter::eq("id", "a")], json!({ "status": "checked-in" }))
            .await
            .unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["status"], "checked-in");
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = slot_store();
        store.set_unavailable(true);
        let err = store.query("appointments", &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
