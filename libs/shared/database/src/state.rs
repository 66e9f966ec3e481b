use std::sync::Arc;

use shared_config::AppConfig;

use crate::store::RecordStore;
use crate::supabase::SupabaseRecordStore;

/// Application-wide dependencies handed to every cell router.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn RecordStore>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn RecordStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
        }
    }

    /// Wire the Supabase-backed store from configuration.
    pub fn from_config(config: AppConfig) -> Self {
        let store: Arc<dyn RecordStore> = Arc::new(SupabaseRecordStore::new(&config));
        Self::new(config, store)
    }
}
