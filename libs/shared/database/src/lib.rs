pub mod error;
pub mod memory;
pub mod state;
pub mod store;
pub mod supabase;

pub use error::StoreError;
pub use memory::{InMemoryRecordStore, UniqueConstraint};
pub use state::AppState;
pub use store::{Filter, RecordStore};
pub use supabase::{SupabaseClient, SupabaseRecordStore};
