pub mod auth;

pub use auth::{hash_password, AuthService};
