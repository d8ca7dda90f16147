//! Registration Server - event sign-ups with Discord notifications.
//!
//! This service accepts player and guard registrations and:
//! - Validates and stores each submission in SQLite
//! - Announces it on a Discord webhook with bounded retries
//! - Keeps an audit row for every webhook attempt
//! - Exposes status lookups and a token-protected admin listing

pub mod api;
pub mod config;
pub mod error;
pub mod notifier;
pub mod service;
pub mod store;

pub use config::Config;
pub use error::ApiError;
pub use notifier::{DeliveryOutcome, Notifier, RetryPolicy};
pub use service::RegistrationService;
pub use store::{Registration, SqliteStore, StoreError};
