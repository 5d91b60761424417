//! Directory state for the ipcache server.
//!
//! - [`SqliteStore`]: durable `Registrar`, `AuthorizationType` and
//!   `AuthorizationGrants` tables
//! - [`Registry`]: async facade over the store that keeps an in-memory
//!   mirror of principal to last known IP
//! - [`ActiveDaemons`]: principals with an open, registered connection

pub mod active;
pub mod error;
pub mod registry;
pub mod store;

pub use active::{ActiveDaemons, Claim};
pub use error::StoreError;
pub use registry::Registry;
pub use store::{AuthorizationGrant, AuthorizationType, RegistrarEntry, SqliteStore, UpsertOutcome};
