//! Database repositories for tokengate
//!
//! Repositories encapsulate data access and implement the storage traits the
//! auth module depends on.

pub mod refresh_credential;

pub use refresh_credential::{RefreshCredentialRepository, RefreshCredentialRow};
