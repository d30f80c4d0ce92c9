//! Database module for tokengate
//!
//! PostgreSQL connectivity and repositories, using SQLx.

pub mod pool;
pub mod repositories;

pub use pool::{DbConfig, DbError, create_pool_with_migrations};
pub use repositories::RefreshCredentialRepository;
