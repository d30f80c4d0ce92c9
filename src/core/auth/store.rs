//! Refresh credential storage contract
//!
//! The server keeps exactly one record per subject: the bcrypt hash of the
//! refresh credential most recently handed out, plus the time it was issued.
//! Cleartext credentials never reach a store.
//!
//! Two implementations exist: [`MemoryRefreshCredentialStore`] here, and the
//! PostgreSQL-backed repository in `core::db::repositories`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Stored refresh credential for one subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredential {
    /// bcrypt hash of the refresh credential
    pub credential_hash: String,
    /// When the credential was issued
    pub issued_at: DateTime<Utc>,
}

impl StoredCredential {
    /// Create a record issued now
    pub fn new(credential_hash: impl Into<String>) -> Self {
        Self {
            credential_hash: credential_hash.into(),
            issued_at: Utc::now(),
        }
    }
}

/// Store error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// Persistence for hashed refresh credentials, keyed by subject.
///
/// `lookup` returning `None` is the normal "no credential" answer, not an
/// error. Timeouts and retries are the implementation's business; whatever
/// it cannot recover from is surfaced as [`StoreError`].
#[async_trait]
pub trait RefreshCredentialStore: Send + Sync {
    /// Persist the record for a subject, replacing any existing one
    async fn store(&self, subject_id: &str, record: StoredCredential) -> Result<(), StoreError>;

    /// Fetch the current record for a subject
    async fn lookup(&self, subject_id: &str) -> Result<Option<StoredCredential>, StoreError>;

    /// Replace the record only if its hash is still `expected_hash`.
    ///
    /// Returns `false` when the record is missing or was replaced by someone
    /// else in the meantime.
    async fn compare_and_swap(
        &self,
        subject_id: &str,
        expected_hash: &str,
        record: StoredCredential,
    ) -> Result<bool, StoreError>;
}

/// In-process store backed by a concurrent map.
///
/// Used when no database is configured and in tests. Contents are lost on
/// restart, which logs every client out.
#[derive(Debug, Default)]
pub struct MemoryRefreshCredentialStore {
    records: DashMap<String, StoredCredential>,
}

impl MemoryRefreshCredentialStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subjects with a stored credential
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no credential is stored
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RefreshCredentialStore for MemoryRefreshCredentialStore {
    async fn store(&self, subject_id: &str, record: StoredCredential) -> Result<(), StoreError> {
        self.records.insert(subject_id.to_string(), record);
        Ok(())
    }

    async fn lookup(&self, subject_id: &str) -> Result<Option<StoredCredential>, StoreError> {
        Ok(self.records.get(subject_id).map(|r| r.value().clone()))
    }

    async fn compare_and_swap(
        &self,
        subject_id: &str,
        expected_hash: &str,
        record: StoredCredential,
    ) -> Result<bool, StoreError> {
        // The entry guard holds the shard lock, so check and write are atomic
        match self.records.entry(subject_id.to_string()) {
            Entry::Occupied(mut entry) if entry.get().credential_hash == expected_hash => {
                entry.insert(record);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
