//! Refresh credential repository
//!
//! PostgreSQL implementation of [`RefreshCredentialStore`]. One row per
//! subject in `refresh_credentials`; storing for an existing subject is an
//! upsert, so the newest credential always wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::core::auth::store::{RefreshCredentialStore, StoreError, StoredCredential};

/// Row in `refresh_credentials`
#[derive(Debug, Clone, FromRow)]
pub struct RefreshCredentialRow {
    pub subject_id: String,
    pub credential_hash: String,
    pub issued_at: DateTime<Utc>,
}

impl From<RefreshCredentialRow> for StoredCredential {
    fn from(row: RefreshCredentialRow) -> Self {
        Self {
            credential_hash: row.credential_hash,
            issued_at: row.issued_at,
        }
    }
}

/// Refresh credential repository for database operations
#[derive(Clone)]
pub struct RefreshCredentialRepository {
    pool: PgPool,
}

impl RefreshCredentialRepository {
    /// Create a new repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshCredentialStore for RefreshCredentialRepository {
    async fn store(&self, subject_id: &str, record: StoredCredential) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_credentials (subject_id, credential_hash, issued_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (subject_id)
            DO UPDATE SET credential_hash = EXCLUDED.credential_hash,
                          issued_at = EXCLUDED.issued_at
            "#,
        )
        .bind(subject_id)
        .bind(&record.credential_hash)
        .bind(record.issued_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn lookup(&self, subject_id: &str) -> Result<Option<StoredCredential>, StoreError> {
        let row = sqlx::query_as::<_, RefreshCredentialRow>(
            r#"
            SELECT subject_id, credential_hash, issued_at
            FROM refresh_credentials
            WHERE subject_id = $1
            "#,
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn compare_and_swap(
        &self,
        subject_id: &str,
        expected_hash: &str,
        record: StoredCredential,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_credentials
            SET credential_hash = $3, issued_at = $4
            WHERE subject_id = $1 AND credential_hash = $2
            "#,
        )
        .bind(subject_id)
        .bind(expected_hash)
        .bind(&record.credential_hash)
        .bind(record.issued_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_row_into_stored_credential() {
        let issued_at = Utc::now();
        let row = RefreshCredentialRow {
            subject_id: "u1".to_string(),
            credential_hash: "$2b$04$hash".to_string(),
            issued_at,
        };

        let stored: StoredCredential = row.into();
        assert_eq!(stored.credential_hash, "$2b$04$hash");
        assert_eq!(stored.issued_at, issued_at);
    }

    // ========================================================================
    // Integration Tests (require database)
    // ========================================================================

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_store_and_lookup() {
        let (pool, subject) = setup().await;
        let repo = RefreshCredentialRepository::new(pool.clone());

        repo.store(&subject, StoredCredential::new("hash-1"))
            .await
            .unwrap();

        let found = repo.lookup(&subject).await.unwrap().unwrap();
        assert_eq!(found.credential_hash, "hash-1");

        cleanup(&pool, &subject).await;
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_lookup_not_found() {
        let (pool, subject) = setup().await;
        let repo = RefreshCredentialRepository::new(pool);

        let found = repo.lookup(&subject).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_store_overwrites() {
        let (pool, subject) = setup().await;
        let repo = RefreshCredentialRepository::new(pool.clone());

        repo.store(&subject, StoredCredential::new("hash-1"))
            .await
            .unwrap();
        repo.store(&subject, StoredCredential::new("hash-2"))
            .await
            .unwrap();

        let found = repo.lookup(&subject).await.unwrap().unwrap();
        assert_eq!(found.credential_hash, "hash-2");

        let rows: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM refresh_credentials WHERE subject_id = $1")
                .bind(&subject)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(rows.0, 1);

        cleanup(&pool, &subject).await;
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_compare_and_swap() {
        let (pool, subject) = setup().await;
        let repo = RefreshCredentialRepository::new(pool.clone());

        repo.store(&subject, StoredCredential::new("hash-1"))
            .await
            .unwrap();

        let stale = repo
            .compare_and_swap(&subject, "hash-0", StoredCredential::new("hash-x"))
            .await
            .unwrap();
        assert!(!stale);

        let swapped = repo
            .compare_and_swap(&subject, "hash-1", StoredCredential::new("hash-2"))
            .await
            .unwrap();
        assert!(swapped);

        let found = repo.lookup(&subject).await.unwrap().unwrap();
        assert_eq!(found.credential_hash, "hash-2");

        cleanup(&pool, &subject).await;
    }

    // Helper functions for integration tests
    async fn setup() -> (PgPool, String) {
        use crate::core::db::pool::{DbConfig, create_pool_with_migrations};

        let config = DbConfig::from_env().expect("DATABASE_URL must be set for tests");
        let pool = create_pool_with_migrations(&config)
            .await
            .expect("Failed to create test pool");

        (pool, format!("repo_test_{}", Uuid::new_v4()))
    }

    async fn cleanup(pool: &PgPool, subject: &str) {
        sqlx::query("DELETE FROM refresh_credentials WHERE subject_id = $1")
            .bind(subject)
            .execute(pool)
            .await
            .expect("Failed to cleanup test credential");
    }
}
