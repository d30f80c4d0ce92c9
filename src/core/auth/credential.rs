//! Refresh credential generation and hashing
//!
//! A refresh credential is 32 bytes of SHA-256 output, hex-encoded. The digest
//! input mixes the subject, the current time and fresh randomness, so two
//! credentials never collide even for the same subject in the same instant.
//! Clients must treat the value as opaque.
//!
//! Credentials are stored as bcrypt hashes. bcrypt is deliberately slow, so
//! hashing and verification are moved onto tokio's blocking pool.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

use crate::core::config::{ConfigError, env_in_range, env_or};

/// Cost factor for bcrypt hashing (12 is recommended for production)
const BCRYPT_COST: u32 = 12;

/// Costs the bcrypt crate accepts
const BCRYPT_COST_RANGE: std::ops::RangeInclusive<u32> = 4..=31;

/// Default maximum age of a refresh credential (7 days)
const REFRESH_CREDENTIAL_MAX_AGE_DAYS: i64 = 7;

/// Longest configurable credential age (10 years)
const MAX_REFRESH_CREDENTIAL_AGE_DAYS: i64 = 3650;

/// Default window after access token expiry in which refresh still works (1 day)
const REFRESH_GRACE_MINUTES: i64 = 24 * 60;

/// Longest configurable refresh grace window (30 days)
const MAX_REFRESH_GRACE_MINUTES: i64 = 30 * 24 * 60;

/// Length of a generated credential (hex of a SHA-256 digest)
pub const CREDENTIAL_LEN: usize = 64;

/// Credential hashing errors
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Hashing error: {0}")]
    HashingError(String),

    #[error("Hashing task failed: {0}")]
    TaskFailed(String),

    #[error("bcrypt cost {0} is outside 4..=31")]
    InvalidCost(u32),
}

impl From<bcrypt::BcryptError> for CredentialError {
    fn from(err: bcrypt::BcryptError) -> Self {
        CredentialError::HashingError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for CredentialError {
    fn from(err: tokio::task::JoinError) -> Self {
        CredentialError::TaskFailed(err.to_string())
    }
}

/// Generate a fresh refresh credential for a subject
pub fn generate_refresh_credential(subject_id: &str) -> String {
    let mut entropy = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut entropy);

    let now = Utc::now();
    let mut hasher = Sha256::new();
    hasher.update(subject_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(now.timestamp().to_be_bytes());
    hasher.update(now.timestamp_subsec_nanos().to_be_bytes());
    hasher.update(entropy);
    hex::encode(hasher.finalize())
}

/// Refresh credential policy
#[derive(Debug, Clone)]
pub struct CredentialPolicy {
    /// bcrypt cost factor
    pub bcrypt_cost: u32,
    /// Issue a new refresh credential on every successful refresh
    pub rotate_on_refresh: bool,
    /// Maximum credential age; `None` means credentials never expire
    pub max_age_days: Option<i64>,
    /// How long after access token expiry a refresh is still accepted
    pub refresh_grace_minutes: i64,
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self {
            bcrypt_cost: BCRYPT_COST,
            rotate_on_refresh: false,
            max_age_days: Some(REFRESH_CREDENTIAL_MAX_AGE_DAYS),
            refresh_grace_minutes: REFRESH_GRACE_MINUTES,
        }
    }
}

impl CredentialPolicy {
    /// Create policy from environment variables.
    ///
    /// Values that do not parse or fall outside their range are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bcrypt_cost =
            env_in_range("REFRESH_BCRYPT_COST", defaults.bcrypt_cost, BCRYPT_COST_RANGE)?;

        let rotate_on_refresh = env_or("REFRESH_ROTATE", defaults.rotate_on_refresh)?;

        // 0 disables the age limit
        let max_age_days = match env_in_range(
            "REFRESH_MAX_AGE_DAYS",
            REFRESH_CREDENTIAL_MAX_AGE_DAYS,
            0..=MAX_REFRESH_CREDENTIAL_AGE_DAYS,
        )? {
            0 => None,
            days => Some(days),
        };

        let refresh_grace_minutes = env_in_range(
            "JWT_REFRESH_GRACE_MINUTES",
            defaults.refresh_grace_minutes,
            0..=MAX_REFRESH_GRACE_MINUTES,
        )?;

        Ok(Self {
            bcrypt_cost,
            rotate_on_refresh,
            max_age_days,
            refresh_grace_minutes,
        })
    }

    /// Set bcrypt cost
    pub fn bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    /// Enable or disable rotation on refresh
    pub fn rotate_on_refresh(mut self, rotate: bool) -> Self {
        self.rotate_on_refresh = rotate;
        self
    }

    /// Set maximum credential age, clamped to 0 ..= 3650 days
    pub fn max_age_days(mut self, days: Option<i64>) -> Self {
        self.max_age_days = days.map(|d| d.clamp(0, MAX_REFRESH_CREDENTIAL_AGE_DAYS));
        self
    }

    /// Set refresh grace window, clamped to 0 ..= 30 days
    pub fn refresh_grace_minutes(mut self, minutes: i64) -> Self {
        self.refresh_grace_minutes = minutes.clamp(0, MAX_REFRESH_GRACE_MINUTES);
        self
    }

    /// Refresh grace window as a duration
    pub fn refresh_grace(&self) -> Duration {
        let minutes = self.refresh_grace_minutes.clamp(0, MAX_REFRESH_GRACE_MINUTES);
        Duration::try_minutes(minutes).unwrap_or_else(Duration::zero)
    }

    /// Maximum credential age as a duration
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_days
            .map(|d| d.clamp(0, MAX_REFRESH_CREDENTIAL_AGE_DAYS))
            .and_then(Duration::try_days)
    }
}

/// bcrypt hashing for refresh credentials
#[derive(Clone)]
pub struct CredentialHasher {
    cost: u32,
    /// Hash of a random value, verified against when a subject has no record
    /// so that path takes as long as a real mismatch. Computed on first use.
    decoy_hash: Arc<OnceCell<String>>,
}

impl CredentialHasher {
    /// Create a hasher with the given bcrypt cost
    pub fn new(cost: u32) -> Result<Self, CredentialError> {
        if !BCRYPT_COST_RANGE.contains(&cost) {
            return Err(CredentialError::InvalidCost(cost));
        }
        Ok(Self {
            cost,
            decoy_hash: Arc::new(OnceCell::new()),
        })
    }

    /// Hash a credential with a fresh salt
    pub async fn hash(&self, credential: &str) -> Result<String, CredentialError> {
        let credential = credential.to_string();
        let cost = self.cost;
        let hash = tokio::task::spawn_blocking(move || bcrypt::hash(credential, cost)).await??;
        Ok(hash)
    }

    /// Verify a presented credential against a stored hash.
    ///
    /// Oversized input never matches; bcrypt would otherwise ignore
    /// everything past 72 bytes.
    pub async fn verify(&self, credential: &str, hash: &str) -> Result<bool, CredentialError> {
        if credential.len() > CREDENTIAL_LEN {
            return Ok(false);
        }
        let credential = credential.to_string();
        let hash = hash.to_string();
        let matched =
            tokio::task::spawn_blocking(move || bcrypt::verify(credential, &hash)).await??;
        Ok(matched)
    }

    /// Burn the same time as [`verify`](Self::verify) without a stored hash
    pub async fn verify_decoy(&self, credential: &str) -> Result<(), CredentialError> {
        let decoy = self
            .decoy_hash
            .get_or_try_init(|| async { self.hash(&generate_refresh_credential("")).await })
            .await?;
        self.verify(credential, decoy).await?;
        Ok(())
    }
}
