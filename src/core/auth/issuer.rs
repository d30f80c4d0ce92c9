//! Credential issuance
//!
//! Creates a fresh access token and refresh credential for a subject. Only the
//! bcrypt hash of the refresh credential is persisted; the access token is
//! never stored.

use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::auth::credential::{CredentialHasher, generate_refresh_credential};
use crate::core::auth::jwt::JwtService;
use crate::core::auth::service::AuthError;
use crate::core::auth::store::{RefreshCredentialStore, StoredCredential};

/// Longest accepted subject identity, in bytes
const MAX_SUBJECT_ID_LEN: usize = 255;

/// Credentials handed to a client at issuance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCredentials {
    /// Access token (short-lived)
    pub access_token: String,
    /// Refresh credential (long-lived, opaque)
    pub refresh_token: String,
    /// Access token expiration (Unix timestamp)
    pub access_expires_at: i64,
    /// Token type (always "Bearer")
    pub token_type: String,
}

/// Issues access token / refresh credential pairs
#[derive(Clone)]
pub struct CredentialIssuer {
    jwt_service: JwtService,
    hasher: CredentialHasher,
    store: Arc<dyn RefreshCredentialStore>,
}

impl CredentialIssuer {
    /// Create a new issuer
    pub fn new(
        jwt_service: JwtService,
        hasher: CredentialHasher,
        store: Arc<dyn RefreshCredentialStore>,
    ) -> Self {
        Self {
            jwt_service,
            hasher,
            store,
        }
    }

    /// Validate subject identity format
    pub fn validate_subject_id(subject_id: &str) -> Result<(), AuthError> {
        if subject_id.trim().is_empty() {
            return Err(AuthError::InvalidInput("user_id is required".to_string()));
        }

        if subject_id.len() > MAX_SUBJECT_ID_LEN {
            return Err(AuthError::InvalidInput(format!(
                "user_id must be at most {} bytes",
                MAX_SUBJECT_ID_LEN
            )));
        }

        if subject_id.chars().any(char::is_control) {
            return Err(AuthError::InvalidInput(
                "user_id must not contain control characters".to_string(),
            ));
        }

        Ok(())
    }

    /// Issue credentials for a subject connecting from `address`.
    ///
    /// A stored hash for the subject is replaced, which invalidates any
    /// refresh credential issued to it before.
    pub async fn issue(
        &self,
        subject_id: &str,
        address: IpAddr,
    ) -> Result<IssuedCredentials, AuthError> {
        Self::validate_subject_id(subject_id)?;

        // Sign first: if it fails nothing has been written yet
        let (access_token, access_expires_at) = self
            .jwt_service
            .generate_access_token(subject_id, address)
            .inspect_err(|e| tracing::error!(error = %e, "Access token signing failed"))?;

        let refresh_token = generate_refresh_credential(subject_id);
        let credential_hash = self
            .hasher
            .hash(&refresh_token)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Refresh credential hashing failed"))?;

        self.store
            .store(subject_id, StoredCredential::new(credential_hash))
            .await
            .inspect_err(|e| {
                tracing::error!(subject = %subject_id, error = %e, "Failed to persist refresh credential")
            })?;

        tracing::info!(subject = %subject_id, %address, "Issued session credentials");

        Ok(IssuedCredentials {
            access_token,
            refresh_token,
            access_expires_at,
            token_type: "Bearer".to_string(),
        })
    }
}
