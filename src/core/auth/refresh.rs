//! Refresh exchange
//!
//! A client trades its access token and refresh credential for a new access
//! token. The exchange moves through
//! `Presented → AccessTokenVerified → CredentialVerified → Reissued`, and any
//! gate can end it early. Every rejection reaches the caller as the same
//! [`AuthError::Unauthorized`]; which gate fired is only logged.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::auth::credential::{CredentialHasher, CredentialPolicy, generate_refresh_credential};
use crate::core::auth::jwt::JwtService;
use crate::core::auth::notify::{AddressChangeEvent, AddressChangeNotifier};
use crate::core::auth::service::AuthError;
use crate::core::auth::store::{RefreshCredentialStore, StoredCredential};

/// Gate that turned a refresh down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshGate {
    /// Access token failed signature, key, issuer or expiry checks
    AccessToken,
    /// No stored credential for the subject
    Lookup,
    /// Presented credential does not match the stored hash
    Credential,
    /// Stored credential is older than the configured maximum age
    CredentialExpired,
    /// A concurrent refresh rotated the credential first
    Rotation,
}

impl fmt::Display for RefreshGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshGate::AccessToken => write!(f, "access_token"),
            RefreshGate::Lookup => write!(f, "lookup"),
            RefreshGate::Credential => write!(f, "credential"),
            RefreshGate::CredentialExpired => write!(f, "credential_expired"),
            RefreshGate::Rotation => write!(f, "rotation"),
        }
    }
}

enum RefreshFailure {
    Rejected(RefreshGate),
    Internal(AuthError),
}

fn internal(err: impl Into<AuthError>) -> RefreshFailure {
    RefreshFailure::Internal(err.into())
}

/// Result of a successful refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshedCredentials {
    /// New access token
    pub access_token: String,
    /// Access token expiration (Unix timestamp)
    pub access_expires_at: i64,
    /// Token type (always "Bearer")
    pub token_type: String,
    /// Replacement refresh credential, only present when rotation is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Refresh exchange orchestration
#[derive(Clone)]
pub struct RefreshProtocol {
    jwt_service: JwtService,
    hasher: CredentialHasher,
    store: Arc<dyn RefreshCredentialStore>,
    notifier: Arc<dyn AddressChangeNotifier>,
    policy: CredentialPolicy,
}

impl RefreshProtocol {
    /// Create a new refresh protocol
    pub fn new(
        jwt_service: JwtService,
        hasher: CredentialHasher,
        store: Arc<dyn RefreshCredentialStore>,
        notifier: Arc<dyn AddressChangeNotifier>,
        policy: CredentialPolicy,
    ) -> Self {
        Self {
            jwt_service,
            hasher,
            store,
            notifier,
            policy,
        }
    }

    /// Exchange a refresh credential for a new access token bound to `address`.
    ///
    /// If `address` differs from the one in the presented token the
    /// address-change hook fires once; the refresh still succeeds.
    pub async fn refresh(
        &self,
        access_token: &str,
        refresh_token: &str,
        address: IpAddr,
    ) -> Result<RefreshedCredentials, AuthError> {
        if access_token.is_empty() {
            return Err(AuthError::InvalidInput("access_token is required".to_string()));
        }
        if refresh_token.is_empty() {
            return Err(AuthError::InvalidInput("refresh_token is required".to_string()));
        }

        match self.exchange(access_token, refresh_token, address).await {
            Ok(refreshed) => Ok(refreshed),
            Err(RefreshFailure::Rejected(gate)) => {
                tracing::debug!(%gate, %address, "Refresh rejected");
                Err(AuthError::Unauthorized)
            }
            Err(RefreshFailure::Internal(err)) => {
                tracing::error!(error = %err, "Refresh failed");
                Err(err)
            }
        }
    }

    async fn exchange(
        &self,
        access_token: &str,
        refresh_token: &str,
        address: IpAddr,
    ) -> Result<RefreshedCredentials, RefreshFailure> {
        // Presented -> AccessTokenVerified
        let claims = self
            .jwt_service
            .validate_for_refresh(access_token, self.policy.refresh_grace())
            .map_err(|_| RefreshFailure::Rejected(RefreshGate::AccessToken))?;

        // AccessTokenVerified -> CredentialVerified
        let Some(record) = self.store.lookup(&claims.sub).await.map_err(internal)? else {
            self.hasher
                .verify_decoy(refresh_token)
                .await
                .map_err(internal)?;
            return Err(RefreshFailure::Rejected(RefreshGate::Lookup));
        };

        let matched = self
            .hasher
            .verify(refresh_token, &record.credential_hash)
            .await
            .map_err(internal)?;
        if !matched {
            return Err(RefreshFailure::Rejected(RefreshGate::Credential));
        }

        // A deadline past chrono's range never expires
        let deadline = self
            .policy
            .max_age()
            .and_then(|max_age| record.issued_at.checked_add_signed(max_age));
        if deadline.is_some_and(|deadline| deadline < Utc::now()) {
            return Err(RefreshFailure::Rejected(RefreshGate::CredentialExpired));
        }

        // CredentialVerified -> Reissued
        let (access_token, access_expires_at) = self
            .jwt_service
            .generate_access_token(&claims.sub, address)
            .map_err(internal)?;

        let rotated = if self.policy.rotate_on_refresh {
            let credential = generate_refresh_credential(&claims.sub);
            let credential_hash = self.hasher.hash(&credential).await.map_err(internal)?;
            let swapped = self
                .store
                .compare_and_swap(
                    &claims.sub,
                    &record.credential_hash,
                    StoredCredential::new(credential_hash),
                )
                .await
                .map_err(internal)?;
            if !swapped {
                return Err(RefreshFailure::Rejected(RefreshGate::Rotation));
            }
            Some(credential)
        } else {
            None
        };

        if !claims.is_bound_to(address) {
            self.notifier.address_changed(AddressChangeEvent {
                subject_id: claims.sub.clone(),
                previous_address: claims.ip.clone(),
                current_address: address,
                observed_at: Utc::now(),
            });
        }

        tracing::info!(
            subject = %claims.sub,
            rotated = rotated.is_some(),
            "Access token refreshed"
        );

        Ok(RefreshedCredentials {
            access_token,
            access_expires_at,
            token_type: "Bearer".to_string(),
            refresh_token: rotated,
        })
    }
}
