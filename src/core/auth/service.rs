//! Authentication service
//!
//! Entry point for the token endpoints. Wires the JWT service, credential
//! hasher, credential store and address-change notifier into a
//! [`CredentialIssuer`] and a [`RefreshProtocol`], and owns the error
//! taxonomy every auth operation reports through.

use std::net::IpAddr;
use std::sync::Arc;

use crate::core::auth::credential::{CredentialError, CredentialHasher, CredentialPolicy};
use crate::core::auth::issuer::{CredentialIssuer, IssuedCredentials};
use crate::core::auth::jwt::{AccessClaims, JwtError, JwtService};
use crate::core::auth::notify::AddressChangeNotifier;
use crate::core::auth::refresh::{RefreshProtocol, RefreshedCredentials};
use crate::core::auth::store::{RefreshCredentialStore, StoreError};

/// Authentication error types
///
/// `Unauthorized` carries no detail. A forged token looks the same as an
/// expired one, and a wrong refresh credential the same as a missing one.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::InvalidToken => AuthError::Unauthorized,
            _ => AuthError::InternalError(err.to_string()),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::InternalError(err.to_string())
    }
}

impl From<CredentialError> for AuthError {
    fn from(err: CredentialError) -> Self {
        AuthError::InternalError(err.to_string())
    }
}

/// Token issuance request
#[derive(Debug, Clone, serde::Deserialize)]
pub struct IssueRequest {
    pub user_id: String,
}

/// Token refresh request
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RefreshRequest {
    pub access_token: String,
    pub refresh_token: String,
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    issuer: CredentialIssuer,
    refresh: RefreshProtocol,
    jwt_service: JwtService,
}

impl AuthService {
    /// Create a new authentication service
    pub fn new(
        jwt_service: JwtService,
        store: Arc<dyn RefreshCredentialStore>,
        notifier: Arc<dyn AddressChangeNotifier>,
        policy: CredentialPolicy,
    ) -> Result<Self, AuthError> {
        let hasher = CredentialHasher::new(policy.bcrypt_cost)?;

        let issuer = CredentialIssuer::new(jwt_service.clone(), hasher.clone(), store.clone());
        let refresh = RefreshProtocol::new(jwt_service.clone(), hasher, store, notifier, policy);

        Ok(Self {
            issuer,
            refresh,
            jwt_service,
        })
    }

    /// Issue an access token and refresh credential for a subject
    pub async fn issue(
        &self,
        subject_id: &str,
        address: IpAddr,
    ) -> Result<IssuedCredentials, AuthError> {
        self.issuer.issue(subject_id, address).await
    }

    /// Exchange a refresh credential for a new access token
    pub async fn refresh(
        &self,
        request: RefreshRequest,
        address: IpAddr,
    ) -> Result<RefreshedCredentials, AuthError> {
        self.refresh
            .refresh(&request.access_token, &request.refresh_token, address)
            .await
    }

    /// Validate an access token and return its claims
    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, AuthError> {
        Ok(self.jwt_service.validate_access_token(token)?)
    }
}
