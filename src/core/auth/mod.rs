//! Session credential module for tokengate
//!
//! This module provides:
//! - JWT access token generation and validation
//! - Refresh credential generation, hashing and storage
//! - Credential issuance and the refresh exchange
//! - REST API endpoints for token operations

pub mod api;
pub mod credential;
pub mod issuer;
pub mod jwt;
pub mod notify;
pub mod refresh;
pub mod service;
pub mod store;

pub use api::{AuthApiState, auth_api_router};
pub use credential::{CredentialHasher, CredentialPolicy, generate_refresh_credential};
pub use issuer::{CredentialIssuer, IssuedCredentials};
pub use jwt::{AccessClaims, JwtConfig, JwtError, JwtService, SigningKeys};
pub use notify::{AddressChangeEvent, AddressChangeNotifier, ChannelNotifier, LogNotifier};
pub use refresh::{RefreshGate, RefreshProtocol, RefreshedCredentials};
pub use service::{AuthError, AuthService, IssueRequest, RefreshRequest};
pub use store::{
    MemoryRefreshCredentialStore, RefreshCredentialStore, StoreError, StoredCredential,
};
