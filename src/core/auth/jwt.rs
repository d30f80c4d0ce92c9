//! JWT utilities for access token generation and validation
//!
//! Access tokens are HS512-signed and bound to a subject and the client IP
//! they were issued to. They are short-lived (15 minutes by default).
//! Secrets are held in a [`SigningKeys`] ring addressed by key id (`kid`), so
//! the signing secret can be rotated while tokens signed with a retired key
//! keep verifying until they expire.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::config::{ConfigError, env_in_range};

/// Default access token expiration time (15 minutes)
const ACCESS_TOKEN_EXPIRATION_MINUTES: i64 = 15;

/// Accepted access token lifetimes, in minutes
const ACCESS_TOKEN_EXPIRATION_RANGE: std::ops::RangeInclusive<i64> = 1..=24 * 60;

/// Upper bound for the expiry leeway granted on refresh (30 days)
const MAX_REFRESH_LEEWAY_SECS: i64 = 30 * 24 * 60 * 60;

/// Key id used when `JWT_KEY_ID` is not set
const DEFAULT_KEY_ID: &str = "primary";

const DEFAULT_ISSUER: &str = "tokengate";

/// The only algorithm tokens are signed and accepted with
const SIGNING_ALGORITHM: Algorithm = Algorithm::HS512;

/// HMAC secrets indexed by key id.
///
/// Exactly one key is active and signs new tokens. Retired keys are only used
/// to verify tokens that were signed before a rotation.
#[derive(Clone)]
pub struct SigningKeys {
    active_kid: String,
    active_secret: String,
    retired: HashMap<String, String>,
}

impl SigningKeys {
    /// Create a key ring with a single active key
    pub fn new(kid: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            active_kid: kid.into(),
            active_secret: secret.into(),
            retired: HashMap::new(),
        }
    }

    /// Add a verification-only key
    pub fn with_retired(mut self, kid: impl Into<String>, secret: impl Into<String>) -> Self {
        let kid = kid.into();
        if kid != self.active_kid {
            self.retired.insert(kid, secret.into());
        }
        self
    }

    /// Add retired keys from a `kid:secret,kid:secret` list
    pub fn with_retired_list(mut self, list: &str) -> Result<Self, JwtError> {
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((kid, secret)) = entry
                .split_once(':')
                .filter(|(kid, secret)| !kid.is_empty() && !secret.is_empty())
            else {
                // Report the key id only, the secret part must not end up in logs
                let kid = entry.split(':').next().unwrap_or_default();
                return Err(JwtError::InvalidKeySpec(kid.to_string()));
            };
            self = self.with_retired(kid, secret);
        }
        Ok(self)
    }

    /// Id of the key that signs new tokens
    pub fn active_kid(&self) -> &str {
        &self.active_kid
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        std::iter::once((self.active_kid.as_str(), self.active_secret.as_str())).chain(
            self.retired
                .iter()
                .map(|(kid, secret)| (kid.as_str(), secret.as_str())),
        )
    }
}

impl fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeys")
            .field("active_kid", &self.active_kid)
            .field("retired_kids", &self.retired.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// JWT configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Signing and verification keys
    pub keys: SigningKeys,
    /// Access token expiration in minutes
    pub access_token_expiration_minutes: i64,
    /// Token issuer
    pub issuer: String,
}

impl JwtConfig {
    /// Create a new JWT configuration with a single signing secret
    pub fn new(secret: impl Into<String>) -> Self {
        Self::with_keys(SigningKeys::new(DEFAULT_KEY_ID, secret))
    }

    /// Create a new JWT configuration from a key ring
    pub fn with_keys(keys: SigningKeys) -> Self {
        Self {
            keys,
            access_token_expiration_minutes: ACCESS_TOKEN_EXPIRATION_MINUTES,
            issuer: DEFAULT_ISSUER.to_string(),
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Result<Self, JwtError> {
        let secret = std::env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or(JwtError::MissingSecret)?;

        let kid = std::env::var("JWT_KEY_ID").unwrap_or_else(|_| DEFAULT_KEY_ID.to_string());

        let mut keys = SigningKeys::new(kid, secret);
        if let Ok(retired) = std::env::var("JWT_RETIRED_KEYS") {
            keys = keys.with_retired_list(&retired)?;
        }

        let access_exp = env_in_range(
            "JWT_ACCESS_EXPIRATION_MINUTES",
            ACCESS_TOKEN_EXPIRATION_MINUTES,
            ACCESS_TOKEN_EXPIRATION_RANGE,
        )?;

        let issuer = std::env::var("JWT_ISSUER").unwrap_or_else(|_| DEFAULT_ISSUER.to_string());

        Ok(Self {
            keys,
            access_token_expiration_minutes: access_exp,
            issuer,
        })
    }

    /// Set access token expiration, clamped to 1 minute ..= 1 day
    pub fn access_token_expiration(mut self, minutes: i64) -> Self {
        self.access_token_expiration_minutes = minutes.clamp(
            *ACCESS_TOKEN_EXPIRATION_RANGE.start(),
            *ACCESS_TOKEN_EXPIRATION_RANGE.end(),
        );
        self
    }

    /// Set issuer
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }
}

/// JWT errors
///
/// Every decoding failure collapses into [`JwtError::InvalidToken`]; the
/// concrete reason is only logged.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("JWT_SECRET environment variable not set")]
    MissingSecret,

    #[error("Invalid signing key entry: {0}")]
    InvalidKeySpec(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Token encoding failed: {0}")]
    EncodingError(String),

    #[error("Invalid token")]
    InvalidToken,
}

/// Access token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Client address the token was issued to
    pub ip: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issuer
    pub iss: String,
    /// JWT ID (unique identifier for this token)
    pub jti: String,
}

impl AccessClaims {
    /// Parsed bound address, `None` if the claim is not an IP address
    pub fn bound_address(&self) -> Option<IpAddr> {
        self.ip.parse().ok()
    }

    /// Whether the token was issued to `address`
    pub fn is_bound_to(&self, address: IpAddr) -> bool {
        self.bound_address() == Some(address)
    }

}

/// JWT service for access token operations
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_keys: HashMap<String, DecodingKey>,
}

impl JwtService {
    /// Create a new JWT service
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.keys.active_secret.as_bytes());
        let decoding_keys = config
            .keys
            .iter()
            .map(|(kid, secret)| (kid.to_string(), DecodingKey::from_secret(secret.as_bytes())))
            .collect();

        Self {
            config,
            encoding_key,
            decoding_keys,
        }
    }

    /// Generate an access token for a subject bound to a client address.
    ///
    /// Returns the token and its expiration as a Unix timestamp.
    pub fn generate_access_token(
        &self,
        subject_id: &str,
        address: IpAddr,
    ) -> Result<(String, i64), JwtError> {
        let now = Utc::now();
        // The field is public and may have bypassed the builder
        let minutes = self.config.access_token_expiration_minutes.clamp(
            *ACCESS_TOKEN_EXPIRATION_RANGE.start(),
            *ACCESS_TOKEN_EXPIRATION_RANGE.end(),
        );
        let exp = Duration::try_minutes(minutes)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| JwtError::EncodingError("token lifetime out of range".to_string()))?;

        let token = self.sign(subject_id, address, now, exp)?;
        Ok((token, exp.timestamp()))
    }

    /// Sign a token that expired `expired_for` ago
    #[cfg(test)]
    pub(crate) fn generate_expired_access_token(
        &self,
        subject_id: &str,
        address: IpAddr,
        expired_for: Duration,
    ) -> Result<String, JwtError> {
        let now = Utc::now();
        self.sign(subject_id, address, now - expired_for - Duration::minutes(1), now - expired_for)
    }

    fn sign(
        &self,
        subject_id: &str,
        address: IpAddr,
        issued_at: DateTime<Utc>,
        exp: DateTime<Utc>,
    ) -> Result<String, JwtError> {
        let claims = AccessClaims {
            sub: subject_id.to_string(),
            ip: address.to_string(),
            iat: issued_at.timestamp(),
            exp: exp.timestamp(),
            iss: self.config.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        let mut header = Header::new(SIGNING_ALGORITHM);
        header.kid = Some(self.config.keys.active_kid().to_string());

        encode(&header, &claims, &self.encoding_key)
            .map_err(|e| JwtError::EncodingError(e.to_string()))
    }

    /// Validate and decode an access token
    pub fn validate_access_token(&self, token: &str) -> Result<AccessClaims, JwtError> {
        self.decode_with_leeway(token, 0)
    }

    /// Validate an access token presented for refresh.
    ///
    /// Signature, key and issuer checks are the same as for
    /// [`validate_access_token`](Self::validate_access_token), but a token
    /// that expired no more than `grace` ago is still accepted. The grace is
    /// capped at 30 days.
    pub fn validate_for_refresh(
        &self,
        token: &str,
        grace: Duration,
    ) -> Result<AccessClaims, JwtError> {
        let leeway = u64::try_from(grace.num_seconds().clamp(0, MAX_REFRESH_LEEWAY_SECS)).unwrap_or(0);
        self.decode_with_leeway(token, leeway)
    }

    fn decode_with_leeway(&self, token: &str, leeway: u64) -> Result<AccessClaims, JwtError> {
        let header = decode_header(token).map_err(|e| reject("malformed header", &e))?;

        if !matches!(
            header.alg,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            tracing::debug!(alg = ?header.alg, "access token rejected: non-HMAC algorithm");
            return Err(JwtError::InvalidToken);
        }

        let key = header
            .kid
            .as_deref()
            .and_then(|kid| self.decoding_keys.get(kid))
            .ok_or_else(|| {
                tracing::debug!(kid = ?header.kid, "access token rejected: unknown key id");
                JwtError::InvalidToken
            })?;

        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation.leeway = leeway;

        let token_data =
            decode::<AccessClaims>(token, key, &validation).map_err(|e| reject("verification", &e))?;

        if token_data.claims.sub.is_empty() {
            tracing::debug!("access token rejected: empty subject");
            return Err(JwtError::InvalidToken);
        }

        Ok(token_data.claims)
    }
}

fn reject(stage: &str, err: &jsonwebtoken::errors::Error) -> JwtError {
    tracing::debug!(stage, reason = ?err.kind(), "access token rejected");
    JwtError::InvalidToken
}
