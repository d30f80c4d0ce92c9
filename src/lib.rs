//! tokengate - session credentials for API clients
//!
//! Issues short-lived signed access tokens together with long-lived refresh
//! credentials, and exchanges a refresh credential for a new access token.

pub mod core;
