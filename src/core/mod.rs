//! Core session credential logic: token codec, credential storage, issuance
//! and the refresh exchange

pub mod auth;
pub mod config;
pub mod db;
#[cfg(test)]
mod tests;
