//! # Feedcaster Security
//!
//! Encrypted at-rest storage of per-account credentials.

pub mod vault;

pub use vault::{CredentialVault, VaultKey};
