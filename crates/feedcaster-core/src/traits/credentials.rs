//! Credential lookup trait.

use crate::error::Result;
use crate::types::Credentials;

/// Read access to decrypted per-account credentials.
///
/// Callers must drop the returned value as soon as the lookup's purpose
/// (a login) is served; it is zeroized on drop.
pub trait CredentialSource: Send + Sync {
    /// `Credential` error when the account is unknown or cannot be decrypted.
    fn get(&self, account_id: &str) -> Result<Credentials>;
}
