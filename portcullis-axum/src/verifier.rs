//! Credential verification seam.
//!
//! Password storage and hashing live outside portcullis. The login route
//! hands the submitted credentials to a [`CredentialVerifier`] only after the
//! guard has admitted the attempt.

use async_trait::async_trait;
use thiserror::Error;

/// Result of checking a set of credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Credentials matched. `token` is returned to the client as-is.
    Valid { token: Option<String> },
    /// Unknown account or wrong password. The two must not be distinguished.
    Invalid,
}

#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("Credential store unavailable: {0}")]
    Unavailable(String),

    #[error("Credential verification failed: {0}")]
    Internal(String),
}

/// Checks submitted credentials against the application's user store.
///
/// Errors are counted as failed attempts by the login route.
#[async_trait]
pub trait CredentialVerifier: Send + Sync + 'static {
    async fn verify(&self, email: &str, password: &str) -> Result<Verification, VerifierError>;
}
