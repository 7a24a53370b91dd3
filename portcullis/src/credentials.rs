//! A fixed credential list for the bundled server.
//!
//! Applications embedding portcullis implement [`CredentialVerifier`] against
//! their own user store. This verifier exists so `portcullis serve` can be
//! exercised end to end without one.

use std::collections::HashMap;

use async_trait::async_trait;
use portcullis_axum::{CredentialVerifier, Verification, VerifierError};
use portcullis_core::{error::ValidationError, validation::normalize_account_id};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type PasswordDigest = [u8; 32];

/// Fixed credentials held in memory. For demos only.
///
/// Passwords are compared as SHA-256 digests in constant time, but they are
/// neither salted nor stretched. Production deployments should verify against
/// a real password hash such as Argon2.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialVerifier {
    users: HashMap<String, PasswordDigest>,
}

fn digest(password: &str) -> PasswordDigest {
    Sha256::digest(password.as_bytes()).into()
}

impl StaticCredentialVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, email: &str, password: &str) -> Result<Self, ValidationError> {
        self.users
            .insert(normalize_account_id(email)?, digest(password));
        Ok(self)
    }

    /// Parse `email:password` pairs. The password may itself contain colons.
    pub fn from_pairs<I, T>(pairs: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        pairs.into_iter().try_fold(Self::new(), |verifier, pair| {
            let (email, password) = pair
                .as_ref()
                .split_once(':')
                .ok_or_else(|| ValidationError::InvalidField("expected email:password".to_string()))?;
            verifier.with_user(email, password)
        })
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl CredentialVerifier for StaticCredentialVerifier {
    async fn verify(&self, email: &str, password: &str) -> Result<Verification, VerifierError> {
        let presented = digest(password);

        // Unknown accounts still pay for a comparison
        let (expected, known) = match normalize_account_id(email)
            .ok()
            .and_then(|account| self.users.get(&account))
        {
            Some(expected) => (*expected, true),
            None => (digest(""), false),
        };

        if known && bool::from(presented[..].ct_eq(&expected[..])) {
            Ok(Verification::Valid {
                token: Some(uuid::Uuid::new_v4().to_string()),
            })
        } else {
            Ok(Verification::Invalid)
        }
    }
}
