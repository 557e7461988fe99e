//! Bearer credential check shared by every mutating HTTP route.
//!
//! The check runs before any byte of the request body is interpreted.

use subtle::ConstantTimeEq;
use thiserror::Error;

/// Errors returned by bearer authentication.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingCredential,

    #[error("Authorization header is not a Bearer credential")]
    NotBearer,

    #[error("Invalid credential")]
    InvalidCredential,
}

/// Holds the shared secret loaded at startup.
#[derive(Clone)]
pub struct BearerAuth {
    secret: String,
}

impl std::fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerAuth").finish_non_exhaustive()
    }
}

impl BearerAuth {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Verify a raw `Authorization` header value (`Bearer <secret>`).
    ///
    /// The token after the `Bearer ` prefix must match the secret exactly;
    /// no trimming or case folding is applied.
    pub fn verify(&self, header: Option<&str>) -> Result<(), AuthError> {
        let header = header.ok_or(AuthError::MissingCredential)?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::NotBearer)?;
        if self.secret.is_empty() {
            return Err(AuthError::InvalidCredential);
        }
        if bool::from(token.as_bytes().ct_eq(self.secret.as_bytes())) {
            Ok(())
        } else {
            Err(AuthError::InvalidCredential)
        }
    }
}
