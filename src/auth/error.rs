//! Typed failures of the token core.
//!
//! Route handlers never see these directly for authentication: the access
//! guard collapses every verification failure into one 401.

use thiserror::Error;

/// Result alias used by the codec and session manager.
pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing or unusable signing configuration. Fatal at startup.
    #[error("auth configuration error: {0}")]
    Configuration(String),

    /// A token cannot be minted for an empty principal id.
    #[error("token subject must not be empty")]
    InvalidSubject,

    /// Malformed token, bad signature, or unsupported algorithm.
    #[error("invalid token: {0}")]
    InvalidToken(&'static str),

    /// The revocation store could not be read or written.
    #[error("revocation store unavailable: {0:#}")]
    Store(anyhow::Error),
}

impl AuthError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn is_invalid_token(&self) -> bool {
        matches!(self, Self::InvalidToken(_))
    }
}
