//! Session store boundary.
//!
//! The identity provider's client is a black box to the rest of the crate:
//! it holds the token, persists it, and broadcasts lifecycle events. Anything
//! that implements [`SessionStore`] can stand in for it.

pub mod memory;
pub mod storage;

pub use memory::{MemorySessionStore, SessionCallCounts};
pub use storage::{FileStorage, MemoryStorage, SessionStorage, StorageError};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use url::Url;

use newsdesk_core::{Email, Password};

use crate::models::{Session, SessionEvent};

/// Capacity of session event channels.
pub const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Provider messages that mean "wrong email or password".
const INVALID_CREDENTIAL_MARKERS: [&str; 3] = [
    "Invalid login credentials",
    "invalid_credentials",
    "Invalid email or password",
];

/// Errors reported by the identity provider.
#[derive(Debug, Clone, Error)]
pub enum AuthProviderError {
    /// The request never got a response (network, DNS, TLS).
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider answered with an error.
    #[error("{message}")]
    Rejected {
        /// HTTP status, when known.
        status: Option<u16>,
        /// Provider error code (e.g. `invalid_credentials`).
        code: Option<String>,
        /// Human-readable message.
        message: String,
    },
}

impl AuthProviderError {
    /// Build a rejection with an HTTP status.
    #[must_use]
    pub fn rejected(status: u16, code: Option<&str>, message: impl Into<String>) -> Self {
        Self::Rejected {
            status: Some(status),
            code: code.map(str::to_owned),
            message: message.into(),
        }
    }

    /// The raw provider message.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Transport(message) | Self::Rejected { message, .. } => message,
        }
    }

    /// HTTP status of a rejection.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Transport(_) => None,
            Self::Rejected { status, .. } => *status,
        }
    }

    /// Whether retrying the same request could succeed.
    ///
    /// Transport failures, timeouts, rate limits, server errors, and
    /// rejections without a status are transient. Other 4xx answers are not.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Rejected { status: None, .. } => true,
            Self::Rejected {
                status: Some(status),
                ..
            } => *status == 408 || *status == 429 || *status >= 500,
        }
    }

    /// Whether the provider rejected the email/password pair itself.
    #[must_use]
    pub fn is_invalid_credentials(&self) -> bool {
        if let Self::Rejected {
            code: Some(code), ..
        } = self
            && code == "invalid_credentials"
        {
            return true;
        }
        let message = self.message();
        INVALID_CREDENTIAL_MARKERS
            .iter()
            .any(|marker| message.contains(marker))
    }
}

impl From<reqwest::Error> for AuthProviderError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Client of the identity provider.
///
/// `subscribe` hands out a broadcast receiver; dropping it is the disposer.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The current session, if one is active.
    async fn current_session(&self) -> Result<Option<Session>, AuthProviderError>;

    /// Subscribe to lifecycle events, in emission order.
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

    /// Exchange credentials for a session.
    async fn sign_in_with_password(
        &self,
        email: &Email,
        password: &Password,
    ) -> Result<Session, AuthProviderError>;

    /// End the current session.
    async fn sign_out(&self) -> Result<(), AuthProviderError>;

    /// Ask the provider to email a password-reset link.
    async fn request_password_reset(
        &self,
        email: &Email,
        redirect_to: &Url,
    ) -> Result<(), AuthProviderError>;

    /// Drop locally persisted session artifacts (tokens, expiry).
    fn clear_cached_artifacts(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_credentials_by_message() {
        let err = AuthProviderError::rejected(400, None, "Invalid login credentials");
        assert!(err.is_invalid_credentials());
        let err = AuthProviderError::rejected(400, None, "Invalid email or password");
        assert!(err.is_invalid_credentials());
    }

    #[test]
    fn test_invalid_credentials_by_code() {
        let err = AuthProviderError::rejected(400, Some("invalid_credentials"), "nope");
        assert!(err.is_invalid_credentials());
    }

    #[test]
    fn test_other_rejection_is_not_invalid_credentials() {
        let err = AuthProviderError::rejected(400, Some("email_not_confirmed"), "Email not confirmed");
        assert!(!err.is_invalid_credentials());
        assert_eq!(err.message(), "Email not confirmed");
    }

    #[test]
    fn test_transient_classification() {
        assert!(AuthProviderError::Transport("connection reset".to_owned()).is_transient());
        assert!(AuthProviderError::rejected(429, None, "slow down").is_transient());
        assert!(AuthProviderError::rejected(503, None, "unavailable").is_transient());
        assert!(AuthProviderError::rejected(408, None, "timeout").is_transient());
        assert!(!AuthProviderError::rejected(400, None, "bad redirect").is_transient());
        assert!(!AuthProviderError::rejected(422, None, "unprocessable").is_transient());
    }
}
