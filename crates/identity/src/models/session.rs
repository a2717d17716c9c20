//! Session-related types.
//!
//! A [`Session`] is what the identity provider hands back after a successful
//! sign-in or token refresh. [`StoredSession`] is its persisted form.

use core::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use newsdesk_core::{Email, IdentityId};

/// Provider-side user attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    /// Identity-provider user ID.
    pub id: IdentityId,
    /// Email, when the account has one (phone-only accounts do not).
    #[serde(default)]
    pub email: Option<Email>,
}

/// An authenticated provider session.
///
/// Implements `Debug` manually to redact the tokens.
#[derive(Clone)]
pub struct Session {
    /// Bearer token for provider and table requests.
    pub access_token: SecretString,
    /// Token used to obtain a fresh access token.
    pub refresh_token: Option<SecretString>,
    /// Token type (normally `bearer`).
    pub token_type: String,
    /// When the access token stops being accepted.
    pub expires_at: Option<DateTime<Utc>>,
    /// The user the session belongs to.
    pub user: AuthUser,
}

impl Session {
    /// Seconds before expiry at which a session is treated as expired.
    pub const EXPIRY_MARGIN_SECS: i64 = 10;

    /// The identity this session authenticates.
    #[must_use]
    pub const fn identity_id(&self) -> IdentityId {
        self.user.id
    }

    /// The account email, if any.
    #[must_use]
    pub const fn email(&self) -> Option<&Email> {
        self.user.email.as_ref()
    }

    /// Returns `true` if the access token is expired (or about to be) at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= now + TimeDelta::seconds(Self::EXPIRY_MARGIN_SECS))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// Session lifecycle event emitted by a session store.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A sign-in completed.
    SignedIn(Session),
    /// The access token was refreshed.
    TokenRefreshed(Session),
    /// The session ended.
    SignedOut,
}

impl SessionEvent {
    /// Short event name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SignedIn(_) => "signed_in",
            Self::TokenRefreshed(_) => "token_refreshed",
            Self::SignedOut => "signed_out",
        }
    }

    /// The session carried by the event, absent for `SignedOut`.
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        match self {
            Self::SignedIn(session) | Self::TokenRefreshed(session) => Some(session),
            Self::SignedOut => None,
        }
    }
}

/// Persisted form of a [`Session`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub token_type: String,
    /// Unix timestamp (seconds).
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

impl From<&Session> for StoredSession {
    fn from(session: &Session) -> Self {
        Self {
            access_token: session.access_token.expose_secret().to_owned(),
            refresh_token: session
                .refresh_token
                .as_ref()
                .map(|token| token.expose_secret().to_owned()),
            token_type: session.token_type.clone(),
            expires_at: session.expires_at.map(|at| at.timestamp()),
            user: session.user.clone(),
        }
    }
}

impl From<StoredSession> for Session {
    fn from(stored: StoredSession) -> Self {
        Self {
            access_token: SecretString::from(stored.access_token),
            refresh_token: stored.refresh_token.map(SecretString::from),
            token_type: stored.token_type,
            expires_at: stored
                .expires_at
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
            user: stored.user,
        }
    }
}

/// Storage keys for persisted session artifacts.
pub mod storage_keys {
    /// Default key the session JSON is stored under.
    pub const DEFAULT: &str = "supabase.auth.token";

    /// Suffixes of the auxiliary keys cleared on sign-out.
    pub const AUXILIARY_SUFFIXES: [&str; 2] = ["expires_at", "refresh_token"];

    /// All keys that hold session artifacts for a given base key.
    #[must_use]
    pub fn artifacts(base: &str) -> Vec<String> {
        std::iter::once(base.to_owned())
            .chain(
                AUXILIARY_SUFFIXES
                    .iter()
                    .map(|suffix| format!("{base}.{suffix}")),
            )
            .collect()
    }
}
