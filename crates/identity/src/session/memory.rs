//! In-memory session store.
//!
//! Behaves like the hosted provider for the operations the identity layer
//! uses, and lets callers script failures and inspect call counts.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use secrecy::SecretString;
use tokio::sync::broadcast;
use url::Url;

use newsdesk_core::{Email, IdentityId, Password};

use super::{AuthProviderError, EVENT_CHANNEL_CAPACITY, SessionStore};
use crate::models::{AuthUser, Session, SessionEvent};

/// Number of calls made to each store operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCallCounts {
    pub current_session: usize,
    pub sign_in: usize,
    pub sign_out: usize,
    pub password_reset: usize,
    pub artifacts_cleared: usize,
}

#[derive(Debug, Clone)]
struct Account {
    id: IdentityId,
    email: Email,
    password: String,
}

#[derive(Debug, Default)]
struct Inner {
    accounts: HashMap<String, Account>,
    session: Option<Session>,
    probe_failures: VecDeque<AuthProviderError>,
    sign_in_failures: VecDeque<AuthProviderError>,
    sign_out_failures: VecDeque<AuthProviderError>,
    reset_failures: VecDeque<AuthProviderError>,
    reset_requests: Vec<(Email, Url)>,
    calls: SessionCallCounts,
}

/// Session store that keeps accounts and the active session in memory.
#[derive(Debug)]
pub struct MemorySessionStore {
    inner: Mutex<Inner>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Builder form of [`add_account`](Self::add_account).
    #[must_use]
    pub fn with_account(self, email: &Email, password: &str) -> Self {
        self.add_account(email, password);
        self
    }

    /// Register an account and return its identity ID.
    pub fn add_account(&self, email: &Email, password: &str) -> IdentityId {
        let id = IdentityId::random();
        self.lock().accounts.insert(
            email.normalized().into_inner(),
            Account {
                id,
                email: email.clone(),
                password: password.to_owned(),
            },
        );
        id
    }

    /// Identity ID of a registered account.
    #[must_use]
    pub fn account_id(&self, email: &Email) -> Option<IdentityId> {
        self.lock()
            .accounts
            .get(email.normalized().as_str())
            .map(|account| account.id)
    }

    /// Build a fresh session for a user without touching the store.
    #[must_use]
    pub fn session_for(id: IdentityId, email: Option<Email>) -> Session {
        Session {
            access_token: SecretString::from(format!("access-{}", uuid::Uuid::new_v4())),
            refresh_token: Some(SecretString::from(format!(
                "refresh-{}",
                uuid::Uuid::new_v4()
            ))),
            token_type: "bearer".to_owned(),
            expires_at: Some(Utc::now() + TimeDelta::hours(1)),
            user: AuthUser { id, email },
        }
    }

    /// Make `session` the active one and emit `SignedIn`.
    pub fn sign_in_as(&self, session: Session) {
        self.lock().session = Some(session.clone());
        self.emit(SessionEvent::SignedIn(session));
    }

    /// Replace the active session without emitting anything.
    pub fn set_session(&self, session: Option<Session>) {
        self.lock().session = session;
    }

    /// Drop the active session silently, as when it lapses provider-side.
    pub fn expire(&self) {
        self.lock().session = None;
    }

    /// Emit an event to subscribers, updating the active session to match.
    pub fn emit(&self, event: SessionEvent) {
        {
            let mut inner = self.lock();
            match &event {
                SessionEvent::SignedIn(session) | SessionEvent::TokenRefreshed(session) => {
                    inner.session = Some(session.clone());
                }
                SessionEvent::SignedOut => inner.session = None,
            }
        }
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Fail the next `current_session` call.
    pub fn fail_next_probe(&self, err: AuthProviderError) {
        self.lock().probe_failures.push_back(err);
    }

    /// Fail the next sign-in attempt.
    pub fn fail_next_sign_in(&self, err: AuthProviderError) {
        self.lock().sign_in_failures.push_back(err);
    }

    /// Fail the next sign-out.
    pub fn fail_next_sign_out(&self, err: AuthProviderError) {
        self.lock().sign_out_failures.push_back(err);
    }

    /// Fail the next password-reset request.
    pub fn fail_next_reset(&self, err: AuthProviderError) {
        self.lock().reset_failures.push_back(err);
    }

    #[must_use]
    pub fn calls(&self) -> SessionCallCounts {
        self.lock().calls
    }

    /// Password-reset requests that reached the provider successfully.
    #[must_use]
    pub fn reset_requests(&self) -> Vec<(Email, Url)> {
        self.lock().reset_requests.clone()
    }

    /// The active session, read without counting as a probe.
    #[must_use]
    pub fn peek_session(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    /// Number of live event receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.events.receiver_count()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn current_session(&self) -> Result<Option<Session>, AuthProviderError> {
        let mut inner = self.lock();
        inner.calls.current_session += 1;
        if let Some(err) = inner.probe_failures.pop_front() {
            return Err(err);
        }
        Ok(inner.session.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn sign_in_with_password(
        &self,
        email: &Email,
        password: &Password,
    ) -> Result<Session, AuthProviderError> {
        let session = {
            let mut inner = self.lock();
            inner.calls.sign_in += 1;
            if let Some(err) = inner.sign_in_failures.pop_front() {
                return Err(err);
            }
            let account = inner
                .accounts
                .get(email.normalized().as_str())
                .filter(|account| account.password == password.expose())
                .cloned()
                .ok_or_else(|| {
                    AuthProviderError::rejected(
                        400,
                        Some("invalid_credentials"),
                        "Invalid login credentials",
                    )
                })?;
            Self::session_for(account.id, Some(account.email))
        };
        self.emit(SessionEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AuthProviderError> {
        let had_session = {
            let mut inner = self.lock();
            inner.calls.sign_out += 1;
            if let Some(err) = inner.sign_out_failures.pop_front() {
                return Err(err);
            }
            inner.session.is_some()
        };
        if had_session {
            self.emit(SessionEvent::SignedOut);
        }
        Ok(())
    }

    async fn request_password_reset(
        &self,
        email: &Email,
        redirect_to: &Url,
    ) -> Result<(), AuthProviderError> {
        let mut inner = self.lock();
        inner.calls.password_reset += 1;
        if let Some(err) = inner.reset_failures.pop_front() {
            return Err(err);
        }
        inner.reset_requests.push((email.clone(), redirect_to.clone()));
        Ok(())
    }

    fn clear_cached_artifacts(&self) {
        self.lock().calls.artifacts_cleared += 1;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn email() -> Email {
        Email::parse("reporter@example.com").unwrap()
    }

    #[tokio::test]
    async fn test_sign_in_matches_email_case_insensitively() {
        let store = MemorySessionStore::new().with_account(&email(), "hunter22");
        let upper = Email::parse("Reporter@Example.com").unwrap();
        let session = store
            .sign_in_with_password(&upper, &Password::parse("hunter22").unwrap())
            .await
            .unwrap();
        assert_eq!(Some(session.identity_id()), store.account_id(&email()));
        assert!(store.current_session().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_wrong_password_is_invalid_credentials() {
        let store = MemorySessionStore::new().with_account(&email(), "hunter22");
        let err = store
            .sign_in_with_password(&email(), &Password::parse("hunter23").unwrap())
            .await
            .unwrap_err();
        assert!(err.is_invalid_credentials());
        assert!(store.peek_session().is_none());
    }

    #[tokio::test]
    async fn test_events_are_broadcast_in_order() {
        let store = MemorySessionStore::new().with_account(&email(), "hunter22");
        let mut events = store.subscribe();
        store
            .sign_in_with_password(&email(), &Password::parse("hunter22").unwrap())
            .await
            .unwrap();
        store.sign_out().await.unwrap();
        assert_eq!(events.recv().await.unwrap().kind(), "signed_in");
        assert_eq!(events.recv().await.unwrap().kind(), "signed_out");
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed_once() {
        let store = MemorySessionStore::new();
        store.fail_next_probe(AuthProviderError::Transport("offline".to_owned()));
        assert!(store.current_session().await.is_err());
        assert!(store.current_session().await.unwrap().is_none());
        assert_eq!(store.calls().current_session, 2);
    }

    #[test]
    fn test_dropping_receiver_unsubscribes() {
        let store = MemorySessionStore::new();
        let rx = store.subscribe();
        assert_eq!(store.receiver_count(), 1);
        drop(rx);
        assert_eq!(store.receiver_count(), 0);
    }
}
