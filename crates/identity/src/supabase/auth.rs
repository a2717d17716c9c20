//! Session store backed by the hosted auth API.
//!
//! The session is held in memory and persisted as JSON through a
//! [`SessionStorage`] so it survives restarts. Persistence failures are
//! logged, never returned: losing the cache only costs a fresh sign-in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::broadcast;
use url::Url;

use newsdesk_core::{Email, IdentityId, Password};

use super::{endpoint, read_error, with_project_headers};
use crate::config::IdentityConfig;
use crate::models::{AuthUser, Session, SessionEvent, StoredSession, storage_keys};
use crate::session::{AuthProviderError, EVENT_CHANNEL_CAPACITY, SessionStorage, SessionStore};

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: IdentityId,
    #[serde(default)]
    email: Option<String>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| {
                self.expires_in
                    .map(|secs| now + TimeDelta::seconds(secs))
            });
        Session {
            access_token: SecretString::from(self.access_token),
            refresh_token: self.refresh_token.map(SecretString::from),
            token_type: self.token_type,
            expires_at,
            user: AuthUser {
                id: self.user.id,
                // Phone-only accounts come back with an empty email.
                email: self
                    .user
                    .email
                    .as_deref()
                    .and_then(|email| Email::parse(email).ok()),
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Client for the hosted auth API.
#[derive(Clone)]
pub struct SupabaseAuth {
    inner: Arc<SupabaseAuthInner>,
}

struct SupabaseAuthInner {
    client: reqwest::Client,
    base: Url,
    anon_key: SecretString,
    storage: Arc<dyn SessionStorage>,
    storage_key: String,
    current: Mutex<Option<Session>>,
    restored: AtomicBool,
    /// Held while a refresh grant is in flight.
    refreshing: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

impl SupabaseAuth {
    /// Create a new auth client.
    #[must_use]
    pub fn new(config: &IdentityConfig, storage: Arc<dyn SessionStorage>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SupabaseAuthInner {
                client: reqwest::Client::new(),
                base: config.supabase.url.clone(),
                anon_key: config.supabase.anon_key.clone(),
                storage,
                storage_key: config.storage_key.clone(),
                current: Mutex::new(None),
                restored: AtomicBool::new(false),
                refreshing: tokio::sync::Mutex::new(()),
                events,
            }),
        }
    }

    fn current(&self) -> MutexGuard<'_, Option<Session>> {
        self.inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Access token of the active session, without refreshing it.
    #[must_use]
    pub fn access_token(&self) -> Option<SecretString> {
        self.current()
            .as_ref()
            .map(|session| session.access_token.clone())
    }

    fn url(&self, path: &str) -> Result<Url, AuthProviderError> {
        endpoint(&self.inner.base, path)
            .map_err(|e| AuthProviderError::Transport(format!("invalid endpoint URL: {e}")))
    }

    fn emit(&self, event: SessionEvent) {
        tracing::debug!(event = event.kind(), "Emitting session event");
        // No receivers is fine.
        let _ = self.inner.events.send(event);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────────

    fn restore(&self) {
        if self.inner.restored.swap(true, Ordering::SeqCst) {
            return;
        }
        let stored = match self.inner.storage.get_item(&self.inner.storage_key) {
            Ok(Some(json)) => json,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to read persisted session");
                return;
            }
        };
        match serde_json::from_str::<StoredSession>(&stored) {
            Ok(stored) => {
                let session = Session::from(stored);
                tracing::debug!(identity_id = %session.identity_id(), "Restored persisted session");
                let mut current = self.current();
                if current.is_none() {
                    *current = Some(session);
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "Discarding unreadable persisted session");
                self.clear_cached_artifacts();
            }
        }
    }

    fn persist(&self, session: &Session) {
        let json = match serde_json::to_string(&StoredSession::from(session)) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to serialize session");
                return;
            }
        };
        if let Err(err) = self
            .inner
            .storage
            .set_item(&self.inner.storage_key, &json)
        {
            tracing::warn!(error = %err, "Failed to persist session");
        }
    }

    fn store_session(&self, session: &Session) {
        *self.current() = Some(session.clone());
        self.persist(session);
    }

    fn drop_session(&self) {
        *self.current() = None;
        self.clear_cached_artifacts();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Token Grants
    // ─────────────────────────────────────────────────────────────────────────

    async fn token_grant(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<Session, AuthProviderError> {
        let mut url = self.url("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);

        let response = with_project_headers(
            self.inner.client.post(url),
            &self.inner.anon_key,
            None,
        )
        .json(&body)
        .send()
        .await?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let token: TokenResponse = response.json().await?;
        Ok(token.into_session(Utc::now()))
    }

    /// Exchange the refresh token for a new session.
    ///
    /// Emits `TokenRefreshed` on success.
    ///
    /// # Errors
    ///
    /// Returns `AuthProviderError::Rejected` if there is no refresh token or
    /// the provider refuses it.
    pub async fn refresh_session(&self) -> Result<Session, AuthProviderError> {
        self.restore();
        let refresh_token = self
            .current()
            .as_ref()
            .and_then(|session| session.refresh_token.clone())
            .ok_or_else(|| AuthProviderError::Rejected {
                status: None,
                code: Some("refresh_token_not_found".to_string()),
                message: "No refresh token available".to_string(),
            })?;

        let session = self
            .token_grant(
                "refresh_token",
                serde_json::json!({ "refresh_token": refresh_token.expose_secret() }),
            )
            .await?;
        self.store_session(&session);
        tracing::info!(identity_id = %session.identity_id(), "Session refreshed");
        self.emit(SessionEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }
}

async fn rejection(response: reqwest::Response) -> AuthProviderError {
    let (status, body, text) = read_error(response).await;
    AuthProviderError::Rejected {
        status: Some(status),
        code: body.code(),
        message: body.message_or(&text),
    }
}

#[async_trait]
impl SessionStore for SupabaseAuth {
    async fn current_session(&self) -> Result<Option<Session>, AuthProviderError> {
        self.restore();
        let Some(session) = self.current().clone() else {
            return Ok(None);
        };
        if !session.is_expired_at(Utc::now()) {
            return Ok(Some(session));
        }

        // Refresh tokens are single use: one grant at a time, and a probe
        // that waited picks up the session the winner stored.
        let _refreshing = self.inner.refreshing.lock().await;
        let Some(session) = self.current().clone() else {
            return Ok(None);
        };
        if !session.is_expired_at(Utc::now()) {
            return Ok(Some(session));
        }

        if session.refresh_token.is_none() {
            tracing::info!("Session expired without a refresh token");
            self.drop_session();
            self.emit(SessionEvent::SignedOut);
            return Ok(None);
        }

        match self.refresh_session().await {
            Ok(session) => Ok(Some(session)),
            Err(err) if err.is_transient() => Err(err),
            Err(err) => {
                tracing::warn!(error = %err, "Session refresh rejected, signing out locally");
                self.drop_session();
                self.emit(SessionEvent::SignedOut);
                Ok(None)
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    async fn sign_in_with_password(
        &self,
        email: &Email,
        password: &Password,
    ) -> Result<Session, AuthProviderError> {
        let session = self
            .token_grant(
                "password",
                serde_json::json!({
                    "email": email.as_str(),
                    "password": password.expose(),
                }),
            )
            .await?;
        self.store_session(&session);
        self.emit(SessionEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AuthProviderError> {
        self.restore();
        let Some(access_token) = self.access_token() else {
            self.drop_session();
            return Ok(());
        };

        let response = with_project_headers(
            self.inner.client.post(self.url("auth/v1/logout")?),
            &self.inner.anon_key,
            Some(&access_token),
        )
        .send()
        .await?;

        let status = response.status().as_u16();
        // The token is already invalid server-side.
        let already_gone = matches!(status, 401 | 403 | 404);
        if !response.status().is_success() && !already_gone {
            return Err(rejection(response).await);
        }

        self.drop_session();
        tracing::info!("Signed out");
        self.emit(SessionEvent::SignedOut);
        Ok(())
    }

    async fn request_password_reset(
        &self,
        email: &Email,
        redirect_to: &Url,
    ) -> Result<(), AuthProviderError> {
        let mut url = self.url("auth/v1/recover")?;
        url.query_pairs_mut()
            .append_pair("redirect_to", redirect_to.as_str());

        let response = with_project_headers(
            self.inner.client.post(url),
            &self.inner.anon_key,
            None,
        )
        .json(&serde_json::json!({ "email": email.as_str() }))
        .send()
        .await?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }
        Ok(())
    }

    fn clear_cached_artifacts(&self) {
        for key in storage_keys::artifacts(&self.inner.storage_key) {
            if let Err(err) = self.inner.storage.remove_item(&key) {
                tracing::warn!(key, error = %err, "Failed to clear session artifact");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::session::MemoryStorage;

    fn client(storage: Arc<MemoryStorage>) -> SupabaseAuth {
        // Nothing listens here; tests using it never reach the network.
        client_at(Url::parse("http://127.0.0.1:9").unwrap(), storage)
    }

    fn client_at(base: Url, storage: Arc<MemoryStorage>) -> SupabaseAuth {
        let config = IdentityConfig::new(base, SecretString::from("anon"));
        SupabaseAuth::new(&config, storage)
    }

    fn store_expired(storage: &MemoryStorage) {
        let token: TokenResponse = serde_json::from_value(token_json(1_000, "a@b.co")).unwrap();
        storage
            .set_item(
                storage_keys::DEFAULT,
                &serde_json::to_string(&StoredSession::from(&token.into_session(Utc::now())))
                    .unwrap(),
            )
            .unwrap();
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0_u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    /// Answers every request with `body` after a short delay, counting them.
    async fn token_server(body: serde_json::Value) -> (Url, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let body = body.to_string();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let counter = counter.clone();
                let body = body.clone();
                tokio::spawn(async move {
                    read_request(&mut socket).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\n\
                         content-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        (Url::parse(&format!("http://{addr}")).unwrap(), hits)
    }

    fn token_json(expires_at: i64, email: &str) -> serde_json::Value {
        serde_json::json!({
            "access_token": "at",
            "token_type": "bearer",
            "expires_in": 3600,
            "expires_at": expires_at,
            "refresh_token": "rt",
            "user": { "id": "0c2a3f3e-6b1d-4a57-9d0e-3f8a1b2c4d5e", "email": email }
        })
    }

    #[test]
    fn test_token_response_into_session() {
        let token: TokenResponse =
            serde_json::from_value(token_json(1_900_000_000, "Reporter@Example.com")).unwrap();
        let session = token.into_session(Utc::now());
        assert_eq!(session.expires_at.unwrap().timestamp(), 1_900_000_000);
        assert_eq!(session.email().unwrap().as_str(), "Reporter@Example.com");
        assert_eq!(session.refresh_token.unwrap().expose_secret(), "rt");
    }

    #[test]
    fn test_phone_only_user_has_no_email() {
        let token: TokenResponse =
            serde_json::from_value(token_json(1_900_000_000, "")).unwrap();
        assert!(token.into_session(Utc::now()).email().is_none());
    }

    #[test]
    fn test_expires_in_used_without_expires_at() {
        let mut json = token_json(0, "a@b.co");
        json.as_object_mut().unwrap().remove("expires_at");
        let token: TokenResponse = serde_json::from_value(json).unwrap();
        let now = Utc::now();
        let session = token.into_session(now);
        assert_eq!(session.expires_at, Some(now + TimeDelta::seconds(3600)));
    }

    #[tokio::test]
    async fn test_restores_persisted_session() {
        let storage = Arc::new(MemoryStorage::new());
        let token: TokenResponse =
            serde_json::from_value(token_json(4_000_000_000, "a@b.co")).unwrap();
        let session = token.into_session(Utc::now());
        storage
            .set_item(
                storage_keys::DEFAULT,
                &serde_json::to_string(&StoredSession::from(&session)).unwrap(),
            )
            .unwrap();

        let auth = client(storage);
        let restored = auth.current_session().await.unwrap().unwrap();
        assert_eq!(restored.identity_id(), session.identity_id());
        assert!(auth.access_token().is_some());
    }

    #[tokio::test]
    async fn test_expired_session_without_refresh_token_signs_out() {
        let storage = Arc::new(MemoryStorage::new());
        let mut json = token_json(1_000, "a@b.co");
        json.as_object_mut().unwrap().remove("refresh_token");
        let token: TokenResponse = serde_json::from_value(json).unwrap();
        storage
            .set_item(
                storage_keys::DEFAULT,
                &serde_json::to_string(&StoredSession::from(&token.into_session(Utc::now())))
                    .unwrap(),
            )
            .unwrap();

        let auth = client(storage.clone());
        let mut events = auth.subscribe();
        assert!(auth.current_session().await.unwrap().is_none());
        assert_eq!(events.try_recv().unwrap().kind(), "signed_out");
        assert!(storage.keys().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_persisted_session_is_discarded() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_item(storage_keys::DEFAULT, "{not json").unwrap();
        let auth = client(storage.clone());
        assert!(auth.current_session().await.unwrap().is_none());
        assert!(storage.keys().is_empty());
    }

    #[tokio::test]
    async fn test_sign_out_without_session_is_local() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set_item("supabase.auth.token.expires_at", "1")
            .unwrap();
        let auth = client(storage.clone());
        auth.sign_out().await.unwrap();
        assert!(storage.keys().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_probes_share_one_refresh() {
        let (base, hits) = token_server(token_json(4_000_000_000, "a@b.co")).await;
        let storage = Arc::new(MemoryStorage::new());
        store_expired(&storage);
        let auth = client_at(base, storage);
        let mut events = auth.subscribe();

        let (first, second) = tokio::join!(auth.current_session(), auth.current_session());

        let first = first.unwrap().unwrap();
        let second = second.unwrap().unwrap();
        assert_eq!(first.expires_at, second.expires_at);
        assert!(!second.is_expired_at(Utc::now()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(events.try_recv().unwrap().kind(), "token_refreshed");
        assert!(events.try_recv().is_err());
    }
}
