//! Scenario tests for the Newsdesk identity layer.
//!
//! # Running Tests
//!
//! ```bash
//! # In-memory scenarios
//! cargo test -p newsdesk-integration-tests
//!
//! # Include the live provider checks (needs SUPABASE_URL, SUPABASE_ANON_KEY,
//! # NEWSDESK_TEST_EMAIL, NEWSDESK_TEST_PASSWORD)
//! cargo test -p newsdesk-integration-tests -- --include-ignored
//! ```
//!
//! # Test Categories
//!
//! - `identity_sync` - Resolution, provisioning, session events
//! - `route_guard` - Redirect to login and back
//! - `login_flow` - Credential submission and its outcomes
//! - `password_reset` - Retry and backoff timing
//! - `live_provider` - Hosted provider round trips (ignored by default)

#![cfg_attr(not(test), forbid(unsafe_code))]
#![allow(clippy::missing_panics_doc, clippy::unwrap_used)]

use std::sync::Arc;

use url::Url;

use newsdesk_core::{Email, IdentityId};
use newsdesk_identity::config::IdentitySettings;
use newsdesk_identity::db::MemoryProfileRepository;
use newsdesk_identity::models::Session;
use newsdesk_identity::navigation::HistoryNavigator;
use newsdesk_identity::services::UserState;
use newsdesk_identity::session::MemorySessionStore;
use newsdesk_identity::state::IdentityState;

/// Email of the account every harness registers.
pub const EMAIL: &str = "desk@example.com";
/// Password of that account.
pub const PASSWORD: &str = "correct-horse";

/// In-memory app with one registered account.
pub struct Harness {
    pub store: Arc<MemorySessionStore>,
    pub profiles: Arc<MemoryProfileRepository>,
    pub navigator: Arc<HistoryNavigator>,
    pub state: IdentityState,
    pub account: IdentityId,
}

impl Harness {
    /// App opened at `initial_path`.
    #[must_use]
    pub fn at(initial_path: &str) -> Self {
        let store = Arc::new(MemorySessionStore::new());
        let account = store.add_account(&email(), PASSWORD);
        let profiles = Arc::new(MemoryProfileRepository::new());
        let navigator = Arc::new(HistoryNavigator::new(initial_path));
        let state = IdentityState::new(
            store.clone(),
            profiles.clone(),
            navigator.clone(),
            settings(),
        );
        Self {
            store,
            profiles,
            navigator,
            state,
            account,
        }
    }

    /// A session for the registered account, not yet active.
    #[must_use]
    pub fn session(&self) -> Session {
        MemorySessionStore::session_for(self.account, Some(email()))
    }

    /// Make the registered account's session active without emitting an event.
    pub fn restore_session(&self) {
        self.store.set_session(Some(self.session()));
    }

    /// Wait until the published state satisfies `predicate`.
    pub async fn wait_for_state(&self, predicate: impl FnMut(&UserState) -> bool) -> UserState {
        let mut user = self.state.synchronizer().watch();
        let state = user.wait_for(predicate).await.unwrap();
        state.clone()
    }
}

#[must_use]
pub fn email() -> Email {
    Email::parse(EMAIL).unwrap()
}

#[must_use]
pub fn settings() -> IdentitySettings {
    IdentitySettings::for_site(&Url::parse("http://localhost:5173").unwrap())
}

/// Yield to spawned tasks until they go idle.
pub async fn settle_tasks() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
