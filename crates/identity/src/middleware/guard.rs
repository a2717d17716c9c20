//! Route guard for protected screens.
//!
//! Each protected screen runs [`RouteGuard::check`] on mount and whenever its
//! path changes. The guard re-probes the session store itself instead of
//! trusting the published user alone, so a session that lapsed since the
//! last resolution still sends the visitor to the login screen. When the
//! live session belongs to someone the synchronizer has not resolved yet
//! (a sign-in whose event is still queued), the guard resolves it before
//! deciding.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::IdentitySettings;
use crate::error::add_breadcrumb;
use crate::models::{CurrentUser, NavigationState, RouteGuardRequest};
use crate::navigation::{NavigateOptions, Navigator};
use crate::services::{IdentitySynchronizer, UserState};
use crate::session::SessionStore;

/// What a protected screen should render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardState {
    /// Still deciding; render a spinner.
    Loading,
    Authorized(CurrentUser),
    /// Redirected (or about to be) to the login screen.
    Denied,
}

impl GuardState {
    #[must_use]
    pub const fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized(_))
    }
}

/// Session check shared by every protected screen.
pub struct RouteGuard {
    store: Arc<dyn SessionStore>,
    synchronizer: Arc<IdentitySynchronizer>,
    navigator: Arc<dyn Navigator>,
    login_path: String,
    reason: String,
    generation: AtomicU64,
    redirected: Mutex<Option<String>>,
}

impl RouteGuard {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        synchronizer: Arc<IdentitySynchronizer>,
        navigator: Arc<dyn Navigator>,
        settings: &IdentitySettings,
    ) -> Self {
        Self {
            store,
            synchronizer,
            navigator,
            login_path: settings.login_path.clone(),
            reason: settings.guard_reason.clone(),
            generation: AtomicU64::new(0),
            redirected: Mutex::new(None),
        }
    }

    /// Decide whether `path` may be shown.
    ///
    /// Never fails: a session probe error counts as "no session". A check
    /// that was superseded by a newer one (or by [`unmount`](Self::unmount))
    /// while probing reports `Loading` and does not navigate. A live session
    /// the synchronizer has not published yet is resolved here first.
    pub async fn check(&self, path: &str) -> GuardState {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let session = match self.store.current_session().await {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(path, error = %err, "Session probe failed in route guard");
                None
            }
        };

        if self.is_superseded(generation, path) {
            return GuardState::Loading;
        }

        let Some(session) = session else {
            return self.deny(path);
        };
        let identity_id = session.identity_id();

        let published = self.synchronizer.state();
        let current = match &published {
            UserState::Resolving => return GuardState::Loading,
            UserState::SignedIn(user) => user.id == identity_id,
            UserState::SignedOut => false,
        };
        let state = if current {
            published
        } else {
            // Published state predates this session.
            tracing::debug!(path, %identity_id, "Resolving session before deciding");
            let resolved = self.synchronizer.resolve().await;
            if self.is_superseded(generation, path) {
                return GuardState::Loading;
            }
            resolved
        };

        match state {
            UserState::Resolving => GuardState::Loading,
            UserState::SignedOut => self.deny(path),
            UserState::SignedIn(user) => {
                self.redirected
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                GuardState::Authorized(user)
            }
        }
    }

    fn is_superseded(&self, generation: u64, path: &str) -> bool {
        let superseded = self.generation.load(Ordering::SeqCst) != generation;
        if superseded {
            tracing::debug!(path, "Guard check superseded");
        }
        superseded
    }

    /// Wait for the synchronizer to finish resolving, then [`check`](Self::check).
    pub async fn settle(&self, path: &str) -> GuardState {
        let mut user = self.synchronizer.watch();
        if user.wait_for(|state| !state.is_resolving()).await.is_err() {
            tracing::debug!("Identity synchronizer dropped while settling");
        }
        self.check(path).await
    }

    /// The screen went away; in-flight checks must not navigate.
    pub fn unmount(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn deny(&self, path: &str) -> GuardState {
        {
            let mut redirected = self
                .redirected
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if redirected.as_deref() == Some(path) {
                tracing::debug!(path, "Redirect already issued");
                return GuardState::Denied;
            }
            *redirected = Some(path.to_owned());
        }

        tracing::info!(path, login_path = %self.login_path, "Redirecting to login");
        add_breadcrumb("auth", "Route guard denied", Some(&[("return_to", path)]));
        let request = RouteGuardRequest::new(path, Some(self.reason.clone()));
        self.navigator.navigate(
            &self.login_path,
            NavigateOptions::replace().with_state(NavigationState::Guard(request)),
        );
        GuardState::Denied
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use newsdesk_core::{Email, IdentityId};
    use url::Url;

    use super::*;
    use crate::db::MemoryProfileRepository;
    use crate::navigation::HistoryNavigator;
    use crate::services::{IdentitySynchronizer, Provisioner};
    use crate::session::{AuthProviderError, MemorySessionStore};

    struct Fixture {
        store: Arc<MemorySessionStore>,
        sync: Arc<IdentitySynchronizer>,
        nav: Arc<HistoryNavigator>,
        guard: RouteGuard,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemorySessionStore::new());
        let repo = Arc::new(MemoryProfileRepository::new());
        let sync = IdentitySynchronizer::new(store.clone(), Arc::new(Provisioner::new(repo)));
        let nav = Arc::new(HistoryNavigator::new("/dashboard"));
        let settings = IdentitySettings::for_site(&Url::parse("http://localhost:5173").unwrap());
        let guard = RouteGuard::new(store.clone(), sync.clone(), nav.clone(), &settings);
        Fixture {
            store,
            sync,
            nav,
            guard,
        }
    }

    fn sign_in(store: &MemorySessionStore) {
        store.set_session(Some(MemorySessionStore::session_for(
            IdentityId::random(),
            Some(Email::parse("desk@example.com").unwrap()),
        )));
    }

    #[tokio::test]
    async fn test_no_session_redirects_with_return_path() {
        let f = fixture();
        assert_eq!(f.guard.check("/dashboard/articles").await, GuardState::Denied);
        assert_eq!(f.nav.current_path().as_deref(), Some("/login"));
        let request = f.nav.take_guard_request().unwrap();
        assert_eq!(request.return_to, "/dashboard/articles");
        assert_eq!(
            request.reason.as_deref(),
            Some("Please sign in to access the dashboard")
        );
    }

    #[tokio::test]
    async fn test_redirect_issued_once_per_path() {
        let f = fixture();
        f.guard.check("/dashboard").await;
        f.guard.check("/dashboard").await;
        assert_eq!(f.nav.navigation_count(), 1);
        f.guard.check("/dashboard/profile").await;
        assert_eq!(f.nav.navigation_count(), 2);
    }

    #[tokio::test]
    async fn test_probe_failure_counts_as_no_session() {
        let f = fixture();
        sign_in(&f.store);
        f.store
            .fail_next_probe(AuthProviderError::Transport("offline".to_owned()));
        assert_eq!(f.guard.check("/dashboard").await, GuardState::Denied);
    }

    #[tokio::test]
    async fn test_session_while_resolving_is_loading() {
        let f = fixture();
        sign_in(&f.store);
        assert_eq!(f.guard.check("/dashboard").await, GuardState::Loading);
        assert_eq!(f.nav.navigation_count(), 0);
    }

    #[tokio::test]
    async fn test_resolved_user_is_authorized() {
        let f = fixture();
        sign_in(&f.store);
        f.sync.resolve().await;
        assert!(f.guard.check("/dashboard").await.is_authorized());
        assert_eq!(f.nav.navigation_count(), 0);
    }

    #[tokio::test]
    async fn test_settle_waits_for_resolution() {
        let f = fixture();
        sign_in(&f.store);
        let (state, _) = tokio::join!(f.guard.settle("/dashboard"), f.sync.resolve());
        assert!(state.is_authorized());
    }

    #[tokio::test]
    async fn test_unresolved_sign_in_is_resolved_not_denied() {
        let f = fixture();
        f.sync.resolve().await;
        // Session appears before the synchronizer has heard about it.
        sign_in(&f.store);
        assert!(f.guard.check("/dashboard").await.is_authorized());
        assert_eq!(f.nav.navigation_count(), 0);
        assert!(f.sync.current_user().is_some());
    }

    #[tokio::test]
    async fn test_switched_account_is_resolved_before_authorizing() {
        let f = fixture();
        sign_in(&f.store);
        let first = f.sync.resolve().await.user().unwrap().id;
        sign_in(&f.store);
        let GuardState::Authorized(user) = f.guard.check("/dashboard").await else {
            panic!("expected the new account to be authorized");
        };
        assert_ne!(user.id, first);
        assert_eq!(
            user.id,
            f.store.current_session().await.unwrap().unwrap().identity_id()
        );
    }

    /// Delays every probe so a check can be overtaken mid-flight.
    struct SlowStore(MemorySessionStore);

    #[async_trait::async_trait]
    impl SessionStore for SlowStore {
        async fn current_session(
            &self,
        ) -> Result<Option<crate::models::Session>, AuthProviderError> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.0.current_session().await
        }

        fn subscribe(&self) -> tokio::sync::broadcast::Receiver<crate::models::SessionEvent> {
            self.0.subscribe()
        }

        async fn sign_in_with_password(
            &self,
            email: &Email,
            password: &newsdesk_core::Password,
        ) -> Result<crate::models::Session, AuthProviderError> {
            self.0.sign_in_with_password(email, password).await
        }

        async fn sign_out(&self) -> Result<(), AuthProviderError> {
            self.0.sign_out().await
        }

        async fn request_password_reset(
            &self,
            email: &Email,
            redirect_to: &Url,
        ) -> Result<(), AuthProviderError> {
            self.0.request_password_reset(email, redirect_to).await
        }

        fn clear_cached_artifacts(&self) {
            self.0.clear_cached_artifacts();
        }
    }

    fn slow_guard() -> (Arc<HistoryNavigator>, RouteGuard) {
        let store: Arc<dyn SessionStore> = Arc::new(SlowStore(MemorySessionStore::new()));
        let repo = Arc::new(MemoryProfileRepository::new());
        let sync = IdentitySynchronizer::new(store.clone(), Arc::new(Provisioner::new(repo)));
        let nav = Arc::new(HistoryNavigator::new("/dashboard"));
        let settings = IdentitySettings::for_site(&Url::parse("http://localhost:5173").unwrap());
        let guard = RouteGuard::new(store, sync, nav.clone(), &settings);
        (nav, guard)
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_suppresses_navigation() {
        let (nav, guard) = slow_guard();
        let (state, ()) = tokio::join!(guard.check("/dashboard"), async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            guard.unmount();
        });
        assert_eq!(state, GuardState::Loading);
        assert_eq!(nav.navigation_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_path_change_supersedes_check() {
        let (nav, guard) = slow_guard();
        let (first, second) = tokio::join!(guard.check("/dashboard"), async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            guard.check("/dashboard/articles").await
        });
        assert_eq!(first, GuardState::Loading);
        assert_eq!(second, GuardState::Denied);
        assert_eq!(nav.navigation_count(), 1);
        assert_eq!(
            nav.take_guard_request().unwrap().return_to,
            "/dashboard/articles"
        );
    }
}
