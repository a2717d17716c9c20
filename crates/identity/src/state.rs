//! Identity state shared across screens.

use std::sync::Arc;

use crate::config::{IdentityConfig, IdentitySettings};
use crate::db::ProfileRepository;
use crate::middleware::RouteGuard;
use crate::navigation::Navigator;
use crate::services::{IdentitySynchronizer, LoginFlow, Provisioner};
use crate::session::{FileStorage, MemoryStorage, SessionStorage, SessionStore};
use crate::supabase::{SupabaseAuth, SupabaseProfiles};

/// Wiring for one running app.
///
/// Cheaply cloneable via `Arc`. Holds the single [`IdentitySynchronizer`]
/// and the [`Provisioner`] it shares with every [`LoginFlow`], so
/// provisioning for one identity is serialized app-wide.
#[derive(Clone)]
pub struct IdentityState {
    inner: Arc<IdentityStateInner>,
}

struct IdentityStateInner {
    store: Arc<dyn SessionStore>,
    provisioner: Arc<Provisioner>,
    navigator: Arc<dyn Navigator>,
    settings: Arc<IdentitySettings>,
    synchronizer: Arc<IdentitySynchronizer>,
}

impl IdentityState {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        profiles: Arc<dyn ProfileRepository>,
        navigator: Arc<dyn Navigator>,
        settings: IdentitySettings,
    ) -> Self {
        let provisioner = Arc::new(Provisioner::new(profiles));
        let synchronizer = IdentitySynchronizer::new(store.clone(), provisioner.clone());
        Self {
            inner: Arc::new(IdentityStateInner {
                store,
                provisioner,
                navigator,
                settings: Arc::new(settings),
                synchronizer,
            }),
        }
    }

    /// Wire the hosted provider and profile table from configuration.
    ///
    /// The session persists to `config.session_file` when set, else only
    /// for the life of the process.
    #[must_use]
    pub fn from_config(config: &IdentityConfig, navigator: Arc<dyn Navigator>) -> Self {
        let storage: Arc<dyn SessionStorage> = match &config.session_file {
            Some(path) => Arc::new(FileStorage::new(path)),
            None => Arc::new(MemoryStorage::new()),
        };
        let auth = SupabaseAuth::new(config, storage);
        let profiles = SupabaseProfiles::new(&config.supabase).with_auth(auth.clone());
        Self::new(
            Arc::new(auth),
            Arc::new(profiles),
            navigator,
            config.settings.clone(),
        )
    }

    #[must_use]
    pub fn synchronizer(&self) -> &Arc<IdentitySynchronizer> {
        &self.inner.synchronizer
    }

    /// A login flow for one mount of the login screen.
    #[must_use]
    pub fn login(&self) -> LoginFlow {
        LoginFlow::new(
            self.inner.store.clone(),
            self.inner.provisioner.clone(),
            self.inner.navigator.clone(),
            self.inner.settings.clone(),
        )
    }

    /// A route guard for one mount of a protected screen.
    #[must_use]
    pub fn route_guard(&self) -> RouteGuard {
        RouteGuard::new(
            self.inner.store.clone(),
            self.inner.synchronizer.clone(),
            self.inner.navigator.clone(),
            &self.inner.settings,
        )
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    #[must_use]
    pub fn profiles(&self) -> &Arc<dyn ProfileRepository> {
        self.inner.provisioner.profiles()
    }

    #[must_use]
    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.inner.navigator
    }

    #[must_use]
    pub fn settings(&self) -> &IdentitySettings {
        &self.inner.settings
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use newsdesk_core::Email;
    use url::Url;

    use super::*;
    use crate::db::MemoryProfileRepository;
    use crate::middleware::GuardState;
    use crate::navigation::HistoryNavigator;
    use crate::services::UserState;
    use crate::session::MemorySessionStore;

    #[tokio::test]
    async fn test_login_then_guard_shares_one_synchronizer() {
        let store = Arc::new(MemorySessionStore::new());
        store.add_account(&Email::parse("desk@example.com").unwrap(), "hunter22");
        let repo = Arc::new(MemoryProfileRepository::new());
        let nav = Arc::new(HistoryNavigator::new("/login"));
        let state = IdentityState::new(
            store,
            repo.clone(),
            nav.clone(),
            IdentitySettings::for_site(&Url::parse("http://localhost:5173").unwrap()),
        );
        let _subscription = state.synchronizer().start().await;

        let outcome = state
            .login()
            .submit("desk@example.com", "hunter22", None)
            .await
            .unwrap();
        assert_eq!(outcome.destination, "/dashboard");

        let mut user = state.synchronizer().watch();
        user.wait_for(|s| matches!(s, UserState::SignedIn(_)))
            .await
            .unwrap();
        assert!(matches!(
            state.route_guard().check("/dashboard").await,
            GuardState::Authorized(_)
        ));
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn test_from_config_without_session_file() {
        let config = IdentityConfig::new(
            Url::parse("https://abcd.supabase.co").unwrap(),
            secrecy::SecretString::from("anon"),
        );
        let state = IdentityState::from_config(&config, Arc::new(HistoryNavigator::default()));
        assert_eq!(state.settings().login_path, "/login");
    }
}
