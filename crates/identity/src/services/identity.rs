//! Identity synchronizer.
//!
//! Sole writer of the current user. Resolves it from the session store on
//! start, keeps it current from session lifecycle events, and exposes the
//! explicit sign-out and profile-update operations.
//!
//! Every resolution takes a generation token when it starts. A result is
//! applied only if its token is newer than the last applied one, so a slow
//! resolution can never overwrite the outcome of a later one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::db::ProfileRepository;
use crate::error::{IdentityError, clear_sentry_user, report_error, set_sentry_user};
use crate::models::{CurrentUser, ProfilePatch, Session, SessionEvent};
use crate::services::provisioning::Provisioner;
use crate::session::SessionStore;

/// Published identity state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserState {
    /// First resolution still running.
    Resolving,
    SignedIn(CurrentUser),
    SignedOut,
}

impl UserState {
    #[must_use]
    pub const fn is_resolving(&self) -> bool {
        matches!(self, Self::Resolving)
    }

    /// The signed-in user, if any.
    #[must_use]
    pub const fn user(&self) -> Option<&CurrentUser> {
        match self {
            Self::SignedIn(user) => Some(user),
            Self::Resolving | Self::SignedOut => None,
        }
    }
}

/// Callback invoked with the new state after each session event.
pub type StateHandler = Arc<dyn Fn(&UserState) + Send + Sync>;

/// Outcome of one resolution, before it is applied.
struct Resolution {
    state: UserState,
    error: Option<String>,
}

impl Resolution {
    const fn signed_in(user: CurrentUser) -> Self {
        Self {
            state: UserState::SignedIn(user),
            error: None,
        }
    }

    const fn signed_out() -> Self {
        Self {
            state: UserState::SignedOut,
            error: None,
        }
    }

    fn failed(error: &impl ToString) -> Self {
        Self {
            state: UserState::SignedOut,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Default)]
struct Handlers {
    next_id: u64,
    entries: Vec<(u64, StateHandler)>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps the current user in step with the session store.
pub struct IdentitySynchronizer {
    store: Arc<dyn SessionStore>,
    provisioner: Arc<Provisioner>,
    state: watch::Sender<UserState>,
    issued: AtomicU64,
    applied: Mutex<u64>,
    last_error: Mutex<Option<String>>,
    handlers: Mutex<Handlers>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl IdentitySynchronizer {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, provisioner: Arc<Provisioner>) -> Arc<Self> {
        let (state, _) = watch::channel(UserState::Resolving);
        Arc::new(Self {
            store,
            provisioner,
            state,
            issued: AtomicU64::new(0),
            applied: Mutex::new(0),
            last_error: Mutex::new(None),
            handlers: Mutex::new(Handlers::default()),
            listener: Mutex::new(None),
        })
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> UserState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every published state.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<UserState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn current_user(&self) -> Option<CurrentUser> {
        self.state.borrow().user().cloned()
    }

    /// Message of the failure recorded by the last applied resolution.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    fn profiles(&self) -> &Arc<dyn ProfileRepository> {
        self.provisioner.profiles()
    }

    fn next_generation(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Attach the event listener, then resolve once.
    ///
    /// The returned subscription keeps the listener alive.
    pub async fn start(self: &Arc<Self>) -> Subscription {
        let subscription = self.subscribe(|_| {});
        self.resolve().await;
        subscription
    }

    /// Resolve the current user from the session store.
    ///
    /// Failures resolve to signed-out and are recorded, never returned.
    pub async fn resolve(&self) -> UserState {
        let generation = self.next_generation();
        let resolution = match self.store.current_session().await {
            Ok(Some(session)) => self.resolve_session(&session).await,
            Ok(None) => Resolution::signed_out(),
            Err(err) => {
                report_error("Session probe failed", &err);
                Resolution::failed(&err)
            }
        };
        self.apply(generation, resolution);
        self.state()
    }

    async fn resolve_session(&self, session: &Session) -> Resolution {
        match self.provisioner.ensure_profile(session).await {
            Ok(outcome) => outcome.into_row().map_or_else(
                || {
                    tracing::info!(
                        identity_id = %session.identity_id(),
                        "Session has no profile and none can be provisioned"
                    );
                    Resolution::signed_out()
                },
                Resolution::signed_in,
            ),
            Err(err) => {
                report_error("Profile provisioning failed", &err);
                Resolution::failed(&err)
            }
        }
    }

    fn apply(&self, generation: u64, resolution: Resolution) -> bool {
        self.apply_if(generation, resolution, |_| true)
    }

    fn apply_if(
        &self,
        generation: u64,
        resolution: Resolution,
        precondition: impl FnOnce(&UserState) -> bool,
    ) -> bool {
        let mut applied = lock(&self.applied);
        if generation <= *applied {
            tracing::debug!(generation, applied = *applied, "Discarding stale resolution");
            return false;
        }
        if !precondition(&self.state.borrow()) {
            tracing::debug!(generation, "Resolution precondition no longer holds");
            return false;
        }
        *applied = generation;
        *lock(&self.last_error) = resolution.error;

        match &resolution.state {
            UserState::SignedIn(user) => {
                set_sentry_user(&user.id, Some(user.email.as_str()));
                tracing::info!(user_id = %user.id, is_admin = user.is_admin, "User resolved");
            }
            UserState::SignedOut => {
                clear_sentry_user();
                tracing::info!("No active user");
            }
            UserState::Resolving => {}
        }
        self.state.send_replace(resolution.state);
        true
    }

    /// Register `handler` for session events.
    ///
    /// The handler runs after each event has been applied, with the state it
    /// produced. Events are handled one at a time, in emission order.
    pub fn subscribe(
        self: &Arc<Self>,
        handler: impl Fn(&UserState) + Send + Sync + 'static,
    ) -> Subscription {
        let id = {
            let mut handlers = lock(&self.handlers);
            handlers.next_id += 1;
            let id = handlers.next_id;
            handlers.entries.push((id, Arc::new(handler)));
            id
        };
        self.ensure_listener();
        Subscription {
            id,
            owner: Arc::downgrade(self),
        }
    }

    fn ensure_listener(self: &Arc<Self>) {
        let mut listener = lock(&self.listener);
        if listener.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let events = self.store.subscribe();
        *listener = Some(tokio::spawn(listen(Arc::downgrade(self), events)));
        tracing::debug!("Session event listener started");
    }

    fn remove_handler(&self, id: u64) {
        let idle = {
            let mut handlers = lock(&self.handlers);
            handlers.entries.retain(|(entry_id, _)| *entry_id != id);
            handlers.entries.is_empty()
        };
        if idle && let Some(handle) = lock(&self.listener).take() {
            handle.abort();
            tracing::debug!("Session event listener stopped");
        }
    }

    fn notify(&self) {
        let handlers: Vec<StateHandler> = lock(&self.handlers)
            .entries
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        let state = self.state();
        for handler in handlers {
            handler(&state);
        }
    }

    async fn handle_event(&self, event: SessionEvent) {
        tracing::debug!(event = event.kind(), "Session event");
        let generation = self.next_generation();
        let resolution = match &event {
            SessionEvent::SignedIn(session) | SessionEvent::TokenRefreshed(session) => {
                self.resolve_session(session).await
            }
            SessionEvent::SignedOut => Resolution::signed_out(),
        };
        self.apply(generation, resolution);
        self.notify();
    }

    /// End the session.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::SignOut` if the store rejects the request; the
    /// current user is left as it was.
    pub async fn sign_out(&self) -> Result<(), IdentityError> {
        self.store.clear_cached_artifacts();
        if let Err(err) = self.store.sign_out().await {
            tracing::warn!(error = %err, "Sign-out rejected");
            return Err(IdentityError::SignOut(err));
        }
        let generation = self.next_generation();
        self.apply(generation, Resolution::signed_out());
        Ok(())
    }

    /// Update the signed-in user's profile.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::NoActiveUser` when nobody is signed in, or
    /// `IdentityError::Repository` if the update fails.
    pub async fn update_profile(&self, patch: ProfilePatch) -> Result<CurrentUser, IdentityError> {
        let user = self.current_user().ok_or(IdentityError::NoActiveUser)?;
        let generation = self.next_generation();
        let row = self
            .profiles()
            .update(user.id, &patch)
            .await
            .map_err(|err| {
                tracing::warn!(user_id = %user.id, error = %err, "Profile update failed");
                IdentityError::Repository(err)
            })?;
        // Skip publishing if the user signed out while the update was in flight.
        self.apply_if(generation, Resolution::signed_in(row.clone()), |state| {
            state.user().is_some_and(|current| current.id == row.id)
        });
        Ok(row)
    }
}

async fn listen(owner: Weak<IdentitySynchronizer>, mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let Some(sync) = owner.upgrade() else { break };
                sync.handle_event(event).await;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                let Some(sync) = owner.upgrade() else { break };
                tracing::warn!(skipped, "Session event listener lagged, re-resolving");
                sync.resolve().await;
                sync.notify();
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Registration returned by [`IdentitySynchronizer::subscribe`].
///
/// Dropping it unsubscribes. When the last subscription goes, the event
/// listener is aborted.
#[derive(Debug)]
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    owner: Weak<IdentitySynchronizer>,
}

impl Subscription {
    /// Unsubscribe now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.remove_handler(self.id);
        }
    }
}
