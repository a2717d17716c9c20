//! Login flow controller.
//!
//! Validates credentials locally, submits them, provisions the profile on a
//! best-effort basis, and navigates to where the visitor was going. Also
//! owns the password-reset affordance.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use newsdesk_core::{Email, IdentityId, Password};

use crate::config::IdentitySettings;
use crate::error::{IdentityError, ValidationError, add_breadcrumb, report_error};
use crate::models::{CurrentUser, RouteGuardRequest, Session};
use crate::navigation::{NavigateOptions, Navigator};
use crate::services::identity::UserState;
use crate::services::provisioning::Provisioner;
use crate::services::reset::dispatch_with_retry;
use crate::session::{AuthProviderError, SessionStore};

/// Shown once a password-reset email has been dispatched.
pub const RESET_LINK_SENT: &str = "Check your email for the password reset link";

/// How the login flow waits for a new session to become readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSettle {
    /// Poll the session store until it reports the new session.
    Confirm { attempts: u32, interval: Duration },
    /// Sleep for a fixed time.
    FixedDelay(Duration),
}

impl Default for SessionSettle {
    fn default() -> Self {
        Self::Confirm {
            attempts: 10,
            interval: Duration::from_millis(100),
        }
    }
}

/// Result of a successful credential submission.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    /// Path the visitor was (or would have been) sent to.
    pub destination: String,
    pub session: Session,
    /// Profile row, when provisioning succeeded.
    pub profile: Option<CurrentUser>,
    /// Provisioning failure. Login still succeeded.
    pub provisioning_error: Option<IdentityError>,
    /// `false` if the flow was abandoned before it could navigate.
    pub navigated: bool,
}

/// Drives the login screen.
pub struct LoginFlow {
    store: Arc<dyn SessionStore>,
    provisioner: Arc<Provisioner>,
    navigator: Arc<dyn Navigator>,
    settings: Arc<IdentitySettings>,
    generation: AtomicU64,
}

impl LoginFlow {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        provisioner: Arc<Provisioner>,
        navigator: Arc<dyn Navigator>,
        settings: Arc<IdentitySettings>,
    ) -> Self {
        Self {
            store,
            provisioner,
            navigator,
            settings,
            generation: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &IdentitySettings {
        &self.settings
    }

    /// Where a login should land.
    ///
    /// The guard's return path wins when it is an app-local absolute path.
    #[must_use]
    pub fn destination(&self, request: Option<&RouteGuardRequest>) -> String {
        request
            .map(|request| request.return_to.as_str())
            .filter(|path| path.starts_with('/') && !path.starts_with("//"))
            .unwrap_or(self.settings.landing_path.as_str())
            .to_owned()
    }

    /// Stop any in-flight submission from navigating (the screen went away).
    pub fn abandon(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Submit credentials.
    ///
    /// # Errors
    ///
    /// - `IdentityError::Validation` before any network call
    /// - `IdentityError::InvalidCredentials` when the provider rejects the pair
    /// - `IdentityError::OtherAuth` for any other provider rejection
    pub async fn submit(
        &self,
        email: &str,
        password: &str,
        request: Option<RouteGuardRequest>,
    ) -> Result<LoginOutcome, IdentityError> {
        let email = Email::parse(email).map_err(ValidationError::InvalidEmail)?;
        let password = Password::parse(password).map_err(ValidationError::from)?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // A stale session from another account must not leak into this one.
        if let Err(err) = self.store.sign_out().await {
            tracing::warn!(error = %err, "Clearing previous session failed");
        }

        let session = self
            .store
            .sign_in_with_password(&email.normalized(), &password)
            .await
            .map_err(|err| classify_sign_in_error(&err))?;
        tracing::info!(identity_id = %session.identity_id(), "Sign-in succeeded");
        add_breadcrumb("auth", "Signed in", None);

        let (profile, provisioning_error) = match self.provisioner.ensure_profile(&session).await
        {
            Ok(outcome) => (outcome.into_row(), None),
            Err(err) => {
                report_error("Profile provisioning after sign-in failed", &err);
                (None, Some(IdentityError::Provisioning(err)))
            }
        };

        self.await_session(session.identity_id()).await;

        let destination = self.destination(request.as_ref());
        let navigated = self.generation.load(Ordering::SeqCst) == generation;
        if navigated {
            self.navigator.navigate(&destination, NavigateOptions::replace());
        } else {
            tracing::debug!(%destination, "Login abandoned, not navigating");
        }

        Ok(LoginOutcome {
            destination,
            session,
            profile,
            provisioning_error,
            navigated,
        })
    }

    async fn await_session(&self, id: IdentityId) {
        match self.settings.session_settle {
            SessionSettle::FixedDelay(delay) => tokio::time::sleep(delay).await,
            SessionSettle::Confirm { attempts, interval } => {
                for attempt in 1..=attempts.max(1) {
                    match self.store.current_session().await {
                        Ok(Some(session)) if session.identity_id() == id => return,
                        Ok(_) => {}
                        Err(err) => {
                            tracing::debug!(attempt, error = %err, "Session not readable yet");
                        }
                    }
                    tokio::time::sleep(interval).await;
                }
                tracing::warn!(identity_id = %id, "Session not confirmed, navigating anyway");
            }
        }
    }

    /// Ask the provider to email a password-reset link, retrying transient
    /// failures with exponential backoff.
    ///
    /// Returns the number of attempts it took.
    ///
    /// # Errors
    ///
    /// - `IdentityError::Validation` for an empty or malformed email, before
    ///   any network call
    /// - `IdentityError::ResetDelivery` once retries are exhausted or the
    ///   provider rejects the request outright
    pub async fn request_password_reset(&self, email: &str) -> Result<u32, IdentityError> {
        if email.is_empty() {
            return Err(ValidationError::MissingEmail.into());
        }
        let email = Email::parse(email).map_err(ValidationError::InvalidResetEmail)?;

        let store = &self.store;
        let address = &email;
        let redirect_to = &self.settings.reset_redirect;
        let attempts = dispatch_with_retry(&self.settings.reset_policy, move || {
            store.request_password_reset(address, redirect_to)
        })
        .await?;

        tracing::info!(attempts, "Password reset email dispatched");
        add_breadcrumb("auth", "Password reset requested", None);
        Ok(attempts)
    }

    /// Leave the login screen if the visitor is already signed in.
    ///
    /// Returns the destination navigated to.
    pub fn redirect_if_signed_in(
        &self,
        state: &UserState,
        request: Option<&RouteGuardRequest>,
    ) -> Option<String> {
        state.user()?;
        let destination = self.destination(request);
        self.navigator.navigate(&destination, NavigateOptions::replace());
        Some(destination)
    }
}

fn classify_sign_in_error(err: &AuthProviderError) -> IdentityError {
    if err.is_invalid_credentials() {
        tracing::info!("Sign-in rejected: invalid credentials");
        IdentityError::InvalidCredentials
    } else {
        tracing::warn!(error = %err, "Sign-in failed");
        IdentityError::OtherAuth(err.message().to_owned())
    }
}
