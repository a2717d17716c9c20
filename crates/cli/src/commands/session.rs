//! Session commands: login, logout, whoami, reset-password.
//!
//! # Environment Variables
//!
//! - `SUPABASE_URL`, `SUPABASE_ANON_KEY` - Identity provider project
//! - `NEWSDESK_SESSION_FILE` - Where the session is persisted between runs
//! - `NEWSDESK_PASSWORD` - Password for `login` when `--password` is omitted

use newsdesk_identity::models::RouteGuardRequest;
use newsdesk_identity::services::{RESET_LINK_SENT, UserState};
use newsdesk_identity::state::IdentityState;

use super::CliError;

/// Sign in and provision the profile row if this is the account's first sign-in.
pub async fn login(
    state: &IdentityState,
    email: &str,
    password: &str,
    return_to: Option<String>,
) -> Result<(), CliError> {
    let flow = state.login();
    let request = return_to.map(|path| RouteGuardRequest::new(path, None));
    let outcome = flow.submit(email, password, request).await?;

    tracing::info!("Signed in as {}", outcome.session.identity_id());
    match (&outcome.profile, &outcome.provisioning_error) {
        (Some(profile), _) => tracing::info!("  Profile: {} (admin: {})", profile.email, profile.is_admin),
        (None, Some(err)) => tracing::warn!("  Profile unavailable: {err}"),
        (None, None) => tracing::warn!("  Account has no email; no profile was created"),
    }
    tracing::info!("  Landing on {}", outcome.destination);
    Ok(())
}

/// Sign out and clear the stored session.
pub async fn logout(state: &IdentityState) -> Result<(), CliError> {
    state.synchronizer().sign_out().await?;
    tracing::info!("Signed out");
    Ok(())
}

/// Resolve the session and print the signed-in profile.
pub async fn whoami(state: &IdentityState) -> Result<(), CliError> {
    match state.synchronizer().resolve().await {
        UserState::SignedIn(user) => {
            tracing::info!("{} ({})", user.email, user.id);
            if let Some(name) = &user.name {
                tracing::info!("  Name: {name}");
            }
            if let Some(language) = &user.preferred_language {
                tracing::info!("  Language: {language}");
            }
            tracing::info!("  Admin: {}", user.is_admin);
            tracing::info!("  Member since: {}", user.created_at.format("%Y-%m-%d"));
            Ok(())
        }
        UserState::SignedOut | UserState::Resolving => {
            if let Some(err) = state.synchronizer().last_error() {
                tracing::warn!("Session lookup failed: {err}");
            }
            Err(CliError::NotSignedIn)
        }
    }
}

/// Email a password-reset link.
pub async fn reset_password(state: &IdentityState, email: &str) -> Result<(), CliError> {
    let attempts = state.login().request_password_reset(email).await?;
    if attempts > 1 {
        tracing::info!("Delivered after {attempts} attempts");
    }
    tracing::info!("{RESET_LINK_SENT}");
    Ok(())
}
