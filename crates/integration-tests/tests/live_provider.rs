//! Round trips against a real hosted project.
//!
//! These tests require:
//! - `SUPABASE_URL` and `SUPABASE_ANON_KEY` for a project with a `users` table
//! - `NEWSDESK_TEST_EMAIL` / `NEWSDESK_TEST_PASSWORD` for a confirmed account
//!
//! Run with: cargo test -p newsdesk-integration-tests -- --ignored

use std::sync::Arc;

use newsdesk_identity::config::IdentityConfig;
use newsdesk_identity::error::IdentityError;
use newsdesk_identity::navigation::HistoryNavigator;
use newsdesk_identity::services::UserState;
use newsdesk_identity::state::IdentityState;

fn live_state() -> (IdentityState, Arc<HistoryNavigator>) {
    let config = IdentityConfig::from_env().expect("Failed to load provider configuration");
    let navigator = Arc::new(HistoryNavigator::new("/login"));
    (IdentityState::from_config(&config, navigator.clone()), navigator)
}

fn test_credentials() -> (String, String) {
    (
        std::env::var("NEWSDESK_TEST_EMAIL").expect("NEWSDESK_TEST_EMAIL not set"),
        std::env::var("NEWSDESK_TEST_PASSWORD").expect("NEWSDESK_TEST_PASSWORD not set"),
    )
}

#[tokio::test]
#[ignore = "Requires a hosted project and test account credentials"]
async fn test_login_resolve_and_sign_out() {
    let (state, navigator) = live_state();
    let (email, password) = test_credentials();

    let outcome = state
        .login()
        .submit(&email, &password, None)
        .await
        .expect("Sign-in failed");
    assert!(outcome.provisioning_error.is_none());
    assert_eq!(navigator.current_path().as_deref(), Some("/dashboard"));

    let resolved = state.synchronizer().resolve().await;
    assert_eq!(
        resolved.user().expect("No profile after sign-in").id,
        outcome.session.identity_id()
    );

    state
        .synchronizer()
        .sign_out()
        .await
        .expect("Sign-out failed");
    assert_eq!(state.synchronizer().resolve().await, UserState::SignedOut);
}

#[tokio::test]
#[ignore = "Requires a hosted project and test account credentials"]
async fn test_wrong_password_is_classified() {
    let (state, _) = live_state();
    let (email, _) = test_credentials();

    let err = state
        .login()
        .submit(&email, "definitely-not-the-password", None)
        .await
        .expect_err("Sign-in should fail");
    assert!(matches!(err, IdentityError::InvalidCredentials));
}
