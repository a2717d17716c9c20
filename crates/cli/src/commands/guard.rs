//! Route guard command.

use newsdesk_identity::middleware::GuardState;
use newsdesk_identity::navigation::HistoryNavigator;
use newsdesk_identity::state::IdentityState;

use super::CliError;

/// Run the route guard for `path` once the current user has resolved.
pub async fn check(
    state: &IdentityState,
    navigator: &HistoryNavigator,
    path: &str,
) -> Result<(), CliError> {
    state.synchronizer().resolve().await;
    let guard = state.route_guard();

    match guard.settle(path).await {
        GuardState::Authorized(user) => {
            tracing::info!("{path}: allowed for {}", user.email);
            Ok(())
        }
        GuardState::Loading => {
            tracing::warn!("{path}: still resolving");
            Ok(())
        }
        GuardState::Denied => {
            if let Some(banner) = navigator.banner() {
                tracing::info!("{banner}");
            }
            Err(CliError::Denied {
                path: path.to_owned(),
                login_path: navigator
                    .current_path()
                    .unwrap_or_else(|| state.settings().login_path.clone()),
            })
        }
    }
}
