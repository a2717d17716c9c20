//! Profile commands.

use clap::Args;

use newsdesk_core::RoleId;
use newsdesk_identity::models::ProfilePatch;
use newsdesk_identity::services::UserState;
use newsdesk_identity::state::IdentityState;

use super::CliError;

#[derive(Debug, Args)]
pub struct UpdateArgs {
    /// Display name
    #[arg(long)]
    name: Option<String>,

    /// Avatar image URL
    #[arg(long)]
    avatar_url: Option<String>,

    /// Preferred UI language code (e.g. `en`, `fr`)
    #[arg(long)]
    language: Option<String>,

    /// Account type (e.g. `journalist`, `business`)
    #[arg(long)]
    user_type: Option<String>,

    /// Mark onboarding as finished (or not)
    #[arg(long)]
    onboarding_completed: Option<bool>,

    /// Role reference
    #[arg(long)]
    role_id: Option<i64>,
}

impl From<UpdateArgs> for ProfilePatch {
    fn from(args: UpdateArgs) -> Self {
        Self {
            name: args.name,
            avatar_url: args.avatar_url,
            onboarding_completed: args.onboarding_completed,
            preferred_language: args.language,
            user_type: args.user_type,
            role_id: args.role_id.map(RoleId::new),
        }
    }
}

/// Apply a partial update to the signed-in user's profile.
pub async fn update(state: &IdentityState, args: UpdateArgs) -> Result<(), CliError> {
    let patch = ProfilePatch::from(args);
    if patch.is_empty() {
        tracing::warn!("Nothing to update");
        return Ok(());
    }

    let sync = state.synchronizer();
    if !matches!(sync.resolve().await, UserState::SignedIn(_)) {
        return Err(CliError::NotSignedIn);
    }

    let user = sync.update_profile(patch).await?;
    tracing::info!("Profile updated for {}", user.email);
    Ok(())
}
