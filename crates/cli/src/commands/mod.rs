//! CLI command implementations.

pub mod guard;
pub mod profile;
pub mod session;

use newsdesk_identity::error::IdentityError;

/// Errors that can end a command.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// The command needs a signed-in user.
    #[error("Not signed in. Run `newsdesk login` first.")]
    NotSignedIn,

    /// The route guard refused the path.
    #[error("Access to {path} denied; sign in at {login_path}")]
    Denied { path: String, login_path: String },
}

impl CliError {
    /// Message shown to the person at the terminal.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Identity(err) => err.user_message(),
            other => other.to_string(),
        }
    }
}
