//! Unified error handling with Sentry integration.
//!
//! [`IdentityError`] is what the login flow and the synchronizer's explicit
//! operations return. Failures that are swallowed at a component boundary
//! (provisioning during resolution, session probe failures) go through
//! [`report_error`] so they still reach the logs and Sentry.

use thiserror::Error;

use newsdesk_core::{EmailError, PasswordError};

use crate::db::RepositoryError;
use crate::session::AuthProviderError;

/// Client-side validation failure. Raised before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Password reset requested with an empty email field.
    #[error("email is required")]
    MissingEmail,

    /// Email failed the format check on the sign-in form.
    #[error("invalid email: {0}")]
    InvalidEmail(EmailError),

    /// Email failed the format check on the password-reset affordance.
    #[error("invalid email for password reset: {0}")]
    InvalidResetEmail(EmailError),

    /// Password below the minimum length.
    #[error("password must be at least {min} characters long")]
    PasswordTooShort {
        /// Minimum accepted length.
        min: usize,
    },
}

impl From<PasswordError> for ValidationError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::TooShort { min } => Self::PasswordTooShort { min },
        }
    }
}

/// Errors surfaced by the identity layer.
#[derive(Debug, Clone, Error)]
pub enum IdentityError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The provider rejected the email/password pair.
    #[error("invalid login credentials")]
    InvalidCredentials,

    /// Any other provider rejection, with the raw message.
    #[error("sign-in failed: {0}")]
    OtherAuth(String),

    /// Profile fetch or auto-provisioning failed.
    #[error("profile provisioning failed: {0}")]
    Provisioning(RepositoryError),

    /// The provider refused to end the session.
    #[error("sign-out failed: {0}")]
    SignOut(AuthProviderError),

    /// An operation needed a signed-in user and there was none.
    #[error("no user logged in")]
    NoActiveUser,

    /// Password-reset email could not be dispatched.
    #[error("password reset dispatch failed after {attempts} attempt(s): {last}")]
    ResetDelivery {
        /// Attempts made, including the last one.
        attempts: u32,
        /// Error from the last attempt.
        last: AuthProviderError,
    },

    /// Profile update failed.
    #[error("profile update failed: {0}")]
    Repository(RepositoryError),
}

impl IdentityError {
    /// Banner text for the login screen or profile form.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(ValidationError::MissingEmail) => {
                "Please enter your email address to reset your password".to_owned()
            }
            Self::Validation(ValidationError::InvalidEmail(_)) => {
                "Please enter a valid email address".to_owned()
            }
            Self::Validation(ValidationError::InvalidResetEmail(_)) => {
                "Please enter a valid email address to reset your password".to_owned()
            }
            Self::Validation(ValidationError::PasswordTooShort { min }) => {
                format!("Password must be at least {min} characters long")
            }
            Self::InvalidCredentials => "The email or password you entered is incorrect".to_owned(),
            Self::OtherAuth(message) if message.trim().is_empty() => {
                "An error occurred during sign in".to_owned()
            }
            Self::OtherAuth(message) => message.clone(),
            Self::Provisioning(_) => "We couldn't load your profile. Please try again.".to_owned(),
            Self::SignOut(_) => "Failed to sign out. Please try again.".to_owned(),
            Self::NoActiveUser => "No user logged in".to_owned(),
            Self::ResetDelivery { .. } => {
                "Unable to send password reset email. Please try again later.".to_owned()
            }
            Self::Repository(_) => "Failed to save your profile. Please try again.".to_owned(),
        }
    }

    /// Whether the login screen should show the "forgot password" affordance.
    #[must_use]
    pub const fn offers_password_reset(&self) -> bool {
        matches!(self, Self::InvalidCredentials)
    }
}

/// Result type alias for `IdentityError`.
pub type Result<T> = std::result::Result<T, IdentityError>;

/// Log an error and capture it to Sentry.
///
/// Returns the Sentry event ID.
pub fn report_error<E>(context: &str, err: &E) -> sentry::types::Uuid
where
    E: std::error::Error + ?Sized,
{
    let event_id = sentry::capture_error(err);
    tracing::error!(
        error = %err,
        sentry_event_id = %event_id,
        "{context}"
    );
    event_id
}

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on logout to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for user actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of user actions
/// leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("navigation", "Redirected to login", Some(&[("return_to", "/dashboard")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
