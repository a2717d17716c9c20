//! Password type.

use core::fmt;

use secrecy::{ExposeSecret, SecretString};

/// Errors that can occur when accepting a [`Password`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PasswordError {
    /// The password is shorter than the provider accepts.
    #[error("password must be at least {min} characters long")]
    TooShort {
        /// Minimum allowed length.
        min: usize,
    },
}

/// A sign-in password.
///
/// Only the length is checked locally; everything else is the identity
/// provider's job. The value never appears in `Debug` output.
#[derive(Clone)]
pub struct Password(SecretString);

impl Password {
    /// Minimum length accepted by the sign-in form.
    pub const MIN_LENGTH: usize = 6;

    /// Accept a password if it meets the minimum length.
    ///
    /// # Errors
    ///
    /// Returns `PasswordError::TooShort` for passwords under 6 characters.
    pub fn parse(s: &str) -> Result<Self, PasswordError> {
        if s.chars().count() < Self::MIN_LENGTH {
            return Err(PasswordError::TooShort {
                min: Self::MIN_LENGTH,
            });
        }
        Ok(Self(SecretString::from(s)))
    }

    /// Expose the password for submission to the identity provider.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password([REDACTED])")
    }
}
