//! Profile persistence.
//!
//! # Table: `users`
//!
//! One row per identity, keyed by the identity provider's user ID:
//!
//! - `id`, `email`, `is_admin`, `created_at`, `updated_at`
//! - optional: `name`, `avatar_url`, `onboarding_completed`,
//!   `preferred_language`, `user_type`, `role_id`
//!
//! The hosted table is reached through [`crate::supabase::SupabaseProfiles`];
//! [`MemoryProfileRepository`] keeps rows in process.

pub mod memory;

pub use memory::MemoryProfileRepository;

use async_trait::async_trait;

use newsdesk_core::IdentityId;

use crate::models::{NewProfile, ProfilePatch, ProfileRow};

/// Errors that can occur during profile repository operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    /// Requested row was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate primary key).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// The request never got a response.
    #[error("request error: {0}")]
    Request(String),

    /// The table endpoint answered with an error.
    #[error("rejected ({status}): {message}")]
    Rejected {
        status: u16,
        message: String,
    },

    /// The repository is temporarily unusable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Data in the table is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),
}

impl From<reqwest::Error> for RepositoryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::DataCorruption(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// Read and write access to profile rows.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// Get a profile by identity ID.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the lookup fails. A missing row is
    /// `Ok(None)`, not an error.
    async fn get_by_id(&self, id: IdentityId) -> Result<Option<ProfileRow>, RepositoryError>;

    /// Insert a new profile.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if a row with the same ID exists.
    async fn insert(&self, profile: &NewProfile) -> Result<ProfileRow, RepositoryError>;

    /// Apply a partial update and return the updated row.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no row has this ID.
    async fn update(
        &self,
        id: IdentityId,
        patch: &ProfilePatch,
    ) -> Result<ProfileRow, RepositoryError>;
}
