//! Profile auto-provisioning.
//!
//! The first time an identity is seen, a profile row is created for it. Both
//! the synchronizer and the login flow call [`Provisioner::ensure_profile`];
//! sharing one provisioner between them is what keeps the row unique.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::db::{ProfileRepository, RepositoryError};
use crate::models::{NewProfile, ProfileRow, Session};

/// What `ensure_profile` found or did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// A row already existed.
    Existing(ProfileRow),
    /// A row was inserted for the session's identity.
    Created(ProfileRow),
    /// No row exists and the session has no email to create one with.
    NoEmail,
}

impl ProvisionOutcome {
    /// The profile row, if there is one.
    #[must_use]
    pub const fn row(&self) -> Option<&ProfileRow> {
        match self {
            Self::Existing(row) | Self::Created(row) => Some(row),
            Self::NoEmail => None,
        }
    }

    #[must_use]
    pub fn into_row(self) -> Option<ProfileRow> {
        match self {
            Self::Existing(row) | Self::Created(row) => Some(row),
            Self::NoEmail => None,
        }
    }
}

/// Idempotent get-or-insert of profile rows.
pub struct Provisioner {
    profiles: Arc<dyn ProfileRepository>,
    lock: Mutex<()>,
}

impl Provisioner {
    #[must_use]
    pub fn new(profiles: Arc<dyn ProfileRepository>) -> Self {
        Self {
            profiles,
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn profiles(&self) -> &Arc<dyn ProfileRepository> {
        &self.profiles
    }

    /// Fetch the session's profile row, creating it if missing.
    ///
    /// Calls are serialized. An insert conflict means another writer created
    /// the row first, so the row is re-read instead of failing.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the lookup or insert fails.
    pub async fn ensure_profile(
        &self,
        session: &Session,
    ) -> Result<ProvisionOutcome, RepositoryError> {
        let _guard = self.lock.lock().await;
        let id = session.identity_id();

        if let Some(row) = self.profiles.get_by_id(id).await? {
            return Ok(ProvisionOutcome::Existing(row));
        }

        let Some(email) = session.email() else {
            tracing::warn!(identity_id = %id, "No profile row and no email to create one with");
            return Ok(ProvisionOutcome::NoEmail);
        };

        let profile = NewProfile::for_identity(id, email.clone(), Utc::now());
        match self.profiles.insert(&profile).await {
            Ok(row) => {
                tracing::info!(identity_id = %id, "Created profile row");
                Ok(ProvisionOutcome::Created(row))
            }
            Err(RepositoryError::Conflict(reason)) => {
                tracing::debug!(identity_id = %id, %reason, "Profile created concurrently, re-reading");
                self.profiles
                    .get_by_id(id)
                    .await?
                    .map(ProvisionOutcome::Existing)
                    .ok_or(RepositoryError::Conflict(reason))
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use newsdesk_core::{Email, IdentityId};

    use super::*;
    use crate::db::MemoryProfileRepository;
    use crate::session::MemorySessionStore;

    fn setup() -> (Arc<MemoryProfileRepository>, Provisioner) {
        let repo = Arc::new(MemoryProfileRepository::new());
        let provisioner = Provisioner::new(repo.clone());
        (repo, provisioner)
    }

    fn session() -> Session {
        MemorySessionStore::session_for(
            IdentityId::random(),
            Some(Email::parse("editor@example.com").unwrap()),
        )
    }

    #[tokio::test]
    async fn test_creates_missing_row() {
        let (repo, provisioner) = setup();
        let outcome = provisioner.ensure_profile(&session()).await.unwrap();
        assert!(matches!(outcome, ProvisionOutcome::Created(ref row) if !row.is_admin));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_second_call_finds_existing_row() {
        let (repo, provisioner) = setup();
        let session = session();
        provisioner.ensure_profile(&session).await.unwrap();
        let outcome = provisioner.ensure_profile(&session).await.unwrap();
        assert!(matches!(outcome, ProvisionOutcome::Existing(_)));
        assert_eq!(repo.insert_count(), 1);
    }

    #[tokio::test]
    async fn test_no_email_creates_nothing() {
        let (repo, provisioner) = setup();
        let session = MemorySessionStore::session_for(IdentityId::random(), None);
        let outcome = provisioner.ensure_profile(&session).await.unwrap();
        assert_eq!(outcome, ProvisionOutcome::NoEmail);
        assert!(repo.is_empty());
    }

    /// Misses the first lookup, as if another writer inserted right after it.
    struct LateWriter {
        inner: MemoryProfileRepository,
        missed: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl ProfileRepository for LateWriter {
        async fn get_by_id(&self, id: IdentityId) -> Result<Option<ProfileRow>, RepositoryError> {
            if !self.missed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.get_by_id(id).await
        }

        async fn insert(&self, profile: &NewProfile) -> Result<ProfileRow, RepositoryError> {
            self.inner.insert(profile).await
        }

        async fn update(
            &self,
            id: IdentityId,
            patch: &crate::models::ProfilePatch,
        ) -> Result<ProfileRow, RepositoryError> {
            self.inner.update(id, patch).await
        }
    }

    #[tokio::test]
    async fn test_conflict_rereads_row() {
        let session = session();
        let inner = MemoryProfileRepository::new();
        inner.seed(
            NewProfile::for_identity(
                session.identity_id(),
                session.email().unwrap().clone(),
                Utc::now(),
            )
            .into_row(),
        );
        let repo = Arc::new(LateWriter {
            inner,
            missed: std::sync::atomic::AtomicBool::new(false),
        });
        let provisioner = Provisioner::new(repo.clone());

        let outcome = provisioner.ensure_profile(&session).await.unwrap();
        assert!(matches!(outcome, ProvisionOutcome::Existing(_)));
        assert_eq!(repo.inner.conflict_count(), 1);
        assert_eq!(repo.inner.insert_count(), 0);
    }

    #[tokio::test]
    async fn test_insert_failure_propagates() {
        let (repo, provisioner) = setup();
        repo.fail_next_insert(RepositoryError::Unavailable("read-only".to_owned()));
        let err = provisioner.ensure_profile(&session()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Unavailable(_)));
        assert!(repo.is_empty());
    }
}
