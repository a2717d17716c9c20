//! In-memory profile repository.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use newsdesk_core::IdentityId;

use super::{ProfileRepository, RepositoryError};
use crate::models::{NewProfile, ProfilePatch, ProfileRow};

#[derive(Debug, Default)]
struct Inner {
    rows: HashMap<IdentityId, ProfileRow>,
    get_failures: VecDeque<RepositoryError>,
    insert_failures: VecDeque<RepositoryError>,
    update_failures: VecDeque<RepositoryError>,
    inserts: usize,
    conflicts: usize,
}

/// Profile rows kept in a `HashMap`.
///
/// The duplicate check and the write happen under one lock, so concurrent
/// inserts for the same ID produce exactly one row and a `Conflict` for the
/// rest. An optional latency is applied before every operation.
#[derive(Debug, Default)]
pub struct MemoryProfileRepository {
    inner: Mutex<Inner>,
    latency: Mutex<Option<Duration>>,
}

impl MemoryProfileRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Store a row directly.
    pub fn seed(&self, row: ProfileRow) {
        self.lock().rows.insert(row.id, row);
    }

    /// Read a row without delay or scripted failures.
    #[must_use]
    pub fn row(&self, id: IdentityId) -> Option<ProfileRow> {
        self.lock().rows.get(&id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().rows.is_empty()
    }

    /// Number of successful inserts.
    #[must_use]
    pub fn insert_count(&self) -> usize {
        self.lock().inserts
    }

    /// Number of inserts rejected as duplicates.
    #[must_use]
    pub fn conflict_count(&self) -> usize {
        self.lock().conflicts
    }

    pub fn fail_next_get(&self, err: RepositoryError) {
        self.lock().get_failures.push_back(err);
    }

    pub fn fail_next_insert(&self, err: RepositoryError) {
        self.lock().insert_failures.push_back(err);
    }

    pub fn fail_next_update(&self, err: RepositoryError) {
        self.lock().update_failures.push_back(err);
    }

    async fn delay(&self) {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ProfileRepository for MemoryProfileRepository {
    async fn get_by_id(&self, id: IdentityId) -> Result<Option<ProfileRow>, RepositoryError> {
        self.delay().await;
        let mut inner = self.lock();
        if let Some(err) = inner.get_failures.pop_front() {
            return Err(err);
        }
        Ok(inner.rows.get(&id).cloned())
    }

    async fn insert(&self, profile: &NewProfile) -> Result<ProfileRow, RepositoryError> {
        self.delay().await;
        let mut inner = self.lock();
        if let Some(err) = inner.insert_failures.pop_front() {
            return Err(err);
        }
        if inner.rows.contains_key(&profile.id) {
            inner.conflicts += 1;
            return Err(RepositoryError::Conflict(format!(
                "duplicate key value violates unique constraint \"users_pkey\" ({})",
                profile.id
            )));
        }
        let row = profile.clone().into_row();
        inner.rows.insert(row.id, row.clone());
        inner.inserts += 1;
        Ok(row)
    }

    async fn update(
        &self,
        id: IdentityId,
        patch: &ProfilePatch,
    ) -> Result<ProfileRow, RepositoryError> {
        self.delay().await;
        let mut inner = self.lock();
        if let Some(err) = inner.update_failures.pop_front() {
            return Err(err);
        }
        let row = inner.rows.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        patch.apply_to(row);
        row.updated_at = Utc::now();
        Ok(row.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use newsdesk_core::Email;

    use super::*;

    fn new_profile() -> NewProfile {
        NewProfile::for_identity(
            IdentityId::random(),
            Email::parse("desk@example.com").unwrap(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_insert_then_get() {
        let repo = MemoryProfileRepository::new();
        let profile = new_profile();
        repo.insert(&profile).await.unwrap();
        let row = repo.get_by_id(profile.id).await.unwrap().unwrap();
        assert_eq!(row.email, profile.email);
        assert_eq!(repo.insert_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_insert_conflicts() {
        let repo = MemoryProfileRepository::new();
        let profile = new_profile();
        repo.insert(&profile).await.unwrap();
        let err = repo.insert(&profile).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.conflict_count(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_row() {
        let repo = MemoryProfileRepository::new();
        let err = repo
            .update(IdentityId::random(), &ProfilePatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_update_applies_patch() {
        let repo = MemoryProfileRepository::new();
        let profile = new_profile();
        repo.insert(&profile).await.unwrap();
        let row = repo
            .update(
                profile.id,
                &ProfilePatch {
                    name: Some("Desk".to_owned()),
                    ..ProfilePatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(row.name.as_deref(), Some("Desk"));
        assert!(row.updated_at >= row.created_at);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let repo = MemoryProfileRepository::new();
        repo.fail_next_get(RepositoryError::Unavailable("maintenance".to_owned()));
        assert!(repo.get_by_id(IdentityId::random()).await.is_err());
        assert!(repo.get_by_id(IdentityId::random()).await.unwrap().is_none());
    }
}
