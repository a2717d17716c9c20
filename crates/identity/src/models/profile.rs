//! Profile domain types.
//!
//! A profile row lives in the application's `users` table and is keyed by
//! the identity provider's user ID.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use newsdesk_core::{Email, IdentityId, RoleId};

/// The signed-in user's profile.
///
/// Either absent or backed by exactly one active provider session; the
/// [`IdentitySynchronizer`](crate::services::IdentitySynchronizer) is the
/// only thing that sets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    /// Identity-provider user ID (also the profile primary key).
    pub id: IdentityId,
    /// Email address the account signed up with.
    pub email: Email,
    /// Whether the user may use admin-only screens.
    #[serde(default)]
    pub is_admin: bool,
    /// When the profile row was created.
    pub created_at: DateTime<Utc>,
    /// When the profile row was last updated.
    pub updated_at: DateTime<Utc>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Avatar image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Whether the onboarding walkthrough was finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onboarding_completed: Option<bool>,
    /// Preferred UI language code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_language: Option<String>,
    /// Free-form account type (e.g. "journalist", "business").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
    /// Role reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<RoleId>,
}

/// A row as stored by the profile repository.
pub type ProfileRow = CurrentUser;

/// Insert payload for auto-provisioning a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewProfile {
    pub id: IdentityId,
    pub email: Email,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewProfile {
    /// Build the first-sight profile for an identity. Never an admin.
    #[must_use]
    pub fn for_identity(id: IdentityId, email: Email, now: DateTime<Utc>) -> Self {
        Self {
            id,
            email,
            is_admin: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// The row this payload produces when nothing else fills in columns.
    #[must_use]
    pub fn into_row(self) -> ProfileRow {
        CurrentUser {
            id: self.id,
            email: self.email,
            is_admin: self.is_admin,
            created_at: self.created_at,
            updated_at: self.updated_at,
            name: None,
            avatar_url: None,
            onboarding_completed: None,
            preferred_language: None,
            user_type: None,
            role_id: None,
        }
    }
}

/// Partial profile update.
///
/// Only the user-editable columns are here; `id`, `email`, `is_admin` and the
/// timestamps are owned by the provider or the database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onboarding_completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<RoleId>,
}

impl ProfilePatch {
    /// Returns `true` if the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.avatar_url.is_none()
            && self.onboarding_completed.is_none()
            && self.preferred_language.is_none()
            && self.user_type.is_none()
            && self.role_id.is_none()
    }

    /// Apply the set fields to a row in place.
    pub fn apply_to(&self, row: &mut ProfileRow) {
        if let Some(name) = &self.name {
            row.name = Some(name.clone());
        }
        if let Some(avatar_url) = &self.avatar_url {
            row.avatar_url = Some(avatar_url.clone());
        }
        if let Some(done) = self.onboarding_completed {
            row.onboarding_completed = Some(done);
        }
        if let Some(language) = &self.preferred_language {
            row.preferred_language = Some(language.clone());
        }
        if let Some(user_type) = &self.user_type {
            row.user_type = Some(user_type.clone());
        }
        if let Some(role_id) = self.role_id {
            row.role_id = Some(role_id);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn row() -> ProfileRow {
        NewProfile::for_identity(
            IdentityId::random(),
            Email::parse("user@example.com").unwrap(),
            Utc::now(),
        )
        .into_row()
    }

    #[test]
    fn test_new_profile_is_never_admin() {
        let row = row();
        assert!(!row.is_admin);
        assert_eq!(row.created_at, row.updated_at);
    }

    #[test]
    fn test_patch_serializes_only_set_fields() {
        let patch = ProfilePatch {
            name: Some("Aminath".to_owned()),
            ..ProfilePatch::default()
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({ "name": "Aminath" }));
    }

    #[test]
    fn test_patch_apply_leaves_unset_fields() {
        let mut row = row();
        row.user_type = Some("journalist".to_owned());
        ProfilePatch {
            preferred_language: Some("dv".to_owned()),
            ..ProfilePatch::default()
        }
        .apply_to(&mut row);
        assert_eq!(row.preferred_language.as_deref(), Some("dv"));
        assert_eq!(row.user_type.as_deref(), Some("journalist"));
    }

    #[test]
    fn test_empty_patch() {
        assert!(ProfilePatch::default().is_empty());
        assert!(
            !ProfilePatch {
                onboarding_completed: Some(true),
                ..ProfilePatch::default()
            }
            .is_empty()
        );
    }

    #[test]
    fn test_row_deserializes_with_missing_optional_columns() {
        let json = serde_json::json!({
            "id": "5b0c7f0e-4a4c-4d8e-9d38-0d8f3f3b2a11",
            "email": "user@example.com",
            "is_admin": true,
            "created_at": "2024-03-01T10:00:00+00:00",
            "updated_at": "2024-03-02T10:00:00.123456+00:00",
            "name": null
        });
        let row: ProfileRow = serde_json::from_value(json).unwrap();
        assert!(row.is_admin);
        assert!(row.name.is_none());
        assert!(row.role_id.is_none());
    }
}
