//! `users` table over the REST API.

use async_trait::async_trait;
use secrecy::SecretString;
use url::Url;

use newsdesk_core::IdentityId;

use super::{SupabaseAuth, endpoint, read_error, with_project_headers};
use crate::config::SupabaseConfig;
use crate::db::{ProfileRepository, RepositoryError};
use crate::models::{NewProfile, ProfilePatch, ProfileRow};

const TABLE: &str = "rest/v1/users";

/// Postgres unique-violation SQLSTATE.
const UNIQUE_VIOLATION: &str = "23505";

/// Profile repository backed by the hosted `users` table.
#[derive(Clone)]
pub struct SupabaseProfiles {
    client: reqwest::Client,
    base: Url,
    anon_key: SecretString,
    auth: Option<SupabaseAuth>,
}

impl SupabaseProfiles {
    #[must_use]
    pub fn new(config: &SupabaseConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: config.url.clone(),
            anon_key: config.anon_key.clone(),
            auth: None,
        }
    }

    /// Authorize requests as the signed-in user so row-level security applies.
    #[must_use]
    pub fn with_auth(mut self, auth: SupabaseAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    fn table_url(&self, id: Option<IdentityId>) -> Result<Url, RepositoryError> {
        let mut url = endpoint(&self.base, TABLE)
            .map_err(|e| RepositoryError::Request(format!("invalid table URL: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(id) = id {
                query.append_pair("id", &format!("eq.{id}"));
            }
            query.append_pair("select", "*");
        }
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let bearer = self.auth.as_ref().and_then(SupabaseAuth::access_token);
        with_project_headers(
            self.client.request(method, url),
            &self.anon_key,
            bearer.as_ref(),
        )
    }
}

async fn failure(response: reqwest::Response) -> RepositoryError {
    let (status, body, text) = read_error(response).await;
    let message = body.message_or(&text);
    if status == 409 || body.code().as_deref() == Some(UNIQUE_VIOLATION) {
        return RepositoryError::Conflict(message);
    }
    if status == 503 {
        return RepositoryError::Unavailable(message);
    }
    RepositoryError::Rejected { status, message }
}

#[async_trait]
impl ProfileRepository for SupabaseProfiles {
    async fn get_by_id(&self, id: IdentityId) -> Result<Option<ProfileRow>, RepositoryError> {
        let response = self
            .request(reqwest::Method::GET, self.table_url(Some(id))?)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(failure(response).await);
        }
        let rows: Vec<ProfileRow> = response.json().await?;
        Ok(rows.into_iter().next())
    }

    async fn insert(&self, profile: &NewProfile) -> Result<ProfileRow, RepositoryError> {
        let response = self
            .request(reqwest::Method::POST, self.table_url(None)?)
            .header("Prefer", "return=representation")
            .json(profile)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(failure(response).await);
        }
        let rows: Vec<ProfileRow> = response.json().await?;
        rows.into_iter().next().ok_or_else(|| {
            RepositoryError::DataCorruption("insert returned no representation".to_string())
        })
    }

    async fn update(
        &self,
        id: IdentityId,
        patch: &ProfilePatch,
    ) -> Result<ProfileRow, RepositoryError> {
        if patch.is_empty() {
            return self.get_by_id(id).await?.ok_or(RepositoryError::NotFound);
        }

        let response = self
            .request(reqwest::Method::PATCH, self.table_url(Some(id))?)
            .header("Prefer", "return=representation")
            .json(patch)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(failure(response).await);
        }
        // Row-level security hides rows instead of refusing the update.
        let rows: Vec<ProfileRow> = response.json().await?;
        rows.into_iter().next().ok_or(RepositoryError::NotFound)
    }
}
