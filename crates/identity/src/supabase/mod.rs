//! Hosted identity provider and profile table clients.
//!
//! # APIs
//!
//! ## Auth (`/auth/v1`)
//! - Password grant and refresh-token grant
//! - Logout and password recovery
//!
//! ## REST (`/rest/v1`)
//! - `users` table: select, insert, update
//!
//! Every request carries the project's anon key as `apikey`. The
//! `Authorization` bearer is the signed-in user's access token when there is
//! one, else the anon key.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use newsdesk_identity::session::FileStorage;
//! use newsdesk_identity::supabase::{SupabaseAuth, SupabaseProfiles};
//!
//! let auth = SupabaseAuth::new(&config, Arc::new(FileStorage::new("session.json")));
//! let profiles = SupabaseProfiles::new(&config.supabase).with_auth(auth.clone());
//! ```

pub mod auth;
pub mod profiles;

pub use auth::SupabaseAuth;
pub use profiles::SupabaseProfiles;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

const USER_AGENT: &str = concat!("newsdesk-identity/", env!("CARGO_PKG_VERSION"));

/// Resolve `path` against the project URL, keeping any base path.
pub(crate) fn endpoint(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path)
}

/// Attach the project headers to a request.
pub(crate) fn with_project_headers(
    request: reqwest::RequestBuilder,
    anon_key: &SecretString,
    bearer: Option<&SecretString>,
) -> reqwest::RequestBuilder {
    let bearer = bearer.unwrap_or(anon_key);
    request
        .header("apikey", anon_key.expose_secret())
        .header(
            "Authorization",
            format!("Bearer {}", bearer.expose_secret()),
        )
        .header("User-Agent", USER_AGENT)
}

/// Error body returned by either API.
///
/// The auth API has used both `{error, error_description}` and
/// `{code, error_code, msg}`; the REST API uses `{code, message}`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

impl ErrorBody {
    /// Parse a response body; anything unparseable yields an empty body.
    pub(crate) fn parse(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or_default()
    }

    /// Human-readable message, falling back to the raw body text.
    pub(crate) fn message_or(&self, raw: &str) -> String {
        self.error_description
            .as_deref()
            .or(self.msg.as_deref())
            .or(self.message.as_deref())
            .or(self.error.as_deref())
            .unwrap_or(raw)
            .trim()
            .to_owned()
    }

    /// Machine-readable error code, if any.
    pub(crate) fn code(&self) -> Option<String> {
        self.error_code
            .clone()
            .or_else(|| match &self.code {
                Some(serde_json::Value::String(code)) => Some(code.clone()),
                _ => None,
            })
            .or_else(|| self.error.clone())
    }
}

/// Status code and parsed body of a failed response.
pub(crate) async fn read_error(response: reqwest::Response) -> (u16, ErrorBody, String) {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let body = ErrorBody::parse(&text);
    (status, body, text)
}
