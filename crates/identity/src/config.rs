//! Identity configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `SUPABASE_URL` - Project URL of the hosted identity provider
//! - `SUPABASE_ANON_KEY` - Public anon key (placeholder and entropy checked)
//!
//! ## Optional
//! - `NEWSDESK_SITE_URL` - Public URL of the app (default: `http://localhost:5173`)
//! - `NEWSDESK_LOGIN_PATH` - Login screen path (default: `/login`)
//! - `NEWSDESK_LANDING_PATH` - Post-login landing path (default: `/dashboard`)
//! - `NEWSDESK_RESET_MAX_RETRIES` - Password-reset dispatch attempts (default: 3)
//! - `NEWSDESK_SESSION_STORAGE_KEY` - Key the session is persisted under
//!   (default: `supabase.auth.token`)
//! - `NEWSDESK_SESSION_FILE` - File backing session storage (CLI only)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::path::PathBuf;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use crate::models::storage_keys;
use crate::services::login::SessionSettle;
use crate::services::reset::ResetPolicy;

const DEFAULT_SITE_URL: &str = "http://localhost:5173";
const DEFAULT_LOGIN_PATH: &str = "/login";
const DEFAULT_LANDING_PATH: &str = "/dashboard";
const DEFAULT_GUARD_REASON: &str = "Please sign in to access the dashboard";
const RESET_PASSWORD_PATH: &str = "/reset-password";
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Hosted identity provider connection.
///
/// Implements `Debug` manually to redact the anon key.
#[derive(Clone)]
pub struct SupabaseConfig {
    /// Project URL (e.g. `https://abcd.supabase.co`)
    pub url: Url,
    /// Anon key sent as `apikey` on every request
    pub anon_key: SecretString,
}

impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url.as_str())
            .field("anon_key", &"[REDACTED]")
            .finish()
    }
}

/// Behaviour of the route guard and the login flow.
#[derive(Debug, Clone)]
pub struct IdentitySettings {
    /// Where denied visitors are sent.
    pub login_path: String,
    /// Where a login lands when no return path was requested.
    pub landing_path: String,
    /// Banner shown on the login screen after a guard redirect.
    pub guard_reason: String,
    /// Link target embedded in password-reset emails.
    pub reset_redirect: Url,
    pub reset_policy: ResetPolicy,
    /// How the login flow waits for the new session before navigating.
    pub session_settle: SessionSettle,
}

impl IdentitySettings {
    /// Defaults for an app served at `site_url`.
    #[must_use]
    pub fn for_site(site_url: &Url) -> Self {
        Self {
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            landing_path: DEFAULT_LANDING_PATH.to_string(),
            guard_reason: DEFAULT_GUARD_REASON.to_string(),
            reset_redirect: reset_redirect_for(site_url),
            reset_policy: ResetPolicy::default(),
            session_settle: SessionSettle::default(),
        }
    }
}

/// Identity layer configuration.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub supabase: SupabaseConfig,
    /// Public URL of the app
    pub site_url: Url,
    pub settings: IdentitySettings,
    /// Storage key of the persisted session
    pub storage_key: String,
    /// File backing session storage
    pub session_file: Option<PathBuf>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

impl IdentityConfig {
    /// Configuration with defaults for everything but the provider.
    #[must_use]
    pub fn new(supabase_url: Url, anon_key: SecretString) -> Self {
        let site_url = Url::parse(DEFAULT_SITE_URL).unwrap_or_else(|_| supabase_url.clone());
        Self {
            settings: IdentitySettings::for_site(&site_url),
            supabase: SupabaseConfig {
                url: supabase_url,
                anon_key,
            },
            site_url,
            storage_key: storage_keys::DEFAULT.to_string(),
            session_file: None,
            sentry_dsn: None,
            sentry_environment: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid, or
    /// if the anon key looks like a placeholder.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup(env: Lookup<'_>) -> Result<Self, ConfigError> {
        let url = get_url(env, "SUPABASE_URL")?;
        let anon_key = get_validated_secret(env, "SUPABASE_ANON_KEY")?;

        let site_url = match get_optional_env(env, "NEWSDESK_SITE_URL") {
            Some(value) => parse_url("NEWSDESK_SITE_URL", &value)?,
            None => parse_url("NEWSDESK_SITE_URL", DEFAULT_SITE_URL)?,
        };

        let mut settings = IdentitySettings::for_site(&site_url);
        settings.login_path = get_path(env, "NEWSDESK_LOGIN_PATH", DEFAULT_LOGIN_PATH)?;
        settings.landing_path = get_path(env, "NEWSDESK_LANDING_PATH", DEFAULT_LANDING_PATH)?;
        settings.reset_policy.max_retries = get_env_or_default(env, "NEWSDESK_RESET_MAX_RETRIES", "3")
            .parse::<u32>()
            .ok()
            .filter(|retries| *retries > 0)
            .ok_or_else(|| {
                ConfigError::InvalidEnvVar(
                    "NEWSDESK_RESET_MAX_RETRIES".to_string(),
                    "must be a positive integer".to_string(),
                )
            })?;

        Ok(Self {
            supabase: SupabaseConfig { url, anon_key },
            site_url,
            settings,
            storage_key: get_env_or_default(
                env,
                "NEWSDESK_SESSION_STORAGE_KEY",
                storage_keys::DEFAULT,
            ),
            session_file: get_optional_env(env, "NEWSDESK_SESSION_FILE").map(PathBuf::from),
            sentry_dsn: get_optional_env(env, "SENTRY_DSN"),
            sentry_environment: get_optional_env(env, "SENTRY_ENVIRONMENT"),
        })
    }
}

/// `<origin>/reset-password` for the given site.
fn reset_redirect_for(site_url: &Url) -> Url {
    let mut url = site_url.clone();
    url.set_path(RESET_PASSWORD_PATH);
    url.set_query(None);
    url.set_fragment(None);
    url
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Source of environment variables.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Get a required environment variable.
fn get_required_env(env: Lookup<'_>, key: &str) -> Result<String, ConfigError> {
    env(key)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(env: Lookup<'_>, key: &str) -> Option<String> {
    env(key).filter(|value| !value.is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(env: Lookup<'_>, key: &str, default: &str) -> String {
    get_optional_env(env, key).unwrap_or_else(|| default.to_string())
}

fn parse_url(key: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn get_url(env: Lookup<'_>, key: &str) -> Result<Url, ConfigError> {
    let value = get_required_env(env, key)?;
    let url = parse_url(key, &value)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    Ok(url)
}

/// Get an app path; must be absolute.
fn get_path(env: Lookup<'_>, key: &str, default: &str) -> Result<String, ConfigError> {
    let value = get_env_or_default(env, key, default);
    if !value.starts_with('/') || value.starts_with("//") {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be an absolute path starting with '/'".to_string(),
        ));
    }
    Ok(value)
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    // Real anon keys are signed JWTs with high entropy
    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Copy the key from the project settings."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(env: Lookup<'_>, key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(env, key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
