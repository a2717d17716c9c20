//! Newsdesk CLI - Sign in, inspect, and exercise the identity layer from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Sign in (the session persists to NEWSDESK_SESSION_FILE)
//! newsdesk login -e desk@example.com --password '...'
//!
//! # Who is signed in?
//! newsdesk whoami
//!
//! # Would this screen be shown?
//! newsdesk guard /dashboard/articles
//!
//! # Edit the profile
//! newsdesk profile update --name "Desk Editor" --language fr
//!
//! # Email a password-reset link
//! newsdesk reset-password -e desk@example.com
//!
//! # Sign out
//! newsdesk logout
//! ```
//!
//! # Commands
//!
//! - `login` / `logout` / `whoami` - Session management
//! - `reset-password` - Password-reset email with retries
//! - `profile update` - Partial profile update
//! - `guard` - Run the route guard against a path

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newsdesk_identity::config::IdentityConfig;
use newsdesk_identity::navigation::HistoryNavigator;
use newsdesk_identity::state::IdentityState;

mod commands;

/// Session file used when `NEWSDESK_SESSION_FILE` is not set.
const DEFAULT_SESSION_FILE: &str = ".newsdesk/session.json";

#[derive(Parser)]
#[command(name = "newsdesk")]
#[command(author, version, about = "Newsdesk identity tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        /// Account email address
        #[arg(short, long)]
        email: String,

        /// Account password
        #[arg(short, long, env = "NEWSDESK_PASSWORD", hide_env_values = true)]
        password: String,

        /// Path to land on after signing in
        #[arg(long)]
        return_to: Option<String>,
    },
    /// Sign out and clear the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Email a password-reset link
    ResetPassword {
        /// Account email address
        #[arg(short, long)]
        email: String,
    },
    /// Manage the signed-in user's profile
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// Check whether a protected path would be shown
    Guard {
        /// App path, e.g. `/dashboard/articles`
        path: String,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Update profile fields; unset flags are left alone
    Update(commands::profile::UpdateArgs),
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &IdentityConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "newsdesk_cli=info,newsdesk_identity=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match IdentityConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_tracing();
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };
    if config.session_file.is_none() {
        config.session_file = Some(PathBuf::from(DEFAULT_SESSION_FILE));
    }

    // Sentry first so the tracing layer has a client to forward to
    let _sentry_guard = init_sentry(&config);
    init_tracing();

    let navigator = Arc::new(HistoryNavigator::default());
    let state = IdentityState::from_config(&config, navigator.clone());

    if let Err(e) = run(cli, &state, &navigator).await {
        tracing::error!("{}", e.user_message());
        std::process::exit(1);
    }
}

async fn run(
    cli: Cli,
    state: &IdentityState,
    navigator: &HistoryNavigator,
) -> Result<(), commands::CliError> {
    match cli.command {
        Commands::Login {
            email,
            password,
            return_to,
        } => commands::session::login(state, &email, &password, return_to).await,
        Commands::Logout => commands::session::logout(state).await,
        Commands::Whoami => commands::session::whoami(state).await,
        Commands::ResetPassword { email } => {
            commands::session::reset_password(state, &email).await
        }
        Commands::Profile { action } => match action {
            ProfileAction::Update(args) => commands::profile::update(state, args).await,
        },
        Commands::Guard { path } => commands::guard::check(state, navigator, &path).await,
    }
}
