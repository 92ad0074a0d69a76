//! `rava`: sign in to the RAVA Protocol backend and make authenticated calls.
//!
//! The credential is stored in a file between invocations, so `rava login`
//! followed by `rava get /protocols/` works like a browser session.

mod config;

use clap::{Parser, Subcommand};
use rava_session::{
    ApiRequest, AuthEvent, FileStore, LoginCredentials, Portal, SessionError, SessionManager,
    SessionState,
};
use rootcause::Report;
use std::fmt;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::CliConfig;

#[derive(Parser, Debug)]
#[command(name = "rava", about = "RAVA Protocol command-line client")]
struct Cli {
    /// Backend API root; overrides RAVA__SESSION__BASE_URL.
    #[arg(long)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the credential.
    Login {
        username: String,
        #[arg(long, env = "RAVA_PASSWORD", hide_env_values = true)]
        password: String,
        /// Use the developer portal.
        #[arg(long)]
        developer: bool,
    },
    /// Sign out and forget the stored credential.
    Logout,
    /// Show the signed-in user.
    Whoami,
    /// GET an API path and print the JSON response.
    Get { path: String },
}

impl Command {
    /// Login and logout replace the stored session, so there is nothing
    /// worth validating against the backend first.
    fn uses_stored_session(&self) -> bool {
        match self {
            Self::Login { .. } | Self::Logout => false,
            Self::Whoami | Self::Get { .. } => true,
        }
    }
}

#[derive(Debug)]
enum CliError {
    Config { details: String },
    Session(SessionError),
    NotSignedIn,
    Status { status: u16, body: String },
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "configuration error: {details}"),
            Self::Session(err) => write!(f, "{err}"),
            Self::NotSignedIn => write!(f, "not signed in; run `rava login` first"),
            Self::Status { status, body } => write!(f, "request failed with {status}: {body}"),
        }
    }
}

impl std::error::Error for CliError {}

fn session_failure(report: Report<SessionError>) -> Report<CliError> {
    CliError::Session(report.current_context().clone()).into()
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,rava_session=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            eprintln!("error: {}", report.current_context());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Report<CliError>> {
    let config = CliConfig::from_env(cli.base_url).map_err(|e| CliError::Config {
        details: e.to_string(),
    })?;
    tracing::debug!(credential_file = %config.credential_file.display(), "loaded configuration");

    let store = Arc::new(FileStore::new(config.credential_file));
    let session = SessionManager::connect(config.session, store).map_err(|e| CliError::Config {
        details: e.to_string(),
    })?;
    let mut events = session.subscribe_events();

    let state = if cli.command.uses_stored_session() {
        session.initialize().await
    } else {
        SessionState::Unknown
    };

    let result = match cli.command {
        Command::Login {
            username,
            password,
            developer,
        } => {
            let portal = if developer {
                Portal::Developer
            } else {
                Portal::Research
            };
            let user = session
                .login(portal, &LoginCredentials::new(username, password))
                .await
                .map_err(session_failure)?;
            println!("signed in as {} ({})", user.username(), user.role());
            Ok(())
        }
        Command::Logout => {
            session.logout().await;
            println!("signed out");
            Ok(())
        }
        Command::Whoami => {
            let user = state.user().ok_or(CliError::NotSignedIn)?;
            println!("{} ({})", user.username(), user.id());
            println!("role:   {}", user.role());
            println!("portal: {}", user.portal());
            if let Some(email) = user.email() {
                println!("email:  {email}");
            }
            Ok(())
        }
        Command::Get { path } => get(&session, path).await,
    };

    while let Ok(event) = events.try_recv() {
        if let AuthEvent::SessionExpired { login_route, .. } = event {
            eprintln!("session expired; sign in again ({login_route})");
        }
    }
    result
}

async fn get(session: &SessionManager, path: String) -> Result<(), Report<CliError>> {
    if !session.is_authenticated() {
        return Err(CliError::NotSignedIn.into());
    }

    let response = session
        .send(ApiRequest::get(path))
        .await
        .map_err(session_failure)?;
    let body = serde_json::to_string_pretty(&response.body).unwrap_or_default();
    if !response.is_success() {
        return Err(CliError::Status {
            status: response.status,
            body,
        }
        .into());
    }
    println!("{body}");
    Ok(())
}
