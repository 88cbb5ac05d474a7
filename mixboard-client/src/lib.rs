use mixboard_shared::api::rest::RestError;

pub mod alert;
pub mod audio;
pub mod board;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod indicators;
pub mod login;
pub mod notify;
pub mod sse;
pub mod ticker;

pub mod app {
    pub mod agent;
    pub mod commands;
}

pub use cli::{Cli, Command};
pub use config::{ClientConfig, load_config, resolve_config_path};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("not logged in; run `mixboard-client login`")]
    NotLoggedIn,
}

/// Maps REST failures to user-facing errors, pulling the server's message
/// out of JSON error bodies.
pub(crate) fn rest_err(e: RestError) -> AppError {
    match e {
        RestError::Status { status: 401, .. } => AppError::NotLoggedIn,
        RestError::Status { status, body } => {
            let msg = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("error")?.as_str().map(str::to_string))
                .unwrap_or(body);
            AppError::Http(format!("server returned {status}: {msg}"))
        }
        e => AppError::Http(e.to_string()),
    }
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

pub async fn run(cli: Cli) -> Result<(), AppError> {
    let config = cli.config;
    let cmd = cli.command.unwrap_or(Command::Board { view: None });
    // The board logs to a file of its own.
    if !matches!(cmd, Command::Board { .. }) {
        init_tracing();
    }
    match cmd {
        Command::Board { view } => app::agent::run(config, view).await,
        Command::Login { server, email } => login::login(server, email, config).await,
        Command::Signup {
            server,
            email,
            display_name,
        } => login::signup(server, email, display_name, config).await,
        Command::Logout => login::logout(config),
        Command::Whoami => login::whoami(config).await,
        Command::Mix(cmd) => app::commands::run_mix(cmd, config).await,
        Command::Template(cmd) => app::commands::run_template(cmd, config).await,
    }
}
