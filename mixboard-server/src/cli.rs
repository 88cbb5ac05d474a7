use clap::{Parser, Subcommand};

const HELP_EPILOG: &str = r#"Server options can also be provided via environment variables:
  CONFIG_PATH (default: ./config.yaml)
  DB_PATH     (default: data/mixboard.db)
  PORT        (default: 5151 or config.listen_port)
  RUST_LOG    (default: info)
"#;

#[derive(Debug, Parser)]
#[command(
    name = "mixboard-server",
    version,
    about = "Mixboard scheduling server",
    long_about = None,
    after_long_help = HELP_EPILOG,
)]
pub struct Cli {
    /// Optional subcommand. Without one, runs the server.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load and validate the config file, then exit
    CheckConfig,
}
