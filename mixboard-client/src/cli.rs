use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use mixboard_shared::domain::Stage;
use mixboard_shared::timing::parse_duration;

use crate::board::ViewMode;

const HELP_EPILOG: &str = r#"Config resolution order:
  1) --config/-c PATH
  2) $MIXBOARD_CONFIG
  3) XDG default: ~/.config/mixboard/client.yaml

Stages are given as NAME=DURATION, e.g. --stage "Powder 1=90s" --stage "Rest=1h30m".
A bare number is read as minutes.

Environment:
  RUST_LOG  log filter (default: info)
"#;

#[derive(Debug, Parser)]
#[command(
    name = "mixboard-client",
    version,
    about = "Terminal client for the mixboard scheduling board",
    long_about = None,
    after_long_help = HELP_EPILOG,
)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
    /// Optional subcommand. Without one, shows the live board.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the live board with countdowns and alerts (default)
    Board {
        /// Override the configured view
        #[arg(long, value_enum)]
        view: Option<ViewMode>,
    },
    /// Log in and save the token in the keyring
    Login {
        /// Server URL (e.g., http://127.0.0.1:5151). Falls back to config or prompt.
        #[arg(long)]
        server: Option<String>,
        /// Email. Falls back to prompt.
        #[arg(long)]
        email: Option<String>,
    },
    /// Create an account and save the token in the keyring
    Signup {
        #[arg(long)]
        server: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        display_name: Option<String>,
    },
    /// Remove the saved token from the keyring
    Logout,
    /// Show the logged-in user
    Whoami,
    /// Manage mixes
    #[command(subcommand)]
    Mix(MixCommand),
    /// Manage templates
    #[command(subcommand)]
    Template(TemplateCommand),
}

#[derive(Debug, Subcommand)]
pub enum MixCommand {
    /// List active mixes
    List {
        /// Only mixes owned by the current user
        #[arg(long)]
        mine: bool,
    },
    /// Show one mix with all its stages
    Show { id: String },
    /// Create a mix
    Create {
        name: String,
        #[arg(long = "stage", value_parser = parse_stage, required = true)]
        stages: Vec<Stage>,
        #[command(flatten)]
        meta: MetaArgs,
    },
    /// Create a mix from a saved template
    FromTemplate { template_id: String },
    /// Move a mix on to its next stage
    Advance {
        id: String,
        /// Stage index you are advancing from (default: the current one)
        #[arg(long)]
        from: Option<usize>,
    },
    /// Rename a mix, replace its stages or change its metadata
    Edit {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "stage", value_parser = parse_stage)]
        stages: Vec<Stage>,
        #[command(flatten)]
        meta: MetaArgs,
    },
    /// Delete a mix you own
    Delete { id: String },
}

#[derive(Debug, Subcommand)]
pub enum TemplateCommand {
    /// List your templates
    List,
    /// Create a template
    Create {
        name: String,
        #[arg(long = "stage", value_parser = parse_stage, required = true)]
        stages: Vec<Stage>,
        #[command(flatten)]
        meta: MetaArgs,
    },
    /// Save an existing mix as a template
    Save {
        mix_id: String,
        #[arg(long)]
        name: String,
    },
    /// Delete a template you own
    Delete { id: String },
}

#[derive(Debug, Clone, Default, Args)]
pub struct MetaArgs {
    #[arg(long)]
    pub category: Option<String>,
    /// Card colour as #rrggbb (default: derived from category)
    #[arg(long)]
    pub color: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub batch: Option<String>,
}

impl MetaArgs {
    pub fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.color.is_none()
            && self.description.is_none()
            && self.batch.is_none()
    }
}

/// Parses `NAME=DURATION`.
pub fn parse_stage(s: &str) -> Result<Stage, String> {
    let (name, dur) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("expected NAME=DURATION, got `{s}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("stage name must not be empty".into());
    }
    let ms = parse_duration(dur).map_err(|e| e.to_string())?;
    Ok(Stage::new(name, ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_arguments() {
        assert_eq!(parse_stage("Powder 1=90s"), Ok(Stage::new("Powder 1", 90_000)));
        assert_eq!(parse_stage("a=b=10"), Ok(Stage::new("a=b", 600_000)));
        assert!(parse_stage("Powder").is_err());
        assert!(parse_stage(" =1m").is_err());
        assert!(parse_stage("x=0s").is_err());
    }

    #[test]
    fn parses_mix_create() {
        let cli = Cli::try_parse_from([
            "mixboard-client",
            "mix",
            "create",
            "Batch A",
            "--stage",
            "Powder 1=1m",
            "--stage",
            "Powder 2=90s",
            "--category",
            "Powder",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Mix(MixCommand::Create { name, stages, meta })) => {
                assert_eq!(name, "Batch A");
                assert_eq!(stages.len(), 2);
                assert_eq!(meta.category.as_deref(), Some("Powder"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn board_is_default_and_view_is_optional() {
        let cli = Cli::try_parse_from(["mixboard-client"]).unwrap();
        assert!(cli.command.is_none());
        let cli = Cli::try_parse_from(["mixboard-client", "board", "--view", "mine"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Board {
                view: Some(ViewMode::Mine)
            })
        ));
        assert!(Cli::try_parse_from(["mixboard-client", "mix", "create", "x"]).is_err());
    }
}
