pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use renobudget_core::config::{AppConfig, ConfigOverrides, LoadOptions, LogFormat};

use crate::commands::evaluate::EvaluateTarget;

#[derive(Debug, Parser)]
#[command(
    name = "renobudget",
    about = "Renovation budget and approval operator CLI",
    long_about = "Resolve purchase approvals, record approver decisions, and evaluate budget alerts for renovation projects.",
    after_help = "Examples:\n  renobudget seed\n  renobudget resolve pur-kitchen-tile\n  renobudget decide pur-kitchen-tile --approver u-site-manager --action approve\n  renobudget evaluate --all"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a renobudget.toml config file")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override the database URL")]
    database_url: Option<String>,
    #[arg(long, global = true, help = "Override the log level")]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the Kitchen Remodel demo project")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution and redaction")]
    Config,
    #[command(about = "Create a project and its budget categories from a JSON definition")]
    CreateProject {
        #[arg(help = "Path to the project definition JSON")]
        definition: PathBuf,
    },
    #[command(about = "Resolve a newly submitted purchase: auto-approve or route to approvers")]
    Resolve {
        purchase_id: String,
    },
    #[command(about = "Record an approver's approval or rejection of a pending purchase")]
    Decide {
        purchase_id: String,
        #[arg(long)]
        approver: String,
        #[arg(long, help = "approve or reject")]
        action: String,
        #[arg(long, help = "Comment; required when rejecting")]
        comments: Option<String>,
    },
    #[command(about = "Mark an approved purchase as paid")]
    Pay {
        purchase_id: String,
    },
    #[command(about = "Recompute spend and refresh budget alerts")]
    Evaluate {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        project_id: Option<String>,
        #[arg(long, help = "Evaluate every active project")]
        all: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions {
        config_path: cli.config,
        require_file: false,
        overrides: ConfigOverrides {
            database_url: cli.database_url,
            log_level: cli.log_level,
            ..ConfigOverrides::default()
        },
    };

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(options),
        Command::Seed => commands::seed::run(options),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(options) }
        }
        Command::CreateProject { definition } => commands::project::create(options, &definition),
        Command::Resolve { purchase_id } => commands::approval::resolve(options, &purchase_id),
        Command::Decide { purchase_id, approver, action, comments } => commands::approval::decide(
            options,
            &purchase_id,
            &approver,
            &action,
            comments.as_deref(),
        ),
        Command::Pay { purchase_id } => commands::approval::pay(options, &purchase_id),
        Command::Evaluate { project_id, all } => {
            let target = match project_id {
                Some(project_id) if !all => EvaluateTarget::Project(project_id),
                _ => EvaluateTarget::AllActive,
            };
            commands::evaluate::run(options, target)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr; stdout carries the JSON command payload.
pub(crate) fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    // A subscriber may already be installed when commands run in-process.
    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
