use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use jira_literals::config::{self, AppConfig, AppConfigOverrides, ConfigError};
use jira_literals::logging;
use jira_literals::run::{self, GenerateOptions, PullRequestOptions, RunError};

#[derive(Debug, Parser)]
#[command(
    name = "jira-literals",
    version,
    about = "Generate literal types from Jira data and find related pull requests"
)]
struct Cli {
    /// Config file; defaults to ./jira.config.toml, then ./jira.config.json.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch issues, write the literal types file and run the build.
    Generate {
        /// Override the configured output path.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Do not run the build command afterwards.
        #[arg(long)]
        skip_build: bool,
    },
    /// Print open pull requests whose branch mentions ISSUE_KEY as JSON.
    Prs {
        issue_key: String,

        /// Bitbucket user to query; defaults to the configured username.
        #[arg(long)]
        user: Option<String>,

        /// Search every repository you contribute to instead of one user.
        #[arg(long)]
        all_repos: bool,
    },
    /// Print the keys of the Jira projects visible to you as JSON.
    Projects,
    /// Print the Bitbucket repositories linked to PROJECT_KEY as JSON.
    Repos { project_key: String },
}

fn load_config(cli: &Cli) -> Result<AppConfig, RunError> {
    let cwd = std::env::current_dir().map_err(|source| ConfigError::ReadFailed {
        path: PathBuf::from("."),
        source,
    })?;
    let path = config::resolve_config_path(cli.config.as_deref(), &cwd)?;
    let overrides = AppConfigOverrides {
        logging_debug: cli.debug.then_some(true),
        ..AppConfigOverrides::from_env()
    };
    let cfg = config::load_from(&path, &overrides)?;
    Ok(cfg)
}

fn execute(command: Command, cfg: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Generate { output, skip_build } => {
            let report = run::generate(cfg, &GenerateOptions { output, skip_build })?;
            tracing::info!(
                path = %report.output_path.display(),
                issues = report.issues,
                catalogs = report.catalogs,
                failed_categories = report.failed_categories.len(),
                built = report.built,
                "generate finished"
            );
        }
        Command::Prs {
            issue_key,
            user,
            all_repos,
        } => {
            let records = run::pull_requests(
                cfg,
                &issue_key,
                &PullRequestOptions {
                    user,
                    all_repositories: all_repos,
                },
            )?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Command::Projects => {
            let keys = run::visible_projects(cfg)?;
            println!("{}", serde_json::to_string_pretty(&keys)?);
        }
        Command::Repos { project_key } => {
            let repositories = run::project_repositories(cfg, &project_key)?;
            println!("{}", serde_json::to_string_pretty(&repositories)?);
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let loaded = load_config(&cli);
    let debug = match &loaded {
        Ok(cfg) => cfg.logging.debug,
        Err(_) => cli.debug,
    };
    logging::init(debug);

    let result: Result<(), Box<dyn std::error::Error>> = loaded
        .map_err(Into::into)
        .and_then(|cfg| execute(cli.command, &cfg));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "jira-literals failed");
            ExitCode::FAILURE
        }
    }
}
