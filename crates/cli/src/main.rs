// SurveySync CLI - reconcile survey responses against the employee roster

mod account;
mod exit_codes;
mod survey;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use surveysync_recon::store::StoreError;
use surveysync_recon::{ReconConfig, ReconError};
use tracing_subscriber::EnvFilter;

use exit_codes::{store_exit_code, EXIT_INVALID_CONFIG, EXIT_SNAPSHOT, EXIT_SUCCESS, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "ssync")]
#[command(about = "Reconcile survey responses against the employee roster")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/surveysync/surveysync.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store project URL (overrides SURVEYSYNC_URL and saved credentials)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Store API key (overrides SURVEYSYNC_API_KEY and saved credentials)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report orphans, broken links, level drift and ambiguous badges
    #[command(after_help = "\
Examples:
  ssync report
  ssync report --json
  ssync report --snapshot ./export --output report.json

Exit codes: 0 clean, 1 defects found")]
    Report {
        /// Output JSON to stdout instead of human summary
        #[arg(long)]
        json: bool,

        /// Write JSON report to file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Read tables from a snapshot directory instead of the store
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Compute the repair plan and, with --apply, write it back
    #[command(after_help = "\
Examples:
  ssync repair                       # dry run: print the plan
  ssync repair --apply
  ssync repair --apply --expect-plan blake3:4f1c...
  ssync repair --snapshot ./export   # dry run against exported tables

Exit codes: 0 done, 64 partial, 65 verification failed, 66 plan mismatch")]
    Repair {
        /// Write the plan to the store
        #[arg(long, conflicts_with = "dry_run")]
        apply: bool,

        /// Print the plan without writing (overrides config)
        #[arg(long)]
        dry_run: bool,

        /// Updates per batch (overrides config)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Refuse to apply unless the plan fingerprint matches
        #[arg(long, value_name = "HASH")]
        expect_plan: Option<String>,

        /// Output JSON to stdout instead of human summary
        #[arg(long)]
        json: bool,

        /// Read tables from a snapshot directory (dry run only)
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Completion rates by employee level and department
    #[command(after_help = "\
Examples:
  ssync analytics
  ssync analytics --json")]
    Analytics {
        /// Output JSON to stdout
        #[arg(long)]
        json: bool,

        /// Read tables from a snapshot directory instead of the store
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Validate a config file without running
    #[command(after_help = "\
Examples:
  ssync validate surveysync.toml")]
    Validate {
        /// Path to the TOML config file
        config: PathBuf,
    },

    /// Check and save store credentials
    #[command(after_help = "\
Examples:
  ssync login --url https://abc.supabase.co --api-key eyJ...
  SURVEYSYNC_API_KEY=eyJ... ssync login --url https://abc.supabase.co")]
    Login,

    /// Remove saved store credentials
    Logout,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let globals = Globals { config: cli.config, url: cli.url, api_key: cli.api_key };

    let result = match cli.command {
        Commands::Report { json, output, snapshot } => {
            survey::cmd_report(&globals, json, output, snapshot)
        }
        Commands::Repair { apply, dry_run, batch_size, expect_plan, json, snapshot } => {
            survey::cmd_repair(
                &globals,
                survey::RepairArgs { apply, dry_run, batch_size, expect_plan, json, snapshot },
            )
        }
        Commands::Analytics { json, snapshot } => survey::cmd_analytics(&globals, json, snapshot),
        Commands::Validate { config } => survey::cmd_validate(config),
        Commands::Login => account::cmd_login(&globals),
        Commands::Logout => account::cmd_logout(),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

/// Flags shared by every subcommand.
pub struct Globals {
    pub config: Option<PathBuf>,
    pub url: Option<String>,
    pub api_key: Option<String>,
}

impl Globals {
    /// Explicit `--config`, else the default path if it exists, else defaults.
    pub fn load_config(&self) -> Result<ReconConfig, CliError> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => path,
                None => return Ok(ReconConfig::default()),
            },
        };
        load_config_file(&path)
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|c| c.join("surveysync/surveysync.toml"))
}

pub fn load_config_file(path: &std::path::Path) -> Result<ReconConfig, CliError> {
    let text = std::fs::read_to_string(path).map_err(|e| CliError {
        code: EXIT_INVALID_CONFIG,
        message: format!("cannot read config {}: {e}", path.display()),
        hint: None,
    })?;
    ReconConfig::from_toml(&text).map_err(|e| CliError {
        code: EXIT_INVALID_CONFIG,
        message: format!("{}: {e}", path.display()),
        hint: None,
    })
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    pub fn args(msg: impl Into<String>) -> Self {
        Self::new(EXIT_USAGE, msg)
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Create error from store error with proper exit code.
    pub fn store(err: StoreError) -> Self {
        let code = store_exit_code(&err);
        let hint = match &err {
            StoreError::NotAuthenticated => Some("run `ssync login --url URL --api-key KEY`"),
            StoreError::Auth(..) => Some("check the API key; `ssync login` saves a new one"),
            StoreError::ReadOnly(_) => Some("snapshot directories are read-only"),
            _ => None,
        };
        let err = Self::new(code, err.to_string());
        match hint {
            Some(h) => err.with_hint(h),
            None => err,
        }
    }
}

impl From<ReconError> for CliError {
    fn from(err: ReconError) -> Self {
        let code = match err {
            ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) => EXIT_INVALID_CONFIG,
            ReconError::Snapshot { .. } | ReconError::Io(_) => EXIT_SNAPSHOT,
        };
        Self::new(code, err.to_string())
    }
}
