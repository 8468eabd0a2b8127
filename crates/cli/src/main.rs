// speclink CLI - specimen record linkage and voxel spacing verification

mod auth;
mod exit_codes;
mod link;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use speclink_linkage::LinkageError;

use exit_codes::{linkage_exit_code, EXIT_IO, EXIT_SUCCESS, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "speclink")]
#[command(about = "Link local specimen records to a repository and verify voxel spacing")]
#[command(version)]
struct Cli {
    /// Log progress at info level (RUST_LOG overrides)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match local specimen rows to repository records
    #[command(after_help = "\
Examples:
  speclink match --local specimens.csv --repository export.json --out matched.csv
  speclink match --local specimens.csv --repository export.json --json
  speclink match --local specimens.csv --repository export.json --config link.toml")]
    Match {
        /// Local specimen table (CSV with header row)
        #[arg(long)]
        local: PathBuf,

        /// Repository dataset (JSON array)
        #[arg(long)]
        repository: PathBuf,

        /// Linkage config (TOML); defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write the match table CSV here (stdout when neither --out nor --json)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Print JSON results to stdout
        #[arg(long)]
        json: bool,

        /// Write JSON results to file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Verify voxel spacing of matched rows against the media API
    #[command(after_help = "\
Examples:
  speclink verify --matched matched.csv --out verified.csv
  speclink verify --matched matched.csv --repository export.json --api-key $KEY
  speclink verify --matched matched.csv --start 101 --limit 50 --out batch3.csv
  MORPHOSOURCE_API_KEY=... speclink verify --matched matched.csv --json")]
    Verify {
        /// Match table written by `speclink match`
        #[arg(long)]
        matched: PathBuf,

        /// Repository dataset, used to resolve media references
        #[arg(long)]
        repository: Option<PathBuf>,

        /// Linkage config (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Media API key (falls back to MORPHOSOURCE_API_KEY, then saved credentials)
        #[arg(long)]
        api_key: Option<String>,

        /// First row to verify, counting data rows from 1
        #[arg(long, short = 's', default_value_t = 1)]
        start: usize,

        /// Verify at most this many rows
        #[arg(long, short = 'l')]
        limit: Option<usize>,

        /// Write the verification table CSV here (stdout when neither --out nor --json)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Print JSON results to stdout
        #[arg(long)]
        json: bool,

        /// Write JSON results to file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Match then verify, writing matched.csv and verified.csv
    #[command(after_help = "\
Examples:
  speclink run --local specimens.csv --repository export.json --out-dir results/
  speclink run --local specimens.csv --repository export.json --no-verify")]
    Run {
        #[arg(long)]
        local: PathBuf,

        #[arg(long)]
        repository: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        api_key: Option<String>,

        /// Directory for matched.csv and verified.csv
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,

        /// Stop after matching
        #[arg(long)]
        no_verify: bool,
    },

    /// Validate a linkage config without running
    Validate {
        /// Path to the TOML config file
        config: PathBuf,
    },

    /// Manage the stored media API key
    #[command(subcommand)]
    Auth(auth::AuthCommands),
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // Also installs the `log` bridge, so engine records land here
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Match { local, repository, config, out, json, output } => {
            link::cmd_match(local, repository, config, out, json, output)
        }
        Commands::Verify { matched, repository, config, api_key, start, limit, out, json, output } => {
            let window = link::RowWindow { start, limit };
            link::cmd_verify(matched, repository, config, api_key, window, out, json, output)
        }
        Commands::Run { local, repository, config, api_key, out_dir, no_verify } => {
            link::cmd_run(local, repository, config, api_key, out_dir, no_verify)
        }
        Commands::Validate { config } => link::cmd_validate(config),
        Commands::Auth(cmd) => auth::cmd_auth(cmd),
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

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(EXIT_IO, msg)
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<LinkageError> for CliError {
    fn from(err: LinkageError) -> Self {
        let code = linkage_exit_code(&err);
        let hint = match &err {
            LinkageError::MissingColumn { .. } => {
                Some("map the column under [columns] in the config".to_string())
            }
            LinkageError::ConfigParse(_) | LinkageError::ConfigValidation(_) => {
                Some("check the file with `speclink validate <config>`".to_string())
            }
            _ => None,
        };
        Self { code, message: err.to_string(), hint }
    }
}
