//! `speclink auth login | logout | status`: media API key storage.

use clap::Subcommand;
use speclink_media_client::{
    credentials_path, delete_credentials, load_credentials, resolve_api_key, save_credentials,
    CredentialError, Credentials, API_KEY_ENV,
};

use crate::exit_codes::EXIT_CREDENTIALS;
use crate::CliError;

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Save a media API key for later runs
    #[command(after_help = "\
Examples:
  speclink auth login --api-key ms_xxxxxxxx
  MORPHOSOURCE_API_KEY=ms_xxxxxxxx speclink auth login")]
    Login {
        /// Key to store (falls back to MORPHOSOURCE_API_KEY)
        #[arg(long, env = "MORPHOSOURCE_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// API base the key belongs to, if not the default
        #[arg(long)]
        api_base: Option<String>,
    },

    /// Remove the saved key
    Logout,

    /// Show which key a run would use
    Status,
}

fn credential_err(e: CredentialError) -> CliError {
    CliError::new(EXIT_CREDENTIALS, e.to_string())
}

pub fn cmd_auth(cmd: AuthCommands) -> Result<(), CliError> {
    match cmd {
        AuthCommands::Login { api_key, api_base } => cmd_login(api_key, api_base),
        AuthCommands::Logout => cmd_logout(),
        AuthCommands::Status => cmd_status(),
    }
}

fn cmd_login(api_key: Option<String>, api_base: Option<String>) -> Result<(), CliError> {
    let api_key = api_key
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            CliError::args("No API key provided")
                .with_hint(format!("pass --api-key or set {API_KEY_ENV}"))
        })?;

    let creds = Credentials {
        api_key,
        api_base: api_base.filter(|b| !b.trim().is_empty()),
    };
    let path = save_credentials(&creds).map_err(credential_err)?;
    eprintln!("saved API key to {}", path.display());
    Ok(())
}

fn cmd_logout() -> Result<(), CliError> {
    if delete_credentials().map_err(credential_err)? {
        eprintln!("removed saved API key");
    } else {
        eprintln!("no saved API key");
    }
    Ok(())
}

fn cmd_status() -> Result<(), CliError> {
    match resolve_api_key(None) {
        Some((key, source)) => {
            eprintln!("API key {} (from {source})", mask(&key));
        }
        None => eprintln!("no API key; media requests are anonymous"),
    }
    if let Some(path) = credentials_path() {
        eprintln!("credentials file: {}", path.display());
    }
    if let Some(base) = load_credentials().and_then(|c| c.api_base) {
        eprintln!("saved api base: {base}");
    }
    Ok(())
}

/// Show only the last four characters.
fn mask(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{tail}", "*".repeat(chars.len() - 4))
}
