//! API key storage.
//!
//! Reads/writes `<config_dir>/speclink/credentials.json` (0600 on Unix).
//! Resolution order for a run: explicit flag, then `MORPHOSOURCE_API_KEY`,
//! then the saved file. No key means anonymous access to public media.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const API_KEY_ENV: &str = "MORPHOSOURCE_API_KEY";

/// Stored repository credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    /// API base the key was issued for, if not the default.
    #[serde(default)]
    pub api_base: Option<String>,
}

impl Credentials {
    pub fn new(api_key: String) -> Self {
        Self { api_key, api_base: None }
    }
}

#[derive(Debug)]
pub enum CredentialError {
    /// No platform config directory
    NoConfigDir,
    Io(String),
    Serialize(String),
}

impl std::fmt::Display for CredentialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoConfigDir => write!(f, "could not determine config directory"),
            Self::Io(msg) => write!(f, "credential file error: {msg}"),
            Self::Serialize(msg) => write!(f, "failed to serialize credentials: {msg}"),
        }
    }
}

impl std::error::Error for CredentialError {}

/// Returns the path to the credentials file.
pub fn credentials_path() -> Option<PathBuf> {
    dirs::config_dir().map(|c| c.join("speclink").join("credentials.json"))
}

/// Load credentials from `path`. Missing or invalid files yield `None`.
pub fn load_credentials_from(path: &Path) -> Option<Credentials> {
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

pub fn load_credentials() -> Option<Credentials> {
    load_credentials_from(&credentials_path()?)
}

/// Write credentials to `path`, creating parent directories.
pub fn save_credentials_to(path: &Path, creds: &Credentials) -> Result<(), CredentialError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CredentialError::Io(format!("{}: {e}", parent.display())))?;
    }

    let contents =
        serde_json::to_string_pretty(creds).map_err(|e| CredentialError::Serialize(e.to_string()))?;
    std::fs::write(path, contents)
        .map_err(|e| CredentialError::Io(format!("{}: {e}", path.display())))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| CredentialError::Io(format!("{}: {e}", path.display())))?;
    }

    Ok(())
}

pub fn save_credentials(creds: &Credentials) -> Result<PathBuf, CredentialError> {
    let path = credentials_path().ok_or(CredentialError::NoConfigDir)?;
    save_credentials_to(&path, creds)?;
    Ok(path)
}

/// Delete saved credentials. Returns whether a file was removed.
pub fn delete_credentials() -> Result<bool, CredentialError> {
    let Some(path) = credentials_path() else {
        return Ok(false);
    };
    if !path.exists() {
        return Ok(false);
    }
    std::fs::remove_file(&path)
        .map_err(|e| CredentialError::Io(format!("{}: {e}", path.display())))?;
    Ok(true)
}

/// Where a resolved key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Flag,
    Env,
    Saved,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flag => write!(f, "--api-key"),
            Self::Env => write!(f, "{API_KEY_ENV}"),
            Self::Saved => write!(f, "saved credentials"),
        }
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Resolve a key from explicit inputs. Separated from the environment for tests.
pub fn resolve_api_key_from(
    flag: Option<String>,
    env: Option<String>,
    saved: Option<Credentials>,
) -> Option<(String, KeySource)> {
    non_empty(flag)
        .map(|k| (k, KeySource::Flag))
        .or_else(|| non_empty(env).map(|k| (k, KeySource::Env)))
        .or_else(|| non_empty(saved.map(|c| c.api_key)).map(|k| (k, KeySource::Saved)))
}

/// flag > `MORPHOSOURCE_API_KEY` > saved credentials > none.
pub fn resolve_api_key(flag: Option<String>) -> Option<(String, KeySource)> {
    resolve_api_key_from(flag, std::env::var(API_KEY_ENV).ok(), load_credentials())
}
