//! Credential storage.
//!
//! Reads/writes ~/.config/surveysync/credentials.json (0600 on Unix).
//! Flags and environment variables take precedence over the saved file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use surveysync_recon::store::StoreError;

pub const ENV_URL: &str = "SURVEYSYNC_URL";
pub const ENV_API_KEY: &str = "SURVEYSYNC_API_KEY";

/// Project URL and API key for the hosted store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCredentials {
    /// Project base URL (e.g., "https://abc.supabase.co")
    pub url: String,
    /// Anon or service key, sent as `apikey` and as the bearer token
    pub api_key: String,
}

impl StoreCredentials {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let url: String = url.into();
        Self {
            url: url.trim().trim_end_matches('/').to_string(),
            api_key: api_key.into().trim().to_string(),
        }
    }
}

/// Returns the path to the credentials file.
pub fn credentials_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|c| c.join("surveysync/credentials.json"))
}

/// Load saved credentials. `None` if absent or unreadable.
pub fn load_credentials() -> Option<StoreCredentials> {
    load_from(&credentials_file_path()?)
}

fn load_from(path: &Path) -> Option<StoreCredentials> {
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

/// Save credentials, creating the parent directory. 0600 on Unix.
pub fn save_credentials(creds: &StoreCredentials) -> Result<PathBuf, String> {
    let path = credentials_file_path().ok_or("Could not determine config directory")?;
    save_to(&path, creds)?;
    Ok(path)
}

fn save_to(path: &Path, creds: &StoreCredentials) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }

    let contents = serde_json::to_string_pretty(creds)
        .map_err(|e| format!("Failed to serialize credentials: {}", e))?;

    std::fs::write(path, &contents)
        .map_err(|e| format!("Failed to write credentials file: {}", e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, permissions)
            .map_err(|e| format!("Failed to set file permissions: {}", e))?;
    }

    Ok(())
}

/// Delete saved credentials. Returns whether a file was removed.
pub fn delete_credentials() -> Result<bool, String> {
    let Some(path) = credentials_file_path() else {
        return Ok(false);
    };
    if !path.exists() {
        return Ok(false);
    }
    std::fs::remove_file(&path)
        .map_err(|e| format!("Failed to delete credentials file: {}", e))?;
    Ok(true)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Resolve credentials: flag > env > saved file, per field.
pub fn resolve_credentials(
    flag_url: Option<&str>,
    flag_api_key: Option<&str>,
) -> Result<StoreCredentials, StoreError> {
    resolve_from(
        flag_url.map(String::from),
        flag_api_key.map(String::from),
        std::env::var(ENV_URL).ok(),
        std::env::var(ENV_API_KEY).ok(),
        load_credentials(),
    )
}

fn resolve_from(
    flag_url: Option<String>,
    flag_api_key: Option<String>,
    env_url: Option<String>,
    env_api_key: Option<String>,
    saved: Option<StoreCredentials>,
) -> Result<StoreCredentials, StoreError> {
    let (saved_url, saved_key) = match saved {
        Some(c) => (Some(c.url), Some(c.api_key)),
        None => (None, None),
    };

    let url = non_empty(flag_url)
        .or_else(|| non_empty(env_url))
        .or_else(|| non_empty(saved_url));
    let api_key = non_empty(flag_api_key)
        .or_else(|| non_empty(env_api_key))
        .or_else(|| non_empty(saved_key));

    match (url, api_key) {
        (Some(url), Some(key)) => Ok(StoreCredentials::new(url, key)),
        _ => Err(StoreError::NotAuthenticated),
    }
}
