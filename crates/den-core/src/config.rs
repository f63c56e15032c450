use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;

pub const DEFAULT_DOMAIN: &str = "com.example";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Domain cannot be empty")]
    EmptyDomain,
    #[error("Invalid domain '{0}': use dot-separated labels of letters, digits, hyphens, and underscores")]
    InvalidDomain(String),
}

/// A domain becomes part of a filename, so it must be dot-separated labels
/// over `[A-Za-z0-9_-]` with no empty label.
pub fn validate_domain(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::EmptyDomain);
    }
    let valid = domain.split('.').all(|label| {
        !label.is_empty()
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    });
    if !valid {
        return Err(ConfigError::InvalidDomain(domain.to_string()));
    }
    Ok(())
}

pub fn resolve_user_home_dir() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    if let Ok(profile) = std::env::var("USERPROFILE") {
        let trimmed = profile.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    None
}

pub fn den_config_dir(home: &Path) -> PathBuf {
    home.join(".config").join("den")
}

pub fn config_file_path(home: &Path) -> PathBuf {
    den_config_dir(home).join("config.json")
}

/// Plain-JSON credential file written by older releases.
pub fn legacy_auth_path(home: &Path) -> PathBuf {
    den_config_dir(home).join("auth.json")
}

fn load_config_object(path: &Path) -> Option<Map<String, Value>> {
    let text = fs::read_to_string(path).ok()?;
    if text.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(&text).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// The configured plist domain, or [`DEFAULT_DOMAIN`] when the config file
/// is missing, empty, not JSON, or has no usable `domain` string.
/// A stored domain that fails [`validate_domain`] is ignored.
pub fn load_domain(home: &Path) -> String {
    load_config_object(&config_file_path(home))
        .and_then(|config| {
            config
                .get("domain")
                .and_then(Value::as_str)
                .map(|value| value.trim().to_string())
        })
        .filter(|value| validate_domain(value).is_ok())
        .unwrap_or_else(|| DEFAULT_DOMAIN.to_string())
}

/// Store `domain` in `config.json`, keeping any other keys already present.
pub fn save_domain(home: &Path, domain: &str) -> Result<PathBuf, ConfigError> {
    let domain = domain.trim();
    validate_domain(domain)?;
    let path = config_file_path(home);
    let mut config = load_config_object(&path).unwrap_or_default();
    config.insert("domain".to_string(), Value::String(domain.to_string()));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string_pretty(&Value::Object(config))?;
    fs::write(&path, format!("{body}\n"))?;
    Ok(path)
}
