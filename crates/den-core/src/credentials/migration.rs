//! One-shot import of the plain-JSON `auth.json` written by older releases.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use super::{CredentialError, CredentialStore};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Legacy credential file {path} is not a JSON object")]
    NotAnObject { path: PathBuf },
    #[error("Legacy credential file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to import '{key}': {source}")]
    Store {
        key: String,
        #[source]
        source: CredentialError,
    },
    #[error("Failed to retire {path}: {source}")]
    Retire {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Keys copied into the store.
    pub imported: Vec<String>,
    /// Keys already present in the store; the stored value was kept.
    pub kept_existing: Vec<String>,
    /// Keys whose value was not a string.
    pub skipped: Vec<String>,
    /// Where the legacy file was moved, if there was one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retired_to: Option<PathBuf>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.retired_to.is_none()
    }
}

fn retired_path(path: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d%H%M%S");
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "auth.json".to_string());
    path.with_file_name(format!("{name}.migrated-{stamp}"))
}

fn store_error(key: &str) -> impl FnOnce(CredentialError) -> MigrationError {
    let key = key.to_string();
    move |source| MigrationError::Store { key, source }
}

/// Copy credentials from `path` into `store`, then rename the file so the
/// import happens once. A missing file is a no-op. On error the file stays
/// where it is.
pub fn migrate_legacy_file(
    path: &Path,
    store: &dyn CredentialStore,
) -> Result<MigrationReport, MigrationError> {
    let mut report = MigrationReport::default();
    if !path.is_file() {
        return Ok(report);
    }

    let raw = fs::read_to_string(path).map_err(|source| MigrationError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let entries = if raw.trim().is_empty() {
        serde_json::Map::new()
    } else {
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(MigrationError::NotAnObject {
                    path: path.to_path_buf(),
                })
            }
            Err(source) => {
                return Err(MigrationError::Parse {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    };

    for (key, value) in entries {
        let Value::String(secret) = value else {
            warn!(key = %key, "skipping non-string legacy credential");
            report.skipped.push(key);
            continue;
        };
        if store.get(&key).map_err(store_error(&key))?.is_some() {
            report.kept_existing.push(key);
            continue;
        }
        store.set(&key, &secret).map_err(store_error(&key))?;
        report.imported.push(key);
    }

    let target = retired_path(path);
    fs::rename(path, &target).map_err(|source| MigrationError::Retire {
        path: path.to_path_buf(),
        source,
    })?;
    info!(
        imported = report.imported.len(),
        retired_to = %target.display(),
        "migrated legacy credentials"
    );
    report.retired_to = Some(target);
    Ok(report)
}
