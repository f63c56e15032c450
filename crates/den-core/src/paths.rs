use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

const PLIST_SUFFIX: &str = ".plist";

pub fn launch_agents_dir(home: &Path) -> PathBuf {
    home.join("Library").join("LaunchAgents")
}

pub fn build_label(domain: &str, task_name: &str) -> String {
    format!("{domain}.{task_name}")
}

pub fn plist_filename(domain: &str, task_name: &str) -> String {
    format!("{domain}.{task_name}{PLIST_SUFFIX}")
}

/// `<agents_dir>/<domain>.<task_name>.plist`. Does not touch the filesystem
/// and does not validate `task_name`.
pub fn build_plist_path(agents_dir: &Path, domain: &str, task_name: &str) -> PathBuf {
    agents_dir.join(plist_filename(domain, task_name))
}

/// Inverse of [`build_plist_path`]. Returns an empty string when the file
/// name does not carry the `<domain>.` prefix and `.plist` suffix.
pub fn extract_task_name(path: &Path, domain: &str) -> String {
    let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
        return String::new();
    };
    let prefix = format!("{domain}.");
    filename
        .strip_prefix(&prefix)
        .and_then(|rest| rest.strip_suffix(PLIST_SUFFIX))
        .map(str::to_string)
        .unwrap_or_default()
}

/// Plist files in `agents_dir` belonging to `domain`, sorted by path.
///
/// A missing or unreadable directory yields an empty list.
pub fn scan_domain_agents(domain: &str, agents_dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(agents_dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(dir = %agents_dir.display(), error = %err, "launch agents dir not readable");
            return Vec::new();
        }
    };

    let prefix = format!("{domain}.");
    let mut matches = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(dir = %agents_dir.display(), error = %err, "failed to list launch agents dir");
                return Vec::new();
            }
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if name.starts_with(&prefix) && name.ends_with(PLIST_SUFFIX) {
            matches.push(path);
        }
    }
    matches.sort();
    matches
}
