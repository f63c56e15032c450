//! `brew upgrade` and `brew bundle dump`.
//!
//! launchd starts agents with a minimal `PATH`, so the Homebrew bin
//! directories are prepended before resolving and running `brew`.

use std::env;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::process::{CommandRunner, CommandSpec, SystemRunner};

pub const HOMEBREW_PREFIXES: [&str; 2] = ["/opt/homebrew/bin", "/usr/local/bin"];

/// Overrides the resolved `brew` executable.
pub const BREW_OVERRIDE_ENV: &str = "DEN_BREW";

#[derive(Debug, Error)]
pub enum BrewError {
    #[error("Command '{command}' failed with code {code}: {stderr}")]
    Failed {
        command: String,
        code: i32,
        stderr: String,
    },
    #[error("Command '{command}' failed with code -1: brew command not found")]
    NotFound { command: String },
    #[error("Command '{command}' could not be started: {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl BrewError {
    pub fn exit_code(&self) -> i32 {
        match self {
            BrewError::Failed { code, .. } => *code,
            BrewError::NotFound { .. } | BrewError::Io { .. } => -1,
        }
    }
}

/// Resolved executable and the `PATH` to run it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrewContext {
    pub program: OsString,
    pub path: OsString,
}

/// Prepend the Homebrew prefixes that exist on disk to `current_path`.
pub fn augmented_path(current_path: Option<OsString>, prefixes: &[&Path]) -> OsString {
    let mut dirs: Vec<PathBuf> = prefixes
        .iter()
        .filter(|prefix| prefix.is_dir())
        .map(|prefix| prefix.to_path_buf())
        .collect();
    if let Some(current) = current_path {
        dirs.extend(env::split_paths(&current));
    }
    env::join_paths(dirs).unwrap_or_default()
}

pub fn resolve_brew_context() -> BrewContext {
    let prefixes: Vec<&Path> = HOMEBREW_PREFIXES.iter().map(Path::new).collect();
    let path = augmented_path(env::var_os("PATH"), &prefixes);
    let program = match env::var_os(BREW_OVERRIDE_ENV).filter(|value| !value.is_empty()) {
        Some(program) => program,
        None => {
            let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
            which::which_in("brew", Some(&path), cwd)
                .map(PathBuf::into_os_string)
                .unwrap_or_else(|_| OsString::from("brew"))
        }
    };
    debug!(program = ?program, "resolved brew");
    BrewContext { program, path }
}

#[derive(Debug, Clone, Default)]
pub struct BrewRunner<R = SystemRunner> {
    runner: R,
}

impl<R: CommandRunner> BrewRunner<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub fn upgrade(&self) -> Result<(), BrewError> {
        self.run(&["upgrade"]).map(|_| ())
    }

    /// Brewfile text describing the installed packages.
    pub fn bundle_dump(&self) -> Result<String, BrewError> {
        self.run(&["bundle", "dump", "--force", "--file=-"])
    }

    fn run(&self, args: &[&str]) -> Result<String, BrewError> {
        let context = resolve_brew_context();
        let command = format!("brew {}", args.join(" "));
        let mut spec = CommandSpec::new(context.program).env("PATH", context.path);
        for arg in args {
            spec = spec.arg(*arg);
        }

        let output = match self.runner.run(&spec) {
            Ok(output) => output,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(BrewError::NotFound { command });
            }
            Err(source) => return Err(BrewError::Io { command, source }),
        };
        if !output.success() {
            return Err(BrewError::Failed {
                command,
                code: output.code.unwrap_or(-1),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}
