//! Registration of plist files with launchd through `launchctl`.
//!
//! Each call runs the control program once. Nothing is cached and nothing is
//! checked beforehand: whether the plist exists or is already loaded is for
//! launchctl (and the caller) to decide.

use std::ffi::OsString;
use std::io;
use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::process::{CommandRunner, CommandSpec, SystemRunner};

pub const DEFAULT_LAUNCHCTL: &str = "launchctl";

/// Exit code reported when the control program could not be started.
pub const NOT_FOUND_EXIT_CODE: i32 = -1;

#[derive(Debug, Error)]
pub enum LaunchctlError {
    #[error("Command '{command}' failed with code {code}: {stderr}")]
    Failed {
        command: String,
        code: i32,
        stderr: String,
    },
    #[error("Command '{command}' failed with code -1: launchctl command not found")]
    NotFound { command: String },
    #[error("Command '{command}' could not be started: {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl LaunchctlError {
    pub fn command(&self) -> &str {
        match self {
            LaunchctlError::Failed { command, .. }
            | LaunchctlError::NotFound { command }
            | LaunchctlError::Io { command, .. } => command,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchctlError::Failed { code, .. } => *code,
            LaunchctlError::NotFound { .. } | LaunchctlError::Io { .. } => NOT_FOUND_EXIT_CODE,
        }
    }

    pub fn stderr(&self) -> String {
        match self {
            LaunchctlError::Failed { stderr, .. } => stderr.clone(),
            LaunchctlError::NotFound { .. } => "launchctl command not found".to_string(),
            LaunchctlError::Io { source, .. } => source.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Load,
    Unload,
}

impl Action {
    fn as_str(self) -> &'static str {
        match self {
            Action::Load => "load",
            Action::Unload => "unload",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Launchctl<R = SystemRunner> {
    program: OsString,
    runner: R,
}

impl Launchctl<SystemRunner> {
    pub fn system() -> Self {
        Self::new(DEFAULT_LAUNCHCTL, SystemRunner)
    }
}

impl<R: CommandRunner> Launchctl<R> {
    pub fn new(program: impl Into<OsString>, runner: R) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    pub fn load_agent(&self, plist_path: &Path) -> Result<(), LaunchctlError> {
        self.invoke(Action::Load, plist_path)
    }

    pub fn unload_agent(&self, plist_path: &Path) -> Result<(), LaunchctlError> {
        self.invoke(Action::Unload, plist_path)
    }

    fn invoke(&self, action: Action, plist_path: &Path) -> Result<(), LaunchctlError> {
        let spec = CommandSpec::new(self.program.clone())
            .arg(action.as_str())
            .arg(plist_path.as_os_str());
        let command = format!("launchctl {} {}", action.as_str(), plist_path.display());

        let output = match self.runner.run(&spec) {
            Ok(output) => output,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(LaunchctlError::NotFound { command });
            }
            Err(source) => return Err(LaunchctlError::Io { command, source }),
        };

        if !output.success() {
            let stderr = output.stderr.trim();
            return Err(LaunchctlError::Failed {
                command,
                code: output.code.unwrap_or(NOT_FOUND_EXIT_CODE),
                stderr: if stderr.is_empty() {
                    "Unknown error".to_string()
                } else {
                    stderr.to_string()
                },
            });
        }
        info!(action = action.as_str(), plist = %plist_path.display(), "launchctl succeeded");
        Ok(())
    }
}
