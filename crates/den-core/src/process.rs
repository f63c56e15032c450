//! Subprocess execution behind a trait so callers can be tested without
//! spawning real programs.

use std::ffi::OsString;
use std::io;
use std::process::{Command, Stdio};

use tracing::debug;

/// A program invocation: executable, arguments and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub env: Vec<(String, OsString)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// `program arg1 arg2`, for error messages.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.to_string_lossy().to_string()];
        parts.extend(self.args.iter().map(|arg| arg.to_string_lossy().to_string()));
        parts.join(" ")
    }
}

/// Captured result of a finished program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

pub trait CommandRunner {
    /// Run to completion, capturing stdout and stderr.
    ///
    /// A missing executable surfaces as `io::ErrorKind::NotFound`.
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        (**self).run(spec)
    }
}

/// Runs programs with `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        debug!(command = %spec.display(), "running command");
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        let output = cmd.output()?;
        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        debug!(command = %spec.display(), code = ?result.code, "command finished");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_program_and_args() {
        let spec = CommandSpec::new("launchctl")
            .arg("load")
            .arg("/tmp/com.example.a.plist");
        assert_eq!(spec.display(), "launchctl load /tmp/com.example.a.plist");
    }

    #[test]
    fn missing_program_is_not_found() {
        let err = SystemRunner
            .run(&CommandSpec::new("/definitely/not/here/den-missing"))
            .expect_err("spawn should fail");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[test]
    fn captures_exit_code_and_streams() {
        let output = SystemRunner
            .run(
                &CommandSpec::new("sh")
                    .arg("-c")
                    .arg("echo out; echo err >&2; exit 3"),
            )
            .expect("run sh");
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[test]
    fn passes_extra_environment() {
        let output = SystemRunner
            .run(
                &CommandSpec::new("sh")
                    .arg("-c")
                    .arg("printf %s \"$DEN_TEST_VALUE\"")
                    .env("DEN_TEST_VALUE", "hello"),
            )
            .expect("run sh");
        assert!(output.success());
        assert_eq!(output.stdout, "hello");
    }
}
