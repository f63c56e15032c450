//! Input checks applied before user input becomes a [`TaskConfig`](crate::task::TaskConfig).

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Task name cannot be empty")]
    EmptyTaskName,
    #[error("Task name can only contain alphanumeric characters, hyphens, and underscores")]
    InvalidTaskName,
    #[error("Command cannot be empty")]
    EmptyCommand,
    #[error("Command has unbalanced quotes")]
    UnbalancedQuotes,
    #[error("Interval must be a positive integer")]
    NonPositiveInterval,
    #[error("Hour must be between 0 and 23")]
    HourOutOfRange,
    #[error("Minute must be between 0 and 59")]
    MinuteOutOfRange,
}

fn task_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("regex"))
}

/// Task names end up inside a filename, so anything that could act as a path
/// separator or shell metacharacter is rejected.
pub fn validate_task_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyTaskName);
    }
    if !task_name_re().is_match(name) {
        return Err(ValidationError::InvalidTaskName);
    }
    Ok(())
}

pub fn validate_command(command: &str) -> Result<(), ValidationError> {
    if command.trim().is_empty() {
        return Err(ValidationError::EmptyCommand);
    }
    Ok(())
}

pub fn validate_interval(seconds: i64) -> Result<(), ValidationError> {
    if seconds <= 0 {
        return Err(ValidationError::NonPositiveInterval);
    }
    Ok(())
}

pub fn validate_hour(hour: i64) -> Result<(), ValidationError> {
    if !(0..=23).contains(&hour) {
        return Err(ValidationError::HourOutOfRange);
    }
    Ok(())
}

pub fn validate_minute(minute: i64) -> Result<(), ValidationError> {
    if !(0..=59).contains(&minute) {
        return Err(ValidationError::MinuteOutOfRange);
    }
    Ok(())
}

/// Validate a command line and split it into program arguments using POSIX
/// shell quoting rules.
pub fn split_command(command: &str) -> Result<Vec<String>, ValidationError> {
    validate_command(command)?;
    let parts = shell_words::split(command).map_err(|_| ValidationError::UnbalancedQuotes)?;
    if parts.is_empty() {
        return Err(ValidationError::EmptyCommand);
    }
    Ok(parts)
}
