//! Core library for den: LaunchAgent definitions and lifecycle, local
//! configuration, and credential storage.

pub mod agent;
pub mod brew;
pub mod config;
pub mod credentials;
pub mod launchctl;
pub mod paths;
pub mod plist;
pub mod process;
pub mod task;
pub mod validate;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
