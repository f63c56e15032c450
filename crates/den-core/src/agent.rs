//! Install, inspect and remove the LaunchAgents belonging to one domain.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::launchctl::{Launchctl, LaunchctlError};
use crate::paths::{build_plist_path, extract_task_name, scan_domain_agents};
use crate::plist::{read_plist_file, write_plist_file, PlistError};
use crate::process::{CommandRunner, SystemRunner};
use crate::task::TaskConfig;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("No agent named '{name}' (expected {path})")]
    NotFound { name: String, path: PathBuf },
    #[error("Agent '{name}' already exists at {path}")]
    AlreadyExists { name: String, path: PathBuf },
    #[error("Agent IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Plist(#[from] PlistError),
    #[error(transparent)]
    Launchctl(#[from] LaunchctlError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallOptions {
    /// Overwrite an existing plist, unloading the old agent first.
    pub replace: bool,
    /// Register the agent with launchd after writing the plist.
    pub load: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            replace: false,
            load: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentEntry {
    pub name: String,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<TaskConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoveOutcome {
    pub path: PathBuf,
    /// Message from a failed unload; removal still went ahead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unload_error: Option<String>,
}

pub struct AgentManager<R = SystemRunner> {
    domain: String,
    agents_dir: PathBuf,
    launchctl: Launchctl<R>,
}

impl<R: CommandRunner> AgentManager<R> {
    pub fn new(
        domain: impl Into<String>,
        agents_dir: impl Into<PathBuf>,
        launchctl: Launchctl<R>,
    ) -> Self {
        Self {
            domain: domain.into(),
            agents_dir: agents_dir.into(),
            launchctl,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn agents_dir(&self) -> &Path {
        &self.agents_dir
    }

    pub fn plist_path(&self, task_name: &str) -> PathBuf {
        build_plist_path(&self.agents_dir, &self.domain, task_name)
    }

    fn existing_plist(&self, task_name: &str) -> Result<PathBuf, AgentError> {
        let path = self.plist_path(task_name);
        if !path.is_file() {
            return Err(AgentError::NotFound {
                name: task_name.to_string(),
                path,
            });
        }
        Ok(path)
    }

    pub fn install(
        &self,
        task_name: &str,
        config: &TaskConfig,
        options: InstallOptions,
    ) -> Result<PathBuf, AgentError> {
        let path = self.plist_path(task_name);
        if path.exists() {
            if !options.replace {
                return Err(AgentError::AlreadyExists {
                    name: task_name.to_string(),
                    path,
                });
            }
            if let Err(err) = self.launchctl.unload_agent(&path) {
                warn!(plist = %path.display(), error = %err, "unload before replace failed");
            }
        }

        write_plist_file(&path, config)?;
        info!(label = %config.label, plist = %path.display(), "wrote launch agent");
        if options.load {
            self.launchctl.load_agent(&path)?;
        }
        Ok(path)
    }

    /// Every plist of this domain. Files that fail to parse are still listed,
    /// with the parse error in place of the config.
    pub fn list(&self) -> Vec<AgentEntry> {
        scan_domain_agents(&self.domain, &self.agents_dir)
            .into_iter()
            .map(|path| {
                let name = extract_task_name(&path, &self.domain);
                match read_plist_file(&path) {
                    Ok(config) => AgentEntry {
                        name,
                        path,
                        config: Some(config),
                        error: None,
                    },
                    Err(err) => AgentEntry {
                        name,
                        path,
                        config: None,
                        error: Some(err.to_string()),
                    },
                }
            })
            .collect()
    }

    pub fn show(&self, task_name: &str) -> Result<TaskConfig, AgentError> {
        let path = self.existing_plist(task_name)?;
        Ok(read_plist_file(&path)?)
    }

    pub fn load(&self, task_name: &str) -> Result<PathBuf, AgentError> {
        let path = self.existing_plist(task_name)?;
        self.launchctl.load_agent(&path)?;
        Ok(path)
    }

    pub fn unload(&self, task_name: &str) -> Result<PathBuf, AgentError> {
        let path = self.existing_plist(task_name)?;
        self.launchctl.unload_agent(&path)?;
        Ok(path)
    }

    pub fn remove(&self, task_name: &str, unload: bool) -> Result<RemoveOutcome, AgentError> {
        let path = self.existing_plist(task_name)?;
        let mut unload_error = None;
        if unload {
            if let Err(err) = self.launchctl.unload_agent(&path) {
                warn!(plist = %path.display(), error = %err, "unload before removal failed");
                unload_error = Some(err.to_string());
            }
        }
        fs::remove_file(&path)?;
        info!(plist = %path.display(), "removed launch agent");
        Ok(RemoveOutcome { path, unload_error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{CommandOutput, CommandSpec};
    use crate::task::Schedule;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io;
    use tempfile::TempDir;

    #[derive(Default)]
    struct ScriptedRunner {
        exits: RefCell<VecDeque<(i32, &'static str)>>,
        calls: RefCell<Vec<String>>,
    }

    impl ScriptedRunner {
        fn with_exits(exits: &[(i32, &'static str)]) -> Self {
            Self {
                exits: RefCell::new(exits.iter().copied().collect()),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
            self.calls
                .borrow_mut()
                .push(spec.args[0].to_string_lossy().to_string());
            let (code, stderr) = self.exits.borrow_mut().pop_front().unwrap_or((0, ""));
            Ok(CommandOutput {
                code: Some(code),
                stdout: String::new(),
                stderr: stderr.to_string(),
            })
        }
    }

    fn manager<'a>(dir: &Path, runner: &'a ScriptedRunner) -> AgentManager<&'a ScriptedRunner> {
        AgentManager::new("com.example", dir, Launchctl::new("launchctl", runner))
    }

    fn config(name: &str) -> TaskConfig {
        TaskConfig::new(
            format!("com.example.{name}"),
            vec!["/bin/echo".to_string(), name.to_string()],
        )
        .with_schedule(Schedule::Interval { seconds: 600 })
    }

    #[test]
    fn install_writes_plist_and_loads() {
        let temp = TempDir::new().expect("tempdir");
        let agents = temp.path().join("LaunchAgents");
        let runner = ScriptedRunner::default();
        let mgr = manager(&agents, &runner);

        let path = mgr
            .install("backup", &config("backup"), InstallOptions::default())
            .expect("install");
        assert_eq!(path, agents.join("com.example.backup.plist"));
        assert_eq!(mgr.show("backup").expect("show"), config("backup"));
        assert_eq!(*runner.calls.borrow(), vec!["load"]);
    }

    #[test]
    fn install_refuses_to_overwrite_without_replace() {
        let temp = TempDir::new().expect("tempdir");
        let runner = ScriptedRunner::default();
        let mgr = manager(temp.path(), &runner);
        let no_load = InstallOptions {
            replace: false,
            load: false,
        };
        mgr.install("backup", &config("backup"), no_load)
            .expect("first install");
        let err = mgr
            .install("backup", &config("backup"), no_load)
            .expect_err("second install");
        assert!(matches!(err, AgentError::AlreadyExists { .. }));
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn replace_unloads_old_agent_even_if_unload_fails() {
        let temp = TempDir::new().expect("tempdir");
        let runner = ScriptedRunner::with_exits(&[(0, ""), (1, "Could not find specified service"), (0, "")]);
        let mgr = manager(temp.path(), &runner);
        mgr.install("sync", &config("sync"), InstallOptions::default())
            .expect("install");
        let updated = config("sync").with_run_at_load(true);
        mgr.install(
            "sync",
            &updated,
            InstallOptions {
                replace: true,
                load: true,
            },
        )
        .expect("replace");
        assert_eq!(mgr.show("sync").expect("show"), updated);
        assert_eq!(*runner.calls.borrow(), vec!["load", "unload", "load"]);
    }

    #[test]
    fn load_failure_is_surfaced_after_write() {
        let temp = TempDir::new().expect("tempdir");
        let runner = ScriptedRunner::with_exits(&[(78, "Load failed: 5: Input/output error")]);
        let mgr = manager(temp.path(), &runner);
        let err = mgr
            .install("report", &config("report"), InstallOptions::default())
            .expect_err("load fails");
        match err {
            AgentError::Launchctl(inner) => {
                assert_eq!(inner.exit_code(), 78);
                assert!(inner.stderr().contains("Input/output error"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(mgr.plist_path("report").is_file());
    }

    #[test]
    fn list_includes_unparseable_files() {
        let temp = TempDir::new().expect("tempdir");
        let runner = ScriptedRunner::default();
        let mgr = manager(temp.path(), &runner);
        let no_load = InstallOptions {
            replace: false,
            load: false,
        };
        mgr.install("alpha", &config("alpha"), no_load).expect("alpha");
        fs::write(temp.path().join("com.example.broken.plist"), "not a plist").expect("broken");
        fs::write(temp.path().join("org.other.gamma.plist"), "ignored").expect("other");

        let entries = mgr.list();
        let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "broken"]);
        assert!(entries[0].config.is_some());
        assert!(entries[1].config.is_none());
        assert!(entries[1]
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("Malformed"));
    }

    #[test]
    fn remove_deletes_file_even_when_unload_fails() {
        let temp = TempDir::new().expect("tempdir");
        let runner = ScriptedRunner::with_exits(&[(0, ""), (1, "Could not find specified service")]);
        let mgr = manager(temp.path(), &runner);
        let path = mgr
            .install("nightly", &config("nightly"), InstallOptions::default())
            .expect("install");

        let outcome = mgr.remove("nightly", true).expect("remove");
        assert_eq!(outcome.path, path);
        assert!(outcome
            .unload_error
            .as_deref()
            .unwrap_or_default()
            .contains("Could not find specified service"));
        assert!(!path.exists());
    }

    #[test]
    fn operations_on_missing_agent_report_not_found() {
        let temp = TempDir::new().expect("tempdir");
        let runner = ScriptedRunner::default();
        let mgr = manager(temp.path(), &runner);
        assert!(matches!(mgr.show("ghost"), Err(AgentError::NotFound { .. })));
        assert!(matches!(mgr.load("ghost"), Err(AgentError::NotFound { .. })));
        assert!(matches!(mgr.unload("ghost"), Err(AgentError::NotFound { .. })));
        assert!(matches!(
            mgr.remove("ghost", true),
            Err(AgentError::NotFound { .. })
        ));
        assert!(runner.calls.borrow().is_empty());
    }
}
