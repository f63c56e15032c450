use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

fn bin(home: &Path, launchctl: &str) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_den"));
    cmd.env("HOME", home)
        .env("DEN_LAUNCHCTL", launchctl)
        .env_remove("DEN_LOG");
    cmd
}

fn plist_path(home: &Path, file: &str) -> PathBuf {
    home.join("Library").join("LaunchAgents").join(file)
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("json stdout")
}

#[test]
fn add_list_show_remove_round_trip() {
    let home = TempDir::new().expect("home");

    let add = bin(home.path(), "true")
        .args(["agent", "add", "backup"])
        .args(["--command", "/usr/bin/rsync -a '/src dir' /dst"])
        .args(["--hour", "3", "--minute", "30"])
        .args(["--env", "FOO=bar"])
        .output()
        .expect("agent add");
    assert!(add.status.success(), "stderr: {}", stderr(&add));

    let path = plist_path(home.path(), "com.example.backup.plist");
    let xml = std::fs::read_to_string(&path).expect("plist written");
    assert!(xml.contains("<string>com.example.backup</string>"));
    assert!(xml.contains("<key>StartCalendarInterval</key>"));
    assert!(xml.contains("<string>/src dir</string>"));

    let list = bin(home.path(), "true")
        .args(["agent", "list", "--json"])
        .output()
        .expect("agent list");
    assert!(list.status.success(), "stderr: {}", stderr(&list));
    let listed = json(&list);
    assert_eq!(listed["domain"], "com.example");
    let agents = listed["agents"].as_array().expect("agents");
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0]["name"], "backup");
    assert_eq!(agents[0]["config"]["program_arguments"][2], "/src dir");

    let show = bin(home.path(), "true")
        .args(["agent", "show", "backup", "--json"])
        .output()
        .expect("agent show");
    assert!(show.status.success(), "stderr: {}", stderr(&show));
    let shown = json(&show);
    assert_eq!(shown["config"]["schedule"]["calendar"]["hour"], 3);
    assert_eq!(shown["config"]["schedule"]["calendar"]["minute"], 30);
    assert_eq!(shown["config"]["environment_variables"]["FOO"], "bar");

    let remove = bin(home.path(), "true")
        .args(["agent", "remove", "backup"])
        .output()
        .expect("agent remove");
    assert!(remove.status.success(), "stderr: {}", stderr(&remove));
    assert!(!path.exists());

    let empty = bin(home.path(), "true")
        .args(["agent", "list"])
        .output()
        .expect("agent list");
    assert!(String::from_utf8_lossy(&empty.stdout).contains("No agents found"));
}

#[test]
fn interval_agent_with_optional_keys() {
    let home = TempDir::new().expect("home");
    let add = bin(home.path(), "true")
        .args(["agent", "add", "sync"])
        .args(["--command", "echo hi", "--interval", "300"])
        .args(["--workdir", "/tmp", "--stdout", "/tmp/sync.out"])
        .args(["--run-at-load", "--json"])
        .output()
        .expect("agent add");
    assert!(add.status.success(), "stderr: {}", stderr(&add));
    let added = json(&add);
    assert_eq!(added["ok"], true);
    assert_eq!(added["config"]["schedule"]["interval"]["seconds"], 300);
    assert!(added["config"].get("environment_variables").is_none());

    let xml = std::fs::read_to_string(plist_path(home.path(), "com.example.sync.plist"))
        .expect("plist");
    assert!(xml.contains("<key>StartInterval</key>"));
    assert!(xml.contains("<integer>300</integer>"));
    assert!(xml.contains("<key>RunAtLoad</key>"));
    assert!(!xml.contains("EnvironmentVariables"));
}

#[test]
fn existing_agent_requires_replace() {
    let home = TempDir::new().expect("home");
    let add = || {
        bin(home.path(), "false")
            .args(["agent", "add", "nightly", "--command", "echo one"])
            .args(["--interval", "60", "--no-load"])
            .output()
            .expect("agent add")
    };
    assert!(add().status.success());

    let again = add();
    assert!(!again.status.success());
    assert!(stderr(&again).contains("already exists"), "{}", stderr(&again));

    let replaced = bin(home.path(), "false")
        .args(["agent", "add", "nightly", "--command", "echo two"])
        .args(["--interval", "120", "--no-load", "--replace"])
        .output()
        .expect("agent add --replace");
    assert!(replaced.status.success(), "stderr: {}", stderr(&replaced));
    let xml = std::fs::read_to_string(plist_path(home.path(), "com.example.nightly.plist"))
        .expect("plist");
    assert!(xml.contains("<string>two</string>"));
}

#[test]
fn load_failure_reports_control_program_error() {
    let home = TempDir::new().expect("home");
    let add = bin(home.path(), "false")
        .args(["agent", "add", "broken", "--command", "echo hi", "--interval", "60"])
        .output()
        .expect("agent add");
    assert!(!add.status.success());
    let err = stderr(&add);
    assert!(err.starts_with("Error: "), "{err}");
    assert!(err.contains("launchctl load"), "{err}");
    assert!(err.contains("failed with code 1: Unknown error"), "{err}");
    assert!(plist_path(home.path(), "com.example.broken.plist").exists());
}

#[test]
fn missing_control_program_is_reported() {
    let home = TempDir::new().expect("home");
    let missing = home.path().join("no-such-launchctl");
    let add = bin(home.path(), missing.to_str().expect("utf8 path"))
        .args(["agent", "add", "lost", "--command", "echo hi", "--interval", "60"])
        .output()
        .expect("agent add");
    assert!(!add.status.success());
    assert!(
        stderr(&add).contains("launchctl command not found"),
        "{}",
        stderr(&add)
    );
}

#[test]
fn remove_continues_when_unload_fails() {
    let home = TempDir::new().expect("home");
    let add = bin(home.path(), "true")
        .args(["agent", "add", "stale", "--command", "echo hi", "--interval", "60"])
        .output()
        .expect("agent add");
    assert!(add.status.success());

    let remove = bin(home.path(), "false")
        .args(["agent", "remove", "stale"])
        .output()
        .expect("agent remove");
    assert!(remove.status.success(), "stderr: {}", stderr(&remove));
    assert!(stderr(&remove).contains("unload failed"));
    assert!(!plist_path(home.path(), "com.example.stale.plist").exists());
}

#[test]
fn unknown_agent_is_an_error() {
    let home = TempDir::new().expect("home");
    for action in ["show", "load", "unload", "remove"] {
        let output = bin(home.path(), "true")
            .args(["agent", action, "ghost"])
            .output()
            .expect("agent command");
        assert!(!output.status.success(), "{action} should fail");
        assert!(stderr(&output).contains("No agent named 'ghost'"), "{action}");
    }
}

#[test]
fn invalid_input_is_rejected_with_validation_messages() {
    let home = TempDir::new().expect("home");
    let cases: [(&[&str], &str); 6] = [
        (
            &["bad/name", "--command", "echo", "--interval", "60"],
            "Task name can only contain alphanumeric characters, hyphens, and underscores",
        ),
        (
            &["ok", "--command", "   ", "--interval", "60"],
            "Command cannot be empty",
        ),
        (
            &["ok", "--command", "echo 'open", "--interval", "60"],
            "Command has unbalanced quotes",
        ),
        (
            &["ok", "--command", "echo", "--interval", "0"],
            "Interval must be a positive integer",
        ),
        (
            &["ok", "--command", "echo", "--hour", "24", "--minute", "0"],
            "Hour must be between 0 and 23",
        ),
        (
            &["ok", "--command", "echo", "--hour", "1", "--minute", "-1"],
            "Minute must be between 0 and 59",
        ),
    ];
    for (args, message) in cases {
        let output = bin(home.path(), "true")
            .args(["agent", "add"])
            .args(args)
            .output()
            .expect("agent add");
        assert!(!output.status.success(), "{args:?} should fail");
        assert!(stderr(&output).contains(message), "{}", stderr(&output));
    }
    assert!(!home.path().join("Library").exists());
}

#[test]
fn configured_domain_names_the_plist() {
    let home = TempDir::new().expect("home");
    let set = bin(home.path(), "true")
        .args(["config", "domain", "org.acme"])
        .output()
        .expect("config domain");
    assert!(set.status.success(), "stderr: {}", stderr(&set));

    let path = bin(home.path(), "true")
        .args(["agent", "path", "nightly"])
        .output()
        .expect("agent path");
    assert!(path.status.success());
    let printed = String::from_utf8_lossy(&path.stdout).trim().to_string();
    assert_eq!(
        PathBuf::from(printed),
        plist_path(home.path(), "org.acme.nightly.plist")
    );
}

#[test]
fn traversal_domain_never_moves_plists_out_of_launch_agents() {
    let home = TempDir::new().expect("home");
    let set = bin(home.path(), "true")
        .args(["config", "domain", "../../escaped"])
        .output()
        .expect("config domain");
    assert!(!set.status.success());
    assert!(stderr(&set).contains("Invalid domain"), "{}", stderr(&set));

    let config_dir = home.path().join(".config").join("den");
    std::fs::create_dir_all(&config_dir).expect("config dir");
    std::fs::write(config_dir.join("config.json"), r#"{"domain": "../../escaped"}"#)
        .expect("config.json");

    let add = bin(home.path(), "true")
        .args(["agent", "add", "job", "--command", "echo hi", "--interval", "60"])
        .output()
        .expect("agent add");
    assert!(add.status.success(), "stderr: {}", stderr(&add));
    assert!(plist_path(home.path(), "com.example.job.plist").exists());
    assert!(!home.path().join("escaped.job.plist").exists());

    let list = bin(home.path(), "true")
        .args(["agent", "list", "--json"])
        .output()
        .expect("agent list");
    assert_eq!(json(&list)["agents"].as_array().expect("agents").len(), 1);
}

#[test]
fn out_of_range_numbers_get_validation_messages() {
    let home = TempDir::new().expect("home");
    let cases: [(&[&str], &str); 4] = [
        (
            &["--interval", "-99999999999999999999"],
            "Interval must be a positive integer",
        ),
        (
            &["--interval", "99999999999999999999"],
            "Interval must be at most",
        ),
        (
            &["--hour", "99999999999999999999", "--minute", "0"],
            "Hour must be between 0 and 23",
        ),
        (
            &["--hour", "1", "--minute", "-99999999999999999999"],
            "Minute must be between 0 and 59",
        ),
    ];
    for (schedule, message) in cases {
        let output = bin(home.path(), "true")
            .args(["agent", "add", "big", "--command", "echo"])
            .args(schedule)
            .output()
            .expect("agent add");
        assert!(!output.status.success(), "{schedule:?} should fail");
        assert!(stderr(&output).contains(message), "{}", stderr(&output));
    }
}

#[test]
fn show_prints_program() {
    let home = TempDir::new().expect("home");
    let add = bin(home.path(), "true")
        .args(["agent", "add", "tidy", "--command", "/usr/bin/find /tmp -delete"])
        .args(["--interval", "60"])
        .output()
        .expect("agent add");
    assert!(add.status.success(), "stderr: {}", stderr(&add));

    let show = bin(home.path(), "true")
        .args(["agent", "show", "tidy"])
        .output()
        .expect("agent show");
    assert!(show.status.success());
    let text = String::from_utf8_lossy(&show.stdout);
    assert!(text.contains("Program:     /usr/bin/find"), "{text}");
    assert!(text.contains("Schedule:    every 60s"), "{text}");
}
