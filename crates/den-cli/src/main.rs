use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Args, CommandFactory, Parser, Subcommand};
use dialoguer::Password;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use den_core::agent::{AgentManager, InstallOptions};
use den_core::brew::BrewRunner;
use den_core::config::{self, DEFAULT_DOMAIN};
use den_core::credentials::{
    load_credentials, migrate_legacy_file, CredentialStore, InMemoryStore,
};
use den_core::launchctl::{Launchctl, DEFAULT_LAUNCHCTL};
use den_core::paths::{build_label, launch_agents_dir};
use den_core::process::SystemRunner;
use den_core::task::{CalendarInterval, Schedule, TaskConfig};
use den_core::validate::{
    split_command, validate_hour, validate_interval, validate_minute, validate_task_name,
};

mod version;

const LAUNCHCTL_ENV: &str = "DEN_LAUNCHCTL";
const CREDENTIAL_STORE_ENV: &str = "DEN_CREDENTIAL_STORE";
const LOG_ENV: &str = "DEN_LOG";
const ANTHROPIC_KEY: &str = "anthropic_api_key";

#[derive(Parser)]
#[command(
    name = "den",
    version = version::FULL,
    about = "Manage macOS LaunchAgents and local automation credentials"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Create, inspect and remove LaunchAgents
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },
    /// Manage stored credentials
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },
    /// Run Homebrew maintenance
    Brew {
        #[command(subcommand)]
        command: BrewCommand,
    },
    /// Show or change settings
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Print version information
    Version,
}

#[derive(Subcommand)]
enum AgentCommand {
    /// Write a LaunchAgent plist and load it
    Add(AddArgs),
    /// List the agents of the configured domain
    List,
    /// Show one agent's definition
    Show { name: String },
    /// Register an agent with launchd
    Load { name: String },
    /// Deregister an agent from launchd
    Unload { name: String },
    /// Unload an agent and delete its plist
    Remove {
        name: String,
        /// Delete the plist without unloading it first
        #[arg(long)]
        keep_loaded: bool,
    },
    /// Print the plist path for an agent name
    Path { name: String },
}

#[derive(Args)]
#[command(group(ArgGroup::new("schedule").required(true).args(["interval", "hour"])))]
struct AddArgs {
    name: String,
    /// Command line to run, split with shell quoting rules
    #[arg(long)]
    command: String,
    /// Run every N seconds
    #[arg(long, allow_negative_numbers = true, conflicts_with_all = ["hour", "minute", "day", "weekday", "month"])]
    interval: Option<i128>,
    #[arg(long, allow_negative_numbers = true, requires = "minute")]
    hour: Option<i128>,
    #[arg(long, allow_negative_numbers = true, requires = "hour")]
    minute: Option<i128>,
    /// Day of month
    #[arg(long, requires = "hour")]
    day: Option<u32>,
    /// 0 and 7 are Sunday
    #[arg(long, requires = "hour")]
    weekday: Option<u32>,
    #[arg(long, requires = "hour")]
    month: Option<u32>,
    /// Environment variable for the agent (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,
    /// Pass the current PATH to the agent
    #[arg(long)]
    inherit_path: bool,
    #[arg(long)]
    workdir: Option<String>,
    #[arg(long)]
    stdout: Option<String>,
    #[arg(long)]
    stderr: Option<String>,
    #[arg(long)]
    run_at_load: bool,
    /// Overwrite an existing agent of the same name
    #[arg(long)]
    replace: bool,
    /// Write the plist without loading it
    #[arg(long)]
    no_load: bool,
}

#[derive(Subcommand)]
enum AuthCommand {
    /// Store a credential (prompts when --value is omitted)
    Set {
        key: String,
        #[arg(long)]
        value: Option<String>,
    },
    /// Prompt for and store the Anthropic API key
    Anthropic,
    /// Print a stored credential
    Get { key: String },
    /// Delete a stored credential
    Delete { key: String },
    /// List stored credential keys
    List {
        /// Print values alongside keys
        #[arg(long)]
        values: bool,
    },
}

#[derive(Subcommand)]
enum BrewCommand {
    /// Upgrade installed packages
    Upgrade,
    /// Print a Brewfile of installed packages
    Dump {
        /// Write the Brewfile here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the plist domain, or set it when a value is given
    Domain { value: Option<String> },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    let json = cli.json;
    match cli.command {
        Some(Command::Agent { command }) => run_agent(command, json),
        Some(Command::Auth { command }) => run_auth(command, json),
        Some(Command::Brew { command }) => run_brew(command, json),
        Some(Command::Config { command }) => run_config(command, json),
        Some(Command::Version) => {
            if json {
                print_json(&json!({ "version": version::FULL }))
            } else {
                println!("den {}", version::FULL);
                Ok(())
            }
        }
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn home_dir() -> Result<PathBuf> {
    config::resolve_user_home_dir()
        .context("Could not determine the home directory (HOME is not set)")
}

fn agent_manager(home: &Path) -> AgentManager {
    let domain = config::load_domain(home);
    let program = env::var_os(LAUNCHCTL_ENV)
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| OsString::from(DEFAULT_LAUNCHCTL));
    AgentManager::new(
        domain,
        launch_agents_dir(home),
        Launchctl::new(program, SystemRunner),
    )
}

fn run_agent(command: AgentCommand, json: bool) -> Result<()> {
    let home = home_dir()?;
    let manager = agent_manager(&home);
    match command {
        AgentCommand::Add(args) => add_agent(&manager, args, json),
        AgentCommand::List => {
            let entries = manager.list();
            if json {
                return print_json(&json!({
                    "domain": manager.domain(),
                    "agents": entries,
                }));
            }
            if entries.is_empty() {
                println!("No agents found for domain {}", manager.domain());
                return Ok(());
            }
            for entry in entries {
                match (&entry.config, &entry.error) {
                    (Some(config), _) => println!(
                        "{}\t{}\t{}",
                        entry.name,
                        config.schedule_summary(),
                        entry.path.display()
                    ),
                    (None, error) => println!(
                        "{}\tunreadable: {}\t{}",
                        entry.name,
                        error.as_deref().unwrap_or("unknown error"),
                        entry.path.display()
                    ),
                }
            }
            Ok(())
        }
        AgentCommand::Show { name } => {
            validate_task_name(&name)?;
            let config = manager.show(&name)?;
            if json {
                return print_json(&json!({
                    "name": name,
                    "path": manager.plist_path(&name),
                    "config": config,
                }));
            }
            print_task(&name, &manager.plist_path(&name), &config);
            Ok(())
        }
        AgentCommand::Load { name } => {
            validate_task_name(&name)?;
            let path = manager
                .load(&name)
                .with_context(|| format!("Failed to load agent '{name}'"))?;
            report_path(json, "Loaded", &name, &path)
        }
        AgentCommand::Unload { name } => {
            validate_task_name(&name)?;
            let path = manager
                .unload(&name)
                .with_context(|| format!("Failed to unload agent '{name}'"))?;
            report_path(json, "Unloaded", &name, &path)
        }
        AgentCommand::Remove { name, keep_loaded } => {
            validate_task_name(&name)?;
            let outcome = manager
                .remove(&name, !keep_loaded)
                .with_context(|| format!("Failed to remove agent '{name}'"))?;
            if json {
                return print_json(&json!({ "ok": true, "name": name, "removed": outcome }));
            }
            if let Some(error) = &outcome.unload_error {
                eprintln!("Warning: unload failed: {error}");
            }
            println!("Removed {}", outcome.path.display());
            Ok(())
        }
        AgentCommand::Path { name } => {
            validate_task_name(&name)?;
            let path = manager.plist_path(&name);
            if json {
                return print_json(&json!({ "name": name, "path": path }));
            }
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn report_path(json: bool, verb: &str, name: &str, path: &Path) -> Result<()> {
    if json {
        return print_json(&json!({ "ok": true, "name": name, "path": path }));
    }
    println!("{verb} {}", path.display());
    Ok(())
}

fn add_agent(manager: &AgentManager, args: AddArgs, json: bool) -> Result<()> {
    let config = task_from_args(manager.domain(), &args)?;
    let options = InstallOptions {
        replace: args.replace,
        load: !args.no_load,
    };
    let path = manager
        .install(&args.name, &config, options)
        .with_context(|| format!("Failed to install agent '{}'", args.name))?;
    if json {
        return print_json(&json!({
            "ok": true,
            "name": args.name,
            "path": path,
            "loaded": options.load,
            "config": config,
        }));
    }
    println!("Installed {} ({})", config.label, config.schedule_summary());
    println!("{}", path.display());
    if !options.load {
        println!("Not loaded; run `den agent load {}` to start it", args.name);
    }
    Ok(())
}

fn task_from_args(domain: &str, args: &AddArgs) -> Result<TaskConfig> {
    validate_task_name(&args.name)?;
    let program_arguments = split_command(&args.command)?;
    let mut config = TaskConfig::new(build_label(domain, &args.name), program_arguments)
        .with_schedule(schedule_from_args(args)?);

    let mut vars = BTreeMap::new();
    for pair in &args.env {
        let (key, value) = parse_env_pair(pair)?;
        vars.insert(key, value);
    }
    if args.inherit_path {
        match env::var("PATH") {
            Ok(path) if !vars.contains_key("PATH") => {
                vars.insert("PATH".to_string(), path);
            }
            Ok(_) => {}
            Err(_) => warn!("PATH is not set; nothing to inherit"),
        }
    }
    if !vars.is_empty() {
        config = config.with_environment(vars);
    }
    if let Some(dir) = &args.workdir {
        config = config.with_working_directory(dir.clone());
    }
    if let Some(path) = &args.stdout {
        config = config.with_standard_out_path(path.clone());
    }
    if let Some(path) = &args.stderr {
        config = config.with_standard_error_path(path.clone());
    }
    if args.run_at_load {
        config = config.with_run_at_load(true);
    }
    Ok(config)
}

/// Clamp a parsed argument into the validators' range, keeping its sign.
fn saturate(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}

fn schedule_from_args(args: &AddArgs) -> Result<Schedule> {
    if let Some(seconds) = args.interval {
        validate_interval(saturate(seconds))?;
        let Ok(seconds) = u64::try_from(seconds) else {
            bail!("Interval must be at most {} seconds", u64::MAX);
        };
        return Ok(Schedule::Interval { seconds });
    }
    let (Some(hour), Some(minute)) = (args.hour, args.minute) else {
        bail!("Provide either --interval or both --hour and --minute");
    };
    validate_hour(saturate(hour))?;
    validate_minute(saturate(minute))?;
    Ok(Schedule::Calendar(CalendarInterval {
        minute: Some(u32::try_from(minute).context("Minute is out of range")?),
        hour: Some(u32::try_from(hour).context("Hour is out of range")?),
        day: args.day,
        weekday: args.weekday,
        month: args.month,
    }))
}

fn parse_env_pair(pair: &str) -> Result<(String, String)> {
    let Some((key, value)) = pair.split_once('=') else {
        bail!("Invalid --env '{pair}': expected KEY=VALUE");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("Invalid --env '{pair}': variable name is empty");
    }
    Ok((key.to_string(), value.to_string()))
}

fn print_task(name: &str, path: &Path, config: &TaskConfig) {
    println!("Name:        {name}");
    println!("Label:       {}", config.label);
    println!("Plist:       {}", path.display());
    println!("Program:     {}", config.program().unwrap_or("-"));
    println!("Command:     {}", shell_words::join(&config.program_arguments));
    println!("Schedule:    {}", config.schedule_summary());
    if let Some(vars) = &config.environment_variables {
        println!("Environment:");
        for (key, value) in vars {
            println!("  {key}={value}");
        }
    }
    if let Some(dir) = &config.working_directory {
        println!("Workdir:     {dir}");
    }
    if let Some(out) = &config.standard_out_path {
        println!("Stdout:      {out}");
    }
    if let Some(err) = &config.standard_error_path {
        println!("Stderr:      {err}");
    }
    if let Some(run_at_load) = config.run_at_load {
        println!("RunAtLoad:   {run_at_load}");
    }
}

fn credential_store() -> Result<Box<dyn CredentialStore>> {
    let choice = env::var(CREDENTIAL_STORE_ENV).unwrap_or_default();
    match choice.trim() {
        "memory" => Ok(Box::new(InMemoryStore::new())),
        "" | "keychain" => keychain_store(),
        other => bail!("Unknown credential store '{other}' (expected 'keychain' or 'memory')"),
    }
}

#[cfg(target_os = "macos")]
fn keychain_store() -> Result<Box<dyn CredentialStore>> {
    Ok(Box::new(den_core::credentials::KeychainStore::new()))
}

#[cfg(not(target_os = "macos"))]
fn keychain_store() -> Result<Box<dyn CredentialStore>> {
    bail!("The Keychain credential store is only available on macOS; set {CREDENTIAL_STORE_ENV}=memory")
}

fn migrate_legacy_credentials(home: &Path, store: &dyn CredentialStore) {
    let legacy = config::legacy_auth_path(home);
    match migrate_legacy_file(&legacy, store) {
        Ok(report) if !report.is_noop() => {
            info!(
                imported = report.imported.len(),
                kept = report.kept_existing.len(),
                "imported legacy credentials"
            );
        }
        Ok(_) => {}
        Err(err) => warn!(file = %legacy.display(), error = %err, "legacy credential migration failed"),
    }
}

fn prompt_secret(prompt: &str) -> Result<String> {
    Password::new()
        .with_prompt(prompt)
        .interact()
        .context("Failed to read the value from the terminal")
}

fn run_auth(command: AuthCommand, json: bool) -> Result<()> {
    let home = home_dir()?;
    let store = credential_store()?;
    migrate_legacy_credentials(&home, store.as_ref());

    match command {
        AuthCommand::Set { key, value } => {
            let value = match value {
                Some(value) => value,
                None => prompt_secret(&format!("Value for {key}"))?,
            };
            store.set(&key, &value)?;
            report_saved(json, &key)
        }
        AuthCommand::Anthropic => {
            let value = prompt_secret("Enter your Anthropic API Key")?;
            if !value.starts_with("sk-") {
                eprintln!("Warning: Key does not start with 'sk-'.");
            }
            store.set(ANTHROPIC_KEY, &value)?;
            report_saved(json, ANTHROPIC_KEY)
        }
        AuthCommand::Get { key } => {
            let Some(value) = store.get(&key)? else {
                bail!("No credential stored for '{key}'");
            };
            if json {
                return print_json(&json!({ "key": key, "value": value }));
            }
            println!("{value}");
            Ok(())
        }
        AuthCommand::Delete { key } => {
            store.delete(&key)?;
            if json {
                return print_json(&json!({ "ok": true, "key": key }));
            }
            println!("Deleted '{key}'");
            Ok(())
        }
        AuthCommand::List { values: true } => {
            let credentials = load_credentials(store.as_ref())?;
            if json {
                return print_json(&json!({ "credentials": credentials }));
            }
            if credentials.is_empty() {
                println!("No credentials stored");
            }
            for (key, value) in credentials {
                println!("{key}={value}");
            }
            Ok(())
        }
        AuthCommand::List { values: false } => {
            let keys = store.list()?;
            if json {
                return print_json(&json!({ "keys": keys }));
            }
            if keys.is_empty() {
                println!("No credentials stored");
            }
            for key in keys {
                println!("{key}");
            }
            Ok(())
        }
    }
}

fn report_saved(json: bool, key: &str) -> Result<()> {
    if json {
        return print_json(&json!({ "ok": true, "key": key }));
    }
    println!("Saved '{key}'");
    Ok(())
}

fn run_brew(command: BrewCommand, json: bool) -> Result<()> {
    let brew = BrewRunner::new(SystemRunner);
    match command {
        BrewCommand::Upgrade => {
            brew.upgrade()?;
            if json {
                return print_json(&json!({ "ok": true }));
            }
            println!("Homebrew packages upgraded");
            Ok(())
        }
        BrewCommand::Dump { output } => {
            let brewfile = brew.bundle_dump()?;
            let Some(output) = output else {
                print!("{brewfile}");
                return Ok(());
            };
            if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::write(&output, &brewfile)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            if json {
                return print_json(&json!({ "ok": true, "path": output }));
            }
            println!("Wrote {}", output.display());
            Ok(())
        }
    }
}

fn run_config(command: ConfigCommand, json: bool) -> Result<()> {
    let home = home_dir()?;
    match command {
        ConfigCommand::Domain { value: None } => {
            let domain = config::load_domain(&home);
            if json {
                return print_json(&json!({
                    "domain": domain,
                    "default": domain == DEFAULT_DOMAIN,
                }));
            }
            println!("{domain}");
            Ok(())
        }
        ConfigCommand::Domain { value: Some(value) } => {
            let path = config::save_domain(&home, &value)?;
            let domain = config::load_domain(&home);
            if json {
                return print_json(&json!({ "ok": true, "domain": domain, "path": path }));
            }
            println!("Domain set to {domain} ({})", path.display());
            Ok(())
        }
    }
}
