use std::io::{self, IsTerminal};
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::cli::{Commands, join_label};
use crate::config::{self, CdxConfig};
use crate::discovery::{self, DiscoveryPaths};
use crate::error::CdxError;
use crate::orchestrator::{CodexLauncher, Orchestrator, SessionRegistry};
use crate::registry::{self, InitOutcome, RegistryEntry};
use crate::ui::{self, PickerRow};
use crate::util::{format_optional_time, truncate};

const LABEL_COLUMN_WIDTH: usize = 40;

pub fn run(command: Option<Commands>, local_only: bool, config: CdxConfig) -> Result<u8> {
    let start_dir = std::env::current_dir().context("failed to resolve current directory")?;
    let paths = config.discovery_paths();

    match command.unwrap_or(Commands::Ls) {
        Commands::Init => init(&start_dir),
        Commands::Doctor => doctor(&config, &paths, &start_dir, local_only),
        Commands::Ls => {
            let registry = SessionRegistry::resolve(&start_dir, local_only)?;
            print_list(&registry, &paths);
            Ok(0)
        }
        command => {
            let registry = SessionRegistry::resolve(&start_dir, local_only)?;
            announce_registry(&registry);
            let launcher = CodexLauncher::from_config(&config);
            let mut orchestrator =
                Orchestrator::new(registry, launcher, paths, config.resume_subcommand.clone());
            run_flow(&mut orchestrator, command)
        }
    }
}

fn run_flow(orchestrator: &mut Orchestrator<CodexLauncher>, command: Commands) -> Result<u8> {
    match command {
        Commands::New { label } => {
            let entry = orchestrator.create_new(&join_label(&label))?;
            println!("Registered {} as \"{}\".", entry.id, entry.label);
        }
        Commands::Add { id, label } => {
            let entry = orchestrator.add(&id, &join_label(&label))?;
            println!("Registered {} as \"{}\".", entry.id, entry.label);
        }
        Commands::Resume { id } => {
            let Some(id) = choose_id(orchestrator, id, "Resume which session?")? else {
                return Ok(0);
            };
            orchestrator.resume(&id)?;
        }
        Commands::Rm { id } => {
            let Some(id) = choose_id(orchestrator, id, "Remove which session?")? else {
                return Ok(0);
            };
            let removed = orchestrator.remove(&id)?;
            println!("Removed {removed} {} for {id}.", plural_entries(removed));
            if !orchestrator.registry().exists() {
                println!(
                    "Registry is empty; deleted {}.",
                    orchestrator.registry().path().display()
                );
            }
        }
        Commands::Ls | Commands::Init | Commands::Doctor => {
            bail!("command does not drive a session flow")
        }
    }
    Ok(0)
}

/// Uses the explicit id, or asks interactively when attached to a terminal.
fn choose_id(
    orchestrator: &Orchestrator<CodexLauncher>,
    id: Option<String>,
    title: &str,
) -> Result<Option<String>> {
    if let Some(id) = id {
        return Ok(Some(id));
    }

    let registry = orchestrator.registry();
    if !registry.exists() || registry.entries().is_empty() {
        return Err(CdxError::NotFound(format!(
            "no sessions registered in {}",
            registry.path().display()
        ))
        .into());
    }
    if !io::stdout().is_terminal() || !io::stdin().is_terminal() {
        return Err(CdxError::Validation(
            "a session id is required when not attached to a terminal".to_string(),
        )
        .into());
    }

    let rows = picker_rows(registry.entries(), orchestrator.discovery_paths());
    let choice = ui::pick(title, &rows)?;
    debug!(?choice, "picker closed");
    Ok(choice.map(|index| registry.entries()[index].id.clone()))
}

fn picker_rows(entries: &[RegistryEntry], paths: &DiscoveryPaths) -> Vec<PickerRow> {
    let ids: Vec<&str> = entries.iter().map(|entry| entry.id.as_str()).collect();
    let times = discovery::artifact_times(paths, &ids);
    entries
        .iter()
        .map(|entry| PickerRow {
            id: entry.id.clone(),
            label: entry.label.clone(),
            last_active: format_optional_time(times.get(&entry.id).copied()),
        })
        .collect()
}

fn announce_registry(registry: &SessionRegistry) {
    let suffix = if registry.exists() {
        ""
    } else {
        " (not created yet)"
    };
    eprintln!("registry: {}{suffix}", registry.path().display());
}

fn print_list(registry: &SessionRegistry, paths: &DiscoveryPaths) {
    if !registry.exists() {
        println!(
            "No {} registry found from {}. Use `cdx new <label>` or `cdx init`.",
            registry::REGISTRY_FILE_NAME,
            registry.dir().display()
        );
        return;
    }

    println!("registry: {}", registry.path().display());
    if registry.entries().is_empty() {
        println!("No sessions registered.");
        return;
    }

    for row in picker_rows(registry.entries(), paths) {
        println!("{}", list_line(&row));
    }
}

fn list_line(row: &PickerRow) -> String {
    format!(
        "{:<19}  {:<width$}  {}",
        row.last_active,
        truncate(&row.label, LABEL_COLUMN_WIDTH),
        row.id,
        width = LABEL_COLUMN_WIDTH
    )
}

fn init(start_dir: &Path) -> Result<u8> {
    let (location, outcome) = registry::init_empty(start_dir)
        .with_context(|| format!("failed to create registry in {}", start_dir.display()))?;
    match outcome {
        InitOutcome::Created => println!("Created {}.", location.path.display()),
        InitOutcome::AlreadyExists => {
            println!("Registry already exists at {}.", location.path.display())
        }
    }
    Ok(0)
}

pub fn doctor(
    config: &CdxConfig,
    paths: &DiscoveryPaths,
    start_dir: &Path,
    local_only: bool,
) -> Result<u8> {
    let mut issues = 0u8;

    println!("cdx doctor");
    println!("config_path: {}", config::config_path().display());
    println!("codex_command: {}", config.codex_command);
    println!("sessions_dir: {}", paths.sessions_root.display());
    println!("history_file: {}", paths.history_file.display());

    if command_available(&config.codex_command) {
        println!("[OK] {} command available.", config.codex_command);
    } else {
        issues += 1;
        println!("[WARN] {} command not found in PATH.", config.codex_command);
    }

    if paths.sessions_root.is_dir() {
        match discovery::latest_snapshot(paths) {
            Some(latest) => println!(
                "[OK] Sessions directory accessible; newest session {} ({}).",
                latest.id.as_deref().unwrap_or("without id"),
                format_optional_time(Some(latest.modified))
            ),
            None => println!("[OK] Sessions directory accessible; no sessions yet."),
        }
    } else {
        issues += 1;
        println!("[WARN] Sessions directory not found; new sessions cannot be identified.");
    }

    match discovery::last_history_id(paths) {
        Some(id) => println!("[OK] History log readable; latest session {id}."),
        None => println!("[INFO] History log missing or empty (only used as a fallback)."),
    }

    match SessionRegistry::resolve(start_dir, local_only) {
        Ok(registry) if registry.exists() => println!(
            "[OK] Registry {} with {} {}.",
            registry.path().display(),
            registry.entries().len(),
            plural_entries(registry.entries().len())
        ),
        Ok(_) => println!("[INFO] No registry found from {}.", start_dir.display()),
        Err(err) => {
            issues += 1;
            println!("[WARN] Registry unreadable: {err}");
        }
    }

    if issues == 0 {
        println!("Doctor: healthy");
        Ok(0)
    } else {
        println!("Doctor: {issues} issue(s) found");
        Ok(1)
    }
}

fn plural_entries(count: usize) -> &'static str {
    if count == 1 { "entry" } else { "entries" }
}

fn command_available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
