use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Once;

use tracing::{debug, info, warn};

use crate::config::CdxConfig;
use crate::discovery::{self, DiscoveryBaseline, DiscoveryPaths};
use crate::error::{CdxError, CdxResult};
use crate::registry::{self, RegistryEntry, RegistryLocation};
use crate::resolver;

/// Runs the external tool to completion and reports its exit code.
pub trait SessionLauncher {
    fn program(&self) -> &str;

    fn launch(&mut self, cwd: &Path, args: &[String]) -> CdxResult<i32>;
}

#[derive(Debug, Clone)]
pub struct CodexLauncher {
    program: String,
    extra_args: Vec<String>,
}

impl CodexLauncher {
    pub fn new(program: impl Into<String>, extra_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            extra_args,
        }
    }

    pub fn from_config(config: &CdxConfig) -> Self {
        Self::new(config.codex_command.clone(), config.extra_args.clone())
    }
}

impl SessionLauncher for CodexLauncher {
    fn program(&self) -> &str {
        &self.program
    }

    fn launch(&mut self, cwd: &Path, args: &[String]) -> CdxResult<i32> {
        install_interrupt_passthrough();
        let mut command = Command::new(&self.program);
        command
            .args(&self.extra_args)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        debug!(program = %self.program, ?args, cwd = %cwd.display(), "launching tool");

        let status = command.status().map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => CdxError::ToolMissing {
                program: self.program.clone(),
            },
            _ => CdxError::Io(err),
        })?;
        debug!(%status, "tool exited");
        Ok(status.code().unwrap_or(1))
    }
}

/// The tool owns the terminal while it runs, so Ctrl+C must not take the wrapper down with it.
fn install_interrupt_passthrough() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if let Err(err) = ctrlc::set_handler(|| {}) {
            debug!(error = %err, "failed to install Ctrl+C handler");
        }
    });
}

/// Registry resolved for one invocation. When no registry file exists yet, the location points
/// at the starting directory, where the first successful `add`/`new` creates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRegistry {
    location: RegistryLocation,
    entries: Vec<RegistryEntry>,
}

impl SessionRegistry {
    pub fn resolve(start_dir: &Path, local_only: bool) -> CdxResult<Self> {
        let location = resolver::find_registry(start_dir, local_only)
            .unwrap_or_else(|| RegistryLocation::in_dir(start_dir));
        let entries = registry::load(&location.path)?;
        info!(
            path = %location.path.display(),
            exists = location.exists(),
            entries = entries.len(),
            "resolved registry"
        );
        Ok(Self { location, entries })
    }

    pub fn location(&self) -> &RegistryLocation {
        &self.location
    }

    pub fn dir(&self) -> &Path {
        &self.location.dir
    }

    pub fn path(&self) -> &Path {
        &self.location.path
    }

    pub fn exists(&self) -> bool {
        self.location.exists()
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn find(&self, id: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }
}

pub struct Orchestrator<L> {
    registry: SessionRegistry,
    launcher: L,
    paths: DiscoveryPaths,
    resume_subcommand: String,
}

impl<L: SessionLauncher> Orchestrator<L> {
    pub fn new(
        registry: SessionRegistry,
        launcher: L,
        paths: DiscoveryPaths,
        resume_subcommand: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            launcher,
            paths,
            resume_subcommand: resume_subcommand.into(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn discovery_paths(&self) -> &DiscoveryPaths {
        &self.paths
    }

    /// Starts a fresh session, then records whichever session id it produced under `label`.
    pub fn create_new(&mut self, label: &str) -> CdxResult<RegistryEntry> {
        let label = registry::validate_label(label)?;
        let baseline = DiscoveryBaseline::capture(&self.paths);

        let cwd = self.registry.dir().to_path_buf();
        self.run_tool(&cwd, &[])?;

        let after = discovery::latest_snapshot(&self.paths);
        let id = discovery::reconcile(&self.paths, &baseline, after.as_ref())?;
        self.append(RegistryEntry::new(id, label))
    }

    pub fn resume(&mut self, id: &str) -> CdxResult<()> {
        let id = registry::validate_id(id)?.to_string();
        self.require_registry()?;
        if self.registry.find(&id).is_none() {
            return Err(CdxError::NotFound(format!(
                "no session `{id}` in {}",
                self.registry.path().display()
            )));
        }

        let cwd = self.registry.dir().to_path_buf();
        let args = vec![self.resume_subcommand.clone(), id];
        self.run_tool(&cwd, &args)
    }

    /// Drops every entry carrying `id`; returns how many were removed.
    pub fn remove(&mut self, id: &str) -> CdxResult<usize> {
        let id = registry::validate_id(id)?;
        self.require_registry()?;

        let before = self.registry.entries.len();
        let remaining: Vec<RegistryEntry> = self
            .registry
            .entries
            .iter()
            .filter(|entry| entry.id != id)
            .cloned()
            .collect();
        let removed = before - remaining.len();
        if removed == 0 {
            return Err(CdxError::NotFound(format!(
                "no session `{id}` in {}",
                self.registry.path().display()
            )));
        }

        registry::write_all(self.registry.path(), &remaining)?;
        self.registry.entries = remaining;
        info!(%id, removed, "removed registry entries");
        Ok(removed)
    }

    pub fn add(&mut self, id: &str, label: &str) -> CdxResult<RegistryEntry> {
        let id = registry::validate_id(id)?.to_string();
        let label = registry::validate_label(label)?;
        self.append(RegistryEntry::new(id, label))
    }

    fn append(&mut self, entry: RegistryEntry) -> CdxResult<RegistryEntry> {
        registry::append(self.registry.path(), &entry)?;
        info!(id = %entry.id, label = %entry.label, "registered session");
        self.registry.entries.push(entry.clone());
        Ok(entry)
    }

    fn require_registry(&self) -> CdxResult<()> {
        if self.registry.exists() {
            return Ok(());
        }
        Err(CdxError::NotFound(format!(
            "no {} registry found from {}",
            registry::REGISTRY_FILE_NAME,
            self.registry.dir().display()
        )))
    }

    fn run_tool(&mut self, cwd: &Path, args: &[String]) -> CdxResult<()> {
        let code = self.launcher.launch(cwd, args)?;
        if code != 0 {
            warn!(code, program = self.launcher.program(), "tool exited with failure");
            return Err(CdxError::ToolFailed {
                program: self.launcher.program().to_string(),
                code,
            });
        }
        Ok(())
    }
}
