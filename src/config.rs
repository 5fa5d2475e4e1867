use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::discovery::DiscoveryPaths;

const CONFIG_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_CODEX_COMMAND: &str = "codex";
pub const DEFAULT_RESUME_SUBCOMMAND: &str = "resume";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CdxConfig {
    pub schema_version: u32,
    pub codex_command: String,
    pub resume_subcommand: String,
    /// Passed to every invocation, ahead of any session arguments.
    pub extra_args: Vec<String>,
    pub sessions_dir: Option<String>,
    pub history_file: Option<String>,
}

impl Default for CdxConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            codex_command: DEFAULT_CODEX_COMMAND.to_string(),
            resume_subcommand: DEFAULT_RESUME_SUBCOMMAND.to_string(),
            extra_args: Vec::new(),
            sessions_dir: None,
            history_file: None,
        }
    }
}

impl CdxConfig {
    /// Reads the config file when present and applies environment overrides. A missing file
    /// yields the defaults; nothing is written back.
    pub fn load() -> Result<Self> {
        let cfg_path = config_path();
        let mut cfg = if cfg_path.is_file() {
            let raw = fs::read_to_string(&cfg_path)
                .with_context(|| format!("failed to read {}", cfg_path.display()))?;
            serde_json::from_str::<CdxConfig>(&raw)
                .with_context(|| format!("invalid JSON in {}", cfg_path.display()))?
        } else {
            CdxConfig::default()
        };
        cfg.normalize();
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn discovery_paths(&self) -> DiscoveryPaths {
        DiscoveryPaths {
            sessions_root: self
                .sessions_dir
                .as_deref()
                .map(PathBuf::from)
                .unwrap_or_else(sessions_path),
            history_file: self
                .history_file
                .as_deref()
                .map(PathBuf::from)
                .unwrap_or_else(history_path),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Some(bin) = env_string("CDX_CODEX_BIN") {
            self.codex_command = bin;
        }
        if let Some(dir) = env_string("CDX_SESSIONS_DIR") {
            self.sessions_dir = Some(dir);
        }
        if let Some(file) = env_string("CDX_HISTORY_FILE") {
            self.history_file = Some(file);
        }
    }

    fn normalize(&mut self) {
        self.schema_version = self.schema_version.max(CONFIG_SCHEMA_VERSION);
        if self.codex_command.trim().is_empty() {
            self.codex_command = DEFAULT_CODEX_COMMAND.to_string();
        }
        if self.resume_subcommand.trim().is_empty() {
            self.resume_subcommand = DEFAULT_RESUME_SUBCOMMAND.to_string();
        }
        self.extra_args.retain(|arg| !arg.trim().is_empty());
        normalize_optional_string(&mut self.sessions_dir);
        normalize_optional_string(&mut self.history_file);
    }
}

pub fn codex_home() -> PathBuf {
    if let Some(custom) = env_string("CODEX_HOME") {
        return PathBuf::from(custom);
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".codex")
}

pub fn sessions_path() -> PathBuf {
    codex_home().join("sessions")
}

pub fn history_path() -> PathBuf {
    codex_home().join("history.jsonl")
}

pub fn config_path() -> PathBuf {
    codex_home().join("cdx-config.json")
}

fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn normalize_optional_string(value: &mut Option<String>) {
    *value = value
        .take()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty());
}
