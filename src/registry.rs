use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{CdxError, CdxResult};

pub const REGISTRY_FILE_NAME: &str = ".cdx";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub id: String,
    pub label: String,
}

impl RegistryEntry {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryLocation {
    pub dir: PathBuf,
    pub path: PathBuf,
}

impl RegistryLocation {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            path: dir.join(REGISTRY_FILE_NAME),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}

pub fn parse(raw: &str) -> Vec<RegistryEntry> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> Option<RegistryEntry> {
    let (id, label) = line.split_once('\t')?;
    let id = id.trim();
    let label = label.trim();
    if id.is_empty() || label.is_empty() {
        return None;
    }
    Some(RegistryEntry::new(id, label))
}

/// Renders entries as registry text. `None` means the registry is empty and its file should be
/// deleted rather than written.
pub fn serialize(entries: &[RegistryEntry]) -> Option<String> {
    if entries.is_empty() {
        return None;
    }
    Some(entries.iter().map(format_line).collect())
}

fn format_line(entry: &RegistryEntry) -> String {
    format!("{}\t{}\n", entry.id, entry.label)
}

pub fn sanitize_label(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_break = false;
    for ch in text.chars() {
        if matches!(ch, '\t' | '\r' | '\n') {
            if !in_break {
                out.push(' ');
                in_break = true;
            }
            continue;
        }
        in_break = false;
        out.push(ch);
    }
    out.trim().to_string()
}

/// Ids are written verbatim, so anything that would break the line format is rejected.
pub fn validate_id(id: &str) -> CdxResult<&str> {
    let id = id.trim();
    if id.is_empty() {
        return Err(CdxError::Validation("session id must not be empty".to_string()));
    }
    if id.contains(['\t', '\r', '\n']) {
        return Err(CdxError::Validation(
            "session id must not contain tabs or newlines".to_string(),
        ));
    }
    Ok(id)
}

pub fn validate_label(label: &str) -> CdxResult<String> {
    let label = sanitize_label(label);
    if label.is_empty() {
        return Err(CdxError::Validation("label must not be empty".to_string()));
    }
    Ok(label)
}

/// Reads and parses the registry file. A missing file is an empty registry; any other read
/// failure is returned.
pub fn load(path: &Path) -> CdxResult<Vec<RegistryEntry>> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(parse(&raw)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

/// Appends one line. A hand-edited file whose last line lacks a newline is terminated first so
/// the new entry starts on its own line.
pub fn append(path: &Path, entry: &RegistryEntry) -> CdxResult<()> {
    let mut file = OpenOptions::new()
        .read(true)
        .create(true)
        .append(true)
        .open(path)?;
    let mut line = format_line(entry);
    if !ends_with_newline(&mut file)? {
        line.insert(0, '\n');
    }
    file.write_all(line.as_bytes())?;
    debug!(path = %path.display(), id = %entry.id, "appended registry entry");
    Ok(())
}

fn ends_with_newline(file: &mut fs::File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Rewrites the whole registry, deleting the file when no entries remain.
pub fn write_all(path: &Path, entries: &[RegistryEntry]) -> CdxResult<()> {
    match serialize(entries) {
        Some(text) => {
            fs::write(path, text)?;
            debug!(path = %path.display(), entries = entries.len(), "rewrote registry");
        }
        None => match fs::remove_file(path) {
            Ok(()) => info!(path = %path.display(), "registry emptied; file removed"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        },
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Created,
    AlreadyExists,
}

/// Creates an empty registry in exactly `dir`, leaving an existing one untouched.
pub fn init_empty(dir: &Path) -> CdxResult<(RegistryLocation, InitOutcome)> {
    let location = RegistryLocation::in_dir(dir);
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&location.path)
    {
        Ok(_) => Ok((location, InitOutcome::Created)),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            Ok((location, InitOutcome::AlreadyExists))
        }
        Err(err) => Err(err.into()),
    }
}
