//! Works out which session the tool just created.
//!
//! The tool never reports the id of the session it ran, so it is inferred from two independent
//! sources, consulted in order:
//!
//! 1. the freshest session file under the sessions root, compared against a snapshot taken
//!    before the child started;
//! 2. the tool's append-only history log, used only when the first source is inconclusive.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{CdxError, CdxResult};

const SESSION_META_TYPE: &str = "session_meta";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryPaths {
    pub sessions_root: PathBuf,
    pub history_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: Option<String>,
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// State captured right before the child process starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryBaseline {
    pub snapshot: Option<SessionSnapshot>,
    pub history_id: Option<String>,
}

impl DiscoveryBaseline {
    pub fn capture(paths: &DiscoveryPaths) -> Self {
        let baseline = Self {
            snapshot: latest_snapshot(paths),
            history_id: last_history_id(paths),
        };
        debug!(
            snapshot = ?baseline.snapshot.as_ref().map(|s| s.path.display().to_string()),
            history_id = ?baseline.history_id,
            "captured discovery baseline"
        );
        baseline
    }
}

pub fn latest_snapshot(paths: &DiscoveryPaths) -> Option<SessionSnapshot> {
    let (path, modified) = session_files(&paths.sessions_root)
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)))?;
    let id = session_id_for_file(&path);
    Some(SessionSnapshot { id, path, modified })
}

/// Newest modification time of the session file for each requested id.
pub fn artifact_times(paths: &DiscoveryPaths, ids: &[&str]) -> HashMap<String, SystemTime> {
    let wanted: HashSet<&str> = ids.iter().copied().collect();
    let mut times: HashMap<String, SystemTime> = HashMap::new();
    if wanted.is_empty() {
        return times;
    }

    for (path, modified) in session_files(&paths.sessions_root) {
        let id = match id_from_file_name(&path) {
            Some(token) if wanted.contains(token.as_str()) => Some(token),
            _ => id_from_first_line(&path).filter(|id| wanted.contains(id.as_str())),
        };
        let Some(id) = id else {
            continue;
        };
        let slot = times.entry(id).or_insert(modified);
        if modified > *slot {
            *slot = modified;
        }
    }
    times
}

pub fn last_history_id(paths: &DiscoveryPaths) -> Option<String> {
    let raw = read_history(&paths.history_file);
    history_ids_newest_first(&raw).next()
}

pub fn first_new_history_id_since(paths: &DiscoveryPaths, previous: &str) -> Option<String> {
    let raw = read_history(&paths.history_file);
    history_ids_newest_first(&raw).find(|id| id != previous)
}

/// Primary signal: the newest session file has an id and is not the file seen in the baseline,
/// or was modified strictly later than it. Equal timestamps do not count.
pub fn fresh_snapshot_id(
    before: Option<&SessionSnapshot>,
    after: Option<&SessionSnapshot>,
) -> Option<String> {
    let after = after?;
    let id = after.id.as_ref()?;
    let is_fresh = match before {
        None => true,
        Some(prior) => after.path != prior.path || after.modified > prior.modified,
    };
    is_fresh.then(|| id.clone())
}

pub fn reconcile(
    paths: &DiscoveryPaths,
    baseline: &DiscoveryBaseline,
    after: Option<&SessionSnapshot>,
) -> CdxResult<String> {
    if let Some(id) = fresh_snapshot_id(baseline.snapshot.as_ref(), after) {
        info!(%id, "new session identified from session file");
        return Ok(id);
    }

    if let Some(previous) = baseline.history_id.as_deref()
        && let Some(id) = first_new_history_id_since(paths, previous)
    {
        info!(%id, "new session identified from history log");
        return Ok(id);
    }

    Err(CdxError::Discovery {
        sessions_root: paths.sessions_root.clone(),
    })
}

fn session_files(root: &Path) -> impl Iterator<Item = (PathBuf, SystemTime)> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().and_then(|ext| ext.to_str()) == Some("jsonl"))
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((entry.into_path(), modified))
        })
}

fn session_id_for_file(path: &Path) -> Option<String> {
    id_from_first_line(path).or_else(|| id_from_file_name(path))
}

fn id_from_first_line(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut line = String::new();
    BufReader::new(file).read_line(&mut line).ok()?;
    let parsed = serde_json::from_str::<Value>(line.trim()).ok()?;
    if str_at(&parsed, &["type"]).as_deref() != Some(SESSION_META_TYPE) {
        return None;
    }
    str_at(&parsed, &["payload", "id"])
        .or_else(|| str_at(&parsed, &["id"]))
        .filter(|id| !id.trim().is_empty())
}

fn id_from_file_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    uuid_pattern()
        .find_iter(name)
        .last()
        .map(|found| found.as_str().to_string())
}

fn uuid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
        )
        .expect("uuid pattern compiles")
    })
}

/// Raw history bytes; lines are decoded one at a time so a bad line cannot hide the rest.
fn read_history(history_file: &Path) -> Vec<u8> {
    match fs::read(history_file) {
        Ok(raw) => raw,
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                debug!(error = %err, path = %history_file.display(), "history log unreadable");
            }
            Vec::new()
        }
    }
}

fn history_ids_newest_first(raw: &[u8]) -> impl Iterator<Item = String> + '_ {
    raw.split(|byte| *byte == b'\n').rev().filter_map(|line| {
        let trimmed = std::str::from_utf8(line).ok()?.trim();
        if trimmed.is_empty() {
            return None;
        }
        let parsed = serde_json::from_str::<Value>(trimmed).ok()?;
        str_at(&parsed, &["session_id"]).filter(|id| !id.trim().is_empty())
    })
}

fn str_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut cursor = value;
    for key in path {
        cursor = cursor.get(*key)?;
    }
    cursor.as_str().map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    const ID_A: &str = "5973b6c0-94b8-487b-a530-2aeb6098ae0e";
    const ID_B: &str = "0199a213-81c0-7800-8aa1-bbab2a035a53";

    fn paths(tmp: &TempDir) -> DiscoveryPaths {
        DiscoveryPaths {
            sessions_root: tmp.path().join("sessions"),
            history_file: tmp.path().join("history.jsonl"),
        }
    }

    fn write_session(root: &Path, name: &str, first_line: &str) -> PathBuf {
        let dir = root.join("2026").join("10").join("16");
        std::fs::create_dir_all(&dir).expect("session dir");
        let path = dir.join(name);
        std::fs::write(&path, format!("{first_line}\n")).expect("write session");
        path
    }

    fn set_mtime(path: &Path, modified: SystemTime) {
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .expect("open for mtime");
        file.set_modified(modified).expect("set mtime");
    }

    fn snapshot(id: Option<&str>, path: &str, secs: u64) -> SessionSnapshot {
        SessionSnapshot {
            id: id.map(ToString::to_string),
            path: PathBuf::from(path),
            modified: SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
        }
    }

    fn meta_line(id: &str) -> String {
        format!(
            r#"{{"timestamp":"2026-10-16T09:00:00Z","type":"session_meta","payload":{{"id":"{id}","cwd":"/repo"}}}}"#
        )
    }

    #[test]
    fn latest_snapshot_is_none_without_sessions() {
        let tmp = TempDir::new().expect("temp dir");
        assert_eq!(latest_snapshot(&paths(&tmp)), None);
    }

    #[test]
    fn latest_snapshot_reads_id_from_session_meta() {
        let tmp = TempDir::new().expect("temp dir");
        let paths = paths(&tmp);
        let older = write_session(&paths.sessions_root, "rollout-old.jsonl", &meta_line(ID_A));
        let newer = write_session(&paths.sessions_root, "rollout-new.jsonl", &meta_line(ID_B));
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        set_mtime(&older, base);
        set_mtime(&newer, base + Duration::from_secs(5));

        let latest = latest_snapshot(&paths).expect("snapshot");
        assert_eq!(latest.path, newer);
        assert_eq!(latest.id.as_deref(), Some(ID_B));
    }

    #[test]
    fn latest_snapshot_falls_back_to_file_name_token() {
        let tmp = TempDir::new().expect("temp dir");
        let paths = paths(&tmp);
        write_session(
            &paths.sessions_root,
            &format!("rollout-2026-10-16T09-00-00-{ID_A}.jsonl"),
            r#"{"type":"response_item","payload":{}}"#,
        );

        let latest = latest_snapshot(&paths).expect("snapshot");
        assert_eq!(latest.id.as_deref(), Some(ID_A));
    }

    #[test]
    fn latest_snapshot_without_any_id_has_none() {
        let tmp = TempDir::new().expect("temp dir");
        let paths = paths(&tmp);
        write_session(&paths.sessions_root, "rollout-plain.jsonl", "not json");

        let latest = latest_snapshot(&paths).expect("snapshot");
        assert_eq!(latest.id, None);
    }

    #[test]
    fn non_jsonl_files_are_ignored() {
        let tmp = TempDir::new().expect("temp dir");
        let paths = paths(&tmp);
        write_session(&paths.sessions_root, "notes.txt", &meta_line(ID_A));
        assert_eq!(latest_snapshot(&paths), None);
    }

    #[test]
    fn history_scan_skips_malformed_lines() {
        let tmp = TempDir::new().expect("temp dir");
        let paths = paths(&tmp);
        std::fs::write(
            &paths.history_file,
            concat!(
                r#"{"session_id":"h0","ts":1,"text":"a"}"#,
                "\n",
                r#"{"session_id":"h1","ts":2,"text":"b"}"#,
                "\n",
                "{broken\n",
                r#"{"ts":3,"text":"no id"}"#,
                "\n",
            ),
        )
        .expect("write history");

        assert_eq!(last_history_id(&paths).as_deref(), Some("h1"));
        assert_eq!(
            first_new_history_id_since(&paths, "h1").as_deref(),
            Some("h0")
        );
        assert_eq!(first_new_history_id_since(&paths, "h9").as_deref(), Some("h1"));
    }

    #[test]
    fn history_scan_survives_invalid_utf8_line() {
        let tmp = TempDir::new().expect("temp dir");
        let paths = paths(&tmp);
        let mut raw = b"{\"session_id\":\"h1\"}\n".to_vec();
        raw.extend_from_slice(b"{\"session_id\":\"\xff\xfe\",\"text\":\"x\"}\n");
        raw.extend_from_slice(b"{\"session_id\":\"h2\"}\n");
        std::fs::write(&paths.history_file, raw).expect("write history");

        assert_eq!(last_history_id(&paths).as_deref(), Some("h2"));
        assert_eq!(
            first_new_history_id_since(&paths, "h2").as_deref(),
            Some("h1")
        );
    }

    #[test]
    fn missing_history_yields_nothing() {
        let tmp = TempDir::new().expect("temp dir");
        let paths = paths(&tmp);
        assert_eq!(last_history_id(&paths), None);
        assert_eq!(first_new_history_id_since(&paths, "h1"), None);
    }

    #[test]
    fn reconcile_prefers_new_session_file() {
        let tmp = TempDir::new().expect("temp dir");
        let paths = paths(&tmp);
        std::fs::write(&paths.history_file, "{\"session_id\":\"h2\"}\n").expect("history");
        let baseline = DiscoveryBaseline {
            snapshot: Some(snapshot(Some("old"), "/s/p1.jsonl", 100)),
            history_id: Some("h1".to_string()),
        };
        let after = snapshot(Some("abc-123"), "/s/p2.jsonl", 100);

        let id = reconcile(&paths, &baseline, Some(&after)).expect("id");
        assert_eq!(id, "abc-123");
    }

    #[test]
    fn reconcile_accepts_same_file_modified_later() {
        let before = snapshot(Some("u1"), "/s/p1.jsonl", 100);
        let after = snapshot(Some("u1"), "/s/p1.jsonl", 101);
        assert_eq!(
            fresh_snapshot_id(Some(&before), Some(&after)).as_deref(),
            Some("u1")
        );
    }

    #[test]
    fn reconcile_falls_back_to_history_on_timestamp_tie() {
        let tmp = TempDir::new().expect("temp dir");
        let paths = paths(&tmp);
        std::fs::write(
            &paths.history_file,
            "{\"session_id\":\"h1\"}\n{\"session_id\":\"h2\"}\n{\"session_id\":\"h1\"}\n",
        )
        .expect("history");
        let prior = snapshot(Some("u1"), "/s/p1.jsonl", 100);
        let baseline = DiscoveryBaseline {
            snapshot: Some(prior.clone()),
            history_id: Some("h1".to_string()),
        };

        let id = reconcile(&paths, &baseline, Some(&prior)).expect("id");
        assert_eq!(id, "h2");

        let earlier = snapshot(Some("u1"), "/s/p1.jsonl", 90);
        let id = reconcile(&paths, &baseline, Some(&earlier)).expect("id");
        assert_eq!(id, "h2");
    }

    #[test]
    fn reconcile_ignores_fresh_file_without_id() {
        let tmp = TempDir::new().expect("temp dir");
        let paths = paths(&tmp);
        std::fs::write(&paths.history_file, "{\"session_id\":\"h1\"}\n{\"session_id\":\"h2\"}\n")
            .expect("history");
        let baseline = DiscoveryBaseline {
            snapshot: None,
            history_id: Some("h1".to_string()),
        };
        let after = snapshot(None, "/s/p9.jsonl", 500);

        let id = reconcile(&paths, &baseline, Some(&after)).expect("id");
        assert_eq!(id, "h2");
    }

    #[test]
    fn reconcile_fails_without_any_signal() {
        let tmp = TempDir::new().expect("temp dir");
        let paths = paths(&tmp);
        let result = reconcile(&paths, &DiscoveryBaseline::default(), None);
        assert!(matches!(result, Err(CdxError::Discovery { .. })));
    }

    #[test]
    fn reconcile_fails_when_history_has_nothing_new() {
        let tmp = TempDir::new().expect("temp dir");
        let paths = paths(&tmp);
        std::fs::write(&paths.history_file, "{\"session_id\":\"h1\"}\n").expect("history");
        let prior = snapshot(Some("u1"), "/s/p1.jsonl", 100);
        let baseline = DiscoveryBaseline {
            snapshot: Some(prior.clone()),
            history_id: Some("h1".to_string()),
        };

        let result = reconcile(&paths, &baseline, Some(&prior));
        assert!(matches!(result, Err(CdxError::Discovery { .. })));
    }

    #[test]
    fn artifact_times_match_by_name_or_meta() {
        let tmp = TempDir::new().expect("temp dir");
        let paths = paths(&tmp);
        let by_name = write_session(
            &paths.sessions_root,
            &format!("rollout-2026-10-16T09-00-00-{ID_A}.jsonl"),
            "{}",
        );
        let by_meta = write_session(&paths.sessions_root, "rollout-x.jsonl", &meta_line(ID_B));
        let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        set_mtime(&by_name, stamp);
        set_mtime(&by_meta, stamp + Duration::from_secs(60));

        let times = artifact_times(&paths, &[ID_A, ID_B, "missing"]);
        assert_eq!(times.get(ID_A), Some(&stamp));
        assert_eq!(times.get(ID_B), Some(&(stamp + Duration::from_secs(60))));
        assert!(!times.contains_key("missing"));
    }
}
