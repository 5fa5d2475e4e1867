use std::path::Path;

use tracing::debug;

use crate::registry::RegistryLocation;

/// Finds the nearest registry file, starting at `start_dir` and walking up to the filesystem
/// root. With `local_only` only `start_dir` itself is checked.
pub fn find_registry(start_dir: &Path, local_only: bool) -> Option<RegistryLocation> {
    let limit = if local_only { 1 } else { usize::MAX };
    let found = start_dir
        .ancestors()
        .take(limit)
        .map(RegistryLocation::in_dir)
        .find(RegistryLocation::exists)?;
    debug!(path = %found.path.display(), "registry found");
    Some(found)
}
