//! Removal manifest handling.
//!
//! Removals are not deletions on the portal side: the importer reads a
//! `remove.txt` manifest from the datasets directory and retires the named
//! packages itself, deleting the manifest when it is done. This module
//! writes that manifest and mirrors the removals locally.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::archive::identity_name;
use crate::error::PublishError;
use crate::sync::SyncEngine;

/// Manifest file name the portal importer watches for.
pub const REMOVAL_MANIFEST_FILE: &str = "remove.txt";

/// Collects package names marked for removal and writes them as the
/// importer's manifest.
#[derive(Debug, Default)]
pub struct RemovalManager {
    names: BTreeSet<String>,
}

impl RemovalManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks one package for removal. Names are stored as given; the
    /// importer matches on its own terms. Duplicates collapse.
    pub fn record_for_removal(&mut self, name: &str) {
        let name = name.trim();
        if !name.is_empty() {
            self.names.insert(name.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Writes the manifest into `datasets_dir`, one name per line in
    /// sorted order. Nothing is written when no removals are recorded, so
    /// an empty run never leaves a manifest that would wake the importer.
    pub fn write_manifest(&self, datasets_dir: &Path) -> Result<Option<PathBuf>, PublishError> {
        if self.names.is_empty() {
            debug!("no removals recorded; manifest not written");
            return Ok(None);
        }
        let path = manifest_path(datasets_dir);
        let mut body = self
            .names
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n");
        body.push('\n');
        fs::write(&path, body)?;
        info!(path = %path.display(), names = self.names.len(), "wrote removal manifest");
        Ok(Some(path))
    }

    /// Deletes the mirrored copies of the recorded packages via the sync
    /// engine. Local mirrors are advisory; a name with no mirrored file is
    /// not an error.
    pub fn purge_mirror(&self, engine: &mut SyncEngine) -> Result<usize, PublishError> {
        let mut purged = 0;
        for name in &self.names {
            if engine.remove(name)? {
                purged += 1;
            } else {
                debug!(identity = identity_name(name), "no mirrored archive to purge");
            }
        }
        Ok(purged)
    }
}

pub fn manifest_path(datasets_dir: &Path) -> PathBuf {
    datasets_dir.join(REMOVAL_MANIFEST_FILE)
}

/// Reads a pending manifest left in `datasets_dir`. Returns `None` when no
/// manifest exists, distinguishing "nothing pending" from an empty file.
pub fn read_pending_manifest(datasets_dir: &Path) -> Result<Option<Vec<String>>, PublishError> {
    let path = manifest_path(datasets_dir);
    if !path.is_file() {
        return Ok(None);
    }
    let text = fs::read_to_string(&path)?;
    let names = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    Ok(Some(names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::PublishMode;

    #[test]
    fn test_manifest_round_trip_sorted_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = RemovalManager::new();
        manager.record_for_removal("SHARK_Zoo_2020");
        manager.record_for_removal("SHARK_Chl_2019");
        manager.record_for_removal("SHARK_Zoo_2020");
        manager.record_for_removal("  ");

        let path = manager.write_manifest(dir.path()).unwrap().unwrap();
        assert_eq!(path.file_name().unwrap(), REMOVAL_MANIFEST_FILE);
        let names = read_pending_manifest(dir.path()).unwrap().unwrap();
        assert_eq!(names, ["SHARK_Chl_2019", "SHARK_Zoo_2020"]);
    }

    #[test]
    fn test_empty_set_writes_no_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RemovalManager::new();
        assert!(manager.write_manifest(dir.path()).unwrap().is_none());
        assert!(read_pending_manifest(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_pending_manifest_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(manifest_path(dir.path()), "A\n\n  \nB\n").unwrap();
        let names = read_pending_manifest(dir.path()).unwrap().unwrap();
        assert_eq!(names, ["A", "B"]);
    }

    #[test]
    fn test_purge_mirror_removes_by_identity() {
        let staging = tempfile::tempdir().unwrap();
        let mirror = tempfile::tempdir().unwrap();
        let artifact = staging.path().join("SHARK_Zoo_2020_version_1.zip");
        fs::write(&artifact, b"z").unwrap();
        let mut engine = SyncEngine::new(mirror.path()).unwrap();
        engine.publish(&artifact, true, PublishMode::Strict).unwrap();

        let mut manager = RemovalManager::new();
        manager.record_for_removal("SHARK_Zoo_2020");
        manager.record_for_removal("SHARK_Never_Published");
        assert_eq!(manager.purge_mirror(&mut engine).unwrap(), 1);
        assert_eq!(fs::read_dir(mirror.path()).unwrap().count(), 0);
    }
}
