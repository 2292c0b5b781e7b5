//! Identity-keyed upsert of packaged archives into a destination
//! directory.
//!
//! The destination holds at most one archive file per identity name.
//! Publishing a new version first deletes whatever file currently carries
//! that identity, then copies the new artifact in, so a version bump never
//! leaves two files behind.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::archive::identity_name;
use crate::error::PublishError;

/// How a publish pass treats datasets the policy denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    /// Denied datasets are skipped and reported.
    Strict,
    /// Denied datasets are published anyway. Operator override for
    /// environments where the policy tables lag behind reality.
    ForceAll,
}

/// What happened to one artifact during sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No archive with this identity existed; the artifact was copied in.
    Created,
    /// An existing archive with this identity was replaced.
    Updated { replaced: PathBuf },
    /// The policy denied publication and the mode was strict.
    Skipped,
}

/// Counters accumulated over one sync pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub removed: usize,
}

impl SyncStats {
    pub fn published(&self) -> usize {
        self.created + self.updated
    }
}

/// A destination directory indexed by identity name.
#[derive(Debug)]
pub struct SyncTarget {
    directory: PathBuf,
    index: BTreeMap<String, PathBuf>,
}

impl SyncTarget {
    pub fn open(directory: &Path) -> Result<Self, PublishError> {
        if !directory.is_dir() {
            return Err(PublishError::NotFound(directory.to_path_buf()));
        }
        let mut target = Self {
            directory: directory.to_path_buf(),
            index: BTreeMap::new(),
        };
        target.refresh()?;
        Ok(target)
    }

    /// Wraps a destination-side filesystem failure; these abort the whole
    /// run.
    fn sync_err(&self, source: io::Error) -> PublishError {
        PublishError::Sync {
            destination: self.directory.display().to_string(),
            source,
        }
    }

    /// Rebuilds the identity index from the directory contents. Only
    /// `.zip` entries participate; anything else in the directory is left
    /// alone.
    fn refresh(&mut self) -> Result<(), PublishError> {
        self.index.clear();
        for entry in fs::read_dir(&self.directory).map_err(|e| self.sync_err(e))? {
            let entry = entry.map_err(|e| self.sync_err(e))?;
            let path = entry.path();
            let is_zip = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
            if !is_zip {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                self.index
                    .insert(identity_name(stem).to_string(), path.clone());
            }
        }
        debug!(
            directory = %self.directory.display(),
            archives = self.index.len(),
            "indexed sync target"
        );
        Ok(())
    }

    pub fn existing_path(&self, identity: &str) -> Option<&Path> {
        self.index.get(identity).map(PathBuf::as_path)
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }
}

/// Performs the delete-then-copy upsert against one [`SyncTarget`].
#[derive(Debug)]
pub struct SyncEngine {
    target: SyncTarget,
    stats: SyncStats,
}

impl SyncEngine {
    pub fn new(directory: &Path) -> Result<Self, PublishError> {
        Ok(Self {
            target: SyncTarget::open(directory)?,
            stats: SyncStats::default(),
        })
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Upserts one packaged artifact. Filesystem failures here are fatal
    /// to the batch; the destination may otherwise be left with the old
    /// version deleted and the new one missing.
    pub fn publish(
        &mut self,
        artifact: &Path,
        allowed: bool,
        mode: PublishMode,
    ) -> Result<SyncOutcome, PublishError> {
        if !allowed && mode == PublishMode::Strict {
            self.stats.skipped += 1;
            return Ok(SyncOutcome::Skipped);
        }

        let file_name = artifact
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PublishError::NotFound(artifact.to_path_buf()))?;
        let stem = artifact
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name);
        let identity = identity_name(stem).to_string();

        let replaced = self.target.existing_path(&identity).map(Path::to_path_buf);
        if let Some(old) = &replaced {
            fs::remove_file(old).map_err(|e| self.target.sync_err(e))?;
        }

        let destination = self.target.directory.join(file_name);
        fs::copy(artifact, &destination).map_err(|e| self.target.sync_err(e))?;
        self.target.index.insert(identity.clone(), destination);

        let outcome = match replaced {
            Some(replaced) => {
                self.stats.updated += 1;
                info!(identity, replaced = %replaced.display(), "updated archive");
                SyncOutcome::Updated { replaced }
            }
            None => {
                self.stats.created += 1;
                info!(identity, "published new archive");
                SyncOutcome::Created
            }
        };
        Ok(outcome)
    }

    /// Deletes the archive carrying `name`'s identity, if present.
    pub fn remove(&mut self, name: &str) -> Result<bool, PublishError> {
        let identity = identity_name(name).to_string();
        let Some(path) = self.target.existing_path(&identity).map(Path::to_path_buf) else {
            return Ok(false);
        };
        fs::remove_file(&path).map_err(|e| self.target.sync_err(e))?;
        self.target.index.remove(&identity);
        self.stats.removed += 1;
        info!(identity, path = %path.display(), "removed archive");
        Ok(true)
    }
}
