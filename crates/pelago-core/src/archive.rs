//! Dataset archive handling: unpack, identity naming, tree operations and
//! repacking.
//!
//! A [`DatasetArchive`] wraps one zip package for exactly one pipeline
//! pass. Its working directory is transient and torn down after the pass,
//! success or failure.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::PublishError;

/// Name of the delivery note inside the unpacked tree.
pub const DELIVERY_NOTE_FILE: &str = "delivery_note.txt";

/// Name of the exported data file inside the unpacked tree.
pub const DATA_FILE_NAME: &str = "shark_data.txt";

/// Strips the trailing version token from a dataset name.
///
/// `SHARK_Zoobenthos_2023_SMHI_version_2024-01-05` and
/// `SHARK_Zoobenthos_2023_SMHI` share the same identity; the identity name
/// is the key for publish uniqueness across versions.
pub fn identity_name(name: &str) -> &str {
    match name.split_once("_version_") {
        Some((base, _)) => base,
        None => name,
    }
}

/// Data-type classification at two granularities: the display form as
/// written in the delivery note and the canonical form used by policy and
/// registry lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataType {
    pub display: String,
    pub canonical: String,
}

impl DataType {
    pub fn new(display: &str) -> Self {
        let canonical = display.trim().to_lowercase().replace(' ', "_");
        Self {
            display: display.trim().to_string(),
            canonical,
        }
    }
}

/// One zip package unpacked into a transient working directory.
#[derive(Debug)]
pub struct DatasetArchive {
    source_path: PathBuf,
    name: String,
    data_type: DataType,
    work_dir: PathBuf,
    unpacked_dir: PathBuf,
}

impl DatasetArchive {
    /// Unpacks `source` into a fresh working directory under `work_root`
    /// and reads the dataset's classification from its delivery note.
    pub fn unpack(source: &Path, work_root: &Path) -> Result<Self, PublishError> {
        let name = source
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| PublishError::Archive {
                archive: source.display().to_string(),
                message: "zip path has no valid stem".to_string(),
            })?
            .to_string();

        let work_dir = work_root.join(&name);
        if work_dir.exists() {
            fs::remove_dir_all(&work_dir)?;
        }
        fs::create_dir_all(&work_dir)?;

        extract_zip(source, &work_dir)?;

        // SHARK packages usually nest everything under a single directory
        // named like the zip; descend into it so tree operations see the
        // package root.
        let unpacked_dir = single_nested_dir(&work_dir)?.unwrap_or_else(|| work_dir.clone());

        let data_type = read_data_type(&unpacked_dir, &name)?;

        Ok(Self {
            source_path: source.to_path_buf(),
            name,
            data_type,
            work_dir,
            unpacked_dir,
        })
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Dataset name including any version token.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version-stripped identity name used for sync uniqueness.
    pub fn identity(&self) -> &str {
        identity_name(&self.name)
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    pub fn unpacked_dir(&self) -> &Path {
        &self.unpacked_dir
    }

    /// Path of the delimited data file inside the unpacked tree.
    pub fn data_file_path(&self) -> PathBuf {
        self.unpacked_dir.join(DATA_FILE_NAME)
    }

    /// Lists all files (not directories) under the unpacked tree, relative
    /// to its root.
    pub fn list_files(&self) -> Result<Vec<PathBuf>, PublishError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.unpacked_dir) {
            let entry = entry.map_err(|err| PublishError::Archive {
                archive: self.name.clone(),
                message: format!("failed to walk unpacked tree: {err}"),
            })?;
            if entry.file_type().is_file() {
                let relative = entry
                    .path()
                    .strip_prefix(&self.unpacked_dir)
                    .unwrap_or(entry.path());
                files.push(relative.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Removes the processed-data subtree, if present.
    pub fn remove_processed_data(&self) -> Result<(), PublishError> {
        self.remove_subtree("processed_data")
    }

    /// Removes the received-data subtree, if present.
    pub fn remove_received_data(&self) -> Result<(), PublishError> {
        self.remove_subtree("received_data")
    }

    fn remove_subtree(&self, dir_name: &str) -> Result<(), PublishError> {
        let target = self.unpacked_dir.join(dir_name);
        if target.is_dir() {
            fs::remove_dir_all(&target)?;
        }
        Ok(())
    }

    /// Removes readme files at the unpacked root, if present.
    pub fn remove_readme_files(&self) -> Result<(), PublishError> {
        for entry in fs::read_dir(&self.unpacked_dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().to_lowercase();
            if entry.file_type()?.is_file() && file_name.starts_with("readme") {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    /// Repacks the unpacked tree into `<name>.zip` under `rezip_root`
    /// preserving relative paths.
    pub fn repack(&self, rezip_root: &Path) -> Result<PathBuf, PublishError> {
        fs::create_dir_all(rezip_root)?;
        let output_path = rezip_root.join(format!("{}.zip", self.name));
        let file = File::create(&output_path)?;
        let mut writer = ZipWriter::new(file);
        let options: FileOptions =
            FileOptions::default().compression_method(CompressionMethod::Deflated);

        for entry in WalkDir::new(&self.unpacked_dir) {
            let entry = entry.map_err(|err| PublishError::Archive {
                archive: self.name.clone(),
                message: format!("failed to walk tree for repack: {err}"),
            })?;
            let relative = entry
                .path()
                .strip_prefix(&self.unpacked_dir)
                .unwrap_or(entry.path());
            if relative.as_os_str().is_empty() {
                continue;
            }
            let entry_name = relative.to_string_lossy().replace('\\', "/");
            if entry.file_type().is_dir() {
                writer.add_directory(entry_name, options)?;
            } else {
                writer.start_file(entry_name, options)?;
                let mut source = File::open(entry.path())?;
                io::copy(&mut source, &mut writer)?;
            }
        }
        writer.finish()?;
        Ok(output_path)
    }

    /// Discards the transient working directory. Called after the archive's
    /// pipeline pass regardless of outcome; never fails the run.
    pub fn teardown(&self) {
        if self.work_dir.exists() {
            if let Err(err) = fs::remove_dir_all(&self.work_dir) {
                warn!(
                    archive = %self.name,
                    path = %self.work_dir.display(),
                    error = %err,
                    "failed to clear archive working directory"
                );
            }
        }
    }
}

fn extract_zip(source: &Path, target: &Path) -> Result<(), PublishError> {
    let file = File::open(source)?;
    let mut archive = ZipArchive::new(file)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let entry_path = sanitize_entry_path(entry.name(), source)?;
        let destination = target.join(&entry_path);

        if entry.name().ends_with('/') {
            fs::create_dir_all(&destination)?;
            continue;
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut output = File::create(&destination)?;
        io::copy(&mut entry, &mut output)?;
    }

    Ok(())
}

/// Rejects absolute and parent-escaping entry names.
fn sanitize_entry_path(entry: &str, source: &Path) -> Result<PathBuf, PublishError> {
    let path = Path::new(entry);
    if path.is_absolute() {
        return Err(PublishError::Archive {
            archive: source.display().to_string(),
            message: format!("zip entry has absolute path: {entry}"),
        });
    }
    let mut sanitized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => sanitized.push(segment),
            Component::CurDir => {}
            _ => {
                return Err(PublishError::Archive {
                    archive: source.display().to_string(),
                    message: format!("zip entry escapes the target directory: {entry}"),
                });
            }
        }
    }
    Ok(sanitized)
}

/// Returns the single nested directory when a tree contains exactly one
/// directory entry and nothing else.
fn single_nested_dir(dir: &Path) -> Result<Option<PathBuf>, PublishError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        entries.push(entry?);
    }
    if entries.len() == 1 && entries[0].file_type()?.is_dir() {
        Ok(Some(entries[0].path()))
    } else {
        Ok(None)
    }
}

fn read_data_type(unpacked_dir: &Path, archive_name: &str) -> Result<DataType, PublishError> {
    let note_path = unpacked_dir.join(DELIVERY_NOTE_FILE);
    if !note_path.is_file() {
        return Err(PublishError::Archive {
            archive: archive_name.to_string(),
            message: format!("missing {DELIVERY_NOTE_FILE}"),
        });
    }
    // Delivery notes are not always UTF-8; decode lossily and look for the
    // data_type key.
    let bytes = fs::read(&note_path)?;
    let text = String::from_utf8_lossy(&bytes);
    for line in text.lines() {
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case("data_type") && !value.trim().is_empty() {
                return Ok(DataType::new(value));
            }
        }
    }
    Err(PublishError::Archive {
        archive: archive_name.to_string(),
        message: format!("no data_type entry in {DELIVERY_NOTE_FILE}"),
    })
}
