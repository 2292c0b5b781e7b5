//! Batch orchestration: the full per-archive publish flow and its report.
//!
//! One run walks every registered archive through unpack, policy decision,
//! transforms, sanitization, repack and sync. Archive-scoped failures are
//! collected and the batch continues; filesystem failures against the
//! destination abort the run, since continuing after a half-applied upsert
//! would leave the portal directory inconsistent.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::archive::DatasetArchive;
use crate::config::Environment;
use crate::error::PublishError;
use crate::pipeline::TransformPipeline;
use crate::policy::{RestrictionDecision, RestrictionPolicy};
use crate::steps::COMPUTED_POSITION_COLUMN;
use crate::sync::{PublishMode, SyncEngine, SyncOutcome, SyncStats};
use crate::table::{DataTable, TableExporter};

/// Switches controlling what one batch run does.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Run transforms and repackage each archive. When off, source
    /// archives are passed through untouched.
    pub update_archives: bool,
    /// Copy packaged archives into the datasets directory.
    pub copy_to_datasets: bool,
    pub mode: PublishMode,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            update_archives: true,
            copy_to_datasets: true,
            mode: PublishMode::Strict,
        }
    }
}

/// One archive the batch could not process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFailure {
    pub archive: String,
    pub message: String,
}

/// One archive the policy refused to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeniedArchive {
    pub archive: String,
    pub reason: String,
}

/// Summary of one batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub total: usize,
    pub processed: usize,
    pub published: Vec<String>,
    pub publish_not_allowed: Vec<DeniedArchive>,
    pub failed: Vec<ArchiveFailure>,
    pub stats: SyncStats,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}

/// Destinations for one run: the live datasets directory plus an
/// optional local mirror.
#[derive(Debug, Default)]
struct SyncTargets {
    primary: Option<SyncEngine>,
    mirror: Option<SyncEngine>,
}

/// Walks registered source archives through the publish flow.
pub struct ArchivePublisher {
    environment: Environment,
    policy: RestrictionPolicy,
    pipeline: TransformPipeline,
    exporter: TableExporter,
    sources: Vec<PathBuf>,
    work_root: PathBuf,
}

impl ArchivePublisher {
    pub fn new(environment: Environment) -> Self {
        let policy = RestrictionPolicy::new(environment.policy.clone());
        let pipeline = TransformPipeline::new(policy.config());
        Self {
            environment,
            policy,
            pipeline,
            exporter: TableExporter::new().exclude_columns([COMPUTED_POSITION_COLUMN]),
            sources: Vec::new(),
            work_root: std::env::temp_dir().join("pelago-work"),
        }
    }

    /// Overrides the scratch directory used for unpacking and repacking.
    pub fn with_work_root(mut self, work_root: &Path) -> Self {
        self.work_root = work_root.to_path_buf();
        self
    }

    /// Registers one source archive. The path must exist up front so a
    /// typo surfaces before the batch starts mutating anything.
    pub fn register(&mut self, path: &Path) -> Result<(), PublishError> {
        if !path.is_file() {
            return Err(PublishError::NotFound(path.to_path_buf()));
        }
        self.sources.push(path.to_path_buf());
        Ok(())
    }

    pub fn registered(&self) -> usize {
        self.sources.len()
    }

    /// Runs the batch. `cancel` is checked at archive boundaries; a
    /// cancelled run finishes the archive in flight and reports what was
    /// done.
    pub fn run(
        &self,
        options: &RunOptions,
        cancel: &AtomicBool,
    ) -> Result<BatchReport, PublishError> {
        // Stale scratch content from an aborted run must not leak into
        // this one.
        if self.work_root.exists() {
            fs::remove_dir_all(&self.work_root)?;
        }
        fs::create_dir_all(&self.work_root)?;

        let mut targets = if options.copy_to_datasets {
            let primary = SyncEngine::new(self.environment.require_datasets_directory()?)?;
            // The mirror keeps a local copy of everything published; a
            // missing mirror directory skips the copies, nothing more.
            let mirror = match &self.environment.mirror_directory {
                Some(dir) if dir.is_dir() => Some(SyncEngine::new(dir)?),
                Some(dir) => {
                    warn!(mirror = %dir.display(), "mirror directory missing; mirror copies skipped");
                    None
                }
                None => None,
            };
            SyncTargets {
                primary: Some(primary),
                mirror,
            }
        } else {
            SyncTargets::default()
        };

        let mut report = BatchReport {
            total: self.sources.len(),
            ..BatchReport::default()
        };

        for source in &self.sources {
            if cancel.load(Ordering::Relaxed) {
                warn!("batch cancelled; remaining archives untouched");
                report.cancelled = true;
                break;
            }
            let name = source
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();

            match self.process_one(source, options, &mut targets, &mut report) {
                Ok(()) => report.processed += 1,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(archive = %name, "archive failed: {}", err.user_message());
                    report.failed.push(ArchiveFailure {
                        archive: name,
                        message: err.user_message(),
                    });
                }
            }
        }

        if let Some(primary) = &targets.primary {
            report.stats = primary.stats().clone();
        }
        info!(
            total = report.total,
            processed = report.processed,
            failed = report.failed.len(),
            denied = report.publish_not_allowed.len(),
            "batch finished"
        );
        Ok(report)
    }

    fn process_one(
        &self,
        source: &Path,
        options: &RunOptions,
        targets: &mut SyncTargets,
        report: &mut BatchReport,
    ) -> Result<(), PublishError> {
        let archive = DatasetArchive::unpack(source, &self.work_root)?;
        let result = self.process_unpacked(&archive, options, targets, report);
        archive.teardown();
        result
    }

    fn process_unpacked(
        &self,
        archive: &DatasetArchive,
        options: &RunOptions,
        targets: &mut SyncTargets,
        report: &mut BatchReport,
    ) -> Result<(), PublishError> {
        let decision = self
            .policy
            .decide(&archive.data_type().canonical, archive.identity());
        info!(
            archive = archive.name(),
            allowed = decision.allowed,
            sanitize = decision.must_sanitize,
            "{}", decision.reason
        );

        // A denied archive is still fully processed; only the sync step
        // excludes it.
        if !decision.allowed && options.mode == PublishMode::Strict {
            report.publish_not_allowed.push(DeniedArchive {
                archive: archive.name().to_string(),
                reason: decision.reason.clone(),
            });
        }

        let artifact = if options.update_archives {
            self.transform_and_repack(archive, &decision)?
        } else {
            archive.source_path().to_path_buf()
        };

        if let Some(primary) = targets.primary.as_mut() {
            let outcome = primary.publish(&artifact, decision.allowed, options.mode)?;
            if !matches!(outcome, SyncOutcome::Skipped) {
                report.published.push(archive.name().to_string());
                if let Some(mirror) = targets.mirror.as_mut() {
                    mirror.publish(&artifact, decision.allowed, options.mode)?;
                }
            }
        } else if decision.allowed || options.mode == PublishMode::ForceAll {
            report.published.push(archive.name().to_string());
        }
        Ok(())
    }

    fn transform_and_repack(
        &self,
        archive: &DatasetArchive,
        decision: &RestrictionDecision,
    ) -> Result<PathBuf, PublishError> {
        let data_file = archive.data_file_path();
        let mut table = DataTable::load(&data_file)?;
        self.pipeline.run(
            &mut table,
            archive.name(),
            &archive.data_type().canonical,
            decision.must_sanitize,
        )?;
        self.exporter.export_with_fallback(&table, &data_file)?;

        if decision.must_sanitize {
            self.policy.sanitize(archive)?;
        }
        archive.repack(&self.work_root.join("rezipped"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use crate::config::PolicyConfig;

    fn zipped_dataset(dir: &Path, name: &str, data_type: &str) -> PathBuf {
        let path = dir.join(format!("{name}.zip"));
        let file = fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        zip.start_file("delivery_note.txt", options).unwrap();
        write!(zip, "status: delivered\ndata_type: {data_type}\n").unwrap();
        zip.start_file("shark_data.txt", options).unwrap();
        write!(
            zip,
            "parameter\tsample_latitude_dd\tsample_longitude_dd\twater_depth_m\n\
             Chlorophyll-a\t57.1\t11.9\t42\n\
             Secchi depth\t57.2\t12.0\t10\n"
        )
        .unwrap();
        zip.start_file("processed_data/data.txt", options).unwrap();
        write!(zip, "processed\n").unwrap();
        zip.finish().unwrap();
        path
    }

    fn environment(datasets: &Path) -> Environment {
        Environment {
            name: "test".to_string(),
            datasets_directory: Some(datasets.to_path_buf()),
            mirror_directory: None,
            trigger_url: None,
            status_url: None,
            shadow_environment: None,
            policy: PolicyConfig::default(),
        }
    }

    #[test]
    fn test_register_missing_archive_fails_early() {
        let tmp = tempfile::tempdir().unwrap();
        let mut publisher = ArchivePublisher::new(environment(tmp.path()));
        let missing = tmp.path().join("nope.zip");
        assert!(matches!(
            publisher.register(&missing),
            Err(PublishError::NotFound(_))
        ));
    }

    #[test]
    fn test_batch_publishes_sanitized_archive() {
        let sources = tempfile::tempdir().unwrap();
        let datasets = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let source = zipped_dataset(
            sources.path(),
            "SHARK_Chlorophyll_2021_SMHI_version_2024-01-01",
            "Chlorophyll",
        );

        let mut publisher =
            ArchivePublisher::new(environment(datasets.path())).with_work_root(work.path());
        publisher.register(&source).unwrap();
        let report = publisher
            .run(&RunOptions::default(), &AtomicBool::new(false))
            .unwrap();

        assert!(report.is_clean());
        assert_eq!(report.published.len(), 1);
        assert_eq!(report.stats.created, 1);

        // The published copy is repackaged without the processed data and
        // with depth masked.
        let published = datasets
            .path()
            .join("SHARK_Chlorophyll_2021_SMHI_version_2024-01-01.zip");
        let file = fs::File::open(published).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        assert!(zip.by_name("processed_data/data.txt").is_err());
        let mut data = String::new();
        std::io::Read::read_to_string(&mut zip.by_name("shark_data.txt").unwrap(), &mut data)
            .unwrap();
        assert!(data.contains("999"));
        assert!(!data.contains("Secchi depth"));
    }

    #[test]
    fn test_denied_archive_lands_in_not_allowed_list() {
        let sources = tempfile::tempdir().unwrap();
        let datasets = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let source = zipped_dataset(sources.path(), "SHARK_Epibenthos_2020_ABC", "Epibenthos");

        let mut publisher =
            ArchivePublisher::new(environment(datasets.path())).with_work_root(work.path());
        publisher.register(&source).unwrap();
        let report = publisher
            .run(&RunOptions::default(), &AtomicBool::new(false))
            .unwrap();

        assert_eq!(report.publish_not_allowed.len(), 1);
        assert!(report.published.is_empty());
        assert_eq!(fs::read_dir(datasets.path()).unwrap().count(), 0);
        // The archive went through the whole flow; the sync engine did
        // the excluding.
        assert_eq!(report.processed, 1);
        assert_eq!(report.stats.skipped, 1);
    }

    #[test]
    fn test_broken_archive_is_recorded_and_batch_continues() {
        let sources = tempfile::tempdir().unwrap();
        let datasets = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let broken = sources.path().join("SHARK_Broken_2021.zip");
        fs::write(&broken, b"not a zip").unwrap();
        let good = zipped_dataset(
            sources.path(),
            "SHARK_Chlorophyll_2021_version_1",
            "Chlorophyll",
        );

        let mut publisher =
            ArchivePublisher::new(environment(datasets.path())).with_work_root(work.path());
        publisher.register(&broken).unwrap();
        publisher.register(&good).unwrap();
        let report = publisher
            .run(&RunOptions::default(), &AtomicBool::new(false))
            .unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].archive, "SHARK_Broken_2021");
        assert_eq!(report.published.len(), 1);
    }

    #[test]
    fn test_missing_data_file_is_archive_local_failure() {
        let sources = tempfile::tempdir().unwrap();
        let datasets = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();

        // Delivery note but no data file: reading it fails with an
        // archive-local I/O error.
        let noteless = sources.path().join("SHARK_Chl_2020_version_1.zip");
        let file = fs::File::create(&noteless).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        zip.start_file("delivery_note.txt", options).unwrap();
        write!(zip, "data_type: Chlorophyll\n").unwrap();
        zip.finish().unwrap();

        let good = zipped_dataset(
            sources.path(),
            "SHARK_Chlorophyll_2021_version_1",
            "Chlorophyll",
        );

        let mut publisher =
            ArchivePublisher::new(environment(datasets.path())).with_work_root(work.path());
        publisher.register(&noteless).unwrap();
        publisher.register(&good).unwrap();
        let report = publisher
            .run(&RunOptions::default(), &AtomicBool::new(false))
            .unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].archive, "SHARK_Chl_2020_version_1");
        assert_eq!(report.published.len(), 1);
    }

    #[test]
    fn test_mirror_directory_receives_a_copy() {
        let sources = tempfile::tempdir().unwrap();
        let datasets = tempfile::tempdir().unwrap();
        let mirror = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let source = zipped_dataset(sources.path(), "SHARK_Chl_2021_version_1", "Chlorophyll");

        let mut env = environment(datasets.path());
        env.mirror_directory = Some(mirror.path().to_path_buf());
        let mut publisher = ArchivePublisher::new(env).with_work_root(work.path());
        publisher.register(&source).unwrap();
        publisher
            .run(&RunOptions::default(), &AtomicBool::new(false))
            .unwrap();

        assert!(datasets.path().join("SHARK_Chl_2021_version_1.zip").is_file());
        assert!(mirror.path().join("SHARK_Chl_2021_version_1.zip").is_file());
    }

    #[test]
    fn test_missing_mirror_directory_is_skipped() {
        let sources = tempfile::tempdir().unwrap();
        let datasets = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let source = zipped_dataset(sources.path(), "SHARK_Chl_2021_version_1", "Chlorophyll");

        let mut env = environment(datasets.path());
        env.mirror_directory = Some(datasets.path().join("no-such-mirror"));
        let mut publisher = ArchivePublisher::new(env).with_work_root(work.path());
        publisher.register(&source).unwrap();
        let report = publisher
            .run(&RunOptions::default(), &AtomicBool::new(false))
            .unwrap();
        assert!(report.is_clean());
        assert!(datasets.path().join("SHARK_Chl_2021_version_1.zip").is_file());
    }

    #[test]
    fn test_cancel_before_start_processes_nothing() {
        let sources = tempfile::tempdir().unwrap();
        let datasets = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let source = zipped_dataset(sources.path(), "SHARK_Chl_2021_version_1", "Chlorophyll");

        let mut publisher =
            ArchivePublisher::new(environment(datasets.path())).with_work_root(work.path());
        publisher.register(&source).unwrap();
        let report = publisher
            .run(&RunOptions::default(), &AtomicBool::new(true))
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.processed, 0);
    }

    #[test]
    fn test_pass_through_mode_copies_source_untouched() {
        let sources = tempfile::tempdir().unwrap();
        let datasets = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let source = zipped_dataset(sources.path(), "SHARK_Chl_2021_version_1", "Chlorophyll");

        let mut publisher =
            ArchivePublisher::new(environment(datasets.path())).with_work_root(work.path());
        publisher.register(&source).unwrap();
        let options = RunOptions {
            update_archives: false,
            ..RunOptions::default()
        };
        publisher.run(&options, &AtomicBool::new(false)).unwrap();

        let published = datasets.path().join("SHARK_Chl_2021_version_1.zip");
        assert_eq!(
            fs::read(published).unwrap(),
            fs::read(&source).unwrap()
        );
    }
}
