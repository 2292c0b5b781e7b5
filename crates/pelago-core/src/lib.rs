//! Pelago Core - Archive handling, restriction policy, transform pipeline
//! and the publish batch orchestrator.

pub mod archive;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod policy;
pub mod publisher;
pub mod removal;
pub mod steps;
pub mod sync;
pub mod table;

pub use archive::{identity_name, DataType, DatasetArchive, DATA_FILE_NAME, DELIVERY_NOTE_FILE};
pub use config::{
    default_config_path, Environment, EnvironmentEntry, EnvironmentsFile, PolicyConfig,
};
pub use error::PublishError;
pub use pipeline::{PipelineReport, TransformPipeline};
pub use policy::{RestrictionDecision, RestrictionPolicy};
pub use publisher::{
    ArchiveFailure, ArchivePublisher, BatchReport, DeniedArchive, RunOptions,
};
pub use removal::{
    manifest_path, read_pending_manifest, RemovalManager, REMOVAL_MANIFEST_FILE,
};
pub use sync::{PublishMode, SyncEngine, SyncOutcome, SyncStats, SyncTarget};
pub use table::{DataFilter, DataTable, ExportEncoding, TableExporter};
