use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "pelago")]
#[command(
    author,
    version,
    about = "Publishes dataset zip archives to the data portal"
)]
#[command(after_help = "Examples:
  pelago --env test publish SHARK_Zoobenthos_2023_SMHI_version_2024-01-05.zip
  pelago --env prod publish deliveries/*.zip --trigger-import
  pelago --env prod remove SHARK_Chlorophyll_2019_SMHI --wait
  pelago --env test status")]
pub struct Config {
    /// Path to the environments configuration file
    #[arg(long, env = "PELAGO_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Target environment tag from the configuration file
    #[arg(short, long, env = "PELAGO_ENV", default_value = "test")]
    pub env: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Publish zip archives into the portal's datasets directory
    #[command(after_help = "Examples:
  pelago publish pkg.zip                  # Transform, repack and copy one archive
  pelago publish a.zip b.zip --no-copy    # Transform only, leave destination alone
  pelago publish pkg.zip --trigger-import # Also wake the portal importer")]
    Publish {
        /// Zip archives to publish
        #[arg(value_name = "ARCHIVE", required = true)]
        archives: Vec<PathBuf>,

        /// Skip transformation and repackaging; copy archives as delivered
        #[arg(long)]
        no_update: bool,

        /// Do not copy archives into the datasets directory
        #[arg(long)]
        no_copy: bool,

        /// Trigger a portal import after publishing
        #[arg(long)]
        trigger_import: bool,

        /// Publish archives the restriction policy denies
        #[arg(long)]
        force: bool,

        /// Turn restriction handling off entirely. Only honored in
        /// environments configured to allow it
        #[arg(long)]
        no_restrict: bool,
    },
    /// Mark packages for removal from the portal
    #[command(after_help = "Examples:
  pelago remove SHARK_Chlorophyll_2019_SMHI
  pelago remove SHARK_Zoobenthos_2020_UMSC --wait")]
    Remove {
        /// Package names to remove; version tokens are ignored
        #[arg(value_name = "NAME", required = true)]
        names: Vec<String>,

        /// Write the removal manifest only; do not wake the importer
        #[arg(long)]
        no_trigger: bool,

        /// Block until the importer has consumed the manifest
        #[arg(long, conflicts_with = "no_trigger")]
        wait: bool,

        /// Keep mirrored archive copies instead of deleting them
        #[arg(long)]
        keep_mirror: bool,
    },
    /// Trigger a portal import without publishing anything
    Trigger {
        /// Block until any pending removal manifest is consumed
        #[arg(long)]
        wait_removal: bool,
    },
    /// Show importer availability and pending removals
    Status,
}
