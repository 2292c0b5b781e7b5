//! Environment and policy configuration.
//!
//! Environments are loaded once from a TOML file and resolved into
//! immutable [`Environment`] values. Policy tables are frozen at
//! resolution time; nothing mutates them afterwards.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::PublishError;

/// Restriction and redaction tables for one environment.
///
/// Constructed once per environment and passed explicitly into
/// `RestrictionPolicy`; never mutated after construction.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Global restriction switch. When off, every dataset publishes as-is.
    pub restrict: bool,
    /// Explicit allow-list of canonical data types. When set, a type absent
    /// from the list is not allowed to publish at all.
    pub allowed_types: Option<Vec<String>>,
    /// Data types that are denied unless overridden per package.
    pub restricted_types: Vec<String>,
    /// Data types that publish without any sanitation.
    pub exempt_types: Vec<String>,
    /// Identity names (case-insensitive) exempt from the deny-list.
    pub unrestricted_packages: Vec<String>,
    /// Expected number of files left in the unpacked tree after sanitation.
    /// A mismatch is logged as a warning, never an error.
    pub expected_residual_files: usize,
    /// Replacement written into depth columns during redaction.
    pub depth_replace_value: String,
    /// Columns holding depth values to redact.
    pub depth_columns: Vec<String>,
    /// Secchi-related columns blanked during redaction.
    pub secchi_columns: Vec<String>,
    /// Parameter values whose rows are removed entirely.
    pub remove_parameter_rows: Vec<String>,
    /// Free-text comment columns blanked during redaction.
    pub comment_columns: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            restrict: true,
            allowed_types: None,
            restricted_types: vec![
                "epibenthos".to_string(),
                "epibenthos_dropvideo".to_string(),
                "zoobenthos".to_string(),
                "profile".to_string(),
            ],
            exempt_types: Vec::new(),
            unrestricted_packages: vec!["SHARK_Epibenthos_2019_OLST".to_string()],
            expected_residual_files: 3,
            depth_replace_value: "999".to_string(),
            depth_columns: vec!["bottom_depth_m".to_string(), "water_depth_m".to_string()],
            secchi_columns: vec![
                "secchi_depth_m".to_string(),
                "secchi_depth_quality_flag".to_string(),
            ],
            remove_parameter_rows: vec!["Secchi depth".to_string()],
            comment_columns: [
                "visit_comment",
                "sample_comment",
                "variable_comment",
                "sampling_method_comment_phyche",
                "section_comment",
                "transect_comment",
                "calculation_comment",
                "relative_abundance_comment",
                "sect_substrate_comment",
                "method_comment",
                "sediment_comment",
                "sample_substrate_comnt_boulder",
                "sample_substrate_comnt_rock",
                "sample_substrate_comnt_softbottom",
                "sample_substrate_comnt_stone",
                "sample_substrate_comnt_gravel",
                "sample_substrate_comnt_sand",
                "section_substrate_comnt_boulder",
                "section_substrate_comnt_gravel",
                "section_substrate_comnt_rock",
                "section_substrate_comnt_sand",
                "section_substrate_comnt_softbottom",
                "section_substrate_comnt_stone",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

/// One `[environments.<tag>]` entry as written in the TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvironmentEntry {
    /// Remote "live" datasets directory the importer watches.
    pub datasets_directory: Option<PathBuf>,
    /// Optional local mirror of published zip packages.
    pub mirror_directory: Option<PathBuf>,
    /// Endpoint that starts an import when POSTed.
    pub trigger_url: Option<String>,
    /// Endpoint polled for the literal body `AVAILABLE`.
    pub status_url: Option<String>,
    /// Whether the operator may switch restriction off in this environment.
    /// Production-like environments keep restriction forced on.
    #[serde(default)]
    pub allow_restriction_off: bool,
    /// Opt-in shadow publish target: after a run against this environment,
    /// the same inputs are replayed against the named environment.
    pub shadow_environment: Option<String>,
}

/// The parsed environments file: shared policy tables plus one entry per
/// environment tag.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvironmentsFile {
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentEntry>,
}

impl EnvironmentsFile {
    /// Loads and parses the environments file.
    pub fn load(path: &Path) -> Result<Self, PublishError> {
        if !path.exists() {
            return Err(PublishError::Configuration(format!(
                "environments file not found: {}",
                path.display()
            )));
        }
        let raw = fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Resolves an environment tag into an immutable [`Environment`].
    ///
    /// `restrict_off` requests publishing without restriction; it is only
    /// honoured where the environment allows it.
    pub fn resolve(&self, tag: &str, restrict_off: bool) -> Result<Environment, PublishError> {
        let (name, entry) = self
            .environments
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(tag))
            .ok_or_else(|| {
                PublishError::Configuration(format!("unknown environment: '{tag}'"))
            })?;

        if restrict_off && !entry.allow_restriction_off {
            return Err(PublishError::Configuration(format!(
                "restriction cannot be switched off in environment '{name}'"
            )));
        }

        let mut policy = self.policy.clone();
        if restrict_off {
            policy.restrict = false;
        }

        Ok(Environment {
            name: name.clone(),
            datasets_directory: entry.datasets_directory.clone(),
            mirror_directory: entry.mirror_directory.clone(),
            trigger_url: entry.trigger_url.clone(),
            status_url: entry.status_url.clone(),
            shadow_environment: entry.shadow_environment.clone(),
            policy,
        })
    }
}

/// A fully resolved environment: endpoints, directories and frozen policy.
#[derive(Debug, Clone)]
pub struct Environment {
    pub name: String,
    pub datasets_directory: Option<PathBuf>,
    pub mirror_directory: Option<PathBuf>,
    pub trigger_url: Option<String>,
    pub status_url: Option<String>,
    pub shadow_environment: Option<String>,
    pub policy: PolicyConfig,
}

impl Environment {
    /// The live datasets directory, required for copy and removal runs.
    pub fn require_datasets_directory(&self) -> Result<&Path, PublishError> {
        match &self.datasets_directory {
            Some(dir) if dir.is_dir() => Ok(dir),
            Some(dir) => Err(PublishError::Configuration(format!(
                "datasets directory does not exist: {}",
                dir.display()
            ))),
            None => Err(PublishError::Configuration(format!(
                "no datasets directory configured for environment '{}'",
                self.name
            ))),
        }
    }

    /// Both trigger endpoints, required before any import is triggered.
    pub fn require_endpoints(&self) -> Result<(&str, &str), PublishError> {
        match (self.trigger_url.as_deref(), self.status_url.as_deref()) {
            (Some(trigger), Some(status)) => Ok((trigger, status)),
            _ => Err(PublishError::Configuration(format!(
                "trigger and status URLs must both be set for environment '{}'",
                self.name
            ))),
        }
    }
}

/// Default location of the environments file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pelago").join("environments.toml"))
}
