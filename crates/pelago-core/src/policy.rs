//! Restriction policy: decides whether a dataset may be published and
//! whether its content must be sanitized first.
//!
//! The decision is pure; sanitization is the separate filesystem-touching
//! half applied to an unpacked archive once the pipeline has run.

use tracing::{info, warn};

use crate::archive::DatasetArchive;
use crate::config::PolicyConfig;
use crate::error::PublishError;

/// Outcome of the publication decision for one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestrictionDecision {
    /// Whether the dataset may be published at all.
    pub allowed: bool,
    /// Whether restricted-content sanitization must run before packaging.
    pub must_sanitize: bool,
    /// Human-readable reason, surfaced in batch reports and logs.
    pub reason: String,
}

impl RestrictionDecision {
    fn allow(reason: &str) -> Self {
        Self {
            allowed: true,
            must_sanitize: false,
            reason: reason.to_string(),
        }
    }

    fn allow_sanitized(reason: &str) -> Self {
        Self {
            allowed: true,
            must_sanitize: true,
            reason: reason.to_string(),
        }
    }

    fn deny(reason: &str) -> Self {
        Self {
            allowed: false,
            must_sanitize: false,
            reason: reason.to_string(),
        }
    }
}

/// Evaluates policy tables against a dataset's type and identity name.
#[derive(Debug, Clone)]
pub struct RestrictionPolicy {
    config: PolicyConfig,
}

impl RestrictionPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Decides publication for one dataset. Rules apply in order; the
    /// first that fires wins.
    pub fn decide(&self, canonical_type: &str, identity: &str) -> RestrictionDecision {
        if !self.config.restrict {
            return RestrictionDecision::allow("restriction disabled for this environment");
        }

        if let Some(allowed_types) = &self.config.allowed_types {
            if !allowed_types.iter().any(|t| t == canonical_type) {
                return RestrictionDecision::deny(&format!(
                    "data type '{canonical_type}' is not on the publication allow list"
                ));
            }
        }

        if self.config.restricted_types.iter().any(|t| t == canonical_type) {
            if self
                .config
                .unrestricted_packages
                .iter()
                .any(|p| p.eq_ignore_ascii_case(identity))
            {
                return RestrictionDecision::allow(&format!(
                    "package '{identity}' is exempt from the '{canonical_type}' restriction"
                ));
            }
            return RestrictionDecision::deny(&format!(
                "data type '{canonical_type}' is restricted from publication"
            ));
        }

        if self.config.exempt_types.iter().any(|t| t == canonical_type) {
            return RestrictionDecision::allow(&format!(
                "data type '{canonical_type}' is published without sanitization"
            ));
        }

        RestrictionDecision::allow_sanitized(&format!(
            "data type '{canonical_type}' is published with restricted content removed"
        ))
    }

    /// Strips restricted content from an unpacked archive: processed and
    /// received data directories and any readme files. Counts the residual
    /// top-level entries and warns when they differ from the expected
    /// number; the mismatch never fails the publish.
    pub fn sanitize(&self, archive: &DatasetArchive) -> Result<(), PublishError> {
        archive.remove_processed_data()?;
        archive.remove_received_data()?;
        archive.remove_readme_files()?;

        let residual = archive.list_files()?.len();
        if residual != self.config.expected_residual_files {
            warn!(
                archive = archive.name(),
                residual,
                expected = self.config.expected_residual_files,
                "unexpected file count after sanitization"
            );
        } else {
            info!(archive = archive.name(), residual, "sanitized archive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs::{self, File};
    use std::io::Write;
    use std::path::Path;

    use zip::write::FileOptions;
    use zip::{CompressionMethod, ZipWriter};

    fn policy() -> RestrictionPolicy {
        RestrictionPolicy::new(PolicyConfig::default())
    }

    fn write_test_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut writer = ZipWriter::new(file);
        let options: FileOptions =
            FileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, contents) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_restriction_off_allows_everything_unsanitized() {
        let mut config = PolicyConfig::default();
        config.restrict = false;
        let policy = RestrictionPolicy::new(config);
        let decision = policy.decide("epibenthos", "SHARK_Epibenthos_2020_ABC");
        assert!(decision.allowed);
        assert!(!decision.must_sanitize);
    }

    #[test]
    fn test_restricted_type_is_denied() {
        let decision = policy().decide("epibenthos", "SHARK_Epibenthos_2020_ABC");
        assert!(!decision.allowed);
        assert!(decision.reason.contains("restricted"));
    }

    #[test]
    fn test_exempt_package_overrides_restricted_type() {
        let decision = policy().decide("epibenthos", "shark_epibenthos_2019_olst");
        assert!(decision.allowed);
        assert!(!decision.must_sanitize);
    }

    #[test]
    fn test_unlisted_type_is_sanitized() {
        let decision = policy().decide("chlorophyll", "SHARK_Chlorophyll_2021_SMHI");
        assert!(decision.allowed);
        assert!(decision.must_sanitize);
    }

    #[test]
    fn test_allow_list_denies_absent_type() {
        let mut config = PolicyConfig::default();
        config.allowed_types = Some(vec!["chlorophyll".to_string()]);
        let policy = RestrictionPolicy::new(config);
        assert!(!policy.decide("zooplankton", "SHARK_Zooplankton_2021").allowed);
        assert!(policy.decide("chlorophyll", "SHARK_Chlorophyll_2021").allowed);
    }

    #[test]
    fn test_allow_list_applies_before_restricted_list() {
        let mut config = PolicyConfig::default();
        config.allowed_types = Some(vec!["chlorophyll".to_string()]);
        let policy = RestrictionPolicy::new(config);
        // A restricted type absent from the allow list reports the allow
        // list as the reason.
        let decision = policy.decide("zoobenthos", "SHARK_Zoobenthos_2021");
        assert!(!decision.allowed);
        assert!(decision.reason.contains("allow list"));
    }

    #[test]
    fn test_sanitize_twice_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = tmp.path().join("SHARK_Chlorophyll_2021_SMHI_version_1.zip");
        write_test_zip(
            &zip_path,
            &[
                ("delivery_note.txt", "data_type: Chlorophyll\n"),
                ("shark_data.txt", "a\tb\n1\t2\n"),
                ("shark_metadata.txt", "rows: 1\n"),
                ("README.txt", "docs\n"),
                ("processed_data/data.txt", "x\n"),
                ("received_data/raw.txt", "y\n"),
            ],
        );
        let work_root = tmp.path().join("work");
        fs::create_dir_all(&work_root).unwrap();
        let archive = DatasetArchive::unpack(&zip_path, &work_root).unwrap();

        let p = policy();
        p.sanitize(&archive).unwrap();
        let residual = archive.list_files().unwrap().len();
        assert_eq!(residual, p.config().expected_residual_files);

        // A second pass over the already-stripped tree changes nothing.
        p.sanitize(&archive).unwrap();
        assert_eq!(archive.list_files().unwrap().len(), residual);
    }

    #[test]
    fn test_decision_is_pure() {
        let p = policy();
        let first = p.decide("profile", "SHARK_Profile_2020");
        let second = p.decide("profile", "SHARK_Profile_2020");
        assert_eq!(first, second);
    }
}
