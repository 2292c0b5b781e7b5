//! Ordered execution of transforms and validators over one dataset.
//!
//! The pipeline runs four phases: mandatory enrichment for every dataset,
//! the conditional restricted-content steps when the policy decision asks
//! for sanitization, unconditional cleanup, and finally the non-mutating
//! validators. The first failing transform aborts the dataset.

use tracing::{debug, warn};

use crate::config::PolicyConfig;
use crate::error::PublishError;
use crate::steps::{StepRegistry, ValidationIssue};
use crate::table::DataTable;

/// What the pipeline did to one dataset.
#[derive(Debug, Default)]
pub struct PipelineReport {
    /// Descriptions of the transforms applied, in order.
    pub steps_applied: Vec<String>,
    /// Issues recorded by the validators. Issues are reported, never
    /// fatal.
    pub issues: Vec<ValidationIssue>,
}

/// Runs the configured step phases against dataset tables.
#[derive(Debug)]
pub struct TransformPipeline {
    registry: StepRegistry,
}

impl TransformPipeline {
    pub fn new(policy: &PolicyConfig) -> Self {
        Self {
            registry: StepRegistry::from_policy(policy),
        }
    }

    /// Applies all phases to `table`. `archive` names the dataset in
    /// errors and logs; `canonical_type` selects the conditional step
    /// list; `must_sanitize` gates whether that list runs at all.
    pub fn run(
        &self,
        table: &mut DataTable,
        archive: &str,
        canonical_type: &str,
        must_sanitize: bool,
    ) -> Result<PipelineReport, PublishError> {
        let mut report = PipelineReport::default();

        for spec in StepRegistry::mandatory_steps() {
            Self::apply(spec.resolve().as_ref(), table, archive, &mut report)?;
        }

        if must_sanitize {
            for spec in self.registry.restricted_steps(canonical_type) {
                Self::apply(spec.resolve().as_ref(), table, archive, &mut report)?;
            }
        }

        for step in StepRegistry::cleanup_steps() {
            Self::apply(step.as_ref(), table, archive, &mut report)?;
        }

        for validator in StepRegistry::validators() {
            let issues = validator.validate(table);
            for issue in &issues {
                warn!(archive, validator = %issue.validator, "{}", issue.message);
            }
            report.issues.extend(issues);
        }

        debug!(
            archive,
            steps = report.steps_applied.len(),
            issues = report.issues.len(),
            "pipeline finished"
        );
        Ok(report)
    }

    fn apply(
        step: &dyn crate::steps::Transform,
        table: &mut DataTable,
        archive: &str,
        report: &mut PipelineReport,
    ) -> Result<(), PublishError> {
        let description = step.description();
        step.apply(table).map_err(|message| PublishError::Pipeline {
            archive: archive.to_string(),
            message: format!("{description}: {message}"),
        })?;
        report.steps_applied.push(description);
        Ok(())
    }
}
