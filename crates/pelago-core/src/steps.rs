//! Transform and validator capabilities and the per-data-type step
//! registry.
//!
//! Steps are declared as tagged [`StepSpec`] variants carrying their own
//! parameters and resolved into boxed capabilities; nothing relies on
//! runtime type introspection beyond the human-readable description.

use std::collections::BTreeMap;

use chrono::Local;

use crate::config::PolicyConfig;
use crate::table::{DataFilter, DataTable};

/// Columns that receive a localized `_sv` companion during enrichment.
const LOCALIZED_COLUMNS: [&str; 5] = [
    "project_name",
    "sample_orderer",
    "sampling_laboratory",
    "analytical_laboratory",
    "reporting_institute",
];

/// Internal computed column produced by positional enrichment; stripped
/// again by cleanup before export.
pub const COMPUTED_POSITION_COLUMN: &str = "sample_position";

/// A transform capability: applies one mutation to the shared dataset
/// context. Failures carry a step-local message; the pipeline attaches the
/// archive identity.
pub trait Transform {
    fn description(&self) -> String;
    fn apply(&self, table: &mut DataTable) -> Result<(), String>;
}

/// A structural issue recorded by a post-validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub validator: String,
    pub message: String,
}

/// A validator capability: inspects the dataset after export readiness is
/// established, recording issues without mutating data.
pub trait Validate {
    fn description(&self) -> String;
    fn validate(&self, table: &DataTable) -> Vec<ValidationIssue>;
}

/// Declarative filter form used inside step specifications.
#[derive(Debug, Clone)]
pub enum FilterSpec {
    Equals { column: String, value: String },
    NotEmpty { column: String },
    All(Vec<FilterSpec>),
}

impl FilterSpec {
    pub fn build(&self) -> DataFilter {
        match self {
            Self::Equals { column, value } => DataFilter::column_equals(column, value),
            Self::NotEmpty { column } => DataFilter::column_not_empty(column),
            Self::All(parts) => {
                let mut iter = parts.iter().map(FilterSpec::build);
                let first = iter
                    .next()
                    .unwrap_or_else(|| DataFilter::column_not_empty(""));
                iter.fold(first, DataFilter::and)
            }
        }
    }
}

/// Identity-enrichment variants run for every dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichKind {
    /// Adds `_sv` companions for institution and project columns.
    LocalizedNames,
    /// Stamps today's date into an empty `reported_date` column.
    ReportedDates,
    /// Fills `sample_date` from `visit_date` where missing.
    SampleDates,
    /// Expands year-only sample dates to full placeholder dates, the
    /// manual override for known legacy deliveries.
    PlaceholderFullDates,
    /// Derives the combined position column consumed by spatial redaction
    /// filters.
    ComputedPosition,
}

/// A single pipeline step, declared with its parameters.
#[derive(Debug, Clone)]
pub enum StepSpec {
    Enrich(EnrichKind),
    /// Writes `replacement` into each column, optionally scoped by a row
    /// filter so non-matching rows stay untouched.
    Redact {
        columns: Vec<String>,
        replacement: String,
        filter: Option<FilterSpec>,
    },
    /// Removes every row matching the filter.
    Remove { filter: FilterSpec },
    /// Rewrites exact values in one column.
    Replace {
        column: String,
        from: String,
        to: String,
    },
}

impl StepSpec {
    /// Resolves this step description into a runnable transform.
    pub fn resolve(&self) -> Box<dyn Transform> {
        match self {
            Self::Enrich(kind) => Box::new(EnrichStep { kind: *kind }),
            Self::Redact {
                columns,
                replacement,
                filter,
            } => Box::new(RedactStep {
                columns: columns.clone(),
                replacement: replacement.clone(),
                filter: filter.as_ref().map(FilterSpec::build),
            }),
            Self::Remove { filter } => Box::new(RemoveRowsStep {
                description: format!("remove rows matching {filter:?}"),
                filter: filter.build(),
            }),
            Self::Replace { column, from, to } => Box::new(ReplaceStep {
                column: column.clone(),
                from: from.clone(),
                to: to.clone(),
            }),
        }
    }
}

struct EnrichStep {
    kind: EnrichKind,
}

impl Transform for EnrichStep {
    fn description(&self) -> String {
        match self.kind {
            EnrichKind::LocalizedNames => "add localized name columns".to_string(),
            EnrichKind::ReportedDates => "add reported dates".to_string(),
            EnrichKind::SampleDates => "derive sample dates".to_string(),
            EnrichKind::PlaceholderFullDates => "expand placeholder dates".to_string(),
            EnrichKind::ComputedPosition => "derive sample position".to_string(),
        }
    }

    fn apply(&self, table: &mut DataTable) -> Result<(), String> {
        match self.kind {
            EnrichKind::LocalizedNames => {
                for column in LOCALIZED_COLUMNS {
                    if !table.has_column(column) {
                        continue;
                    }
                    let localized = format!("{column}_sv");
                    table.add_column(&localized, "");
                    // Identity fallback: the localized value defaults to the
                    // delivered one until a translation table says otherwise.
                    for row in 0..table.row_count() {
                        let value = table.value(row, column).unwrap_or_default().to_string();
                        if table.value(row, &localized) == Some("") {
                            table.set_value(row, &localized, &value);
                        }
                    }
                }
                Ok(())
            }
            EnrichKind::ReportedDates => {
                let today = Local::now().format("%Y-%m-%d").to_string();
                table.add_column("reported_date", "");
                for row in 0..table.row_count() {
                    if table.value(row, "reported_date") == Some("") {
                        table.set_value(row, "reported_date", &today);
                    }
                }
                Ok(())
            }
            EnrichKind::SampleDates => {
                if !table.has_column("visit_date") {
                    return Ok(());
                }
                table.add_column("sample_date", "");
                for row in 0..table.row_count() {
                    if table.value(row, "sample_date") == Some("") {
                        let visit = table.value(row, "visit_date").unwrap_or_default().to_string();
                        table.set_value(row, "sample_date", &visit);
                    }
                }
                Ok(())
            }
            EnrichKind::PlaceholderFullDates => {
                if !table.has_column("sample_date") {
                    return Ok(());
                }
                for row in 0..table.row_count() {
                    let value = table.value(row, "sample_date").unwrap_or_default();
                    let year_only = value.len() == 4 && value.chars().all(|c| c.is_ascii_digit());
                    if year_only {
                        let expanded = format!("{value}-01-01");
                        table.set_value(row, "sample_date", &expanded);
                    }
                }
                Ok(())
            }
            EnrichKind::ComputedPosition => {
                // Deliveries without coordinate columns have no position
                // to derive; skip like the other enrichments do.
                if !table.has_column("sample_latitude_dd") || !table.has_column("sample_longitude_dd")
                {
                    return Ok(());
                }
                table.add_column(COMPUTED_POSITION_COLUMN, "");
                for row in 0..table.row_count() {
                    let lat = table
                        .value(row, "sample_latitude_dd")
                        .unwrap_or_default()
                        .to_string();
                    let lon = table
                        .value(row, "sample_longitude_dd")
                        .unwrap_or_default()
                        .to_string();
                    let position = format!("{lat}/{lon}");
                    table.set_value(row, COMPUTED_POSITION_COLUMN, &position);
                }
                Ok(())
            }
        }
    }
}

struct RedactStep {
    columns: Vec<String>,
    replacement: String,
    filter: Option<DataFilter>,
}

impl Transform for RedactStep {
    fn description(&self) -> String {
        format!(
            "redact columns [{}] with '{}'",
            self.columns.join(", "),
            self.replacement
        )
    }

    fn apply(&self, table: &mut DataTable) -> Result<(), String> {
        for column in &self.columns {
            table.set_column_where(column, &self.replacement, self.filter.as_ref());
        }
        Ok(())
    }
}

struct RemoveRowsStep {
    description: String,
    filter: DataFilter,
}

impl Transform for RemoveRowsStep {
    fn description(&self) -> String {
        self.description.clone()
    }

    fn apply(&self, table: &mut DataTable) -> Result<(), String> {
        table.remove_rows_where(&self.filter);
        Ok(())
    }
}

struct ReplaceStep {
    column: String,
    from: String,
    to: String,
}

impl Transform for ReplaceStep {
    fn description(&self) -> String {
        format!("replace '{}' with '{}' in {}", self.from, self.to, self.column)
    }

    fn apply(&self, table: &mut DataTable) -> Result<(), String> {
        for row in 0..table.row_count() {
            if table.value(row, &self.column) == Some(self.from.as_str()) {
                let to = self.to.clone();
                table.set_value(row, &self.column, &to);
            }
        }
        Ok(())
    }
}

/// A transform that strips internal-only computed columns before export.
pub struct DropColumnsStep {
    pub columns: Vec<String>,
}

impl Transform for DropColumnsStep {
    fn description(&self) -> String {
        format!("drop internal columns [{}]", self.columns.join(", "))
    }

    fn apply(&self, table: &mut DataTable) -> Result<(), String> {
        for column in &self.columns {
            table.drop_column(column);
        }
        Ok(())
    }
}

/// Validator checking that min/max depth pairs are consistent for the
/// data types that carry them.
pub struct DepthRangeValidator;

const DEPTH_RANGE_PAIRS: [(&str, &str); 2] = [
    ("sample_min_depth_m", "sample_max_depth_m"),
    ("water_depth_m", "bottom_depth_m"),
];

impl Validate for DepthRangeValidator {
    fn description(&self) -> String {
        "check min/max depth consistency".to_string()
    }

    fn validate(&self, table: &DataTable) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for (min_col, max_col) in DEPTH_RANGE_PAIRS {
            if !table.has_column(min_col) || !table.has_column(max_col) {
                continue;
            }
            for row in 0..table.row_count() {
                let min = table.value(row, min_col).and_then(|v| v.parse::<f64>().ok());
                let max = table.value(row, max_col).and_then(|v| v.parse::<f64>().ok());
                if let (Some(min), Some(max)) = (min, max) {
                    if min > max {
                        issues.push(ValidationIssue {
                            validator: self.description(),
                            message: format!(
                                "row {row}: {min_col}={min} exceeds {max_col}={max}"
                            ),
                        });
                    }
                }
            }
        }
        issues
    }
}

/// Ordered step lists per canonical data type, built once from the policy
/// tables.
#[derive(Debug, Default)]
pub struct StepRegistry {
    restricted: BTreeMap<String, Vec<StepSpec>>,
    default_restricted: Vec<StepSpec>,
}

impl StepRegistry {
    /// Builds the registry from policy tables. Redaction steps for depth
    /// data are scoped by filters so only rows carrying values are touched;
    /// positional enrichment is ordered before the spatial redactions that
    /// consume it.
    pub fn from_policy(policy: &PolicyConfig) -> Self {
        let mut default_restricted = vec![StepSpec::Enrich(EnrichKind::ComputedPosition)];

        for column in &policy.depth_columns {
            default_restricted.push(StepSpec::Redact {
                columns: vec![column.clone()],
                replacement: policy.depth_replace_value.clone(),
                filter: Some(FilterSpec::NotEmpty {
                    column: column.clone(),
                }),
            });
        }
        default_restricted.push(StepSpec::Redact {
            columns: policy.secchi_columns.clone(),
            replacement: String::new(),
            filter: None,
        });
        for parameter in &policy.remove_parameter_rows {
            default_restricted.push(StepSpec::Remove {
                filter: FilterSpec::Equals {
                    column: "parameter".to_string(),
                    value: parameter.clone(),
                },
            });
        }
        default_restricted.push(StepSpec::Redact {
            columns: policy.comment_columns.clone(),
            replacement: String::new(),
            filter: None,
        });

        let mut restricted = BTreeMap::new();
        // Profile casts carry no sampled parameter rows; row removal does
        // not apply there.
        restricted.insert(
            "profile".to_string(),
            default_restricted
                .iter()
                .filter(|spec| !matches!(spec, StepSpec::Remove { .. }))
                .cloned()
                .collect(),
        );

        Self {
            restricted,
            default_restricted,
        }
    }

    /// Ordered conditional steps for one canonical data type.
    pub fn restricted_steps(&self, canonical_type: &str) -> &[StepSpec] {
        self.restricted
            .get(canonical_type)
            .map(Vec::as_slice)
            .unwrap_or(&self.default_restricted)
    }

    /// Mandatory enrichment run for every dataset, in order.
    pub fn mandatory_steps() -> Vec<StepSpec> {
        vec![
            StepSpec::Enrich(EnrichKind::LocalizedNames),
            StepSpec::Enrich(EnrichKind::ReportedDates),
            StepSpec::Enrich(EnrichKind::SampleDates),
            StepSpec::Enrich(EnrichKind::PlaceholderFullDates),
        ]
    }

    /// Cleanup run unconditionally after all other transforms.
    pub fn cleanup_steps() -> Vec<Box<dyn Transform>> {
        vec![Box::new(DropColumnsStep {
            columns: vec![COMPUTED_POSITION_COLUMN.to_string()],
        })]
    }

    /// Post-validators; they record issues but never mutate.
    pub fn validators() -> Vec<Box<dyn Validate>> {
        vec![Box::new(DepthRangeValidator)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positional_table() -> DataTable {
        let mut table = DataTable::new(vec![
            "parameter".to_string(),
            "sample_latitude_dd".to_string(),
            "sample_longitude_dd".to_string(),
            "water_depth_m".to_string(),
        ]);
        table.push_row(vec!["Secchi depth".into(), "57.1".into(), "11.9".into(), "10".into()]);
        table.push_row(vec!["Chlorophyll-a".into(), "57.2".into(), "12.0".into(), "".into()]);
        table
    }

    #[test]
    fn test_enrich_computed_position() {
        let mut table = positional_table();
        StepSpec::Enrich(EnrichKind::ComputedPosition)
            .resolve()
            .apply(&mut table)
            .unwrap();
        assert_eq!(table.value(0, COMPUTED_POSITION_COLUMN), Some("57.1/11.9"));
    }

    #[test]
    fn test_enrich_computed_position_without_columns_is_noop() {
        let mut table = DataTable::new(vec!["parameter".to_string()]);
        table.push_row(vec!["Chlorophyll-a".into()]);
        StepSpec::Enrich(EnrichKind::ComputedPosition)
            .resolve()
            .apply(&mut table)
            .unwrap();
        assert!(!table.has_column(COMPUTED_POSITION_COLUMN));
    }

    #[test]
    fn test_redact_scoped_by_filter_leaves_empty_rows() {
        let mut table = positional_table();
        StepSpec::Redact {
            columns: vec!["water_depth_m".to_string()],
            replacement: "999".to_string(),
            filter: Some(FilterSpec::NotEmpty {
                column: "water_depth_m".to_string(),
            }),
        }
        .resolve()
        .apply(&mut table)
        .unwrap();
        assert_eq!(table.value(0, "water_depth_m"), Some("999"));
        assert_eq!(table.value(1, "water_depth_m"), Some(""));
    }

    #[test]
    fn test_remove_rows_by_parameter() {
        let mut table = positional_table();
        StepSpec::Remove {
            filter: FilterSpec::Equals {
                column: "parameter".to_string(),
                value: "Secchi depth".to_string(),
            },
        }
        .resolve()
        .apply(&mut table)
        .unwrap();
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn test_replace_exact_values() {
        let mut table = positional_table();
        StepSpec::Replace {
            column: "parameter".to_string(),
            from: "Chlorophyll-a".to_string(),
            to: "Chlorophyll".to_string(),
        }
        .resolve()
        .apply(&mut table)
        .unwrap();
        assert_eq!(table.value(1, "parameter"), Some("Chlorophyll"));
    }

    #[test]
    fn test_localized_names_identity_fallback() {
        let mut table = DataTable::new(vec!["reporting_institute".to_string()]);
        table.push_row(vec!["SMHI".into()]);
        StepSpec::Enrich(EnrichKind::LocalizedNames)
            .resolve()
            .apply(&mut table)
            .unwrap();
        assert_eq!(table.value(0, "reporting_institute_sv"), Some("SMHI"));
    }

    #[test]
    fn test_placeholder_dates_expand_year_only() {
        let mut table = DataTable::new(vec!["sample_date".to_string()]);
        table.push_row(vec!["2019".into()]);
        table.push_row(vec!["2019-06-12".into()]);
        StepSpec::Enrich(EnrichKind::PlaceholderFullDates)
            .resolve()
            .apply(&mut table)
            .unwrap();
        assert_eq!(table.value(0, "sample_date"), Some("2019-01-01"));
        assert_eq!(table.value(1, "sample_date"), Some("2019-06-12"));
    }

    #[test]
    fn test_depth_range_validator_records_without_mutating() {
        let mut table = DataTable::new(vec![
            "sample_min_depth_m".to_string(),
            "sample_max_depth_m".to_string(),
        ]);
        table.push_row(vec!["20".into(), "10".into()]);
        table.push_row(vec!["5".into(), "10".into()]);
        let before = table.clone();
        let issues = DepthRangeValidator.validate(&table);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("row 0"));
        assert_eq!(table.row_count(), before.row_count());
    }

    #[test]
    fn test_registry_orders_enrichment_before_redaction() {
        let registry = StepRegistry::from_policy(&PolicyConfig::default());
        let steps = registry.restricted_steps("zoobenthos");
        assert!(matches!(
            steps[0],
            StepSpec::Enrich(EnrichKind::ComputedPosition)
        ));
        assert!(steps.len() > 1);
    }

    #[test]
    fn test_registry_profile_has_no_row_removal() {
        let registry = StepRegistry::from_policy(&PolicyConfig::default());
        let steps = registry.restricted_steps("profile");
        assert!(!steps.iter().any(|s| matches!(s, StepSpec::Remove { .. })));
    }
}
