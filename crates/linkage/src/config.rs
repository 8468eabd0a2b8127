use serde::Deserialize;

use crate::error::LinkageError;
use crate::spacing::Millimeters;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Explicit configuration passed into every stage of a run.
///
/// Every field has a default, so an empty TOML document is a valid config.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkageConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub columns: ColumnConfig,
}

fn default_name() -> String {
    "specimen-linkage".into()
}

impl Default for LinkageConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            matching: MatchingConfig::default(),
            verification: VerificationConfig::default(),
            columns: ColumnConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchingConfig {
    /// Minimum score (0-100) for a best candidate to count as a match.
    pub threshold: f64,
    pub catalog_weight: f64,
    pub taxon_weight: f64,
    /// Institutional prefixes removed from catalog numbers, e.g. `"ypm"`.
    pub strip_prefixes: Vec<String>,
    /// File extensions (leading `.`) and part suffixes removed from catalog numbers.
    pub strip_suffixes: Vec<String>,
    /// Characters collapsed into a single `-` delimiter.
    pub separators: String,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: 70.0,
            catalog_weight: 0.7,
            taxon_weight: 0.3,
            strip_prefixes: Vec::new(),
            strip_suffixes: [".pca", "head", "body", "skull", "skeleton"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            separators: " -_:".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerificationConfig {
    /// Absolute per-component tolerance in millimetres.
    pub tolerance_mm: f64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_secs: u64,
    pub workers: usize,
    pub api_base: String,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            tolerance_mm: 0.0001,
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            timeout_secs: 30,
            workers: 1,
            api_base: "https://www.morphosource.org/api".into(),
        }
    }
}

impl VerificationConfig {
    /// Tolerance as an exact fixed-point value.
    pub fn tolerance(&self) -> Millimeters {
        Millimeters::from_f64(self.tolerance_mm).unwrap_or(Millimeters::ZERO)
    }
}

// ---------------------------------------------------------------------------
// Column aliases
// ---------------------------------------------------------------------------

/// Header aliases tried in order when locating fields in the local table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColumnConfig {
    pub catalog_number: Vec<String>,
    pub taxon_name: Vec<String>,
    pub voxel_x: Vec<String>,
    pub voxel_y: Vec<String>,
    pub voxel_z: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn voxel_aliases(axis: &str) -> Vec<String> {
    vec![
        format!("{axis}_voxel_spacing_mm"),
        format!("voxel_spacing_{axis}_mm"),
        format!("voxel_{axis}_spacing"),
        format!("{axis}_spacing"),
        format!("{axis}_pixel_spacing"),
        format!("pixel_spacing_{axis}"),
    ]
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            catalog_number: strings(&["catalog_number", "catalog number", "catalognumber"]),
            taxon_name: strings(&["taxon_name", "taxonomy", "species", "taxon"]),
            voxel_x: voxel_aliases("x"),
            voxel_y: voxel_aliases("y"),
            voxel_z: voxel_aliases("z"),
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl LinkageConfig {
    pub fn from_toml(input: &str) -> Result<Self, LinkageError> {
        let config: LinkageConfig =
            toml::from_str(input).map_err(|e| LinkageError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LinkageError> {
        let m = &self.matching;
        if !m.threshold.is_finite() || !(0.0..=100.0).contains(&m.threshold) {
            return Err(invalid(format!(
                "threshold must be within 0..=100, got {}",
                m.threshold
            )));
        }
        for (label, w) in [("catalog_weight", m.catalog_weight), ("taxon_weight", m.taxon_weight)] {
            if !w.is_finite() || w < 0.0 {
                return Err(invalid(format!("{label} must be a non-negative number, got {w}")));
            }
        }
        let sum = m.catalog_weight + m.taxon_weight;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(invalid(format!("weights must sum to 1, got {sum}")));
        }
        if m.separators.is_empty() {
            return Err(invalid("separators must not be empty".into()));
        }

        let v = &self.verification;
        if !v.tolerance_mm.is_finite() || v.tolerance_mm < 0.0 {
            return Err(invalid(format!(
                "tolerance_mm must be a non-negative number, got {}",
                v.tolerance_mm
            )));
        }
        if Millimeters::from_f64(v.tolerance_mm).is_none() {
            return Err(invalid(format!("tolerance_mm out of range: {}", v.tolerance_mm)));
        }
        if !(1..=10).contains(&v.max_attempts) {
            return Err(invalid(format!(
                "max_attempts must be within 1..=10, got {}",
                v.max_attempts
            )));
        }
        if !(1..=64).contains(&v.workers) {
            return Err(invalid(format!("workers must be within 1..=64, got {}", v.workers)));
        }
        if !(1..=300).contains(&v.timeout_secs) {
            return Err(invalid(format!(
                "timeout_secs must be within 1..=300, got {}",
                v.timeout_secs
            )));
        }
        if v.initial_backoff_ms > v.max_backoff_ms {
            return Err(invalid(format!(
                "initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                v.initial_backoff_ms, v.max_backoff_ms
            )));
        }

        if self.columns.catalog_number.is_empty() {
            return Err(invalid("columns.catalog_number needs at least one alias".into()));
        }

        Ok(())
    }
}

fn invalid(msg: String) -> LinkageError {
    LinkageError::ConfigValidation(msg)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
