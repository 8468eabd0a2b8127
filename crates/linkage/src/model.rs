use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::spacing::VoxelSpacing;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Passthrough columns of a local row, kept verbatim and in header order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields(Vec<(String, String)>);

impl Fields {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }

    pub fn get(&self, header: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v.as_str())
    }

    /// Overwrite an existing column. Returns false if the column is absent.
    pub fn replace(&mut self, header: &str, value: String) -> bool {
        match self.0.iter_mut().find(|(h, _)| h == header) {
            Some((_, v)) => {
                *v = value;
                true
            }
            None => false,
        }
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(h, _)| h.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Fields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (h, v) in &self.0 {
            map.serialize_entry(h, v)?;
        }
        map.end()
    }
}

/// One row of the locally maintained specimen table.
#[derive(Debug, Clone, Serialize)]
pub struct LocalRecord {
    /// Zero-based position in the input; output order follows it.
    pub row_index: usize,
    pub catalog_number: Option<String>,
    pub taxon_name: Option<String>,
    pub voxel: VoxelSpacing,
    /// Headers the x/y/z spacing values were read from, if any.
    #[serde(skip)]
    pub voxel_columns: [Option<String>; 3],
    pub fields: Fields,
}

impl LocalRecord {
    /// Bare record without passthrough columns.
    pub fn new(row_index: usize, catalog_number: &str, taxon_name: Option<&str>) -> Self {
        Self {
            row_index,
            catalog_number: non_blank(catalog_number),
            taxon_name: taxon_name.and_then(non_blank),
            voxel: VoxelSpacing::default(),
            voxel_columns: [None, None, None],
            fields: Fields::default(),
        }
    }

    pub fn with_voxel(mut self, voxel: VoxelSpacing) -> Self {
        self.voxel = voxel;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaRef {
    pub id: Option<String>,
    pub url: Option<String>,
}

/// A record from the canonical specimen repository.
#[derive(Debug, Clone, Serialize)]
pub struct RepositoryRecord {
    pub repository_id: String,
    pub catalog_number: Option<String>,
    pub taxon_name: Option<String>,
    pub canonical_url: Option<String>,
    pub media: Vec<MediaRef>,
}

impl RepositoryRecord {
    pub fn new(repository_id: &str, catalog_number: &str, taxon_name: Option<&str>) -> Self {
        Self {
            repository_id: repository_id.into(),
            catalog_number: non_blank(catalog_number),
            taxon_name: taxon_name.and_then(non_blank),
            canonical_url: None,
            media: Vec::new(),
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.canonical_url = non_blank(url);
        self
    }

    pub fn with_media(mut self, id: Option<&str>, url: Option<&str>) -> Self {
        self.media.push(MediaRef {
            id: id.and_then(non_blank),
            url: url.and_then(non_blank),
        });
        self
    }
}

pub(crate) fn non_blank(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// A scored (local, repository) pairing. Many per local record; only the
/// winner survives selection.
#[derive(Debug, Clone)]
pub struct MatchCandidate<'a> {
    pub local: &'a LocalRecord,
    pub repository: &'a RepositoryRecord,
    /// Position of `repository` in the input set, used for stable ordering.
    pub repository_index: usize,
    pub score: f64,
    pub exact_taxon: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPath {
    Exact,
    Fuzzy,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    ExactTaxon,
    InputOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TiedCandidate {
    pub repository_id: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchDiagnostics {
    pub path: MatchPath,
    pub candidates_scored: usize,
    /// Best candidate even when it fell below the threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_repository_id: Option<String>,
    /// Every candidate sharing the top score, winner included.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tied: Vec<TiedCandidate>,
    pub ambiguous: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tie_break: Option<TieBreak>,
}

impl MatchDiagnostics {
    pub fn empty() -> Self {
        Self {
            path: MatchPath::None,
            candidates_scored: 0,
            best_repository_id: None,
            tied: Vec::new(),
            ambiguous: false,
            tie_break: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub local: LocalRecord,
    pub match_found: bool,
    pub matched_repository_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_repository_id: Option<String>,
    /// 0-100, two decimals. Retained for unmatched rows.
    pub match_score: f64,
    pub diagnostics: MatchDiagnostics,
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationStatus {
    VerifiedMatch,
    VerifiedMismatch,
    ApiValuesUsed,
    IncompleteApiData,
    InvalidUrl,
    Skipped,
    NotApplicable,
}

impl VerificationStatus {
    pub const ALL: [VerificationStatus; 7] = [
        Self::VerifiedMatch,
        Self::VerifiedMismatch,
        Self::ApiValuesUsed,
        Self::IncompleteApiData,
        Self::InvalidUrl,
        Self::Skipped,
        Self::NotApplicable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VerifiedMatch => "verified-match",
            Self::VerifiedMismatch => "verified-mismatch",
            Self::ApiValuesUsed => "api-values-used",
            Self::IncompleteApiData => "incomplete-api-data",
            Self::InvalidUrl => "invalid-url",
            Self::Skipped => "skipped",
            Self::NotApplicable => "not-applicable",
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of verifying one matched row, before merging.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationOutcome {
    pub status: VerificationStatus,
    pub media_id: Option<String>,
    pub repository_voxel: Option<VoxelSpacing>,
    /// Values written to the output row.
    pub resolved_voxel: VoxelSpacing,
    pub attempts: u32,
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    #[serde(flatten)]
    pub matched: MatchResult,
    pub verification_status: VerificationStatus,
    pub media_id: Option<String>,
    pub repository_voxel: Option<VoxelSpacing>,
    pub resolved_voxel: VoxelSpacing,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScoreBins {
    #[serde(rename = "95-100")]
    pub top: usize,
    #[serde(rename = "90-94")]
    pub high: usize,
    #[serde(rename = "80-89")]
    pub good: usize,
    #[serde(rename = "70-79")]
    pub fair: usize,
    #[serde(rename = "below-70")]
    pub below: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchSummary {
    pub total: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub exact: usize,
    pub fuzzy: usize,
    pub ambiguous: usize,
    pub missing_catalog_number: usize,
    pub score_bins: ScoreBins,
    /// Repository ids linked from more than one local row, sorted.
    pub shared_repository_ids: Vec<String>,
    /// Repository records with neither a catalog number nor a taxon.
    pub repository_without_keys: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationSummary {
    pub total: usize,
    pub verified_match: usize,
    pub verified_mismatch: usize,
    pub api_values_used: usize,
    pub incomplete_api_data: usize,
    pub invalid_url: usize,
    pub skipped: usize,
    pub not_applicable: usize,
    pub not_processed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchRun {
    pub meta: RunMeta,
    pub summary: MatchSummary,
    pub rows: Vec<MatchResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationRun {
    pub meta: RunMeta,
    pub summary: VerificationSummary,
    pub cancelled: bool,
    pub rows: Vec<VerificationResult>,
}
