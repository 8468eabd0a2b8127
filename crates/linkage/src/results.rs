//! Match and verification result builders.
//!
//! Pure transforms: rows come out in the order they went in, one output
//! row per input row.

use crate::matcher::Selection;
use crate::model::{
    LocalRecord, MatchResult, RepositoryRecord, VerificationOutcome, VerificationResult,
    VerificationStatus,
};

/// Pair each local record with its selection.
pub fn build_match_results(
    local: &[LocalRecord],
    repository: &[RepositoryRecord],
    selections: Vec<Selection>,
) -> Vec<MatchResult> {
    local
        .iter()
        .zip(selections)
        .map(|(record, selection)| {
            let matched = selection
                .best
                .filter(|_| selection.match_found)
                .and_then(|i| repository.get(i));
            MatchResult {
                local: record.clone(),
                match_found: matched.is_some(),
                matched_repository_url: matched.and_then(|r| r.canonical_url.clone()),
                matched_repository_id: matched.map(|r| r.repository_id.clone()),
                match_score: selection.best_score,
                diagnostics: selection.diagnostics,
            }
        })
        .collect()
}

/// Merge a verifier outcome into its match row.
///
/// Unmatched rows always come out `not-applicable`. For `api-values-used`
/// blank local spacing cells are filled with the resolved values; cells
/// that already hold text are left verbatim.
pub fn merge_verification(
    mut row: MatchResult,
    outcome: Option<VerificationOutcome>,
) -> VerificationResult {
    let outcome = match outcome {
        Some(o) if row.match_found => o,
        _ => {
            let voxel = row.local.voxel;
            return VerificationResult {
                matched: row,
                verification_status: VerificationStatus::NotApplicable,
                media_id: None,
                repository_voxel: None,
                resolved_voxel: voxel,
                attempts: 0,
                failure: None,
            };
        }
    };

    if outcome.status == VerificationStatus::ApiValuesUsed {
        let local = &mut row.local;
        for (column, value) in local.voxel_columns.iter().zip(outcome.resolved_voxel.components()) {
            let Some((column, value)) = column.as_deref().zip(value) else {
                continue;
            };
            if local.fields.get(column).is_some_and(|cell| cell.trim().is_empty()) {
                local.fields.replace(column, value.to_string());
            }
        }
        local.voxel = outcome.resolved_voxel;
    }

    VerificationResult {
        matched: row,
        verification_status: outcome.status,
        media_id: outcome.media_id,
        repository_voxel: outcome.repository_voxel,
        resolved_voxel: outcome.resolved_voxel,
        attempts: outcome.attempts,
        failure: outcome.failure,
    }
}
