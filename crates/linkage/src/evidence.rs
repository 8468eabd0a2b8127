use std::collections::BTreeMap;

use crate::model::{
    MatchPath, MatchResult, MatchSummary, RepositoryRecord, ScoreBins, VerificationResult,
    VerificationStatus, VerificationSummary,
};

impl ScoreBins {
    pub fn add(&mut self, score: f64) {
        match score {
            s if s >= 95.0 => self.top += 1,
            s if s >= 90.0 => self.high += 1,
            s if s >= 80.0 => self.good += 1,
            s if s >= 70.0 => self.fair += 1,
            _ => self.below += 1,
        }
    }
}

/// Compute summary statistics from match results.
///
/// Also reports two repository-side problems: records claimed by several
/// local rows, and records that carry nothing to match on.
pub fn compute_match_summary(rows: &[MatchResult], repository: &[RepositoryRecord]) -> MatchSummary {
    let mut summary = MatchSummary {
        total: rows.len(),
        repository_without_keys: repository.iter().filter(|r| !has_match_key(r)).count(),
        ..MatchSummary::default()
    };
    let mut claims: BTreeMap<&str, usize> = BTreeMap::new();

    for r in rows {
        if r.match_found {
            summary.matched += 1;
            if let Some(id) = r.matched_repository_id.as_deref() {
                *claims.entry(id).or_default() += 1;
            }
            match r.diagnostics.path {
                MatchPath::Exact => summary.exact += 1,
                MatchPath::Fuzzy => summary.fuzzy += 1,
                MatchPath::None => {}
            }
        } else {
            summary.unmatched += 1;
        }
        if r.diagnostics.ambiguous {
            summary.ambiguous += 1;
        }
        if r.local.catalog_number.is_none() {
            summary.missing_catalog_number += 1;
        }
        summary.score_bins.add(r.match_score);
    }

    summary.shared_repository_ids = claims
        .into_iter()
        .filter(|&(_, n)| n > 1)
        .map(|(id, _)| id.to_string())
        .collect();
    summary
}

fn has_match_key(record: &RepositoryRecord) -> bool {
    let usable = |v: &Option<String>| {
        v.as_deref()
            .is_some_and(|s| s.chars().any(char::is_alphanumeric))
    };
    usable(&record.catalog_number) || usable(&record.taxon_name)
}

/// Count verification outcomes. `not_processed` covers rows a cancelled
/// run never reached.
pub fn compute_verification_summary(
    rows: &[VerificationResult],
    not_processed: usize,
) -> VerificationSummary {
    let mut summary = VerificationSummary {
        total: rows.len() + not_processed,
        not_processed,
        ..VerificationSummary::default()
    };

    for r in rows {
        let slot = match r.verification_status {
            VerificationStatus::VerifiedMatch => &mut summary.verified_match,
            VerificationStatus::VerifiedMismatch => &mut summary.verified_mismatch,
            VerificationStatus::ApiValuesUsed => &mut summary.api_values_used,
            VerificationStatus::IncompleteApiData => &mut summary.incomplete_api_data,
            VerificationStatus::InvalidUrl => &mut summary.invalid_url,
            VerificationStatus::Skipped => &mut summary.skipped,
            VerificationStatus::NotApplicable => &mut summary.not_applicable,
        };
        *slot += 1;
    }

    summary
}
