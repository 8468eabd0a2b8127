use std::collections::HashMap;

use log::{debug, warn};

use crate::config::MatchingConfig;
use crate::model::{
    LocalRecord, MatchCandidate, MatchDiagnostics, MatchPath, RepositoryRecord, TieBreak,
    TiedCandidate,
};
use crate::normalize::{KeyCache, RecordKeys};

/// Edit-distance ratio scaled to 0-100.
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b) * 100.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Result of scoring all candidates for one local record.
#[derive(Debug)]
pub struct Scored<'a> {
    pub path: MatchPath,
    pub candidates: Vec<MatchCandidate<'a>>,
}

/// The selected best candidate (if any) and how it was chosen.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Repository index of the best candidate, matched or not.
    pub best: Option<usize>,
    pub best_score: f64,
    pub match_found: bool,
    pub diagnostics: MatchDiagnostics,
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Scores local records against a fixed repository set.
///
/// Holds the exact-match index over repository canonical ids, built once.
pub struct Matcher<'a> {
    repository: &'a [RepositoryRecord],
    cache: &'a KeyCache,
    exact_index: HashMap<&'a str, Vec<usize>>,
    config: &'a MatchingConfig,
}

impl<'a> Matcher<'a> {
    pub fn new(
        repository: &'a [RepositoryRecord],
        cache: &'a KeyCache,
        config: &'a MatchingConfig,
    ) -> Self {
        let mut exact_index: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, keys) in cache.repository_keys().iter().enumerate() {
            if let Some(id) = keys.canonical_id.as_deref() {
                exact_index.entry(id).or_default().push(i);
            }
        }
        Self {
            repository,
            cache,
            exact_index,
            config,
        }
    }

    /// Score every plausible repository record for `local`.
    ///
    /// An exact canonical-id hit short-circuits fuzzy scoring: all exact hits
    /// score 100. Otherwise every repository record gets a weighted score.
    pub fn score_candidates(&self, local: &'a LocalRecord, keys: &RecordKeys) -> Scored<'a> {
        if self.repository.is_empty() {
            return Scored {
                path: MatchPath::None,
                candidates: Vec::new(),
            };
        }

        if let Some(hits) = keys
            .canonical_id
            .as_deref()
            .and_then(|id| self.exact_index.get(id))
        {
            let candidates = hits
                .iter()
                .map(|&i| MatchCandidate {
                    local,
                    repository: &self.repository[i],
                    repository_index: i,
                    score: 100.0,
                    exact_taxon: taxa_equal(keys, self.cache.repository(i)),
                })
                .collect();
            return Scored {
                path: MatchPath::Exact,
                candidates,
            };
        }

        let candidates = self
            .repository
            .iter()
            .enumerate()
            .map(|(i, repo)| {
                let repo_keys = self.cache.repository(i);
                MatchCandidate {
                    local,
                    repository: repo,
                    repository_index: i,
                    score: fuzzy_score(keys, repo_keys, self.config),
                    exact_taxon: taxa_equal(keys, repo_keys),
                }
            })
            .collect();
        Scored {
            path: MatchPath::Fuzzy,
            candidates,
        }
    }
}

fn taxa_equal(a: &RecordKeys, b: &RecordKeys) -> bool {
    matches!((&a.taxon, &b.taxon), (Some(x), Some(y)) if x == y)
}

/// Weighted catalog/taxon similarity. A term missing on either side
/// contributes nothing.
pub fn fuzzy_score(local: &RecordKeys, repo: &RecordKeys, config: &MatchingConfig) -> f64 {
    let term = |a: &Option<String>, b: &Option<String>| match (a, b) {
        (Some(a), Some(b)) => similarity(a, b),
        _ => 0.0,
    };
    let catalog = term(&local.canonical_id, &repo.canonical_id);
    let taxon = term(&local.taxon, &repo.taxon);
    round2(config.catalog_weight * catalog + config.taxon_weight * taxon).clamp(0.0, 100.0)
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Pick the highest-scoring candidate.
///
/// Ties on the top score prefer an exact taxon match, then the earliest
/// repository record. Every tied candidate is kept in the diagnostics.
pub fn select_best(scored: &Scored<'_>, threshold: f64) -> Selection {
    let mut diagnostics = MatchDiagnostics {
        path: scored.path,
        candidates_scored: scored.candidates.len(),
        ..MatchDiagnostics::empty()
    };

    let top = scored
        .candidates
        .iter()
        .map(|c| c.score)
        .fold(f64::NEG_INFINITY, f64::max);
    let mut tied: Vec<&MatchCandidate<'_>> =
        scored.candidates.iter().filter(|c| c.score == top).collect();
    tied.sort_by_key(|c| c.repository_index);

    let Some(first) = tied.first().copied() else {
        return Selection {
            best: None,
            best_score: 0.0,
            match_found: false,
            diagnostics,
        };
    };

    let winner = if tied.len() > 1 {
        let with_taxon: Vec<_> = tied.iter().filter(|c| c.exact_taxon).collect();
        let (winner, rule) = if !with_taxon.is_empty() && with_taxon.len() < tied.len() {
            (*with_taxon[0], TieBreak::ExactTaxon)
        } else {
            (first, TieBreak::InputOrder)
        };
        diagnostics.ambiguous = true;
        diagnostics.tie_break = Some(rule);
        diagnostics.tied = tied
            .iter()
            .map(|c| TiedCandidate {
                repository_id: c.repository.repository_id.clone(),
                score: c.score,
            })
            .collect();
        winner
    } else {
        first
    };

    diagnostics.best_repository_id = Some(winner.repository.repository_id.clone());
    Selection {
        best: Some(winner.repository_index),
        best_score: winner.score,
        match_found: winner.score >= threshold,
        diagnostics,
    }
}

/// Score and select for every local record, in input order.
pub fn match_records(
    local: &[LocalRecord],
    repository: &[RepositoryRecord],
    cache: &KeyCache,
    config: &MatchingConfig,
) -> Vec<Selection> {
    let matcher = Matcher::new(repository, cache, config);
    local
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let keys = cache.local(i);
            if keys.canonical_id.is_none() {
                warn!(
                    "row {}: missing catalog number, scoring on taxon only",
                    record.row_index
                );
            }
            let scored = matcher.score_candidates(record, keys);
            let selection = select_best(&scored, config.threshold);
            if selection.diagnostics.ambiguous {
                warn!(
                    "row {}: {} candidates tied at {:.2}, resolved by {:?}",
                    record.row_index,
                    selection.diagnostics.tied.len(),
                    selection.best_score,
                    selection.diagnostics.tie_break
                );
            }
            debug!(
                "row {}: path={:?} scored={} best={:?} score={:.2} matched={}",
                record.row_index,
                selection.diagnostics.path,
                selection.diagnostics.candidates_scored,
                selection.diagnostics.best_repository_id,
                selection.best_score,
                selection.match_found
            );
            selection
        })
        .collect()
}
