use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use log::info;

use crate::config::LinkageConfig;
use crate::error::LinkageError;
use crate::evidence::{compute_match_summary, compute_verification_summary};
use crate::matcher::match_records;
use crate::media::MediaClient;
use crate::model::{
    LocalRecord, MatchResult, MatchRun, RepositoryRecord, RunMeta, VerificationOutcome,
    VerificationRun,
};
use crate::normalize::KeyCache;
use crate::results::{build_match_results, merge_verification};
use crate::verify::Verifier;

const PROGRESS_EVERY: usize = 100;

/// Cooperative cancellation, checked between rows.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl RunMeta {
    pub fn now(config: &LinkageConfig) -> Self {
        Self {
            config_name: config.name.clone(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Link every local record to at most one repository record.
pub fn run_matching(
    config: &LinkageConfig,
    local: &[LocalRecord],
    repository: &[RepositoryRecord],
) -> Result<MatchRun, LinkageError> {
    config.validate()?;
    info!(
        "matching {} local rows against {} repository records",
        local.len(),
        repository.len()
    );

    let cache = KeyCache::build(local, repository, &config.matching);
    let selections = match_records(local, repository, &cache, &config.matching);
    let rows = build_match_results(local, repository, selections);
    let summary = compute_match_summary(&rows, repository);

    info!(
        "matched {}/{} rows ({} exact, {} fuzzy, {} ambiguous)",
        summary.matched, summary.total, summary.exact, summary.fuzzy, summary.ambiguous
    );

    Ok(MatchRun {
        meta: RunMeta::now(config),
        summary,
        rows,
    })
}

/// Lookup from a match row back to its repository record.
struct RepositoryIndex<'a> {
    by_id: HashMap<&'a str, &'a RepositoryRecord>,
    by_url: HashMap<&'a str, &'a RepositoryRecord>,
}

impl<'a> RepositoryIndex<'a> {
    fn new(repository: &'a [RepositoryRecord]) -> Self {
        let mut by_id = HashMap::new();
        let mut by_url = HashMap::new();
        for r in repository {
            by_id.entry(r.repository_id.as_str()).or_insert(r);
            if let Some(url) = r.canonical_url.as_deref() {
                by_url.entry(url).or_insert(r);
            }
        }
        Self { by_id, by_url }
    }

    fn find(&self, row: &MatchResult) -> Option<&'a RepositoryRecord> {
        row.matched_repository_id
            .as_deref()
            .and_then(|id| self.by_id.get(id))
            .or_else(|| {
                row.matched_repository_url
                    .as_deref()
                    .and_then(|url| self.by_url.get(url))
            })
            .copied()
    }
}

/// Verify matched rows against the repository media client.
///
/// Rows are handed to up to `workers` scoped threads; output keeps input
/// order. A row's failure is encoded in its status and never stops the
/// batch. On cancellation, rows already finished are returned in input
/// order and the rest are counted as `not_processed`.
pub fn run_verification<C: MediaClient + ?Sized>(
    config: &LinkageConfig,
    rows: Vec<MatchResult>,
    repository: &[RepositoryRecord],
    client: &C,
    cancel: &CancelToken,
) -> Result<VerificationRun, LinkageError> {
    config.validate()?;
    let total = rows.len();
    let pending = rows.iter().filter(|r| r.match_found).count();
    info!("verifying {pending} matched rows of {total}");

    let index = RepositoryIndex::new(repository);
    let verifier = Verifier::new(client, &config.verification);
    let outcomes: Mutex<Vec<Option<VerificationOutcome>>> = Mutex::new(vec![None; total]);
    let next = AtomicUsize::new(0);
    let done = AtomicUsize::new(0);
    let workers = config.verification.workers.clamp(1, total.max(1));

    thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| loop {
                if cancel.is_cancelled() {
                    break;
                }
                let i = next.fetch_add(1, Ordering::SeqCst);
                let Some(row) = rows.get(i) else {
                    break;
                };
                let outcome = verifier.verify_row(row, index.find(row));
                if let Ok(mut slots) = outcomes.lock() {
                    slots[i] = Some(outcome);
                }
                let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                if finished % PROGRESS_EVERY == 0 {
                    info!("verified {finished}/{total} rows");
                }
            });
        }
    });

    let outcomes = outcomes
        .into_inner()
        .map_err(|_| LinkageError::Io("verification worker panicked".into()))?;

    let mut results = Vec::with_capacity(total);
    let mut not_processed = 0;
    for (row, outcome) in rows.into_iter().zip(outcomes) {
        match outcome {
            Some(outcome) => results.push(merge_verification(row, Some(outcome))),
            None => not_processed += 1,
        }
    }

    let cancelled = not_processed > 0;
    let summary = compute_verification_summary(&results, not_processed);
    if cancelled {
        info!("verification cancelled: {} rows not processed", not_processed);
    }
    info!(
        "verification: {} match, {} mismatch, {} api-values-used, {} skipped",
        summary.verified_match, summary.verified_mismatch, summary.api_values_used, summary.skipped
    );

    Ok(VerificationRun {
        meta: RunMeta::now(config),
        summary,
        cancelled,
        rows: results,
    })
}

/// Match then verify in one pass.
pub fn run<C: MediaClient + ?Sized>(
    config: &LinkageConfig,
    local: &[LocalRecord],
    repository: &[RepositoryRecord],
    client: &C,
    cancel: &CancelToken,
) -> Result<(MatchRun, VerificationRun), LinkageError> {
    let matched = run_matching(config, local, repository)?;
    let verified = run_verification(config, matched.rows.clone(), repository, client, cancel)?;
    Ok((matched, verified))
}
