use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::config::VerificationConfig;
use crate::media::{extract_media_id, resolve_media_reference, MediaClient, MediaFailure};
use crate::model::{MatchResult, RepositoryRecord, VerificationOutcome, VerificationStatus};
use crate::spacing::{Millimeters, VoxelSpacing};

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &VerificationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Wait before attempt `failed_attempts + 1`. Doubles per attempt and
    /// honours `Retry-After`, both capped at `max_backoff`.
    pub fn delay_after(&self, failed_attempts: u32, failure: &MediaFailure) -> Duration {
        if let MediaFailure::RateLimited { retry_after_secs: Some(secs) } = failure {
            return Duration::from_secs(*secs).min(self.max_backoff);
        }
        let factor = 2u32.saturating_pow(failed_attempts.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Lookup result plus how many attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub result: Result<VoxelSpacing, MediaFailure>,
    pub attempts: u32,
}

/// Call the client until it succeeds, fails permanently, or attempts run out.
pub fn fetch_with_retry<C: MediaClient + ?Sized>(
    client: &C,
    media_id: &str,
    policy: &RetryPolicy,
) -> FetchOutcome {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match client.fetch_voxel_spacing(media_id) {
            Ok(spacing) => {
                return FetchOutcome {
                    result: Ok(spacing),
                    attempts: attempt,
                }
            }
            Err(failure) if failure.is_transient() && attempt < policy.max_attempts => {
                let wait = policy.delay_after(attempt, &failure);
                debug!(
                    "media {media_id}: attempt {attempt}/{} failed ({failure}), retrying in {}ms",
                    policy.max_attempts,
                    wait.as_millis()
                );
                thread::sleep(wait);
            }
            Err(failure) => {
                return FetchOutcome {
                    result: Err(failure),
                    attempts: attempt,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Compare local against repository spacing.
///
/// Returns the status and the triple to write into the output row.
pub fn compare_spacing(
    local: &VoxelSpacing,
    repository: &VoxelSpacing,
    tolerance: Millimeters,
) -> (VerificationStatus, VoxelSpacing) {
    if !repository.is_complete() {
        return (VerificationStatus::IncompleteApiData, *local);
    }
    // A filled-in cell that is not a measurement disagrees with any value.
    if local.has_invalid() {
        return (VerificationStatus::VerifiedMismatch, *local);
    }

    let disagrees = local
        .components()
        .iter()
        .zip(repository.components())
        .any(|(l, r)| match (l, r) {
            (Some(l), Some(r)) => !l.within(r, tolerance),
            _ => false,
        });

    if disagrees {
        (VerificationStatus::VerifiedMismatch, *local)
    } else if local.is_complete() {
        (VerificationStatus::VerifiedMatch, *local)
    } else {
        (VerificationStatus::ApiValuesUsed, local.fill_from(repository))
    }
}

// ---------------------------------------------------------------------------
// Per-row verifier
// ---------------------------------------------------------------------------

/// Verifies matched rows against a media client.
pub struct Verifier<'a, C: MediaClient + ?Sized> {
    client: &'a C,
    policy: RetryPolicy,
    tolerance: Millimeters,
}

impl<'a, C: MediaClient + ?Sized> Verifier<'a, C> {
    pub fn new(client: &'a C, config: &VerificationConfig) -> Self {
        Self {
            client,
            policy: RetryPolicy::from_config(config),
            tolerance: config.tolerance(),
        }
    }

    /// Run one row through the verification state machine.
    ///
    /// `repository` is the matched record when known. Without it the media
    /// id is taken from the row's matched URL.
    pub fn verify_row(
        &self,
        row: &MatchResult,
        repository: Option<&RepositoryRecord>,
    ) -> VerificationOutcome {
        let local = row.local.voxel;
        let terminal = |status, media_id, attempts, failure| VerificationOutcome {
            status,
            media_id,
            repository_voxel: None,
            resolved_voxel: local,
            attempts,
            failure,
        };

        if !row.match_found {
            return terminal(VerificationStatus::NotApplicable, None, 0, None);
        }

        let media_id = match repository {
            Some(record) => resolve_media_reference(record),
            None => row
                .matched_repository_url
                .as_deref()
                .and_then(extract_media_id),
        };
        let Some(media_id) = media_id else {
            warn!("row {}: no resolvable media reference", row.local.row_index);
            return terminal(VerificationStatus::InvalidUrl, None, 0, None);
        };

        let fetched = fetch_with_retry(self.client, &media_id, &self.policy);
        let remote = match fetched.result {
            Ok(remote) => remote,
            Err(failure) => {
                warn!(
                    "row {}: media {media_id} lookup failed after {} attempt(s): {failure}",
                    row.local.row_index, fetched.attempts
                );
                return terminal(
                    VerificationStatus::Skipped,
                    Some(media_id),
                    fetched.attempts,
                    Some(failure.to_string()),
                );
            }
        };

        let (status, resolved) = compare_spacing(&local, &remote, self.tolerance);
        debug!("row {}: media {media_id} -> {status}", row.local.row_index);
        VerificationOutcome {
            status,
            media_id: Some(media_id),
            repository_voxel: Some(remote),
            resolved_voxel: resolved,
            attempts: fetched.attempts,
            failure: None,
        }
    }
}
