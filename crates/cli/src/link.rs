//! `speclink match | verify | run | validate`.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;
use speclink_linkage::config::LinkageConfig;
use speclink_linkage::model::{MatchSummary, VerificationSummary};
use speclink_linkage::table::{
    load_local_csv, load_match_table, load_repository_json, write_file, write_match_table,
    write_verification_table,
};
use speclink_linkage::{run, run_matching, run_verification, CancelToken, VerificationRun};
use speclink_media_client::{load_credentials, resolve_api_key, HttpMediaClient, KeySource};

use crate::exit_codes::{EXIT_ERROR, EXIT_VERIFY_MISMATCH};
use crate::CliError;

pub const MATCHED_FILE: &str = "matched.csv";
pub const VERIFIED_FILE: &str = "verified.csv";

// ── Shared ──────────────────────────────────────────────────────────

/// Config from `path`, or the built-in defaults when none is given.
fn load_config(path: Option<&Path>) -> Result<LinkageConfig, CliError> {
    let Some(path) = path else {
        return Ok(LinkageConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| CliError::io(format!("cannot read config {}: {e}", path.display())))?;
    Ok(LinkageConfig::from_toml(&text)?)
}

/// Saved credentials may carry their own API base; it applies only when
/// the saved key is the one in use.
fn media_client(api_key: Option<String>, config: &LinkageConfig) -> HttpMediaClient {
    let mut verification = config.verification.clone();
    let key = match resolve_api_key(api_key) {
        Some((key, source)) => {
            info!("using media API key from {source}");
            if source == KeySource::Saved {
                if let Some(base) = load_credentials().and_then(|c| c.api_base) {
                    verification.api_base = base;
                }
            }
            Some(key)
        }
        None => {
            info!("no media API key, requests are anonymous");
            None
        }
    };
    HttpMediaClient::new(key, &verification)
}

/// Print JSON to stdout and/or write it to `output`.
fn emit_json<T: Serialize>(value: &T, json: bool, output: Option<&Path>) -> Result<(), CliError> {
    if !json && output.is_none() {
        return Ok(());
    }
    let json_str = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::new(EXIT_ERROR, format!("JSON serialization error: {e}")))?;

    if let Some(path) = output {
        std::fs::write(path, &json_str)
            .map_err(|e| CliError::io(format!("cannot write {}: {e}", path.display())))?;
        eprintln!("wrote {}", path.display());
    }
    if json {
        println!("{json_str}");
    }
    Ok(())
}

fn print_match_summary(s: &MatchSummary) {
    eprintln!(
        "matched {}/{} rows ({} exact, {} fuzzy), {} unmatched, {} ambiguous, {} missing catalog number",
        s.matched, s.total, s.exact, s.fuzzy, s.unmatched, s.ambiguous, s.missing_catalog_number
    );
    let b = &s.score_bins;
    eprintln!(
        "  scores: 95-100: {}  90-94: {}  80-89: {}  70-79: {}  below-70: {}",
        b.top, b.high, b.good, b.fair, b.below
    );
    if !s.shared_repository_ids.is_empty() {
        eprintln!(
            "  repository records matched by more than one row: {}",
            s.shared_repository_ids.join(", ")
        );
    }
    if s.repository_without_keys > 0 {
        eprintln!(
            "  {} repository record(s) without catalog number or taxon",
            s.repository_without_keys
        );
    }
}

fn print_verification_summary(run: &VerificationRun) {
    let s: &VerificationSummary = &run.summary;
    eprintln!(
        "verified {} rows: {} match, {} mismatch, {} api-values-used, {} incomplete-api-data",
        s.total, s.verified_match, s.verified_mismatch, s.api_values_used, s.incomplete_api_data
    );
    eprintln!(
        "  {} invalid-url, {} skipped, {} not-applicable",
        s.invalid_url, s.skipped, s.not_applicable
    );
    if run.cancelled {
        eprintln!("  cancelled: {} rows not processed", s.not_processed);
    }
}

/// Mismatches are a result, not a failure: outputs are already written.
fn mismatch_exit(summary: &VerificationSummary) -> Result<(), CliError> {
    if summary.verified_mismatch == 0 {
        return Ok(());
    }
    Err(CliError::new(
        EXIT_VERIFY_MISMATCH,
        format!(
            "{} row(s) with voxel spacing outside tolerance",
            summary.verified_mismatch
        ),
    ))
}

// ── match ───────────────────────────────────────────────────────────

pub fn cmd_match(
    local: PathBuf,
    repository: PathBuf,
    config: Option<PathBuf>,
    out: Option<PathBuf>,
    json: bool,
    output: Option<PathBuf>,
) -> Result<(), CliError> {
    let config = load_config(config.as_deref())?;
    let table = load_local_csv(&local, &config.columns)?;
    let repo = load_repository_json(&repository)?;

    let result = run_matching(&config, &table.records, &repo)?;
    emit_json(&result, json, output.as_deref())?;

    match out {
        Some(path) => {
            write_file(&path, |w| write_match_table(w, &table.headers, &result.rows))?;
            eprintln!("wrote {}", path.display());
        }
        None if !json => write_match_table(io::stdout().lock(), &table.headers, &result.rows)?,
        None => {}
    }

    print_match_summary(&result.summary);
    Ok(())
}

// ── verify ──────────────────────────────────────────────────────────

/// Batch of match table rows to verify. `start` counts data rows from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowWindow {
    pub start: usize,
    pub limit: Option<usize>,
}

impl RowWindow {
    fn apply<T>(self, rows: Vec<T>) -> Result<Vec<T>, CliError> {
        if self.start == 0 {
            return Err(CliError::args("--start counts rows from 1"));
        }
        let total = rows.len();
        let rows: Vec<T> = rows
            .into_iter()
            .skip(self.start - 1)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect();
        if rows.len() < total {
            info!(
                "verifying {} of {total} rows starting at row {}",
                rows.len(),
                self.start
            );
        }
        Ok(rows)
    }
}

#[allow(clippy::too_many_arguments)]
pub fn cmd_verify(
    matched: PathBuf,
    repository: Option<PathBuf>,
    config: Option<PathBuf>,
    api_key: Option<String>,
    window: RowWindow,
    out: Option<PathBuf>,
    json: bool,
    output: Option<PathBuf>,
) -> Result<(), CliError> {
    let config = load_config(config.as_deref())?;
    let table = load_match_table(&matched, &config.columns)?;
    let rows = window.apply(table.rows)?;
    let repo = match repository {
        Some(path) => load_repository_json(&path)?,
        None => Vec::new(),
    };

    let client = media_client(api_key, &config);
    let result = run_verification(&config, rows, &repo, &client, &CancelToken::new())?;
    emit_json(&result, json, output.as_deref())?;

    match out {
        Some(path) => {
            write_file(&path, |w| write_verification_table(w, &table.headers, &result.rows))?;
            eprintln!("wrote {}", path.display());
        }
        None if !json => {
            write_verification_table(io::stdout().lock(), &table.headers, &result.rows)?
        }
        None => {}
    }

    print_verification_summary(&result);
    mismatch_exit(&result.summary)
}

// ── run ─────────────────────────────────────────────────────────────

pub fn cmd_run(
    local: PathBuf,
    repository: PathBuf,
    config: Option<PathBuf>,
    api_key: Option<String>,
    out_dir: PathBuf,
    no_verify: bool,
) -> Result<(), CliError> {
    let config = load_config(config.as_deref())?;
    let table = load_local_csv(&local, &config.columns)?;
    let repo = load_repository_json(&repository)?;

    std::fs::create_dir_all(&out_dir)
        .map_err(|e| CliError::io(format!("cannot create {}: {e}", out_dir.display())))?;
    let matched_path = out_dir.join(MATCHED_FILE);

    if no_verify {
        let matched = run_matching(&config, &table.records, &repo)?;
        write_file(&matched_path, |w| write_match_table(w, &table.headers, &matched.rows))?;
        eprintln!("wrote {}", matched_path.display());
        print_match_summary(&matched.summary);
        return Ok(());
    }

    let client = media_client(api_key, &config);
    let (matched, verified) = run(&config, &table.records, &repo, &client, &CancelToken::new())?;

    write_file(&matched_path, |w| write_match_table(w, &table.headers, &matched.rows))?;
    eprintln!("wrote {}", matched_path.display());
    let verified_path = out_dir.join(VERIFIED_FILE);
    write_file(&verified_path, |w| {
        write_verification_table(w, &table.headers, &verified.rows)
    })?;
    eprintln!("wrote {}", verified_path.display());

    print_match_summary(&matched.summary);
    print_verification_summary(&verified);
    mismatch_exit(&verified.summary)
}

// ── validate ────────────────────────────────────────────────────────

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(Some(&config_path))?;
    let m = &config.matching;
    let v = &config.verification;
    let mut stderr = io::stderr().lock();
    writeln!(
        stderr,
        "valid: '{}' threshold {}, weights {}/{}, tolerance {} mm, {} attempt(s), {} worker(s)",
        config.name,
        m.threshold,
        m.catalog_weight,
        m.taxon_weight,
        v.tolerance(),
        v.max_attempts,
        v.workers,
    )
    .map_err(|e| CliError::io(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_counts_from_one() {
        let rows: Vec<u32> = (1..=10).collect();
        let all = RowWindow { start: 1, limit: None };
        assert_eq!(all.apply(rows.clone()).unwrap(), rows);
        let batch = RowWindow { start: 3, limit: Some(4) };
        assert_eq!(batch.apply(rows.clone()).unwrap(), [3, 4, 5, 6]);
        let tail = RowWindow { start: 9, limit: Some(5) };
        assert_eq!(tail.apply(rows.clone()).unwrap(), [9, 10]);
        let past_end = RowWindow { start: 11, limit: None };
        assert!(past_end.apply(rows).unwrap().is_empty());
    }

    #[test]
    fn window_rejects_row_zero() {
        let err = RowWindow { start: 0, limit: None }.apply(vec![1]).unwrap_err();
        assert_eq!(err.code, crate::exit_codes::EXIT_USAGE);
    }
}
