//! Identifier normalization.
//!
//! Canonical ids are comparison keys only. They are derived per run and
//! never stored as identity.

use crate::config::MatchingConfig;
use crate::model::{LocalRecord, RepositoryRecord};

const DELIMITER: char = '-';

/// Canonicalize a raw catalog number.
///
/// Trims, lower-cases, collapses separator runs to a single `-`, and strips
/// configured prefixes and suffixes, repeating until nothing changes so the
/// result is idempotent.
pub fn normalize_catalog_number(raw: &str, config: &MatchingConfig) -> String {
    // After the first pass no step lengthens the string, so this settles.
    let mut current = single_pass(raw, config);
    loop {
        let next = single_pass(&current, config);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn single_pass(raw: &str, config: &MatchingConfig) -> String {
    let mut s = raw.trim().to_lowercase();

    // File extensions first: they may contain separator characters.
    let extensions: Vec<String> = config
        .strip_suffixes
        .iter()
        .filter(|s| s.starts_with('.'))
        .map(|s| s.to_lowercase())
        .collect();
    while let Some(ext) = extensions
        .iter()
        .find(|ext| s.len() > ext.len() && s.ends_with(ext.as_str()))
    {
        s.truncate(s.len() - ext.len());
    }

    let mut s = collapse_separators(&s, &config.separators);

    loop {
        let before = s.len();
        for prefix in &config.strip_prefixes {
            let prefix = collapse_separators(&prefix.to_lowercase(), &config.separators);
            if prefix.is_empty() {
                continue;
            }
            let marker = format!("{prefix}{DELIMITER}");
            if s.len() > marker.len() && s.starts_with(&marker) {
                s = s[marker.len()..].to_string();
            }
        }
        for part in config.strip_suffixes.iter().filter(|s| !s.starts_with('.')) {
            let part = collapse_separators(&part.to_lowercase(), &config.separators);
            if part.is_empty() {
                continue;
            }
            let marker = format!("{DELIMITER}{part}");
            if s.len() > marker.len() && s.ends_with(&marker) {
                s.truncate(s.len() - marker.len());
            }
        }
        if s.len() == before {
            break;
        }
    }
    s
}

/// Replace each run of separator characters with one delimiter and drop
/// separators at either end.
fn collapse_separators(s: &str, separators: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending = false;
    for c in s.chars() {
        if separators.contains(c) || c == DELIMITER {
            pending = true;
            continue;
        }
        if pending && !out.is_empty() {
            out.push(DELIMITER);
        }
        pending = false;
        out.push(c);
    }
    out
}

/// Trim, lower-case, and collapse internal whitespace.
pub fn normalize_taxon(raw: &str) -> String {
    raw.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Per-run memo
// ---------------------------------------------------------------------------

/// Comparison keys for one record. Empty keys are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordKeys {
    pub canonical_id: Option<String>,
    pub taxon: Option<String>,
}

impl RecordKeys {
    fn derive(catalog: Option<&str>, taxon: Option<&str>, config: &MatchingConfig) -> Self {
        let some = |s: String| if s.is_empty() { None } else { Some(s) };
        Self {
            canonical_id: catalog.and_then(|c| some(normalize_catalog_number(c, config))),
            taxon: taxon.and_then(|t| some(normalize_taxon(t))),
        }
    }
}

/// Keys computed once per record for a whole run. Read-only after
/// construction, so it can be shared across threads by reference.
#[derive(Debug, Clone, Default)]
pub struct KeyCache {
    local: Vec<RecordKeys>,
    repository: Vec<RecordKeys>,
}

impl KeyCache {
    pub fn build(
        local: &[LocalRecord],
        repository: &[RepositoryRecord],
        config: &MatchingConfig,
    ) -> Self {
        let local = local
            .iter()
            .map(|r| RecordKeys::derive(r.catalog_number.as_deref(), r.taxon_name.as_deref(), config))
            .collect();
        let repository = repository
            .iter()
            .map(|r| RecordKeys::derive(r.catalog_number.as_deref(), r.taxon_name.as_deref(), config))
            .collect();
        Self { local, repository }
    }

    pub fn local(&self, index: usize) -> &RecordKeys {
        &self.local[index]
    }

    pub fn repository(&self, index: usize) -> &RecordKeys {
        &self.repository[index]
    }

    pub fn repository_keys(&self) -> &[RecordKeys] {
        &self.repository
    }
}
