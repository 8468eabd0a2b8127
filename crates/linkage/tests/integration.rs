use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use speclink_linkage::config::{ColumnConfig, MatchingConfig};
use speclink_linkage::matcher::{fuzzy_score, match_records};
use speclink_linkage::model::{MatchPath, TieBreak};
use speclink_linkage::normalize::{normalize_catalog_number, KeyCache};
use speclink_linkage::table::{
    load_local_csv, load_match_table, load_repository_json, write_match_table,
    write_verification_table, LocalTable,
};
use speclink_linkage::{
    run, run_matching, run_verification, CancelToken, LinkageConfig, LocalRecord, MediaClient,
    MediaFailure, Millimeters, RepositoryRecord, VerificationStatus, VoxelSpacing,
};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn config() -> LinkageConfig {
    let text = std::fs::read_to_string(fixtures_dir().join("link.toml")).unwrap();
    LinkageConfig::from_toml(&text).unwrap()
}

fn load() -> (LocalTable, Vec<RepositoryRecord>) {
    let dir = fixtures_dir();
    let local = load_local_csv(&dir.join("local.csv"), &ColumnConfig::default()).unwrap();
    let repo = load_repository_json(&dir.join("repository.json")).unwrap();
    (local, repo)
}

/// Media lookups answered from a fixed table; unknown ids are not found.
struct FixtureMedia {
    responses: HashMap<&'static str, Result<VoxelSpacing, MediaFailure>>,
    calls: Mutex<Vec<String>>,
}

impl FixtureMedia {
    fn new() -> Self {
        let mut responses = HashMap::new();
        responses.insert("000100", Ok(VoxelSpacing::parse("0.0100", "0.0100", "0.0100")));
        responses.insert("000200", Ok(VoxelSpacing::parse("0.0100", "0.0100", "0.0102")));
        responses.insert("000300", Ok(VoxelSpacing::parse("0.0200", "0.0200", "0.0300")));
        responses.insert("000400", Err(MediaFailure::NotFound));
        responses.insert("000600", Ok(VoxelSpacing::parse("0.0400", "0.0400", "")));
        responses.insert("000601", Ok(VoxelSpacing::parse("0.0400", "0.0400", "0.0400")));
        Self {
            responses,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls_for(&self, media_id: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == media_id).count()
    }
}

impl MediaClient for FixtureMedia {
    fn fetch_voxel_spacing(&self, media_id: &str) -> Result<VoxelSpacing, MediaFailure> {
        self.calls.lock().unwrap().push(media_id.to_string());
        self.responses
            .get(media_id)
            .cloned()
            .unwrap_or(Err(MediaFailure::NotFound))
    }
}

// -------------------------------------------------------------------------
// End to end
// -------------------------------------------------------------------------

#[test]
fn fixture_run_assigns_every_status() {
    let (local, repo) = load();
    let client = FixtureMedia::new();
    let (matched, verified) =
        run(&config(), &local.records, &repo, &client, &CancelToken::new()).unwrap();

    assert_eq!(matched.meta.config_name, "Fixture collection");
    assert_eq!(matched.rows.len(), 8);
    assert_eq!(verified.rows.len(), 8);

    let statuses: Vec<_> = verified.rows.iter().map(|r| r.verification_status).collect();
    assert_eq!(
        statuses,
        vec![
            VerificationStatus::VerifiedMatch,
            VerificationStatus::VerifiedMismatch,
            VerificationStatus::ApiValuesUsed,
            VerificationStatus::Skipped,
            VerificationStatus::NotApplicable,
            VerificationStatus::InvalidUrl,
            VerificationStatus::IncompleteApiData,
            VerificationStatus::NotApplicable,
        ]
    );

    let s = &verified.summary;
    assert_eq!(s.total, 8);
    assert_eq!(s.verified_match, 1);
    assert_eq!(s.verified_mismatch, 1);
    assert_eq!(s.not_applicable, 2);
    assert_eq!(s.not_processed, 0);
}

#[test]
fn match_summary_over_fixtures() {
    let (local, repo) = load();
    let run = run_matching(&config(), &local.records, &repo).unwrap();
    let s = &run.summary;
    assert_eq!(s.total, 8);
    assert_eq!(s.matched, 6);
    assert_eq!(s.unmatched, 2);
    assert_eq!(s.exact, 5);
    assert_eq!(s.fuzzy, 1);
    assert_eq!(s.missing_catalog_number, 1);
    // The row without a catalog number ties on taxon alone
    assert_eq!(s.ambiguous, 1);
    let tied = &run.rows[7].diagnostics;
    assert_eq!(tied.tie_break, Some(TieBreak::InputOrder));
    assert_eq!(tied.tied.len(), 2);
}

// -------------------------------------------------------------------------
// Scenarios
// -------------------------------------------------------------------------

#[test]
fn separator_variants_match_exactly() {
    let (local, repo) = load();
    let run = run_matching(&config(), &local.records, &repo).unwrap();
    let row = &run.rows[0];
    assert!(row.match_found);
    assert_eq!(row.match_score, 100.0);
    assert_eq!(row.diagnostics.path, MatchPath::Exact);
    assert_eq!(
        row.matched_repository_url.as_deref(),
        Some("https://www.morphosource.org/concern/media/000100")
    );
}

#[test]
fn one_digit_typo_matches_fuzzily() {
    let (local, repo) = load();
    let run = run_matching(&config(), &local.records, &repo).unwrap();
    let row = &run.rows[1];
    assert_eq!(row.diagnostics.path, MatchPath::Fuzzy);
    assert!((80.0..=95.0).contains(&row.match_score), "score {}", row.match_score);
    assert!(row.match_found);
    assert_eq!(row.matched_repository_id.as_deref(), Some("ms-22345"));
}

#[test]
fn component_beyond_tolerance_is_mismatch() {
    let (local, repo) = load();
    let client = FixtureMedia::new();
    let (_, verified) = run(&config(), &local.records, &repo, &client, &CancelToken::new()).unwrap();
    let row = &verified.rows[1];
    assert_eq!(row.verification_status, VerificationStatus::VerifiedMismatch);
    // Local values are kept, repository values reported alongside
    assert_eq!(row.resolved_voxel, VoxelSpacing::parse("0.0100", "0.0100", "0.0100"));
    assert_eq!(row.repository_voxel.unwrap().z, Millimeters::parse("0.0102"));
}

#[test]
fn difference_equal_to_tolerance_is_match() {
    let config = config();
    let local = vec![LocalRecord::new(0, "UF 12345", None)
        .with_voxel(VoxelSpacing::parse("0.0100", "0.0100", "0.0100"))];
    let repo = vec![RepositoryRecord::new("r", "UF 12345", None).with_media(Some("000101"), None)];

    struct Boundary;
    impl MediaClient for Boundary {
        fn fetch_voxel_spacing(&self, _: &str) -> Result<VoxelSpacing, MediaFailure> {
            Ok(VoxelSpacing::parse("0.0100", "0.0100", "0.0101"))
        }
    }

    let (_, verified) = run(&config, &local, &repo, &Boundary, &CancelToken::new()).unwrap();
    assert_eq!(verified.rows[0].verification_status, VerificationStatus::VerifiedMatch);
}

#[test]
fn absent_local_spacing_is_filled_from_repository() {
    let (local, repo) = load();
    let client = FixtureMedia::new();
    let (_, verified) = run(&config(), &local.records, &repo, &client, &CancelToken::new()).unwrap();
    let row = &verified.rows[2];
    assert_eq!(row.verification_status, VerificationStatus::ApiValuesUsed);
    assert_eq!(row.media_id.as_deref(), Some("000300"));
    let expected = VoxelSpacing::parse("0.0200", "0.0200", "0.0300");
    assert_eq!(row.resolved_voxel, expected);
    let fields = &row.matched.local.fields;
    assert_eq!(fields.get("x_voxel_spacing_mm"), Some("0.02"));
    assert_eq!(fields.get("z_voxel_spacing_mm"), Some("0.03"));
}

#[test]
fn not_found_media_is_skipped_without_retry() {
    let (local, repo) = load();
    let client = FixtureMedia::new();
    let (_, verified) = run(&config(), &local.records, &repo, &client, &CancelToken::new()).unwrap();
    let row = &verified.rows[3];
    assert_eq!(row.verification_status, VerificationStatus::Skipped);
    assert!(row.repository_voxel.is_none());
    assert_eq!(row.resolved_voxel, VoxelSpacing::parse("0.0500", "0.0500", "0.0500"));
    assert_eq!(row.failure.as_deref(), Some("not-found"));
    assert_eq!(client.calls_for("000400"), 1);
}

#[test]
fn first_media_by_id_is_used() {
    let (local, repo) = load();
    let client = FixtureMedia::new();
    let (_, verified) = run(&config(), &local.records, &repo, &client, &CancelToken::new()).unwrap();
    assert_eq!(verified.rows[6].media_id.as_deref(), Some("000600"));
    assert_eq!(client.calls_for("000601"), 0);
}

// -------------------------------------------------------------------------
// Properties
// -------------------------------------------------------------------------

#[test]
fn unmatched_rows_are_not_applicable_and_matched_rows_have_status() {
    let (local, repo) = load();
    let client = FixtureMedia::new();
    let (_, verified) = run(&config(), &local.records, &repo, &client, &CancelToken::new()).unwrap();
    for row in &verified.rows {
        if row.matched.match_found {
            assert_ne!(row.verification_status, VerificationStatus::NotApplicable);
        } else {
            assert_eq!(row.verification_status, VerificationStatus::NotApplicable);
        }
    }
}

#[test]
fn normalization_is_idempotent_over_fixture_ids() {
    let (local, repo) = load();
    let config = MatchingConfig {
        strip_prefixes: vec!["uf".into(), "ypm".into()],
        ..MatchingConfig::default()
    };
    let raw = local
        .records
        .iter()
        .filter_map(|r| r.catalog_number.clone())
        .chain(repo.iter().filter_map(|r| r.catalog_number.clone()));
    for s in raw {
        let once = normalize_catalog_number(&s, &config);
        assert_eq!(normalize_catalog_number(&once, &config), once, "input {s:?}");
    }
}

#[test]
fn score_never_rises_as_identifier_drifts() {
    let config = MatchingConfig::default();
    let local = vec![LocalRecord::new(0, "UF 123456", Some("Anolis"))];
    let repo: Vec<RepositoryRecord> = ["UF 123456", "UF 123457", "UF 123467", "UF 123567", "UF 124567"]
        .iter()
        .map(|c| RepositoryRecord::new(c, c, Some("Anolis")))
        .collect();
    let cache = KeyCache::build(&local, &repo, &config);
    let scores: Vec<f64> = (0..repo.len())
        .map(|i| fuzzy_score(cache.local(0), cache.repository(i), &config))
        .collect();
    for pair in scores.windows(2) {
        assert!(pair[1] <= pair[0], "scores {scores:?}");
    }
}

#[test]
fn output_order_follows_input_order() {
    let (local, repo) = load();
    let config = config();
    let cache = KeyCache::build(&local.records, &repo, &config.matching);
    let selections = match_records(&local.records, &repo, &cache, &config.matching);
    assert_eq!(selections.len(), local.records.len());

    let client = FixtureMedia::new();
    let (matched, verified) =
        run(&config, &local.records, &repo, &client, &CancelToken::new()).unwrap();
    let m: Vec<_> = matched.rows.iter().map(|r| r.local.row_index).collect();
    let v: Vec<_> = verified.rows.iter().map(|r| r.matched.local.row_index).collect();
    assert_eq!(m, (0..8).collect::<Vec<_>>());
    assert_eq!(v, m);
}

#[test]
fn empty_input_writes_header_only_tables() {
    let config = config();
    let (_, repo) = load();
    let client = FixtureMedia::new();
    let (matched, verified) = run(&config, &[], &repo, &client, &CancelToken::new()).unwrap();
    assert!(matched.rows.is_empty());

    let headers = vec!["catalog_number".to_string()];
    let mut buf = Vec::new();
    write_verification_table(&mut buf, &headers, &verified.rows).unwrap();
    assert_eq!(String::from_utf8(buf).unwrap().lines().count(), 1);
}

// -------------------------------------------------------------------------
// Standalone verification + cancellation
// -------------------------------------------------------------------------

#[test]
fn match_table_round_trip_verifies_from_urls() {
    let (local, repo) = load();
    let config = config();
    let matched = run_matching(&config, &local.records, &repo).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("matched.csv");
    let file = std::fs::File::create(&path).unwrap();
    write_match_table(file, &local.headers, &matched.rows).unwrap();

    let table = load_match_table(&path, &config.columns).unwrap();
    assert_eq!(table.headers, local.headers);
    let client = FixtureMedia::new();
    let verified =
        run_verification(&config, table.rows, &[], &client, &CancelToken::new()).unwrap();

    assert_eq!(verified.rows.len(), 8);
    assert_eq!(verified.rows[0].verification_status, VerificationStatus::VerifiedMatch);
    // Without the repository export, the catalogue URL has no media id
    assert_eq!(verified.rows[5].verification_status, VerificationStatus::InvalidUrl);
    // Media id comes from the URL, not the lowest listed media item
    assert_eq!(verified.rows[6].media_id.as_deref(), Some("000601"));
    assert_eq!(verified.rows[6].verification_status, VerificationStatus::VerifiedMatch);
}

#[test]
fn cancelled_before_start_processes_nothing() {
    let (local, repo) = load();
    let config = config();
    let matched = run_matching(&config, &local.records, &repo).unwrap();
    let token = CancelToken::new();
    token.cancel();
    let client = FixtureMedia::new();
    let verified = run_verification(&config, matched.rows, &repo, &client, &token).unwrap();
    assert!(verified.cancelled);
    assert!(verified.rows.is_empty());
    assert_eq!(verified.summary.not_processed, 8);
    assert!(client.calls.lock().unwrap().is_empty());
}
