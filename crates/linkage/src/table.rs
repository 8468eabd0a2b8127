//! Table IO: local CSV, repository JSON, match/verification CSV.
//!
//! Everything else in the engine works on in-memory records; this module is
//! the only place that knows about file formats.

use std::io::{Read, Write};
use std::path::Path;

use serde_json::Value;

use crate::config::ColumnConfig;
use crate::error::LinkageError;
use crate::model::{
    non_blank, Fields, LocalRecord, MatchDiagnostics, MatchResult, MediaRef, RepositoryRecord,
    VerificationResult,
};
use crate::spacing::{Millimeters, VoxelSpacing};

pub const MATCH_COLUMNS: [&str; 3] = ["match_found", "matched_repository_url", "match_score"];

pub const VERIFICATION_COLUMNS: [&str; 8] = [
    "verification_status",
    "media_id",
    "resolved_voxel_x_mm",
    "resolved_voxel_y_mm",
    "resolved_voxel_z_mm",
    "repository_voxel_x_mm",
    "repository_voxel_y_mm",
    "repository_voxel_z_mm",
];

/// Local rows plus the header row they were read with.
#[derive(Debug, Clone, Default)]
pub struct LocalTable {
    pub headers: Vec<String>,
    pub records: Vec<LocalRecord>,
}

/// A previously written match table, read back for standalone verification.
#[derive(Debug, Clone, Default)]
pub struct MatchTable {
    /// Passthrough headers, without the appended match columns.
    pub headers: Vec<String>,
    pub rows: Vec<MatchResult>,
}

// ---------------------------------------------------------------------------
// Local CSV
// ---------------------------------------------------------------------------

fn io_err(path: &Path, e: impl std::fmt::Display) -> LinkageError {
    LinkageError::Io(format!("{}: {e}", path.display()))
}

fn parse_err(source_name: &str, e: impl std::fmt::Display) -> LinkageError {
    LinkageError::Parse {
        source_name: source_name.to_string(),
        message: e.to_string(),
    }
}

fn find_column(headers: &[String], aliases: &[String]) -> Option<usize> {
    aliases.iter().find_map(|alias| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(alias.trim()))
    })
}

/// Read all rows of a CSV into (headers, cells). Short rows are padded.
fn read_csv<R: Read>(reader: R, source_name: &str) -> Result<(Vec<String>, Vec<Vec<String>>), LinkageError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| parse_err(source_name, e))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|e| parse_err(source_name, e))?;
        let mut cells: Vec<String> = record.iter().map(String::from).collect();
        cells.resize(headers.len(), String::new());
        rows.push(cells);
    }
    Ok((headers, rows))
}

struct LocalColumns {
    catalog: usize,
    taxon: Option<usize>,
    voxel: [Option<usize>; 3],
}

impl LocalColumns {
    fn locate(headers: &[String], columns: &ColumnConfig, table: &str) -> Result<Self, LinkageError> {
        let catalog = find_column(headers, &columns.catalog_number).ok_or_else(|| {
            LinkageError::MissingColumn {
                table: table.to_string(),
                column: columns
                    .catalog_number
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "catalog_number".into()),
            }
        })?;
        Ok(Self {
            catalog,
            taxon: find_column(headers, &columns.taxon_name),
            voxel: [
                find_column(headers, &columns.voxel_x),
                find_column(headers, &columns.voxel_y),
                find_column(headers, &columns.voxel_z),
            ],
        })
    }

    fn record(&self, row_index: usize, headers: &[String], cells: Vec<String>) -> LocalRecord {
        let cell = |i: Option<usize>| i.map(|i| cells[i].as_str()).unwrap_or("");
        let voxel = VoxelSpacing::parse(
            cell(self.voxel[0]),
            cell(self.voxel[1]),
            cell(self.voxel[2]),
        );
        let mut record = LocalRecord::new(row_index, cell(Some(self.catalog)), Some(cell(self.taxon)))
            .with_voxel(voxel);
        record.voxel_columns = self.voxel.map(|i| i.map(|i| headers[i].clone()));
        record.fields = Fields::new(headers.iter().cloned().zip(cells).collect());
        record
    }
}

/// Parse a local specimen table. All columns are kept as passthrough.
pub fn parse_local_csv<R: Read>(
    reader: R,
    source_name: &str,
    columns: &ColumnConfig,
) -> Result<LocalTable, LinkageError> {
    let (headers, rows) = read_csv(reader, source_name)?;
    let located = LocalColumns::locate(&headers, columns, source_name)?;
    let records = rows
        .into_iter()
        .enumerate()
        .map(|(i, cells)| located.record(i, &headers, cells))
        .collect();
    Ok(LocalTable { headers, records })
}

pub fn load_local_csv(path: &Path, columns: &ColumnConfig) -> Result<LocalTable, LinkageError> {
    let file = std::fs::File::open(path).map_err(|e| io_err(path, e))?;
    parse_local_csv(file, &path.display().to_string(), columns)
}

/// Parse a match table written by [`write_match_table`].
pub fn parse_match_table<R: Read>(
    reader: R,
    source_name: &str,
    columns: &ColumnConfig,
) -> Result<MatchTable, LinkageError> {
    let (all_headers, rows) = read_csv(reader, source_name)?;
    let appended: Vec<Option<usize>> = MATCH_COLUMNS
        .iter()
        .map(|c| all_headers.iter().position(|h| h == c))
        .collect();
    let found_col = appended[0].ok_or_else(|| LinkageError::MissingColumn {
        table: source_name.to_string(),
        column: MATCH_COLUMNS[0].to_string(),
    })?;

    let keep: Vec<usize> = (0..all_headers.len())
        .filter(|i| !appended.contains(&Some(*i)))
        .collect();
    let headers: Vec<String> = keep.iter().map(|&i| all_headers[i].clone()).collect();
    let located = LocalColumns::locate(&headers, columns, source_name)?;

    let rows = rows
        .into_iter()
        .enumerate()
        .map(|(row_index, cells)| {
            let flag = cells[found_col].trim().to_ascii_lowercase();
            let match_found = matches!(flag.as_str(), "true" | "1" | "yes");
            let url = appended[1].and_then(|i| non_blank(&cells[i]));
            let score = appended[2]
                .and_then(|i| cells[i].trim().parse::<f64>().ok())
                .unwrap_or(0.0);
            let passthrough: Vec<String> = keep.iter().map(|&i| cells[i].clone()).collect();
            MatchResult {
                local: located.record(row_index, &headers, passthrough),
                match_found,
                matched_repository_url: url,
                matched_repository_id: None,
                match_score: score,
                diagnostics: MatchDiagnostics::empty(),
            }
        })
        .collect();

    Ok(MatchTable { headers, rows })
}

pub fn load_match_table(path: &Path, columns: &ColumnConfig) -> Result<MatchTable, LinkageError> {
    let file = std::fs::File::open(path).map_err(|e| io_err(path, e))?;
    parse_match_table(file, &path.display().to_string(), columns)
}

// ---------------------------------------------------------------------------
// Repository JSON
// ---------------------------------------------------------------------------

fn scalar(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) => non_blank(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `metadata` may be an object or a JSON document stored as a string.
fn metadata(item: &Value) -> Option<Value> {
    match item.get("metadata")? {
        Value::String(s) => serde_json::from_str(s).ok(),
        v @ Value::Object(_) => Some(v.clone()),
        _ => None,
    }
}

fn media_refs(item: &Value) -> Vec<MediaRef> {
    let Some(Value::Array(items)) = item.get("media") else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|m| match m {
            Value::String(s) if s.contains('/') => Some(MediaRef { id: None, url: non_blank(s) }),
            Value::String(_) | Value::Number(_) => Some(MediaRef { id: scalar(Some(m)), url: None }),
            Value::Object(_) => Some(MediaRef {
                id: scalar(m.get("id")),
                url: scalar(m.get("url")),
            }),
            _ => None,
        })
        .collect()
}

fn repository_record(index: usize, item: &Value) -> RepositoryRecord {
    let meta = metadata(item);
    let from_meta = |key: &str| scalar(meta.as_ref().and_then(|m| m.get(key)));
    RepositoryRecord {
        repository_id: scalar(item.get("repository_id"))
            .or_else(|| scalar(item.get("id")))
            .unwrap_or_else(|| format!("record-{index}")),
        catalog_number: scalar(item.get("catalog_number")).or_else(|| from_meta("Object")),
        taxon_name: scalar(item.get("taxon_name")).or_else(|| from_meta("Taxonomy")),
        canonical_url: scalar(item.get("canonical_url")).or_else(|| scalar(item.get("url"))),
        media: media_refs(item),
    }
}

/// Parse a repository export: a JSON array of records, optionally wrapped
/// in an object under `records` or `data`.
pub fn parse_repository_json(input: &str, source_name: &str) -> Result<Vec<RepositoryRecord>, LinkageError> {
    let doc: Value = serde_json::from_str(input.trim_start_matches('\u{feff}'))
        .map_err(|e| parse_err(source_name, e))?;
    let items = match &doc {
        Value::Array(items) => items,
        Value::Object(obj) => match obj.get("records").or_else(|| obj.get("data")) {
            Some(Value::Array(items)) => items,
            _ => return Err(parse_err(source_name, "expected an array of records")),
        },
        _ => return Err(parse_err(source_name, "expected an array of records")),
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            if item.is_object() {
                Ok(repository_record(i, item))
            } else {
                Err(parse_err(source_name, format!("record {i} is not an object")))
            }
        })
        .collect()
}

pub fn load_repository_json(path: &Path) -> Result<Vec<RepositoryRecord>, LinkageError> {
    let text = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    parse_repository_json(&text, &path.display().to_string())
}

// ---------------------------------------------------------------------------
// Output CSV
// ---------------------------------------------------------------------------

fn csv_err(e: impl std::fmt::Display) -> LinkageError {
    LinkageError::Io(e.to_string())
}

fn match_cells(row: &MatchResult) -> impl Iterator<Item = String> + '_ {
    row.local.fields.values().map(String::from).chain([
        row.match_found.to_string(),
        row.matched_repository_url.clone().unwrap_or_default(),
        format!("{:.2}", row.match_score),
    ])
}

fn opt_mm(v: Option<Millimeters>) -> String {
    v.map(|m| m.to_string()).unwrap_or_default()
}

/// Input columns followed by the match columns. Header-only for empty input.
pub fn write_match_table<W: Write>(out: W, headers: &[String], rows: &[MatchResult]) -> Result<(), LinkageError> {
    let mut wtr = csv::Writer::from_writer(out);
    let header_row = headers.iter().map(String::as_str).chain(MATCH_COLUMNS);
    wtr.write_record(header_row).map_err(csv_err)?;
    for row in rows {
        wtr.write_record(match_cells(row)).map_err(csv_err)?;
    }
    wtr.flush().map_err(csv_err)
}

/// Match table columns followed by the verification columns.
pub fn write_verification_table<W: Write>(
    out: W,
    headers: &[String],
    rows: &[VerificationResult],
) -> Result<(), LinkageError> {
    let mut wtr = csv::Writer::from_writer(out);
    let header_row = headers
        .iter()
        .map(String::as_str)
        .chain(MATCH_COLUMNS)
        .chain(VERIFICATION_COLUMNS);
    wtr.write_record(header_row).map_err(csv_err)?;
    for row in rows {
        let repo = row.repository_voxel.unwrap_or_default();
        let extra = [
            row.verification_status.to_string(),
            row.media_id.clone().unwrap_or_default(),
            opt_mm(row.resolved_voxel.x),
            opt_mm(row.resolved_voxel.y),
            opt_mm(row.resolved_voxel.z),
            opt_mm(repo.x),
            opt_mm(repo.y),
            opt_mm(repo.z),
        ];
        wtr.write_record(match_cells(&row.matched).chain(extra))
            .map_err(csv_err)?;
    }
    wtr.flush().map_err(csv_err)
}

/// Create (or truncate) `path` and write through `f`.
pub fn write_file<F>(path: &Path, f: F) -> Result<(), LinkageError>
where
    F: FnOnce(std::io::BufWriter<std::fs::File>) -> Result<(), LinkageError>,
{
    let file = std::fs::File::create(path).map_err(|e| io_err(path, e))?;
    f(std::io::BufWriter::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VerificationStatus;

    const LOCAL: &str = "\
Catalog_Number , Species,x_voxel_spacing_mm,y_voxel_spacing_mm,z_voxel_spacing_mm,notes
UF 12345,Anolis carolinensis,0.0413,0.0413,0.0413,skull
UF 222,,,,,
";

    #[test]
    fn local_csv_locates_aliased_columns() {
        let table = parse_local_csv(LOCAL.as_bytes(), "local.csv", &ColumnConfig::default()).unwrap();
        assert_eq!(table.headers[0], "Catalog_Number");
        assert_eq!(table.records.len(), 2);
        let r0 = &table.records[0];
        assert_eq!(r0.catalog_number.as_deref(), Some("UF 12345"));
        assert_eq!(r0.taxon_name.as_deref(), Some("Anolis carolinensis"));
        assert!(r0.voxel.is_complete());
        assert_eq!(r0.fields.get("notes"), Some("skull"));
        assert_eq!(r0.voxel_columns[2].as_deref(), Some("z_voxel_spacing_mm"));
        let r1 = &table.records[1];
        assert!(r1.taxon_name.is_none());
        assert!(r1.voxel.is_empty());
        assert_eq!(r1.row_index, 1);
    }

    #[test]
    fn local_csv_without_catalog_column_fails() {
        let err = parse_local_csv("name,species\nx,y\n".as_bytes(), "bad.csv", &ColumnConfig::default())
            .unwrap_err();
        assert!(matches!(err, LinkageError::MissingColumn { .. }));
    }

    #[test]
    fn short_rows_are_padded() {
        let table = parse_local_csv(
            "catalog_number,taxon_name\nUF 1\n".as_bytes(),
            "short.csv",
            &ColumnConfig::default(),
        )
        .unwrap();
        assert_eq!(table.records[0].fields.len(), 2);
        assert!(table.records[0].taxon_name.is_none());
    }

    #[test]
    fn repository_canonical_shape() {
        let json = r#"[
            {"repository_id": "ms-1", "catalog_number": "UF-12345", "taxon_name": "Anolis",
             "canonical_url": "https://www.morphosource.org/concern/media/000100",
             "media": ["000300", {"id": 200, "url": null}, "https://x.org/media/000150"]}
        ]"#;
        let records = parse_repository_json(json, "repo.json").unwrap();
        let r = &records[0];
        assert_eq!(r.repository_id, "ms-1");
        assert_eq!(r.catalog_number.as_deref(), Some("UF-12345"));
        assert_eq!(r.media.len(), 3);
        assert_eq!(r.media[1].id.as_deref(), Some("200"));
        assert_eq!(r.media[2].url.as_deref(), Some("https://x.org/media/000150"));
    }

    #[test]
    fn repository_export_shape_with_string_metadata() {
        let json = r#"{"records": [
            {"id": "000391527", "url": "https://www.morphosource.org/concern/media/000391527",
             "metadata": "{\"Object\": \"UF:Herp:12345\", \"Taxonomy\": \"Anolis carolinensis\"}"}
        ]}"#;
        let records = parse_repository_json(json, "export.json").unwrap();
        assert_eq!(records[0].repository_id, "000391527");
        assert_eq!(records[0].catalog_number.as_deref(), Some("UF:Herp:12345"));
        assert_eq!(records[0].taxon_name.as_deref(), Some("Anolis carolinensis"));
    }

    #[test]
    fn repository_rejects_non_array() {
        assert!(parse_repository_json("42", "x.json").is_err());
        assert!(parse_repository_json("[1]", "x.json").is_err());
        assert!(parse_repository_json("not json", "x.json").is_err());
    }

    #[test]
    fn match_table_written_and_read_back() {
        let table = parse_local_csv(LOCAL.as_bytes(), "local.csv", &ColumnConfig::default()).unwrap();
        let rows: Vec<MatchResult> = table
            .records
            .iter()
            .map(|r| MatchResult {
                local: r.clone(),
                match_found: r.row_index == 0,
                matched_repository_url: (r.row_index == 0)
                    .then(|| "https://www.morphosource.org/concern/media/000100".to_string()),
                matched_repository_id: None,
                match_score: if r.row_index == 0 { 100.0 } else { 41.5 },
                diagnostics: MatchDiagnostics::empty(),
            })
            .collect();

        let mut buf = Vec::new();
        write_match_table(&mut buf, &table.headers, &rows).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        let first_line = text.lines().next().unwrap();
        assert!(first_line.ends_with("notes,match_found,matched_repository_url,match_score"));
        assert!(text.contains("true,https://www.morphosource.org/concern/media/000100,100.00"));

        let back = parse_match_table(buf.as_slice(), "matched.csv", &ColumnConfig::default()).unwrap();
        assert_eq!(back.headers, table.headers);
        assert_eq!(back.rows.len(), 2);
        assert!(back.rows[0].match_found);
        assert_eq!(back.rows[1].match_score, 41.5);
        assert_eq!(back.rows[0].local.voxel, table.records[0].voxel);
    }

    #[test]
    fn empty_input_writes_header_only() {
        let headers = vec!["catalog_number".to_string()];
        let mut buf = Vec::new();
        write_verification_table(&mut buf, &headers, &[]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("catalog_number,match_found,"));
        assert!(text.trim_end().ends_with("repository_voxel_z_mm"));
    }

    #[test]
    fn verification_row_cells() {
        let table = parse_local_csv(LOCAL.as_bytes(), "local.csv", &ColumnConfig::default()).unwrap();
        let local = table.records[0].clone();
        let voxel = local.voxel;
        let row = VerificationResult {
            matched: MatchResult {
                local,
                match_found: true,
                matched_repository_url: None,
                matched_repository_id: None,
                match_score: 100.0,
                diagnostics: MatchDiagnostics::empty(),
            },
            verification_status: VerificationStatus::VerifiedMatch,
            media_id: Some("000100".into()),
            repository_voxel: Some(voxel),
            resolved_voxel: voxel,
            attempts: 1,
            failure: None,
        };
        let mut buf = Vec::new();
        write_verification_table(&mut buf, &table.headers, &[row]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let data = text.lines().nth(1).unwrap();
        assert!(data.ends_with("verified-match,000100,0.0413,0.0413,0.0413,0.0413,0.0413,0.0413"));
    }
}
