//! CLI Exit Code Registry
//!
//! Single source of truth for `speclink` exit codes. Scripts and workflow
//! automation branch on these, so treat them as a stable contract.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain      | Description                              |
//! |---------|-------------|------------------------------------------|
//! | 0       | Universal   | Success                                  |
//! | 1       | Universal   | General error (unspecified)              |
//! | 2       | Universal   | CLI usage error (bad args, missing file) |
//! | 3       | Universal   | IO error reading or writing a file       |
//! | 60-69   | linkage     | Config, verification and credential codes|
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

use speclink_linkage::LinkageError;

// =============================================================================
// Universal (0-3)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

/// Cannot read an input file or write an output file.
pub const EXIT_IO: u8 = 3;

// =============================================================================
// Linkage (60-69)
// =============================================================================

/// Config file failed to parse or validate. No rows were processed.
pub const EXIT_INVALID_CONFIG: u8 = 60;

/// Verification completed and at least one row is `verified-mismatch`.
/// Like `diff(1)`, the outputs are still written.
pub const EXIT_VERIFY_MISMATCH: u8 = 61;

/// Input table or repository dataset could not be parsed
/// (missing catalog number column, invalid JSON).
pub const EXIT_INPUT_PARSE: u8 = 62;

/// Stored credentials could not be written or removed.
pub const EXIT_CREDENTIALS: u8 = 63;

/// Map an engine error to its exit code.
pub fn linkage_exit_code(err: &LinkageError) -> u8 {
    match err {
        LinkageError::ConfigParse(_) | LinkageError::ConfigValidation(_) => EXIT_INVALID_CONFIG,
        LinkageError::MissingColumn { .. } | LinkageError::Parse { .. } => EXIT_INPUT_PARSE,
        LinkageError::Io(_) => EXIT_IO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_ERROR,
            EXIT_USAGE,
            EXIT_IO,
            EXIT_INVALID_CONFIG,
            EXIT_VERIFY_MISMATCH,
            EXIT_INPUT_PARSE,
            EXIT_CREDENTIALS,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn linkage_errors_map_by_kind() {
        assert_eq!(
            linkage_exit_code(&LinkageError::ConfigValidation("x".into())),
            EXIT_INVALID_CONFIG
        );
        assert_eq!(
            linkage_exit_code(&LinkageError::MissingColumn {
                table: "local.csv".into(),
                column: "catalog_number".into(),
            }),
            EXIT_INPUT_PARSE
        );
        assert_eq!(linkage_exit_code(&LinkageError::Io("gone".into())), EXIT_IO);
    }
}
