use std::fmt;

/// Errors that abort a linkage run before any row is processed.
///
/// Per-row problems (missing identifiers, client failures) never surface
/// here; they are encoded in the output rows instead.
#[derive(Debug)]
pub enum LinkageError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (threshold, weights, tolerance, retry bounds).
    ConfigValidation(String),
    /// A required column is absent from an input table.
    MissingColumn { table: String, column: String },
    /// Malformed input document (CSV or JSON).
    Parse { source_name: String, message: String },
    /// IO error (file read, write, etc.).
    Io(String),
}

impl fmt::Display for LinkageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::MissingColumn { table, column } => {
                write!(f, "{table}: missing column '{column}'")
            }
            Self::Parse { source_name, message } => {
                write!(f, "{source_name}: cannot parse input: {message}")
            }
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for LinkageError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_missing_column() {
        let err = LinkageError::MissingColumn {
            table: "local".into(),
            column: "catalog_number".into(),
        };
        assert_eq!(err.to_string(), "local: missing column 'catalog_number'");
    }

    #[test]
    fn display_validation() {
        let err = LinkageError::ConfigValidation("threshold must be within 0..=100".into());
        assert!(err.to_string().starts_with("config validation error:"));
    }
}
