//! Repository Media Client contract and media reference resolution.
//!
//! The engine never talks to the network itself. It calls a [`MediaClient`]
//! and gets back either a voxel triple or a classified [`MediaFailure`].

use url::Url;

use crate::model::RepositoryRecord;
use crate::spacing::VoxelSpacing;

/// Classified reason a single media lookup failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaFailure {
    NotFound,
    Unauthorized,
    RateLimited { retry_after_secs: Option<u64> },
    Network(String),
    /// 5xx from the repository.
    Upstream { status: u16 },
    /// Any other 4xx.
    Rejected { status: u16 },
    /// 2xx with a body that is not a media document.
    Malformed(String),
}

impl MediaFailure {
    /// Worth another attempt after backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited { .. } | Self::Upstream { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "not-found",
            Self::Unauthorized => "unauthorized",
            Self::RateLimited { .. } => "rate-limited",
            Self::Network(_) => "network-error",
            Self::Upstream { .. } => "upstream-error",
            Self::Rejected { .. } => "rejected",
            Self::Malformed(_) => "malformed-response",
        }
    }
}

impl std::fmt::Display for MediaFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not-found"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::RateLimited { retry_after_secs: Some(s) } => {
                write!(f, "rate-limited (retry after {s}s)")
            }
            Self::RateLimited { retry_after_secs: None } => write!(f, "rate-limited"),
            Self::Network(msg) => write!(f, "network-error: {msg}"),
            Self::Upstream { status } => write!(f, "upstream-error (HTTP {status})"),
            Self::Rejected { status } => write!(f, "rejected (HTTP {status})"),
            Self::Malformed(msg) => write!(f, "malformed-response: {msg}"),
        }
    }
}

/// Fetches authoritative voxel spacing for a media id.
///
/// Implementations make one attempt per call; retry policy lives in the
/// verifier. `Sync` so a single client can serve a worker pool.
pub trait MediaClient: Sync {
    fn fetch_voxel_spacing(&self, media_id: &str) -> Result<VoxelSpacing, MediaFailure>;
}

// ---------------------------------------------------------------------------
// Media reference resolution
// ---------------------------------------------------------------------------

fn looks_like_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Media id from a bare id, a media URL, or a URL path.
///
/// Recognises `/concern/media/<id>` and `/media/<id>`, and otherwise takes
/// the path segment following `media`. Query and fragment are ignored.
pub fn extract_media_id(reference: &str) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }
    if looks_like_id(reference) {
        return Some(reference.to_string());
    }

    let path = match Url::parse(reference) {
        Ok(url) => url.path().to_string(),
        Err(_) => reference
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    segments
        .iter()
        .position(|s| s.eq_ignore_ascii_case("media"))
        .and_then(|i| segments.get(i + 1))
        .filter(|id| looks_like_id(id))
        .map(|id| id.to_string())
}

/// Pick the single media id to verify against.
///
/// Media references are ordered by id and the first resolvable one wins.
/// A record with no resolvable media falls back to its canonical URL.
pub fn resolve_media_reference(record: &RepositoryRecord) -> Option<String> {
    let mut ids: Vec<String> = record
        .media
        .iter()
        .filter_map(|m| {
            m.id.as_deref()
                .and_then(extract_media_id)
                .or_else(|| m.url.as_deref().and_then(extract_media_id))
        })
        .collect();
    ids.sort();
    ids.into_iter()
        .next()
        .or_else(|| record.canonical_url.as_deref().and_then(extract_media_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_from_concern_url() {
        assert_eq!(
            extract_media_id("https://www.morphosource.org/concern/media/000391527?locale=en"),
            Some("000391527".into())
        );
    }

    #[test]
    fn extract_from_api_url_and_path() {
        assert_eq!(
            extract_media_id("https://www.morphosource.org/api/media/000123"),
            Some("000123".into())
        );
        assert_eq!(extract_media_id("/media/42#top"), Some("42".into()));
    }

    #[test]
    fn bare_id_passes_through() {
        assert_eq!(extract_media_id(" 000391527 "), Some("000391527".into()));
    }

    #[test]
    fn unresolvable_references() {
        assert_eq!(extract_media_id(""), None);
        assert_eq!(extract_media_id("https://example.org/specimens/12"), None);
        assert_eq!(extract_media_id("https://example.org/media/"), None);
        assert_eq!(extract_media_id("not a url at all"), None);
    }

    #[test]
    fn first_media_by_id_wins() {
        let record = RepositoryRecord::new("r1", "UF 1", None)
            .with_media(Some("000300"), None)
            .with_media(None, Some("https://www.morphosource.org/concern/media/000100"))
            .with_media(Some("000200"), None);
        assert_eq!(resolve_media_reference(&record), Some("000100".into()));
    }

    #[test]
    fn falls_back_to_canonical_url() {
        let record = RepositoryRecord::new("r1", "UF 1", None)
            .with_url("https://www.morphosource.org/concern/media/000555");
        assert_eq!(resolve_media_reference(&record), Some("000555".into()));

        let bare = RepositoryRecord::new("r2", "UF 2", None)
            .with_url("https://www.morphosource.org/catalog/objects/1");
        assert_eq!(resolve_media_reference(&bare), None);
    }

    #[test]
    fn transient_classification() {
        assert!(MediaFailure::Network("reset".into()).is_transient());
        assert!(MediaFailure::RateLimited { retry_after_secs: None }.is_transient());
        assert!(MediaFailure::Upstream { status: 503 }.is_transient());
        assert!(!MediaFailure::NotFound.is_transient());
        assert!(!MediaFailure::Unauthorized.is_transient());
        assert!(!MediaFailure::Rejected { status: 422 }.is_transient());
    }
}
