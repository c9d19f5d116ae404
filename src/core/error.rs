use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the map downloader core.
/// Every module returns `Result<T, MapError>`.
#[derive(Debug, Error)]
pub enum MapError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    // ── Catalog ─────────────────────────────────────────
    #[error("Catalog parse error: {0}")]
    CatalogParse(String),

    // ── XML ─────────────────────────────────────────────
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    // ── JSON ────────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Regions ─────────────────────────────────────────
    #[error("Region not found: {0}")]
    RegionNotFound(String),

    #[error("Region is not downloadable: {0}")]
    NotDownloadable(String),

    // ── Transfers ───────────────────────────────────────
    #[error("Transfer cancelled")]
    TransferCancelled,

    #[error("Download coordinator is not running")]
    CoordinatorShutdown,

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type MapResult<T> = Result<T, MapError>;

impl MapError {
    /// Cancellation is a normal state transition, not a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MapError::TransferCancelled)
    }
}

impl From<std::io::Error> for MapError {
    fn from(source: std::io::Error) -> Self {
        MapError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

// ── Serialization for UI bridges ────────────────────────
// Frontends only ever see the rendered message.
impl serde::Serialize for MapError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_message() {
        let err = MapError::RegionNotFound("Ireland".into());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Region not found: Ireland\"");
    }

    #[test]
    fn only_cancellation_is_cancelled() {
        assert!(MapError::TransferCancelled.is_cancelled());
        assert!(!MapError::Other("boom".into()).is_cancelled());
    }
}
