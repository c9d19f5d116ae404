use reqwest::Url;

use crate::core::error::{MapError, MapResult};

/// Map host used when no override is configured.
pub const DEFAULT_BASE_URL: &str = "https://download.osmand.net/";
pub const DOWNLOAD_PATH: &str = "download";
/// Appended to a region's `download_id` to name its artifact.
pub const DEFAULT_FILE_SUFFIX: &str = "_europe_2.obf.zip";

const FILE_PARAM: &str = "file";
const STANDARD_PARAM: &str = "standard";

/// `<download_id><suffix>`, the on-disk and remote file name.
pub fn artifact_file_name(download_id: &str, suffix: &str) -> String {
    format!("{download_id}{suffix}")
}

/// Inverse of [`artifact_file_name`]. `None` when the suffix is absent or
/// nothing is left after stripping it.
pub fn download_id_from_file_name<'a>(file_name: &'a str, suffix: &str) -> Option<&'a str> {
    file_name
        .strip_suffix(suffix)
        .filter(|id| !id.is_empty())
}

/// A single map file request against the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub url: Url,
}

impl TransferRequest {
    /// `<base>/download?standard=yes&file=<download_id><suffix>`
    pub fn for_region(base_url: &str, download_id: &str, suffix: &str) -> MapResult<Self> {
        let base = Url::parse(base_url).map_err(|e| MapError::InvalidUrl(e.to_string()))?;
        let mut url = base
            .join(DOWNLOAD_PATH)
            .map_err(|e| MapError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair(STANDARD_PARAM, "yes")
            .append_pair(FILE_PARAM, &artifact_file_name(download_id, suffix));
        Ok(Self { url })
    }

    pub fn from_url(url: &str) -> MapResult<Self> {
        let url = Url::parse(url).map_err(|e| MapError::InvalidUrl(e.to_string()))?;
        Ok(Self { url })
    }

    /// The requested file name, taken from the `file` query parameter.
    pub fn file_name(&self) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == FILE_PARAM)
            .map(|(_, value)| value.into_owned())
            .filter(|name| !name.is_empty())
    }

    /// Recover the region identifier this request was issued for.
    pub fn download_id(&self, suffix: &str) -> Option<String> {
        let file_name = self.file_name()?;
        download_id_from_file_name(&file_name, suffix).map(str::to_owned)
    }
}

impl std::fmt::Display for TransferRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}
