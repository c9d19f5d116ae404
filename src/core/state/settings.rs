use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::downloader::{DEFAULT_BASE_URL, DEFAULT_FILE_SUFFIX};
use crate::core::error::{MapError, MapResult};
use crate::core::http::APP_USER_AGENT;

const SETTINGS_FILE: &str = "settings.json";
const CATALOG_FILE: &str = "regions.xml";
const DOWNLOADS_DIR_NAME: &str = "MapDownloader";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapSettings {
    pub base_url: String,
    pub file_suffix: String,
    /// Where finished map artifacts are stored.
    pub download_dir: PathBuf,
    /// Bundled region catalog. Relative paths resolve against the data dir.
    pub catalog_path: PathBuf,
    pub user_agent: String,
}

impl Default for MapSettings {
    fn default() -> Self {
        let documents = dirs::document_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            file_suffix: DEFAULT_FILE_SUFFIX.to_string(),
            download_dir: documents.join(DOWNLOADS_DIR_NAME),
            catalog_path: PathBuf::from(CATALOG_FILE),
            user_agent: APP_USER_AGENT.to_string(),
        }
    }
}

impl MapSettings {
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join(SETTINGS_FILE)
    }

    /// Settings stored in `data_dir`, or defaults when the file is missing or
    /// unreadable.
    pub fn load(data_dir: &Path) -> Self {
        let path = Self::path(data_dir);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };

        match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring invalid settings {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn save(&self, data_dir: &Path) -> MapResult<()> {
        let path = Self::path(data_dir);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).map_err(|source| MapError::Io { path, source })
    }

    pub fn resolved_catalog_path(&self, data_dir: &Path) -> PathBuf {
        if self.catalog_path.is_absolute() {
            self.catalog_path.clone()
        } else {
            data_dir.join(&self.catalog_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = MapSettings::load(dir.path());
        assert_eq!(settings, MapSettings::default());
        assert_eq!(settings.file_suffix, "_europe_2.obf.zip");
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let settings = MapSettings {
            base_url: "http://localhost:8080/".into(),
            download_dir: dir.path().join("maps"),
            ..MapSettings::default()
        };
        settings.save(dir.path()).unwrap();

        assert_eq!(MapSettings::load(dir.path()), settings);
    }

    #[test]
    fn partial_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();

        std::fs::write(MapSettings::path(dir.path()), r#"{"file_suffix":"_asia.zip"}"#).unwrap();
        let partial = MapSettings::load(dir.path());
        assert_eq!(partial.file_suffix, "_asia.zip");
        assert_eq!(partial.base_url, DEFAULT_BASE_URL);

        std::fs::write(MapSettings::path(dir.path()), "{ not json").unwrap();
        assert_eq!(MapSettings::load(dir.path()), MapSettings::default());
    }

    #[test]
    fn catalog_path_resolution() {
        let data_dir = Path::new("/data");
        let mut settings = MapSettings::default();
        assert_eq!(
            settings.resolved_catalog_path(data_dir),
            Path::new("/data/regions.xml")
        );

        settings.catalog_path = PathBuf::from("/opt/maps/regions.xml");
        assert_eq!(
            settings.resolved_catalog_path(data_dir),
            Path::new("/opt/maps/regions.xml")
        );
    }
}
