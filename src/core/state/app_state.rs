use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::Client;
use tracing::{error, info};

use super::settings::MapSettings;
use crate::core::catalog::Catalog;
use crate::core::downloader::HttpTransferService;
use crate::core::error::{MapError, MapResult};
use crate::core::http::build_http_client;
use crate::core::queue::{QueueConfig, QueueCoordinator, QueueHandle};
use crate::core::region::Region;
use crate::core::storage::DiskSpace;

const APP_DIR_NAME: &str = "MapDownloader";

pub struct AppState {
    pub data_dir: PathBuf,
    pub settings: MapSettings,
    pub http_client: Client,
    /// Static region tree as loaded. Live statuses come from [`Self::queue`].
    pub catalog: Catalog,
    pub transfers: Arc<HttpTransferService>,
    pub queue: QueueHandle,
    pub disk: DiskSpace,
}

impl AppState {
    /// Bootstrap from the platform data directory. Must run inside a Tokio
    /// runtime since the coordinator is spawned here.
    pub async fn new() -> MapResult<Self> {
        Self::with_data_dir(default_data_dir()).await
    }

    pub async fn with_data_dir(data_dir: PathBuf) -> MapResult<Self> {
        create_dir(&data_dir)?;
        let settings = MapSettings::load(&data_dir);
        create_dir(&settings.download_dir)?;

        let http_client = build_http_client(&settings.user_agent)?;
        let transfers = Arc::new(HttpTransferService::new(
            http_client.clone(),
            settings.download_dir.clone(),
        ));

        let catalog_path = settings.resolved_catalog_path(&data_dir);
        let catalog = match Catalog::load(&catalog_path).await {
            Ok(catalog) => catalog,
            Err(e) => {
                error!("Region catalog unavailable, starting empty: {}", e);
                Catalog::default()
            }
        };

        let queue = QueueCoordinator::spawn(
            catalog.clone(),
            transfers.clone(),
            QueueConfig {
                base_url: settings.base_url.clone(),
                file_suffix: settings.file_suffix.clone(),
                download_dir: settings.download_dir.clone(),
            },
        );
        let disk = DiskSpace::new(settings.download_dir.clone());

        info!(
            "Map downloader ready: {} regions, downloads in {:?}",
            catalog.len(),
            settings.download_dir
        );

        Ok(Self {
            data_dir,
            settings,
            http_client,
            catalog,
            transfers,
            queue,
            disk,
        })
    }

    /// Browse root with live statuses.
    pub async fn continent(&self) -> MapResult<Option<Region>> {
        let roots = self.queue.snapshot().await?;
        Ok(roots.first().map(|root| Region {
            subregions: root.sorted_subregions(),
            ..root.clone()
        }))
    }

    pub fn save_settings(&self) -> MapResult<()> {
        self.settings.save(&self.data_dir)
    }
}

fn create_dir(path: &Path) -> MapResult<()> {
    std::fs::create_dir_all(path).map_err(|source| MapError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}
