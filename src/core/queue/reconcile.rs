// ─── Disk State Reconciliation ───
// Startup helpers matching the download directory and a surviving transfer
// back to catalog entries. The coordinator applies the results.

use std::path::Path;

use tracing::debug;

use crate::core::catalog::Catalog;
use crate::core::downloader::{download_id_from_file_name, RunningTransfer};
use crate::core::error::{MapError, MapResult};

/// Identifiers of every catalog region whose artifact is present in `dir`.
pub async fn downloaded_ids(dir: &Path, catalog: &Catalog, suffix: &str) -> MapResult<Vec<String>> {
    let mut ids = Vec::new();

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|source| MapError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

    while let Some(entry) = entries.next_entry().await.map_err(|source| MapError::Io {
        path: dir.to_path_buf(),
        source,
    })? {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        match download_id_from_file_name(file_name, suffix) {
            Some(id) if catalog.contains(id) => ids.push(id.to_string()),
            Some(id) => debug!("Ignoring {} (no catalog entry {})", file_name, id),
            None => {}
        }
    }

    ids.sort();
    Ok(ids)
}

/// Map a surviving transfer back to a downloadable catalog region.
pub fn resumable_id(task: &RunningTransfer, catalog: &Catalog, suffix: &str) -> Option<String> {
    let id = task.request.download_id(suffix)?;
    let region = catalog.get(&id)?;
    region.is_leaf().then_some(id)
}
