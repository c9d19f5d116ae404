use std::collections::HashMap;
use std::path::Path;

use tracing::info;

use super::parser::CatalogParser;
use crate::core::error::{MapError, MapResult};
use crate::core::region::{Region, RegionStatus};

/// Parsed region tree plus a flat `download_id → node` lookup.
///
/// Nodes own their children by value. The index stores the child-index path
/// from the roots down to each node, so lookups never need back-references.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    roots: Vec<Region>,
    index: HashMap<String, Vec<usize>>,
}

impl Catalog {
    pub(crate) fn from_parts(roots: Vec<Region>, index: HashMap<String, Vec<usize>>) -> Self {
        Self { roots, index }
    }

    /// Parse a catalog document.
    pub fn parse(xml: &str) -> MapResult<Self> {
        CatalogParser::new().parse(xml)
    }

    /// Read and parse the bundled catalog file.
    pub async fn load(path: &Path) -> MapResult<Self> {
        let xml = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| MapError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let catalog = Self::parse(&xml)?;
        info!(
            "Loaded catalog {:?}: {} roots, {} regions",
            path,
            catalog.roots.len(),
            catalog.index.len()
        );
        Ok(catalog)
    }

    pub fn roots(&self) -> &[Region] {
        &self.roots
    }

    /// First root with its subregions sorted by name, the browse entry point.
    pub fn continent(&self) -> Option<Region> {
        let first = self.roots.first()?;
        Some(Region {
            subregions: first.sorted_subregions(),
            ..first.clone()
        })
    }

    pub fn get(&self, download_id: &str) -> Option<&Region> {
        let path = self.index.get(download_id)?;
        let (first, rest) = path.split_first()?;
        let mut node = self.roots.get(*first)?;
        for idx in rest {
            node = node.subregions.get(*idx)?;
        }
        Some(node)
    }

    pub(crate) fn get_mut(&mut self, download_id: &str) -> Option<&mut Region> {
        let path = self.index.get(download_id)?;
        let (first, rest) = path.split_first()?;
        let mut node = self.roots.get_mut(*first)?;
        for idx in rest {
            node = node.subregions.get_mut(*idx)?;
        }
        Some(node)
    }

    pub fn contains(&self, download_id: &str) -> bool {
        self.index.contains_key(download_id)
    }

    pub fn status(&self, download_id: &str) -> Option<RegionStatus> {
        self.get(download_id).map(Region::status)
    }

    /// Write a status. Returns `false` when the id is unknown.
    pub(crate) fn set_status(&mut self, download_id: &str, status: RegionStatus) -> bool {
        match self.get_mut(download_id) {
            Some(region) => {
                region.status = status;
                true
            }
            None => false,
        }
    }

    /// Number of indexed regions.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
