use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::Serialize;

/// Download lifecycle of a single region.
///
/// Leaves move `Available → Pending → Downloading → Downloaded`. Going back to
/// `Available` only happens through cancellation or deletion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionStatus {
    Available,
    Pending,
    /// Fraction in `0.0..=1.0`.
    Downloading(f64),
    Downloaded,
}

impl RegionStatus {
    pub fn is_downloading(&self) -> bool {
        matches!(self, RegionStatus::Downloading(_))
    }
}

impl Default for RegionStatus {
    fn default() -> Self {
        RegionStatus::Available
    }
}

impl std::fmt::Display for RegionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegionStatus::Available => write!(f, "available"),
            RegionStatus::Pending => write!(f, "pending"),
            RegionStatus::Downloading(p) => write!(f, "downloading ({:.0}%)", p * 100.0),
            RegionStatus::Downloaded => write!(f, "downloaded"),
        }
    }
}

/// A node of the catalog tree.
///
/// A region without subregions is a leaf and can be downloaded; a region with
/// subregions is only browsable. Equality and ordering use `name` alone so
/// sibling lists sort the way they are displayed.
#[derive(Debug, Clone, Serialize)]
pub struct Region {
    pub name: String,
    /// Unique across the whole tree. Names the artifact on disk.
    pub download_id: String,
    pub subregions: Vec<Region>,
    pub(crate) status: RegionStatus,
}

impl Region {
    pub fn new(name: impl Into<String>, download_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            download_id: download_id.into(),
            subregions: Vec::new(),
            status: RegionStatus::Available,
        }
    }

    pub fn status(&self) -> RegionStatus {
        self.status
    }

    pub fn is_leaf(&self) -> bool {
        self.subregions.is_empty()
    }

    /// Children ordered by name, for display.
    pub fn sorted_subregions(&self) -> Vec<Region> {
        let mut sorted = self.subregions.clone();
        sorted.sort();
        sorted
    }

    /// Depth-first walk over this node and every descendant.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Region)) {
        visit(self);
        for child in &self.subregions {
            child.walk(visit);
        }
    }
}

impl PartialEq for Region {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Region {}

impl Hash for Region {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for Region {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Region {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}
