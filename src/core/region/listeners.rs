use std::collections::HashMap;

use super::model::RegionStatus;

/// Called synchronously on every status write of one region. Must not block.
pub type StatusListener = Box<dyn Fn(RegionStatus) + Send + Sync>;

/// One listener per region, keyed by `download_id`.
///
/// Subscribing again for the same region replaces the previous listener.
#[derive(Default)]
pub struct StatusListeners {
    listeners: HashMap<String, StatusListener>,
}

impl StatusListeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `listener` for `download_id`. Returns `true` if one was replaced.
    pub fn subscribe(&mut self, download_id: impl Into<String>, listener: StatusListener) -> bool {
        self.listeners
            .insert(download_id.into(), listener)
            .is_some()
    }

    pub fn unsubscribe(&mut self, download_id: &str) -> bool {
        self.listeners.remove(download_id).is_some()
    }

    pub fn notify(&self, download_id: &str, status: RegionStatus) {
        if let Some(listener) = self.listeners.get(download_id) {
            listener(status);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl std::fmt::Debug for StatusListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusListeners")
            .field("regions", &self.listeners.keys().collect::<Vec<_>>())
            .finish()
    }
}
