use serde::Serialize;
use tokio::sync::oneshot;

use crate::core::error::MapResult;
use crate::core::region::{Region, RegionStatus, StatusListener};

/// Fired after every transfer ends (success, cancellation, failure) and
/// after every deletion.
pub type CompletionListener = Box<dyn Fn() + Send + Sync>;

/// Requests handled by the coordinator, one at a time.
pub(crate) enum QueueCommand {
    Toggle {
        download_id: String,
        reply: oneshot::Sender<MapResult<RegionStatus>>,
    },
    Delete {
        download_id: String,
        reply: oneshot::Sender<MapResult<()>>,
    },
    SetCompletionListener {
        listener: Option<CompletionListener>,
        reply: oneshot::Sender<()>,
    },
    Subscribe {
        download_id: String,
        listener: StatusListener,
        reply: oneshot::Sender<MapResult<()>>,
    },
    Unsubscribe {
        download_id: String,
        reply: oneshot::Sender<bool>,
    },
    Status {
        download_id: String,
        reply: oneshot::Sender<Option<RegionStatus>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Region>>,
    },
    QueueStatus {
        reply: oneshot::Sender<QueueStatus>,
    },
    Reconcile {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Reported by transfer tasks back to the coordinator.
#[derive(Debug)]
pub(crate) enum TransferEvent {
    Progress { transfer_id: u64, progress: f64 },
    Finished { transfer_id: u64, result: MapResult<()> },
}

/// Point-in-time view of the queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStatus {
    /// Region currently transferring, if any.
    pub active: Option<String>,
    /// Waiting regions, head first.
    pub pending: Vec<String>,
}
