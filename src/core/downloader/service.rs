use std::sync::Arc;

use async_trait::async_trait;

use super::request::TransferRequest;
use crate::core::error::MapResult;

/// Receives the completed fraction (`0.0..=1.0`) of the running transfer.
/// Invoked from the transfer task; must not block.
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// A transfer the service is still running, possibly started by an earlier
/// process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningTransfer {
    /// The request the transfer was originally issued with.
    pub request: TransferRequest,
}

/// Resumable file transfer capability.
///
/// Implementations run one transfer at a time. Keeping it that way is the
/// caller's job; the service never queues.
#[async_trait]
pub trait TransferService: Send + Sync {
    /// Run `request` to completion. Cancellation resolves to
    /// `MapError::TransferCancelled`.
    async fn start(&self, request: TransferRequest, progress: ProgressCallback) -> MapResult<()>;

    /// Ask the running transfer, if any, to stop.
    fn cancel_active(&self);

    /// A transfer that is still in flight, including one left behind by a
    /// previous process.
    async fn current_running_task(&self) -> Option<RunningTransfer>;

    /// Follow an existing transfer to completion instead of starting anew.
    async fn reattach(&self, task: RunningTransfer, progress: ProgressCallback) -> MapResult<()>;
}
