// ─── Download Queue Coordinator ───
// Single actor owning the FIFO queue, the active transfer, the completion
// listener and every region status write. At most one transfer runs.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::command::{CompletionListener, QueueCommand, QueueStatus, TransferEvent};
use super::reconcile;
use crate::core::catalog::Catalog;
use crate::core::downloader::{
    artifact_file_name, ProgressCallback, RunningTransfer, TransferRequest, TransferService,
};
use crate::core::error::{MapError, MapResult};
use crate::core::region::{Region, RegionStatus, StatusListener, StatusListeners};

/// Where transfers come from and where their artifacts land.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub base_url: String,
    pub file_suffix: String,
    pub download_dir: PathBuf,
}

/// Cloneable handle to a running [`QueueCoordinator`].
#[derive(Debug, Clone)]
pub struct QueueHandle {
    command_tx: mpsc::Sender<QueueCommand>,
}

impl QueueHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> QueueCommand,
    ) -> MapResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| MapError::CoordinatorShutdown)?;
        reply_rx.await.map_err(|_| MapError::CoordinatorShutdown)
    }

    /// Queue, dequeue or cancel a region depending on its status. Returns the
    /// status after the toggle.
    pub async fn toggle(&self, download_id: &str) -> MapResult<RegionStatus> {
        self.request(|reply| QueueCommand::Toggle {
            download_id: download_id.to_string(),
            reply,
        })
        .await?
    }

    /// Remove a region's artifact from disk and mark it available.
    pub async fn delete_downloaded_file(&self, download_id: &str) -> MapResult<()> {
        self.request(|reply| QueueCommand::Delete {
            download_id: download_id.to_string(),
            reply,
        })
        .await?
    }

    /// Replace the completion listener.
    pub async fn set_completion_listener<F>(&self, listener: F) -> MapResult<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.request(|reply| QueueCommand::SetCompletionListener {
            listener: Some(Box::new(listener)),
            reply,
        })
        .await
    }

    pub async fn clear_completion_listener(&self) -> MapResult<()> {
        self.request(|reply| QueueCommand::SetCompletionListener {
            listener: None,
            reply,
        })
        .await
    }

    /// Replace the status listener of one region.
    pub async fn subscribe<F>(&self, download_id: &str, listener: F) -> MapResult<()>
    where
        F: Fn(RegionStatus) + Send + Sync + 'static,
    {
        self.request(|reply| QueueCommand::Subscribe {
            download_id: download_id.to_string(),
            listener: Box::new(listener),
            reply,
        })
        .await?
    }

    pub async fn unsubscribe(&self, download_id: &str) -> MapResult<bool> {
        self.request(|reply| QueueCommand::Unsubscribe {
            download_id: download_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn status(&self, download_id: &str) -> MapResult<Option<RegionStatus>> {
        self.request(|reply| QueueCommand::Status {
            download_id: download_id.to_string(),
            reply,
        })
        .await
    }

    /// Root regions with their current statuses.
    pub async fn snapshot(&self) -> MapResult<Vec<Region>> {
        self.request(|reply| QueueCommand::Snapshot { reply }).await
    }

    pub async fn queue_status(&self) -> MapResult<QueueStatus> {
        self.request(|reply| QueueCommand::QueueStatus { reply }).await
    }

    /// Re-run disk state reconciliation.
    pub async fn reconcile(&self) -> MapResult<()> {
        self.request(|reply| QueueCommand::Reconcile { reply }).await
    }

    pub async fn shutdown(&self) -> MapResult<()> {
        self.command_tx
            .send(QueueCommand::Shutdown)
            .await
            .map_err(|_| MapError::CoordinatorShutdown)
    }
}

/// The transfer currently holding the single slot.
struct ActiveTransfer {
    transfer_id: u64,
    download_id: String,
    task: JoinHandle<()>,
}

enum TransferJob {
    Start(TransferRequest),
    Reattach(RunningTransfer),
}

pub struct QueueCoordinator {
    catalog: Catalog,
    listeners: StatusListeners,
    pending: VecDeque<String>,
    active: Option<ActiveTransfer>,
    next_transfer_id: u64,
    completion: Option<CompletionListener>,
    service: Arc<dyn TransferService>,
    config: QueueConfig,
    command_rx: mpsc::Receiver<QueueCommand>,
    event_tx: mpsc::UnboundedSender<TransferEvent>,
    event_rx: mpsc::UnboundedReceiver<TransferEvent>,
}

impl QueueCoordinator {
    pub fn new(
        catalog: Catalog,
        service: Arc<dyn TransferService>,
        config: QueueConfig,
    ) -> (Self, QueueHandle) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            catalog,
            listeners: StatusListeners::new(),
            pending: VecDeque::new(),
            active: None,
            next_transfer_id: 1,
            completion: None,
            service,
            config,
            command_rx,
            event_tx,
            event_rx,
        };
        (coordinator, QueueHandle { command_tx })
    }

    /// Reconcile with disk, then serve commands on a background task.
    pub fn spawn(
        catalog: Catalog,
        service: Arc<dyn TransferService>,
        config: QueueConfig,
    ) -> QueueHandle {
        let (mut coordinator, handle) = Self::new(catalog, service, config);
        tokio::spawn(async move { coordinator.run().await });
        handle
    }

    /// Main coordinator loop. Reconciles once before the first command.
    pub async fn run(&mut self) {
        self.reconcile().await;

        loop {
            tokio::select! {
                biased;

                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event);
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(QueueCommand::Shutdown) | None => break,
                        Some(cmd) => self.handle_command(cmd).await,
                    }
                }
            }
        }

        debug!("Download coordinator stopped");
    }

    async fn handle_command(&mut self, cmd: QueueCommand) {
        match cmd {
            QueueCommand::Toggle { download_id, reply } => {
                let _ = reply.send(self.toggle(&download_id));
            }
            QueueCommand::Delete { download_id, reply } => {
                let _ = reply.send(self.delete_downloaded_file(&download_id).await);
            }
            QueueCommand::SetCompletionListener { listener, reply } => {
                self.completion = listener;
                let _ = reply.send(());
            }
            QueueCommand::Subscribe {
                download_id,
                listener,
                reply,
            } => {
                let _ = reply.send(self.subscribe(download_id, listener));
            }
            QueueCommand::Unsubscribe { download_id, reply } => {
                let _ = reply.send(self.listeners.unsubscribe(&download_id));
            }
            QueueCommand::Status { download_id, reply } => {
                let _ = reply.send(self.catalog.status(&download_id));
            }
            QueueCommand::Snapshot { reply } => {
                let _ = reply.send(self.catalog.roots().to_vec());
            }
            QueueCommand::QueueStatus { reply } => {
                let _ = reply.send(QueueStatus {
                    active: self.active.as_ref().map(|a| a.download_id.clone()),
                    pending: self.pending.iter().cloned().collect(),
                });
            }
            QueueCommand::Reconcile { reply } => {
                self.reconcile().await;
                let _ = reply.send(());
            }
            QueueCommand::Shutdown => {}
        }
    }

    // ── Toggle ──────────────────────────────────────────

    fn toggle(&mut self, download_id: &str) -> MapResult<RegionStatus> {
        let region = self
            .catalog
            .get(download_id)
            .ok_or_else(|| MapError::RegionNotFound(download_id.to_string()))?;
        if !region.is_leaf() {
            return Err(MapError::NotDownloadable(download_id.to_string()));
        }

        match region.status() {
            RegionStatus::Available => self.enqueue(download_id),
            RegionStatus::Pending => self.dequeue(download_id),
            RegionStatus::Downloading(_) => self.cancel(download_id),
            RegionStatus::Downloaded => {}
        }

        Ok(self.catalog.status(download_id).unwrap_or_default())
    }

    fn enqueue(&mut self, download_id: &str) {
        if !self.pending.iter().any(|id| id == download_id) {
            self.pending.push_back(download_id.to_string());
        }
        self.set_status(download_id, RegionStatus::Pending);
        debug!("Queued {} ({} waiting)", download_id, self.pending.len());
        self.advance_queue();
    }

    /// Never started, so the transfer service is not involved.
    fn dequeue(&mut self, download_id: &str) {
        self.pending.retain(|id| id != download_id);
        self.set_status(download_id, RegionStatus::Available);
        debug!("Removed {} from queue", download_id);
    }

    fn cancel(&mut self, download_id: &str) {
        let owns_slot = self
            .active
            .as_ref()
            .is_some_and(|active| active.download_id == download_id);

        if owns_slot {
            self.service.cancel_active();
            if let Some(active) = self.active.take() {
                active.task.abort();
            }
            info!("Cancelled download of {}", download_id);
        }

        self.set_status(download_id, RegionStatus::Available);

        if owns_slot {
            self.notify_completion();
            self.advance_queue();
        }
    }

    // ── Scheduling ──────────────────────────────────────

    /// Start the head of the queue unless a transfer already holds the slot.
    fn advance_queue(&mut self) {
        while self.active.is_none() {
            let Some(download_id) = self.pending.pop_front() else {
                return;
            };

            let request = match TransferRequest::for_region(
                &self.config.base_url,
                &download_id,
                &self.config.file_suffix,
            ) {
                Ok(request) => request,
                Err(e) => {
                    error!("Cannot build request for {}: {}", download_id, e);
                    self.set_status(&download_id, RegionStatus::Available);
                    self.notify_completion();
                    continue;
                }
            };

            info!("Downloading {} from {}", download_id, request);
            self.set_status(&download_id, RegionStatus::Downloading(0.0));
            self.begin_transfer(download_id, TransferJob::Start(request));
        }
    }

    fn begin_transfer(&mut self, download_id: String, job: TransferJob) {
        let transfer_id = self.next_transfer_id;
        self.next_transfer_id += 1;

        let service = Arc::clone(&self.service);
        let events = self.event_tx.clone();
        let progress_events = self.event_tx.clone();
        let progress: ProgressCallback = Arc::new(move |progress| {
            let _ = progress_events.send(TransferEvent::Progress {
                transfer_id,
                progress,
            });
        });

        let task = tokio::spawn(async move {
            let result = match job {
                TransferJob::Start(request) => service.start(request, progress).await,
                TransferJob::Reattach(running) => service.reattach(running, progress).await,
            };
            let _ = events.send(TransferEvent::Finished {
                transfer_id,
                result,
            });
        });

        self.active = Some(ActiveTransfer {
            transfer_id,
            download_id,
            task,
        });
    }

    fn handle_event(&mut self, event: TransferEvent) {
        match event {
            TransferEvent::Progress {
                transfer_id,
                progress,
            } => {
                // Late events of a cancelled transfer land here too.
                let Some(download_id) = self.active_id(transfer_id) else {
                    return;
                };
                if self
                    .catalog
                    .status(&download_id)
                    .is_some_and(|s| s.is_downloading())
                {
                    self.set_status(
                        &download_id,
                        RegionStatus::Downloading(progress.clamp(0.0, 1.0)),
                    );
                }
            }
            TransferEvent::Finished {
                transfer_id,
                result,
            } => {
                let Some(download_id) = self.active_id(transfer_id) else {
                    return;
                };
                self.active = None;

                match result {
                    Ok(()) => {
                        info!("Finished {}", download_id);
                        self.set_status(&download_id, RegionStatus::Downloaded);
                    }
                    Err(e) if e.is_cancelled() => {
                        debug!("Transfer of {} cancelled by the service", download_id);
                        if self
                            .catalog
                            .status(&download_id)
                            .is_some_and(|s| s.is_downloading())
                        {
                            self.set_status(&download_id, RegionStatus::Available);
                        }
                    }
                    Err(e) => {
                        error!("Error while downloading the {} map: {}", download_id, e);
                    }
                }

                self.notify_completion();
                self.advance_queue();
            }
        }
    }

    fn active_id(&self, transfer_id: u64) -> Option<String> {
        self.active
            .as_ref()
            .filter(|active| active.transfer_id == transfer_id)
            .map(|active| active.download_id.clone())
    }

    // ── Deletion ────────────────────────────────────────

    async fn delete_downloaded_file(&mut self, download_id: &str) -> MapResult<()> {
        let status = self
            .catalog
            .status(download_id)
            .ok_or_else(|| MapError::RegionNotFound(download_id.to_string()))?;
        if matches!(status, RegionStatus::Pending | RegionStatus::Downloading(_)) {
            return Err(MapError::Other(format!(
                "{download_id} is queued or downloading"
            )));
        }

        let path = self
            .config
            .download_dir
            .join(artifact_file_name(download_id, &self.config.file_suffix));
        tokio::fs::remove_file(&path)
            .await
            .map_err(|source| MapError::Io {
                path: path.clone(),
                source,
            })?;

        info!("Deleted {:?}", path);
        self.set_status(download_id, RegionStatus::Available);
        self.notify_completion();
        Ok(())
    }

    // ── Reconciliation ──────────────────────────────────

    /// Align statuses with a surviving transfer and the files on disk.
    pub async fn reconcile(&mut self) {
        if self.active.is_none() {
            self.resume_running_transfer().await;
        }

        let downloaded = match reconcile::downloaded_ids(
            &self.config.download_dir,
            &self.catalog,
            &self.config.file_suffix,
        )
        .await
        {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Cannot scan downloads: {}", e);
                Vec::new()
            }
        };

        for download_id in &downloaded {
            match self.catalog.status(download_id) {
                Some(RegionStatus::Available) => {
                    self.set_status(download_id, RegionStatus::Downloaded);
                }
                Some(RegionStatus::Downloaded) | None => {}
                // Queued or transferring regions are owned by the queue.
                Some(RegionStatus::Pending | RegionStatus::Downloading(_)) => {}
            }
        }

        info!("Reconciled downloads: {} on disk", downloaded.len());
    }

    async fn resume_running_transfer(&mut self) {
        let Some(task) = self.service.current_running_task().await else {
            return;
        };

        let Some(download_id) =
            reconcile::resumable_id(&task, &self.catalog, &self.config.file_suffix)
        else {
            // Left running; the service finishes it on its own.
            debug!("Running transfer {} has no catalog region", task.request);
            return;
        };

        info!("Reattaching to running download of {}", download_id);
        self.pending.retain(|id| id != &download_id);
        self.set_status(&download_id, RegionStatus::Downloading(0.0));
        self.begin_transfer(download_id, TransferJob::Reattach(task));
    }

    // ── Notifications ───────────────────────────────────

    fn set_status(&mut self, download_id: &str, status: RegionStatus) {
        if self.catalog.set_status(download_id, status) {
            self.listeners.notify(download_id, status);
        }
    }

    fn subscribe(&mut self, download_id: String, listener: StatusListener) -> MapResult<()> {
        if !self.catalog.contains(&download_id) {
            return Err(MapError::RegionNotFound(download_id));
        }
        self.listeners.subscribe(download_id, listener);
        Ok(())
    }

    fn notify_completion(&self) {
        if let Some(listener) = &self.completion {
            listener();
        }
    }
}
