use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::request::TransferRequest;
use super::service::{ProgressCallback, RunningTransfer, TransferService};
use crate::core::error::{MapError, MapResult};

/// Written next to the downloads while a transfer runs, so the transfer can
/// be found again after the process is restarted.
const MARKER_FILE: &str = ".active-transfer.json";
const PART_SUFFIX: &str = ".part";

#[derive(Debug, Serialize, Deserialize)]
struct TransferMarker {
    url: String,
}

/// Streaming HTTP transfer service writing into one destination directory.
///
/// Data goes to `<file>.part` and is renamed to `<file>` once complete.
pub struct HttpTransferService {
    client: Client,
    destination: PathBuf,
    /// Newest registered transfer. Owns the marker file.
    active: Mutex<Option<SlotEntry>>,
}

/// Identity of a registered transfer: its cancel flag and partial file.
struct SlotEntry {
    cancelled: Arc<AtomicBool>,
    part: PathBuf,
}

impl HttpTransferService {
    pub fn new(client: Client, destination: PathBuf) -> Self {
        Self {
            client,
            destination,
            active: Mutex::new(None),
        }
    }

    fn marker_path(&self) -> PathBuf {
        self.destination.join(MARKER_FILE)
    }

    fn part_path(&self, file_name: &str) -> PathBuf {
        self.destination.join(format!("{file_name}{PART_SUFFIX}"))
    }

    async fn transfer(
        &self,
        request: &TransferRequest,
        progress: &ProgressCallback,
        resume: bool,
    ) -> MapResult<()> {
        let file_name = request
            .file_name()
            .ok_or_else(|| MapError::Other(format!("Request has no file name: {request}")))?;

        create_dir(&self.destination).await?;

        let cancelled = Arc::new(AtomicBool::new(false));
        let mut guard = ActiveTransfer::register(
            &self.active,
            Arc::clone(&cancelled),
            self.marker_path(),
            self.part_path(&file_name),
        );

        self.write_marker(request).await?;
        let result = self
            .fetch(request, &file_name, progress, resume, &cancelled)
            .await;
        // Terminal outcome: nothing left to rediscover.
        guard.finish();
        result
    }

    async fn fetch(
        &self,
        request: &TransferRequest,
        file_name: &str,
        progress: &ProgressCallback,
        resume: bool,
        cancelled: &AtomicBool,
    ) -> MapResult<()> {
        let part_path = self.part_path(file_name);
        let final_path = self.destination.join(file_name);

        let existing_bytes = if resume {
            tokio::fs::metadata(&part_path)
                .await
                .map(|m| m.len())
                .unwrap_or(0)
        } else {
            0
        };

        let mut http_request = self.client.get(request.url.clone());
        if existing_bytes > 0 {
            http_request = http_request.header(RANGE, format!("bytes={existing_bytes}-"));
        }

        let response = http_request.send().await?;
        if cancelled.load(Ordering::SeqCst) {
            return Err(MapError::TransferCancelled);
        }
        let status = response.status();
        if !status.is_success() {
            return Err(MapError::DownloadFailed {
                url: request.url.to_string(),
                status: status.as_u16(),
            });
        }

        // A server that ignores the range sends the whole file again.
        let offset = if existing_bytes > 0 && status == StatusCode::PARTIAL_CONTENT {
            info!("Resuming {} at byte {}", file_name, existing_bytes);
            existing_bytes
        } else {
            0
        };
        let total_bytes = response.content_length().map(|len| len + offset);

        let mut file = if offset > 0 {
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(&part_path)
                .await
        } else {
            tokio::fs::File::create(&part_path).await
        }
        .map_err(|source| MapError::Io {
            path: part_path.clone(),
            source,
        })?;

        let mut written = offset;
        report(progress, written, total_bytes);

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if cancelled.load(Ordering::SeqCst) {
                debug!("Transfer of {} cancelled", file_name);
                return Err(MapError::TransferCancelled);
            }

            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|source| MapError::Io {
                    path: part_path.clone(),
                    source,
                })?;
            written += chunk.len() as u64;
            report(progress, written, total_bytes);
        }

        file.flush().await.map_err(|source| MapError::Io {
            path: part_path.clone(),
            source,
        })?;
        // Handle must be closed before the rename on Windows.
        drop(file);

        if cancelled.load(Ordering::SeqCst) {
            return Err(MapError::TransferCancelled);
        }

        if tokio::fs::try_exists(&final_path).await.unwrap_or(false) {
            tokio::fs::remove_file(&final_path)
                .await
                .map_err(|source| MapError::Io {
                    path: final_path.clone(),
                    source,
                })?;
        }
        tokio::fs::rename(&part_path, &final_path)
            .await
            .map_err(|source| MapError::Io {
                path: final_path.clone(),
                source,
            })?;

        info!("Downloaded {} ({} bytes) -> {:?}", file_name, written, final_path);
        Ok(())
    }

    async fn write_marker(&self, request: &TransferRequest) -> MapResult<()> {
        let marker = TransferMarker {
            url: request.url.to_string(),
        };
        let json = serde_json::to_string(&marker)?;
        let path = self.marker_path();
        tokio::fs::write(&path, json)
            .await
            .map_err(|source| MapError::Io { path, source })
    }
}

#[async_trait]
impl TransferService for HttpTransferService {
    async fn start(&self, request: TransferRequest, progress: ProgressCallback) -> MapResult<()> {
        debug!("Starting transfer {}", request);
        self.transfer(&request, &progress, false).await
    }

    fn cancel_active(&self) {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = active.as_ref() {
            entry.cancelled.store(true, Ordering::SeqCst);
        }
    }

    async fn current_running_task(&self) -> Option<RunningTransfer> {
        let raw = tokio::fs::read_to_string(self.marker_path()).await.ok()?;
        let marker: TransferMarker = match serde_json::from_str(&raw) {
            Ok(marker) => marker,
            Err(e) => {
                warn!("Corrupt transfer marker {:?}: {}", self.marker_path(), e);
                return None;
            }
        };
        let request = TransferRequest::from_url(&marker.url).ok()?;
        Some(RunningTransfer { request })
    }

    async fn reattach(&self, task: RunningTransfer, progress: ProgressCallback) -> MapResult<()> {
        debug!("Reattaching to transfer {}", task.request);
        self.transfer(&task.request, &progress, true).await
    }
}

/// Registration of a running transfer.
///
/// A newer registration takes the slot over, and with it the marker file.
/// On drop the transfer removes only what it still owns: the marker while it
/// holds the slot, the partial file unless a newer transfer writes to the same
/// path. A finished transfer drops its marker, a cancelled one also its partial
/// file. A transfer that is merely dropped (runtime shutdown) keeps both so it
/// can be resumed.
struct ActiveTransfer<'a> {
    slot: &'a Mutex<Option<SlotEntry>>,
    cancelled: Arc<AtomicBool>,
    marker: PathBuf,
    part: PathBuf,
    finished: bool,
}

impl<'a> ActiveTransfer<'a> {
    fn register(
        slot: &'a Mutex<Option<SlotEntry>>,
        cancelled: Arc<AtomicBool>,
        marker: PathBuf,
        part: PathBuf,
    ) -> Self {
        *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(SlotEntry {
            cancelled: Arc::clone(&cancelled),
            part: part.clone(),
        });
        Self {
            slot,
            cancelled,
            marker,
            part,
            finished: false,
        }
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}

impl Drop for ActiveTransfer<'_> {
    fn drop(&mut self) {
        // Held across the removals so a newer transfer cannot register halfway.
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        let cancelled = self.cancelled.load(Ordering::SeqCst);

        let owned = slot
            .as_ref()
            .is_some_and(|entry| Arc::ptr_eq(&entry.cancelled, &self.cancelled));
        if owned {
            *slot = None;
            if self.finished || cancelled {
                let _ = std::fs::remove_file(&self.marker);
            }
            if cancelled {
                let _ = std::fs::remove_file(&self.part);
            }
        } else if cancelled {
            let part_reused = slot.as_ref().is_some_and(|entry| entry.part == self.part);
            if !part_reused {
                let _ = std::fs::remove_file(&self.part);
            }
        }
    }
}

fn report(progress: &ProgressCallback, written: u64, total: Option<u64>) {
    if let Some(total) = total.filter(|t| *t > 0) {
        progress((written as f64 / total as f64).min(1.0));
    }
}

async fn create_dir(path: &Path) -> MapResult<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| MapError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::downloader::DEFAULT_FILE_SUFFIX;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<f64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |p| sink.lock().unwrap().push(p));
        (callback, seen)
    }

    fn service(dir: &Path) -> HttpTransferService {
        HttpTransferService::new(Client::new(), dir.to_path_buf())
    }

    fn request(server: &MockServer, id: &str) -> TransferRequest {
        TransferRequest::for_region(&format!("{}/", server.uri()), id, DEFAULT_FILE_SUFFIX)
            .unwrap()
    }

    #[tokio::test]
    async fn downloads_into_destination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download"))
            .and(query_param("standard", "yes"))
            .and(query_param("file", "Ireland_europe_2.obf.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let (progress, seen) = recorder();

        service
            .start(request(&server, "Ireland"), progress)
            .await
            .unwrap();

        let final_path = dir.path().join("Ireland_europe_2.obf.zip");
        assert_eq!(std::fs::read(&final_path).unwrap().len(), 4096);
        assert!(!dir.path().join("Ireland_europe_2.obf.zip.part").exists());
        assert!(!dir.path().join(MARKER_FILE).exists());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.last().copied(), Some(1.0));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(service.current_running_task().await.is_none());
    }

    #[tokio::test]
    async fn http_error_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (progress, _) = recorder();
        let err = service(dir.path())
            .start(request(&server, "Ireland"), progress)
            .await
            .unwrap_err();

        assert!(matches!(err, MapError::DownloadFailed { status: 404, .. }));
        assert!(!dir.path().join("Ireland_europe_2.obf.zip").exists());
        assert!(!dir.path().join(MARKER_FILE).exists());
    }

    #[tokio::test]
    async fn rediscovers_and_resumes_persisted_transfer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("range", "bytes=5-"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"world".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let req = request(&server, "France");
        let marker = serde_json::to_string(&TransferMarker {
            url: req.url.to_string(),
        })
        .unwrap();
        std::fs::write(dir.path().join(MARKER_FILE), marker).unwrap();
        std::fs::write(dir.path().join("France_europe_2.obf.zip.part"), b"hello").unwrap();

        let service = service(dir.path());
        let task = service.current_running_task().await.unwrap();
        assert_eq!(task.request, req);

        let (progress, seen) = recorder();
        service.reattach(task, progress).await.unwrap();

        let body = std::fs::read(dir.path().join("France_europe_2.obf.zip")).unwrap();
        assert_eq!(body, b"helloworld");
        assert_eq!(seen.lock().unwrap().first().copied(), Some(0.5));
        assert!(service.current_running_task().await.is_none());
    }

    #[tokio::test]
    async fn corrupt_marker_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MARKER_FILE), "not json").unwrap();
        assert!(service(dir.path()).current_running_task().await.is_none());
    }

    #[tokio::test]
    async fn cancel_active_stops_the_transfer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![1u8; 1024])
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(service(dir.path()));
        let req = request(&server, "Ireland");

        let running = Arc::clone(&service);
        let task = tokio::spawn(async move {
            let (progress, _) = recorder();
            running.start(req, progress).await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(service.current_running_task().await.is_some());
        service.cancel_active();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert!(!dir.path().join("Ireland_europe_2.obf.zip").exists());
        assert!(!dir.path().join("Ireland_europe_2.obf.zip.part").exists());
        assert!(!dir.path().join(MARKER_FILE).exists());
    }

    fn delayed(millis: u64) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .set_body_bytes(vec![3u8; 1024])
            .set_delay(Duration::from_millis(millis))
    }

    #[tokio::test]
    async fn cancelled_transfer_leaves_successor_marker() {
        let server = MockServer::start().await;
        Mock::given(query_param("file", "Ireland_europe_2.obf.zip"))
            .respond_with(delayed(400))
            .mount(&server)
            .await;
        Mock::given(query_param("file", "France_europe_2.obf.zip"))
            .respond_with(delayed(1500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(service(dir.path()));

        let first = Arc::clone(&service);
        let ireland = request(&server, "Ireland");
        let cancelled = tokio::spawn(async move {
            let (progress, _) = recorder();
            first.start(ireland, progress).await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        service.cancel_active();

        let second = Arc::clone(&service);
        let france = request(&server, "France");
        let expected = france.clone();
        let successor = tokio::spawn(async move {
            let (progress, _) = recorder();
            second.start(france, progress).await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cancelled.await.unwrap().unwrap_err().is_cancelled());
        let running = service.current_running_task().await.unwrap();
        assert_eq!(running.request, expected);

        successor.await.unwrap().unwrap();
        assert!(dir.path().join("France_europe_2.obf.zip").exists());
        assert!(!dir.path().join("Ireland_europe_2.obf.zip").exists());
        assert!(!dir.path().join(MARKER_FILE).exists());
    }

    #[tokio::test]
    async fn restarting_same_region_keeps_new_transfer_files() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(delayed(400))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(delayed(1000))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(service(dir.path()));
        let req = request(&server, "Ireland");

        let first = Arc::clone(&service);
        let stale = req.clone();
        let cancelled = tokio::spawn(async move {
            let (progress, _) = recorder();
            first.start(stale, progress).await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        service.cancel_active();

        let second = Arc::clone(&service);
        let fresh = req.clone();
        let restarted = tokio::spawn(async move {
            let (progress, _) = recorder();
            second.start(fresh, progress).await
        });

        assert!(cancelled.await.unwrap().unwrap_err().is_cancelled());
        assert_eq!(service.current_running_task().await.unwrap().request, req);

        restarted.await.unwrap().unwrap();
        let body = std::fs::read(dir.path().join("Ireland_europe_2.obf.zip")).unwrap();
        assert_eq!(body.len(), 1024);
        assert!(!dir.path().join("Ireland_europe_2.obf.zip.part").exists());
        assert!(!dir.path().join(MARKER_FILE).exists());
    }
}
