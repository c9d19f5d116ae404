mod client;
mod request;
mod service;

pub use client::HttpTransferService;
pub use request::{
    artifact_file_name, download_id_from_file_name, TransferRequest, DEFAULT_BASE_URL,
    DEFAULT_FILE_SUFFIX, DOWNLOAD_PATH,
};
pub use service::{ProgressCallback, RunningTransfer, TransferService};
