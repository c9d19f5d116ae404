// ─── Map Downloader Core ───
// Offline map region catalog with a single-flight download queue.
//
// Architecture:
//   core/
//     region/     - Region node, download status, per-node status listeners
//     catalog/    - Streaming XML catalog parser + indexed region tree
//     downloader/ - Transfer requests, transfer service trait, HTTP service
//     queue/      - Download queue coordinator + disk reconciliation
//     storage/    - Free/total space of the download volume
//     state/      - Settings + application bootstrap

pub mod catalog;
pub mod downloader;
pub mod error;
pub mod http;
pub mod queue;
pub mod region;
pub mod state;
pub mod storage;
