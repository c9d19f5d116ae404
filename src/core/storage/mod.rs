mod disk;

pub use disk::{format_bytes, DiskSpace, DiskUsage};
