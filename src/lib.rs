pub mod core;

use tracing_subscriber::EnvFilter;

pub use crate::core::catalog::Catalog;
pub use crate::core::error::{MapError, MapResult};
pub use crate::core::queue::{QueueCoordinator, QueueHandle};
pub use crate::core::region::{Region, RegionStatus};
pub use crate::core::state::AppState;

/// Install the global fmt subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,map_downloader=debug")),
        )
        .try_init();
}
