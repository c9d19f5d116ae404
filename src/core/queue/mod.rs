mod command;
mod coordinator;
pub mod reconcile;

pub use command::{CompletionListener, QueueStatus};
pub use coordinator::{QueueConfig, QueueCoordinator, QueueHandle};
