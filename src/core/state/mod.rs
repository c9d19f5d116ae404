mod app_state;
mod settings;

pub use app_state::{default_data_dir, AppState};
pub use settings::MapSettings;
