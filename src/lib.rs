pub mod bootstrap;
pub mod settings;
pub mod telemetry;

pub use bootstrap::Bootstrap;
pub use settings::{load_config, load_spec};
