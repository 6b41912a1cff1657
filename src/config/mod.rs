//! Configuration for stackend-realtime
//!
//! - `macros`: the `config_struct!` definition helper
//! - `schemas`: `Config`, `RealtimeConfig` and the `Community` descriptor
//! - `utils`: loading/saving and connection address construction
pub mod macros;
pub mod schemas;
pub mod utils;

pub use schemas::{Community, Config, RealtimeConfig};
pub use utils::{load_config_from_path, save_config, CONFIG_FILE_PATH};
