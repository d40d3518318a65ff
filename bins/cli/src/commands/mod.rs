//! CLI command handlers.

pub mod config;
pub mod sync;

pub use config::run_config_show;
pub use sync::{SyncCommandInput, run_sync};
