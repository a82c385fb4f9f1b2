// Core modules
pub mod config;
pub mod service;

// Re-export commonly used types
pub use config::{BookmarksConfig, Config, DatabaseConfig, LogConfig, MetricsConfig};
pub use service::{ExpireHistoryArgs, HistoryService, HistoryStats};

// Re-export crate modules
pub use history_expiry as expiry;
pub use history_storage as storage;
pub use history_types as types;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get client version string
pub fn client_version() -> String {
    format!("history-rust/v{}/rust", VERSION)
}
