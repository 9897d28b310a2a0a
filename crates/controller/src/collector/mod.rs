pub mod inventory;
pub mod logs;
pub mod metrics;
pub mod retention;

pub use inventory::InventoryCache;
pub use logs::{LogCollector, LogCursor};
pub use metrics::MetricsCollector;
