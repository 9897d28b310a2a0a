pub mod client;
pub mod ids;
pub mod similar;

pub use client::{DashboardSummary, IndexClient, LatestStat, LogSearchQuery, LogSearchResult, TimeSeriesByHost, TimeSeriesPoint};
