//! Flight-log tooling for Aerolab: batch conversion of binary logs to CSV
//! through an external dump tool, flattening dumped CSVs into nested
//! message/field tables, and smoothing filters for noisy channels.

pub mod convert;
pub mod error;
pub mod flatten;
pub mod smooth;

pub use convert::{convert_tree, ConvertOptions, ConvertSummary};
pub use error::{LogError, LogResult};
pub use flatten::LogTable;
pub use smooth::savitzky_golay;
