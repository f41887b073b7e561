mod data_size;
mod file_count;
mod probe;
mod quota;
mod stats;

pub use probe::DbStatsProbe;
pub use quota::QuotaFilter;
pub use stats::{fs_usable_size, journal_files_size, DbStats, StatsSource};

pub(crate) use data_size::DataSizeMonitor;
pub(crate) use file_count::FileCountMonitor;
