mod budget;
mod service;

pub use budget::{next_local_midnight, DayBudget};
pub use service::BandwidthService;
