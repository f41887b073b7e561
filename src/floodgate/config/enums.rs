use serde::Deserialize;
use strum::{Display, EnumString};
use tracing::Level;

/// Log verbosity names accepted in the config file.
#[derive(Deserialize, Copy, Clone, Debug, Eq, PartialEq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl LogLevel {
    /// tracing has no level above ERROR, so critical collapses into it.
    pub fn tracing_level(self) -> Level {
        match self {
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warning => Level::WARN,
            LogLevel::Error | LogLevel::Critical => Level::ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parse_and_map_levels() {
        assert_eq!(LogLevel::from_str("warning").unwrap(), LogLevel::Warning);
        assert_eq!(LogLevel::Warning.tracing_level(), Level::WARN);
        assert_eq!(LogLevel::Critical.tracing_level(), Level::ERROR);
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }
}
