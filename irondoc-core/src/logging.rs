// logging.rs - tracing setup for embedders and tests
//
// The library itself only emits `tracing` events; nothing is printed unless
// the host installs a subscriber. These helpers install a fmt subscriber with
// an EnvFilter.

use std::str::FromStr;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::error::IronDocError;

/// Verbosity accepted in `StoreConfig::log_level`, least verbose first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Error,
    /// Conflicts, exhausted retries, failed rebuilds
    #[default]
    Warn,
    /// Index creation and rebuilds, maintenance runs
    Info,
    /// Transaction lifecycle, chosen query plans
    Debug,
    /// Page-level reads and writes
    Trace,
}

const ALL_LEVELS: [LogLevel; 5] = [
    LogLevel::Error,
    LogLevel::Warn,
    LogLevel::Info,
    LogLevel::Debug,
    LogLevel::Trace,
];

impl LogLevel {
    /// Lowercase name, also a valid `EnvFilter` directive
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::default().add_directive(LevelFilter::from(*self).into())
    }
}

/// Case-insensitive, surrounding whitespace ignored
impl FromStr for LogLevel {
    type Err = IronDocError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        ALL_LEVELS
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| IronDocError::Config(format!("unknown log level '{}'", name)))
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

fn install(filter: EnvFilter) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Install a global fmt subscriber filtered at `level`.
///
/// Returns `false` when a subscriber was already installed (tests call this
/// repeatedly; only the first call wins).
pub fn init_logging(level: LogLevel) -> bool {
    install(level.filter())
}

/// Like [`init_logging`], but `RUST_LOG` takes precedence over `default`.
pub fn init_logging_from_env(default: LogLevel) -> bool {
    install(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.filter()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_grow_more_verbose() {
        for pair in ALL_LEVELS.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(LevelFilter::from(pair[0]) < LevelFilter::from(pair[1]));
        }
    }

    #[test]
    fn test_parse_ignores_case() {
        assert_eq!("DeBuG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!(" warn ".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!(matches!(
            "chatty".parse::<LogLevel>(),
            Err(IronDocError::Config(_))
        ));
        for level in ALL_LEVELS {
            assert_eq!(level.as_str().parse::<LogLevel>().unwrap(), level);
        }
    }

    #[test]
    fn test_second_init_is_noop() {
        init_logging(LogLevel::Debug);
        assert!(!init_logging(LogLevel::Trace));
    }
}
