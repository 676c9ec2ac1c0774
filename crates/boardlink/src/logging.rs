use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;

/// Crates whose events follow `--log-level`; everything else is held at warn.
const BOARDLINK_TARGETS: [&str; 4] = [
    "boardlink",
    "boardlink_transport",
    "boardlink_frame",
    "boardlink_mux",
];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
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

fn targets(level: LogLevel) -> Targets {
    let level = LevelFilter::from(level);
    BOARDLINK_TARGETS
        .iter()
        .fold(Targets::new().with_default(LevelFilter::WARN), |targets, name| {
            targets.with_target(*name, level)
        })
}

/// Install the stderr subscriber. Stdout stays reserved for frame output
/// and relayed process output.
///
/// Thread names are kept so events from the connection's reader thread
/// can be told apart from the caller's.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let filter = targets(level);
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_thread_names(true);

    let _ = match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(layer.with_filter(filter))
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(layer.json().with_filter(filter))
            .try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boardlink_targets_follow_the_requested_level() {
        let filter = targets(LogLevel::Debug);
        assert!(filter.would_enable("boardlink_mux::connection", &tracing::Level::DEBUG));
        assert!(filter.would_enable("boardlink", &tracing::Level::DEBUG));
        assert!(!filter.would_enable("boardlink_frame::parser", &tracing::Level::TRACE));
    }

    #[test]
    fn other_crates_stay_at_warn() {
        let filter = targets(LogLevel::Trace);
        assert!(filter.would_enable("mio::poll", &tracing::Level::WARN));
        assert!(!filter.would_enable("mio::poll", &tracing::Level::INFO));
    }
}
