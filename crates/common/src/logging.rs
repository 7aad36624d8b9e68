use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Install the global subscriber: a stdout layer (WARN+, raised to INFO by
/// `-v` and DEBUG by `-d`) and a daily-rolling `logs/<service>.log` layer
/// (INFO+, DEBUG with `-d`).
///
/// The returned guard must be held for the life of the process; dropping it
/// stops the background log writer.
pub fn init_logging(service: &str, verbose: bool, debug: bool) -> WorkerGuard {
    let stdout_level = if debug {
        LevelFilter::DEBUG
    } else if verbose {
        LevelFilter::INFO
    } else {
        LevelFilter::WARN
    };
    let file_level = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let file_appender = tracing_appender::rolling::daily("logs", format!("{service}.log"));
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(stdout_level);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(false)
        .with_filter(file_level);

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .init();

    guard
}
