use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Installs the global tracing subscriber: a plain `fmt` layer to stdout,
/// plus an optional daily-rolling file layer when `log_dir` is set.
///
/// Simplified from `tui/src/core/log`'s `CustomEventFormatter`/
/// `SharedWriter` machinery, which exists to feed an in-process TUI log
/// pane this headless daemon doesn't have.
///
/// # Panics
///
/// Panics if a global subscriber has already been installed.
pub fn init(log_level: &str, log_dir: Option<&std::path::Path>) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(true);

    let registry = tracing_subscriber::registry().with(filter).with(stdout_layer);

    if let Some(dir) = log_dir {
        let file_appender = tracing_appender::rolling::daily(dir, "edgeforce-gateway.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Leaked deliberately: the guard must outlive the process for the
        // non-blocking writer to flush on every log line, and this is only
        // ever called once at startup.
        Box::leak(Box::new(guard));
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(non_blocking);
        registry.with(file_layer).init();
    } else {
        registry.init();
    }
}
