use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter, filter::Targets, fmt, prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

const CRATE_TARGET: &str = "satfolio";

/// Installs the global subscriber, writing to stderr so tables on stdout
/// stay clean. `RUST_LOG` takes precedence over `verbose`.
///
/// Failed refreshes are logged at warn, so they show up even without
/// `--verbose`.
pub fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let app_filter = Targets::new()
        .with_target(CRATE_TARGET, level)
        .with_default(LevelFilter::WARN);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            format!("warn,{CRATE_TARGET}=debug")
        } else {
            "warn".to_string()
        })
    });

    let subscriber = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .pretty()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(app_filter)
        .with(env_filter);
    if subscriber.try_init().is_err() {
        tracing::debug!("Global subscriber already installed");
    }
}
