use anyhow::Result;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Application-specific log filter, consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "BISTRO_LOG";

static SUBSCRIBER_GUARD: OnceLock<()> = OnceLock::new();

/// Filter from `BISTRO_LOG`, then `RUST_LOG`, then `fallback`.
pub fn filter_from_env(fallback: &str) -> EnvFilter {
    resolve_filter(
        std::env::var(LOG_ENV).ok(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        fallback,
    )
}

/// Picks the first directive string that parses. Invalid values are skipped
/// with a note on stderr, since no subscriber exists yet to log through.
fn resolve_filter(
    bistro_log: Option<String>,
    rust_log: Option<String>,
    fallback: &str,
) -> EnvFilter {
    for (source, directives) in [(LOG_ENV, bistro_log), (EnvFilter::DEFAULT_ENV, rust_log)] {
        let Some(directives) = directives.filter(|value| !value.trim().is_empty()) else {
            continue;
        };
        match EnvFilter::try_new(&directives) {
            Ok(filter) => return filter,
            Err(err) => eprintln!("ignoring {source}={directives}: {err}"),
        }
    }
    EnvFilter::new(fallback)
}

/// Install the global tracing subscriber for the Bistro binaries.
///
/// Safe to call more than once; only the first call installs a subscriber.
/// Output goes to stderr so the kitchen board on stdout stays readable.
pub fn init_tracing(filter: EnvFilter) -> Result<()> {
    if SUBSCRIBER_GUARD.get().is_some() {
        return Ok(());
    }

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false));
    tracing::subscriber::set_global_default(subscriber)?;
    SUBSCRIBER_GUARD.set(()).ok();

    Ok(())
}
