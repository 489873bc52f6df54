//! Logging setup.
//!
//! Everything in this crate logs through `tracing`; this module only
//! decides where those events go. Logging to stdout is always enabled,
//! at least at the "ERROR" level.
//!
//! The output can be configured with an env var: "AMRSNAP_LOG".
//!
//! See tracing-subscriber's documentation:
//! https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html
//!
//! eg: to set amrsnap's logs to the "debug" level, and all other packages
//! to the "error" level, run the simulation like this:
//!     $ AMRSNAP_LOG="amrsnap=debug,error" ./simulation inputs

use tracing::level_filters::LevelFilter;
use tracing::Subscriber;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::Registry;

use crate::errors::Result;
use crate::errors::SnapshotError;

pub const LOG_ENV_VAR: &str = "AMRSNAP_LOG";

/// Parse a log level name; `None` means "ERROR".
pub fn get_log_level(level: Option<&str>) -> Result<LevelFilter> {
    match level.map(str::to_lowercase).as_deref() {
        None => Ok(LevelFilter::ERROR),
        Some("trace") => Ok(LevelFilter::TRACE),
        Some("debug") => Ok(LevelFilter::DEBUG),
        Some("info") => Ok(LevelFilter::INFO),
        Some("warn") => Ok(LevelFilter::WARN),
        Some("error") => Ok(LevelFilter::ERROR),
        Some(level) => Err(SnapshotError::Config(format!("Wrong log level: {level}"))),
    }
}

/// Compact stdout layer for this crate's events at `log_level`.
pub(crate) fn log_layer<S>(log_level: LevelFilter) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::Layer::default()
        .compact()
        // Show source file
        .with_file(true)
        // Display source code line numbers
        .with_line_number(true)
        // Display the thread ID an event was recorded on
        .with_thread_ids(true)
        .with_filter(Targets::new().with_target("amrsnap", log_level))
}

/// Install the global subscriber.
///
/// If `AMRSNAP_LOG` is set it wins over `log_level`.
pub fn setup(log_level: Option<&str>) -> Result<()> {
    let log_level = get_log_level(log_level)?;
    match std::env::var(LOG_ENV_VAR) {
        Ok(directives) => {
            let filter = EnvFilter::try_new(&directives).map_err(|err| {
                SnapshotError::Config(format!("bad {LOG_ENV_VAR} value {directives:?}: {err}"))
            })?;
            let logs = tracing_subscriber::fmt::Layer::default()
                .compact()
                .with_file(true)
                .with_line_number(true)
                .with_thread_ids(true)
                .with_filter(filter);
            set_global_subscriber(Registry::default().with(logs));
        }
        Err(_) => set_global_subscriber(Registry::default().with(log_layer(log_level))),
    }
    Ok(())
}

// Utility function used to try to set a global default subscriber,
// logging the error without panicking if it was already set
fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    // This can fail if tracing was already initialized, which happens
    // in tests and when a driver calls setup more than once.
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        tracing::warn!("{err}");
    }
}

#[test]
fn log_levels_parse() {
    assert_eq!(get_log_level(None).unwrap(), LevelFilter::ERROR);
    assert_eq!(get_log_level(Some("DEBUG")).unwrap(), LevelFilter::DEBUG);
    assert!(get_log_level(Some("loud")).is_err());
}

#[test]
fn setup_twice_is_not_an_error() {
    setup(Some("info")).unwrap();
    setup(Some("warn")).unwrap();
}
