//! Logging setup for the setup binary.
//!
//! Progress goes to stderr through `tracing`, so the summary printed on
//! stdout (the public URL) can be piped on its own.
//!
//! The subscriber is installed before settings are read so that settings
//! loading can log; the configured level is applied afterwards through
//! [`LevelHandle`].

use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

/// Dependencies that are chatty at `info`.
const QUIET_TARGETS: &[&str] = &["hyper_util=warn", "reqwest=warn", "rustls=warn"];

/// Filter directives for `level`, with the HTTP stack held at `warn`.
pub fn filter_directives(level: &str) -> String {
    let level = level.trim();
    let level = if level.is_empty() { "info" } else { level };
    std::iter::once(level)
        .chain(QUIET_TARGETS.iter().copied())
        .collect::<Vec<_>>()
        .join(",")
}

/// Changes the level of the installed subscriber.
pub struct LevelHandle(reload::Handle<EnvFilter, Registry>);

impl LevelHandle {
    /// Switch to `level`. `RUST_LOG` wins when set.
    pub fn set_level(&self, level: &str) {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        self.apply(level);
    }

    fn apply(&self, level: &str) {
        if let Err(e) = self.0.reload(EnvFilter::new(filter_directives(level))) {
            tracing::debug!("log level unchanged: {e}");
        }
    }
}

/// Install the global subscriber at `level`. `RUST_LOG` replaces `level`
/// entirely.
pub fn init_tracing(level: &str, log_json: bool) -> LevelHandle {
    let filter = std::env::var("RUST_LOG")
        .map_or_else(|_| EnvFilter::new(filter_directives(level)), EnvFilter::new);
    let (filter, handle) = reload::Layer::new(filter);
    let layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
    let registry = tracing_subscriber::registry().with(filter);
    if log_json {
        registry.with(layer.json()).init();
    } else {
        registry.with(layer).init();
    }
    LevelHandle(handle)
}
