//! Logging and tracing infrastructure for tracesift.
//!
//! Structured logging through the tracing crate, with a human readable
//! and a JSON output mode. The filter comes from `RUST_LOG` when set.

use std::sync::Once;
use tracing::debug;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

static INIT: Once = Once::new();

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Installs the human readable subscriber at `info`. Only the first
/// initialization in a process takes effect.
pub fn init_tracing() {
    init_tracing_with_level("info");
}

/// Human readable output on stderr; `default_level` applies when
/// `RUST_LOG` is unset.
pub fn init_tracing_with_level(default_level: &str) {
    INIT.call_once(|| {
        let fmt_layer = fmt::layer()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_names(true)
            .with_writer(std::io::stderr);

        let _ = tracing_subscriber::registry()
            .with(env_filter(default_level))
            .with(fmt_layer)
            .try_init();

        debug!("tracesift tracing initialized");
    });
}

/// One JSON object per event, for log shippers.
pub fn init_tracing_json(default_level: &str) {
    INIT.call_once(|| {
        let fmt_layer = fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_current_span(true)
            .with_writer(std::io::stderr);

        let _ = tracing_subscriber::registry()
            .with(env_filter(default_level))
            .with(fmt_layer)
            .try_init();

        debug!("tracesift tracing initialized (JSON mode)");
    });
}

/// Info-level span, with optional fields.
#[macro_export]
macro_rules! span_trace {
    ($name:expr) => {
        tracing::info_span!($name)
    };
    ($name:expr, $($field:tt)*) => {
        tracing::info_span!($name, $($field)*)
    };
}
