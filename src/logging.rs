use std::sync::OnceLock;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, reload};

const DEFAULT_FILTER: &str = "deepmedical=info,warn";
const DEBUG_FILTER: &str = "deepmedical=debug,info";

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Install the global tracing subscriber. `RUST_LOG` wins when set; otherwise
/// the process logs at info, or debug when `--debug` asked for it. The filter
/// sits behind a reload handle so a debug-flagged request can raise it later.
pub fn init(debug: bool) {
    let default_filter = if debug { DEBUG_FILTER } else { DEFAULT_FILTER };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let (filter_layer, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let _ = FILTER_HANDLE.set(handle);
}

/// Raise the process-wide filter to debug. This is what `debug: true` on a
/// chat turn does: once raised, the filter stays raised for the process.
pub fn enable_debug_logging() {
    if let Some(handle) = FILTER_HANDLE.get() {
        if handle.reload(EnvFilter::new(DEBUG_FILTER)).is_ok() {
            tracing::info!("Debug logging enabled for this process");
        }
    }
}
