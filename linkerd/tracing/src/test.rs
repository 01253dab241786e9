use tracing::{dispatcher::DefaultGuard, Dispatch};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Logs the proxy's own crates at debug level.
pub const DEFAULT_LOG: &str = "warn,linkerd=debug";

const ENV_LOG: &str = "LINKERD2_PROXY_LOG";

/// Builds a subscriber that writes through the test harness's captured
/// output.
///
/// The filter is read from `LINKERD2_PROXY_LOG`, then `RUST_LOG`, and falls
/// back to `default`.
pub fn trace_subscriber(default: impl AsRef<str>) -> Dispatch {
    let filter = std::env::var(ENV_LOG)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default.as_ref().to_string());
    subscriber(&filter)
}

pub fn with_default_filter(default: impl AsRef<str>) -> DefaultGuard {
    tracing::dispatcher::set_default(&trace_subscriber(default))
}

/// Sets the current thread's subscriber until the returned guard is dropped.
pub fn trace_init() -> DefaultGuard {
    with_default_filter(DEFAULT_LOG)
}

fn subscriber(filter: &str) -> Dispatch {
    // Invalid directives are reported on stderr and skipped.
    let filter = EnvFilter::builder().parse_lossy(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer())
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn filters_by_target() {
        let dispatch = subscriber("warn,linkerd=debug");
        tracing::dispatcher::with_default(&dispatch, || {
            assert!(tracing::enabled!(target: "linkerd_http_baggage", Level::DEBUG));
            assert!(!tracing::enabled!(target: "linkerd_http_baggage", Level::TRACE));
            assert!(!tracing::enabled!(target: "h2", Level::INFO));
            assert!(tracing::enabled!(target: "h2", Level::WARN));
        });
    }

    #[test]
    fn skips_invalid_directives() {
        let dispatch = subscriber("linkerd=notalevel,linkerd_baggage=trace");
        tracing::dispatcher::with_default(&dispatch, || {
            assert!(tracing::enabled!(target: "linkerd_baggage", Level::TRACE));
        });
    }
}
