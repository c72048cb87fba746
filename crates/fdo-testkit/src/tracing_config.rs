//! Tracing configuration for test output.

use std::sync::Once;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Initialize tracing for tests.
///
/// Safe to call from every test; only the first call installs the
/// subscriber. Uses `RUST_LOG` when set, otherwise `info,fdo=debug`, which
/// matches every `fdo_*` crate by target prefix.
///
/// # Example
///
/// ```rust
/// use fdo_testkit::init_test_tracing;
///
/// #[tokio::test]
/// async fn my_test() {
///     init_test_tracing();
///     // ... test code
/// }
/// ```
pub fn init_test_tracing() {
    init_with(|| {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,fdo=debug"))
    });
}

/// Initialize tracing with a specific filter.
pub fn init_test_tracing_with_filter(filter: &str) {
    init_with(|| EnvFilter::new(filter));
}

/// Initialize silent tracing, for tests that provoke errors on purpose.
pub fn init_test_tracing_silent() {
    init_with(|| EnvFilter::new("off"));
}

fn init_with(filter: impl FnOnce() -> EnvFilter) {
    INIT.call_once(|| {
        tracing_subscriber::registry()
            .with(filter())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_ansi(true)
                    .compact(),
            )
            .init();
    });
}
