//! Logging bootstrap shared by the CLI and tests.

use env_logger::{Builder, Env};
use std::sync::Once;

static INIT: Once = Once::new();

/// Install the `env_logger` backend once per process.
///
/// `RUST_LOG` wins over `default_filter`; repeated calls are ignored.
pub fn init(default_filter: &str) {
    INIT.call_once(|| {
        let env = Env::default().default_filter_or(default_filter);
        let _ = Builder::from_env(env)
            .format_timestamp_secs()
            .format_target(false)
            .try_init();
    });
}
