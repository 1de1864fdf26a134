//! Logger setup.
//!
//! The bridge logs through the `log` facade; the embedding host decides the
//! backend.  These helpers install `env_logger` for hosts that have none.

/// Install `env_logger` with `RUST_LOG` honoured and `info` as the default.
///
/// Safe to call more than once; later calls are ignored.
pub fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

/// Logger for unit and integration tests (captured by the test harness).
pub fn init_for_tests() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}
