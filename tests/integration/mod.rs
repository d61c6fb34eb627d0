//! End-to-end tests: loading, preprocessing and training from a table on disk

mod error_tests;
mod fixtures;
mod pipeline_tests;
mod property_tests;

/// Common test initialization
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("countae=debug")
        .try_init();
}
