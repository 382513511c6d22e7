//! Global logger setup. Kept in its own binary because it owns process-wide
//! logger state.

use extract_pipeline::config::{LogFormat, LoggingConfig};
use extract_pipeline::{init_logging, LoggingError};

#[test]
fn test_log_bridge_failure_is_not_reported_as_already_initialised() {
    std::env::remove_var("RUST_LOG");
    // Something else already claimed the `log` facade.
    tracing_log::LogTracer::init().unwrap();

    let config = LoggingConfig {
        level: "info".to_string(),
        format: LogFormat::Pretty,
    };
    let first = init_logging(&config);
    assert!(
        matches!(first, Err(LoggingError::LogBridge(_))),
        "unexpected result: {:?}",
        first
    );

    // The subscriber itself went in.
    assert!(matches!(
        init_logging(&config),
        Err(LoggingError::AlreadyInitialised)
    ));
}
