use hesperus::config::LoggingConfig;
use hesperus::logging::{LogContext, get_logger, get_logger_with_context, init_logging, parse_log_level};
use tracing::Level;

#[test]
fn log_levels_parse_case_insensitively() {
    assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
    assert_eq!(parse_log_level("WARNING").unwrap(), Level::WARN);
    assert_eq!(parse_log_level("Error").unwrap(), Level::ERROR);
    assert!(parse_log_level("LOUD").is_err());
}

#[test]
fn init_is_idempotent_and_loggers_work_after_it() {
    let dir = tempfile::tempdir().unwrap();
    let config = LoggingConfig {
        file: dir.path().join("hesperus.log").to_string_lossy().to_string(),
        console_output: false,
        ..LoggingConfig::default()
    };
    init_logging(&config).unwrap();
    init_logging(&config).unwrap();

    let logger = get_logger("test");
    assert_eq!(logger.component(), "test");
    logger.info("logging initialised");

    let logger = get_logger_with_context(
        LogContext::new("commands")
            .with_caller("alice")
            .with_field("command", "/auto".to_string()),
    );
    assert_eq!(logger.component(), "commands");
    logger.warn("refused");
}
