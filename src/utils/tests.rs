use super::error::LifecycleError;
use super::logging;

#[test]
fn test_logging_init_accepts_levels() {
    logging::init("info");
    logging::init("debug");
    logging::init("warn");
}

#[test]
fn test_unknown_level_falls_back_to_info() {
    assert_eq!(logging::parse_level("loud"), tracing::Level::INFO);
    assert_eq!(logging::parse_level("WARNING"), tracing::Level::WARN);
}

#[test]
fn test_error_labels_are_stable() {
    assert_eq!(LifecycleError::AlreadyExists { id: 7 }.as_label(), "already_exists");
    assert_eq!(LifecycleError::Shutdown.as_label(), "shutdown");
    assert_eq!(
        LifecycleError::AlreadyExists { id: 7 }.to_string(),
        "message_id 7 already exists"
    );
}
