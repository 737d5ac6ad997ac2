use mitto::config::{ContentBlockShape, GlobalConfig};
use mitto::AppError;
use serial_test::serial;

fn sample_toml(data_dir: &str) -> String {
    format!(
        r#"
data_dir = '{data_dir}'
default_workspace = "main"
auto_approve = false

[[workspaces]]
working_dir = '{data_dir}/repo'
agent_profile = "main"
agent_command = "claude-agent --acp"

[acp]
max_line_bytes = 4194304
teardown_grace_seconds = 5
content_block_shape = "nested"

[session]
max_sessions = 8
queue_capacity = 16

[scanner]
enabled = true
rate_limit = 60
error_rate_threshold = 0.25
whitelist_cidrs = ["127.0.0.1/32", "10.0.0.0/8"]

[listener]
port = 8123
"#
    )
}

#[test]
fn parses_full_toml_document() {
    let dir = tempfile::tempdir().unwrap();
    let raw = sample_toml(&dir.path().display().to_string());
    let config = GlobalConfig::from_toml_str(&raw).expect("valid config parses");

    assert_eq!(config.workspaces.len(), 1);
    assert_eq!(config.workspaces[0].agent_profile, "main");
    assert_eq!(config.acp.max_line_bytes, 4_194_304);
    assert_eq!(config.acp.content_block_shape, ContentBlockShape::Nested);
    assert_eq!(config.session.max_sessions, 8);
    assert_eq!(config.listener.port, 8123);
    assert_eq!(
        config.default_workspace().map(|w| w.agent_profile.as_str()),
        Some("main")
    );
}

#[test]
fn empty_document_yields_defaults() {
    let config = GlobalConfig::from_toml_str("").expect("empty document is valid");
    let defaults = GlobalConfig::default();
    assert_eq!(config.listener.port, defaults.listener.port);
    assert_eq!(config.session.max_sessions, defaults.session.max_sessions);
    assert!(config.workspaces.is_empty());
}

#[test]
fn rejects_zero_max_sessions() {
    let raw = "[session]\nmax_sessions = 0\n";
    let err = GlobalConfig::from_toml_str(raw).unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn rejects_out_of_range_error_rate_threshold() {
    let raw = "[scanner]\nerror_rate_threshold = 1.5\n";
    let err = GlobalConfig::from_toml_str(raw).unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn rejects_malformed_whitelist_cidr() {
    let raw = r#"[scanner]
whitelist_cidrs = ["not-a-cidr"]
"#;
    let err = GlobalConfig::from_toml_str(raw).unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
#[serial]
fn env_test_mode_disables_scanner_and_raises_session_floor() {
    std::env::set_var("MITTO_TEST_MODE", "1");
    let raw = "[session]\nmax_sessions = 1\n";
    let config = GlobalConfig::from_toml_str(raw).expect("valid config");
    std::env::remove_var("MITTO_TEST_MODE");

    assert!(!config.scanner.enabled);
    assert!(config.session.max_sessions >= 4);
}

#[test]
#[serial]
fn env_acp_server_and_work_dir_register_a_workspace() {
    std::env::set_var("MITTO_ACP_SERVER", "env-profile");
    std::env::set_var("MITTO_WORK_DIR", "/tmp/env-workspace");
    let config = GlobalConfig::from_toml_str("").expect("valid config");
    std::env::remove_var("MITTO_ACP_SERVER");
    std::env::remove_var("MITTO_WORK_DIR");

    assert_eq!(config.default_workspace.as_deref(), Some("env-profile"));
    assert!(config
        .workspaces
        .iter()
        .any(|w| w.agent_profile == "env-profile"));
}
