use clap::Parser;
use portico_server::{CliArgs, Config, ServerError, Transport};
use std::io::Write;

const SAMPLE: &str = r#"
log_level: warn
endpoint: ws://127.0.0.1:29736
grpc:
  enabled: true
  listen_address: tcp://127.0.0.1:39705
  grpc_listen_address: tcp://127.0.0.1:39706
  allowed_origins: []
rpc:
  enabled: true
  http_enabled: true
  http_endpoint: tcp://127.0.0.1:39707
  http_timeouts:
    read_secs: 10
  ipc_enabled: true
  ipc_endpoint: ipc:///tmp/portico-test.ipc
"#;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_yaml_file_with_partial_sections() {
    let file = write_config(SAMPLE);
    let cfg = Config::from_file(file.path().to_str().unwrap()).unwrap();

    assert_eq!(cfg.log_level, "warn");
    assert!(cfg.grpc.allowed_origins.is_empty());
    assert_eq!(cfg.rpc.http_timeouts.read_secs, 10);
    // Unset fields keep their defaults
    assert_eq!(cfg.rpc.http_timeouts.write_secs, 200);
    assert_eq!(cfg.grpc.shutdown_timeout_secs, 5);
    assert!(!cfg.rpc.ws_enabled);

    cfg.validate().unwrap();
    assert!(cfg.endpoint(Transport::Ipc).unwrap().is_some());
    assert!(cfg.endpoint(Transport::WebSocket).unwrap().is_none());
}

#[test]
fn test_missing_file() {
    let err = Config::from_file("/nonexistent/portico.yaml").unwrap_err();
    assert!(matches!(err, ServerError::Config(_)));
    assert!(err.to_string().contains("not found"));
}

#[test]
fn test_malformed_yaml() {
    let file = write_config("grpc: [this is not a map");
    let err = Config::from_file(file.path().to_str().unwrap()).unwrap_err();
    assert!(err.to_string().contains("Invalid YAML"));
}

#[test]
fn test_flags_override_config_file() {
    let file = write_config(SAMPLE);
    let args = CliArgs::parse_from([
        "portico",
        "--config",
        file.path().to_str().unwrap(),
        "--http-endpoint",
        "tcp://127.0.0.1:40000",
        "--verbose",
    ]);
    let cfg = args.load_config().unwrap();

    assert_eq!(cfg.rpc.http_endpoint, "tcp://127.0.0.1:40000");
    assert_eq!(cfg.grpc.listen_address, "tcp://127.0.0.1:39705");
    assert_eq!(cfg.effective_log_level(), "debug");
}

#[test]
fn test_effective_config_round_trips_through_yaml() {
    let file = write_config(SAMPLE);
    let cfg = Config::from_file(file.path().to_str().unwrap()).unwrap();
    let reloaded = Config::from_yaml(&cfg.to_yaml()).unwrap();
    assert_eq!(reloaded.rpc.ipc_endpoint, cfg.rpc.ipc_endpoint);
    assert_eq!(reloaded.grpc.allowed_origins, cfg.grpc.allowed_origins);
}
