use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::adapter::Transport;
use crate::endpoint::Endpoint;
use crate::error::{Result, ServerError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Forces the `debug` log level
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// JSON structured logging
    pub log_json: bool,

    /// Append logs to this file instead of stderr
    pub log_file: Option<String>,

    /// Remote node probed by `ping.status`
    pub endpoint: String,

    /// JSON-RPC method called on the remote node by the health probe
    pub probe_method: String,

    pub probe_timeout_secs: u64,

    /// Binary-RPC listener and its HTTP/JSON gateway
    pub grpc: GrpcConfig,

    /// JSON-RPC transports: local socket, HTTP, WebSocket
    pub rpc: RpcConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrpcConfig {
    pub enabled: bool,

    /// Gateway (HTTP/JSON) listen address
    pub listen_address: String,

    /// Binary-RPC listen address
    pub grpc_listen_address: String,

    /// Gateway CORS allow-list; empty installs no CORS handling at all
    pub allowed_origins: Vec<String>,

    /// Gateway drain deadline on stop
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Master switch for the local-socket, HTTP and WebSocket transports
    pub enabled: bool,

    pub http_enabled: bool,
    pub http_endpoint: String,
    pub http_cors: Vec<String>,
    pub http_virtual_hosts: Vec<String>,
    pub http_timeouts: HttpTimeouts,

    pub ws_enabled: bool,
    pub ws_endpoint: String,
    /// Allowed WebSocket origins; empty accepts any
    pub ws_origins: Vec<String>,

    pub ipc_enabled: bool,
    pub ipc_endpoint: String,

    /// HTTP / WebSocket drain deadline on stop
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpTimeouts {
    pub read_secs: u64,
    pub write_secs: u64,
    /// Keep-alive idle limit. Only the default is accepted: the HTTP server
    /// applies its own idle handling and cannot be tuned.
    pub idle_secs: u64,
}

impl HttpTimeouts {
    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }

    pub fn write(&self) -> Duration {
        Duration::from_secs(self.write_secs)
    }
}

impl Config {
    /// Load config from a YAML file
    pub fn from_file(path: &str) -> Result<Self> {
        let path = Path::new(path);
        if !path.exists() {
            return Err(ServerError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("Failed to read config: {}", e)))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| ServerError::Config(format!("Invalid YAML: {}", e)))
    }

    /// Effective log level after `verbose`
    pub fn effective_log_level(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.log_level
        }
    }

    /// Whether `transport` is switched on. Says nothing about its address.
    pub fn is_enabled(&self, transport: Transport) -> bool {
        match transport {
            Transport::InProcess => true,
            Transport::Ipc => self.rpc.enabled && self.rpc.ipc_enabled,
            Transport::Http => self.rpc.enabled && self.rpc.http_enabled,
            Transport::WebSocket => self.rpc.enabled && self.rpc.ws_enabled,
            Transport::Binary | Transport::Gateway => self.grpc.enabled,
        }
    }

    fn raw_address(&self, transport: Transport) -> Option<&str> {
        match transport {
            Transport::InProcess => None,
            Transport::Ipc => Some(&self.rpc.ipc_endpoint),
            Transport::Http => Some(&self.rpc.http_endpoint),
            Transport::WebSocket => Some(&self.rpc.ws_endpoint),
            Transport::Binary => Some(&self.grpc.grpc_listen_address),
            Transport::Gateway => Some(&self.grpc.listen_address),
        }
    }

    /// Listen address of an enabled transport; `None` when the transport is
    /// switched off or its address is empty.
    pub fn endpoint(&self, transport: Transport) -> Result<Option<Endpoint>> {
        if !self.is_enabled(transport) {
            return Ok(None);
        }
        match self.raw_address(transport) {
            Some(raw) => Endpoint::parse_optional(raw).map_err(|e| match e {
                ServerError::Config(msg) => {
                    ServerError::Config(format!("{} address: {}", transport, msg))
                }
                other => other,
            }),
            None => Ok(None),
        }
    }

    /// Checks everything that must hold before any adapter starts
    pub fn validate(&self) -> Result<()> {
        for transport in Transport::ALL {
            self.endpoint(transport)?;
        }

        if let Some(ep) = self.endpoint(Transport::Gateway)? {
            if !matches!(ep, Endpoint::Tcp { .. }) {
                return Err(ServerError::Config(format!(
                    "gateway address must be a TCP address, got {}",
                    ep
                )));
            }
        }
        if let Some(ep @ Endpoint::Tcp { .. }) = self.endpoint(Transport::Ipc)? {
            return Err(ServerError::Config(format!(
                "IPC address must be a socket path, got {}",
                ep
            )));
        }
        for transport in [Transport::Http, Transport::WebSocket, Transport::Binary] {
            if let Some(ep @ Endpoint::Unix { .. }) = self.endpoint(transport)? {
                return Err(ServerError::Config(format!(
                    "{} address must be a TCP address, got {}",
                    transport, ep
                )));
            }
        }

        if self.is_enabled(Transport::Http)
            && self.rpc.http_timeouts.idle_secs != HttpTimeouts::default().idle_secs
        {
            return Err(ServerError::Config(format!(
                "rpc.http_timeouts.idle_secs cannot be changed from {}",
                HttpTimeouts::default().idle_secs
            )));
        }

        if !self.endpoint.trim().is_empty() && !self.endpoint.contains("://") {
            return Err(ServerError::Config(format!(
                "endpoint {:?} has no scheme",
                self.endpoint
            )));
        }

        match self.effective_log_level() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(ServerError::Config(format!("unknown log level {:?}", other))),
        }
    }

    /// Pretty form logged at startup
    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(self).unwrap_or_default()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            verbose: false,
            log_level: "debug".to_string(),
            log_json: false,
            log_file: None,
            endpoint: "ws://127.0.0.1:29736".to_string(),
            probe_method: "ledger_tokens".to_string(),
            probe_timeout_secs: 5,
            grpc: GrpcConfig::default(),
            rpc: RpcConfig::default(),
        }
    }
}

impl Default for GrpcConfig {
    fn default() -> Self {
        GrpcConfig {
            enabled: true,
            listen_address: "tcp://0.0.0.0:29705".to_string(),
            grpc_listen_address: "tcp://0.0.0.0:29706".to_string(),
            allowed_origins: vec!["*".to_string()],
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        RpcConfig {
            enabled: false,
            http_enabled: false,
            http_endpoint: "tcp://0.0.0.0:29707".to_string(),
            http_cors: vec!["*".to_string()],
            http_virtual_hosts: vec!["*".to_string()],
            http_timeouts: HttpTimeouts::default(),
            ws_enabled: false,
            ws_endpoint: "tcp://0.0.0.0:29708".to_string(),
            ws_origins: Vec::new(),
            ipc_enabled: false,
            ipc_endpoint: String::new(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        HttpTimeouts {
            read_secs: 30,
            write_secs: 200,
            idle_secs: 200,
        }
    }
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

/// Command-line flags. Every flag overrides the config file.
#[derive(Parser, Debug, Default)]
#[command(name = "portico", version, about = "Multi-transport RPC service")]
pub struct CliArgs {
    /// YAML config file
    #[arg(long, env = "PORTICO_CONFIG")]
    pub config: Option<String>,

    /// Show verbose debug information
    #[arg(long)]
    pub verbose: bool,

    /// Log level
    #[arg(long = "level")]
    pub log_level: Option<String>,

    /// Remote node probed by ping.status
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Binary-RPC listen address
    #[arg(long = "grpc-address")]
    pub grpc_address: Option<String>,

    /// Gateway listen address
    #[arg(long = "gateway-address")]
    pub gateway_address: Option<String>,

    /// JSON-RPC over HTTP listen address
    #[arg(long = "http-endpoint")]
    pub http_endpoint: Option<String>,

    /// JSON-RPC over WebSocket listen address
    #[arg(long = "ws-endpoint")]
    pub ws_endpoint: Option<String>,

    /// JSON-RPC local socket path address (ipc:///path)
    #[arg(long = "ipc-endpoint")]
    pub ipc_endpoint: Option<String>,
}

impl CliArgs {
    /// Loads the config file (if any) and applies flag overrides
    pub fn load_config(&self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        self.apply(&mut cfg);
        Ok(cfg)
    }

    pub fn apply(&self, cfg: &mut Config) {
        if self.verbose {
            cfg.verbose = true;
        }
        if let Some(level) = &self.log_level {
            cfg.log_level = level.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            cfg.endpoint = endpoint.clone();
        }
        if let Some(addr) = &self.grpc_address {
            cfg.grpc.grpc_listen_address = addr.clone();
        }
        if let Some(addr) = &self.gateway_address {
            cfg.grpc.listen_address = addr.clone();
        }
        if let Some(addr) = &self.http_endpoint {
            cfg.rpc.http_endpoint = addr.clone();
        }
        if let Some(addr) = &self.ws_endpoint {
            cfg.rpc.ws_endpoint = addr.clone();
        }
        if let Some(addr) = &self.ipc_endpoint {
            cfg.rpc.ipc_endpoint = addr.clone();
        }
    }
}
