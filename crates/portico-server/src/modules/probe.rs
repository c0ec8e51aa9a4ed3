use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::Config;
use crate::error::{Result, ServerError};

/// Reachability check against the remote node behind `ping.status`
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `Err` carries a human-readable reason
    async fn check(&self) -> std::result::Result<(), String>;
}

/// Probes the remote node with a JSON-RPC call over HTTP
pub struct RemoteProbe {
    client: reqwest::Client,
    url: String,
    method: String,
}

impl RemoteProbe {
    pub fn new(endpoint: &str, method: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServerError::Config(format!("health probe client: {}", e)))?;

        Ok(RemoteProbe {
            client,
            url: http_url(endpoint),
            method: method.to_string(),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(
            &cfg.endpoint,
            &cfg.probe_method,
            Duration::from_secs(cfg.probe_timeout_secs),
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HealthProbe for RemoteProbe {
    async fn check(&self) -> std::result::Result<(), String> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": self.method,
            "params": [],
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("{} unreachable: {}", self.url, e))?;

        if !resp.status().is_success() {
            return Err(format!("{} answered {}", self.url, resp.status()));
        }

        let reply: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| format!("{} sent an invalid reply: {}", self.url, e))?;

        match reply.get("error") {
            Some(err) if !err.is_null() => Err(format!("{} {}: {}", self.url, self.method, err)),
            _ => Ok(()),
        }
    }
}

/// WebSocket and raw TCP node addresses are probed over plain HTTP
fn http_url(endpoint: &str) -> String {
    if let Some(rest) = endpoint.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else if let Some(rest) = endpoint.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if let Some(rest) = endpoint.strip_prefix("tcp://") {
        format!("http://{}", rest)
    } else {
        endpoint.to_string()
    }
}

/// Probe with a switchable fixed answer, for wiring without a remote node
pub struct StaticProbe {
    healthy: AtomicBool,
}

impl StaticProbe {
    pub fn healthy() -> Self {
        StaticProbe {
            healthy: AtomicBool::new(true),
        }
    }

    pub fn failing() -> Self {
        StaticProbe {
            healthy: AtomicBool::new(false),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl HealthProbe for StaticProbe {
    async fn check(&self) -> std::result::Result<(), String> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err("remote node unreachable".to_string())
        }
    }
}
