use async_trait::async_trait;
use std::sync::Arc;

use super::{HealthProbe, Module, Output};
use crate::error::ModuleError;

const INFO: &str = "ping.info";

/// Health-check module: `info` identifies the service, `status` reports
/// whether the remote node answers.
pub struct PingService {
    probe: Arc<dyn HealthProbe>,
}

impl PingService {
    pub fn new(probe: Arc<dyn HealthProbe>) -> Self {
        PingService { probe }
    }

    pub fn info(&self) -> String {
        INFO.to_string()
    }

    pub async fn status(&self) -> Result<bool, ModuleError> {
        match self.probe.check().await {
            Ok(()) => Ok(true),
            Err(reason) => {
                tracing::warn!("ping.status: {}", reason);
                Err(ModuleError::Unavailable(reason))
            }
        }
    }
}

#[async_trait]
impl Module for PingService {
    fn methods(&self) -> &'static [&'static str] {
        &["info", "status"]
    }

    async fn call(&self, method: &str) -> Result<Output, ModuleError> {
        match method {
            "info" => Ok(Output::Str(self.info())),
            "status" => self.status().await.map(Output::Bool),
            other => Err(ModuleError::MethodNotFound(format!("ping_{}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::probe::StaticProbe;

    #[tokio::test]
    async fn test_info() {
        let ping = PingService::new(Arc::new(StaticProbe::failing()));
        assert_eq!(
            ping.call("info").await,
            Ok(Output::Str("ping.info".to_string()))
        );
    }

    #[tokio::test]
    async fn test_status_follows_probe() {
        let probe = Arc::new(StaticProbe::healthy());
        let ping = PingService::new(probe.clone());
        assert_eq!(ping.call("status").await, Ok(Output::Bool(true)));

        probe.set_healthy(false);
        assert!(matches!(
            ping.call("status").await,
            Err(ModuleError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let ping = PingService::new(Arc::new(StaticProbe::healthy()));
        assert!(matches!(
            ping.call("state").await,
            Err(ModuleError::MethodNotFound(_))
        ));
    }
}
