use portico_protocol::jsonrpc::{ErrorObject, Request};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::registry::Registry;

/// Client bound to the in-process adapter. Calls go straight to the
/// registry with no serialization on the way.
#[derive(Clone)]
pub struct InProcClient {
    registry: Arc<Registry>,
    next_id: Arc<AtomicU64>,
}

impl InProcClient {
    pub(crate) fn new(registry: Arc<Registry>) -> Self {
        InProcClient {
            registry,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Calls a JSON-RPC method such as `ping_info`
    pub async fn call(&self, method: &str) -> Result<Value, ErrorObject> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.registry.handle_request(Request::new(id, method)).await {
            Some(resp) => resp.into_result(),
            None => Ok(Value::Null),
        }
    }

    /// (namespace, version) of every module reachable through this client
    pub fn modules(&self) -> Vec<(String, String)> {
        self.registry.modules()
    }
}
