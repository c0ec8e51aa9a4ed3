//! Handler registration table and request dispatch shared by every adapter.

use futures::future::join_all;
use portico_protocol::jsonrpc::{self, ErrorObject, Incoming, Request, Response};
use portico_protocol::{RpcRequest, RpcResponse};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{ModuleError, Result, ServerError};
use crate::modules::{Module, ModuleDescriptor, Output};

/// Namespace of the built-in discovery call (`rpc_modules`, `rpc/modules`)
pub const RPC_NAMESPACE: &str = "rpc";

/// Modules registered on one adapter, keyed by namespace
pub struct Registry {
    modules: RwLock<HashMap<String, ModuleDescriptor>>,
    stopped: AtomicBool,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            modules: RwLock::new(HashMap::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Builds a registry holding `descriptors`; a repeated namespace is an error
    pub fn with_modules(descriptors: &[ModuleDescriptor]) -> Result<Arc<Self>> {
        let registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor.clone())?;
        }
        Ok(Arc::new(registry))
    }

    pub fn register(&self, descriptor: ModuleDescriptor) -> Result<()> {
        if descriptor.namespace == RPC_NAMESPACE {
            return Err(ServerError::DuplicateModule(descriptor.namespace));
        }
        let mut modules = self.modules.write().unwrap_or_else(|e| e.into_inner());
        if modules.contains_key(&descriptor.namespace) {
            return Err(ServerError::DuplicateModule(descriptor.namespace));
        }
        tracing::debug!(
            "Registered module {} v{}",
            descriptor.namespace,
            descriptor.version
        );
        modules.insert(descriptor.namespace.clone(), descriptor);
        Ok(())
    }

    /// (namespace, version) of every registered module, sorted by namespace
    pub fn modules(&self) -> Vec<(String, String)> {
        let modules = self.modules.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<(String, String)> = modules
            .values()
            .map(|d| (d.namespace.clone(), d.version.clone()))
            .collect();
        list.sort();
        list
    }

    /// Releases the registration table. Later calls fail as unavailable.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.modules
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .clear();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn lookup(&self, service: &str, method: &str) -> std::result::Result<Arc<dyn Module>, ModuleError> {
        if self.is_stopped() {
            return Err(ModuleError::Unavailable("server is shutting down".to_string()));
        }
        let modules = self.modules.read().unwrap_or_else(|e| e.into_inner());
        let descriptor = modules
            .get(service)
            .ok_or_else(|| ModuleError::ModuleNotFound(service.to_string()))?;
        if !descriptor.handler.methods().contains(&method) {
            return Err(ModuleError::MethodNotFound(format!("{}_{}", service, method)));
        }
        Ok(descriptor.handler.clone())
    }

    /// Checks that `service.method` exists without calling it
    pub fn resolve_method(&self, service: &str, method: &str) -> std::result::Result<(), ModuleError> {
        if service == RPC_NAMESPACE && method == "modules" {
            return Ok(());
        }
        self.lookup(service, method).map(|_| ())
    }

    /// Calls `service.method`
    pub async fn call(&self, service: &str, method: &str) -> std::result::Result<Output, ModuleError> {
        if service == RPC_NAMESPACE {
            return match method {
                "modules" => Ok(Output::Modules(self.modules())),
                other => Err(ModuleError::MethodNotFound(format!("rpc_{}", other))),
            };
        }
        let handler = self.lookup(service, method)?;
        handler.call(method).await
    }

    /// Handles one JSON-RPC call. Notifications yield no response.
    pub async fn handle_request(&self, req: Request) -> Option<Response> {
        let id = req.id.clone();
        let outcome = self.dispatch_jsonrpc(&req).await;
        if req.is_notification() {
            if let Err(err) = outcome {
                tracing::debug!("Notification {} failed: {}", req.method, err.message);
            }
            return None;
        }
        let id = id.unwrap_or(Value::Null);
        Some(match outcome {
            Ok(result) => Response::result(id, result),
            Err(err) => Response::error(id, err),
        })
    }

    async fn dispatch_jsonrpc(&self, req: &Request) -> std::result::Result<Value, ErrorObject> {
        let (service, method) = req
            .service_method()
            .ok_or_else(|| ErrorObject::method_not_found(&req.method))?;

        self.resolve_method(service, method)
            .map_err(|e| e.to_error_object(&req.method))?;
        if req.has_params() {
            return Err(ErrorObject::invalid_params(format!(
                "{} takes no arguments",
                req.method
            )));
        }

        self.call(service, method)
            .await
            .map(|output| output.to_json())
            .map_err(|e| e.to_error_object(&req.method))
    }

    async fn handle_value(&self, value: Value) -> Option<Response> {
        match jsonrpc::parse_request(value) {
            Ok(req) => self.handle_request(req).await,
            Err(err) => Some(Response::error(Value::Null, err)),
        }
    }

    /// Handles a raw JSON-RPC payload (single call or batch) and returns the
    /// serialized reply, or `None` when nothing needs answering.
    pub async fn handle_text(&self, text: &str) -> Option<String> {
        let reply = match jsonrpc::parse_incoming(text) {
            Err(err) => serde_json::to_value(Response::error(Value::Null, err)),
            Ok(Incoming::Single(value)) => {
                let resp = self.handle_value(value).await?;
                serde_json::to_value(resp)
            }
            Ok(Incoming::Batch(entries)) => {
                let responses: Vec<Response> =
                    join_all(entries.into_iter().map(|entry| self.handle_value(entry)))
                        .await
                        .into_iter()
                        .flatten()
                        .collect();
                if responses.is_empty() {
                    return None;
                }
                serde_json::to_value(responses)
            }
        };

        match reply {
            Ok(value) => Some(value.to_string()),
            Err(e) => {
                tracing::error!("Failed to serialize JSON-RPC reply: {}", e);
                None
            }
        }
    }

    /// Handles one binary-RPC call
    pub async fn handle_binary(&self, req: RpcRequest) -> RpcResponse {
        if let Err(e) = self.resolve_method(&req.service, &req.method) {
            return RpcResponse::error(req.id, e.to_status());
        }
        if !req.payload.is_empty() {
            let err = ModuleError::InvalidArgument(format!(
                "{}/{} takes an empty request",
                req.service, req.method
            ));
            return RpcResponse::error(req.id, err.to_status());
        }

        let outcome = self
            .call(&req.service, &req.method)
            .await
            .and_then(|output| {
                output
                    .to_payload()
                    .map_err(|e| ModuleError::Internal(e.to_string()))
            });

        match outcome {
            Ok(payload) => RpcResponse::ok(req.id, payload),
            Err(e) => RpcResponse::error(req.id, e.to_status()),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
