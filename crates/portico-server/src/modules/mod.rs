//! API modules and the table every transport resolves them from.

pub mod ping;
pub mod probe;

use async_trait::async_trait;
use portico_protocol::{encode_body, BoolValue, ModuleList, ProtocolError, StringValue};
use serde_json::Value;
use std::sync::Arc;

use crate::adapter::Transport;
use crate::config::Config;
use crate::error::{ModuleError, Result};

pub use ping::PingService;
pub use probe::{HealthProbe, RemoteProbe};

/// A module's request-handling capability.
///
/// Handlers are shared by every adapter that exposes them and may be called
/// from several transports at once.
#[async_trait]
pub trait Module: Send + Sync {
    /// Lower-case method names this module answers to
    fn methods(&self) -> &'static [&'static str];

    async fn call(&self, method: &str) -> std::result::Result<Output, ModuleError>;
}

/// Result of a module call, before a transport encodes it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Bool(bool),
    Str(String),
    Modules(Vec<(String, String)>),
}

impl Output {
    pub fn to_json(&self) -> Value {
        match self {
            Output::Bool(value) => Value::Bool(*value),
            Output::Str(value) => Value::String(value.clone()),
            Output::Modules(modules) => Value::Object(
                modules
                    .iter()
                    .map(|(ns, version)| (ns.clone(), Value::String(version.clone())))
                    .collect(),
            ),
        }
    }

    /// Binary-RPC body for this output
    pub fn to_payload(&self) -> std::result::Result<Vec<u8>, ProtocolError> {
        match self {
            Output::Bool(value) => encode_body(&BoolValue { value: *value }),
            Output::Str(value) => encode_body(&StringValue {
                value: value.clone(),
            }),
            Output::Modules(modules) => encode_body(&ModuleList {
                modules: modules.clone(),
            }),
        }
    }
}

#[derive(Clone)]
pub struct ModuleDescriptor {
    pub namespace: String,
    pub version: String,
    pub handler: Arc<dyn Module>,
    pub public: bool,
}

impl std::fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("namespace", &self.namespace)
            .field("version", &self.version)
            .field("methods", &self.handler.methods())
            .field("public", &self.public)
            .finish()
    }
}

/// Maps module names to descriptors. Built once; every lookup hands out the
/// same handler instances.
pub struct ModuleResolver {
    table: Vec<ModuleDescriptor>,
}

impl ModuleResolver {
    /// Standard module table with `probe` backing `ping.status`
    pub fn new(probe: Arc<dyn HealthProbe>) -> Self {
        Self::with_modules(vec![ModuleDescriptor {
            namespace: "ping".to_string(),
            version: "1.0".to_string(),
            handler: Arc::new(PingService::new(probe)),
            public: true,
        }])
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let probe = RemoteProbe::from_config(cfg)?;
        Ok(Self::new(Arc::new(probe)))
    }

    pub fn with_modules(table: Vec<ModuleDescriptor>) -> Self {
        ModuleResolver { table }
    }

    /// Descriptors for `names`, in order. Unknown names are skipped.
    pub fn resolve(&self, names: &[&str]) -> Vec<ModuleDescriptor> {
        names
            .iter()
            .filter_map(|name| {
                let found = self.table.iter().find(|d| d.namespace == *name).cloned();
                if found.is_none() {
                    tracing::debug!("Unknown API module {:?} skipped", name);
                }
                found
            })
            .collect()
    }

    pub fn public_modules(&self) -> Vec<ModuleDescriptor> {
        let names: Vec<&str> = self
            .table
            .iter()
            .filter(|d| d.public)
            .map(|d| d.namespace.as_str())
            .collect();
        self.resolve(&names)
    }

    /// Modules exposed on `transport`. Every transport currently serves the
    /// public set.
    pub fn modules_for(&self, _transport: Transport) -> Vec<ModuleDescriptor> {
        self.public_modules()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::probe::StaticProbe;

    fn resolver() -> ModuleResolver {
        ModuleResolver::new(Arc::new(StaticProbe::healthy()))
    }

    #[test]
    fn test_resolve_known_module() {
        let found = resolver().resolve(&["ping"]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].namespace, "ping");
        assert_eq!(found[0].version, "1.0");
        assert!(found[0].public);
    }

    #[test]
    fn test_unknown_module_omitted() {
        let found = resolver().resolve(&["unknown", "ping", "unknown"]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].namespace, "ping");
        assert!(resolver().resolve(&["unknown"]).is_empty());
    }

    #[test]
    fn test_transports_share_handler_instances() {
        let resolver = resolver();
        let http = resolver.modules_for(Transport::Http);
        let binary = resolver.modules_for(Transport::Binary);
        assert!(Arc::ptr_eq(&http[0].handler, &binary[0].handler));
    }

    #[test]
    fn test_output_encodings() {
        assert_eq!(Output::Bool(true).to_json(), Value::Bool(true));
        assert_eq!(
            Output::Modules(vec![("ping".to_string(), "1.0".to_string())]).to_json(),
            serde_json::json!({"ping": "1.0"})
        );
        let payload = Output::Str("ping.info".to_string()).to_payload().unwrap();
        let body: StringValue = portico_protocol::decode_body(&payload).unwrap();
        assert_eq!(body.value, "ping.info");
    }
}
