//! Brings the configured transports up in order and tears them down in reverse.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::adapter::{Adapter, AdapterState, BoundAddr, Transport};
use crate::config::Config;
use crate::endpoint::Endpoint;
use crate::error::{Result, ServerError};
use crate::inproc::InProcClient;
use crate::modules::ModuleResolver;
use crate::registry::Registry;
use crate::{binary, gateway, http, ipc, ws};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Stopped,
}

/// Snapshot of one adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterStatus {
    pub transport: Transport,
    pub local_addr: BoundAddr,
    pub state: AdapterState,
}

struct ManagerState {
    phase: Phase,
    /// Start order; stop walks it backwards
    adapters: Vec<Adapter>,
}

pub struct TransportManager {
    config: Config,
    resolver: ModuleResolver,
    state: Mutex<ManagerState>,
}

impl TransportManager {
    pub fn new(config: Config, resolver: ModuleResolver) -> Self {
        TransportManager {
            config,
            resolver,
            state: Mutex::new(ManagerState {
                phase: Phase::Idle,
                adapters: Vec::new(),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase
    }

    /// Starts every enabled transport. On failure everything started so far
    /// is stopped again and the manager cannot be restarted.
    pub async fn start_all(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.phase {
            Phase::Idle => {}
            Phase::Running => return Err(ServerError::AlreadyStarted),
            Phase::Stopped => return Err(ServerError::ManagerStopped),
        }

        let mut started = Vec::new();
        let outcome = self.start_adapters(&mut started).await;
        if let Err(e) = outcome {
            tracing::error!("Startup failed, rolling back {} adapters: {}", started.len(), e);
            stop_in_reverse(&mut started).await;
            state.adapters = started;
            state.phase = Phase::Stopped;
            return Err(e);
        }

        tracing::info!("{} transports listening", started.len());
        state.adapters = started;
        state.phase = Phase::Running;
        Ok(())
    }

    async fn start_adapters(&self, started: &mut Vec<Adapter>) -> Result<()> {
        self.config.validate()?;

        let registry = self.registry_for(Transport::InProcess)?;
        started.push(Adapter::in_process(registry));

        for transport in [Transport::Ipc, Transport::Http, Transport::WebSocket, Transport::Binary] {
            let endpoint = match self.config.endpoint(transport)? {
                Some(endpoint) => endpoint,
                None => {
                    tracing::debug!("{} transport disabled", transport);
                    continue;
                }
            };
            let adapter = self.start_one(transport, &endpoint).await?;
            started.push(adapter);
        }

        if let Some(endpoint) = self.config.endpoint(Transport::Gateway)? {
            // The bridge dials the binary listener, so it must already be bound
            match binary_addr(started) {
                Some(addr) => started.push(gateway::start(&endpoint, addr, &self.config.grpc).await?),
                None => tracing::warn!("gateway skipped: binary-RPC transport has no address"),
            }
        }
        Ok(())
    }

    async fn start_one(&self, transport: Transport, endpoint: &Endpoint) -> Result<Adapter> {
        let registry = self.registry_for(transport)?;
        match transport {
            Transport::Ipc => ipc::start(endpoint, registry).await,
            Transport::Http => http::start(endpoint, registry, &self.config.rpc).await,
            Transport::WebSocket => ws::start(endpoint, registry, &self.config.rpc).await,
            Transport::Binary => binary::start(endpoint, registry).await,
            Transport::InProcess | Transport::Gateway => Err(ServerError::Config(format!(
                "{} is not a standalone listener",
                transport
            ))),
        }
    }

    fn registry_for(&self, transport: Transport) -> Result<Arc<Registry>> {
        Registry::with_modules(&self.resolver.modules_for(transport))
    }

    /// Stops every running adapter in reverse start order. Stop failures are
    /// logged and do not interrupt the rest. Does nothing unless running.
    pub async fn stop_all(&self) {
        let mut state = self.state.lock().await;
        if state.phase != Phase::Running {
            return;
        }
        state.phase = Phase::Stopped;
        stop_in_reverse(&mut state.adapters).await;
        tracing::info!("All transports stopped");
    }

    /// Client for the in-process adapter
    pub async fn attach(&self) -> Result<InProcClient> {
        let state = self.state.lock().await;
        if state.phase != Phase::Running {
            return Err(ServerError::NotStarted);
        }
        state
            .adapters
            .iter()
            .find(|a| a.transport() == Transport::InProcess)
            .and_then(|a| a.registry())
            .map(|registry| InProcClient::new(registry.clone()))
            .ok_or(ServerError::NotStarted)
    }

    pub async fn status(&self) -> Vec<AdapterStatus> {
        let state = self.state.lock().await;
        state
            .adapters
            .iter()
            .map(|a| AdapterStatus {
                transport: a.transport(),
                local_addr: a.local_addr().clone(),
                state: a.state(),
            })
            .collect()
    }

    /// True when every transport configured with an address is listening
    pub async fn is_fully_up(&self) -> bool {
        let state = self.state.lock().await;
        if state.phase != Phase::Running {
            return false;
        }
        Transport::ALL.iter().all(|transport| {
            let wanted = match transport {
                Transport::InProcess => true,
                Transport::Gateway => {
                    matches!(self.config.endpoint(Transport::Gateway), Ok(Some(_)))
                        && matches!(self.config.endpoint(Transport::Binary), Ok(Some(_)))
                }
                other => matches!(self.config.endpoint(*other), Ok(Some(_))),
            };
            !wanted
                || state
                    .adapters
                    .iter()
                    .any(|a| a.transport() == *transport && a.state() == AdapterState::Listening)
        })
    }

    /// Where `transport` is listening, if it is up
    pub async fn bound_addr(&self, transport: Transport) -> Option<BoundAddr> {
        let state = self.state.lock().await;
        state
            .adapters
            .iter()
            .find(|a| a.transport() == transport && a.state() == AdapterState::Listening)
            .map(|a| a.local_addr().clone())
    }
}

fn binary_addr(adapters: &[Adapter]) -> Option<SocketAddr> {
    adapters.iter().find_map(|a| match (a.transport(), a.local_addr()) {
        (Transport::Binary, BoundAddr::Tcp(addr)) => Some(*addr),
        _ => None,
    })
}

async fn stop_in_reverse(adapters: &mut [Adapter]) {
    for adapter in adapters.iter_mut().rev() {
        if let Err(e) = adapter.stop().await {
            tracing::error!("Stopping {} failed: {}", adapter.transport(), e);
        }
    }
}
