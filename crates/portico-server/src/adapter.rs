use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ServerError};
use crate::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    InProcess,
    Ipc,
    Http,
    WebSocket,
    Binary,
    Gateway,
}

impl Transport {
    /// Start order. Stop runs in reverse.
    pub const ALL: [Transport; 6] = [
        Transport::InProcess,
        Transport::Ipc,
        Transport::Http,
        Transport::WebSocket,
        Transport::Binary,
        Transport::Gateway,
    ];
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transport::InProcess => "in-process",
            Transport::Ipc => "IPC",
            Transport::Http => "HTTP",
            Transport::WebSocket => "WebSocket",
            Transport::Binary => "binary-RPC",
            Transport::Gateway => "gateway",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Unbound,
    Listening,
    Stopped,
}

/// Where an adapter actually listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundAddr {
    InProcess,
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl fmt::Display for BoundAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundAddr::InProcess => f.write_str("in-process"),
            BoundAddr::Tcp(addr) => write!(f, "{}", addr),
            BoundAddr::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// One transport's listener and serve loop.
///
/// An adapter is created already bound (`Listening`); `stop` moves it to
/// `Stopped`, which is terminal. A serve loop that dies on a listener error
/// is reported as `Stopped` as well.
pub struct Adapter {
    transport: Transport,
    local_addr: BoundAddr,
    state: AdapterState,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
    /// Graceful drain deadline; `None` closes immediately
    drain: Option<Duration>,
    registry: Option<Arc<Registry>>,
}

impl Adapter {
    pub(crate) fn listening(
        transport: Transport,
        local_addr: BoundAddr,
        shutdown: CancellationToken,
        task: JoinHandle<()>,
    ) -> Self {
        Adapter {
            transport,
            local_addr,
            state: AdapterState::Listening,
            shutdown,
            task: Some(task),
            drain: None,
            registry: None,
        }
    }

    /// The in-process adapter has no listener, only a registry
    pub(crate) fn in_process(registry: Arc<Registry>) -> Self {
        Adapter {
            transport: Transport::InProcess,
            local_addr: BoundAddr::InProcess,
            state: AdapterState::Listening,
            shutdown: CancellationToken::new(),
            task: None,
            drain: None,
            registry: Some(registry),
        }
    }

    pub(crate) fn with_drain(mut self, drain: Duration) -> Self {
        self.drain = Some(drain);
        self
    }

    pub(crate) fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn local_addr(&self) -> &BoundAddr {
        &self.local_addr
    }

    pub fn registry(&self) -> Option<&Arc<Registry>> {
        self.registry.as_ref()
    }

    pub fn state(&self) -> AdapterState {
        match (&self.state, &self.task) {
            (AdapterState::Listening, Some(task)) if task.is_finished() => AdapterState::Stopped,
            (state, _) => *state,
        }
    }

    /// Closes the listener and releases the registration table. A second
    /// call is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state == AdapterState::Stopped {
            return Ok(());
        }
        self.state = AdapterState::Stopped;
        self.shutdown.cancel();

        let mut outcome = Ok(());
        if let Some(mut task) = self.task.take() {
            match self.drain {
                Some(deadline) => match tokio::time::timeout(deadline, &mut task).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => outcome = Err(self.shutdown_error(format!("serve task: {}", e))),
                    Err(_) => {
                        task.abort();
                        let _ = task.await;
                        outcome = Err(self.shutdown_error(format!(
                            "drain exceeded {:?}, in-flight requests abandoned",
                            deadline
                        )));
                    }
                },
                None => {
                    task.abort();
                    if let Err(e) = task.await {
                        if !e.is_cancelled() {
                            outcome = Err(self.shutdown_error(format!("serve task: {}", e)));
                        }
                    }
                }
            }
        }

        if let Some(registry) = &self.registry {
            registry.stop();
        }
        if let BoundAddr::Unix(path) = &self.local_addr {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Could not remove socket {}: {}", path.display(), e);
                }
            }
        }

        tracing::debug!("{} endpoint closed, endpoint: {}", self.transport, self.local_addr);
        outcome
    }

    fn shutdown_error(&self, message: String) -> ServerError {
        ServerError::Shutdown {
            transport: self.transport,
            message,
        }
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
