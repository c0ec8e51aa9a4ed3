//! Binary-RPC client used by the gateway to reach the binary listener.

use futures::{SinkExt, StreamExt};
use portico_protocol::{ClientCodec, RpcRequest, RpcResponse};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_BUFFER: usize = 64;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connect to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection closed before a reply arrived")]
    Disconnected,

    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

type Waiters = Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>>;

/// One live connection: a writer task fed by `requests` and a reader task
/// that routes replies to waiters by id.
struct Connection {
    requests: mpsc::Sender<RpcRequest>,
    waiters: Waiters,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl Connection {
    async fn open(address: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|source| ClientError::Connect {
                address: address.to_string(),
                source,
            })?;
        let _ = stream.set_nodelay(true);

        let (mut sink, mut frames) = Framed::new(stream, ClientCodec::new()).split();
        let (requests, mut rx) = mpsc::channel::<RpcRequest>(REQUEST_BUFFER);
        let waiters: Waiters = Arc::new(Mutex::new(HashMap::new()));

        let writer = tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                if let Err(e) = sink.send(req).await {
                    tracing::debug!("binary-RPC client write failed: {}", e);
                    break;
                }
            }
        });

        let reader_waiters = waiters.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = frames.next().await {
                match frame {
                    Ok(resp) => {
                        if let Some(tx) = reader_waiters.lock().await.remove(&resp.id) {
                            let _ = tx.send(resp);
                        }
                    }
                    Err(e) => {
                        tracing::debug!("binary-RPC client read failed: {}", e);
                        break;
                    }
                }
            }
            // Dropping the senders wakes every pending caller
            let pending = reader_waiters.lock().await.drain().count();
            if pending > 0 {
                tracing::debug!("binary-RPC connection lost with {} pending calls", pending);
            }
        });

        Ok(Connection {
            requests,
            waiters,
            writer,
            reader,
        })
    }

    fn is_alive(&self) -> bool {
        !self.reader.is_finished() && !self.writer.is_finished()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}

/// Multiplexes concurrent calls over one connection and re-dials when the
/// connection has dropped.
pub struct BinaryClient {
    address: String,
    conn: Mutex<Option<Arc<Connection>>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl BinaryClient {
    /// Dials `address` eagerly so an unreachable server fails here
    pub async fn connect(address: &str) -> Result<Self, ClientError> {
        let conn = Connection::open(address).await?;
        Ok(BinaryClient {
            address: address.to_string(),
            conn: Mutex::new(Some(Arc::new(conn))),
            next_id: AtomicU64::new(1),
            timeout: DEFAULT_CALL_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn connection(&self) -> Result<Arc<Connection>, ClientError> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            if conn.is_alive() {
                return Ok(conn.clone());
            }
        }
        tracing::debug!("Re-dialing binary-RPC server at {}", self.address);
        let conn = Arc::new(Connection::open(&self.address).await?);
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Calls `service/method` with an empty request body
    pub async fn call(&self, service: &str, method: &str) -> Result<RpcResponse, ClientError> {
        self.call_with(service, method, Vec::new()).await
    }

    pub async fn call_with(
        &self,
        service: &str,
        method: &str,
        payload: Vec<u8>,
    ) -> Result<RpcResponse, ClientError> {
        let conn = self.connection().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = oneshot::channel();
        conn.waiters.lock().await.insert(id, tx);

        let req = RpcRequest {
            id,
            service: service.to_string(),
            method: method.to_string(),
            payload,
        };
        if conn.requests.send(req).await.is_err() {
            conn.waiters.lock().await.remove(&id);
            return Err(ClientError::Disconnected);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(ClientError::Disconnected),
            Err(_) => {
                conn.waiters.lock().await.remove(&id);
                Err(ClientError::Timeout(self.timeout))
            }
        }
    }
}
