use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use portico_protocol::jsonrpc::{ErrorObject, Response};
use serde_json::Value;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::{Decoder, Encoder, Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use crate::adapter::{Adapter, BoundAddr, Transport};
use crate::endpoint::Endpoint;
use crate::error::{Result, ServerError};
use crate::registry::Registry;

/// Longest accepted request line: 5 MiB
const MAX_LINE_LENGTH: usize = 5 * 1024 * 1024;

/// Binds the local socket and starts serving newline-delimited JSON-RPC
pub async fn start(endpoint: &Endpoint, registry: Arc<Registry>) -> Result<Adapter> {
    let path = match endpoint {
        Endpoint::Unix { path, .. } => path.clone(),
        Endpoint::Tcp { .. } => {
            return Err(ServerError::Config(format!(
                "IPC address must be a socket path, got {}",
                endpoint
            )))
        }
    };

    let listener = bind(&path).await.map_err(|source| ServerError::BindFailed {
        transport: Transport::Ipc,
        address: endpoint.to_string(),
        source,
    })?;
    tracing::info!("IPC endpoint opened, url: {}", endpoint);

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(serve(listener, registry.clone(), shutdown.clone()));

    Ok(
        Adapter::listening(Transport::Ipc, BoundAddr::Unix(path), shutdown, task)
            .with_registry(registry),
    )
}

/// A live socket file is "in use"; a stale one is replaced. Anything at
/// `path` that is not a socket is left alone.
async fn bind(path: &Path) -> io::Result<UnixListener> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            if UnixStream::connect(path).await.is_ok() {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    "socket is accepting connections",
                ));
            }
            std::fs::remove_file(path)?;
        }
        Ok(_) => {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "path exists and is not a socket",
            ))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    UnixListener::bind(path)
}

async fn serve(listener: UnixListener, registry: Arc<Registry>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, _)) => {
                    let registry = registry.clone();
                    let shutdown = shutdown.child_token();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(socket, registry, shutdown).await {
                            tracing::debug!("IPC client error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("IPC accept failed: {}", e);
                    break;
                }
            }
        }
    }
}

/// One newline-terminated request, or the marker for a line that exceeded
/// the limit and was skipped
enum Line {
    Request(String),
    TooLong,
}

/// `LinesCodec` that reports an over-long line as an item. The inner codec
/// discards up to the next newline on its own, so the connection stays usable.
struct RequestLines(LinesCodec);

impl RequestLines {
    fn new() -> Self {
        RequestLines(LinesCodec::new_with_max_length(MAX_LINE_LENGTH))
    }

    fn wrap(
        decoded: std::result::Result<Option<String>, LinesCodecError>,
    ) -> std::result::Result<Option<Line>, LinesCodecError> {
        match decoded {
            Ok(line) => Ok(line.map(Line::Request)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Line::TooLong)),
            Err(e) => Err(e),
        }
    }
}

impl Decoder for RequestLines {
    type Item = Line;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> std::result::Result<Option<Line>, LinesCodecError> {
        Self::wrap(self.0.decode(buf))
    }

    fn decode_eof(
        &mut self,
        buf: &mut BytesMut,
    ) -> std::result::Result<Option<Line>, LinesCodecError> {
        Self::wrap(self.0.decode_eof(buf))
    }
}

impl Encoder<String> for RequestLines {
    type Error = LinesCodecError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> std::result::Result<(), LinesCodecError> {
        self.0.encode(line, dst)
    }
}

async fn handle_client(
    socket: UnixStream,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
) -> std::result::Result<(), LinesCodecError> {
    let mut framed = Framed::new(socket, RequestLines::new());

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            next = framed.next() => match next {
                None => return Ok(()),
                Some(line) => line?,
            },
        };

        let reply = match line {
            Line::Request(text) if text.trim().is_empty() => continue,
            Line::Request(text) => registry.handle_text(&text).await,
            Line::TooLong => {
                let reply = Response::error(
                    Value::Null,
                    ErrorObject::invalid_request("request line too long"),
                );
                serde_json::to_string(&reply).ok()
            }
        };
        if let Some(reply) = reply {
            framed.send(reply).await?;
        }
    }
}
