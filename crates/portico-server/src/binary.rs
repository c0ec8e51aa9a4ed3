use futures::{SinkExt, StreamExt};
use portico_protocol::{RpcResponse, ServerCodec};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::adapter::{Adapter, BoundAddr, Transport};
use crate::endpoint::Endpoint;
use crate::error::{Result, ServerError};
use crate::registry::Registry;

/// Replies buffered per connection before request handling waits on the writer
const RESPONSE_BUFFER: usize = 64;

/// Binds the binary-RPC listener and starts serving
pub async fn start(endpoint: &Endpoint, registry: Arc<Registry>) -> Result<Adapter> {
    let bind_failed = |source| ServerError::BindFailed {
        transport: Transport::Binary,
        address: endpoint.to_string(),
        source,
    };

    let address = match endpoint {
        Endpoint::Tcp { authority, .. } => authority,
        Endpoint::Unix { .. } => {
            return Err(ServerError::Config(format!(
                "binary-RPC address must be a TCP address, got {}",
                endpoint
            )))
        }
    };
    let listener = TcpListener::bind(address.as_str()).await.map_err(bind_failed)?;
    let local_addr = listener.local_addr().map_err(bind_failed)?;
    tracing::info!("binary-RPC endpoint opened, url: tcp://{}", local_addr);

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(serve(listener, registry.clone(), shutdown.clone()));

    Ok(
        Adapter::listening(Transport::Binary, BoundAddr::Tcp(local_addr), shutdown, task)
            .with_registry(registry),
    )
}

async fn serve(listener: TcpListener, registry: Arc<Registry>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    tracing::debug!("binary-RPC connection from {}", addr);
                    let registry = registry.clone();
                    let shutdown = shutdown.child_token();
                    tokio::spawn(async move {
                        handle_connection(stream, registry, shutdown).await;
                        tracing::debug!("binary-RPC connection from {} closed", addr);
                    });
                }
                Err(e) => {
                    tracing::error!("binary-RPC accept failed: {}", e);
                    break;
                }
            }
        }
    }
}

/// Requests on one connection are handled concurrently; replies go out in
/// completion order and are matched by id on the client.
async fn handle_connection(stream: TcpStream, registry: Arc<Registry>, shutdown: CancellationToken) {
    let (mut sink, mut frames) = Framed::new(stream, ServerCodec::new()).split();
    let (tx, mut rx) = mpsc::channel::<RpcResponse>(RESPONSE_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(resp) = rx.recv().await {
            if let Err(e) = sink.send(resp).await {
                tracing::debug!("binary-RPC write failed: {}", e);
                break;
            }
        }
    });

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = frames.next() => frame,
        };

        match frame {
            Some(Ok(req)) => {
                let registry = registry.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let resp = registry.handle_binary(req).await;
                    let _ = tx.send(resp).await;
                });
            }
            Some(Err(e)) => {
                // Framing cannot resynchronize after a bad frame
                tracing::warn!("binary-RPC dropped connection on bad frame: {}", e);
                break;
            }
            None => break,
        }
    }

    drop(tx);
    if shutdown.is_cancelled() {
        writer.abort();
    } else {
        let _ = writer.await;
    }
}
