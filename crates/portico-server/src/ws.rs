use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::adapter::{Adapter, BoundAddr, Transport};
use crate::config::RpcConfig;
use crate::cors::{origin_allowed, AllowList};
use crate::endpoint::Endpoint;
use crate::error::{Result, ServerError};
use crate::http::{bind_tcp, serve};
use crate::registry::Registry;

/// Largest accepted message: 5 MiB
const MAX_MESSAGE_SIZE: usize = 5 * 1024 * 1024;

#[derive(Clone)]
struct WsState {
    registry: Arc<Registry>,
    origins: Arc<AllowList>,
    shutdown: CancellationToken,
}

/// Binds the WebSocket JSON-RPC listener. Each text message is one call or
/// batch; replies go back as text messages.
pub async fn start(endpoint: &Endpoint, registry: Arc<Registry>, rpc: &RpcConfig) -> Result<Adapter> {
    let origins = AllowList::new(&rpc.ws_origins)?;

    let listener = bind_tcp(endpoint, Transport::WebSocket).await?;
    let local_addr = listener.local_addr().map_err(|source| ServerError::BindFailed {
        transport: Transport::WebSocket,
        address: endpoint.to_string(),
        source,
    })?;
    tracing::info!("WebSocket endpoint opened, url: ws://{}", local_addr);

    let shutdown = CancellationToken::new();
    let state = WsState {
        registry: registry.clone(),
        origins: Arc::new(origins),
        shutdown: shutdown.clone(),
    };
    let app = Router::new()
        .route("/", get(ws_upgrade_handler))
        .with_state(state);
    let task = tokio::spawn(serve(listener, app, Transport::WebSocket, shutdown.clone()));

    Ok(
        Adapter::listening(Transport::WebSocket, BoundAddr::Tcp(local_addr), shutdown, task)
            .with_drain(Duration::from_secs(rpc.shutdown_timeout_secs))
            .with_registry(registry),
    )
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<WsState>,
) -> Response {
    // An empty list accepts any origin
    if !state.origins.is_empty() && !origin_allowed(&state.origins, headers.get(header::ORIGIN)) {
        tracing::debug!("WebSocket upgrade refused for origin {:?}", headers.get(header::ORIGIN));
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| {
            handle_socket(socket, state.registry, state.shutdown.child_token())
        })
        .into_response()
}

async fn handle_socket(mut socket: WebSocket, registry: Arc<Registry>, shutdown: CancellationToken) {
    loop {
        let msg = tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            msg = socket.recv() => msg,
        };

        let text = match msg {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    tracing::debug!("WebSocket binary message is not UTF-8, closing");
                    return;
                }
            },
            Some(Ok(Message::Close(_))) | None => return,
            // Pings are answered by the protocol layer
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!("WebSocket receive failed: {}", e);
                return;
            }
        };

        if let Some(reply) = registry.handle_text(&text).await {
            if socket.send(Message::Text(reply)).await.is_err() {
                return;
            }
        }
    }
}
