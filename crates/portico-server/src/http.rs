use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};

use crate::adapter::{Adapter, BoundAddr, Transport};
use crate::config::RpcConfig;
use crate::cors::{apply_origin_policy, apply_vhost_policy, AllowList};
use crate::endpoint::Endpoint;
use crate::error::{Result, ServerError};
use crate::registry::Registry;

/// Largest accepted request body: 5 MiB
const MAX_BODY_SIZE: usize = 5 * 1024 * 1024;

/// Binds the HTTP JSON-RPC listener and starts serving `POST /`
pub async fn start(endpoint: &Endpoint, registry: Arc<Registry>, rpc: &RpcConfig) -> Result<Adapter> {
    let cors = AllowList::new(&rpc.http_cors)?;
    let vhosts = AllowList::new(&rpc.http_virtual_hosts)?;

    let listener = bind_tcp(endpoint, Transport::Http).await?;
    let local_addr = listener.local_addr().map_err(|source| ServerError::BindFailed {
        transport: Transport::Http,
        address: endpoint.to_string(),
        source,
    })?;

    let app = router(registry.clone(), rpc, &cors, &vhosts);
    tracing::info!(
        "HTTP endpoint opened, url: http://{}, cors: {}, vhosts: {}",
        local_addr,
        rpc.http_cors.join(","),
        rpc.http_virtual_hosts.join(",")
    );

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(serve(listener, app, Transport::Http, shutdown.clone()));

    Ok(
        Adapter::listening(Transport::Http, BoundAddr::Tcp(local_addr), shutdown, task)
            .with_drain(Duration::from_secs(rpc.shutdown_timeout_secs))
            .with_registry(registry),
    )
}

fn router(registry: Arc<Registry>, rpc: &RpcConfig, cors: &AllowList, vhosts: &AllowList) -> Router {
    let timeouts = rpc.http_timeouts;
    let router = Router::new()
        .route("/", post(handle_rpc).get(health))
        .layer(
            ServiceBuilder::new()
                .layer(TimeoutLayer::new(timeouts.write()))
                .layer(RequestBodyTimeoutLayer::new(timeouts.read()))
                .layer(DefaultBodyLimit::max(MAX_BODY_SIZE)),
        )
        .with_state(registry);
    let router = apply_origin_policy(router, cors);
    apply_vhost_policy(router, vhosts)
}

/// Binds a TCP listener for `transport`, mapping failures to `BindFailed`
pub(crate) async fn bind_tcp(endpoint: &Endpoint, transport: Transport) -> Result<TcpListener> {
    let address = match endpoint {
        Endpoint::Tcp { authority, .. } => authority.as_str(),
        Endpoint::Unix { .. } => {
            return Err(ServerError::Config(format!(
                "{} address must be a TCP address, got {}",
                transport, endpoint
            )))
        }
    };
    TcpListener::bind(address)
        .await
        .map_err(|source| ServerError::BindFailed {
            transport,
            address: endpoint.to_string(),
            source,
        })
}

/// Runs an axum app until `shutdown` fires, then drains in-flight requests
pub(crate) async fn serve(
    listener: TcpListener,
    app: Router,
    transport: Transport,
    shutdown: CancellationToken,
) {
    let signal = shutdown.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move { signal.cancelled().await })
        .await;
    if let Err(e) = result {
        tracing::error!("{} server error: {}", transport, e);
    }
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn handle_rpc(
    State(registry): State<Arc<Registry>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if !is_json(&headers) {
        return (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "invalid content type, only application/json is supported",
        )
            .into_response();
    }

    match registry.handle_text(&body).await {
        Some(reply) => ([(header::CONTENT_TYPE, "application/json")], reply).into_response(),
        // Only notifications: nothing to say
        None => StatusCode::OK.into_response(),
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}
