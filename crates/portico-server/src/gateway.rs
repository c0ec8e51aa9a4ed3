//! HTTP/JSON front end that transcodes requests into binary-RPC calls.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use portico_protocol::{decode_body, BoolValue, Code, RpcResponse, Status, StringValue};
use serde_json::{json, Value};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::adapter::{Adapter, BoundAddr, Transport};
use crate::client::{BinaryClient, ClientError};
use crate::config::GrpcConfig;
use crate::cors::{apply_origin_policy, AllowList};
use crate::endpoint::Endpoint;
use crate::error::{Result, ServerError};
use crate::http::{bind_tcp, serve};

/// Body type of a routed method's reply
#[derive(Debug, Clone, Copy)]
enum ValueKind {
    Str,
    Bool,
}

impl ValueKind {
    fn default_value(self) -> Value {
        match self {
            ValueKind::Str => Value::String(String::new()),
            ValueKind::Bool => Value::Bool(false),
        }
    }

    fn decode(self, payload: &[u8]) -> Option<Value> {
        match self {
            ValueKind::Str => decode_body::<StringValue>(payload)
                .ok()
                .map(|body| Value::String(body.value)),
            ValueKind::Bool => decode_body::<BoolValue>(payload)
                .ok()
                .map(|body| Value::Bool(body.value)),
        }
    }
}

/// Starts the gateway on `endpoint`, bridging to the binary-RPC listener
/// bound at `binary_addr`.
pub async fn start(endpoint: &Endpoint, binary_addr: SocketAddr, grpc: &GrpcConfig) -> Result<Adapter> {
    let origins = AllowList::new(&grpc.allowed_origins)?;

    let target = dial_address(binary_addr);
    let client = BinaryClient::connect(&target.to_string())
        .await
        .map_err(|e| ServerError::GatewayDial {
            address: target.to_string(),
            source: match e {
                ClientError::Connect { source, .. } => source,
                other => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
            },
        })?;

    let listener = bind_tcp(endpoint, Transport::Gateway).await?;
    let local_addr = listener.local_addr().map_err(|source| ServerError::BindFailed {
        transport: Transport::Gateway,
        address: endpoint.to_string(),
        source,
    })?;

    let app = apply_origin_policy(router(Arc::new(client)), &origins);
    tracing::info!(
        "gateway endpoint opened, url: http://{}, upstream: {}, cors: {}",
        local_addr,
        target,
        if origins.is_empty() {
            "off".to_string()
        } else {
            grpc.allowed_origins.join(",")
        }
    );

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(serve(listener, app, Transport::Gateway, shutdown.clone()));

    Ok(
        Adapter::listening(Transport::Gateway, BoundAddr::Tcp(local_addr), shutdown, task)
            .with_drain(Duration::from_secs(grpc.shutdown_timeout_secs)),
    )
}

fn router(client: Arc<BinaryClient>) -> Router {
    Router::new()
        .route("/ping/info", get(ping_info))
        .route("/ping/status", get(ping_status))
        .with_state(client)
}

/// A wildcard listen address is reached over loopback
fn dial_address(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}

async fn ping_info(State(client): State<Arc<BinaryClient>>) -> Response {
    forward(&client, "ping", "info", ValueKind::Str).await
}

async fn ping_status(State(client): State<Arc<BinaryClient>>) -> Response {
    forward(&client, "ping", "status", ValueKind::Bool).await
}

async fn forward(client: &BinaryClient, service: &str, method: &str, kind: ValueKind) -> Response {
    match client.call(service, method).await {
        Ok(resp) => transcode(resp, kind),
        Err(e) => {
            tracing::warn!("gateway call {}/{} failed: {}", service, method, e);
            reply(StatusCode::BAD_GATEWAY, kind.default_value())
        }
    }
}

fn transcode(resp: RpcResponse, kind: ValueKind) -> Response {
    if !resp.status.is_ok() {
        tracing::debug!("gateway upstream status {}", resp.status);
        return reply(http_status(&resp.status), kind.default_value());
    }
    match kind.decode(&resp.payload) {
        Some(value) => reply(StatusCode::OK, value),
        None => {
            tracing::error!("gateway could not decode {:?} reply body", kind);
            reply(StatusCode::INTERNAL_SERVER_ERROR, kind.default_value())
        }
    }
}

fn http_status(status: &Status) -> StatusCode {
    match status.code {
        Code::Ok => StatusCode::OK,
        Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::Unimplemented | Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reply(status: StatusCode, value: Value) -> Response {
    (status, Json(json!({ "value": value }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_protocol::encode_body;

    #[test]
    fn test_wildcard_dials_loopback() {
        let addr: SocketAddr = "0.0.0.0:29706".parse().unwrap();
        assert_eq!(dial_address(addr), "127.0.0.1:29706".parse().unwrap());

        let addr: SocketAddr = "[::]:29706".parse().unwrap();
        assert_eq!(dial_address(addr), "[::1]:29706".parse().unwrap());

        let addr: SocketAddr = "10.0.0.5:29706".parse().unwrap();
        assert_eq!(dial_address(addr), addr);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            http_status(&Status::new(Code::Unavailable, "down")),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            http_status(&Status::new(Code::NotFound, "gone")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            http_status(&Status::new(Code::Internal, "boom")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_transcode_bool() {
        let payload = encode_body(&BoolValue { value: true }).unwrap();
        let resp = transcode(RpcResponse::ok(1, payload), ValueKind::Bool);
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = transcode(
            RpcResponse::error(2, Status::new(Code::Unavailable, "node down")),
            ValueKind::Bool,
        );
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_wrong_body_is_internal_error() {
        let payload = encode_body(&StringValue {
            value: "ping.info".to_string(),
        })
        .unwrap();
        let resp = transcode(RpcResponse::ok(1, payload), ValueKind::Bool);
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
