use futures::{SinkExt, StreamExt};
use portico_protocol::{decode_body, BoolValue, Code, ModuleList, StringValue};
use portico_server::modules::probe::StaticProbe;
use portico_server::{BinaryClient, BoundAddr, Config, ModuleResolver, Transport, TransportManager};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

fn json_rpc_config() -> Config {
    let mut cfg = Config::default();
    cfg.grpc.enabled = false;
    cfg.rpc.enabled = true;
    cfg.rpc.http_enabled = true;
    cfg.rpc.http_endpoint = "tcp://127.0.0.1:0".to_string();
    cfg.rpc.ws_enabled = true;
    cfg.rpc.ws_endpoint = "tcp://127.0.0.1:0".to_string();
    cfg
}

async fn start(cfg: Config) -> TransportManager {
    let manager = TransportManager::new(
        cfg,
        ModuleResolver::new(Arc::new(StaticProbe::healthy())),
    );
    manager.start_all().await.unwrap();
    manager
}

async fn tcp_addr(manager: &TransportManager, transport: Transport) -> SocketAddr {
    match manager.bound_addr(transport).await {
        Some(BoundAddr::Tcp(addr)) => addr,
        other => panic!("{} not listening: {:?}", transport, other),
    }
}

async fn post_rpc(addr: SocketAddr, body: Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{}/", addr))
        .json(&body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_http_json_rpc() {
    let manager = start(json_rpc_config()).await;
    let addr = tcp_addr(&manager, Transport::Http).await;

    let resp = post_rpc(addr, json!({"jsonrpc": "2.0", "id": 1, "method": "ping_info"})).await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"jsonrpc": "2.0", "id": 1, "result": "ping.info"}));

    let resp = post_rpc(addr, json!({"jsonrpc": "2.0", "id": "m", "method": "rpc_modules"})).await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"], json!({"ping": "1.0"}));

    manager.stop_all().await;
}

#[tokio::test]
async fn test_http_errors_stay_with_the_request() {
    let manager = start(json_rpc_config()).await;
    let addr = tcp_addr(&manager, Transport::Http).await;

    let body: Value = post_rpc(addr, json!({"jsonrpc": "2.0", "id": 7, "method": "ping_nope"}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["error"]["code"], -32601);
    assert_eq!(body["id"], 7);

    let resp = reqwest::Client::new()
        .post(format!("http://{}/", addr))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32700);

    let resp = reqwest::Client::new()
        .post(format!("http://{}/", addr))
        .header("Content-Type", "text/plain")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::UNSUPPORTED_MEDIA_TYPE);

    // The listener is still serving
    let body: Value = post_rpc(addr, json!({"jsonrpc": "2.0", "id": 8, "method": "ping_status"}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["result"], true);

    manager.stop_all().await;
}

#[tokio::test]
async fn test_http_batch_and_notification() {
    let manager = start(json_rpc_config()).await;
    let addr = tcp_addr(&manager, Transport::Http).await;

    let body: Value = post_rpc(
        addr,
        json!([
            {"jsonrpc": "2.0", "id": 1, "method": "ping_info"},
            {"jsonrpc": "2.0", "method": "ping_status"},
            {"jsonrpc": "2.0", "id": 2, "method": "ping_status"}
        ]),
    )
    .await
    .json()
    .await
    .unwrap();
    let replies = body.as_array().unwrap();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0]["result"], "ping.info");
    assert_eq!(replies[1]["result"], true);

    let resp = post_rpc(addr, json!({"jsonrpc": "2.0", "method": "ping_info"})).await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert!(resp.text().await.unwrap().is_empty());

    manager.stop_all().await;
}

#[tokio::test]
async fn test_http_virtual_hosts() {
    let mut cfg = json_rpc_config();
    cfg.rpc.http_virtual_hosts = vec!["localhost".to_string()];
    let manager = start(cfg).await;
    let addr = tcp_addr(&manager, Transport::Http).await;
    let client = reqwest::Client::new();
    let call = json!({"jsonrpc": "2.0", "id": 1, "method": "ping_info"});

    let resp = client
        .post(format!("http://{}/", addr))
        .header("Host", "evil.example")
        .json(&call)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN);

    let resp = client
        .post(format!("http://{}/", addr))
        .header("Host", format!("localhost:{}", addr.port()))
        .json(&call)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    manager.stop_all().await;
}

#[tokio::test]
async fn test_http_cors_allow_list() {
    let mut cfg = json_rpc_config();
    cfg.rpc.http_cors = vec!["http://localhost:*".to_string()];
    let manager = start(cfg).await;
    let addr = tcp_addr(&manager, Transport::Http).await;
    let call = json!({"jsonrpc": "2.0", "id": 1, "method": "ping_info"});

    let resp = reqwest::Client::new()
        .post(format!("http://{}/", addr))
        .header("Origin", "https://evil.example")
        .json(&call)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN);

    let resp = reqwest::Client::new()
        .post(format!("http://{}/", addr))
        .header("Origin", "http://localhost:3000")
        .json(&call)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    manager.stop_all().await;
}

#[tokio::test]
async fn test_websocket_json_rpc() {
    let manager = start(json_rpc_config()).await;
    let addr = tcp_addr(&manager, Transport::WebSocket).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/", addr))
        .await
        .unwrap();
    for id in 1..=3 {
        let call = json!({"jsonrpc": "2.0", "id": id, "method": "ping_info"});
        socket.send(Message::Text(call.to_string())).await.unwrap();

        let reply = match socket.next().await {
            Some(Ok(Message::Text(text))) => text,
            other => panic!("unexpected frame {:?}", other),
        };
        let reply: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["id"], id);
        assert_eq!(reply["result"], "ping.info");
    }

    manager.stop_all().await;
    // The server closes open sockets on stop
    loop {
        match socket.next().await {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(_)) => continue,
        }
    }
}

#[tokio::test]
async fn test_websocket_origin_check() {
    let mut cfg = json_rpc_config();
    cfg.rpc.ws_origins = vec!["https://app.example".to_string()];
    let manager = start(cfg).await;
    let addr = tcp_addr(&manager, Transport::WebSocket).await;

    let mut request = format!("ws://{}/", addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", "https://evil.example".parse().unwrap());
    assert!(tokio_tungstenite::connect_async(request).await.is_err());

    let mut request = format!("ws://{}/", addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", "https://app.example".parse().unwrap());
    assert!(tokio_tungstenite::connect_async(request).await.is_ok());

    manager.stop_all().await;
}

#[tokio::test]
async fn test_ipc_json_rpc() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("portico.ipc");
    let mut cfg = json_rpc_config();
    cfg.rpc.ipc_enabled = true;
    cfg.rpc.ipc_endpoint = format!("ipc://{}", path.display());
    let manager = start(cfg).await;

    let stream = UnixStream::connect(&path).await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    write
        .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping_status\"}\n")
        .await
        .unwrap();
    let reply: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(reply["result"], true);

    write.write_all(b"garbage\n").await.unwrap();
    let reply: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(reply["error"]["code"], -32700);

    manager.stop_all().await;
}

#[tokio::test]
async fn test_binary_rpc_concurrent_calls() {
    let mut cfg = Config::default();
    cfg.grpc.listen_address = String::new();
    cfg.grpc.grpc_listen_address = "tcp://127.0.0.1:0".to_string();
    let manager = start(cfg).await;
    let addr = tcp_addr(&manager, Transport::Binary).await;

    let client = Arc::new(BinaryClient::connect(&addr.to_string()).await.unwrap());
    let calls = (0..64).map(|i| {
        let client = client.clone();
        async move {
            let method = if i % 2 == 0 { "info" } else { "status" };
            (method, client.call("ping", method).await.unwrap())
        }
    });

    for (method, resp) in futures::future::join_all(calls).await {
        assert!(resp.status.is_ok(), "{}", resp.status);
        match method {
            "info" => {
                let body: StringValue = decode_body(&resp.payload).unwrap();
                assert_eq!(body.value, "ping.info");
            }
            _ => {
                let body: BoolValue = decode_body(&resp.payload).unwrap();
                assert!(body.value);
            }
        }
    }

    manager.stop_all().await;
}

#[tokio::test]
async fn test_binary_rpc_errors() {
    let mut cfg = Config::default();
    cfg.grpc.listen_address = String::new();
    cfg.grpc.grpc_listen_address = "tcp://127.0.0.1:0".to_string();
    let manager = start(cfg).await;
    let addr = tcp_addr(&manager, Transport::Binary).await;
    let client = BinaryClient::connect(&addr.to_string()).await.unwrap();

    let resp = client.call("nope", "info").await.unwrap();
    assert_eq!(resp.status.code, Code::NotFound);

    let resp = client.call("ping", "nope").await.unwrap();
    assert_eq!(resp.status.code, Code::Unimplemented);

    let resp = client.call_with("ping", "info", vec![1, 2, 3]).await.unwrap();
    assert_eq!(resp.status.code, Code::InvalidArgument);

    let resp = client.call("rpc", "modules").await.unwrap();
    let list: ModuleList = decode_body(&resp.payload).unwrap();
    assert_eq!(list.modules, vec![("ping".to_string(), "1.0".to_string())]);

    manager.stop_all().await;
}
