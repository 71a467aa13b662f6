//! 服务器测试
//!
//! HTTP 路由用 `oneshot` 直接调用；终端端点起一个真实监听端口，
//! 用 tokio-tungstenite 作为客户端。

use super::*;
use crate::middleware::issue_token;
use crate::server::handlers::LoginResponse;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, client::IntoClientRequest, http::HeaderValue, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_config() -> Config {
    let mut config = Config::default();
    config.auth.password = "secret".to_string();
    config
}

async fn spawn_server(config: Config) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::new(config);
    tokio::spawn(async move {
        let _ = serve(listener, state, std::future::pending()).await;
    });
    addr
}

fn ws_url(addr: SocketAddr, config: &Config, query: &str) -> String {
    format!(
        "ws://{}/api/terminal/ws?token={}&{}",
        addr,
        issue_token(&config.auth),
        query
    )
}

async fn connect(url: &str) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

/// 累积文本帧直到 `done` 成立；返回累积内容和连接是否已关闭
async fn read_until(ws: &mut Client, done: impl Fn(&str) -> bool) -> (String, bool) {
    let mut buf = String::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(10), ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                buf.push_str(&text);
                if done(&buf) {
                    return (buf, false);
                }
            }
            Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) => return (buf, true),
            Ok(Some(Ok(_))) => {}
            Err(_) => panic!("等待输出超时，已收到: {:?}", buf),
        }
    }
}

fn extract_pid(text: &str) -> Option<u32> {
    text.match_indices("PID:").find_map(|(i, _)| {
        let digits: String = text[i + 4..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    })
}

/// 进程已被回收，或只剩僵尸
fn process_gone(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat.contains(") Z "),
        Err(_) => true,
    }
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn login_request(body: &str) -> Request<Body> {
    Request::post("/api/login")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ============================================================================
// HTTP 路由
// ============================================================================

#[tokio::test]
async fn test_health() {
    let app = build_router(AppState::new(test_config()));
    let resp = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_login_issues_token() {
    let config = test_config();
    let app = build_router(AppState::new(config.clone()));
    let resp = app
        .oneshot(login_request(r#"{"username":"admin","password":"secret"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: LoginResponse = serde_json::from_value(body_json(resp).await).unwrap();
    assert_eq!(body.token, issue_token(&config.auth));
    assert_eq!(body.status, "success");
}

#[tokio::test]
async fn test_login_rejects_wrong_password() {
    let app = build_router(AppState::new(test_config()));
    let resp = app
        .oneshot(login_request(r#"{"username":"admin","password":"admin"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["error"], "用户名或密码错误");
}

#[tokio::test]
async fn test_login_rejects_malformed_body() {
    let app = build_router(AppState::new(test_config()));
    let resp = app.oneshot(login_request("not json")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// 终端 WebSocket
// ============================================================================

#[tokio::test]
async fn test_terminal_requires_token() {
    let addr = spawn_server(test_config()).await;
    let url = format!("ws://{}/api/terminal/ws?host=localhost", addr);
    match tokio_tungstenite::connect_async(url.as_str()).await {
        Err(tungstenite::Error::Http(resp)) => assert_eq!(resp.status(), 401),
        other => panic!("未认证的升级应被拒绝: {:?}", other.map(|(_, r)| r.status())),
    }
}

#[tokio::test]
async fn test_terminal_rejects_foreign_origin() {
    let mut config = test_config();
    config.terminal.allow_any_origin = false;
    let addr = spawn_server(config.clone()).await;

    let mut request = ws_url(addr, &config, "host=localhost")
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("origin", HeaderValue::from_static("http://evil.example"));
    match tokio_tungstenite::connect_async(request).await {
        Err(tungstenite::Error::Http(resp)) => assert_eq!(resp.status(), 403),
        other => panic!("跨域升级应被拒绝: {:?}", other.map(|(_, r)| r.status())),
    }
}

#[tokio::test]
async fn test_terminal_missing_host_reports_and_closes() {
    let config = test_config();
    let addr = spawn_server(config.clone()).await;
    let mut ws = connect(&ws_url(addr, &config, "user=root")).await;

    let (text, closed) = read_until(&mut ws, |_| false).await;
    assert!(closed);
    assert_eq!(text, "错误: 未提供主机地址\r\n");
}

#[tokio::test]
async fn test_terminal_remote_refused_reports_and_closes() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = test_config();
    let addr = spawn_server(config.clone()).await;
    let query = format!("host=127.0.0.1:{}&user=root&password=x", port);
    let mut ws = connect(&ws_url(addr, &config, &query)).await;

    let (text, closed) = read_until(&mut ws, |_| false).await;
    assert!(closed);
    assert!(text.starts_with(&format!("正在连接到 root@127.0.0.1:{} ...", port)));
    assert!(text.contains("SSH连接被拒绝"));
}

#[tokio::test]
async fn test_local_terminal_echo() {
    let config = test_config();
    let addr = spawn_server(config.clone()).await;
    let mut ws = connect(&ws_url(addr, &config, "host=localhost")).await;

    let (text, closed) = read_until(&mut ws, |b| b.contains("成功连接到")).await;
    assert!(!closed);
    assert!(text.starts_with("正在启动本地终端 ..."));

    ws.send(Message::Text("echo hello-$((40+2))\n".to_string()))
        .await
        .unwrap();
    let (_, closed) = read_until(&mut ws, |b| b.contains("hello-42")).await;
    assert!(!closed);
}

#[tokio::test]
async fn test_local_resize_is_applied_not_typed() {
    let config = test_config();
    let addr = spawn_server(config.clone()).await;
    let mut ws = connect(&ws_url(addr, &config, "host=localhost")).await;
    read_until(&mut ws, |b| b.contains("成功连接到")).await;

    ws.send(Message::Text(
        r#"{"type":"resize","cols":132,"rows":50}"#.to_string(),
    ))
    .await
    .unwrap();
    ws.send(Message::Text("stty size\n".to_string()))
        .await
        .unwrap();

    let (text, closed) = read_until(&mut ws, |b| b.contains("50 132")).await;
    assert!(!closed);
    assert!(!text.contains("resize"));
}

#[tokio::test]
async fn test_socket_close_kills_local_shell() {
    let config = test_config();
    let addr = spawn_server(config.clone()).await;
    let mut ws = connect(&ws_url(addr, &config, "host=localhost")).await;
    read_until(&mut ws, |b| b.contains("成功连接到")).await;

    ws.send(Message::Text("echo PID:$$\n".to_string()))
        .await
        .unwrap();
    let (text, _) = read_until(&mut ws, |b| extract_pid(b).is_some()).await;
    let pid = extract_pid(&text).unwrap();
    assert!(!process_gone(pid));

    ws.close(None).await.unwrap();
    drop(ws);

    let mut gone = false;
    for _ in 0..50 {
        if process_gone(pid) {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(gone, "shell {} 未随连接关闭而退出", pid);
}

#[test]
fn test_extract_pid() {
    assert_eq!(extract_pid("echo PID:$$\r\nPID:4242\r\n"), Some(4242));
    assert_eq!(extract_pid("echo PID:$$"), None);
}
