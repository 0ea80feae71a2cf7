//! Plain HTTP forwarding through a running proxy.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

mod common;

use common::{http_response, within};

fn proxied_client(proxy: &common::RunningProxy) -> reqwest::Client {
    reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(format!("http://{}", proxy.addr)).unwrap())
        .build()
        .unwrap()
}

#[tokio::test]
async fn get_returns_origin_status_headers_and_body() {
    let (origin, mut seen) = common::start_origin(|_| {
        http_response("201 Created", &[("X-Origin", "mock"), ("Content-Type", "text/plain")], "hello")
    })
    .await;
    let proxy = common::spawn_proxy(common::test_config()).await;

    let response = proxied_client(&proxy)
        .get(format!("http://{}/greeting?lang=en", origin))
        .header("x-test", "1")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 201);
    assert_eq!(response.headers()["x-origin"], "mock");
    assert_eq!(response.headers()["content-type"], "text/plain");
    assert_eq!(response.text().await.unwrap(), "hello");

    let request = seen.recv().await.unwrap();
    assert_eq!(request.request_line(), "GET /greeting?lang=en HTTP/1.1");
    assert_eq!(request.header("x-test").as_deref(), Some("1"));
    assert_eq!(request.header("host"), Some(origin.to_string()));

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn post_body_reaches_origin_unchanged() {
    let (origin, mut seen) = common::start_origin(|request| {
        let body = String::from_utf8_lossy(&request.body).into_owned();
        http_response("200 OK", &[], &body)
    })
    .await;
    let proxy = common::spawn_proxy(common::test_config()).await;

    let payload = "field=value&other=42".repeat(100);
    let response = proxied_client(&proxy)
        .post(format!("http://{}/submit", origin))
        .body(payload.clone())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), payload);

    let request = seen.recv().await.unwrap();
    assert_eq!(request.request_line(), "POST /submit HTTP/1.1");
    assert_eq!(request.body, payload.as_bytes());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn origin_error_status_is_passed_through() {
    let (origin, _seen) =
        common::start_origin(|_| http_response("404 Not Found", &[], "no such page")).await;
    let proxy = common::spawn_proxy(common::test_config()).await;

    let response = proxied_client(&proxy)
        .get(format!("http://{}/missing", origin))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    assert_eq!(response.text().await.unwrap(), "no such page");

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn unreachable_origin_returns_500_with_error_text() {
    let origin = common::unreachable_addr().await;
    let proxy = common::spawn_proxy(common::test_config()).await;

    let response = proxied_client(&proxy)
        .get(format!("http://{}/", origin))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 500);
    let body = response.text().await.unwrap();
    assert!(body.starts_with("Failed to process request: "), "{body}");

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn proxy_hop_by_hop_headers_are_not_forwarded() {
    let (origin, mut seen) = common::start_origin(|_| http_response("200 OK", &[], "ok")).await;
    let proxy = common::spawn_proxy(common::test_config()).await;

    let mut stream = TcpStream::connect(proxy.addr).await.unwrap();
    let request = format!(
        "GET http://{0}/ HTTP/1.1\r\nHost: {0}\r\nProxy-Connection: keep-alive\r\nProxy-Authorization: Basic dXNlcjpwYXNz\r\nX-Kept: yes\r\n\r\n",
        origin
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let (head, body) = common::read_response(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{head}");
    assert_eq!(body, b"ok");

    let seen = seen.recv().await.unwrap();
    assert_eq!(seen.header("x-kept").as_deref(), Some("yes"));
    assert_eq!(seen.header("proxy-connection"), None);
    assert_eq!(seen.header("proxy-authorization"), None);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn connection_closes_after_max_requests() {
    let (origin, _seen) = common::start_origin(|_| http_response("200 OK", &[], "one")).await;
    let mut config = common::test_config();
    config.max_requests_per_conn = 2;
    let proxy = common::spawn_proxy(config).await;

    let mut stream = TcpStream::connect(proxy.addr).await.unwrap();
    let request = format!("GET http://{0}/ HTTP/1.1\r\nHost: {0}\r\n\r\n", origin);

    stream.write_all(request.as_bytes()).await.unwrap();
    let (first, _) = common::read_response(&mut stream).await;
    assert!(!first.to_ascii_lowercase().contains("connection: close"), "{first}");

    stream.write_all(request.as_bytes()).await.unwrap();
    let (second, body) = common::read_response(&mut stream).await;
    assert!(second.to_ascii_lowercase().contains("connection: close"), "{second}");
    assert_eq!(body, b"one");

    let mut rest = Vec::new();
    within(5, stream.read_to_end(&mut rest)).await.unwrap();
    assert!(rest.is_empty());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn connections_over_per_ip_cap_get_429() {
    let mut config = common::test_config();
    config.max_connections = 1;
    let proxy = common::spawn_proxy(config).await;

    let (origin, _seen) = common::start_origin(|_| http_response("200 OK", &[], "ok")).await;
    let mut first = TcpStream::connect(proxy.addr).await.unwrap();
    let request = format!("GET http://{0}/ HTTP/1.1\r\nHost: {0}\r\n\r\n", origin);
    first.write_all(request.as_bytes()).await.unwrap();
    let (head, _) = common::read_response(&mut first).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{head}");

    let mut second = TcpStream::connect(proxy.addr).await.unwrap();
    let mut response = Vec::new();
    within(5, second.read_to_end(&mut response)).await.unwrap();
    let response = String::from_utf8(response).unwrap();
    assert!(response.starts_with("HTTP/1.1 429 Too Many Requests\r\n"), "{response}");

    // The first connection is unaffected.
    first.write_all(request.as_bytes()).await.unwrap();
    let (head, _) = common::read_response(&mut first).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{head}");

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn origin_stalling_mid_body_is_cut_off() {
    let origin = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin_addr = origin.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = origin.accept().await.unwrap();
        common::read_head(&mut socket).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nhello")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
    });

    let mut config = common::test_config();
    config.client_read_timeout_secs = 1;
    let proxy = common::spawn_proxy(config).await;

    let mut stream = TcpStream::connect(proxy.addr).await.unwrap();
    let request = format!("GET http://{0}/ HTTP/1.1\r\nHost: {0}\r\n\r\n", origin_addr);
    stream.write_all(request.as_bytes()).await.unwrap();

    let head = within(5, common::read_head(&mut stream)).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{head}");

    // The proxy gives up on the origin and closes the inbound connection
    // instead of holding it open behind a stalled body.
    let mut received = Vec::new();
    let _ = within(5, stream.read_to_end(&mut received)).await;
    assert!(received.len() < 100, "{received:?}");

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn shutdown_stops_accepting() {
    let proxy = common::spawn_proxy(common::test_config()).await;
    let addr = proxy.addr;

    proxy.shutdown.trigger();
    within(5, proxy.handle).await.unwrap().unwrap();

    assert!(TcpStream::connect(addr).await.is_err());
}
