//! End-to-end client behavior against a scripted TCP server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{PassthroughTls, ScriptedServer};
use http::StatusCode;
use managed_http::client::{Proxy, ProxySelector};
use managed_http::{BodyFraming, Error, RedirectMode, Request, RequestBody};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

fn via_proxy() -> Option<Arc<dyn ProxySelector>> {
    let proxy = Proxy::new("http://proxy.test:3128").unwrap();
    Some(Arc::new(proxy) as Arc<dyn ProxySelector>)
}

#[tokio::test]
async fn content_length_body() {
    let server = ScriptedServer::replies(&["HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello"]).await;
    let handler = server.handler();

    let response = handler.send(Request::get("http://a.test/greeting")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.framing(), Some(BodyFraming::ContentLength(5)));
    assert_eq!(response.text().await.unwrap(), "hello");

    let requests = server.requests();
    assert_eq!(requests[0].request_line, "GET /greeting HTTP/1.1");
    assert_eq!(requests[0].header("host"), Some("a.test:80"));
    assert_eq!(requests[0].header("connection"), Some("close"));
}

#[tokio::test]
async fn chunked_body() {
    let server = ScriptedServer::replies(&[
        "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\n\r\n",
    ])
    .await;

    let response = server.handler().send(Request::get("http://a.test/")).await.unwrap();
    assert_eq!(response.framing(), Some(BodyFraming::Chunked));
    assert_eq!(response.text().await.unwrap(), "hello world");
}

#[tokio::test]
async fn endless_redirects_stop_at_the_budget() {
    let server = ScriptedServer::replies(&[
        "HTTP/1.1 301 Moved Permanently\r\nLocation: /again\r\nContent-Length: 0\r\n\r\n",
    ])
    .await;
    let handler = server.handler().max_automatic_redirects(3);

    let response = handler.send(Request::get("http://a.test/start")).await.unwrap();
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    drop(response);

    assert_eq!(server.requests().len(), 4);
    assert_eq!(handler.connections().opened_total(), 4);
    assert_eq!(handler.connections().active_count(), 0);
}

#[tokio::test]
async fn relative_redirect_keeps_the_origin() {
    let server = ScriptedServer::start(|request| match request.target() {
        "/old" => "HTTP/1.1 302 Found\r\nLocation: /new?x=1\r\nContent-Length: 0\r\n\r\n".to_string(),
        _ => "HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nnew".to_string(),
    })
    .await;

    let request = Request::get("http://a.test:8080/old")
        .header("Authorization", "Bearer secret")
        .unwrap();
    let response = server.handler().send(request).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "new");

    let requests = server.requests();
    assert_eq!(requests[1].request_line, "GET /new?x=1 HTTP/1.1");
    assert_eq!(requests[1].header("host"), Some("a.test:8080"));
    assert_eq!(requests[1].header("authorization"), None);
}

#[tokio::test]
async fn http_proxy_uses_absolute_form() {
    let server = ScriptedServer::replies(&["HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"]).await;
    let handler = server.handler().proxy(via_proxy());

    handler.send(Request::get("http://a.test/x?y")).await.unwrap();

    let requests = server.requests();
    assert_eq!(requests[0].request_line, "GET http://a.test:80/x?y HTTP/1.1");
    assert_eq!(requests[0].header("host"), Some("a.test:80"));
}

#[tokio::test]
async fn https_through_proxy_tunnels_then_upgrades() {
    let server = ScriptedServer::start(|request| match request.method() {
        "CONNECT" => "HTTP/1.1 200 Connection established\r\n\r\n".to_string(),
        _ => "HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\nsecure".to_string(),
    })
    .await;
    let tls = PassthroughTls::default();
    let handler = server.handler().proxy(via_proxy()).tls_upgrader(tls.clone());

    let request = Request::get("https://a.test/x").header("Proxy-Authorization", "Basic abc").unwrap();
    let response = handler.send(request).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "secure");

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].request_line, "CONNECT a.test:443 HTTP/1.1");
    assert_eq!(requests[0].header("proxy-authorization"), Some("Basic abc"));
    assert_eq!(requests[1].request_line, "GET /x HTTP/1.1");
    assert_eq!(requests[1].connection, requests[0].connection);
    assert_eq!(requests[1].header("proxy-authorization"), None);
    assert_eq!(*tls.server_names.lock().unwrap(), vec!["a.test".to_string()]);
}

#[tokio::test]
async fn downgrade_is_refused_by_default() {
    let server = ScriptedServer::start(|request| match request.method() {
        "CONNECT" => "HTTP/1.1 200 Connection established\r\n\r\n".to_string(),
        _ if request.target() == "/x" => {
            "HTTP/1.1 302 Found\r\nLocation: http://a.test/x\r\nContent-Length: 0\r\n\r\n".to_string()
        }
        _ => "HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nplain".to_string(),
    })
    .await;
    let handler = server.handler().proxy(via_proxy());

    let response = handler.send(Request::get("https://a.test/x")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn downgrade_is_followed_when_allowed() {
    let server = ScriptedServer::start(|request| match request.method() {
        "CONNECT" => "HTTP/1.1 200 Connection established\r\n\r\n".to_string(),
        _ if request.target() == "/x" => {
            "HTTP/1.1 302 Found\r\nLocation: http://a.test/x\r\nContent-Length: 0\r\n\r\n".to_string()
        }
        _ => "HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nplain".to_string(),
    })
    .await;
    let handler = server.handler().proxy(via_proxy()).redirect_mode(RedirectMode::All);

    let response = handler.send(Request::get("https://a.test/x")).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "plain");

    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].request_line, "GET http://a.test:80/x HTTP/1.1");
    assert_ne!(requests[2].connection, requests[1].connection);
    assert_eq!(handler.connections().active_count(), 0);
}

#[tokio::test]
async fn refused_tunnel_sends_no_request() {
    let server = ScriptedServer::replies(&[
        "HTTP/1.1 407 Proxy Authentication Required\r\nContent-Length: 0\r\n\r\n",
    ])
    .await;
    let handler = server.handler().proxy(via_proxy());

    let err = handler.send(Request::get("https://a.test/secret")).await.unwrap_err();
    assert!(matches!(err.root(), Error::TunnelNegotiationFailed { .. }));

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method(), "CONNECT");
    assert_eq!(handler.connections().active_count(), 0);
}

#[tokio::test]
async fn silent_proxy_fails_the_tunnel() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let handler = managed_http::ManagedHandler::with_opener(move |_host: String, _port: u16| async move {
        let stream = tokio::net::TcpStream::connect(addr).await?;
        Ok::<_, std::io::Error>(Box::new(stream) as managed_http::BoxedTransport)
    })
    .proxy(via_proxy())
    .tls_upgrader(PassthroughTls::default())
    .read_timeout(Some(Duration::from_millis(50)));

    let err = handler.send(Request::get("https://a.test/x")).await.unwrap_err();
    assert!(matches!(err, Error::TunnelNegotiationFailed { source: Some(_), .. }));
    assert!(err.is_timeout());
    assert_eq!(handler.connections().active_count(), 0);
}

#[tokio::test]
async fn chunked_upload_for_unknown_length() {
    let server = ScriptedServer::replies(&["HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n"]).await;

    let body = RequestBody::stream(&b"streamed payload"[..], None);
    let request = Request::post("http://a.test/upload").body(body);
    let response = server.handler().send(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let requests = server.requests();
    assert_eq!(requests[0].header("transfer-encoding"), Some("chunked"));
    assert_eq!(requests[0].body, b"streamed payload");
}

#[tokio::test]
async fn known_length_upload() {
    let server = ScriptedServer::replies(&["HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"]).await;

    let request = Request::post("http://a.test/upload").body("abc");
    server.handler().send(request).await.unwrap();

    let requests = server.requests();
    assert_eq!(requests[0].header("content-length"), Some("3"));
    assert_eq!(requests[0].body, b"abc");
}

#[tokio::test]
async fn unframed_response_can_be_hijacked() {
    let server = ScriptedServer::replies(&[
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: tcp\r\nConnection: Upgrade\r\n\r\nraw bytes",
    ])
    .await;

    let response = server
        .handler()
        .send(Request::get("http://a.test/attach").header("Upgrade", "tcp").unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
    assert_eq!(response.framing(), Some(BodyFraming::RawUntilClose));

    let mut stream = response.hijack().unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    assert_eq!(raw, b"raw bytes");
}

#[tokio::test]
async fn cancellation_aborts_a_stalled_request() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let handler = managed_http::ManagedHandler::with_opener(move |_host: String, _port: u16| async move {
        let stream = tokio::net::TcpStream::connect(addr).await?;
        Ok::<_, std::io::Error>(Box::new(stream) as managed_http::BoxedTransport)
    })
    .proxy(None);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = handler
        .send_cancellable(Request::get("http://a.test/slow"), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(handler.connections().active_count(), 0);
}

#[tokio::test]
async fn read_timeout_fires() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let handler = managed_http::ManagedHandler::with_opener(move |_host: String, _port: u16| async move {
        let stream = tokio::net::TcpStream::connect(addr).await?;
        Ok::<_, std::io::Error>(Box::new(stream) as managed_http::BoxedTransport)
    })
    .proxy(None)
    .read_timeout(Some(Duration::from_millis(50)));

    let err = handler.send(Request::get("http://a.test/slow")).await.unwrap_err();
    assert!(err.is_timeout());
}
