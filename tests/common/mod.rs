//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use managed_http::net::tls::TlsUpgrader;
use managed_http::{BoxedTransport, ManagedHandler};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// One request as the scripted server saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub connection: usize,
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn method(&self) -> &str {
        self.request_line.split(' ').next().unwrap_or("")
    }

    pub fn target(&self) -> &str {
        self.request_line.split(' ').nth(1).unwrap_or("")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A TCP server that answers each request head with whatever the responder
/// returns, then closes. A 2xx answer to `CONNECT` keeps the connection open
/// for the tunnelled request.
pub struct ScriptedServer {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
    connections: Arc<Mutex<usize>>,
}

impl ScriptedServer {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&Recorded) -> String + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0));
        let responder = Arc::new(responder);

        let seen = Arc::clone(&requests);
        let accepted = Arc::clone(&connections);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let connection = {
                    let mut count = accepted.lock().unwrap();
                    *count += 1;
                    *count
                };
                let responder = Arc::clone(&responder);
                let seen = Arc::clone(&seen);
                tokio::spawn(async move {
                    let _ = serve(socket, connection, responder, seen).await;
                });
            }
        });

        Self {
            addr,
            requests,
            connections,
        }
    }

    /// Serve a fixed list of replies, one per request, repeating the last.
    pub async fn replies(replies: &[&'static str]) -> Self {
        let replies: Vec<&'static str> = replies.to_vec();
        let next = Arc::new(Mutex::new(0usize));
        Self::start(move |_| {
            let mut index = next.lock().unwrap();
            let reply = replies[(*index).min(replies.len() - 1)];
            *index += 1;
            reply.to_string()
        })
        .await
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn connection_count(&self) -> usize {
        *self.connections.lock().unwrap()
    }

    /// A handler whose every transport, whatever the host, lands on this server.
    pub fn handler(&self) -> ManagedHandler {
        let addr = self.addr;
        ManagedHandler::with_opener(move |_host: String, _port: u16| async move {
            let stream = TcpStream::connect(addr).await?;
            Ok::<_, io::Error>(Box::new(stream) as BoxedTransport)
        })
        .proxy(None)
        .tls_upgrader(PassthroughTls::default())
    }
}

async fn serve<F>(
    socket: TcpStream,
    connection: usize,
    responder: Arc<F>,
    seen: Arc<Mutex<Vec<Recorded>>>,
) -> io::Result<()>
where
    F: Fn(&Recorded) -> String + Send + Sync + 'static,
{
    let mut reader = BufReader::new(socket);
    loop {
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).await? == 0 {
            return Ok(());
        }
        let request_line = request_line.trim_end().to_string();

        let mut headers = Vec::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await?;
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
        }

        let mut recorded = Recorded {
            connection,
            request_line,
            headers,
            body: Vec::new(),
        };
        recorded.body = read_body(&mut reader, &recorded).await?;
        let reply = responder(&recorded);
        let tunnel = recorded.method() == "CONNECT" && reply.starts_with("HTTP/1.1 2");
        seen.lock().unwrap().push(recorded);

        reader.get_mut().write_all(reply.as_bytes()).await?;
        if !tunnel {
            reader.get_mut().shutdown().await?;
            return Ok(());
        }
    }
}

async fn read_body(reader: &mut BufReader<TcpStream>, request: &Recorded) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    if let Some(length) = request.header("content-length") {
        let length: usize = length.parse().unwrap_or(0);
        body.resize(length, 0);
        reader.read_exact(&mut body).await?;
    } else if request.header("transfer-encoding") == Some("chunked") {
        loop {
            let mut size = String::new();
            reader.read_line(&mut size).await?;
            let size = usize::from_str_radix(size.trim(), 16).unwrap_or(0);
            let mut chunk = vec![0; size + 2];
            reader.read_exact(&mut chunk).await?;
            if size == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..size]);
        }
    }
    Ok(body)
}

/// Skips the handshake and records which server names were asked for.
#[derive(Debug, Clone, Default)]
pub struct PassthroughTls {
    pub server_names: Arc<Mutex<Vec<String>>>,
}

impl TlsUpgrader for PassthroughTls {
    fn authenticate_as_client<'a>(
        &'a self,
        stream: BoxedTransport,
        server_name: &'a str,
    ) -> BoxFuture<'a, io::Result<BoxedTransport>> {
        self.server_names.lock().unwrap().push(server_name.to_string());
        Box::pin(async move { Ok(stream) })
    }
}
