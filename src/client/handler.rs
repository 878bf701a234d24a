//! Managed HTTP handler.
//!
//! # Responsibilities
//! - Normalize the request target for every attempt
//! - Decide the route (direct, HTTP proxy, CONNECT tunnel)
//! - Acquire a transport, tunnel and upgrade to TLS as needed
//! - Send over a fresh connection and follow redirects
//!
//! # Data Flow
//! ```text
//! send(request)
//!     → ResolvedTarget::resolve (hint first, then URI)
//!     → plan_route (proxy decision, address line)
//!     → opener (connect timeout) → ConnectionTracker
//!     → CONNECT tunnel (https through a proxy)
//!     → TLS upgrade (https)
//!     → HttpConnection::send
//!     → redirect::evaluate → drop response → next attempt
//! ```
//!
//! # Design Decisions
//! - No connection reuse: every attempt opens and owns one transport
//! - The previous response is dropped before a redirect is attempted
//! - Streamed request bodies are never replayed

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::header::{AUTHORIZATION, CONNECTION, HOST, PROXY_AUTHORIZATION};
use http::{HeaderMap, HeaderValue, Method, Version};
use tokio_util::sync::CancellationToken;

use crate::client::proxy::{plan_route, EnvProxy, NoProxy, Proxy, ProxyMode, ProxySelector, Route};
use crate::client::redirect::{self, Redirect, RedirectMode};
use crate::client::target::{ResolvedTarget, TargetHint};
use crate::config::schema::ClientConfig;
use crate::error::{Error, Result};
use crate::http::buffered::BufferedConnectionStream;
use crate::http::connection::HttpConnection;
use crate::http::request::{OutgoingRequest, Request, RequestBody, RequestUri};
use crate::http::response::Response;
use crate::net::connection::ConnectionTracker;
use crate::net::opener::{BoxedTransport, StreamOpener, TcpOpener};
use crate::net::tls::{
    load_certificates, CertificateValidationCallback, ClientCertificate, RustlsUpgrader, ServerCertificate,
    TlsOptions, TlsUpgrader,
};
use crate::observability::metrics;
use crate::resilience::timeouts::guarded;

/// Default redirect budget per request.
pub const DEFAULT_MAX_REDIRECTS: u32 = 20;

/// Default time allowed to connect and finish the TLS handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// The parts of a request an attempt reads. Every field is `Sync`, so the
/// send future stays `Send`.
struct Attempt<'a> {
    method: &'a Method,
    uri: &'a RequestUri,
    hint: &'a TargetHint,
    version: Version,
    headers: &'a HeaderMap,
}

/// HTTP/1.1 client over raw transports.
///
/// Shareable between tasks; each request owns its own connection.
#[derive(Clone)]
pub struct ManagedHandler {
    opener: Arc<dyn StreamOpener>,
    tls: Arc<dyn TlsUpgrader>,
    proxy: Option<Arc<dyn ProxySelector>>,
    use_proxy: bool,
    max_automatic_redirects: u32,
    redirect_mode: RedirectMode,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    connections: ConnectionTracker,
}

impl ManagedHandler {
    /// TCP transports, WebPKI roots, proxies from the environment.
    pub fn new() -> Self {
        Self::with_opener(TcpOpener::new())
    }

    /// Like [`ManagedHandler::new`] with a custom transport opener.
    pub fn with_opener(opener: impl StreamOpener + 'static) -> Self {
        Self {
            opener: Arc::new(opener),
            tls: Arc::new(RustlsUpgrader::default()),
            proxy: Some(Arc::new(EnvProxy::from_env())),
            use_proxy: true,
            max_automatic_redirects: DEFAULT_MAX_REDIRECTS,
            redirect_mode: RedirectMode::default(),
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            read_timeout: None,
            write_timeout: None,
            connections: ConnectionTracker::new(),
        }
    }

    /// Build a handler from a validated configuration.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let mut handler = Self::new();

        handler.use_proxy = config.proxy.enabled;
        handler.proxy = match &config.proxy.url {
            Some(url) => {
                let proxy = Proxy::new(url)?.no_proxy(NoProxy::parse(&config.proxy.no_proxy));
                Some(Arc::new(proxy) as Arc<dyn ProxySelector>)
            }
            None if config.proxy.from_env => Some(Arc::new(EnvProxy::from_env()) as Arc<dyn ProxySelector>),
            None => None,
        };

        handler.max_automatic_redirects = config.redirects.max_automatic;
        handler.redirect_mode = config.redirects.mode;

        let mut options = TlsOptions::default();
        if let Some(path) = &config.tls.ca_cert_path {
            options.extra_roots = load_certificates(path.as_ref())
                .map_err(|e| Error::TlsConfig(format!("cannot load {}: {}", path, e)))?;
        }
        if let (Some(cert), Some(key)) = (&config.tls.client_cert_path, &config.tls.client_key_path) {
            let certificate = ClientCertificate::from_pem_files(cert.as_ref(), key.as_ref())
                .map_err(|e| Error::TlsConfig(format!("cannot load client certificate {}: {}", cert, e)))?;
            options.client_certificate = Some(certificate);
        }
        if config.tls.accept_invalid_certs {
            tracing::warn!("Server certificate validation is disabled");
            let accept_all: CertificateValidationCallback = Arc::new(|_: &ServerCertificate<'_>| true);
            options.validation_callback = Some(accept_all);
        }
        handler.tls = Arc::new(RustlsUpgrader::new(options)?);

        handler.connect_timeout = config.timeouts.connect();
        handler.read_timeout = config.timeouts.read();
        handler.write_timeout = config.timeouts.write();

        Ok(handler)
    }

    pub fn opener(mut self, opener: impl StreamOpener + 'static) -> Self {
        self.opener = Arc::new(opener);
        self
    }

    pub fn tls_upgrader(mut self, tls: impl TlsUpgrader + 'static) -> Self {
        self.tls = Arc::new(tls);
        self
    }

    /// Replace the proxy selector. `None` means no proxy is configured.
    pub fn proxy(mut self, proxy: Option<Arc<dyn ProxySelector>>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn use_proxy(mut self, use_proxy: bool) -> Self {
        self.use_proxy = use_proxy;
        self
    }

    pub fn max_automatic_redirects(mut self, max: u32) -> Self {
        self.max_automatic_redirects = max;
        self
    }

    pub fn redirect_mode(mut self, mode: RedirectMode) -> Self {
        self.redirect_mode = mode;
        self
    }

    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Open/close accounting for every transport this handler created.
    pub fn connections(&self) -> &ConnectionTracker {
        &self.connections
    }

    pub fn get_max_automatic_redirects(&self) -> u32 {
        self.max_automatic_redirects
    }

    pub fn get_redirect_mode(&self) -> RedirectMode {
        self.redirect_mode
    }

    pub async fn send(&self, request: Request) -> Result<Response> {
        self.send_cancellable(request, &CancellationToken::new()).await
    }

    /// Send `request`, following redirects, until a final response or error.
    pub async fn send_cancellable(&self, request: Request, cancel: &CancellationToken) -> Result<Response> {
        let started = Instant::now();
        let Request {
            method,
            mut uri,
            version,
            mut headers,
            mut body,
            mut hint,
        } = request;
        let mut redirects = 0u32;

        loop {
            let replay = body.try_clone();
            let attempt = Attempt {
                method: &method,
                uri: &uri,
                hint: &hint,
                version,
                headers: &headers,
            };
            let response = self.attempt(attempt, std::mem::take(&mut body), cancel).await?;

            if redirects >= self.max_automatic_redirects {
                return Ok(self.finish(&method, response, started));
            }
            let next = match &response.target {
                Some(target) => redirect::evaluate(self.redirect_mode, target, response.status, response.location()),
                None => None,
            };
            let Some(next) = next else {
                return Ok(self.finish(&method, response, started));
            };
            let Some(replay) = replay else {
                tracing::debug!(status = response.status.as_u16(), "Request body was streamed; not following redirect");
                return Ok(self.finish(&method, response, started));
            };

            let status = response.status;
            drop(response);
            body = replay;
            redirects += 1;
            metrics::record_redirect(next.kind());

            match next {
                Redirect::Relative { path_and_query, hint: kept } => {
                    tracing::debug!(status = status.as_u16(), location = %path_and_query, redirects, "Following relative redirect");
                    uri = RequestUri::Relative(path_and_query);
                    hint = kept;
                    headers.remove(AUTHORIZATION);
                }
                Redirect::Absolute(url) => {
                    tracing::debug!(status = status.as_u16(), location = %url, redirects, "Following redirect");
                    uri = RequestUri::Absolute(url);
                    hint = TargetHint::default();
                    headers.remove(HOST);
                    headers.remove(AUTHORIZATION);
                }
            }
        }
    }

    fn finish(&self, method: &Method, response: Response, started: Instant) -> Response {
        metrics::record_response(method.as_str(), response.status.as_u16(), started);
        tracing::debug!(
            method = %method,
            status = response.status.as_u16(),
            url = ?response.target.as_ref().map(ToString::to_string),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        );
        response
    }

    async fn attempt(&self, attempt: Attempt<'_>, body: RequestBody, cancel: &CancellationToken) -> Result<Response> {
        let target = ResolvedTarget::resolve(attempt.uri, attempt.hint)
            .inspect_err(|_| metrics::record_failure("resolve"))?;

        let mut headers = attempt.headers.clone();
        if !headers.contains_key(HOST) {
            let host = HeaderValue::from_str(&target.host_header())
                .map_err(|_| Error::InvalidRequest(format!("invalid host {:?}", target.host)))?;
            headers.insert(HOST, host);
        }
        headers.insert(CONNECTION, HeaderValue::from_static("close"));

        let selector = if self.use_proxy { self.proxy.as_deref() } else { None };
        let route = plan_route(&target, selector).inspect_err(|_| metrics::record_failure("resolve"))?;
        tracing::debug!(
            url = %target,
            proxy_mode = %route.mode,
            connect_host = %route.connect_host,
            connect_port = route.connect_port,
            "Route planned"
        );

        let transport = self
            .connect(&route, cancel)
            .await
            .inspect_err(|_| metrics::record_failure("connect"))?;

        let transport = match route.mode {
            ProxyMode::Tunnel => {
                let tunneled = self
                    .tunnel(transport, &target, &headers, cancel)
                    .await
                    .inspect_err(|_| metrics::record_failure("tunnel"))?;
                // Proxy credentials are for the proxy only.
                headers.remove(PROXY_AUTHORIZATION);
                tunneled
            }
            ProxyMode::None | ProxyMode::Http => transport,
        };

        let transport = if target.is_https() {
            self.upgrade(transport, &target, cancel)
                .await
                .inspect_err(|_| metrics::record_failure("tls"))?
        } else {
            transport
        };

        let stream = BufferedConnectionStream::with_timeouts(transport, self.read_timeout, self.write_timeout);
        let request = OutgoingRequest {
            method: attempt.method.clone(),
            address_line: route.address_line,
            version: attempt.version,
            headers,
            body,
        };
        let mut response = HttpConnection::new(stream)
            .send(request, cancel)
            .await
            .inspect_err(|_| metrics::record_failure("send"))?;
        response.target = Some(target);
        Ok(response)
    }

    async fn connect(&self, route: &Route, cancel: &CancellationToken) -> Result<BoxedTransport> {
        let open = self.opener.open(&route.connect_host, route.connect_port);
        let transport = guarded("connect", cancel, self.connect_timeout, open)
            .await
            .map_err(|e| match e {
                Error::Io(source) => Error::ConnectFailed {
                    host: route.connect_host.clone(),
                    port: route.connect_port,
                    source,
                },
                other => other,
            })?;

        let tracked = self.connections.wrap(transport);
        metrics::record_connection_opened(route.mode.as_str());
        tracing::debug!(
            connection_id = %tracked.id(),
            host = %route.connect_host,
            port = route.connect_port,
            proxy_mode = %route.mode,
            "Connection opened"
        );
        Ok(Box::new(tracked))
    }

    /// Negotiate a `CONNECT` tunnel to the target through the proxy.
    async fn tunnel(
        &self,
        transport: BoxedTransport,
        target: &ResolvedTarget,
        headers: &HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<BoxedTransport> {
        let authority = target.authority();
        let mut request = OutgoingRequest::new(Method::CONNECT, authority.clone());
        if let Some(credentials) = headers.get(PROXY_AUTHORIZATION) {
            request.headers.insert(PROXY_AUTHORIZATION, credentials.clone());
        }
        let host = HeaderValue::from_str(&authority)
            .map_err(|_| Error::InvalidRequest(format!("invalid host {:?}", authority)))?;
        request.headers.insert(HOST, host);

        let stream = BufferedConnectionStream::with_timeouts(transport, self.read_timeout, self.write_timeout);
        let response = match HttpConnection::new(stream).send(request, cancel).await {
            Ok(response) => response,
            Err(e) => {
                return Err(Error::TunnelNegotiationFailed {
                    reason: format!("CONNECT {} failed", authority),
                    source: Some(Box::new(e)),
                })
            }
        };

        if !response.status.is_success() {
            tracing::warn!(
                authority = %authority,
                status = response.status.as_u16(),
                "Proxy refused tunnel"
            );
            return Err(Error::TunnelNegotiationFailed {
                reason: format!("proxy answered CONNECT {} with {}", authority, response.status),
                source: None,
            });
        }

        let stream = response
            .into_content()
            .into_connection()
            .ok_or_else(|| Error::TunnelNegotiationFailed {
                reason: "tunnel connection is no longer available".to_string(),
                source: None,
            })?;
        tracing::debug!(authority = %authority, "Tunnel established");
        Ok(Box::new(stream))
    }

    async fn upgrade(
        &self,
        transport: BoxedTransport,
        target: &ResolvedTarget,
        cancel: &CancellationToken,
    ) -> Result<BoxedTransport> {
        let handshake = self.tls.authenticate_as_client(transport, &target.host);
        guarded("tls handshake", cancel, self.connect_timeout, handshake)
            .await
            .map_err(|e| match e {
                Error::Io(source) => Error::Tls {
                    server_name: target.host.clone(),
                    source,
                },
                other => other,
            })
    }
}

impl Default for ManagedHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ManagedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedHandler")
            .field("use_proxy", &self.use_proxy)
            .field("proxy_configured", &self.proxy.is_some())
            .field("max_automatic_redirects", &self.max_automatic_redirects)
            .field("redirect_mode", &self.redirect_mode)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}
