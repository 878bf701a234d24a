//! Proxy selection and route planning.
//!
//! # Responsibilities
//! - Decide whether a target goes direct, through an HTTP proxy, or through
//!   a `CONNECT` tunnel
//! - Provide a fixed proxy and an environment-driven proxy
//! - Apply `NO_PROXY` bypass patterns
//!
//! # Design Decisions
//! - Plaintext targets are proxied with absolute-form request lines
//! - HTTPS targets are always tunneled; TLS runs end to end over the tunnel
//! - The address line is derived from the target on every attempt

use std::fmt;

use url::Url;

use crate::client::target::ResolvedTarget;
use crate::error::{Error, Result};

/// How one attempt reaches its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMode {
    None,
    /// Plaintext request sent to the proxy in absolute form.
    Http,
    /// `CONNECT` tunnel through the proxy, then TLS to the origin.
    Tunnel,
}

impl ProxyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyMode::None => "none",
            ProxyMode::Http => "http",
            ProxyMode::Tunnel => "tunnel",
        }
    }
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chooses a proxy for a destination.
pub trait ProxySelector: Send + Sync {
    /// Proxy to use for `url`, if any.
    fn proxy_for(&self, url: &Url) -> Option<Url>;

    /// True when `url` must be reached directly.
    fn is_bypassed(&self, url: &Url) -> bool;
}

/// A single `NO_PROXY` pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoProxyPattern {
    /// `*`: bypass every host.
    Wildcard,
    /// Exact host match, lowercased.
    Exact(String),
    /// `example.com` or `.example.com`: the domain and all subdomains.
    /// Stored without the leading dot.
    DomainSuffix(String),
}

impl NoProxyPattern {
    pub fn matches(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        match self {
            NoProxyPattern::Wildcard => true,
            NoProxyPattern::Exact(exact) => host == *exact,
            NoProxyPattern::DomainSuffix(suffix) => {
                host == *suffix || host.ends_with(&format!(".{}", suffix))
            }
        }
    }
}

/// A parsed `NO_PROXY` list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoProxy {
    patterns: Vec<NoProxyPattern>,
}

impl NoProxy {
    /// Parse a comma-separated list of patterns.
    pub fn parse(value: &str) -> Self {
        let patterns = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                if s == "*" {
                    NoProxyPattern::Wildcard
                } else if let Some(suffix) = s.strip_prefix('.') {
                    NoProxyPattern::DomainSuffix(suffix.to_ascii_lowercase())
                } else if s.contains('.') {
                    NoProxyPattern::DomainSuffix(s.to_ascii_lowercase())
                } else {
                    NoProxyPattern::Exact(s.to_ascii_lowercase())
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn from_env() -> Self {
        read_env_var(&["NO_PROXY", "no_proxy"])
            .map(|value| Self::parse(&value))
            .unwrap_or_default()
    }

    pub fn matches(&self, host: &str) -> bool {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        self.patterns.iter().any(|pattern| pattern.matches(host))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// One proxy for every scheme.
#[derive(Debug, Clone)]
pub struct Proxy {
    url: Url,
    no_proxy: NoProxy,
}

impl Proxy {
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            url: parse_proxy_url(url)?,
            no_proxy: NoProxy::default(),
        })
    }

    pub fn no_proxy(mut self, no_proxy: NoProxy) -> Self {
        self.no_proxy = no_proxy;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl ProxySelector for Proxy {
    fn proxy_for(&self, _url: &Url) -> Option<Url> {
        Some(self.url.clone())
    }

    fn is_bypassed(&self, url: &Url) -> bool {
        url.host_str().is_some_and(|host| self.no_proxy.matches(host))
    }
}

/// Proxies from `HTTP_PROXY`, `HTTPS_PROXY` and `NO_PROXY`, read once.
#[derive(Debug, Clone, Default)]
pub struct EnvProxy {
    http: Option<Url>,
    https: Option<Url>,
    no_proxy: NoProxy,
}

impl EnvProxy {
    pub fn from_env() -> Self {
        let http = env_proxy_url(&["HTTP_PROXY", "http_proxy"]);
        let https = env_proxy_url(&["HTTPS_PROXY", "https_proxy"]);
        let no_proxy = NoProxy::from_env();

        tracing::trace!(
            http_proxy = http.as_ref().map(Url::as_str).unwrap_or("<none>"),
            https_proxy = https.as_ref().map(Url::as_str).unwrap_or("<none>"),
            no_proxy_count = no_proxy.len(),
            "Proxy configuration read from environment"
        );

        Self { http, https, no_proxy }
    }

    pub fn new(http: Option<Url>, https: Option<Url>, no_proxy: NoProxy) -> Self {
        Self { http, https, no_proxy }
    }

    pub fn is_configured(&self) -> bool {
        self.http.is_some() || self.https.is_some()
    }
}

impl ProxySelector for EnvProxy {
    fn proxy_for(&self, url: &Url) -> Option<Url> {
        match url.scheme() {
            "https" => self.https.clone(),
            _ => self.http.clone(),
        }
    }

    fn is_bypassed(&self, url: &Url) -> bool {
        url.host_str().is_some_and(|host| self.no_proxy.matches(host))
    }
}

fn read_env_var(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
}

fn env_proxy_url(names: &[&str]) -> Option<Url> {
    let raw = read_env_var(names)?;
    match parse_proxy_url(&raw) {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::warn!(proxy = %raw, error = %e, "Ignoring invalid proxy from environment");
            None
        }
    }
}

/// Parse a proxy URL. A bare `host:port` is taken as `http://host:port`.
pub fn parse_proxy_url(input: &str) -> Result<Url> {
    let url = if input.contains("://") {
        Url::parse(input)
    } else {
        Url::parse(&format!("http://{}", input))
    }
    .map_err(|e| Error::InvalidRequest(format!("invalid proxy URL {:?}: {}", input, e)))?;

    if url.scheme() != "http" {
        return Err(Error::UnsupportedScheme(url.scheme().to_owned()));
    }
    if url.host_str().is_none() {
        return Err(Error::MissingHost);
    }
    Ok(url)
}

/// Where to connect and what to put on the request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub mode: ProxyMode,
    pub connect_host: String,
    pub connect_port: u16,
    pub address_line: String,
}

/// Plan the route for one attempt. `selector` is `None` when proxying is off.
pub fn plan_route(target: &ResolvedTarget, selector: Option<&dyn ProxySelector>) -> Result<Route> {
    let direct = || Route {
        mode: ProxyMode::None,
        connect_host: target.host.clone(),
        connect_port: target.port,
        address_line: target.path_and_query.clone(),
    };

    let Some(selector) = selector else {
        return Ok(direct());
    };
    let url = target.to_url()?;
    if selector.is_bypassed(&url) {
        tracing::trace!(url = %target, "Proxy bypassed");
        return Ok(direct());
    }
    let Some(proxy) = selector.proxy_for(&url) else {
        return Ok(direct());
    };

    let connect_host = proxy
        .host_str()
        .map(|host| host.trim_start_matches('[').trim_end_matches(']').to_owned())
        .ok_or(Error::MissingHost)?;
    let connect_port = proxy.port_or_known_default().ok_or(Error::MissingPort)?;

    let (mode, address_line) = if target.is_https() {
        (ProxyMode::Tunnel, target.path_and_query.clone())
    } else {
        (ProxyMode::Http, target.absolute_form())
    };

    Ok(Route {
        mode,
        connect_host,
        connect_port,
        address_line,
    })
}
