//! Request target normalization.
//!
//! # Responsibilities
//! - Combine the request URI with the caller's target hint
//! - Produce scheme, host, port and path-and-query for one attempt
//! - Render the `Host` header and the absolute form
//!
//! # Design Decisions
//! - Hint values win over values from an absolute URI
//! - IPv6 literals are stored without brackets and bracketed on output
//! - A target is rebuilt for every attempt instead of being patched

use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::error::{Error, Result};
use crate::http::request::RequestUri;

/// Supported URL schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("http") {
            Ok(Scheme::Http)
        } else if s.eq_ignore_ascii_case("https") {
            Ok(Scheme::Https)
        } else {
            Err(Error::UnsupportedScheme(s.to_owned()))
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pre-populated target parts, used when the request URI is relative.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetHint {
    pub scheme: Option<Scheme>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl TargetHint {
    pub fn is_empty(&self) -> bool {
        self.scheme.is_none() && self.host.is_none() && self.port.is_none()
    }
}

/// Fully normalized target for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub scheme: Scheme,
    /// Host name or IP literal, IPv6 without brackets.
    pub host: String,
    pub port: u16,
    /// Origin-form request target, always starting with `/`.
    pub path_and_query: String,
}

impl ResolvedTarget {
    /// Build the target from a request URI and hint.
    pub fn resolve(uri: &RequestUri, hint: &TargetHint) -> Result<Self> {
        match uri {
            RequestUri::Absolute(url) => {
                let scheme = match hint.scheme {
                    Some(scheme) => scheme,
                    None => url.scheme().parse()?,
                };
                let host = match &hint.host {
                    Some(host) => unbracket(host).to_owned(),
                    None => host_of(url).ok_or(Error::MissingHost)?,
                };
                let port = hint
                    .port
                    .or_else(|| url.port())
                    .unwrap_or_else(|| scheme.default_port());
                Ok(Self {
                    scheme,
                    host,
                    port,
                    path_and_query: path_and_query(url),
                })
            }
            RequestUri::Relative(path) => {
                let scheme = hint.scheme.ok_or(Error::MissingScheme)?;
                let host = hint.host.as_deref().ok_or(Error::MissingHost)?;
                let port = hint.port.ok_or(Error::MissingPort)?;
                let path_and_query = if path.starts_with('/') {
                    path.clone()
                } else {
                    format!("/{}", path)
                };
                Ok(Self {
                    scheme,
                    host: unbracket(host).to_owned(),
                    port,
                    path_and_query,
                })
            }
        }
    }

    pub fn is_https(&self) -> bool {
        self.scheme == Scheme::Https
    }

    fn is_ipv6(&self) -> bool {
        self.host.parse::<Ipv6Addr>().is_ok()
    }

    /// `host:port`, with IPv6 literals bracketed. Used for `Host` and `CONNECT`.
    pub fn authority(&self) -> String {
        if self.is_ipv6() {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Value for the `Host` header.
    pub fn host_header(&self) -> String {
        self.authority()
    }

    /// `scheme://host:port/path?query`, the absolute-form request target.
    pub fn absolute_form(&self) -> String {
        format!("{}://{}{}", self.scheme, self.authority(), self.path_and_query)
    }

    pub fn to_url(&self) -> Result<Url> {
        Url::parse(&self.absolute_form())
            .map_err(|e| Error::InvalidRequest(format!("invalid target {}: {}", self.absolute_form(), e)))
    }

    /// The parts a relative redirect keeps.
    pub fn hint(&self) -> TargetHint {
        TargetHint {
            scheme: Some(self.scheme),
            host: Some(self.host.clone()),
            port: Some(self.port),
        }
    }

    /// Scheme, host and port match.
    pub fn same_origin(&self, url: &Url) -> bool {
        url.scheme().eq_ignore_ascii_case(self.scheme.as_str())
            && host_of(url).as_deref() == Some(self.host.as_str())
            && url.port_or_known_default() == Some(self.port)
    }
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.absolute_form())
    }
}

fn unbracket(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

fn host_of(url: &Url) -> Option<String> {
    match url.host()? {
        Host::Domain(domain) if !domain.is_empty() => Some(domain.to_owned()),
        Host::Domain(_) => None,
        Host::Ipv4(addr) => Some(addr.to_string()),
        Host::Ipv6(addr) => Some(addr.to_string()),
    }
}

fn path_and_query(url: &Url) -> String {
    let mut out = url.path().to_owned();
    if out.is_empty() {
        out.push('/');
    }
    if let Some(query) = url.query() {
        out.push('?');
        out.push_str(query);
    }
    out
}
