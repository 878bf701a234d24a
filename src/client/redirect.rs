//! Redirect policy.
//!
//! Only `301 Moved Permanently` and `302 Found` with a `Location` header are
//! followed. The redirect budget is enforced by the handler.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::client::target::{ResolvedTarget, Scheme, TargetHint};

/// Which redirects the handler follows automatically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectMode {
    /// Never follow redirects.
    None,
    /// Follow redirects, except from HTTPS to plain HTTP.
    #[default]
    NoDowngrade,
    /// Follow every redirect.
    All,
}

/// What the next attempt should request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    /// Same origin. Only the path and query change; `Host` is kept.
    Relative {
        path_and_query: String,
        hint: TargetHint,
    },
    /// A new URI. Hint, `Host` and `Authorization` are reset.
    Absolute(Url),
}

impl Redirect {
    pub fn kind(&self) -> &'static str {
        match self {
            Redirect::Relative { .. } => "relative",
            Redirect::Absolute(_) => "absolute",
        }
    }
}

/// Decide whether a response redirects, and where to.
pub fn evaluate(
    mode: RedirectMode,
    current: &ResolvedTarget,
    status: StatusCode,
    location: Option<&str>,
) -> Option<Redirect> {
    if mode == RedirectMode::None {
        return None;
    }
    if status != StatusCode::MOVED_PERMANENTLY && status != StatusCode::FOUND {
        return None;
    }
    let location = location?.trim();
    if location.is_empty() {
        return None;
    }

    match Url::parse(location) {
        Ok(url) => absolute(mode, current, url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = current.to_url().ok()?;
            let joined = match base.join(location) {
                Ok(joined) => joined,
                Err(e) => {
                    tracing::debug!(location, error = %e, "Ignoring unparseable redirect location");
                    return None;
                }
            };
            if current.same_origin(&joined) {
                let mut path_and_query = joined.path().to_owned();
                if let Some(query) = joined.query() {
                    path_and_query.push('?');
                    path_and_query.push_str(query);
                }
                Some(Redirect::Relative {
                    path_and_query,
                    hint: current.hint(),
                })
            } else {
                absolute(mode, current, joined)
            }
        }
        Err(e) => {
            tracing::debug!(location, error = %e, "Ignoring unparseable redirect location");
            None
        }
    }
}

fn absolute(mode: RedirectMode, current: &ResolvedTarget, url: Url) -> Option<Redirect> {
    let scheme = match url.scheme().parse::<Scheme>() {
        Ok(scheme) => scheme,
        Err(_) => {
            tracing::debug!(location = %url, "Not following redirect to unsupported scheme");
            return None;
        }
    };
    if current.is_https() && scheme == Scheme::Http && mode == RedirectMode::NoDowngrade {
        tracing::debug!(from = %current, to = %url, "Not following HTTPS to HTTP redirect");
        return None;
    }
    Some(Redirect::Absolute(url))
}
