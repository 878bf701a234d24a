//! Response model returned to the caller.

use bytes::Bytes;
use http::header::LOCATION;
use http::{HeaderMap, StatusCode, Version};

use crate::client::target::ResolvedTarget;
use crate::error::Result;
use crate::http::body::{BodyFraming, ResponseBodyContent};
use crate::http::buffered::BufferedConnectionStream;

/// A parsed response head plus its still-unread body.
///
/// Dropping the response closes the connection.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    /// Reason phrase as sent by the server, if any.
    pub reason: Option<String>,
    pub version: Version,
    /// Non-content headers. Content headers live on [`Response::content`].
    pub headers: HeaderMap,
    pub content: ResponseBodyContent,
    /// The target this response came from, after redirects.
    pub target: Option<ResolvedTarget>,
}

impl Response {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn content_headers(&self) -> &HeaderMap {
        self.content.headers()
    }

    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|value| value.to_str().ok())
    }

    pub fn framing(&self) -> Option<BodyFraming> {
        self.content.framing()
    }

    pub async fn bytes(mut self) -> Result<Bytes> {
        self.content.bytes().await
    }

    pub async fn text(mut self) -> Result<String> {
        self.content.text().await
    }

    /// Take over the raw connection of an unframed response.
    pub fn hijack(mut self) -> Result<BufferedConnectionStream> {
        self.content.hijack()
    }

    pub fn content_mut(&mut self) -> &mut ResponseBodyContent {
        &mut self.content
    }

    pub fn into_content(self) -> ResponseBodyContent {
        self.content
    }
}
