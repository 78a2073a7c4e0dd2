//! The seam between the interceptor and the HTTP transport underneath it.
//!
//! The transport (connection pooling, TLS, redirects, cookies, caching) is
//! supplied by the embedding application. The interceptor only needs a
//! factory that turns a prepared request into an in-flight [`Transfer`], and
//! a stream of [`Signal`](crate::interceptor::Signal)s reporting what happens to
//! it afterwards.

use crate::config::TlsVersion;
use bytes::Bytes;
use http::Method;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

/// Identifier assigned to every intercepted request.
pub type RequestId = u64;

/// Upper bound on how much of an upload body is copied into events.
pub const MAX_POST_BODY_PEEK: usize = 10 * 1000 * 1000;

/// Content type applied to uploads that don't declare one.
pub const DEFAULT_FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// A single header line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Ordered header list. Duplicate names are allowed; lookups are
/// case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct HeaderList(Vec<Header>);

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Appends a header, keeping any existing ones with the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Replaces every header called `name` with a single one. The header
    /// keeps the position of the first replaced entry.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter().position(|h| h.name.eq_ignore_ascii_case(&name)) {
            Some(first) => {
                self.0[first] = Header { name: name.clone(), value };
                let mut index = 0;
                self.0.retain(|h| {
                    let keep = index <= first || !h.name.eq_ignore_ascii_case(&name);
                    index += 1;
                    keep
                });
            }
            None => self.append(name, value),
        }
    }

    /// Removes every header called `name`.
    pub fn remove(&mut self, name: &str) {
        self.0.retain(|h| !h.name.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderList {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut list = Self::new();
        for (name, value) in iter {
            list.append(name, value);
        }
        list
    }
}

/// TLS settings attached to outgoing requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPolicy {
    /// Verify the peer certificate chain.
    pub verify_peer: bool,
    pub protocol: TlsVersion,
    /// Extra CA certificates (PEM) to trust.
    pub ca_certificates: Option<PathBuf>,
}

/// A request as handed to the transport.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub method: Method,
    /// Where the connection actually goes (after any override).
    pub url: Url,
    pub headers: HeaderList,
    pub tls: Option<TlsPolicy>,
}

/// An upload body the transport will read. `peek` must not consume it.
pub trait BodySource: Send + Sync {
    fn peek(&self, max: usize) -> Bytes;
}

impl BodySource for Bytes {
    fn peek(&self, max: usize) -> Bytes {
        self.slice(..self.len().min(max))
    }
}

/// Response metadata as currently known by a transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    pub url: String,
    pub status: Option<u16>,
    pub status_text: Option<String>,
    pub content_type: Option<String>,
    pub redirect_url: Option<String>,
    pub body_size: u64,
    pub headers: HeaderList,
}

/// Credentials supplied in answer to an authentication challenge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// An in-flight exchange owned by the transport.
///
/// Every method is a request; its effect is reported back asynchronously
/// through the transport's signals.
pub trait Transfer: Send + Sync {
    /// Cancel the transfer.
    fn abort(&self);

    /// Close the transfer after a locally synthesized response.
    fn close(&self);

    /// Continue despite the TLS errors just reported.
    fn ignore_tls_errors(&self);

    /// Answer the pending authentication challenge.
    fn authenticate(&self, credentials: &Credentials);

    fn response(&self) -> ResponseMeta;
}

/// Factory for transfers.
pub trait Transport: Send + Sync {
    /// Whether TLS connections can be made at all.
    fn supports_tls(&self) -> bool;

    fn create_transfer(
        &self,
        id: RequestId,
        request: &OutgoingRequest,
        body: Option<Arc<dyn BodySource>>,
    ) -> Arc<dyn Transfer>;
}

/// Broad classes of transport failure. The numeric codes are what error
/// events carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    ConnectionRefused,
    RemoteHostClosed,
    HostNotFound,
    Timeout,
    OperationCanceled,
    TlsHandshakeFailed,
    ProxyError,
    ContentError,
    ProtocolError,
    Unknown,
}

impl TransportErrorKind {
    pub fn code(self) -> i32 {
        match self {
            Self::ConnectionRefused => 1,
            Self::RemoteHostClosed => 2,
            Self::HostNotFound => 3,
            Self::Timeout => 4,
            Self::OperationCanceled => 5,
            Self::TlsHandshakeFailed => 6,
            Self::ProxyError => 101,
            Self::ContentError => 201,
            Self::ProtocolError => 301,
            Self::Unknown => 99,
        }
    }
}

/// A failure reported by the transport for one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Whether the method carries an upload body.
pub fn is_upload(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

/// Schemes that never touch the network and are never rewritten.
pub fn is_network_scheme(url: &Url) -> bool {
    !matches!(url.scheme(), "data" | "about" | "blob" | "file" | "qrc")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_list_set_replaces_all() {
        let mut headers: HeaderList =
            [("Accept", "a"), ("X-Id", "1"), ("accept", "b")].into_iter().collect();
        headers.set("ACCEPT", "c");
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("accept"), Some("c"));
        let names: Vec<_> = headers.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["ACCEPT", "X-Id"]);
    }

    #[test]
    fn test_header_list_append_keeps_duplicates() {
        let mut headers = HeaderList::new();
        headers.append("Cookie", "a=1");
        headers.append("Cookie", "b=2");
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("cookie"), Some("a=1"));
        headers.remove("COOKIE");
        assert!(headers.is_empty());
    }

    #[test]
    fn test_body_peek_is_bounded() {
        let body = Bytes::from_static(b"hello world");
        assert_eq!(body.peek(5), Bytes::from_static(b"hello"));
        assert_eq!(body.peek(100), body);
        // Not consumed
        assert_eq!(body.len(), 11);
    }

    #[test]
    fn test_upload_methods() {
        assert!(is_upload(&Method::POST));
        assert!(is_upload(&Method::PUT));
        assert!(!is_upload(&Method::GET));
        assert!(!is_upload(&Method::HEAD));
    }

    #[test]
    fn test_network_scheme() {
        assert!(is_network_scheme(&Url::parse("https://a.com/").unwrap()));
        assert!(!is_network_scheme(&Url::parse("data:text/plain,hi").unwrap()));
    }

    #[test]
    fn test_header_list_serializes_as_name_value_array() {
        let headers: HeaderList = [("A", "1")].into_iter().collect();
        let json = serde_json::to_string(&headers).unwrap();
        assert_eq!(json, r#"[{"name":"A","value":"1"}]"#);
    }
}
