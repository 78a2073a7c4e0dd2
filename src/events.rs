//! Lifecycle events published for every intercepted request.
//!
//! Each request produces one `requested` event, at most one `started`
//! event, and a single terminal event: `finished`, `error` or `timeout`.
//! Payloads serialize to JSON objects whose field names and order are the
//! external contract, e.g.
//!
//! ```text
//! {"event":"requested","id":1,"url":"http://example.com/","method":"GET","headers":[],"time":"..."}
//! ```

use crate::transport::{HeaderList, OutgoingRequest, RequestId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use url::Url;

/// Error code carried by timeout events.
pub const TIMEOUT_ERROR_CODE: i32 = 408;

/// Message carried by timeout events.
pub const TIMEOUT_ERROR_STRING: &str = "Network timeout on resource.";

/// Emitted once per request, before the transfer is created.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedEvent {
    pub id: RequestId,
    /// URL as requested by the application, before any override.
    pub url: String,
    pub method: String,
    pub headers: HeaderList,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_data: Option<String>,
    /// `Host` header injected by an override.
    #[serde(rename = "Host", skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub time: DateTime<Utc>,
}

/// Whether a response event reports the first data or the completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Start,
    End,
}

/// `started` and `finished` payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEvent {
    pub stage: Stage,
    pub id: RequestId,
    pub url: String,
    pub status: Option<u16>,
    pub status_text: Option<String>,
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_size: Option<u64>,
    #[serde(rename = "redirectURL")]
    pub redirect_url: Option<String>,
    pub headers: HeaderList,
    pub time: DateTime<Utc>,
}

/// Transport failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub id: RequestId,
    pub url: String,
    pub error_code: i32,
    pub error_string: String,
}

/// Synthesized when a request outlives the configured timeout. Carries the
/// fields of the original `requested` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutEvent {
    pub id: RequestId,
    pub url: String,
    pub method: String,
    pub headers: HeaderList,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_data: Option<String>,
    pub time: DateTime<Utc>,
    pub error_code: i32,
    pub error_string: String,
}

impl TimeoutEvent {
    pub fn from_requested(requested: &RequestedEvent) -> Self {
        Self {
            id: requested.id,
            url: requested.url.clone(),
            method: requested.method.clone(),
            headers: requested.headers.clone(),
            post_data: requested.post_data.clone(),
            time: requested.time,
            error_code: TIMEOUT_ERROR_CODE,
            error_string: TIMEOUT_ERROR_STRING.to_string(),
        }
    }
}

/// Any lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ResourceEvent {
    Requested(RequestedEvent),
    Started(ResponseEvent),
    Finished(ResponseEvent),
    Error(ErrorEvent),
    Timeout(TimeoutEvent),
}

impl ResourceEvent {
    pub fn id(&self) -> RequestId {
        match self {
            Self::Requested(e) => e.id,
            Self::Started(e) | Self::Finished(e) => e.id,
            Self::Error(e) => e.id,
            Self::Timeout(e) => e.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Requested(_) => "requested",
            Self::Started(_) => "started",
            Self::Finished(_) => "finished",
            Self::Error(_) => "error",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Whether this event ends the request's observable lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished(_) | Self::Error(_) | Self::Timeout(_))
    }
}

/// Lets a `requested` subscriber adjust the request before it is sent.
pub struct RequestControl<'a> {
    request: &'a mut OutgoingRequest,
    aborted: bool,
}

impl<'a> RequestControl<'a> {
    pub fn new(request: &'a mut OutgoingRequest) -> Self {
        Self {
            request,
            aborted: false,
        }
    }

    /// Prevents the request from being sent.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Sets a header, or removes it when `value` is `None`.
    pub fn set_header(&mut self, name: &str, value: Option<&str>) {
        match value {
            Some(value) => self.request.headers.set(name, value),
            None => self.request.headers.remove(name),
        }
    }

    /// Points the request at another URL. Returns false if `address` does
    /// not parse, in which case the request is left alone.
    pub fn change_url(&mut self, address: &str) -> bool {
        match Url::parse(address) {
            Ok(url) => {
                self.request.url = url;
                true
            }
            Err(_) => false,
        }
    }

    pub fn url(&self) -> &Url {
        &self.request.url
    }
}

/// A consumer of lifecycle events.
pub trait EventSink: Send {
    fn on_event(&self, event: &ResourceEvent);

    /// Called with the pending request before the `requested` event is
    /// published.
    fn on_requested(&self, _event: &RequestedEvent, _control: &mut RequestControl<'_>) {}
}

/// Fan-out to every registered sink, in registration order.
#[derive(Default)]
pub struct EventEmitter {
    sinks: Vec<Box<dyn EventSink>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.add_sink(sink);
        self
    }

    pub fn add_sink(&mut self, sink: impl EventSink + 'static) {
        self.sinks.push(Box::new(sink));
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Gives every sink a chance to adjust the request, then publishes it.
    pub fn emit_requested(&self, event: RequestedEvent, control: &mut RequestControl<'_>) {
        for sink in &self.sinks {
            sink.on_requested(&event, control);
        }
        self.emit(ResourceEvent::Requested(event));
    }

    pub fn emit(&self, event: ResourceEvent) {
        for sink in &self.sinks {
            sink.on_event(&event);
        }
    }
}

/// Forwards events over a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ResourceEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<ResourceEvent>) -> Self {
        Self { tx }
    }

    /// Creates a sink together with the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ResourceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn on_event(&self, event: &ResourceEvent) {
        if self.tx.send(event.clone()).is_err() {
            trace!(id = event.id(), kind = event.kind(), "Event receiver dropped");
        }
    }
}

/// Logs every event as JSON at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_event(&self, event: &ResourceEvent) {
        match serde_json::to_string(event) {
            Ok(json) => debug!(id = event.id(), kind = event.kind(), payload = %json, "Resource event"),
            Err(e) => debug!(id = event.id(), kind = event.kind(), error = %e, "Unserializable resource event"),
        }
    }
}
