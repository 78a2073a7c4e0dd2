//! The interception entry point and the per-request lifecycle.
//!
//! [`NetworkInterceptor::intercept`] runs once per outgoing request, before
//! the transfer exists. It rewrites the destination, injects headers,
//! publishes the `requested` event, creates the transfer and arms the
//! timeout. From then on the transport reports progress through
//! [`Signal`]s and the interceptor turns them into `started` and terminal
//! events.
//!
//! Every request moves through
//!
//! ```text
//! Requested ──> Started ──> Finished | Errored | TimedOut
//!     └─────────────────────────┘
//! ```
//!
//! and emits exactly one terminal event. The registry entry for a request is
//! dropped when the transport reports the transfer finished, which is also
//! when any late signal for it stops having an effect.

use crate::auth::{AuthCoordinator, AuthDecision, AUTH_EXHAUSTED_REASON, AUTH_EXHAUSTED_STATUS};
use crate::config::{Settings, SslConfig};
use crate::events::{
    ErrorEvent, EventEmitter, RequestControl, RequestedEvent, ResourceEvent, ResponseEvent, Stage,
    TimeoutEvent,
};
use crate::overrides::OverrideTable;
use crate::rewriter::RequestRewriter;
use crate::timeout::TimeoutSupervisor;
use crate::tracker::RequestTracker;
use crate::transport::{
    is_upload, BodySource, Credentials, HeaderList, OutgoingRequest, RequestId, ResponseMeta,
    Transfer, Transport, TransportError, TransportErrorKind, DEFAULT_FORM_CONTENT_TYPE,
    MAX_POST_BODY_PEEK,
};
use chrono::Utc;
use http::header::{CONTENT_TYPE, HOST};
use http::Method;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use url::Url;

/// Message carried by the error event of a request aborted by a subscriber.
pub const ABORTED_BY_HANDLER: &str = "Request aborted by handler";

/// A request as issued by the application.
#[derive(Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderList,
    pub body: Option<Arc<dyn BodySource>>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderList::new(),
            body: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl BodySource + 'static) -> Self {
        self.body = Some(Arc::new(body));
        self
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// Notifications from the transport about a transfer.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// Response data is available to read.
    ReadyRead(RequestId),
    /// The transfer is done, successfully or not. Sent exactly once.
    Finished(RequestId),
    /// The transfer failed. `Finished` follows.
    Error(RequestId, TransportError),
    /// TLS verification problems on the transfer's connection.
    TlsErrors(RequestId, Vec<String>),
    /// The server asked for credentials.
    AuthenticationRequired(RequestId),
}

impl Signal {
    pub fn id(&self) -> RequestId {
        match self {
            Self::ReadyRead(id)
            | Self::Finished(id)
            | Self::Error(id, _)
            | Self::TlsErrors(id, _)
            | Self::AuthenticationRequired(id) => *id,
        }
    }
}

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Requested,
    Started,
    Finished,
    Errored,
    TimedOut,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Errored | Self::TimedOut)
    }
}

struct InFlight {
    transfer: Arc<dyn Transfer>,
    requested: RequestedEvent,
    /// URL the connection was made to.
    effective_url: String,
    phase: Phase,
}

/// Intercepts outgoing requests and tracks them until the transport is done
/// with them.
pub struct NetworkInterceptor {
    transport: Arc<dyn Transport>,
    rewriter: RequestRewriter,
    tracker: RequestTracker,
    timeouts: TimeoutSupervisor,
    auth: AuthCoordinator,
    emitter: EventEmitter,
    ssl: SslConfig,
    custom_headers: BTreeMap<String, String>,
    resource_timeout: Option<Duration>,
    in_flight: HashMap<RequestId, InFlight>,
}

impl NetworkInterceptor {
    pub fn new(
        settings: &Settings,
        table: Arc<OverrideTable>,
        transport: Arc<dyn Transport>,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            transport,
            rewriter: RequestRewriter::new(table, settings.interception.enabled),
            tracker: RequestTracker::new(),
            timeouts: TimeoutSupervisor::new(),
            auth: AuthCoordinator::new(
                settings.auth.credentials(),
                settings.network.max_auth_attempts,
            ),
            emitter,
            ssl: settings.ssl.clone(),
            custom_headers: settings.network.custom_headers.clone(),
            resource_timeout: settings.network.resource_timeout(),
            in_flight: HashMap::new(),
        }
    }

    /// Prepares `request`, announces it and hands it to the transport.
    ///
    /// Returns `None` only when a `requested` subscriber aborted the
    /// request; it then gets an error event instead of a transfer.
    pub fn intercept(&mut self, request: Request) -> Option<Arc<dyn Transfer>> {
        let Request {
            method,
            url: original_url,
            headers,
            body,
        } = request;

        let mut outgoing = OutgoingRequest {
            method: method.clone(),
            url: original_url.clone(),
            headers,
            tls: None,
        };

        if self.transport.supports_tls() {
            outgoing.tls = Some(self.ssl.policy());
        } else if original_url.scheme().eq_ignore_ascii_case("https") {
            warn!(url = %original_url, "Request using https scheme without TLS support");
        }

        let rewrite = self.rewriter.rewrite(&outgoing.url);
        outgoing.url = rewrite.url;

        let mut post_data = None;
        if is_upload(&method) {
            let peeked = body
                .as_ref()
                .map(|b| b.peek(MAX_POST_BODY_PEEK))
                .unwrap_or_default();
            post_data = Some(String::from_utf8_lossy(&peeked).into_owned());

            if !outgoing.headers.contains(CONTENT_TYPE.as_str()) {
                outgoing
                    .headers
                    .set(CONTENT_TYPE.as_str(), DEFAULT_FORM_CONTENT_TYPE);
            }
        }

        for (name, value) in &self.custom_headers {
            outgoing.headers.set(name.as_str(), value.as_str());
        }

        let id = self.tracker.next_id();

        let requested = RequestedEvent {
            id,
            url: original_url.to_string(),
            method: method.as_str().to_string(),
            headers: outgoing.headers.clone(),
            post_data,
            host: rewrite.host_header.clone(),
            time: Utc::now(),
        };

        let mut control = RequestControl::new(&mut outgoing);
        self.emitter.emit_requested(requested.clone(), &mut control);
        let aborted = control.is_aborted();

        if aborted {
            debug!(id, url = %original_url, "Request aborted before sending");
            self.tracker.clear(id);
            self.emitter.emit(ResourceEvent::Error(ErrorEvent {
                id,
                url: original_url.to_string(),
                error_code: TransportErrorKind::OperationCanceled.code(),
                error_string: ABORTED_BY_HANDLER.to_string(),
            }));
            return None;
        }

        if let Some(host) = &rewrite.host_header {
            outgoing.headers.set(HOST.as_str(), host.as_str());
        }

        let effective_url = outgoing.url.to_string();
        trace!(
            id,
            method = %method,
            url = %original_url,
            effective_url = %effective_url,
            "Creating transfer"
        );

        let transfer = self.transport.create_transfer(id, &outgoing, body);

        if let Some(timeout) = self.resource_timeout {
            self.timeouts.arm(id, Instant::now(), timeout);
        }

        self.in_flight.insert(
            id,
            InFlight {
                transfer: transfer.clone(),
                requested,
                effective_url,
                phase: Phase::Requested,
            },
        );

        Some(transfer)
    }

    /// Applies one transport notification.
    pub fn handle(&mut self, signal: Signal) {
        match signal {
            Signal::ReadyRead(id) => self.handle_ready_read(id),
            Signal::Finished(id) => self.handle_finished(id),
            Signal::Error(id, error) => self.handle_error(id, error),
            Signal::TlsErrors(id, errors) => self.handle_tls_errors(id, errors),
            Signal::AuthenticationRequired(id) => self.handle_auth_required(id),
        }
    }

    fn handle_ready_read(&mut self, id: RequestId) {
        let Some(entry) = self.in_flight.get_mut(&id) else {
            trace!(id, "Data for unknown request");
            return;
        };
        if entry.phase != Phase::Requested || !self.tracker.mark_started(id) {
            return;
        }

        entry.phase = Phase::Started;
        let meta = entry.transfer.response();
        let event = response_event(Stage::Start, id, meta, &entry.effective_url, true);
        self.emitter.emit(ResourceEvent::Started(event));
    }

    fn handle_finished(&mut self, id: RequestId) {
        let Some(entry) = self.in_flight.remove(&id) else {
            trace!(id, "Finish for unknown request");
            return;
        };
        self.timeouts.disarm(id);
        self.tracker.clear(id);

        if entry.phase.is_terminal() {
            trace!(id, phase = ?entry.phase, "Transfer released");
            return;
        }

        let meta = entry.transfer.response();
        let event = response_event(Stage::End, id, meta, &entry.effective_url, false);
        self.emitter.emit(ResourceEvent::Finished(event));
    }

    fn handle_error(&mut self, id: RequestId, error: TransportError) {
        let Some(entry) = self.in_flight.get_mut(&id) else {
            trace!(id, "Error for unknown request");
            return;
        };

        if entry.phase.is_terminal() {
            debug!(
                id,
                phase = ?entry.phase,
                code = error.kind.code(),
                "Suppressing error for completed request"
            );
            return;
        }

        let url = non_empty_or(entry.transfer.response().url, &entry.effective_url);
        debug!(
            id,
            code = error.kind.code(),
            message = %error.message,
            url = %url,
            "Resource request error"
        );

        entry.phase = Phase::Errored;
        self.timeouts.disarm(id);
        self.emitter.emit(ResourceEvent::Error(ErrorEvent {
            id,
            url,
            error_code: error.kind.code(),
            error_string: error.message,
        }));
    }

    fn handle_tls_errors(&mut self, id: RequestId, errors: Vec<String>) {
        let Some(entry) = self.in_flight.get(&id) else {
            trace!(id, "TLS errors for unknown request");
            return;
        };

        for error in &errors {
            debug!(id, error = %error, "TLS error");
        }

        if self.ssl.ignore_errors {
            entry.transfer.ignore_tls_errors();
        }
    }

    fn handle_auth_required(&mut self, id: RequestId) {
        let Some(entry) = self.in_flight.get_mut(&id) else {
            trace!(id, "Authentication challenge for unknown request");
            return;
        };
        if entry.phase.is_terminal() {
            return;
        }

        match self.auth.on_challenge() {
            AuthDecision::Provide(credentials) => {
                debug!(id, attempt = self.auth.attempts(), "Answering authentication challenge");
                entry.transfer.authenticate(&credentials);
            }
            AuthDecision::Exhausted => {
                warn!(
                    id,
                    max_attempts = self.auth.max_attempts(),
                    "Authentication attempts exhausted"
                );
                entry.phase = Phase::Finished;
                self.timeouts.disarm(id);

                let mut meta = entry.transfer.response();
                meta.status = Some(AUTH_EXHAUSTED_STATUS);
                meta.status_text = Some(AUTH_EXHAUSTED_REASON.to_string());
                let event = response_event(Stage::End, id, meta, &entry.effective_url, false);
                self.emitter.emit(ResourceEvent::Finished(event));

                entry.transfer.close();
            }
        }
    }

    /// Fires every timeout due at `now`: emits the timeout event and asks
    /// the transport to abort the transfer.
    pub fn expire_timeouts(&mut self, now: Instant) {
        for id in self.timeouts.expire(now) {
            let Some(entry) = self.in_flight.get_mut(&id) else {
                continue;
            };
            if entry.phase.is_terminal() {
                continue;
            }

            info!(id, url = %entry.requested.url, "Resource timed out");
            entry.phase = Phase::TimedOut;
            self.emitter
                .emit(ResourceEvent::Timeout(TimeoutEvent::from_requested(&entry.requested)));
            entry.transfer.abort();
        }
    }

    /// Earliest pending timeout.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timeouts.next_deadline()
    }

    pub fn phase(&self, id: RequestId) -> Option<Phase> {
        self.in_flight.get(&id).map(|entry| entry.phase)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_timeout_armed(&self, id: RequestId) -> bool {
        self.timeouts.is_armed(id)
    }

    pub fn set_resource_timeout(&mut self, timeout: Option<Duration>) {
        self.resource_timeout = timeout.filter(|t| !t.is_zero());
    }

    pub fn set_max_auth_attempts(&mut self, max_attempts: u32) {
        self.auth.set_max_attempts(max_attempts);
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.auth.set_username(credentials.username);
        self.auth.set_password(credentials.password);
    }

    pub fn set_custom_headers(&mut self, headers: BTreeMap<String, String>) {
        self.custom_headers = headers;
    }
}

fn non_empty_or(url: String, fallback: &str) -> String {
    if url.is_empty() {
        fallback.to_string()
    } else {
        url
    }
}

fn response_event(
    stage: Stage,
    id: RequestId,
    meta: ResponseMeta,
    effective_url: &str,
    with_body_size: bool,
) -> ResponseEvent {
    ResponseEvent {
        stage,
        id,
        url: non_empty_or(meta.url, effective_url),
        status: meta.status,
        status_text: meta.status_text,
        content_type: meta.content_type,
        body_size: with_body_size.then_some(meta.body_size),
        redirect_url: meta.redirect_url,
        headers: meta.headers,
        time: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventSink;
    use bytes::Bytes;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockTransfer {
        aborted: Mutex<u32>,
        closed: Mutex<u32>,
        ignored_tls: Mutex<bool>,
        auth: Mutex<Vec<Credentials>>,
        response: Mutex<ResponseMeta>,
    }

    impl Transfer for MockTransfer {
        fn abort(&self) {
            *self.aborted.lock().unwrap() += 1;
        }
        fn close(&self) {
            *self.closed.lock().unwrap() += 1;
        }
        fn ignore_tls_errors(&self) {
            *self.ignored_tls.lock().unwrap() = true;
        }
        fn authenticate(&self, credentials: &Credentials) {
            self.auth.lock().unwrap().push(credentials.clone());
        }
        fn response(&self) -> ResponseMeta {
            self.response.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct MockTransport {
        tls: bool,
        created: Mutex<Vec<(RequestId, OutgoingRequest)>>,
        transfers: Mutex<HashMap<RequestId, Arc<MockTransfer>>>,
    }

    impl MockTransport {
        fn transfer(&self, id: RequestId) -> Arc<MockTransfer> {
            self.transfers.lock().unwrap()[&id].clone()
        }
        fn request(&self, id: RequestId) -> OutgoingRequest {
            let created = self.created.lock().unwrap();
            created.iter().find(|(i, _)| *i == id).unwrap().1.clone()
        }
    }

    impl Transport for MockTransport {
        fn supports_tls(&self) -> bool {
            self.tls
        }
        fn create_transfer(
            &self,
            id: RequestId,
            request: &OutgoingRequest,
            _body: Option<Arc<dyn BodySource>>,
        ) -> Arc<dyn Transfer> {
            let transfer = Arc::new(MockTransfer::default());
            transfer.response.lock().unwrap().url = request.url.to_string();
            self.created.lock().unwrap().push((id, request.clone()));
            self.transfers.lock().unwrap().insert(id, transfer.clone());
            transfer
        }
    }

    #[derive(Clone, Default)]
    struct Collect(Arc<Mutex<Vec<ResourceEvent>>>);

    impl EventSink for Collect {
        fn on_event(&self, event: &ResourceEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    impl Collect {
        fn kinds(&self, id: RequestId) -> Vec<&'static str> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.id() == id)
                .map(|e| e.kind())
                .collect()
        }
        fn last(&self) -> ResourceEvent {
            self.0.lock().unwrap().last().cloned().unwrap()
        }
        fn all(&self) -> Vec<ResourceEvent> {
            self.0.lock().unwrap().clone()
        }
    }

    struct Aborter;

    impl EventSink for Aborter {
        fn on_event(&self, _event: &ResourceEvent) {}
        fn on_requested(&self, _event: &RequestedEvent, control: &mut RequestControl<'_>) {
            control.abort();
        }
    }

    fn setup(settings: Settings, table: &str) -> (NetworkInterceptor, Arc<MockTransport>, Collect) {
        let transport = Arc::new(MockTransport::default());
        let events = Collect::default();
        let table = Arc::new(OverrideTable::parse(table).unwrap());
        let interceptor = NetworkInterceptor::new(
            &settings,
            table,
            transport.clone(),
            EventEmitter::new().with_sink(events.clone()),
        );
        (interceptor, transport, events)
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_override_end_to_end() {
        let (mut ic, transport, events) =
            setup(Settings::default(), "example.com = 10.0.0.5,example.com");

        ic.intercept(Request::get(url("http://example.com/path?x=1")))
            .unwrap();

        let sent = transport.request(1);
        assert_eq!(sent.url.as_str(), "http://10.0.0.5/path?x=1");
        assert_eq!(sent.headers.get("host"), Some("example.com"));

        match events.last() {
            ResourceEvent::Requested(e) => {
                assert_eq!(e.id, 1);
                assert_eq!(e.url, "http://example.com/path?x=1");
                assert_eq!(e.method, "GET");
                assert_eq!(e.host.as_deref(), Some("example.com"));
                assert!(e.headers.get("host").is_none());
                assert!(e.post_data.is_none());
            }
            other => panic!("Expected requested event, got {other:?}"),
        }
    }

    #[test]
    fn test_override_without_host_header() {
        let (mut ic, transport, _) = setup(Settings::default(), "example.com = 10.0.0.5");
        ic.intercept(Request::get(url("http://example.com/"))).unwrap();
        let sent = transport.request(1);
        assert_eq!(sent.url.host_str(), Some("10.0.0.5"));
        assert!(sent.headers.get("host").is_none());
    }

    #[test]
    fn test_interception_disabled() {
        let mut settings = Settings::default();
        settings.interception.enabled = false;
        let (mut ic, transport, _) = setup(settings, "example.com = 10.0.0.5,example.com");
        ic.intercept(Request::get(url("http://example.com/"))).unwrap();
        let sent = transport.request(1);
        assert_eq!(sent.url.host_str(), Some("example.com"));
        assert!(sent.headers.get("host").is_none());
    }

    #[test]
    fn test_post_body_and_default_content_type() {
        let (mut ic, transport, events) = setup(Settings::default(), "");
        let request = Request::new(Method::POST, url("http://a.com/form"))
            .body(Bytes::from_static(b"a=1&b=2"));
        ic.intercept(request).unwrap();

        let sent = transport.request(1);
        assert_eq!(
            sent.headers.get("content-type"),
            Some(DEFAULT_FORM_CONTENT_TYPE)
        );
        match events.last() {
            ResourceEvent::Requested(e) => assert_eq!(e.post_data.as_deref(), Some("a=1&b=2")),
            other => panic!("Expected requested event, got {other:?}"),
        }
    }

    #[test]
    fn test_post_keeps_declared_content_type() {
        let (mut ic, transport, _) = setup(Settings::default(), "");
        let request = Request::new(Method::POST, url("http://a.com/"))
            .header("Content-Type", "application/json")
            .body(Bytes::from_static(b"{}"));
        ic.intercept(request).unwrap();
        assert_eq!(
            transport.request(1).headers.get("content-type"),
            Some("application/json")
        );
    }

    #[test]
    fn test_custom_headers_override() {
        let mut settings = Settings::default();
        settings
            .network
            .custom_headers
            .insert("User-Agent".to_string(), "checker/1.0".to_string());
        let (mut ic, transport, _) = setup(settings, "");
        let request = Request::get(url("http://a.com/")).header("user-agent", "browser");
        ic.intercept(request).unwrap();

        let sent = transport.request(1);
        assert_eq!(sent.headers.get("user-agent"), Some("checker/1.0"));
        assert_eq!(sent.headers.len(), 1);
    }

    #[test]
    fn test_tls_policy_attached_when_supported() {
        let mut settings = Settings::default();
        settings.ssl.ignore_errors = true;
        let transport = Arc::new(MockTransport {
            tls: true,
            ..Default::default()
        });
        let mut ic = NetworkInterceptor::new(
            &settings,
            Arc::new(OverrideTable::default()),
            transport.clone(),
            EventEmitter::new(),
        );
        ic.intercept(Request::get(url("https://a.com/"))).unwrap();
        let tls = transport.request(1).tls.unwrap();
        assert!(!tls.verify_peer);
    }

    #[test]
    fn test_https_without_tls_support_still_sent() {
        let (mut ic, transport, _) = setup(Settings::default(), "");
        assert!(ic.intercept(Request::get(url("https://a.com/"))).is_some());
        assert!(transport.request(1).tls.is_none());
    }

    #[test]
    fn test_started_once_then_finished() {
        let (mut ic, transport, events) = setup(Settings::default(), "");
        ic.intercept(Request::get(url("http://a.com/"))).unwrap();
        {
            let transfer = transport.transfer(1);
            let mut meta = transfer.response.lock().unwrap();
            meta.status = Some(200);
            meta.status_text = Some("OK".to_string());
            meta.body_size = 12;
        }

        ic.handle(Signal::ReadyRead(1));
        ic.handle(Signal::ReadyRead(1));
        ic.handle(Signal::ReadyRead(1));
        assert_eq!(ic.phase(1), Some(Phase::Started));
        ic.handle(Signal::Finished(1));

        assert_eq!(events.kinds(1), vec!["requested", "started", "finished"]);
        match &events.all()[1] {
            ResourceEvent::Started(e) => {
                assert_eq!(e.stage, Stage::Start);
                assert_eq!(e.body_size, Some(12));
                assert_eq!(e.status, Some(200));
            }
            other => panic!("Expected started event, got {other:?}"),
        }
        match events.last() {
            ResourceEvent::Finished(e) => {
                assert_eq!(e.stage, Stage::End);
                assert!(e.body_size.is_none());
            }
            other => panic!("Expected finished event, got {other:?}"),
        }
        assert_eq!(ic.in_flight_count(), 0);

        // Late signals are ignored
        ic.handle(Signal::ReadyRead(1));
        ic.handle(Signal::Finished(1));
        assert_eq!(events.kinds(1).len(), 3);
    }

    #[test]
    fn test_error_is_single_terminal_event() {
        let (mut ic, _transport, events) = setup(Settings::default(), "");
        ic.intercept(Request::get(url("http://a.com/"))).unwrap();

        ic.handle(Signal::Error(
            1,
            TransportError::new(TransportErrorKind::ConnectionRefused, "Connection refused"),
        ));
        assert_eq!(ic.phase(1), Some(Phase::Errored));
        ic.handle(Signal::Finished(1));

        assert_eq!(events.kinds(1), vec!["requested", "error"]);
        match &events.all()[1] {
            ResourceEvent::Error(e) => {
                assert_eq!(e.error_code, 1);
                assert_eq!(e.error_string, "Connection refused");
                assert_eq!(e.url, "http://a.com/");
            }
            other => panic!("Expected error event, got {other:?}"),
        }
    }

    #[test]
    fn test_timeout_fires_and_aborts() {
        let mut settings = Settings::default();
        settings.network.resource_timeout_ms = 100;
        let (mut ic, transport, events) = setup(settings, "");
        ic.intercept(Request::get(url("http://slow.example/"))).unwrap();
        assert!(ic.is_timeout_armed(1));

        let later = Instant::now() + Duration::from_secs(1);
        ic.expire_timeouts(later);
        assert_eq!(*transport.transfer(1).aborted.lock().unwrap(), 1);
        assert_eq!(ic.phase(1), Some(Phase::TimedOut));

        // Abort surfaces as a generic error, then finish
        ic.handle(Signal::Error(
            1,
            TransportError::new(TransportErrorKind::OperationCanceled, "Operation canceled"),
        ));
        ic.handle(Signal::Finished(1));
        ic.expire_timeouts(later + Duration::from_secs(1));

        assert_eq!(events.kinds(1), vec!["requested", "timeout"]);
        match events.last() {
            ResourceEvent::Timeout(e) => {
                assert_eq!(e.error_code, 408);
                assert_eq!(e.error_string, "Network timeout on resource.");
                assert_eq!(e.url, "http://slow.example/");
            }
            other => panic!("Expected timeout event, got {other:?}"),
        }
        assert_eq!(*transport.transfer(1).aborted.lock().unwrap(), 1);
    }

    #[test]
    fn test_no_timeout_after_completion() {
        let mut settings = Settings::default();
        settings.network.resource_timeout_ms = 100;
        let (mut ic, transport, events) = setup(settings, "");
        ic.intercept(Request::get(url("http://fast.example/"))).unwrap();

        ic.handle(Signal::ReadyRead(1));
        ic.handle(Signal::Finished(1));
        assert!(!ic.is_timeout_armed(1));
        assert!(ic.next_deadline().is_none());

        ic.expire_timeouts(Instant::now() + Duration::from_secs(5));
        assert_eq!(events.kinds(1), vec!["requested", "started", "finished"]);
        assert_eq!(*transport.transfer(1).aborted.lock().unwrap(), 0);
    }

    #[test]
    fn test_zero_timeout_disables() {
        let (mut ic, _, _) = setup(Settings::default(), "");
        ic.intercept(Request::get(url("http://a.com/"))).unwrap();
        assert!(!ic.is_timeout_armed(1));
    }

    #[test]
    fn test_auth_bounded_attempts() {
        let mut settings = Settings::default();
        settings.auth.username = "user".to_string();
        settings.auth.password = "pass".to_string();
        let (mut ic, transport, events) = setup(settings, "");
        ic.intercept(Request::get(url("http://secure.example/"))).unwrap();

        for _ in 0..3 {
            ic.handle(Signal::AuthenticationRequired(1));
        }
        let transfer = transport.transfer(1);
        assert_eq!(transfer.auth.lock().unwrap().len(), 3);
        assert_eq!(transfer.auth.lock().unwrap()[0].username, "user");
        assert_eq!(*transfer.closed.lock().unwrap(), 0);

        ic.handle(Signal::AuthenticationRequired(1));
        assert_eq!(*transfer.closed.lock().unwrap(), 1);
        match events.last() {
            ResourceEvent::Finished(e) => {
                assert_eq!(e.status, Some(401));
                assert_eq!(e.status_text.as_deref(), Some("Authorization Required"));
            }
            other => panic!("Expected finished event, got {other:?}"),
        }

        // The close produces the transport's own finish, which is swallowed
        ic.handle(Signal::Finished(1));
        assert_eq!(events.kinds(1), vec!["requested", "finished"]);
    }

    #[test]
    fn test_auth_counter_is_shared_between_requests() {
        let (mut ic, transport, _) = setup(Settings::default(), "");
        ic.intercept(Request::get(url("http://a.example/"))).unwrap();
        ic.intercept(Request::get(url("http://b.example/"))).unwrap();

        ic.handle(Signal::AuthenticationRequired(1));
        ic.handle(Signal::AuthenticationRequired(1));
        ic.handle(Signal::AuthenticationRequired(2));
        ic.handle(Signal::AuthenticationRequired(2));

        assert_eq!(transport.transfer(2).auth.lock().unwrap().len(), 1);
        assert_eq!(*transport.transfer(2).closed.lock().unwrap(), 1);
    }

    #[test]
    fn test_tls_errors_ignored_when_configured() {
        let mut settings = Settings::default();
        settings.ssl.ignore_errors = true;
        let (mut ic, transport, _) = setup(settings, "");
        ic.intercept(Request::get(url("https://self-signed.example/"))).unwrap();
        ic.handle(Signal::TlsErrors(1, vec!["self signed certificate".to_string()]));
        assert!(*transport.transfer(1).ignored_tls.lock().unwrap());
    }

    #[test]
    fn test_tls_errors_not_ignored_by_default() {
        let (mut ic, transport, _) = setup(Settings::default(), "");
        ic.intercept(Request::get(url("https://self-signed.example/"))).unwrap();
        ic.handle(Signal::TlsErrors(1, vec!["self signed certificate".to_string()]));
        assert!(!*transport.transfer(1).ignored_tls.lock().unwrap());
    }

    #[test]
    fn test_aborted_by_subscriber() {
        let transport = Arc::new(MockTransport::default());
        let events = Collect::default();
        let mut ic = NetworkInterceptor::new(
            &Settings::default(),
            Arc::new(OverrideTable::default()),
            transport.clone(),
            EventEmitter::new().with_sink(Aborter).with_sink(events.clone()),
        );

        assert!(ic.intercept(Request::get(url("http://ads.example/"))).is_none());
        assert!(transport.created.lock().unwrap().is_empty());
        assert_eq!(events.kinds(1), vec!["requested", "error"]);
        assert_eq!(ic.in_flight_count(), 0);
    }

    #[test]
    fn test_ids_increase_across_requests() {
        let (mut ic, _, events) = setup(Settings::default(), "");
        for _ in 0..5 {
            ic.intercept(Request::get(url("http://a.com/"))).unwrap();
        }
        let ids: Vec<_> = events.all().iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_runtime_setters() {
        let (mut ic, transport, _) = setup(Settings::default(), "");
        ic.set_resource_timeout(Some(Duration::from_millis(50)));
        ic.set_max_auth_attempts(1);
        ic.set_credentials(Credentials {
            username: "u".to_string(),
            password: "p".to_string(),
        });
        let mut headers = BTreeMap::new();
        headers.insert("X-Run".to_string(), "1".to_string());
        ic.set_custom_headers(headers);

        ic.intercept(Request::get(url("http://a.com/"))).unwrap();
        assert!(ic.is_timeout_armed(1));
        assert_eq!(transport.request(1).headers.get("x-run"), Some("1"));

        ic.handle(Signal::AuthenticationRequired(1));
        ic.handle(Signal::AuthenticationRequired(1));
        assert_eq!(transport.transfer(1).auth.lock().unwrap()[0].username, "u");
        assert_eq!(*transport.transfer(1).closed.lock().unwrap(), 1);
    }
}
