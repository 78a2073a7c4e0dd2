//! # Host Override Library
//!
//! A request interception layer that sits between an application and its
//! HTTP transport. For every outgoing request it:
//!
//! - redirects the connection according to a hostname override table while
//!   keeping the original `Host` semantics,
//! - assigns a request id and publishes lifecycle events (requested,
//!   started, finished, error, timeout),
//! - aborts transfers that exceed the configured resource timeout,
//! - answers authentication challenges up to a bounded number of attempts,
//! - applies custom headers and the TLS policy.
//!
//! ## Modules
//!
//! - [`config`]: Process-wide settings
//! - [`overrides`]: Override file loader and hostname table
//! - [`rewriter`]: URL rewriting against the table
//! - [`interceptor`]: The interception entry point and request lifecycle
//! - [`service`]: Single-task event loop driving the interceptor
//! - [`events`]: Event payloads, emitter and sinks
//! - [`transport`]: The traits a transport implements
//!
//! ## Example
//!
//! ```ignore
//! use host_override::{ChannelSink, EventEmitter, InterceptorService, NetworkInterceptor};
//! use host_override::{OverrideTable, Request, Settings};
//! use std::sync::Arc;
//!
//! let settings = Settings::load("host-override.yaml")?;
//! let table = Arc::new(OverrideTable::load(&settings.interception.overrides_file)?);
//! let (sink, mut events) = ChannelSink::channel();
//!
//! let interceptor = NetworkInterceptor::new(&settings, table, transport, EventEmitter::new().with_sink(sink));
//! let (service, handle) = InterceptorService::new(interceptor);
//! service.spawn();
//!
//! let transfer = handle.intercept(Request::get(url)).await?;
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod interceptor;
pub mod logging;
pub mod overrides;
pub mod rewriter;
pub mod service;
pub mod timeout;
pub mod tracker;
pub mod transport;

pub use config::Settings;
pub use error::{InterceptError, Result};
pub use events::{ChannelSink, EventEmitter, EventSink, ResourceEvent, TracingSink};
pub use interceptor::{NetworkInterceptor, Phase, Request, Signal};
pub use overrides::{OverrideEntry, OverrideTable};
pub use rewriter::{RequestRewriter, Rewrite};
pub use service::{InterceptorHandle, InterceptorService};
pub use transport::{Transfer, Transport};
