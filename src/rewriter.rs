//! Request URL rewriting against the override table.
//!
//! Only the host component of a URL is ever replaced; scheme, explicit port,
//! path, query and fragment are carried over as they are. Rewriting cannot
//! fail: a URL that has no override, or whose override can't be applied,
//! comes back unchanged.

use crate::overrides::OverrideTable;
use crate::transport::is_network_scheme;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use url::{Host, Url};

/// Result of rewriting one request URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    /// URL the connection is made to.
    pub url: Url,
    /// Value for the outgoing `Host` header, if the override names one.
    pub host_header: Option<String>,
}

impl Rewrite {
    fn unchanged(url: &Url) -> Self {
        Self {
            url: url.clone(),
            host_header: None,
        }
    }
}

/// Applies hostname overrides to outgoing request URLs.
#[derive(Debug, Clone)]
pub struct RequestRewriter {
    table: Arc<OverrideTable>,
    enabled: bool,
}

impl RequestRewriter {
    pub fn new(table: Arc<OverrideTable>, enabled: bool) -> Self {
        Self { table, enabled }
    }

    /// A rewriter that never changes anything.
    pub fn disabled() -> Self {
        Self::new(Arc::new(OverrideTable::default()), false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn table(&self) -> &OverrideTable {
        &self.table
    }

    /// Rewrites `url` if its host has an override.
    pub fn rewrite(&self, url: &Url) -> Rewrite {
        if !self.enabled || !is_network_scheme(url) {
            return Rewrite::unchanged(url);
        }

        let Some(host) = url.host_str() else {
            return Rewrite::unchanged(url);
        };

        let Some(entry) = self.table.lookup(host) else {
            trace!(host = %host, "No override for host");
            return Rewrite::unchanged(url);
        };

        let mut rewritten = url.clone();
        if !replace_host(&mut rewritten, &entry.destination) {
            warn!(
                host = %host,
                destination = %entry.destination,
                "Override destination can't be applied to this URL; leaving request unchanged"
            );
            return Rewrite::unchanged(url);
        }

        debug!(
            host = %host,
            destination = %entry.destination,
            host_header = ?entry.host_header,
            "Rewrote request host"
        );

        Rewrite {
            url: rewritten,
            host_header: entry.host_header.clone(),
        }
    }
}

/// Swaps the host of `url` for an already parsed one, keeping the port.
fn replace_host(url: &mut Url, destination: &Host) -> bool {
    match destination {
        Host::Domain(domain) => url.set_host(Some(domain)).is_ok(),
        Host::Ipv4(ip) => url.set_ip_host(IpAddr::V4(*ip)).is_ok(),
        Host::Ipv6(ip) => url.set_ip_host(IpAddr::V6(*ip)).is_ok(),
    }
}
