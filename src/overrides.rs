//! Hostname override table and the flat `key = value` file it is loaded from.
//!
//! The file format is one entry per line:
//!
//! ```text
//! ; comment
//! example.com   = 10.0.0.5,example.com
//! api.internal  = 192.168.1.20
//! ```
//!
//! Everything from the first `;` onward is a comment. Blank lines are
//! skipped. Any other line must be `key = value`; a malformed line or a
//! repeated key aborts the whole load, so a partially parsed table is never
//! observable.
//!
//! The value is `destination[,hostHeader]`: the connection goes to
//! `destination` and, when present, `hostHeader` is sent as the `Host` header.
//! The destination must be a bare host name or IP address; IPv6 may be
//! written with or without brackets. Ports are not allowed.

use crate::error::{InterceptError, Result};
use std::collections::HashMap;
use std::fs;
use std::net::Ipv6Addr;
use std::path::Path;
use tracing::{debug, info};
use url::Host;

const COMMENT_MARKER: char = ';';
const SEPARATOR: char = '=';

/// One raw `key = value` line of the override file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    /// 1-based line number in the source file.
    pub line: usize,
}

/// Parses the flat key/value format, failing on the first bad line.
pub fn parse_key_values(contents: &str) -> Result<Vec<KeyValue>> {
    let mut entries: Vec<KeyValue> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for (index, raw) in contents.lines().enumerate() {
        let line_no = index + 1;
        let line = strip_comment(raw);
        if line.trim().is_empty() {
            continue;
        }

        let kv = parse_line(line, line_no)?;

        if seen.insert(kv.key.clone(), line_no).is_some() {
            return Err(InterceptError::DuplicateKey {
                key: kv.key,
                line: line_no,
            });
        }
        entries.push(kv);
    }

    Ok(entries)
}

fn strip_comment(line: &str) -> &str {
    match line.find(COMMENT_MARKER) {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn parse_line(line: &str, line_no: usize) -> Result<KeyValue> {
    let trimmed = line.trim_start();
    let Some(sep) = trimmed.find(SEPARATOR) else {
        return Err(InterceptError::MissingSeparator { line: line_no });
    };

    // Key stops at the first embedded whitespace.
    let key = trimmed[..sep]
        .split_whitespace()
        .next()
        .unwrap_or_default();
    let value = trimmed[sep + 1..].trim();

    if key.is_empty() || value.is_empty() {
        return Err(InterceptError::BadFormat { line: line_no });
    }

    Ok(KeyValue {
        key: key.to_string(),
        value: value.to_string(),
        line: line_no,
    })
}

/// Parses a host the way request URLs carry it.
///
/// Domains are lowercased and converted to their ASCII (punycode) form, and
/// IPv6 addresses are accepted with or without brackets. Anything carrying a
/// port, a path or whitespace is rejected.
pub fn parse_host(input: &str) -> Option<Host> {
    if let Ok(ip) = input.parse::<Ipv6Addr>() {
        return Some(Host::Ipv6(ip));
    }
    Host::parse(input).ok()
}

/// A configured redirect for one hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideEntry {
    /// The hostname to match, in the form `Url::host_str` reports it.
    pub hostname: String,

    /// Host or IP the connection is sent to instead.
    pub destination: Host,

    /// Literal value for the outgoing `Host` header.
    pub host_header: Option<String>,
}

impl OverrideEntry {
    /// Splits a stored `destination[,hostHeader]` value at its first comma.
    ///
    /// Returns `None` if the destination is not a bare host or IP address.
    fn from_value(hostname: String, value: &str) -> Option<Self> {
        let (destination, host_header) = match value.split_once(',') {
            Some((dest, header)) => {
                let header = header.trim();
                (dest.trim(), (!header.is_empty()).then(|| header.to_string()))
            }
            None => (value.trim(), None),
        };

        Some(Self {
            hostname,
            destination: parse_host(destination)?,
            host_header,
        })
    }
}

/// Read-only hostname → destination table, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    entries: HashMap<String, OverrideEntry>,
}

impl OverrideTable {
    /// Loads the table from an override file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(InterceptError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = fs::read_to_string(path)?;
        let table = Self::parse(&contents)?;

        info!(
            path = %path.display(),
            entries = table.len(),
            "Loaded hostname overrides"
        );

        Ok(table)
    }

    /// Builds the table from the contents of an override file.
    ///
    /// Keys and destinations must both be valid hosts; either failing is a
    /// `BadFormat` error for that line.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut entries = HashMap::new();

        for kv in parse_key_values(contents)? {
            let hostname = parse_host(&kv.key)
                .ok_or(InterceptError::BadFormat { line: kv.line })?
                .to_string();

            if entries.contains_key(&hostname) {
                return Err(InterceptError::DuplicateKey {
                    key: kv.key,
                    line: kv.line,
                });
            }

            let entry = OverrideEntry::from_value(hostname.clone(), &kv.value)
                .ok_or(InterceptError::BadFormat { line: kv.line })?;

            debug!(
                hostname = %entry.hostname,
                destination = %entry.destination,
                host_header = ?entry.host_header,
                "Registered override"
            );
            entries.insert(hostname, entry);
        }

        Ok(Self { entries })
    }

    /// Exact-match lookup on a request host.
    pub fn lookup(&self, hostname: &str) -> Option<&OverrideEntry> {
        let key = parse_host(hostname)
            .map(|host| host.to_string())
            .unwrap_or_else(|| hostname.to_ascii_lowercase());
        self.entries.get(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
