//! Live TV chain identifiers.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

/// Token tying a recorder to its live TV chain on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Chain {
    uid: String,
}

impl Chain {
    /// New chain for this host, stamped with the current time.
    pub fn new() -> Self {
        let host = dns_lookup::get_hostname()
            .ok()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        Self::for_host(&host, Utc::now())
    }

    pub fn for_host(host: &str, at: DateTime<Utc>) -> Self {
        Self {
            uid: format!("{}-{}", host, at.to_rfc3339_opts(SecondsFormat::Micros, true)),
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uid)
    }
}
