//! Inbound batches and their elements

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

use super::list::ListKind;

/// Kind of an intelligence element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ElementKind {
    /// Single IP address
    Ip,
    /// CIDR network or `first-last` address range
    Range,
    Url,
    Domain,
    /// IDS rule payload
    Snort,
}

impl ElementKind {
    /// The list kind this element is reconciled into
    ///
    /// Rule payloads have no list; they go through the rule workflow.
    pub fn list_kind(&self) -> Option<ListKind> {
        match self {
            ElementKind::Ip | ElementKind::Range => Some(ListKind::Ip),
            ElementKind::Url | ElementKind::Domain => Some(ListKind::Url),
            ElementKind::Snort => None,
        }
    }
}

/// Add or remove the batch's values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    #[default]
    Add,
    Delete,
}

/// A single indicator with its provenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    #[serde(rename = "type")]
    pub kind: ElementKind,
    pub value: String,
    /// Upstream source that produced the indicator
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub batch_number: i64,
}

impl Element {
    /// Create an element without provenance metadata
    pub fn new(kind: ElementKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            source: String::new(),
            service_name: String::new(),
            batch_number: 0,
        }
    }

    /// Whether the value is acceptable for an IP list
    ///
    /// Accepts a bare address, `address/prefix` or `first-last`.
    pub fn is_valid_address(&self) -> bool {
        let value = self.value.trim();
        if let Some((network, prefix)) = value.split_once('/') {
            let Ok(addr) = network.parse::<IpAddr>() else {
                return false;
            };
            let max_prefix = if addr.is_ipv4() { 32 } else { 128 };
            return prefix.parse::<u8>().is_ok_and(|p| p <= max_prefix);
        }
        if let Some((first, last)) = value.split_once('-') {
            return first.parse::<IpAddr>().is_ok() && last.parse::<IpAddr>().is_ok();
        }
        value.parse::<IpAddr>().is_ok()
    }
}

/// A unit of indicators submitted together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    #[serde(rename = "update_type", default)]
    pub update: UpdateKind,
    /// Target the safelist instead of the blocklist
    #[serde(rename = "safe_list", default)]
    pub safelist: bool,
    #[serde(default)]
    pub items: Vec<Element>,
    pub batch_id: i64,
}

impl Batch {
    /// Create an empty batch
    pub fn new(batch_id: i64, update: UpdateKind, safelist: bool) -> Self {
        Self {
            update,
            safelist,
            items: Vec::new(),
            batch_id,
        }
    }

    /// Append an element
    pub fn with_item(mut self, kind: ElementKind, value: impl Into<String>) -> Self {
        self.items.push(Element::new(kind, value));
        self
    }

    /// Partition the batch's values by target, preserving arrival order
    pub fn classify(&self) -> ClassifiedItems {
        let mut classified = ClassifiedItems::default();
        for element in &self.items {
            match element.kind.list_kind() {
                Some(ListKind::Ip) if element.is_valid_address() => {
                    classified.ip.push(element.value.trim().to_string());
                }
                Some(ListKind::Ip) => classified.rejected.push(element.value.clone()),
                Some(ListKind::Url) => classified.url.push(element.value.clone()),
                None => classified.rules.push(element.value.clone()),
            }
        }
        classified
    }
}

/// Values of a batch grouped by where they are reconciled
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedItems {
    /// IP and range values
    pub ip: Vec<String>,
    /// URL and domain values
    pub url: Vec<String>,
    /// IDS rule payloads
    pub rules: Vec<String>,
    /// IP-like values that failed address validation
    pub rejected: Vec<String>,
}

impl ClassifiedItems {
    /// Values targeted at lists of `kind`
    pub fn for_kind(&self, kind: ListKind) -> &[String] {
        match kind {
            ListKind::Ip => &self.ip,
            ListKind::Url => &self.url,
        }
    }
}

/// Outcome of a batch as reported upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Success,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Success => "success",
            BatchStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
