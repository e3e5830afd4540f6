//! Extracted data records and target heuristics

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$")
        .expect("domain regex")
});

static IP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}(:\d+)?$").expect("ip regex"));

const MAX_VALUE_LEN: usize = 1000;

/// Inferred classification of an extracted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Url,
    Ip,
    Domain,
    Unknown,
}

impl RecordType {
    /// Heuristic classification: URL scheme beats IP shape beats domain shape.
    pub fn infer(value: &str) -> Self {
        if value.starts_with("http://") || value.starts_with("https://") {
            RecordType::Url
        } else if IP_RE.is_match(value) {
            RecordType::Ip
        } else if DOMAIN_RE.is_match(value) {
            RecordType::Domain
        } else {
            RecordType::Unknown
        }
    }
}

/// One extracted datum (URL, host, IP, ...) with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRecord {
    pub value: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    /// Node that produced the value
    pub source: String,
    /// Workflow layer of the source
    pub layer: usize,
    pub timestamp: DateTime<Utc>,
    /// 0.0 to 1.0
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl DataRecord {
    /// Build a record from a raw output line, inferring its type.
    pub fn from_line(value: impl Into<String>, source: impl Into<String>, layer: usize) -> Self {
        let value = value.into();
        Self {
            record_type: RecordType::infer(&value),
            value,
            source: source.into(),
            layer,
            timestamp: Utc::now(),
            confidence: 1.0,
            metadata: HashMap::new(),
        }
    }

    /// Basic validity: non-empty, type-specific shape for domain/URL/IP,
    /// otherwise a length bound.
    pub fn is_valid(&self) -> bool {
        let value = self.value.trim();
        if value.is_empty() {
            return false;
        }
        match self.record_type {
            RecordType::Domain => DOMAIN_RE.is_match(value),
            RecordType::Url => value.starts_with("http://") || value.starts_with("https://"),
            RecordType::Ip => IP_RE.is_match(value),
            RecordType::Unknown => value.len() < MAX_VALUE_LEN,
        }
    }
}

/// Does the string look like a scan target (URL, domain, or IP)?
pub fn is_valid_target(s: &str) -> bool {
    let s = s.trim();
    if s.is_empty() {
        return false;
    }
    s.contains("http://")
        || s.contains("https://")
        || DOMAIN_RE.is_match(s)
        || IP_RE.is_match(s)
}
