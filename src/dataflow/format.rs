//! Format-aware output parsing
//!
//! A registry keyed by [`OutputFormat`] maps each detected format to a
//! [`FormatHandler`]; the dataflow manager routes every decode through it.
//! Handlers extract one candidate value per line and never fail the run on
//! malformed content - bad lines degrade to plain text or are dropped.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::record::{is_valid_target, DataRecord};

/// Detected output format of a tool's file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
    Xml,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Text
    }
}

impl OutputFormat {
    /// Detect from the file extension; anything unrecognized is text.
    pub fn detect(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => OutputFormat::Json,
            Some(ext) if ext.eq_ignore_ascii_case("csv") => OutputFormat::Csv,
            Some(ext) if ext.eq_ignore_ascii_case("xml") => OutputFormat::Xml,
            _ => OutputFormat::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Text => "txt",
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Xml => "xml",
        }
    }
}

/// Decode strategy for one output format.
pub trait FormatHandler: Send + Sync {
    /// Parse a file into records attributed to `source` at `layer`.
    fn parse(&self, path: &Path, source: &str, layer: usize) -> io::Result<Vec<DataRecord>>;

    /// Keep only records passing the basic validity rules.
    fn validate(&self, records: Vec<DataRecord>) -> Vec<DataRecord> {
        records.into_iter().filter(|r| r.is_valid()).collect()
    }

    /// Write records back out as one value per line.
    fn format(&self, records: &[DataRecord], path: &Path) -> io::Result<()> {
        let mut out = String::with_capacity(records.len() * 24);
        for record in records {
            out.push_str(&record.value);
            out.push('\n');
        }
        std::fs::write(path, out)
    }
}

/// Plain text: one value per non-blank, non-comment line.
struct TextHandler;

impl FormatHandler for TextHandler {
    fn parse(&self, path: &Path, source: &str, layer: usize) -> io::Result<Vec<DataRecord>> {
        let content = std::fs::read_to_string(path)?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| DataRecord::from_line(line, source, layer))
            .collect())
    }
}

/// JSON-lines: extract the common `url`/`host`/`input` fields; lines that
/// are not JSON objects fall back to plain text.
struct JsonHandler;

impl FormatHandler for JsonHandler {
    fn parse(&self, path: &Path, source: &str, layer: usize) -> io::Result<Vec<DataRecord>> {
        let content = std::fs::read_to_string(path)?;
        let mut records = Vec::new();
        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match serde_json::from_str::<serde_json::Value>(line) {
                Ok(value) if value.is_object() => {
                    for field in ["url", "host", "input"] {
                        if let Some(extracted) = value.get(field).and_then(|v| v.as_str()) {
                            records.push(DataRecord::from_line(extracted, source, layer));
                        }
                    }
                }
                _ => records.push(DataRecord::from_line(line, source, layer)),
            }
        }
        Ok(records)
    }
}

/// CSV: keep target-looking fields; a non-target first row is treated as a
/// header and skipped.
struct CsvHandler;

impl FormatHandler for CsvHandler {
    fn parse(&self, path: &Path, source: &str, layer: usize) -> io::Result<Vec<DataRecord>> {
        let content = std::fs::read_to_string(path)?;
        let mut records = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            let fields: Vec<&str> = line.split(',').map(|f| f.trim().trim_matches('"')).collect();
            let any_target = fields.iter().any(|f| is_valid_target(f));
            if idx == 0 && !any_target {
                continue; // header row
            }
            for field in fields {
                if is_valid_target(field) {
                    records.push(DataRecord::from_line(field, source, layer));
                }
            }
        }
        Ok(records)
    }
}

/// XML output has no structured decode yet; scan it like text.
struct XmlHandler;

impl FormatHandler for XmlHandler {
    fn parse(&self, path: &Path, source: &str, layer: usize) -> io::Result<Vec<DataRecord>> {
        TextHandler.parse(path, source, layer)
    }
}

/// Registry of format handlers keyed by detected format.
pub struct FormatRegistry {
    handlers: HashMap<OutputFormat, Box<dyn FormatHandler>>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        let mut handlers: HashMap<OutputFormat, Box<dyn FormatHandler>> = HashMap::new();
        handlers.insert(OutputFormat::Text, Box::new(TextHandler));
        handlers.insert(OutputFormat::Json, Box::new(JsonHandler));
        handlers.insert(OutputFormat::Csv, Box::new(CsvHandler));
        handlers.insert(OutputFormat::Xml, Box::new(XmlHandler));
        Self { handlers }
    }

    pub fn handler(&self, format: OutputFormat) -> &dyn FormatHandler {
        self.handlers
            .get(&format)
            .or_else(|| self.handlers.get(&OutputFormat::Text))
            .expect("text handler is always registered")
            .as_ref()
    }

    /// Detect the file's format and parse it through the matching handler.
    pub fn parse_file(&self, path: &Path, source: &str, layer: usize) -> io::Result<Vec<DataRecord>> {
        self.handler(OutputFormat::detect(path)).parse(path, source, layer)
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}
