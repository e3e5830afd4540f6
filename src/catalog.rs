//! Tool catalog
//!
//! Known recon tools with their categories, default arguments, and
//! required-flag rules. The catalog is an explicit value passed to the
//! engine; callers can extend it from a YAML file or code.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::SpectraError;

/// Catalog metadata for one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    /// Suggested default arguments, placeholder syntax allowed
    #[serde(default)]
    pub default_args: String,
    /// The invocation must carry at least one of these flags
    #[serde(default)]
    pub required_flags: Vec<String>,
}

/// Registry of known tools and their invocation rules.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    entries: HashMap<String, CatalogEntry>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-loaded with the common recon tool set.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for entry in builtin_entries() {
            catalog.insert(entry);
        }
        catalog
    }

    /// Load additional entries from a YAML document. Entries replace any
    /// builtin with the same name.
    pub fn load_yaml(&mut self, yaml: &str) -> Result<usize, SpectraError> {
        let entries: Vec<CatalogEntry> = serde_yaml::from_str(yaml)?;
        let count = entries.len();
        for entry in entries {
            self.insert(entry);
        }
        Ok(count)
    }

    pub fn insert(&mut self, entry: CatalogEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check an invocation against the tool's required-flag rule. Tools the
    /// catalog does not know pass without argument checks.
    pub fn check_args(&self, tool: &str, args: &[String]) -> Result<(), SpectraError> {
        let Some(entry) = self.entries.get(tool) else {
            return Ok(());
        };
        if entry.required_flags.is_empty() {
            return Ok(());
        }
        if entry.required_flags.iter().any(|flag| args.iter().any(|a| a == flag)) {
            return Ok(());
        }
        Err(SpectraError::Validation {
            tool: tool.to_string(),
            details: format!(
                "requires one of: {}",
                entry.required_flags.join(", ")
            ),
        })
    }
}

fn builtin_entries() -> Vec<CatalogEntry> {
    fn entry(
        name: &str,
        category: &str,
        description: &str,
        default_args: &str,
        required_flags: &[&str],
    ) -> CatalogEntry {
        CatalogEntry {
            name: name.to_string(),
            category: category.to_string(),
            description: description.to_string(),
            default_args: default_args.to_string(),
            required_flags: required_flags.iter().map(|f| f.to_string()).collect(),
        }
    }

    vec![
        entry("subfinder", "subdomain", "Passive subdomain discovery", "-d {{domain}} -silent", &[]),
        entry("amass", "subdomain", "In-depth attack surface mapping", "enum -passive -d {{domain}}", &[]),
        entry("assetfinder", "subdomain", "Find related domains and subdomains", "--subs-only {{domain}}", &[]),
        entry("dnsx", "dns", "Fast DNS resolver and prober", "-l {{input}} -silent", &[]),
        entry("httpx", "http", "HTTP probe for live hosts", "-l {{input}} -silent", &[]),
        entry("katana", "crawl", "Web crawler", "-list {{input}} -silent", &[]),
        entry("gau", "urls", "Fetch known URLs from archives", "{{domain}}", &[]),
        entry("waybackurls", "urls", "Fetch archived URLs", "{{domain}}", &[]),
        entry("naabu", "ports", "Fast port scanner", "-list {{input}} -silent", &[]),
        entry(
            "nuclei",
            "vuln",
            "Template-based vulnerability scanner",
            "-l {{input}} -t cves/",
            &["-t", "-w"],
        ),
        entry(
            "ffuf",
            "fuzz",
            "Fast web fuzzer",
            "-u https://{{domain}}/FUZZ -w wordlist.txt",
            &["-w"],
        ),
        entry(
            "gobuster",
            "fuzz",
            "Directory and DNS brute forcer",
            "dir -u https://{{domain}} -w wordlist.txt",
            &["-w"],
        ),
    ]
}
