//! Error types with fix suggestions

use thiserror::Error;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
#[derive(Error, Debug)]
pub enum SpectraError {
    // ─────────────────────────────────────────────────────────────
    // Structural graph errors - always surfaced synchronously
    // ─────────────────────────────────────────────────────────────
    #[error("Node '{id}' not found")]
    NodeNotFound { id: String },

    #[error("Node '{id}' already exists")]
    DuplicateNode { id: String },

    #[error("Cannot remove the root node")]
    RootRemoval,

    #[error("Matrix inconsistency: {details}")]
    Inconsistent { details: String },

    // ─────────────────────────────────────────────────────────────
    // Dataflow errors
    // ─────────────────────────────────────────────────────────────
    #[error("Node '{id}' has no recorded output")]
    NoOutput { id: String },

    // ─────────────────────────────────────────────────────────────
    // Pre-launch validation errors (run continues, node is Failed)
    // ─────────────────────────────────────────────────────────────
    #[error("Validation failed for '{tool}': {details}")]
    Validation { tool: String, details: String },

    // ─────────────────────────────────────────────────────────────
    // Process execution errors
    // ─────────────────────────────────────────────────────────────
    #[error("Execution error: {0}")]
    Execution(String),

    // ─────────────────────────────────────────────────────────────
    // Snapshot load/export errors
    // ─────────────────────────────────────────────────────────────
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpectraError {
    pub fn inconsistent(details: impl Into<String>) -> Self {
        SpectraError::Inconsistent { details: details.into() }
    }
}

impl FixSuggestion for SpectraError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            SpectraError::NodeNotFound { .. } => {
                Some("Check the node ID against the workflow's node list")
            }
            SpectraError::DuplicateNode { .. } => Some("Use a unique ID for each node"),
            SpectraError::RootRemoval => {
                Some("The 'input' root anchors the workflow and cannot be removed")
            }
            SpectraError::Inconsistent { .. } => {
                Some("Mark co-located nodes as parallel, or move them to free positions")
            }
            SpectraError::NoOutput { .. } => {
                Some("Ensure the upstream node ran and produced output files")
            }
            SpectraError::Validation { .. } => {
                Some("Install the tool or add the required flags to its arguments")
            }
            SpectraError::Execution(_) => Some("Check the command line and tool installation"),
            SpectraError::Snapshot(_) => {
                Some("Re-export the workflow; legacy files need a 'workflow' array")
            }
            SpectraError::Json(_) => Some("Check the file is valid JSON"),
            SpectraError::YamlParse(_) => Some("Check YAML syntax: indentation and quoting"),
            SpectraError::Io(_) => Some("Check file path and permissions"),
        }
    }
}
