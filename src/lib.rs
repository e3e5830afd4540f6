//! Spectra - recon workflow DAG runner

pub mod catalog;
pub mod dataflow;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod stage;

pub use catalog::{CatalogEntry, ToolCatalog};
pub use dataflow::format::{FormatHandler, FormatRegistry, OutputFormat};
pub use dataflow::record::{DataRecord, RecordType};
pub use dataflow::{DataFlow, ExecutionStatistics, NodeOutput, NodeStatus};
pub use engine::{Engine, EngineConfig, RunSummary};
pub use error::{FixSuggestion, SpectraError};
pub use events::{ToolEvent, ToolEventKind};
pub use graph::{Coordinate, Dag, Node, NodeSpec, SubgraphInfo, ROOT_ID};
pub use stage::{Stage, ToolSpec};
