//! Stage planning
//!
//! Flattens a workflow graph into the ordered list of stages the engine
//! runs. Each execution-order group becomes one stage; tools inside a stage
//! may run concurrently, stages themselves run strictly in sequence.

use serde::{Deserialize, Serialize};

use crate::dataflow::format::OutputFormat;
use crate::graph::Dag;

/// One tool invocation inside a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Node id, unique within the run
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Output file name relative to the stage's raw directory
    pub output: String,
    /// Upstream node ids whose outputs feed this tool
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub layer: usize,
    #[serde(default)]
    pub parallel: bool,
    /// Feed the resolved input file on stdin instead of a placeholder
    #[serde(default)]
    pub stdin: bool,
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Advisory only; the engine does not enforce it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// A sequential step of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub tools: Vec<ToolSpec>,
}

impl Stage {
    pub fn is_parallel(&self) -> bool {
        self.tools.len() > 1 || self.tools.iter().any(|t| t.parallel)
    }
}

/// Derive the stage list from a graph's execution order. The root node is
/// planning-only and never becomes a tool; an empty graph yields no stages.
pub fn stages_from_graph(dag: &Dag) -> Vec<Stage> {
    if dag.max_x() == 0 {
        return Vec::new();
    }

    let mut stages = Vec::new();
    for group in dag.execution_order() {
        let tools: Vec<ToolSpec> = group
            .iter()
            .filter(|id| id.as_str() != dag.root())
            .filter_map(|id| dag.get(id))
            .map(|node| ToolSpec {
                name: node.id.clone(),
                command: node.tool.clone(),
                args: node.args.split_whitespace().map(str::to_string).collect(),
                output: format!("{}_{}.txt", node.tool, node.id),
                parents: dag.parents_of(&node.id),
                layer: node.layer,
                parallel: node.parallel,
                stdin: false,
                output_format: OutputFormat::Text,
                timeout_secs: None,
            })
            .collect();
        if tools.is_empty() {
            continue;
        }

        let layer = tools[0].layer;
        let step = stages
            .iter()
            .filter(|s: &&Stage| s.name.starts_with(&format!("layer-{layer}-")))
            .count();
        stages.push(Stage {
            name: format!("layer-{layer}-step-{step}"),
            tools,
        });
    }
    stages
}
