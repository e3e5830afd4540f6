//! File-based dataflow between workflow nodes
//!
//! Owns a per-run workspace under `<workdir>/<run_id>/` and the in-memory
//! bookkeeping for every tool execution: output records, per-node status,
//! data links, and run statistics. The manager is cloned into concurrently
//! scheduled tool tasks, so all bookkeeping lives behind a mutex; the
//! filesystem itself needs no locking because every node writes to its own
//! uniquely named files.

pub mod format;
pub mod record;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SpectraError;
use crate::graph::ROOT_ID;
use format::{FormatRegistry, OutputFormat};
use record::DataRecord;

const SUBDIRS: [&str; 5] = ["raw", "processed", "merged", "analysis", "logs"];

/// Per-node execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Recorded result of one tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutput {
    pub node_id: String,
    pub tool: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub exit_code: i32,
    pub output_files: Vec<PathBuf>,
    pub error_log: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub line_count: usize,
    pub file_size: u64,
    pub format: OutputFormat,
}

/// Aggregate execution metrics for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionStatistics {
    pub total_nodes: usize,
    pub completed_nodes: usize,
    pub failed_nodes: usize,
    pub total_results: usize,
    pub unique_results: usize,
    pub execution_time_ms: u64,
}

/// Run-wide state written to the execution report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalState {
    pub run_id: String,
    pub start_time: DateTime<Utc>,
    pub domain: String,
    pub node_states: HashMap<String, NodeStatus>,
    /// node_id -> input files it consumed
    pub data_links: HashMap<String, Vec<PathBuf>>,
    pub statistics: ExecutionStatistics,
}

struct FlowState {
    outputs: HashMap<String, NodeOutput>,
    global: GlobalState,
}

/// Dataflow manager for one run. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DataFlow {
    work_dir: PathBuf,
    run_id: String,
    registry: Arc<FormatRegistry>,
    state: Arc<Mutex<FlowState>>,
}

impl DataFlow {
    /// Create the run workspace. Directory creation failure here is fatal;
    /// every later write degrades gracefully.
    pub fn new(work_dir: impl Into<PathBuf>, domain: &str) -> Result<Self, SpectraError> {
        let work_dir = work_dir.into();
        let run_id = format!("run-{}", Utc::now().timestamp_millis());

        let run_dir = work_dir.join(&run_id);
        std::fs::create_dir_all(&run_dir)?;
        for sub in SUBDIRS {
            std::fs::create_dir_all(run_dir.join(sub))?;
        }

        Ok(Self {
            work_dir,
            run_id: run_id.clone(),
            registry: Arc::new(FormatRegistry::new()),
            state: Arc::new(Mutex::new(FlowState {
                outputs: HashMap::new(),
                global: GlobalState {
                    run_id,
                    start_time: Utc::now(),
                    domain: domain.to_string(),
                    node_states: HashMap::new(),
                    data_links: HashMap::new(),
                    statistics: ExecutionStatistics::default(),
                },
            })),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> PathBuf {
        self.work_dir.join(&self.run_id)
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.run_dir().join("raw")
    }

    /// Write the target domain as the first input file and record it as the
    /// root node's output, so layer-1 nodes resolve their input from it.
    pub fn create_seed(&self) -> Result<PathBuf, SpectraError> {
        let seed_path = self.raw_dir().join("00-seed.txt");
        let domain = self.state.lock().global.domain.clone();
        let content = format!("{domain}\n");
        std::fs::write(&seed_path, &content)?;

        let now = Utc::now();
        let mut metadata = HashMap::new();
        metadata.insert("type".to_string(), "domain".to_string());
        metadata.insert("source".to_string(), "user_input".to_string());

        self.state.lock().outputs.insert(
            ROOT_ID.to_string(),
            NodeOutput {
                node_id: ROOT_ID.to_string(),
                tool: "input".to_string(),
                start_time: now,
                end_time: now,
                exit_code: 0,
                output_files: vec![seed_path.clone()],
                error_log: String::new(),
                metadata,
                line_count: 1,
                file_size: content.len() as u64,
                format: OutputFormat::Text,
            },
        );
        Ok(seed_path)
    }

    /// Resolve the input file for a node from its parents' outputs.
    ///
    /// A single parent contributes its most-recent output file, preferring
    /// one marked "merged". Multiple parents are merged: parsed, deduped by
    /// value (higher confidence wins), sorted, and written to `merged/`.
    pub fn resolve_input(
        &self,
        node_id: &str,
        parent_ids: &[String],
        layer: usize,
    ) -> Result<PathBuf, SpectraError> {
        if parent_ids.is_empty() {
            return Err(SpectraError::Execution(format!(
                "no parent nodes specified for '{node_id}'"
            )));
        }

        if let [parent] = parent_ids {
            let input = {
                let state = self.state.lock();
                let output = state
                    .outputs
                    .get(parent)
                    .ok_or_else(|| SpectraError::NoOutput { id: parent.clone() })?;
                if output.output_files.is_empty() {
                    return Err(SpectraError::NoOutput { id: parent.clone() });
                }
                output
                    .output_files
                    .iter()
                    .rev()
                    .find(|f| {
                        f.file_name()
                            .map(|n| n.to_string_lossy().contains("merged"))
                            .unwrap_or(false)
                    })
                    .or_else(|| output.output_files.last())
                    .cloned()
                    .expect("non-empty checked above")
            };
            self.state
                .lock()
                .global
                .data_links
                .insert(node_id.to_string(), vec![input.clone()]);
            return Ok(input);
        }

        self.merge_parent_outputs(node_id, parent_ids, layer)
    }

    fn merge_parent_outputs(
        &self,
        node_id: &str,
        parent_ids: &[String],
        layer: usize,
    ) -> Result<PathBuf, SpectraError> {
        let merged_path = self
            .run_dir()
            .join("merged")
            .join(format!("L{layer:02}-{node_id}-input.txt"));

        let mut input_files = Vec::new();
        let mut all_records = Vec::new();
        for parent in parent_ids {
            let files = {
                let state = self.state.lock();
                state
                    .outputs
                    .get(parent)
                    .ok_or_else(|| SpectraError::NoOutput { id: parent.clone() })?
                    .output_files
                    .clone()
            };
            for file in files {
                match self.registry.parse_file(&file, parent, layer) {
                    Ok(records) => all_records.extend(records),
                    Err(e) => {
                        debug!(file = %file.display(), error = %e, "skipping unparseable parent output");
                        continue;
                    }
                }
                input_files.push(file);
            }
        }

        let mut unique = deduplicate(all_records);
        unique.sort_by(|a, b| a.value.cmp(&b.value));

        self.registry
            .handler(OutputFormat::Text)
            .format(&unique, &merged_path)?;

        self.state
            .lock()
            .global
            .data_links
            .insert(node_id.to_string(), input_files);
        Ok(merged_path)
    }

    /// Record the outcome of one tool execution. Aggregates size, line
    /// count and format over the produced files, updates status counters,
    /// and writes a per-node analysis summary. Analysis write failures are
    /// reported but never block the caller.
    #[allow(clippy::too_many_arguments)]
    pub fn record_output(
        &self,
        node_id: &str,
        tool: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        exit_code: i32,
        output_files: Vec<PathBuf>,
        error_log: String,
    ) {
        let mut file_size = 0u64;
        let mut line_count = 0usize;
        let mut format = None;

        for file in &output_files {
            if let Ok(meta) = std::fs::metadata(file) {
                file_size += meta.len();
            }
            if let Ok(content) = std::fs::read_to_string(file) {
                line_count += content.lines().count();
            }
            if format.is_none() {
                format = Some(OutputFormat::detect(file));
            }
        }

        let output = NodeOutput {
            node_id: node_id.to_string(),
            tool: tool.to_string(),
            start_time,
            end_time,
            exit_code,
            output_files,
            error_log,
            metadata: HashMap::new(),
            line_count,
            file_size,
            format: format.unwrap_or_default(),
        };

        {
            let mut state = self.state.lock();
            if exit_code == 0 {
                state.global.node_states.insert(node_id.to_string(), NodeStatus::Completed);
                state.global.statistics.completed_nodes += 1;
            } else {
                state.global.node_states.insert(node_id.to_string(), NodeStatus::Failed);
                state.global.statistics.failed_nodes += 1;
            }
            state.outputs.insert(node_id.to_string(), output.clone());
        }

        if let Err(e) = self.write_node_analysis(&output) {
            warn!(node = node_id, error = %e, "failed to write node analysis");
        }
    }

    /// Mark a node's status without recording output (Running/Skipped).
    pub fn set_status(&self, node_id: &str, status: NodeStatus) {
        self.state
            .lock()
            .global
            .node_states
            .insert(node_id.to_string(), status);
    }

    /// Re-parse a node's outputs, drop invalid records, and write a
    /// structured JSON copy of each file to `processed/`. Unparseable files
    /// are skipped.
    pub fn post_process(&self, node_id: &str) -> Result<Vec<PathBuf>, SpectraError> {
        let files = {
            let state = self.state.lock();
            state
                .outputs
                .get(node_id)
                .ok_or_else(|| SpectraError::NoOutput { id: node_id.to_string() })?
                .output_files
                .clone()
        };

        let mut processed = Vec::new();
        for file in files {
            let format = OutputFormat::detect(&file);
            let handler = self.registry.handler(format);
            let records = match handler.parse(&file, node_id, 0) {
                Ok(records) => handler.validate(records),
                Err(e) => {
                    debug!(file = %file.display(), error = %e, "skipping invalid output file");
                    continue;
                }
            };

            let base = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "output".to_string());
            let out_path = self
                .run_dir()
                .join("processed")
                .join(format!("{node_id}-{base}.json"));
            match serde_json::to_string_pretty(&records) {
                Ok(json) => {
                    if std::fs::write(&out_path, json).is_err() {
                        continue;
                    }
                }
                Err(_) => continue,
            }
            processed.push(out_path);
        }

        let joined = processed
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(",");
        if let Some(output) = self.state.lock().outputs.get_mut(node_id) {
            output.metadata.insert("processed_files".to_string(), joined);
        }
        Ok(processed)
    }

    /// Most recent output file recorded for a node.
    pub fn latest_output(&self, node_id: &str) -> Result<PathBuf, SpectraError> {
        let state = self.state.lock();
        state
            .outputs
            .get(node_id)
            .and_then(|o| o.output_files.last().cloned())
            .ok_or_else(|| SpectraError::NoOutput { id: node_id.to_string() })
    }

    /// Recorded output for a node, if any.
    pub fn output(&self, node_id: &str) -> Option<NodeOutput> {
        self.state.lock().outputs.get(node_id).cloned()
    }

    pub fn statistics(&self) -> ExecutionStatistics {
        self.state.lock().global.statistics.clone()
    }

    pub fn global_state(&self) -> GlobalState {
        self.state.lock().global.clone()
    }

    /// Finalize statistics and write the run's execution report. Duplicate
    /// values across nodes collapse into the unique-result count.
    pub fn final_report(&self) -> Result<PathBuf, SpectraError> {
        let report_path = self.run_dir().join("execution-report.json");

        let outputs: Vec<NodeOutput> = {
            let state = self.state.lock();
            state.outputs.values().cloned().collect()
        };

        let mut all_values: HashMap<String, DataRecord> = HashMap::new();
        for output in &outputs {
            for file in &output.output_files {
                let records = match self.registry.parse_file(file, &output.node_id, 0) {
                    Ok(records) => records,
                    Err(_) => continue,
                };
                for record in records {
                    all_values.insert(record.value.clone(), record);
                }
            }
        }

        let global = {
            let mut state = self.state.lock();
            let elapsed = Utc::now() - state.global.start_time;
            state.global.statistics.execution_time_ms = elapsed.num_milliseconds().max(0) as u64;
            state.global.statistics.total_nodes = outputs.len();
            state.global.statistics.total_results = all_values.len();
            state.global.statistics.unique_results = all_values.len();
            state.global.clone()
        };

        std::fs::write(&report_path, serde_json::to_string_pretty(&global)?)?;
        Ok(report_path)
    }

    fn write_node_analysis(&self, output: &NodeOutput) -> Result<(), SpectraError> {
        let path = self
            .run_dir()
            .join("analysis")
            .join(format!("{}-analysis.json", output.node_id));
        let runtime = output.end_time - output.start_time;
        let analysis = serde_json::json!({
            "node_id": output.node_id,
            "tool": output.tool,
            "runtime_ms": runtime.num_milliseconds(),
            "exit_code": output.exit_code,
            "file_count": output.output_files.len(),
            "total_lines": output.line_count,
            "total_size": output.file_size,
            "format": output.format,
            "success": output.exit_code == 0,
            "generated_at": Utc::now().to_rfc3339(),
        });
        std::fs::write(&path, serde_json::to_string_pretty(&analysis)?)?;
        Ok(())
    }
}

/// Collapse records by exact value; on conflict the higher confidence wins.
fn deduplicate(records: Vec<DataRecord>) -> Vec<DataRecord> {
    let mut seen: HashMap<String, DataRecord> = HashMap::new();
    for record in records {
        match seen.get(&record.value) {
            Some(existing) if existing.confidence >= record.confidence => {}
            _ => {
                seen.insert(record.value.clone(), record);
            }
        }
    }
    seen.into_values().collect()
}
