//! Bounded-parallel execution engine
//!
//! Runs the stage list produced by [`crate::stage::stages_from_graph`].
//! Stages execute strictly in order; tools inside a parallel stage are
//! spawned onto a [`JoinSet`] and throttled by a per-stage semaphore, so at
//! most `concurrency` external processes run at once. A tool failure marks
//! its node failed and keeps the run going; only workspace setup aborts it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::ToolCatalog;
use crate::dataflow::{DataFlow, ExecutionStatistics, NodeStatus};
use crate::error::SpectraError;
use crate::events::ToolEvent;
use crate::stage::{Stage, ToolSpec};

const DEFAULT_CONCURRENCY: usize = 3;
const ERROR_LOG_TAIL: usize = 2000;

/// Engine settings. `extra_env` is applied to every spawned tool on top of
/// the defaults that keep tool output plain and unbuffered.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub work_dir: PathBuf,
    pub concurrency: usize,
    pub extra_env: Vec<(String, String)>,
}

impl EngineConfig {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            concurrency: DEFAULT_CONCURRENCY,
            extra_env: Vec::new(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.push((key.into(), value.into()));
        self
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub report: Option<PathBuf>,
    pub statistics: ExecutionStatistics,
}

pub struct Engine {
    config: EngineConfig,
    catalog: Arc<ToolCatalog>,
}

impl Engine {
    pub fn new(config: EngineConfig, catalog: ToolCatalog) -> Self {
        Self {
            config,
            catalog: Arc::new(catalog),
        }
    }

    /// Execute all stages against `domain`. Progress is reported on
    /// `events`; cancelling `cancel` kills running tools and skips the
    /// rest. The run itself only fails if the workspace cannot be set up.
    pub async fn run(
        &self,
        domain: &str,
        stages: &[Stage],
        events: mpsc::Sender<ToolEvent>,
        cancel: CancellationToken,
    ) -> Result<RunSummary, SpectraError> {
        let dataflow = DataFlow::new(&self.config.work_dir, domain)?;
        let mut current_input = dataflow.create_seed()?;
        info!(run_id = dataflow.run_id(), domain, stages = stages.len(), "starting run");

        for (idx, stage) in stages.iter().enumerate() {
            if stage.tools.is_empty() {
                continue;
            }
            if cancel.is_cancelled() {
                for remaining in &stages[idx..] {
                    for tool in &remaining.tools {
                        dataflow.set_status(&tool.name, NodeStatus::Skipped);
                    }
                }
                warn!(stage = %stage.name, "run cancelled; skipping remaining stages");
                break;
            }

            let stage_dir = dataflow.raw_dir().join(dir_safe(&stage.name));
            std::fs::create_dir_all(&stage_dir)?;
            debug!(stage = %stage.name, tools = stage.tools.len(), "entering stage");

            let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
            if stage.is_parallel() {
                let mut set = JoinSet::new();
                for tool in &stage.tools {
                    let run = self.tool_run(&dataflow, stage, tool, &current_input, &stage_dir, &events, &cancel);
                    let permits = permits.clone();
                    set.spawn(async move { run.execute(permits).await });
                }
                while let Some(joined) = set.join_next().await {
                    if let Err(e) = joined {
                        warn!(stage = %stage.name, error = %e, "tool task aborted");
                    }
                }
            } else {
                for tool in &stage.tools {
                    self.tool_run(&dataflow, stage, tool, &current_input, &stage_dir, &events, &cancel)
                        .execute(permits.clone())
                        .await;
                }
            }

            for tool in &stage.tools {
                if let Err(e) = dataflow.post_process(&tool.name) {
                    warn!(tool = %tool.name, error = %e, "post-processing failed");
                }
            }
            match dataflow.latest_output(&stage.tools[0].name) {
                Ok(path) => current_input = path,
                Err(e) => {
                    warn!(stage = %stage.name, error = %e, "stage produced no output; keeping previous input");
                }
            }
        }

        let report = match dataflow.final_report() {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "failed to write execution report");
                None
            }
        };
        let statistics = dataflow.statistics();
        info!(
            completed = statistics.completed_nodes,
            failed = statistics.failed_nodes,
            unique_results = statistics.unique_results,
            "run finished"
        );

        Ok(RunSummary {
            run_id: dataflow.run_id().to_string(),
            run_dir: dataflow.run_dir(),
            report,
            statistics,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn tool_run(
        &self,
        dataflow: &DataFlow,
        stage: &Stage,
        tool: &ToolSpec,
        current_input: &Path,
        stage_dir: &Path,
        events: &mpsc::Sender<ToolEvent>,
        cancel: &CancellationToken,
    ) -> ToolRun {
        let input = if tool.parents.is_empty() {
            current_input.to_path_buf()
        } else {
            match dataflow.resolve_input(&tool.name, &tool.parents, tool.layer) {
                Ok(path) => path,
                Err(e) => {
                    warn!(tool = %tool.name, error = %e, "input resolution failed; falling back to stage input");
                    current_input.to_path_buf()
                }
            }
        };
        ToolRun {
            dataflow: dataflow.clone(),
            catalog: self.catalog.clone(),
            stage: stage.name.clone(),
            spec: tool.clone(),
            input,
            stage_dir: stage_dir.to_path_buf(),
            extra_env: self.config.extra_env.clone(),
            events: events.clone(),
            cancel: cancel.clone(),
        }
    }
}

struct ToolOutcome {
    exit_code: i32,
    files: Vec<PathBuf>,
    error_log: String,
}

struct ToolRun {
    dataflow: DataFlow,
    catalog: Arc<ToolCatalog>,
    stage: String,
    spec: ToolSpec,
    input: PathBuf,
    stage_dir: PathBuf,
    extra_env: Vec<(String, String)>,
    events: mpsc::Sender<ToolEvent>,
    cancel: CancellationToken,
}

impl ToolRun {
    /// Acquire a concurrency permit, then run the tool to completion and
    /// record the result. The permit is held for the whole execution, so
    /// the start event only fires once a slot is free.
    async fn execute(self, permits: Arc<Semaphore>) {
        let Ok(_permit) = permits.acquire_owned().await else {
            return;
        };

        let _ = self.events.send(ToolEvent::start(&self.stage, &self.spec.name)).await;
        self.dataflow.set_status(&self.spec.name, NodeStatus::Running);
        let started = Utc::now();

        match self.invoke().await {
            Ok(outcome) => {
                let event = if outcome.exit_code == 0 {
                    ToolEvent::finish(&self.stage, &self.spec.name)
                } else {
                    ToolEvent::error(
                        &self.stage,
                        &self.spec.name,
                        format!("{} exited with status {}", self.spec.command, outcome.exit_code),
                    )
                };
                self.dataflow.record_output(
                    &self.spec.name,
                    &self.spec.command,
                    started,
                    Utc::now(),
                    outcome.exit_code,
                    outcome.files,
                    outcome.error_log,
                );
                let _ = self.events.send(event).await;
            }
            Err(e) => {
                self.dataflow.record_output(
                    &self.spec.name,
                    &self.spec.command,
                    started,
                    Utc::now(),
                    1,
                    Vec::new(),
                    e.to_string(),
                );
                let _ = self
                    .events
                    .send(ToolEvent::error(&self.stage, &self.spec.name, e.to_string()))
                    .await;
            }
        }
    }

    async fn invoke(&self) -> Result<ToolOutcome, SpectraError> {
        which::which(&self.spec.command).map_err(|_| SpectraError::Validation {
            tool: self.spec.command.clone(),
            details: "not found in PATH".to_string(),
        })?;
        self.catalog.check_args(&self.spec.command, &self.spec.args)?;

        let output_path = self.output_path();
        let args = self.substituted_args(&output_path);

        let stdout = std::fs::File::create(&output_path)?;
        let mut command = Command::new(&self.spec.command);
        command
            .args(&args)
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::piped())
            .env("TERM", "xterm-256color")
            .env("PYTHONUNBUFFERED", "1")
            .env("FORCE_COLOR", "0")
            .kill_on_drop(true);
        for (key, value) in &self.extra_env {
            command.env(key, value);
        }
        if self.spec.stdin {
            command.stdin(Stdio::from(std::fs::File::open(&self.input)?));
        } else {
            command.stdin(Stdio::null());
        }

        let mut child = command
            .spawn()
            .map_err(|e| SpectraError::Execution(format!("spawn {}: {e}", self.spec.command)))?;

        // Drain stderr concurrently so the child never blocks on the pipe.
        let mut stderr = child.stderr.take();
        let drain = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stderr.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let status = tokio::select! {
            status = child.wait() => status
                .map_err(|e| SpectraError::Execution(format!("wait: {e}")))?
                .code()
                .unwrap_or(-1),
            _ = self.cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(SpectraError::Execution(format!(
                    "{} cancelled",
                    self.spec.command
                )));
            }
        };

        let error_log = tail(&drain.await.unwrap_or_default(), ERROR_LOG_TAIL);
        Ok(ToolOutcome {
            exit_code: status,
            files: vec![output_path],
            error_log,
        })
    }

    fn output_path(&self) -> PathBuf {
        let name = if self.spec.output.is_empty() {
            format!("{}-{}.txt", self.spec.name, Utc::now().timestamp_millis())
        } else {
            self.spec.output.clone()
        };
        self.stage_dir.join(dir_safe(&name))
    }

    fn substituted_args(&self, output_path: &Path) -> Vec<String> {
        let input = self.input.to_string_lossy().into_owned();
        let output = output_path.to_string_lossy().into_owned();
        let domain = first_line(&self.input);
        self.spec
            .args
            .iter()
            .map(|arg| {
                arg.replace("{{input}}", &input)
                    .replace("{{domain}}", &domain)
                    .replace("{{output}}", &output)
            })
            .collect()
    }
}

/// The current target for `{{domain}}` substitution is the first line of
/// the tool's input file.
fn first_line(path: &Path) -> String {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|c| c.lines().next().map(|l| l.trim().to_string()))
        .unwrap_or_default()
}

fn tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let start = text.len() - max;
    let start = (start..text.len())
        .find(|i| text.is_char_boundary(*i))
        .unwrap_or(start);
    text[start..].to_string()
}

/// Keep generated directory and file names shell-friendly.
fn dir_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use crate::graph::ROOT_ID;
    use std::time::Duration;

    fn shell_tool(name: &str, script: &str) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            output: format!("{name}.txt"),
            parents: vec![ROOT_ID.to_string()],
            layer: 1,
            parallel: false,
            stdin: false,
            output_format: crate::dataflow::format::OutputFormat::Text,
            timeout_secs: None,
        }
    }

    fn stage(name: &str, tools: Vec<ToolSpec>) -> Stage {
        Stage {
            name: name.to_string(),
            tools,
        }
    }

    async fn drain_events(mut rx: mpsc::Receiver<ToolEvent>) -> Vec<ToolEvent> {
        let mut collected = Vec::new();
        while let Some(event) = rx.recv().await {
            collected.push(event);
        }
        collected
    }

    #[tokio::test]
    async fn run_captures_stdout_and_reports_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(EngineConfig::new(dir.path()), ToolCatalog::new());
        let stages = vec![stage(
            "layer-1-step-0",
            vec![shell_tool("probe-1", "echo sub.example.com")],
        )];

        let (tx, rx) = events::channel();
        let summary = engine
            .run("example.com", &stages, tx, CancellationToken::new())
            .await
            .unwrap();

        let output = dir
            .path()
            .join(&summary.run_id)
            .join("raw")
            .join("layer-1-step-0")
            .join("probe-1.txt");
        assert_eq!(std::fs::read_to_string(output).unwrap(), "sub.example.com\n");
        assert_eq!(summary.statistics.completed_nodes, 1);
        assert_eq!(summary.statistics.failed_nodes, 0);
        assert!(summary.report.unwrap().is_file());

        let collected = drain_events(rx).await;
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0].kind, crate::events::ToolEventKind::Start);
        assert_eq!(collected[1].kind, crate::events::ToolEventKind::Finish);
    }

    #[tokio::test]
    async fn placeholders_resolve_against_the_seed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(EngineConfig::new(dir.path()), ToolCatalog::new());
        let mut tool = shell_tool("echo-1", "");
        tool.args = vec![
            "-c".to_string(),
            "echo {{domain}}; cat {{input}}".to_string(),
        ];
        let stages = vec![stage("layer-1-step-0", vec![tool])];

        let (tx, _rx) = events::channel();
        let summary = engine
            .run("example.com", &stages, tx, CancellationToken::new())
            .await
            .unwrap();

        let output = summary
            .run_dir
            .join("raw")
            .join("layer-1-step-0")
            .join("echo-1.txt");
        assert_eq!(
            std::fs::read_to_string(output).unwrap(),
            "example.com\nexample.com\n"
        );
    }

    #[tokio::test]
    async fn missing_binary_fails_the_node_not_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(EngineConfig::new(dir.path()), ToolCatalog::new());
        let mut tool = shell_tool("ghost-1", "");
        tool.command = "definitely-not-a-real-binary-7f3a".to_string();
        let stages = vec![
            stage("layer-1-step-0", vec![tool]),
            stage("layer-2-step-0", vec![shell_tool("after-1", "echo still-runs")]),
        ];

        let (tx, rx) = events::channel();
        let summary = engine
            .run("example.com", &stages, tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.statistics.failed_nodes, 1);
        assert_eq!(summary.statistics.completed_nodes, 1);

        let collected = drain_events(rx).await;
        let error = collected
            .iter()
            .find(|e| e.kind == crate::events::ToolEventKind::Error)
            .unwrap();
        assert_eq!(error.tool, "ghost-1");
        assert!(error.error.as_ref().unwrap().contains("not found in PATH"));
    }

    #[tokio::test]
    async fn catalog_rules_block_invalid_invocations() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = ToolCatalog::new();
        catalog.insert(crate::catalog::CatalogEntry {
            name: "sh".to_string(),
            category: String::new(),
            description: String::new(),
            default_args: String::new(),
            required_flags: vec!["-w".to_string()],
        });
        let engine = Engine::new(EngineConfig::new(dir.path()), catalog);
        let stages = vec![stage("layer-1-step-0", vec![shell_tool("sh-1", "echo hi")])];

        let (tx, rx) = events::channel();
        let summary = engine
            .run("example.com", &stages, tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.statistics.failed_nodes, 1);

        let collected = drain_events(rx).await;
        assert!(collected
            .iter()
            .any(|e| e.kind == crate::events::ToolEventKind::Error
                && e.error.as_ref().unwrap().contains("requires one of")));
    }

    #[tokio::test]
    async fn nonzero_exit_records_failure_with_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(EngineConfig::new(dir.path()), ToolCatalog::new());
        let stages = vec![stage(
            "layer-1-step-0",
            vec![shell_tool("bad-1", "echo boom >&2; exit 3")],
        )];

        let (tx, _rx) = events::channel();
        let summary = engine
            .run("example.com", &stages, tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.statistics.failed_nodes, 1);

        let df_output = summary.run_dir.join("analysis").join("bad-1-analysis.json");
        let analysis: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(df_output).unwrap()).unwrap();
        assert_eq!(analysis["exit_code"], 3);
        assert_eq!(analysis["success"], false);
    }

    #[tokio::test]
    async fn stage_outputs_chain_to_the_next_stage() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(EngineConfig::new(dir.path()), ToolCatalog::new());
        let mut consumer = shell_tool("consumer-1", "");
        consumer.args = vec!["-c".to_string(), "cat {{input}}".to_string()];
        consumer.parents = vec!["producer-1".to_string()];
        consumer.layer = 2;
        let stages = vec![
            stage("layer-1-step-0", vec![shell_tool("producer-1", "echo found.example.com")]),
            stage("layer-2-step-0", vec![consumer]),
        ];

        let (tx, _rx) = events::channel();
        let summary = engine
            .run("example.com", &stages, tx, CancellationToken::new())
            .await
            .unwrap();

        let output = summary
            .run_dir
            .join("raw")
            .join("layer-2-step-0")
            .join("consumer-1.txt");
        assert_eq!(
            std::fs::read_to_string(output).unwrap(),
            "found.example.com\n"
        );
        assert_eq!(summary.statistics.completed_nodes, 2);
    }

    #[tokio::test]
    async fn cancellation_skips_later_stages() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(EngineConfig::new(dir.path()), ToolCatalog::new());
        let stages = vec![
            stage("layer-1-step-0", vec![shell_tool("sleepy-1", "sleep 30")]),
            stage("layer-2-step-0", vec![shell_tool("never-1", "echo nope")]),
        ];

        let cancel = CancellationToken::new();
        let killer = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            killer.cancel();
        });

        let (tx, rx) = events::channel();
        let summary = engine.run("example.com", &stages, tx, cancel).await.unwrap();
        assert_eq!(summary.statistics.failed_nodes, 1);
        assert_eq!(summary.statistics.completed_nodes, 0);

        let collected = drain_events(rx).await;
        assert!(collected
            .iter()
            .any(|e| e.tool == "sleepy-1"
                && e.error.as_deref().map(|m| m.contains("cancelled")).unwrap_or(false)));
        assert!(collected.iter().all(|e| e.tool != "never-1"));
    }
}
