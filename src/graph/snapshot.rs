//! Persisted workflow snapshots
//!
//! Current format is version "2.0": matrix bounds, subgraph list, and all
//! non-root nodes sorted by (layer, position). Legacy files (no `version`
//! field, no `position` on nodes) still load; their positions are
//! auto-assigned per (layer, subgraph) in file order.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{Coordinate, Dag, Node, SubgraphInfo};
use crate::error::SpectraError;

pub const SNAPSHOT_VERSION: &str = "2.0";

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    matrix: Option<MatrixBounds>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    subgraphs: Vec<SubgraphWire>,
    workflow: Vec<NodeWire>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MatrixBounds {
    max_x: usize,
    max_y: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct SubgraphWire {
    id: String,
    name: String,
    #[serde(default)]
    parallel: bool,
    #[serde(default)]
    nodes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeWire {
    id: String,
    tool: String,
    #[serde(default)]
    args: String,
    #[serde(default)]
    children: Vec<String>,
    layer: usize,
    /// Absent in legacy files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<usize>,
    #[serde(default)]
    parallel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subgraph: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub_x: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub_y: Option<usize>,
}

/// Serialize a DAG to the version "2.0" snapshot document.
pub fn export(dag: &Dag) -> Result<String, SpectraError> {
    let mut subgraphs: Vec<SubgraphWire> = dag
        .subgraphs()
        .values()
        .map(|sg| SubgraphWire {
            id: sg.id.clone(),
            name: sg.name.clone(),
            parallel: sg.parallel,
            nodes: sg.nodes.clone(),
        })
        .collect();
    subgraphs.sort_by(|a, b| a.id.cmp(&b.id));

    let mut nodes: Vec<&Node> = dag.nodes().filter(|n| n.id != dag.root()).collect();
    nodes.sort_by_key(|n| (n.layer, n.position, n.id.clone()));

    let workflow = nodes
        .into_iter()
        .map(|n| NodeWire {
            id: n.id.clone(),
            tool: n.tool.clone(),
            args: n.args.clone(),
            children: n.children.clone(),
            layer: n.layer,
            position: Some(n.position),
            parallel: n.parallel,
            subgraph: n.subgraph.clone(),
            sub_x: n.subgraph.as_ref().map(|_| n.sub_x),
            sub_y: n.subgraph.as_ref().map(|_| n.sub_y),
        })
        .collect();

    let doc = SnapshotDoc {
        version: Some(SNAPSHOT_VERSION.to_string()),
        matrix: Some(MatrixBounds { max_x: dag.max_x(), max_y: dag.max_y() }),
        subgraphs,
        workflow,
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

/// Parse a snapshot document, current or legacy format.
pub fn load(json: &str) -> Result<Dag, SpectraError> {
    let doc: SnapshotDoc = serde_json::from_str(json)?;
    match doc.version.as_deref() {
        Some(SNAPSHOT_VERSION) => load_current(doc),
        Some(other) => Err(SpectraError::Snapshot(format!(
            "unsupported snapshot version '{other}'"
        ))),
        None => load_legacy(doc),
    }
}

/// Read and parse a snapshot file.
pub fn load_file(path: impl AsRef<Path>) -> Result<Dag, SpectraError> {
    let json = std::fs::read_to_string(path)?;
    load(&json)
}

/// Export a DAG to a snapshot file.
pub fn save_file(dag: &Dag, path: impl AsRef<Path>) -> Result<(), SpectraError> {
    std::fs::write(path, export(dag)?)?;
    Ok(())
}

fn load_current(doc: SnapshotDoc) -> Result<Dag, SpectraError> {
    let mut dag = Dag::new();

    for sg in doc.subgraphs {
        dag.insert_subgraph(SubgraphInfo {
            id: sg.id.clone(),
            name: sg.name,
            description: None,
            nodes: sg.nodes,
            parallel: sg.parallel,
            matrix: Default::default(),
        });
    }

    for wire in doc.workflow {
        if wire.id == dag.root() {
            continue;
        }
        let node = wire_to_node(&wire, wire.position.unwrap_or(0));
        register_in_subgraph(&mut dag, &node);
        dag.insert_raw(node);
    }

    if let Some(bounds) = doc.matrix {
        dag.set_bounds(bounds.max_x, bounds.max_y);
    }
    relink_root(&mut dag);
    Ok(dag)
}

fn load_legacy(doc: SnapshotDoc) -> Result<Dag, SpectraError> {
    let mut dag = Dag::new();

    // File order drives position assignment per (layer, subgraph).
    for wire in doc.workflow {
        if wire.id == dag.root() {
            continue;
        }
        let position = match wire.position {
            Some(p) => p,
            None => dag.peek_position(wire.layer, wire.subgraph.as_deref()),
        };
        let node = wire_to_node(&wire, position);
        register_in_subgraph(&mut dag, &node);
        dag.insert_raw(node);
    }
    relink_root(&mut dag);
    Ok(dag)
}

fn wire_to_node(wire: &NodeWire, position: usize) -> Node {
    Node {
        id: wire.id.clone(),
        tool: wire.tool.clone(),
        args: wire.args.clone(),
        children: wire.children.clone(),
        layer: wire.layer,
        position,
        subgraph: wire.subgraph.clone(),
        sub_x: wire.sub_x.unwrap_or(0),
        sub_y: wire.sub_y.unwrap_or(0),
        parallel: wire.parallel,
    }
}

/// Keep the subgraph index consistent with the node being loaded; legacy
/// files carry membership only on the nodes themselves.
fn register_in_subgraph(dag: &mut Dag, node: &Node) {
    let Some(sg_id) = &node.subgraph else { return };
    let sg = dag
        .subgraphs
        .entry(sg_id.clone())
        .or_insert_with(|| SubgraphInfo {
            id: sg_id.clone(),
            name: sg_id.clone(),
            description: None,
            nodes: Vec::new(),
            parallel: node.parallel,
            matrix: Default::default(),
        });
    if !sg.nodes.iter().any(|n| n == &node.id) {
        sg.nodes.push(node.id.clone());
    }
    sg.matrix.insert(node.id.clone(), Coordinate::new(node.sub_x, node.sub_y));
}

/// Snapshots omit the root, so its outgoing edges are rebuilt by pointing it
/// at every layer-1 node.
fn relink_root(dag: &mut Dag) {
    let first_layer = dag.nodes_at_layer(1);
    let root_id = dag.root().to_string();
    if let Some(root) = dag.nodes.get_mut(&root_id) {
        root.children = first_layer;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeSpec, ROOT_ID};

    fn build_dag() -> Dag {
        let mut dag = Dag::new();
        dag.attach(ROOT_ID, NodeSpec::new("subfinder-1", "subfinder", "-d {{domain}}", 1))
            .unwrap();
        dag.attach(
            ROOT_ID,
            NodeSpec::new("amass-1", "amass", "enum -d {{domain}}", 1)
                .at_position(1)
                .in_subgraph("enum")
                .parallel(),
        )
        .unwrap();
        dag.attach("subfinder-1", NodeSpec::new("httpx-1", "httpx", "-l {{input}}", 2))
            .unwrap();
        dag
    }

    #[test]
    fn export_is_versioned_and_sorted() {
        let json = export(&build_dag()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["version"], "2.0");
        assert_eq!(value["matrix"]["max_x"], 2);
        let ids: Vec<&str> = value["workflow"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["subfinder-1", "amass-1", "httpx-1"]);
        // Root is never exported
        assert!(!ids.contains(&ROOT_ID));
    }

    #[test]
    fn current_format_round_trip() {
        let dag = build_dag();
        let reloaded = load(&export(&dag).unwrap()).unwrap();

        assert_eq!(reloaded.node_count(), dag.node_count());
        for node in dag.nodes() {
            if node.id == ROOT_ID {
                continue;
            }
            let other = reloaded.get(&node.id).expect("node survives round trip");
            assert_eq!(other.layer, node.layer);
            assert_eq!(other.position, node.position);
            assert_eq!(other.subgraph, node.subgraph);
            assert_eq!(other.children, node.children);
            assert_eq!(other.parallel, node.parallel);
        }
        assert_eq!(reloaded.max_x(), dag.max_x());
        assert_eq!(reloaded.max_y(), dag.max_y());
        assert_eq!(reloaded.subgraphs()["enum"].nodes, vec!["amass-1"]);
        reloaded.validate().unwrap();
    }

    #[test]
    fn reload_relinks_root_to_first_layer() {
        let reloaded = load(&export(&build_dag()).unwrap()).unwrap();
        let mut children = reloaded.get(ROOT_ID).unwrap().children.clone();
        children.sort();
        assert_eq!(children, vec!["amass-1", "subfinder-1"]);
    }

    #[test]
    fn legacy_format_assigns_positions_in_file_order() {
        let legacy = r#"{
            "workflow": [
                {"id":"a","tool":"subfinder","args":"","children":["c"],"layer":1},
                {"id":"b","tool":"amass","args":"","children":["c"],"layer":1},
                {"id":"c","tool":"httpx","args":"","children":[],"layer":2}
            ]
        }"#;
        let dag = load(legacy).unwrap();
        assert_eq!(dag.get("a").unwrap().position, 0);
        assert_eq!(dag.get("b").unwrap().position, 1);
        assert_eq!(dag.get("c").unwrap().position, 0);
        assert_eq!(dag.nodes_at_layer(1), vec!["a", "b"]);
        assert_eq!(dag.get("a").unwrap().children, vec!["c"]);
        dag.validate().unwrap();
    }

    #[test]
    fn legacy_format_rebuilds_subgraphs_from_nodes() {
        let legacy = r#"{
            "workflow": [
                {"id":"a","tool":"amass","args":"","children":[],"layer":1,"subgraph":"enum","parallel":true},
                {"id":"b","tool":"subfinder","args":"","children":[],"layer":1,"subgraph":"enum","parallel":true}
            ]
        }"#;
        let dag = load(legacy).unwrap();
        let sg = &dag.subgraphs()["enum"];
        assert_eq!(sg.nodes, vec!["a", "b"]);
        assert!(sg.parallel);
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let doc = r#"{"version":"3.1","workflow":[]}"#;
        let err = load(doc).unwrap_err();
        assert!(matches!(err, SpectraError::Snapshot(_)));
    }

    #[test]
    fn save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflow.json");
        let dag = build_dag();
        save_file(&dag, &path).unwrap();
        let reloaded = load_file(&path).unwrap();
        assert_eq!(reloaded.node_count(), dag.node_count());
    }
}
