//! Mermaid and plan rendering
//!
//! Pure functions of a [`Dag`] snapshot. Diagram text groups nodes by layer
//! and subgraph; edges are annotated "sequential" for next-layer children and
//! "parallel" for parallel fanout.

use std::fmt::Write;

use super::{Dag, Node};

const MAX_LABEL_ARGS: usize = 30;

/// Full `graph LR` Mermaid diagram with subgraph and layer blocks.
pub fn to_mermaid(dag: &Dag) -> String {
    let mut out = String::from("graph LR\n");
    write_subgraphs(dag, &mut out);
    write_layers(dag, &mut out);
    write_edges(dag, &mut out);
    out
}

fn write_subgraphs(dag: &Dag, out: &mut String) {
    let mut ids: Vec<&String> = dag.subgraphs().keys().collect();
    ids.sort();
    for sg_id in ids {
        let sg = &dag.subgraphs()[sg_id];
        if sg.nodes.is_empty() {
            continue;
        }
        let _ = writeln!(out, "  subgraph {}[\"{}\"]", sg.id, sg.name);
        for node in dag.subgraph_nodes(sg_id) {
            let _ = writeln!(out, "    {}[\"{}\\n{}\"]", node.id, node.tool, label_args(node));
        }
        out.push_str("  end\n");
    }
}

fn write_layers(dag: &Dag, out: &mut String) {
    for layer in 0..=dag.max_x() {
        // Subgraph members already render inside their subgraph block; a
        // position (or a whole layer) left with no free node emits nothing.
        let mut positions: Vec<(usize, Vec<&Node>, bool)> = Vec::new();
        for (position, occupants) in dag.layer_matrix(layer) {
            let shared = occupants.len() > 1;
            let visible: Vec<&Node> = occupants
                .into_iter()
                .filter(|n| n.subgraph.is_none())
                .collect();
            if !visible.is_empty() {
                positions.push((position, visible, shared));
            }
        }
        if positions.is_empty() {
            continue;
        }

        let _ = writeln!(out, "  subgraph L{layer}[\"Layer {layer}\"]");
        for (position, visible, shared) in positions {
            if shared {
                let _ = writeln!(out, "    subgraph P{layer}_{position}[\"Parallel Group\"]");
                for node in visible {
                    let _ = writeln!(
                        out,
                        "      {}[\"{}\\n{}\"]",
                        node.id,
                        node.tool,
                        label_args(node)
                    );
                }
                out.push_str("    end\n");
            } else {
                let node = visible[0];
                let _ = writeln!(out, "    {}[\"{}\\n{}\"]", node.id, node.tool, label_args(node));
            }
        }
        out.push_str("  end\n");
    }
}

fn write_edges(dag: &Dag, out: &mut String) {
    for node in sorted_nodes(dag) {
        for child_id in &node.children {
            let Some(child) = dag.get(child_id) else { continue };
            let edge = if child.parallel && node.children.len() > 1 {
                "-.->|parallel|"
            } else if child.layer == node.layer + 1 {
                "-->|sequential|"
            } else {
                "-->"
            };
            let _ = writeln!(out, "  {} {} {}", node.id, edge, child_id);
        }
    }
}

/// Simplified flat diagram: one line per node, plain edges.
pub fn to_compact_mermaid(dag: &Dag) -> String {
    let mut out = String::from("graph LR\n");
    for node in sorted_nodes(dag) {
        if node.id == dag.root() {
            let _ = writeln!(out, "  {}([Start])", node.id);
        } else {
            let _ = writeln!(out, "  {}[{}]", node.id, node.tool);
        }
    }
    for node in sorted_nodes(dag) {
        for child_id in &node.children {
            let _ = writeln!(out, "  {} --> {}", node.id, child_id);
        }
    }
    out
}

/// Human-readable step list derived from the execution order.
pub fn to_execution_plan(dag: &Dag) -> String {
    let mut out = String::from("Execution Plan:\n==============\n\n");

    for (step, group) in dag.execution_order().iter().enumerate() {
        let _ = writeln!(out, "Step {}:", step + 1);
        if group.len() > 1 {
            out.push_str("  Parallel execution:\n");
        }
        for node_id in group {
            let Some(node) = dag.get(node_id) else { continue };
            let _ = writeln!(out, "  \u{2192} {} ({})", node.tool, node.id);
            if !node.args.is_empty() {
                let _ = writeln!(out, "    Args: {}", node.args);
            }
        }
        out.push('\n');
    }
    out
}

/// Nodes sorted by (layer, position) for stable diagram output.
fn sorted_nodes(dag: &Dag) -> Vec<&Node> {
    let mut nodes: Vec<&Node> = dag.nodes().collect();
    nodes.sort_by_key(|n| (n.layer, n.position, n.id.clone()));
    nodes
}

fn label_args(node: &Node) -> String {
    if node.args.chars().count() > MAX_LABEL_ARGS {
        let head: String = node.args.chars().take(MAX_LABEL_ARGS - 3).collect();
        format!("{head}...")
    } else {
        node.args.clone()
    }
}
