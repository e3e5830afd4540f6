//! Workflow DAG with 2D matrix positioning
//!
//! Nodes live in a matrix indexed by (layer, position): the layer is the
//! execution stage (X-axis), the position is the slot within the stage
//! (Y-axis). The graph keeps two indexes - node ID -> Node and coordinate ->
//! occupant IDs - and every mutation must keep them consistent. A coordinate
//! may hold several nodes only when every occupant is flagged parallel.

pub mod render;
pub mod snapshot;

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::SpectraError;

/// Root node ID. Pseudo-node at (0,0), created by [`Dag::new`], never removable.
pub const ROOT_ID: &str = "input";

/// A workflow vertex with matrix positioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Unique within the DAG (e.g. "nuclei-2")
    pub id: String,
    /// Executable name (e.g. "nuclei"), not necessarily unique
    pub tool: String,
    /// Raw argument template, may contain {{input}}/{{domain}}/{{output}}
    pub args: String,
    /// Downstream node IDs
    pub children: Vec<String>,
    /// Execution stage index (X-axis)
    pub layer: usize,
    /// Slot within the layer (Y-axis)
    pub position: usize,
    /// Subgraph ID for grouping (None = main graph)
    pub subgraph: Option<String>,
    /// Local X within the subgraph
    pub sub_x: usize,
    /// Local Y within the subgraph
    pub sub_y: usize,
    /// Can run concurrently with co-located nodes
    pub parallel: bool,
}

/// A 2D position in the workflow matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coordinate {
    pub x: usize,
    pub y: usize,
}

impl Coordinate {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

/// Metadata for a named logical grouping of nodes.
#[derive(Debug, Clone)]
pub struct SubgraphInfo {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Member node IDs in insertion order
    pub nodes: Vec<String>,
    /// Intended execution semantics of the group
    pub parallel: bool,
    /// node ID -> local coordinate, used for rendering order
    pub matrix: HashMap<String, Coordinate>,
}

/// Everything needed to attach a new node. Position defaults to the next
/// free slot in the node's (layer, subgraph).
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: String,
    pub tool: String,
    pub args: String,
    pub layer: usize,
    pub position: Option<usize>,
    pub subgraph: Option<String>,
    pub parallel: bool,
}

impl NodeSpec {
    pub fn new(
        id: impl Into<String>,
        tool: impl Into<String>,
        args: impl Into<String>,
        layer: usize,
    ) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            args: args.into(),
            layer,
            position: None,
            subgraph: None,
            parallel: false,
        }
    }

    pub fn at_position(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }

    pub fn in_subgraph(mut self, subgraph: impl Into<String>) -> Self {
        self.subgraph = Some(subgraph.into());
        self
    }

    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }
}

/// Directed graph of tool nodes with a coordinate matrix.
///
/// Dual index: `nodes` (ID -> Node) and `matrix` (coordinate -> occupant IDs)
/// let rendering and execution ordering work from either perspective without
/// a full scan. Every mutation keeps both in sync.
#[derive(Debug, Clone)]
pub struct Dag {
    nodes: HashMap<String, Node>,
    root: String,
    matrix: HashMap<Coordinate, Vec<String>>,
    subgraphs: HashMap<String, SubgraphInfo>,
    max_x: usize,
    max_y: usize,
    /// Monotonic auto-position counter per (layer, subgraph). Never rewinds,
    /// so auto-assignment stays deterministic across removals.
    position_counters: HashMap<(usize, String), usize>,
}

impl Dag {
    /// Create a graph containing only the root pseudo-node at (0,0).
    pub fn new() -> Self {
        let mut dag = Self {
            nodes: HashMap::new(),
            root: ROOT_ID.to_string(),
            matrix: HashMap::new(),
            subgraphs: HashMap::new(),
            max_x: 0,
            max_y: 0,
            position_counters: HashMap::new(),
        };
        let root = Node {
            id: ROOT_ID.to_string(),
            tool: ROOT_ID.to_string(),
            args: String::new(),
            children: Vec::new(),
            layer: 0,
            position: 0,
            subgraph: None,
            sub_x: 0,
            sub_y: 0,
            parallel: false,
        };
        dag.insert_raw(root);
        dag
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of nodes including the root.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn max_x(&self) -> usize {
        self.max_x
    }

    pub fn max_y(&self) -> usize {
        self.max_y
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn subgraphs(&self) -> &HashMap<String, SubgraphInfo> {
        &self.subgraphs
    }

    /// Attach a new node under `parent_id`.
    ///
    /// Fails with [`SpectraError::NodeNotFound`] if the parent is absent and
    /// [`SpectraError::DuplicateNode`] if the ID is taken. An unspecified
    /// position is auto-assigned from the (layer, subgraph) counter.
    pub fn attach(&mut self, parent_id: &str, spec: NodeSpec) -> Result<(), SpectraError> {
        if !self.nodes.contains_key(parent_id) {
            return Err(SpectraError::NodeNotFound { id: parent_id.to_string() });
        }
        if self.nodes.contains_key(&spec.id) {
            return Err(SpectraError::DuplicateNode { id: spec.id });
        }

        let position = match spec.position {
            Some(p) => p,
            None => self.peek_position(spec.layer, spec.subgraph.as_deref()),
        };

        let mut node = Node {
            id: spec.id.clone(),
            tool: spec.tool,
            args: spec.args,
            children: Vec::new(),
            layer: spec.layer,
            position,
            subgraph: spec.subgraph.clone(),
            sub_x: 0,
            sub_y: 0,
            parallel: spec.parallel,
        };

        if let Some(sg_id) = &spec.subgraph {
            let sg = self
                .subgraphs
                .entry(sg_id.clone())
                .or_insert_with(|| SubgraphInfo {
                    id: sg_id.clone(),
                    name: sg_id.clone(),
                    description: None,
                    nodes: Vec::new(),
                    parallel: spec.parallel,
                    matrix: HashMap::new(),
                });
            node.sub_x = sg.nodes.len();
            node.sub_y = 0;
            sg.nodes.push(spec.id.clone());
            sg.matrix.insert(spec.id.clone(), Coordinate::new(node.sub_x, node.sub_y));
        }

        self.insert_raw(node);
        if let Some(parent) = self.nodes.get_mut(parent_id) {
            parent.children.push(spec.id);
        }
        Ok(())
    }

    /// Relocate a node in the matrix. The target slot is not checked for
    /// occupancy or parallel compatibility - that is the caller's job.
    pub fn move_node(
        &mut self,
        id: &str,
        new_layer: usize,
        new_position: usize,
    ) -> Result<(), SpectraError> {
        let (old_coord, subgraph) = match self.nodes.get(id) {
            Some(n) => (Coordinate::new(n.layer, n.position), n.subgraph.clone()),
            None => return Err(SpectraError::NodeNotFound { id: id.to_string() }),
        };

        self.unindex(id, old_coord);
        let node = self.nodes.get_mut(id).expect("checked above");
        node.layer = new_layer;
        node.position = new_position;
        self.index(id.to_string(), Coordinate::new(new_layer, new_position));
        self.bump_bounds(new_layer, new_position);
        self.advance_counter(new_layer, subgraph.as_deref(), new_position);
        Ok(())
    }

    /// Delete a node and every edge pointing at it. The root is protected.
    pub fn remove(&mut self, id: &str) -> Result<(), SpectraError> {
        if id == self.root {
            return Err(SpectraError::RootRemoval);
        }
        let node = self
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| SpectraError::NodeNotFound { id: id.to_string() })?;

        self.unindex(id, Coordinate::new(node.layer, node.position));

        if let Some(sg_id) = &node.subgraph {
            let drop_subgraph = if let Some(sg) = self.subgraphs.get_mut(sg_id) {
                sg.nodes.retain(|n| n != id);
                sg.matrix.remove(id);
                sg.nodes.is_empty()
            } else {
                false
            };
            if drop_subgraph {
                self.subgraphs.remove(sg_id);
            }
        }

        self.nodes.remove(id);
        for n in self.nodes.values_mut() {
            n.children.retain(|c| c != id);
        }
        self.recalculate_bounds();
        Ok(())
    }

    /// Close position gaps in a layer: occupants are reassigned 0..N-1
    /// ordered by their current position, preserving relative order.
    pub fn compact_layer(&mut self, layer: usize) {
        let mut ids: Vec<(usize, String)> = self
            .nodes
            .values()
            .filter(|n| n.layer == layer)
            .map(|n| (n.position, n.id.clone()))
            .collect();
        ids.sort();

        for (new_pos, (old_pos, id)) in ids.into_iter().enumerate() {
            self.unindex(&id, Coordinate::new(layer, old_pos));
            if let Some(node) = self.nodes.get_mut(&id) {
                node.position = new_pos;
            }
            self.index(id, Coordinate::new(layer, new_pos));
        }
        self.recalculate_bounds();
    }

    /// Node IDs at a layer, ordered by position.
    pub fn nodes_at_layer(&self, layer: usize) -> Vec<String> {
        let mut nodes: Vec<(usize, String)> = self
            .nodes
            .values()
            .filter(|n| n.layer == layer)
            .map(|n| (n.position, n.id.clone()))
            .collect();
        nodes.sort();
        nodes.into_iter().map(|(_, id)| id).collect()
    }

    /// Nodes at a layer keyed by position, ascending.
    pub fn layer_matrix(&self, layer: usize) -> BTreeMap<usize, Vec<&Node>> {
        let mut matrix: BTreeMap<usize, Vec<&Node>> = BTreeMap::new();
        for coord in self.matrix.keys().filter(|c| c.x == layer) {
            for id in &self.matrix[coord] {
                if let Some(node) = self.nodes.get(id) {
                    matrix.entry(coord.y).or_default().push(node);
                }
            }
        }
        matrix
    }

    /// Partition a layer's nodes into execution groups, by position.
    ///
    /// Parallel occupants of one position form a single group; each
    /// non-parallel occupant is its own singleton group.
    pub fn parallel_groups(&self, layer: usize) -> Vec<Vec<String>> {
        let mut groups = Vec::new();
        for (_, occupants) in self.layer_matrix(layer) {
            let mut parallel_group = Vec::new();
            for node in occupants {
                if node.parallel {
                    parallel_group.push(node.id.clone());
                } else {
                    groups.push(vec![node.id.clone()]);
                }
            }
            if !parallel_group.is_empty() {
                groups.push(parallel_group);
            }
        }
        groups
    }

    /// Execution steps for the whole graph: each layer's parallel groups in
    /// layer order. Empty layers contribute nothing.
    pub fn execution_order(&self) -> Vec<Vec<String>> {
        let mut order = Vec::new();
        for layer in 0..=self.max_x {
            order.extend(self.parallel_groups(layer));
        }
        order
    }

    /// Check the structural invariants: coordinate sharing only among
    /// parallel nodes, every node present in its own matrix bucket, and a
    /// cycle-free children relation.
    pub fn validate(&self) -> Result<(), SpectraError> {
        for (coord, occupants) in &self.matrix {
            if occupants.len() > 1 {
                for id in occupants {
                    if let Some(node) = self.nodes.get(id) {
                        if !node.parallel {
                            return Err(SpectraError::inconsistent(format!(
                                "non-parallel node '{}' shares coordinate ({},{})",
                                id, coord.x, coord.y
                            )));
                        }
                    }
                }
            }
        }

        for node in self.nodes.values() {
            let coord = Coordinate::new(node.layer, node.position);
            let present = self
                .matrix
                .get(&coord)
                .is_some_and(|ids| ids.iter().any(|id| id == &node.id));
            if !present {
                return Err(SpectraError::inconsistent(format!(
                    "node '{}' missing from matrix at ({},{})",
                    node.id, coord.x, coord.y
                )));
            }
        }

        self.check_acyclic()
    }

    /// Coordinate of a node, if it exists.
    pub fn coordinate_of(&self, id: &str) -> Option<Coordinate> {
        self.nodes.get(id).map(|n| Coordinate::new(n.layer, n.position))
    }

    /// All nodes occupying a coordinate, in insertion order.
    pub fn nodes_at(&self, coord: Coordinate) -> Vec<&Node> {
        self.matrix
            .get(&coord)
            .map(|ids| ids.iter().filter_map(|id| self.nodes.get(id)).collect())
            .unwrap_or_default()
    }

    /// Members of a subgraph sorted by their local coordinates.
    pub fn subgraph_nodes(&self, subgraph_id: &str) -> Vec<&Node> {
        let Some(sg) = self.subgraphs.get(subgraph_id) else {
            return Vec::new();
        };
        let mut nodes: Vec<&Node> =
            sg.nodes.iter().filter_map(|id| self.nodes.get(id)).collect();
        nodes.sort_by_key(|n| (n.sub_x, n.sub_y));
        nodes
    }

    /// IDs of every node listing `id` as a child. Used to resolve a node's
    /// input files from its upstream outputs.
    pub fn parents_of(&self, id: &str) -> Vec<String> {
        let mut parents: Vec<String> = self
            .nodes
            .values()
            .filter(|n| n.children.iter().any(|c| c == id))
            .map(|n| n.id.clone())
            .collect();
        parents.sort();
        parents
    }

    /// Next auto-assign position for (layer, subgraph) without consuming it.
    pub fn peek_position(&self, layer: usize, subgraph: Option<&str>) -> usize {
        *self
            .position_counters
            .get(&(layer, subgraph.unwrap_or("").to_string()))
            .unwrap_or(&0)
    }

    // ───────────────────────── internal ─────────────────────────

    /// Insert a fully-formed node into both indexes and advance bounds and
    /// counters. Used by attach and by snapshot loading.
    pub(crate) fn insert_raw(&mut self, node: Node) {
        let coord = Coordinate::new(node.layer, node.position);
        self.bump_bounds(node.layer, node.position);
        self.advance_counter(node.layer, node.subgraph.as_deref(), node.position);
        self.index(node.id.clone(), coord);
        self.nodes.insert(node.id.clone(), node);
    }

    pub(crate) fn insert_subgraph(&mut self, sg: SubgraphInfo) {
        self.subgraphs.insert(sg.id.clone(), sg);
    }

    pub(crate) fn set_bounds(&mut self, max_x: usize, max_y: usize) {
        self.max_x = self.max_x.max(max_x);
        self.max_y = self.max_y.max(max_y);
    }

    fn index(&mut self, id: String, coord: Coordinate) {
        self.matrix.entry(coord).or_default().push(id);
    }

    fn unindex(&mut self, id: &str, coord: Coordinate) {
        if let Some(occupants) = self.matrix.get_mut(&coord) {
            occupants.retain(|n| n != id);
            if occupants.is_empty() {
                self.matrix.remove(&coord);
            }
        }
    }

    fn bump_bounds(&mut self, layer: usize, position: usize) {
        self.max_x = self.max_x.max(layer);
        self.max_y = self.max_y.max(position);
    }

    fn recalculate_bounds(&mut self) {
        self.max_x = 0;
        self.max_y = 0;
        for node in self.nodes.values() {
            self.max_x = self.max_x.max(node.layer);
            self.max_y = self.max_y.max(node.position);
        }
    }

    /// Push the (layer, subgraph) counter past an occupied position.
    fn advance_counter(&mut self, layer: usize, subgraph: Option<&str>, position: usize) {
        let counter = self
            .position_counters
            .entry((layer, subgraph.unwrap_or("").to_string()))
            .or_insert(0);
        *counter = (*counter).max(position + 1);
    }

    /// DFS with a visited set. Guards the callers that walk children against
    /// nontermination if an external loader ever produced a cycle.
    fn check_acyclic(&self) -> Result<(), SpectraError> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut in_stack: HashSet<&str> = HashSet::new();

        for start in self.nodes.keys() {
            if visited.contains(start.as_str()) {
                continue;
            }
            // Iterative DFS: (node, next child index)
            let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
            in_stack.insert(start.as_str());
            while let Some((id, child_idx)) = stack.pop() {
                let children = self.nodes.get(id).map(|n| n.children.as_slice()).unwrap_or(&[]);
                if child_idx < children.len() {
                    stack.push((id, child_idx + 1));
                    let child = children[child_idx].as_str();
                    if in_stack.contains(child) {
                        return Err(SpectraError::inconsistent(format!(
                            "cycle detected through node '{child}'"
                        )));
                    }
                    if !visited.contains(child) && self.nodes.contains_key(child) {
                        in_stack.insert(child);
                        stack.push((child, 0));
                    }
                } else {
                    visited.insert(id);
                    in_stack.remove(id);
                }
            }
        }
        Ok(())
    }
}

impl Default for Dag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, layer: usize) -> NodeSpec {
        NodeSpec::new(id, id, "", layer)
    }

    #[test]
    fn new_dag_contains_only_root() {
        let dag = Dag::new();
        assert_eq!(dag.node_count(), 1);
        assert!(dag.contains(ROOT_ID));
        assert_eq!(dag.coordinate_of(ROOT_ID), Some(Coordinate::new(0, 0)));
        assert_eq!(dag.max_x(), 0);
        assert_eq!(dag.max_y(), 0);
    }

    #[test]
    fn attach_requires_existing_parent() {
        let mut dag = Dag::new();
        let err = dag.attach("ghost", spec("a", 1)).unwrap_err();
        assert!(matches!(err, SpectraError::NodeNotFound { .. }));
    }

    #[test]
    fn attach_rejects_duplicate_id() {
        let mut dag = Dag::new();
        dag.attach(ROOT_ID, spec("a", 1)).unwrap();
        let err = dag.attach(ROOT_ID, spec("a", 1)).unwrap_err();
        assert!(matches!(err, SpectraError::DuplicateNode { .. }));
    }

    #[test]
    fn attached_nodes_are_retrievable_and_appear_once_per_layer() {
        let mut dag = Dag::new();
        for id in ["a", "b", "c"] {
            dag.attach(ROOT_ID, spec(id, 1)).unwrap();
        }
        for id in ["a", "b", "c"] {
            assert!(dag.get(id).is_some());
            let layer = dag.nodes_at_layer(1);
            assert_eq!(layer.iter().filter(|n| n.as_str() == id).count(), 1);
        }
        // Parent edge recorded
        assert_eq!(dag.get(ROOT_ID).unwrap().children, vec!["a", "b", "c"]);
    }

    #[test]
    fn auto_positions_are_sequential_per_layer() {
        let mut dag = Dag::new();
        dag.attach(ROOT_ID, spec("a", 1)).unwrap();
        dag.attach(ROOT_ID, spec("b", 1)).unwrap();
        dag.attach(ROOT_ID, spec("c", 2)).unwrap();
        assert_eq!(dag.get("a").unwrap().position, 0);
        assert_eq!(dag.get("b").unwrap().position, 1);
        assert_eq!(dag.get("c").unwrap().position, 0);
    }

    #[test]
    fn auto_position_counter_survives_removal() {
        let mut dag = Dag::new();
        dag.attach(ROOT_ID, spec("a", 1)).unwrap();
        dag.attach(ROOT_ID, spec("b", 1)).unwrap();
        dag.remove("b").unwrap();
        // Counter is monotonic: the freed slot is not reused.
        dag.attach(ROOT_ID, spec("c", 1)).unwrap();
        assert_eq!(dag.get("c").unwrap().position, 2);
    }

    #[test]
    fn explicit_position_advances_counter_past_itself() {
        let mut dag = Dag::new();
        dag.attach(ROOT_ID, spec("a", 1).at_position(5)).unwrap();
        dag.attach(ROOT_ID, spec("b", 1)).unwrap();
        assert_eq!(dag.get("b").unwrap().position, 6);
        assert_eq!(dag.max_y(), 6);
    }

    #[test]
    fn subgraph_positions_are_tracked_separately() {
        let mut dag = Dag::new();
        dag.attach(ROOT_ID, spec("a", 1)).unwrap();
        dag.attach(ROOT_ID, spec("b", 1).in_subgraph("enum")).unwrap();
        dag.attach(ROOT_ID, spec("c", 1).in_subgraph("enum")).unwrap();
        assert_eq!(dag.get("b").unwrap().position, 0);
        assert_eq!(dag.get("c").unwrap().position, 1);
    }

    #[test]
    fn attach_creates_and_fills_subgraph() {
        let mut dag = Dag::new();
        dag.attach(ROOT_ID, spec("a", 1).in_subgraph("enum").parallel()).unwrap();
        dag.attach(ROOT_ID, spec("b", 1).in_subgraph("enum").parallel()).unwrap();

        let sg = &dag.subgraphs()["enum"];
        assert_eq!(sg.nodes, vec!["a", "b"]);
        assert!(sg.parallel);
        assert_eq!(sg.matrix["a"], Coordinate::new(0, 0));
        assert_eq!(sg.matrix["b"], Coordinate::new(1, 0));

        let ordered: Vec<&str> = dag.subgraph_nodes("enum").iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ordered, vec!["a", "b"]);
    }

    #[test]
    fn remove_root_always_fails() {
        let mut dag = Dag::new();
        assert!(matches!(dag.remove(ROOT_ID), Err(SpectraError::RootRemoval)));
    }

    #[test]
    fn remove_strips_children_references_and_stays_valid() {
        let mut dag = Dag::new();
        dag.attach(ROOT_ID, spec("a", 1)).unwrap();
        dag.attach("a", spec("b", 2)).unwrap();
        dag.attach(ROOT_ID, spec("c", 1)).unwrap();
        // Second edge into b
        dag.nodes.get_mut("c").unwrap().children.push("b".to_string());

        dag.remove("b").unwrap();
        assert!(!dag.contains("b"));
        assert!(dag.get("a").unwrap().children.is_empty());
        assert!(dag.get("c").unwrap().children.is_empty());
        assert!(dag.nodes_at(Coordinate::new(2, 0)).is_empty());
        dag.validate().unwrap();
    }

    #[test]
    fn remove_last_member_drops_subgraph() {
        let mut dag = Dag::new();
        dag.attach(ROOT_ID, spec("a", 1).in_subgraph("enum")).unwrap();
        dag.remove("a").unwrap();
        assert!(dag.subgraphs().is_empty());
    }

    #[test]
    fn remove_recomputes_bounds() {
        let mut dag = Dag::new();
        dag.attach(ROOT_ID, spec("a", 1)).unwrap();
        dag.attach("a", spec("b", 5).at_position(3)).unwrap();
        assert_eq!((dag.max_x(), dag.max_y()), (5, 3));
        dag.remove("b").unwrap();
        assert_eq!((dag.max_x(), dag.max_y()), (1, 0));
    }

    #[test]
    fn move_node_relocates_in_matrix() {
        let mut dag = Dag::new();
        dag.attach(ROOT_ID, spec("a", 1)).unwrap();
        dag.move_node("a", 3, 2).unwrap();
        assert_eq!(dag.coordinate_of("a"), Some(Coordinate::new(3, 2)));
        assert!(dag.nodes_at(Coordinate::new(1, 0)).is_empty());
        assert_eq!(dag.nodes_at(Coordinate::new(3, 2)).len(), 1);
        assert_eq!((dag.max_x(), dag.max_y()), (3, 2));
        dag.validate().unwrap();
    }

    #[test]
    fn move_missing_node_fails() {
        let mut dag = Dag::new();
        assert!(matches!(
            dag.move_node("ghost", 1, 1),
            Err(SpectraError::NodeNotFound { .. })
        ));
    }

    #[test]
    fn compact_layer_closes_gaps_preserving_order() {
        let mut dag = Dag::new();
        dag.attach(ROOT_ID, spec("a", 1).at_position(2)).unwrap();
        dag.attach(ROOT_ID, spec("b", 1).at_position(5)).unwrap();
        dag.attach(ROOT_ID, spec("c", 1).at_position(9)).unwrap();

        dag.compact_layer(1);
        assert_eq!(dag.nodes_at_layer(1), vec!["a", "b", "c"]);
        assert_eq!(dag.get("a").unwrap().position, 0);
        assert_eq!(dag.get("b").unwrap().position, 1);
        assert_eq!(dag.get("c").unwrap().position, 2);
        assert_eq!(dag.max_y(), 2);
        dag.validate().unwrap();
    }

    #[test]
    fn parallel_groups_partition_by_position_and_flag() {
        let mut dag = Dag::new();
        dag.attach(ROOT_ID, spec("a", 1).at_position(0).parallel()).unwrap();
        dag.attach(ROOT_ID, spec("b", 1).at_position(0).parallel()).unwrap();
        dag.attach(ROOT_ID, spec("c", 1).at_position(1)).unwrap();

        let groups = dag.parallel_groups(1);
        assert_eq!(groups, vec![vec!["a".to_string(), "b".to_string()], vec!["c".to_string()]]);
    }

    #[test]
    fn execution_order_matches_layered_grouping() {
        // Layer 1: A,B,C all parallel at one position; layer 2: D sequential;
        // layer 3: E; layer 4: F,G parallel.
        let mut dag = Dag::new();
        for id in ["a", "b", "c"] {
            dag.attach(ROOT_ID, spec(id, 1).at_position(0).parallel()).unwrap();
        }
        dag.attach("a", spec("d", 2)).unwrap();
        dag.attach("d", spec("e", 3)).unwrap();
        dag.attach("e", spec("f", 4).at_position(0).parallel()).unwrap();
        dag.attach("e", spec("g", 4).at_position(0).parallel()).unwrap();

        let order: Vec<Vec<String>> = dag
            .execution_order()
            .into_iter()
            .filter(|g| g != &vec![ROOT_ID.to_string()])
            .collect();
        assert_eq!(
            order,
            vec![
                vec!["a".to_string(), "b".to_string(), "c".to_string()],
                vec!["d".to_string()],
                vec!["e".to_string()],
                vec!["f".to_string(), "g".to_string()],
            ]
        );
    }

    #[test]
    fn execution_order_skips_empty_layers() {
        let mut dag = Dag::new();
        dag.attach(ROOT_ID, spec("a", 3)).unwrap();
        let order = dag.execution_order();
        assert_eq!(order.len(), 2); // root group + a
        assert_eq!(order[1], vec!["a".to_string()]);
    }

    #[test]
    fn validate_rejects_non_parallel_coordinate_sharing() {
        let mut dag = Dag::new();
        dag.attach(ROOT_ID, spec("a", 1).at_position(0).parallel()).unwrap();
        dag.attach(ROOT_ID, spec("b", 1).at_position(0)).unwrap();
        let err = dag.validate().unwrap_err();
        assert!(matches!(err, SpectraError::Inconsistent { .. }));
    }

    #[test]
    fn validate_detects_missing_matrix_entry() {
        let mut dag = Dag::new();
        dag.attach(ROOT_ID, spec("a", 1)).unwrap();
        // Corrupt the matrix behind the node's back.
        dag.matrix.remove(&Coordinate::new(1, 0));
        let err = dag.validate().unwrap_err();
        assert!(matches!(err, SpectraError::Inconsistent { .. }));
        assert!(err.to_string().contains("missing from matrix"));
    }

    #[test]
    fn validate_detects_cycles() {
        let mut dag = Dag::new();
        dag.attach(ROOT_ID, spec("a", 1)).unwrap();
        dag.attach("a", spec("b", 2)).unwrap();
        dag.nodes.get_mut("b").unwrap().children.push("a".to_string());
        let err = dag.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn parents_of_follows_inverse_edges() {
        let mut dag = Dag::new();
        dag.attach(ROOT_ID, spec("a", 1)).unwrap();
        dag.attach(ROOT_ID, spec("b", 1)).unwrap();
        dag.attach("a", spec("c", 2)).unwrap();
        dag.nodes.get_mut("b").unwrap().children.push("c".to_string());
        assert_eq!(dag.parents_of("c"), vec!["a", "b"]);
        assert_eq!(dag.parents_of("a"), vec![ROOT_ID]);
    }
}
