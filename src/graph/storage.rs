/// JSON persistence for graphs
///
/// Graphs persist as an ordered list of `[nodeID, nodeRecord]` pairs. Loading
/// spawns every node first, builds a saved-id to live-id map, then replays the
/// topology through that map: non-`Control` edges from `inputConnections`,
/// `Control` edges from `outputConnections` (a control input can have many
/// producers, which a single input entry cannot express).

use std::{collections::BTreeMap, path::Path};

use crate::error::{GraphError, Result};
use crate::graph::dataflow::Graph;
use crate::graph::types::{GraphSnapshot, NodeId, NodeRecord, PinId};
use crate::node::info::CONTROL;

/// Receives user-visible load problems instead of failing the whole load
pub type LoadReporter<'a> = &'a mut dyn FnMut(&str);

/// Saved node id to live node id
pub type IdMap = BTreeMap<NodeId, NodeId>;

impl Graph {
    /// Snapshot of every node
    pub fn serialize(&self) -> GraphSnapshot {
        self.snapshot(None)
    }

    /// Snapshot restricted to one subgraph label when `subgraph` is given
    pub fn snapshot(&self, subgraph: Option<&str>) -> GraphSnapshot {
        let mut pairs = Vec::new();
        for id in self.node_ids() {
            let Ok(record) = self.node_record(id) else {
                continue;
            };
            if subgraph.map_or(true, |label| record.subgraph == label) {
                pairs.push((id, record));
            }
        }
        GraphSnapshot(pairs)
    }

    pub fn to_json(&self, subgraph: Option<&str>) -> Result<String> {
        self.snapshot(subgraph).to_json()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_json(None)?)?;
        tracing::info!("💾 Saved graph with {} nodes to {}", self.len(), path.as_ref().display());
        Ok(())
    }

    /// Load a saved graph file into this graph, allocating fresh ids
    pub fn load(&self, path: impl AsRef<Path>, reporter: Option<LoadReporter<'_>>) -> Result<IdMap> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let snapshot = GraphSnapshot::from_json(&text)?;
        tracing::info!("📂 Loading graph from {}", path.as_ref().display());
        self.load_state(&snapshot, reporter, false)
    }

    fn node_record(&self, id: NodeId) -> Result<NodeRecord> {
        let mut input_connections = BTreeMap::new();
        for conn in self.connections_to(id) {
            input_connections
                .entry(conn.input_name.clone())
                .or_insert_with(|| conn.output_pin().to_string());
        }
        let mut output_connections: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for conn in self.connections_from(id) {
            output_connections
                .entry(conn.output_name.clone())
                .or_default()
                .push(conn.input_pin().to_string());
        }
        self.with_node(id, |node| NodeRecord {
            class: node.core.class_name.clone(),
            position: node.core.position,
            inputs: node.core.input_records(),
            input_connections,
            outputs: node.core.output_records(),
            output_connections,
            subgraph: node.core.subgraph.clone(),
            dynamic: false,
        })
    }

    /// Rebuild nodes and topology from a snapshot.
    ///
    /// Unknown classes fail the load unless a reporter is given (the record is
    /// then skipped) or the record is marked dynamic (a passive class is
    /// synthesized from its pins). Edges whose endpoints did not load are
    /// dropped with a warning.
    pub fn load_state(
        &self,
        snapshot: &GraphSnapshot,
        mut reporter: Option<LoadReporter<'_>>,
        reuse_ids: bool,
    ) -> Result<IdMap> {
        let mut id_map = IdMap::new();
        for (saved_id, record) in snapshot.iter() {
            if !self.registry().contains(&record.class) {
                if record.dynamic {
                    self.registry()
                        .register_dynamic(&record.class, &record.inputs, &record.outputs)?;
                } else if let Some(report) = reporter.as_mut() {
                    report(&format!("Unknown node class **{}**", record.class));
                    continue;
                } else {
                    return Err(GraphError::UnknownNodeClass(record.class.clone()));
                }
            }
            let live_id = if reuse_ids {
                self.spawn_node_with_id(&record.class, *saved_id)?
            } else {
                self.spawn_node(&record.class)?
            };
            self.apply_record(live_id, record)?;
            id_map.insert(*saved_id, live_id);
        }
        self.replay_connections(snapshot, &id_map, reporter);
        tracing::info!("✅ Loaded {} of {} nodes", id_map.len(), snapshot.len());
        Ok(id_map)
    }

    /// Reconcile with a newer snapshot of the same graph.
    ///
    /// Every edge is dropped, existing ids are reused, missing nodes are
    /// spawned under their saved ids and nodes absent from the snapshot are
    /// deleted. Runtime state of surviving nodes is kept.
    pub fn update_state(&self, snapshot: &GraphSnapshot) -> Result<IdMap> {
        self.clear_connections();
        let mut id_map = IdMap::new();
        let mut absent: Vec<NodeId> = self.node_ids();
        for (id, record) in snapshot.iter() {
            let reusable = self.contains(*id)
                && self.class_of(*id).map(|c| c == record.class).unwrap_or(false);
            if !reusable {
                if self.contains(*id) {
                    self.delete_node(*id)?;
                }
                if !self.registry().contains(&record.class) && record.dynamic {
                    self.registry()
                        .register_dynamic(&record.class, &record.inputs, &record.outputs)?;
                }
                self.spawn_node_with_id(&record.class, *id)?;
            }
            absent.retain(|existing| existing != id);
            self.apply_record(*id, record)?;
            id_map.insert(*id, *id);
        }
        for id in absent {
            self.delete_node(id)?;
        }
        self.replay_connections(snapshot, &id_map, None);
        tracing::info!("🔄 Updated graph to {} nodes", self.len());
        Ok(id_map)
    }

    /// Position, subgraph and pin defaults; the default is the record's last element
    fn apply_record(&self, id: NodeId, record: &NodeRecord) -> Result<()> {
        self.with_node(id, |node| {
            node.core.position = record.position;
            node.core.subgraph = record.subgraph.clone();
            for pin in &record.inputs {
                match node.core.input_mut(pin.name()) {
                    Ok(input) => input.set_default(Some(pin.default().clone())),
                    Err(_) => tracing::warn!("⚠️ {} has no input '{}'", node.label(), pin.name()),
                }
            }
            for pin in &record.outputs {
                match node.core.output_mut(pin.name()) {
                    Ok(output) => output.set_default(Some(pin.default().clone())),
                    Err(_) => tracing::warn!("⚠️ {} has no output '{}'", node.label(), pin.name()),
                }
            }
        })
    }

    fn replay_connections(&self, snapshot: &GraphSnapshot, id_map: &IdMap, mut reporter: Option<LoadReporter<'_>>) {
        let mut warn = |message: String| {
            tracing::warn!("⚠️ {}", message);
            if let Some(report) = reporter.as_mut() {
                report(&message);
            }
        };
        for (saved_id, record) in snapshot.iter() {
            let Some(&this) = id_map.get(saved_id) else {
                continue;
            };
            for (input, source) in &record.input_connections {
                if input == CONTROL {
                    continue;
                }
                match source.parse::<PinId>() {
                    Ok(pin) => match id_map.get(&pin.node) {
                        Some(&from) => {
                            if let Err(e) = self.connect(from, &pin.name, this, input) {
                                warn(format!("Could not restore connection to {}:I{}: {}", this, input, e));
                            }
                        }
                        None => warn("Could not create connection due to missing node.".to_string()),
                    },
                    Err(e) => warn(e.to_string()),
                }
            }
            for (output, targets) in &record.output_connections {
                for target in targets {
                    let pin = match target.parse::<PinId>() {
                        Ok(pin) => pin,
                        Err(e) => {
                            warn(e.to_string());
                            continue;
                        }
                    };
                    if pin.name != CONTROL {
                        continue;
                    }
                    match id_map.get(&pin.node) {
                        Some(&to) => {
                            if let Err(e) = self.connect(this, output, to, CONTROL) {
                                warn(format!("Could not restore control edge from {}:O{}: {}", this, output, e));
                            }
                        }
                        None => warn("Could not create connection due to missing node.".to_string()),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::registry::NodeRegistry;
    use crate::graph::types::Connection;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn registry() -> Arc<NodeRegistry> {
        Arc::new(NodeRegistry::with_builtins().unwrap())
    }

    /// Edges rewritten through an id map, for comparing two graphs
    fn edges(graph: &Graph, map: Option<&IdMap>) -> BTreeSet<Connection> {
        graph
            .all_connections()
            .into_iter()
            .map(|c| match map {
                Some(map) => Connection::new(map[&c.output_node], &c.output_name, map[&c.input_node], &c.input_name),
                None => c,
            })
            .collect()
    }

    fn loop_graph(graph: &Graph) -> (NodeId, NodeId, NodeId) {
        let each = graph.spawn_node("ForEach").unwrap();
        let print = graph.spawn_node("DebugPrint").unwrap();
        let other = graph.spawn_node("DebugPrint").unwrap();
        graph.set_input_default(each, "Start", Some(json!([1, 2]))).unwrap();
        graph.set_position(print, [10.0, 20.0]).unwrap();
        graph.connect(each, "ListElement", print, "Object").unwrap();
        graph.connect(print, "Out", each, "Control").unwrap();
        graph.connect(other, "Out", each, "Control").unwrap();
        (each, print, other)
    }

    #[test]
    fn round_trip_preserves_nodes_edges_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        let original = Graph::new(registry());
        let (each, print, _) = loop_graph(&original);
        original.save(&path).unwrap();

        let restored = Graph::new(registry());
        restored.spawn_node("CreateInt").unwrap();
        let map = restored.load(&path, None).unwrap();
        assert_eq!(map.len(), 3);
        assert_ne!(map[&each], each, "fresh ids are allocated");

        let inverse: IdMap = map.iter().map(|(saved, live)| (*live, *saved)).collect();
        let restored_edges: BTreeSet<Connection> = restored
            .all_connections()
            .into_iter()
            .map(|c| Connection::new(inverse[&c.output_node], &c.output_name, inverse[&c.input_node], &c.input_name))
            .collect();
        assert_eq!(restored_edges, edges(&original, None));
        assert_eq!(restored.input_state(map[&each], "Control").unwrap().multi_conn, 2);
        assert_eq!(
            restored.input_state(map[&each], "Start").unwrap().default,
            Some(json!([1, 2]))
        );
        let record = restored.serialize().0.into_iter().find(|(id, _)| *id == map[&print]).unwrap().1;
        assert_eq!(record.position, [10.0, 20.0]);
    }

    #[test]
    fn unknown_classes_fail_or_report() {
        let snapshot = GraphSnapshot::from_json(
            r#"[[0, {"class": "Mystery"}], [1, {"class": "DebugPrint", "inputConnections": {"Object": "0:OOut"}}]]"#,
        )
        .unwrap();
        let graph = Graph::new(registry());
        assert!(matches!(
            graph.load_state(&snapshot, None, false),
            Err(GraphError::UnknownNodeClass(_))
        ));

        let graph = Graph::new(registry());
        let mut messages = Vec::new();
        let mut reporter = |m: &str| messages.push(m.to_string());
        let map = graph.load_state(&snapshot, Some(&mut reporter), false).unwrap();
        assert_eq!(map.len(), 1);
        assert!(graph.all_connections().is_empty());
        assert!(messages[0].contains("Mystery"));
        assert!(messages.iter().any(|m| m.contains("missing node")));
    }

    #[test]
    fn dynamic_records_synthesize_their_class() {
        let snapshot = GraphSnapshot::from_json(
            r#"[[4, {"class": "Imported", "dynamic": true,
                     "inputs": [["In", "int", null, 3]],
                     "outputs": [["Out", "alien", null, null]]}]]"#,
        )
        .unwrap();
        let reg = registry();
        let graph = Graph::new(Arc::clone(&reg));
        let map = graph.load_state(&snapshot, None, true).unwrap();
        assert_eq!(map[&4], 4);
        assert!(reg.contains("Imported"));
        assert_eq!(graph.input_state(4, "In").unwrap().default, Some(json!(3)));
    }

    #[test]
    fn subgraph_filter_limits_the_export() {
        let graph = Graph::new(registry());
        let a = graph.spawn_node("CreateInt").unwrap();
        let b = graph.spawn_node("CreateInt").unwrap();
        graph.set_subgraph(b, "helpers").unwrap();
        let snapshot = graph.snapshot(Some("helpers"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.0[0].0, b);
        assert_eq!(graph.snapshot(Some("main")).0[0].0, a);
    }

    #[test]
    fn update_state_reconciles_in_place() {
        let graph = Graph::new(registry());
        let (each, print, other) = loop_graph(&graph);
        graph.set_input_value(print, "Object", json!("kept")).unwrap();

        let editor = Graph::new(registry());
        editor.load_state(&graph.serialize(), None, true).unwrap();
        editor.delete_node(other).unwrap();
        let extra = editor.spawn_node_with_id("CreateString", 42).unwrap();
        editor.connect(extra, "String", print, "Object").unwrap();

        let map = graph.update_state(&editor.serialize()).unwrap();
        assert_eq!(map.len(), 3);
        assert!(!graph.contains(other));
        assert!(graph.contains(42));
        assert_eq!(graph.class_of(42).unwrap(), "CreateString");
        assert_eq!(edges(&graph, None), edges(&editor, None));
        assert_eq!(graph.input_state(each, "Control").unwrap().multi_conn, 1);
        assert!(graph.input_state(print, "Object").unwrap().value_set);
        assert!(graph.indices_consistent());
    }
}
