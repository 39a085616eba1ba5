/// The dataflow graph
///
/// `Graph` is a cheap-to-clone handle over shared state: the node table, the
/// forward (by source) and reverse (by destination) connection indices, the
/// id allocator, value tables and return slot. Lock order is always topology
/// first, then a single node; node locks are never held while taking the
/// topology lock.

use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};
use uuid::Uuid;

use crate::error::{GraphError, Result};
use crate::graph::registry::NodeRegistry;
use crate::graph::types::{Connection, NodeId, PinId, PinKind};
use crate::graph::values::{ReturnSlot, ReturnState, ValueStore};
use crate::graph::{lock, read, write};
use crate::node::info::{InputState, CONTROL};
use crate::node::instance::Node;

/// A spawned node plus its exclusive execution token
pub struct NodeHandle {
    pub id: NodeId,
    /// Held for the whole run+notify span of a concurrent dispatch
    pub(crate) run_token: Arc<tokio::sync::Mutex<()>>,
    /// Guards pins and behavior state
    node: Mutex<Node>,
}

impl NodeHandle {
    fn new(node: Node) -> Self {
        Self {
            id: node.id(),
            run_token: Arc::new(tokio::sync::Mutex::new(())),
            node: Mutex::new(node),
        }
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, Node> {
        lock(&self.node)
    }
}

#[derive(Default)]
struct Topology {
    forward: HashMap<NodeId, BTreeSet<Connection>>,
    reverse: HashMap<NodeId, BTreeSet<Connection>>,
}

impl Topology {
    fn insert(&mut self, conn: Connection) {
        self.forward
            .entry(conn.output_node)
            .or_default()
            .insert(conn.clone());
        self.reverse.entry(conn.input_node).or_default().insert(conn);
    }

    fn remove(&mut self, conn: &Connection) -> bool {
        let forward = self
            .forward
            .get_mut(&conn.output_node)
            .map(|set| set.remove(conn))
            .unwrap_or(false);
        let reverse = self
            .reverse
            .get_mut(&conn.input_node)
            .map(|set| set.remove(conn))
            .unwrap_or(false);
        forward || reverse
    }

    fn fan_in(&self, node: NodeId, input: &str) -> usize {
        self.reverse
            .get(&node)
            .map(|set| set.iter().filter(|c| c.input_name == input).count())
            .unwrap_or(0)
    }
}

struct GraphInner {
    instance: Uuid,
    registry: Arc<NodeRegistry>,
    nodes: std::sync::RwLock<BTreeMap<NodeId, Arc<NodeHandle>>>,
    topology: std::sync::RwLock<Topology>,
    next_id: AtomicU64,
    values: ValueStore,
    returns: ReturnSlot,
    running: Mutex<BTreeSet<NodeId>>,
    executed: Mutex<Vec<NodeId>>,
}

/// Shared handle to a dataflow graph
#[derive(Clone)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("instance", &self.inner.instance)
            .field("nodes", &self.node_ids())
            .finish()
    }
}

impl Graph {
    /// Create an empty graph resolving classes through `registry`
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            inner: Arc::new(GraphInner {
                instance: Uuid::new_v4(),
                registry,
                nodes: std::sync::RwLock::new(BTreeMap::new()),
                topology: std::sync::RwLock::new(Topology::default()),
                next_id: AtomicU64::new(0),
                values: ValueStore::new(),
                returns: ReturnSlot::new(),
                running: Mutex::new(BTreeSet::new()),
                executed: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Unique id of this graph instance, used to tell nested graphs apart in logs
    pub fn instance_id(&self) -> Uuid {
        self.inner.instance
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.inner.registry
    }

    pub fn values(&self) -> &ValueStore {
        &self.inner.values
    }

    pub fn returns(&self) -> &ReturnSlot {
        &self.inner.returns
    }

    // ----- node table -------------------------------------------------------

    /// Spawn a node under the next free id
    pub fn spawn_node(&self, class_name: &str) -> Result<NodeId> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.insert_node(class_name, id)
    }

    /// Spawn a node under a caller chosen id
    pub fn spawn_node_with_id(&self, class_name: &str, id: NodeId) -> Result<NodeId> {
        if read(&self.inner.nodes).contains_key(&id) {
            return Err(GraphError::DuplicateNode(id));
        }
        self.inner.next_id.fetch_max(id + 1, Ordering::SeqCst);
        self.insert_node(class_name, id)
    }

    fn insert_node(&self, class_name: &str, id: NodeId) -> Result<NodeId> {
        let node = self.inner.registry.spawn(class_name, id)?;
        {
            let mut topology = write(&self.inner.topology);
            topology.forward.entry(id).or_default();
            topology.reverse.entry(id).or_default();
        }
        write(&self.inner.nodes).insert(id, Arc::new(NodeHandle::new(node)));
        tracing::debug!("➕ Spawned {}({})", class_name, id);
        Ok(id)
    }

    /// Remove every connection touching the node, then the node itself
    pub fn delete_node(&self, id: NodeId) -> Result<()> {
        self.handle(id)?;
        let touching: Vec<Connection> = {
            let topology = read(&self.inner.topology);
            topology
                .forward
                .get(&id)
                .into_iter()
                .chain(topology.reverse.get(&id))
                .flat_map(|set| set.iter().cloned())
                .collect()
        };
        for conn in &touching {
            self.disconnect(conn);
        }
        {
            let mut topology = write(&self.inner.topology);
            topology.forward.remove(&id);
            topology.reverse.remove(&id);
        }
        write(&self.inner.nodes).remove(&id);
        tracing::debug!("🗑️ Deleted node {}", id);
        Ok(())
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        read(&self.inner.nodes).keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        read(&self.inner.nodes).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.inner.nodes).is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        read(&self.inner.nodes).contains_key(&id)
    }

    pub(crate) fn handle(&self, id: NodeId) -> Result<Arc<NodeHandle>> {
        read(&self.inner.nodes)
            .get(&id)
            .cloned()
            .ok_or(GraphError::UnknownNode(id))
    }

    /// Run `f` with the node locked
    pub fn with_node<R>(&self, id: NodeId, f: impl FnOnce(&mut Node) -> R) -> Result<R> {
        let handle = self.handle(id)?;
        let mut node = handle.lock();
        Ok(f(&mut node))
    }

    pub fn class_of(&self, id: NodeId) -> Result<String> {
        self.with_node(id, |n| n.core.class_name.clone())
    }

    pub fn loop_level(&self, id: NodeId) -> Result<u32> {
        self.with_node(id, |n| n.core.loop_level)
    }

    pub fn set_position(&self, id: NodeId, position: [f64; 2]) -> Result<()> {
        self.with_node(id, |n| n.core.position = position)
    }

    pub fn set_subgraph(&self, id: NodeId, subgraph: &str) -> Result<()> {
        self.with_node(id, |n| n.core.subgraph = subgraph.to_string())
    }

    /// Control-flow nodes only; `None` for everything else
    pub fn is_fresh(&self, id: NodeId) -> Result<Option<bool>> {
        self.with_node(id, |n| n.fresh())
    }

    pub fn report(&self, id: NodeId) -> Result<Value> {
        self.with_node(id, |n| n.report())
    }

    pub fn set_input_default(&self, id: NodeId, input: &str, default: Option<Value>) -> Result<()> {
        self.with_node(id, |n| {
            n.core.input_mut(input).map(|pin| pin.set_default(default))
        })?
    }

    pub fn set_output_default(&self, id: NodeId, output: &str, default: Option<Value>) -> Result<()> {
        self.with_node(id, |n| {
            n.core.output_mut(output).map(|pin| pin.set_default(default))
        })?
    }

    /// Set an input directly, as a producer at loop level 0 would
    pub fn set_input_value(&self, id: NodeId, input: &str, value: Value) -> Result<()> {
        self.with_node(id, |n| n.set_input(input, value, true, 0))?
    }

    pub fn input_state(&self, id: NodeId, input: &str) -> Result<InputState> {
        self.with_node(id, |n| n.core.input(input).map(|pin| pin.state()))?
    }

    pub fn output_value(&self, id: NodeId, output: &str) -> Result<Option<Value>> {
        self.with_node(id, |n| n.core.output(output).map(|pin| pin.value().cloned()))?
    }

    /// Locked nodes never pass `check`
    pub fn lock_node(&self, id: NodeId) -> Result<()> {
        self.with_node(id, |n| n.core.locked = true)
    }

    pub fn unlock_node(&self, id: NodeId) -> Result<()> {
        self.with_node(id, |n| n.core.locked = false)
    }

    // ----- connections ------------------------------------------------------

    /// Connect an output to an input.
    ///
    /// A non-`Control` input keeps at most one producer, so an existing edge is
    /// replaced. `Control` inputs accept any number of edges.
    pub fn connect(&self, out_node: NodeId, output: &str, in_node: NodeId, input: &str) -> Result<Connection> {
        let out_type = self.with_node(out_node, |n| {
            n.core.output(output).map(|pin| pin.var_type.name.clone())
        })??;
        let (in_type, waits_for_all) = self.with_node(in_node, |n| {
            n.core
                .input(input)
                .map(|pin| (pin.var_type.name.clone(), n.waits_for_all_controls()))
        })??;

        if !self.inner.registry.types().compatible(&out_type, &in_type) {
            return Err(GraphError::TypeMismatch {
                output: PinId::output(out_node, output).to_string(),
                output_type: out_type,
                input: PinId::input(in_node, input).to_string(),
                input_type: in_type,
            });
        }

        let conn = Connection::new(out_node, output, in_node, input);
        let is_control = input == CONTROL;
        let mut topology = write(&self.inner.topology);
        if !is_control {
            let replaced: Vec<Connection> = topology
                .reverse
                .get(&in_node)
                .map(|set| set.iter().filter(|c| c.input_name == input).cloned().collect())
                .unwrap_or_default();
            for old in &replaced {
                topology.remove(old);
                tracing::debug!("✂️ Replaced connection {}", old);
            }
        }
        topology.insert(conn.clone());
        let fan_in = topology.fan_in(in_node, input);

        let handle = self.handle(in_node)?;
        let mut node = handle.lock();
        let pin = node.core.input_mut(input)?;
        pin.set_connected(true);
        if is_control && waits_for_all {
            pin.set_multi_conn(fan_in);
        }
        tracing::debug!("🔗 Connected {}", conn);
        Ok(conn)
    }

    /// Remove one edge from both indices; returns false if it did not exist
    pub fn disconnect(&self, conn: &Connection) -> bool {
        let mut topology = write(&self.inner.topology);
        if !topology.remove(conn) {
            return false;
        }
        let remaining = topology.fan_in(conn.input_node, &conn.input_name);
        if let Ok(handle) = self.handle(conn.input_node) {
            let mut node = handle.lock();
            let waits_for_all = node.waits_for_all_controls();
            if let Ok(pin) = node.core.input_mut(&conn.input_name) {
                if remaining == 0 {
                    pin.set_connected(false);
                }
                if pin.is_control() && waits_for_all {
                    pin.set_multi_conn(remaining);
                }
            }
        }
        tracing::debug!("✂️ Disconnected {}", conn);
        true
    }

    /// Remove every edge on a pin given as `"<id>:I<name>"` or `"<id>:O<name>"`
    pub fn remove_connection(&self, pin_id: &str) -> Result<usize> {
        let pin: PinId = pin_id.parse()?;
        let touching: Vec<Connection> = {
            let topology = read(&self.inner.topology);
            let index = match pin.kind {
                PinKind::Output => &topology.forward,
                PinKind::Input => &topology.reverse,
            };
            index
                .get(&pin.node)
                .map(|set| set.iter().filter(|c| c.touches(&pin)).cloned().collect())
                .unwrap_or_default()
        };
        Ok(touching.iter().filter(|conn| self.disconnect(conn)).count())
    }

    /// Drop every edge while keeping the nodes
    pub fn clear_connections(&self) {
        for conn in self.all_connections() {
            self.disconnect(&conn);
        }
    }

    pub fn connections_from(&self, id: NodeId) -> Vec<Connection> {
        read(&self.inner.topology)
            .forward
            .get(&id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn connections_to(&self, id: NodeId) -> Vec<Connection> {
        read(&self.inner.topology)
            .reverse
            .get(&id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn connection_of_input(&self, id: NodeId, input: &str) -> Option<Connection> {
        self.connections_to(id)
            .into_iter()
            .find(|c| c.input_name == input)
    }

    pub fn connections_of_control_input(&self, id: NodeId) -> Vec<Connection> {
        self.connections_to(id)
            .into_iter()
            .filter(|c| c.input_name == CONTROL)
            .collect()
    }

    pub fn connections_of_output(&self, id: NodeId, output: &str) -> Vec<Connection> {
        self.connections_from(id)
            .into_iter()
            .filter(|c| c.output_name == output)
            .collect()
    }

    /// Every edge, ordered by source node
    pub fn all_connections(&self) -> Vec<Connection> {
        let topology = read(&self.inner.topology);
        let mut all: Vec<Connection> = topology
            .forward
            .values()
            .flat_map(|set| set.iter().cloned())
            .collect();
        all.sort();
        all
    }

    pub fn has_consumers(&self, id: NodeId) -> bool {
        read(&self.inner.topology)
            .forward
            .get(&id)
            .map(|set| !set.is_empty())
            .unwrap_or(false)
    }

    /// True when both indices describe exactly the same edge set
    pub fn indices_consistent(&self) -> bool {
        let topology = read(&self.inner.topology);
        let forward: BTreeSet<&Connection> = topology.forward.values().flatten().collect();
        let reverse: BTreeSet<&Connection> = topology.reverse.values().flatten().collect();
        forward == reverse
    }

    // ----- return slot and run bookkeeping ---------------------------------

    /// Offer a return value on behalf of `node`
    pub fn set_return(&self, value: Value, priority: i64, node: NodeId) -> bool {
        self.inner.returns.offer(value, priority, node)
    }

    pub fn return_state(&self) -> ReturnState {
        self.inner.returns.get()
    }

    pub fn running_nodes(&self) -> Vec<NodeId> {
        lock(&self.inner.running).iter().copied().collect()
    }

    pub(crate) fn mark_running(&self, id: NodeId) {
        lock(&self.inner.running).insert(id);
    }

    pub(crate) fn mark_finished(&self, id: NodeId) {
        lock(&self.inner.running).remove(&id);
        lock(&self.inner.executed).push(id);
    }

    /// Ids of nodes that completed since the last drain, in completion order
    pub fn drain_executed(&self) -> Vec<NodeId> {
        std::mem::take(&mut *lock(&self.inner.executed))
    }
}
