/// Graph owned value tables and the prioritized return slot
///
/// `ValueStore` holds the named-variable table used by set/get/append nodes,
/// externally supplied graph inputs and per-invocation dynamic sub-graph
/// inputs. All tables are mutex guarded so concurrently dispatched nodes can
/// share them.

use serde_json::{json, Value};
use std::{collections::HashMap, sync::Mutex};

use crate::graph::lock;
use crate::graph::types::NodeId;

/// Keyed value tables owned by a graph
#[derive(Debug, Default)]
pub struct ValueStore {
    stored: Mutex<HashMap<String, Value>>,
    inputs: Mutex<HashMap<String, Value>>,
    dynamic_inputs: Mutex<HashMap<String, HashMap<String, Value>>>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, name: &str, value: Value) {
        lock(&self.stored).insert(name.to_string(), value);
    }

    pub fn stored(&self, name: &str) -> Option<Value> {
        lock(&self.stored).get(name).cloned()
    }

    /// Append to a stored list, creating it when missing.
    ///
    /// Returns false if the name holds something other than a list.
    pub fn append(&self, name: &str, value: Value) -> bool {
        let mut stored = lock(&self.stored);
        let entry = stored.entry(name.to_string()).or_insert_with(|| json!([]));
        match entry.as_array_mut() {
            Some(items) => {
                items.push(value);
                true
            }
            None => false,
        }
    }

    /// Snapshot of every stored variable
    pub fn stored_values(&self) -> HashMap<String, Value> {
        lock(&self.stored).clone()
    }

    pub fn clear_stored(&self) {
        lock(&self.stored).clear();
    }

    pub fn set_input(&self, name: &str, value: Value) {
        lock(&self.inputs).insert(name.to_string(), value);
    }

    pub fn input(&self, name: &str) -> Option<Value> {
        lock(&self.inputs).get(name).cloned()
    }

    pub fn replace_inputs(&self, values: HashMap<String, Value>) {
        *lock(&self.inputs) = values;
    }

    pub fn set_dynamic_input(&self, graph_id: &str, name: &str, value: Value) {
        lock(&self.dynamic_inputs)
            .entry(graph_id.to_string())
            .or_default()
            .insert(name.to_string(), value);
    }

    pub fn dynamic_inputs(&self, graph_id: &str) -> HashMap<String, Value> {
        lock(&self.dynamic_inputs)
            .get(graph_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// Current graph return value
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnState {
    pub value: Value,
    pub priority: i64,
    pub node: Option<NodeId>,
}

impl Default for ReturnState {
    fn default() -> Self {
        Self {
            value: Value::from(-1),
            priority: -1,
            node: None,
        }
    }
}

/// Prioritized return value; higher priority wins, ties go to the last write
#[derive(Debug, Default)]
pub struct ReturnSlot {
    state: Mutex<ReturnState>,
}

impl ReturnSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&self, value: Value, priority: i64, node: NodeId) -> bool {
        let mut state = lock(&self.state);
        if priority < state.priority {
            return false;
        }
        *state = ReturnState {
            value,
            priority,
            node: Some(node),
        };
        true
    }

    pub fn get(&self) -> ReturnState {
        lock(&self.state).clone()
    }

    pub fn has_returned(&self) -> bool {
        lock(&self.state).node.is_some()
    }

    pub fn clear(&self) {
        *lock(&self.state) = ReturnState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_wins_and_ties_take_the_last_write() {
        let slot = ReturnSlot::new();
        assert!(slot.offer(json!("a"), 1, 1));
        assert!(!slot.offer(json!("b"), 0, 2));
        assert_eq!(slot.get().value, json!("a"));
        assert!(slot.offer(json!("c"), 1, 3));
        assert_eq!(slot.get().node, Some(3));
        assert!(slot.offer(json!("d"), 5, 4));
        assert_eq!(slot.get().priority, 5);
        slot.clear();
        assert!(!slot.has_returned());
    }

    #[test]
    fn append_builds_lists() {
        let store = ValueStore::new();
        assert!(store.append("xs", json!(1)));
        assert!(store.append("xs", json!(2)));
        assert_eq!(store.stored("xs"), Some(json!([1, 2])));
        store.store("n", json!(5));
        assert!(!store.append("n", json!(6)));
        store.clear_stored();
        assert!(store.stored("xs").is_none());
    }

    #[test]
    fn dynamic_inputs_are_scoped_by_invocation() {
        let store = ValueStore::new();
        store.set_dynamic_input("run-a", "x", json!(1));
        store.set_dynamic_input("run-b", "x", json!(2));
        assert_eq!(store.dynamic_inputs("run-a")["x"], json!(1));
        assert!(store.dynamic_inputs("run-c").is_empty());
    }
}
