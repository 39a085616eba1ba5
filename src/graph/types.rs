/// Graph level type definitions
///
/// Node ids, pin ids, connection records and the persisted snapshot format.
/// A snapshot is an ordered list of `[nodeID, nodeRecord]` pairs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::error::GraphError;

/// Process-unique node identifier
pub type NodeId = u64;

/// Default subgraph label
pub const MAIN_SUBGRAPH: &str = "main";

/// Which side of a node a pin sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinKind {
    Input,
    Output,
}

/// Pin identifier in its textual form `"<id>:I<name>"` / `"<id>:O<name>"`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PinId {
    pub node: NodeId,
    pub kind: PinKind,
    pub name: String,
}

impl PinId {
    pub fn input(node: NodeId, name: &str) -> Self {
        Self {
            node,
            kind: PinKind::Input,
            name: name.to_string(),
        }
    }

    pub fn output(node: NodeId, name: &str) -> Self {
        Self {
            node,
            kind: PinKind::Output,
            name: name.to_string(),
        }
    }
}

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = match self.kind {
            PinKind::Input => 'I',
            PinKind::Output => 'O',
        };
        write!(f, "{}:{}{}", self.node, marker, self.name)
    }
}

impl FromStr for PinId {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || GraphError::InvalidPinId(s.to_string());
        let (node, rest) = s.split_once(':').ok_or_else(invalid)?;
        let node = node.trim().parse::<NodeId>().map_err(|_| invalid())?;
        let mut chars = rest.chars();
        let kind = match chars.next() {
            Some('I') => PinKind::Input,
            Some('O') => PinKind::Output,
            _ => return Err(invalid()),
        };
        let name = chars.as_str();
        if name.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            node,
            kind,
            name: name.to_string(),
        })
    }
}

/// Directed edge from an output pin to an input pin; identity is the 4-tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Connection {
    pub output_node: NodeId,
    pub output_name: String,
    pub input_node: NodeId,
    pub input_name: String,
}

impl Connection {
    pub fn new(output_node: NodeId, output_name: &str, input_node: NodeId, input_name: &str) -> Self {
        Self {
            output_node,
            output_name: output_name.to_string(),
            input_node,
            input_name: input_name.to_string(),
        }
    }

    pub fn output_pin(&self) -> PinId {
        PinId::output(self.output_node, &self.output_name)
    }

    pub fn input_pin(&self) -> PinId {
        PinId::input(self.input_node, &self.input_name)
    }

    /// True if either endpoint is `pin`
    pub fn touches(&self, pin: &PinId) -> bool {
        match pin.kind {
            PinKind::Output => self.output_node == pin.node && self.output_name == pin.name,
            PinKind::Input => self.input_node == pin.node && self.input_name == pin.name,
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.output_pin(), self.input_pin())
    }
}

/// `[name, declaredTypeName, currentValueOrNull, defaultValue]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PinRecord(pub String, pub String, pub Value, pub Value);

impl PinRecord {
    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn type_name(&self) -> &str {
        &self.1
    }

    pub fn value(&self) -> &Value {
        &self.2
    }

    pub fn default(&self) -> &Value {
        &self.3
    }
}

fn main_subgraph() -> String {
    MAIN_SUBGRAPH.to_string()
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Persisted state of one node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub class: String,
    #[serde(default)]
    pub position: [f64; 2],
    #[serde(default)]
    pub inputs: Vec<PinRecord>,
    #[serde(default)]
    pub input_connections: BTreeMap<String, String>,
    #[serde(default)]
    pub outputs: Vec<PinRecord>,
    #[serde(default)]
    pub output_connections: BTreeMap<String, Vec<String>>,
    #[serde(default = "main_subgraph")]
    pub subgraph: String,
    /// Unknown classes are synthesized from the pin lists instead of failing
    #[serde(default, skip_serializing_if = "is_false")]
    pub dynamic: bool,
}

/// Ordered `(id, record)` sequence
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct GraphSnapshot(pub Vec<(NodeId, NodeRecord)>);

/// Accepts the ordered pair list and the older id-keyed map form
#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotRepr {
    Pairs(Vec<(NodeId, NodeRecord)>),
    Keyed(BTreeMap<String, NodeRecord>),
}

impl<'de> Deserialize<'de> for GraphSnapshot {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        match SnapshotRepr::deserialize(deserializer)? {
            SnapshotRepr::Pairs(pairs) => Ok(GraphSnapshot(pairs)),
            SnapshotRepr::Keyed(map) => {
                let mut pairs = Vec::with_capacity(map.len());
                for (key, record) in map {
                    let id = key.parse::<NodeId>().map_err(serde::de::Error::custom)?;
                    pairs.push((id, record));
                }
                pairs.sort_by_key(|(id, _)| *id);
                Ok(GraphSnapshot(pairs))
            }
        }
    }
}

impl GraphSnapshot {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(NodeId, NodeRecord)> {
        self.0.iter()
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
