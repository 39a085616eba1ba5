/// Node instances and the check/run/notify state machine
///
/// A `Node` pairs a `NodeCore` (pins, loop level, lock and buffer flags) with a
/// boxed `NodeBehavior` holding class specific logic and state. Behaviors never
/// touch other nodes: `notify` writes `Emission`s into an `Outbox` which the
/// executor delivers along the graph's connections afterwards.

use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc};

use crate::error::{GraphError, Result};
use crate::graph::registry::NodeRegistry;
use crate::graph::types::{NodeId, PinRecord};
use crate::graph::values::{ReturnSlot, ValueStore};
use crate::node::info::{InputInfo, OutputInfo, CONTROL, TRIGGER};

/// Longest value preview shown in node reports
const PREVIEW_CHARS: usize = 10;

/// Graph services available to a node while it runs
pub struct ExecContext<'a> {
    pub node_id: NodeId,
    pub label: &'a str,
    pub values: &'a ValueStore,
    pub returns: &'a ReturnSlot,
    pub registry: &'a Arc<NodeRegistry>,
}

impl ExecContext<'_> {
    /// Offer a graph return value; wins if `priority` is at least the current one
    pub fn set_return(&self, value: Value, priority: i64) -> bool {
        self.returns.offer(value, priority, self.node_id)
    }
}

/// One value leaving a node through one output
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub output: String,
    pub value: Value,
    pub loop_level: u32,
    pub override_: bool,
}

/// Collects emissions during `notify`
#[derive(Debug, Default)]
pub struct Outbox {
    has_consumers: bool,
    emissions: Vec<Emission>,
}

impl Outbox {
    pub fn new(has_consumers: bool) -> Self {
        Self {
            has_consumers,
            emissions: Vec::new(),
        }
    }

    pub fn has_consumers(&self) -> bool {
        self.has_consumers
    }

    pub fn push(&mut self, emission: Emission) {
        self.emissions.push(emission);
    }

    pub fn emissions(&self) -> &[Emission] {
        &self.emissions
    }

    pub fn into_emissions(self) -> Vec<Emission> {
        self.emissions
    }
}

/// Class specific behavior of a node instance
pub trait NodeBehavior: Send {
    /// Called once right after the instance is built
    fn setup(&mut self, _core: &mut NodeCore) -> Result<()> {
        Ok(())
    }

    fn check(&mut self, core: &mut NodeCore) -> bool {
        core.default_check()
    }

    fn run(&mut self, core: &mut NodeCore, ctx: &ExecContext<'_>) -> Result<()>;

    fn notify(&mut self, core: &mut NodeCore, outbox: &mut Outbox) {
        core.default_notify(outbox);
    }

    fn set_input(
        &mut self,
        core: &mut NodeCore,
        name: &str,
        value: Value,
        override_: bool,
        loop_level: u32,
    ) -> Result<()> {
        core.set_input(name, value, override_, loop_level)
    }

    /// Control-flow nodes report whether they are in their fresh state
    fn fresh(&self) -> Option<bool> {
        None
    }
}

/// Behavior that does nothing when run; used for synthesized classes
pub struct PassiveBehavior;

impl NodeBehavior for PassiveBehavior {
    fn run(&mut self, _core: &mut NodeCore, _ctx: &ExecContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Class independent state of a node instance
#[derive(Debug, Clone)]
pub struct NodeCore {
    pub id: NodeId,
    pub class_name: String,
    pub position: [f64; 2],
    pub subgraph: String,
    pub loop_level: u32,
    pub locked: bool,
    pub buffered: bool,
    inputs: Vec<InputInfo>,
    outputs: Vec<OutputInfo>,
    input_index: HashMap<String, usize>,
    output_index: HashMap<String, usize>,
    output_buffer: Vec<(String, Value)>,
}

impl NodeCore {
    pub fn new(id: NodeId, class_name: &str, inputs: Vec<InputInfo>, outputs: Vec<OutputInfo>) -> Self {
        let input_index = inputs
            .iter()
            .enumerate()
            .map(|(i, pin)| (pin.name.clone(), i))
            .collect();
        let output_index = outputs
            .iter()
            .enumerate()
            .map(|(i, pin)| (pin.name.clone(), i))
            .collect();
        Self {
            id,
            class_name: class_name.to_string(),
            position: [0.0, 0.0],
            subgraph: "main".to_string(),
            loop_level: 0,
            locked: false,
            buffered: false,
            inputs,
            outputs,
            input_index,
            output_index,
            output_buffer: Vec::new(),
        }
    }

    /// `Class(id)` label used in logs and errors
    pub fn label(&self) -> String {
        format!("{}({})", self.class_name, self.id)
    }

    pub fn inputs(&self) -> &[InputInfo] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputInfo] {
        &self.outputs
    }

    pub fn inputs_mut(&mut self) -> &mut [InputInfo] {
        &mut self.inputs
    }

    pub fn has_input(&self, name: &str) -> bool {
        self.input_index.contains_key(name)
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.output_index.contains_key(name)
    }

    pub fn input(&self, name: &str) -> Result<&InputInfo> {
        self.input_index
            .get(name)
            .map(|&i| &self.inputs[i])
            .ok_or_else(|| GraphError::UnknownPin(format!("{}:I{}", self.id, name)))
    }

    pub fn input_mut(&mut self, name: &str) -> Result<&mut InputInfo> {
        match self.input_index.get(name) {
            Some(&i) => Ok(&mut self.inputs[i]),
            None => Err(GraphError::UnknownPin(format!("{}:I{}", self.id, name))),
        }
    }

    pub fn output(&self, name: &str) -> Result<&OutputInfo> {
        self.output_index
            .get(name)
            .map(|&i| &self.outputs[i])
            .ok_or_else(|| GraphError::UnknownPin(format!("{}:O{}", self.id, name)))
    }

    pub fn output_mut(&mut self, name: &str) -> Result<&mut OutputInfo> {
        match self.output_index.get(name) {
            Some(&i) => Ok(&mut self.outputs[i]),
            None => Err(GraphError::UnknownPin(format!("{}:O{}", self.id, name))),
        }
    }

    /// Read an input value through its declared type
    pub fn input_value(&mut self, name: &str) -> Result<Value> {
        self.input_mut(name)?.value()
    }

    pub fn set_output(&mut self, name: &str, value: Value) -> Result<()> {
        self.output_mut(name)?.set(value);
        Ok(())
    }

    /// Store an arriving value; the node adopts the deepest loop level it has seen
    pub fn set_input(&mut self, name: &str, value: Value, override_: bool, loop_level: u32) -> Result<()> {
        self.loop_level = self.loop_level.max(loop_level);
        self.input_mut(name)?.set(value, override_, loop_level)
    }

    /// Locked, or holding buffered outputs nobody has collected yet
    pub fn blocked(&self) -> bool {
        self.locked || (self.buffered && !self.outputs.is_empty())
    }

    /// Ready when every input is usable and at least one actually holds something.
    ///
    /// Optional inputs without an edge never block.
    pub fn default_check(&mut self) -> bool {
        if self.blocked() {
            return false;
        }
        let mut any_available = false;
        for pin in &mut self.inputs {
            let available = pin.is_available(false);
            any_available |= available;
            if !available && !(pin.optional && !pin.connected()) {
                return false;
            }
        }
        any_available
    }

    /// Push every output at the node's loop level, or buffer them when nothing
    /// consumes this node; then reset inputs the loop level allows
    pub fn default_notify(&mut self, outbox: &mut Outbox) {
        if outbox.has_consumers() {
            self.buffered = false;
            self.emit(outbox, |_| true, self.loop_level, true);
        } else {
            self.buffered = true;
            self.output_buffer = self
                .outputs
                .iter()
                .map(|out| (out.name.clone(), out.emitted()))
                .collect();
        }
        self.reset_inputs(self.loop_level, false);
    }

    /// Emit the selected outputs at `loop_level`
    pub fn emit<F>(&self, outbox: &mut Outbox, select: F, loop_level: u32, override_: bool)
    where
        F: Fn(&str) -> bool,
    {
        for out in self.outputs.iter().filter(|o| select(&o.name)) {
            outbox.push(Emission {
                output: out.name.clone(),
                value: out.emitted(),
                loop_level,
                override_,
            });
        }
    }

    /// Deliver outputs cached while nothing was connected
    pub fn replay_buffer(&mut self, outbox: &mut Outbox) {
        for (output, value) in self.output_buffer.drain(..) {
            outbox.push(Emission {
                output,
                value,
                loop_level: self.loop_level,
                override_: true,
            });
        }
        self.buffered = false;
        self.reset_inputs(self.loop_level, false);
    }

    pub fn buffered_outputs(&self) -> &[(String, Value)] {
        &self.output_buffer
    }

    pub fn reset_inputs(&mut self, loop_level: u32, force: bool) {
        for pin in &mut self.inputs {
            pin.reset(loop_level, force);
        }
    }

    pub fn reset_input(&mut self, name: &str, loop_level: u32, force: bool) {
        if let Ok(pin) = self.input_mut(name) {
            pin.reset(loop_level, force);
        }
    }

    /// Inspection-mode readiness, used by reports
    pub fn peek_ready(&self) -> bool {
        !self.locked
            && self
                .inputs
                .iter()
                .all(|pin| pin.peek_available() || (pin.optional && !pin.connected()))
    }

    pub fn input_records(&self) -> Vec<PinRecord> {
        self.inputs
            .iter()
            .map(|pin| {
                PinRecord(
                    pin.name.clone(),
                    pin.var_type.name.clone(),
                    pin.peek_value().unwrap_or(Value::Null),
                    pin.declared_default().cloned().unwrap_or(Value::Null),
                )
            })
            .collect()
    }

    pub fn output_records(&self) -> Vec<PinRecord> {
        self.outputs
            .iter()
            .map(|pin| {
                PinRecord(
                    pin.name.clone(),
                    pin.var_type.name.clone(),
                    pin.value().cloned().unwrap_or(Value::Null),
                    pin.default().cloned().unwrap_or(Value::Null),
                )
            })
            .collect()
    }

    /// Status report shown to remote controllers
    pub fn report(&self) -> Value {
        let inputs: Vec<Value> = self
            .inputs
            .iter()
            .map(|pin| json!([pin.name, pin.var_type.name, preview(pin.peek_value().as_ref())]))
            .collect();
        let outputs: Vec<Value> = self
            .outputs
            .iter()
            .map(|pin| json!([pin.name, pin.var_type.name, preview(pin.value())]))
            .collect();
        json!({
            "template": "DefaultTemplate",
            "class": self.class_name,
            "ID": self.id,
            "inputs": inputs,
            "outputs": outputs,
            "keep": Value::Null,
            "ready": if self.peek_ready() { "Ready" } else { "Waiting" },
        })
    }
}

fn preview(value: Option<&Value>) -> String {
    let text = match value {
        None => return String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    if text.chars().count() > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        text
    }
}

/// A spawned node: core state plus class behavior
pub struct Node {
    pub core: NodeCore,
    behavior: Box<dyn NodeBehavior>,
    waits_for_all_controls: bool,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("core", &self.core).finish()
    }
}

impl Node {
    pub fn new(core: NodeCore, behavior: Box<dyn NodeBehavior>, waits_for_all_controls: bool) -> Self {
        Self {
            core,
            behavior,
            waits_for_all_controls,
        }
    }

    pub fn id(&self) -> NodeId {
        self.core.id
    }

    pub fn label(&self) -> String {
        self.core.label()
    }

    pub fn setup(&mut self) -> Result<()> {
        self.behavior.setup(&mut self.core)
    }

    pub fn check(&mut self) -> bool {
        self.behavior.check(&mut self.core)
    }

    pub fn run(&mut self, ctx: &ExecContext<'_>) -> Result<()> {
        self.behavior.run(&mut self.core, ctx)
    }

    pub fn notify(&mut self, outbox: &mut Outbox) {
        self.behavior.notify(&mut self.core, outbox)
    }

    pub fn set_input(&mut self, name: &str, value: Value, override_: bool, loop_level: u32) -> Result<()> {
        self.behavior
            .set_input(&mut self.core, name, value, override_, loop_level)
    }

    pub fn fresh(&self) -> Option<bool> {
        self.behavior.fresh()
    }

    pub fn has_control_input(&self) -> bool {
        self.core.has_input(CONTROL)
    }

    pub fn waits_for_all_controls(&self) -> bool {
        self.waits_for_all_controls
    }

    pub fn report(&self) -> Value {
        let mut report = self.core.report();
        if let (Some(fresh), Some(map)) = (self.fresh(), report.as_object_mut()) {
            map.insert("fresh".to_string(), Value::Bool(fresh));
        }
        report
    }
}

/// True for inputs that gate control-node readiness when fresh
pub(crate) fn is_start_gate(pin: &InputInfo) -> bool {
    pin.name != CONTROL && (pin.name != TRIGGER || pin.connected())
}
