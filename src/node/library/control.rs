/// Control-flow nodes
///
/// `Switch` and `ForEach` extend the abstract `ControlNode` declaration
/// (`Start`, `Control` -> `Final`). A fresh control node waits for its start
/// inputs; once it has dispatched a branch or iteration it waits on `Control`
/// instead. `WaitAll`, `WaitAny` and `Break` carry an optional `Control` input
/// and a `Final` output mirroring their relayed value.

use serde_json::{json, Value};

use crate::error::Result;
use crate::graph::registry::NodeRegistry;
use crate::node::class::NodeClass;
use crate::node::info::{InputDecl, OutputDecl, CONTROL, TRIGGER};
use crate::node::instance::{is_start_gate, ExecContext, NodeBehavior, NodeCore, Outbox};
use crate::types::OBJECT;

use super::failed;

/// Reserved output of control nodes
pub const FINAL: &str = "Final";

pub(crate) fn register(registry: &NodeRegistry) -> Result<()> {
    let base = registry.register(
        NodeClass::builder("ControlNode")
            .input(InputDecl::new("Start", OBJECT))
            .input(InputDecl::new(CONTROL, OBJECT))
            .output(OutputDecl::new(FINAL, OBJECT))
            .tag("control")
            .abstract_class()
            .build()?,
    )?;

    registry.register(
        NodeClass::builder("Switch")
            .extends(&base)
            .input(InputDecl::new("Switch", "bool").select(vec![json!(true), json!(false)]))
            .output(OutputDecl::new("True", OBJECT))
            .output(OutputDecl::new("False", OBJECT))
            .tag("if")
            .tag("else")
            .behavior(|| Box::new(Switch::default()))
            .build()?,
    )?;

    registry.register(
        NodeClass::builder("ForEach")
            .extends(&base)
            .input(InputDecl::new("Start", OBJECT).list())
            .output(OutputDecl::new("ListElement", OBJECT))
            .tag("loop")
            .waits_for_all_controls()
            .behavior(|| Box::new(ForEach::default()))
            .build()?,
    )?;

    registry.register(
        NodeClass::builder("WaitAll")
            .input(InputDecl::new("Pass", OBJECT))
            .input(InputDecl::new("Wait", OBJECT))
            .input(InputDecl::new(CONTROL, OBJECT).optional())
            .output(OutputDecl::new("Out", OBJECT))
            .output(OutputDecl::new(FINAL, OBJECT))
            .tag("control")
            .waits_for_all_controls()
            .behavior(|| Box::new(WaitAll))
            .build()?,
    )?;

    registry.register(
        NodeClass::builder("WaitAny")
            .input(InputDecl::new("Wait1", OBJECT))
            .input(InputDecl::new("Wait2", OBJECT))
            .input(InputDecl::new(CONTROL, OBJECT).optional())
            .output(OutputDecl::new("Out", OBJECT))
            .output(OutputDecl::new(FINAL, OBJECT))
            .tag("control")
            .behavior(|| Box::new(WaitAny::default()))
            .build()?,
    )?;

    registry.register(
        NodeClass::builder("Break")
            .input(InputDecl::new("Input", OBJECT))
            .input(InputDecl::new(CONTROL, OBJECT).optional())
            .output(OutputDecl::new("Output", OBJECT))
            .output(OutputDecl::new(FINAL, OBJECT))
            .tag("control")
            .tag("loop")
            .behavior(|| Box::new(Break))
            .build()?,
    )?;

    Ok(())
}

/// Every start input (everything but `Control`, plus `TRIGGER` when wired) is available
fn start_ready(core: &mut NodeCore) -> bool {
    if core.blocked() {
        return false;
    }
    core.inputs_mut()
        .iter_mut()
        .filter(|pin| is_start_gate(pin))
        .all(|pin| pin.is_available(false))
}

fn control_ready(core: &mut NodeCore) -> bool {
    if core.blocked() {
        return false;
    }
    core.input_mut(CONTROL)
        .map(|pin| pin.is_available(false))
        .unwrap_or(false)
}

/// If/else with re-convergence on `Control`
pub struct Switch {
    fresh: bool,
    branch: bool,
}

impl Default for Switch {
    fn default() -> Self {
        Self {
            fresh: true,
            branch: false,
        }
    }
}

impl NodeBehavior for Switch {
    fn check(&mut self, core: &mut NodeCore) -> bool {
        if self.fresh {
            start_ready(core)
        } else {
            control_ready(core)
        }
    }

    fn run(&mut self, core: &mut NodeCore, _ctx: &ExecContext<'_>) -> Result<()> {
        if self.fresh {
            self.branch = core.input_value("Switch")?.as_bool().unwrap_or(false);
            let start = core.input_value("Start")?;
            let output = if self.branch { "True" } else { "False" };
            core.set_output(output, start)?;
        } else {
            let value = core.input_value(CONTROL)?;
            core.set_output(FINAL, value)?;
        }
        Ok(())
    }

    fn notify(&mut self, core: &mut NodeCore, outbox: &mut Outbox) {
        let level = core.loop_level;
        if self.fresh {
            let output = if self.branch { "True" } else { "False" };
            core.emit(outbox, |name| name == output, level, true);
            self.fresh = false;
            core.reset_input("Start", level, false);
            core.reset_input("Switch", level, false);
        } else {
            core.emit(outbox, |name| name == FINAL, level, true);
            self.fresh = true;
        }
        core.reset_input(CONTROL, 0, false);
        core.reset_inputs(level, false);
    }

    fn fresh(&self) -> Option<bool> {
        Some(self.fresh)
    }
}

/// Iterates a list, one element per `Control` round trip.
///
/// Only one iteration sequence is in flight per instance.
pub struct ForEach {
    fresh: bool,
    counter: usize,
    done: bool,
}

impl Default for ForEach {
    fn default() -> Self {
        Self {
            fresh: true,
            counter: 0,
            done: false,
        }
    }
}

impl NodeBehavior for ForEach {
    fn check(&mut self, core: &mut NodeCore) -> bool {
        if self.fresh {
            start_ready(core)
        } else {
            control_ready(core)
        }
    }

    fn run(&mut self, core: &mut NodeCore, _ctx: &ExecContext<'_>) -> Result<()> {
        self.fresh = false;
        let items = match core.input_value("Start")? {
            Value::Array(items) => items,
            other => return Err(failed(core, format!("Start is not a list: {}", other))),
        };
        match items.get(self.counter) {
            Some(item) => core.set_output("ListElement", item.clone())?,
            None => {
                core.set_output(FINAL, Value::Array(items))?;
                self.done = true;
            }
        }
        self.counter += 1;
        Ok(())
    }

    fn notify(&mut self, core: &mut NodeCore, outbox: &mut Outbox) {
        let level = core.loop_level;
        if !self.done {
            core.emit(outbox, |name| name != FINAL, level + 1, true);
            core.reset_input(CONTROL, 0, true);
        } else {
            core.emit(outbox, |name| name == FINAL, level, true);
            core.reset_inputs(0, false);
            self.counter = 0;
            self.done = false;
            self.fresh = true;
        }
    }

    /// Convergence signals belong to this node's own level, not the body's
    fn set_input(&mut self, core: &mut NodeCore, name: &str, value: Value, override_: bool, loop_level: u32) -> Result<()> {
        let level = if name == CONTROL { core.loop_level } else { loop_level };
        core.set_input(name, value, override_, level)
    }

    fn fresh(&self) -> Option<bool> {
        Some(self.fresh)
    }
}

/// Passes `Pass` on once every input has arrived
pub struct WaitAll;

impl NodeBehavior for WaitAll {
    fn run(&mut self, core: &mut NodeCore, _ctx: &ExecContext<'_>) -> Result<()> {
        let value = core.input_value("Pass")?;
        core.set_output("Out", value.clone())?;
        core.set_output(FINAL, value)
    }
}

/// Relays whichever input arrives first, in declaration order
#[derive(Default)]
pub struct WaitAny {
    selected: Option<String>,
}

impl NodeBehavior for WaitAny {
    fn check(&mut self, core: &mut NodeCore) -> bool {
        if core.blocked() {
            return false;
        }
        self.selected = core
            .inputs()
            .iter()
            .filter(|pin| pin.name != TRIGGER)
            .find(|pin| pin.value_set() && pin.peek_available())
            .map(|pin| pin.name.clone());
        self.selected.is_some()
    }

    fn run(&mut self, core: &mut NodeCore, _ctx: &ExecContext<'_>) -> Result<()> {
        let Some(name) = self.selected.clone() else {
            return Err(failed(core, "no input has arrived"));
        };
        let value = core.input_value(&name)?;
        core.set_output("Out", value.clone())?;
        core.set_output(FINAL, value)
    }
}

/// Relays its input one loop level up
pub struct Break;

impl NodeBehavior for Break {
    fn run(&mut self, core: &mut NodeCore, _ctx: &ExecContext<'_>) -> Result<()> {
        let value = core.input_value("Input")?;
        core.set_output("Output", value.clone())?;
        core.set_output(FINAL, value)
    }

    fn notify(&mut self, core: &mut NodeCore, outbox: &mut Outbox) {
        let level = core.loop_level;
        core.emit(outbox, |_| true, level.saturating_sub(1), true);
        core.reset_inputs(level, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::values::{ReturnSlot, ValueStore};
    use crate::node::instance::{Emission, Node};
    use std::sync::Arc;

    struct Harness {
        registry: Arc<NodeRegistry>,
        values: ValueStore,
        returns: ReturnSlot,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                registry: Arc::new(NodeRegistry::with_builtins().unwrap()),
                values: ValueStore::new(),
                returns: ReturnSlot::new(),
            }
        }

        fn spawn(&self, class: &str) -> Node {
            self.registry.spawn(class, 1).unwrap()
        }

        /// check, run and notify once; `None` if the node was not ready
        fn fire(&self, node: &mut Node) -> Option<Vec<Emission>> {
            if !node.check() {
                return None;
            }
            let label = node.label();
            let ctx = ExecContext {
                node_id: node.id(),
                label: &label,
                values: &self.values,
                returns: &self.returns,
                registry: &self.registry,
            };
            node.run(&ctx).unwrap();
            let mut outbox = Outbox::new(true);
            node.notify(&mut outbox);
            Some(outbox.into_emissions())
        }
    }

    #[test]
    fn switch_routes_start_then_converges() {
        let h = Harness::new();
        let mut switch = h.spawn("Switch");
        switch.set_input("Switch", json!(true), false, 0).unwrap();
        switch.set_input("Start", json!("x"), false, 0).unwrap();

        let sent = h.fire(&mut switch).unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].output, "True");
        assert_eq!(sent[0].value, json!("x"));
        assert_eq!(switch.fresh(), Some(false));
        assert!(h.fire(&mut switch).is_none(), "waits for the branch to converge");

        switch.set_input(CONTROL, json!("done"), true, 0).unwrap();
        let sent = h.fire(&mut switch).unwrap();
        assert_eq!(sent[0].output, FINAL);
        assert_eq!(sent[0].value, json!("done"));
        assert_eq!(switch.fresh(), Some(true));
        assert!(h.fire(&mut switch).is_none());

        switch.set_input("Switch", json!(false), false, 0).unwrap();
        switch.set_input("Start", json!("y"), false, 0).unwrap();
        let sent = h.fire(&mut switch).unwrap();
        assert_eq!(sent[0].output, "False");
    }

    #[test]
    fn for_each_walks_the_list_then_finalizes() {
        let h = Harness::new();
        let mut each = h.spawn("ForEach");
        each.core.input_mut(CONTROL).unwrap().set_multi_conn(1);
        each.set_input("Start", json!([10, 20]), false, 0).unwrap();

        let mut elements = Vec::new();
        loop {
            let sent = h.fire(&mut each).expect("ready");
            if sent[0].output == FINAL {
                assert_eq!(sent[0].value, json!([10, 20]));
                assert_eq!(sent[0].loop_level, 0);
                break;
            }
            assert_eq!(sent[0].output, "ListElement");
            assert_eq!(sent[0].loop_level, 1);
            elements.push(sent[0].value.clone());
            assert!(h.fire(&mut each).is_none());
            each.set_input(CONTROL, json!("body"), true, 1).unwrap();
            assert_eq!(each.core.loop_level, 0, "control signals keep the outer level");
        }
        assert_eq!(elements, vec![json!(10), json!(20)]);
        assert_eq!(each.fresh(), Some(true));
        assert!(h.fire(&mut each).is_none());
    }

    #[test]
    fn wait_any_takes_the_first_arrival() {
        let h = Harness::new();
        let mut any = h.spawn("WaitAny");
        assert!(h.fire(&mut any).is_none());
        any.set_input("Wait2", json!(2), false, 0).unwrap();
        let sent = h.fire(&mut any).unwrap();
        assert!(sent.iter().any(|e| e.output == "Out" && e.value == json!(2)));
    }

    #[test]
    fn wait_all_needs_both_inputs() {
        let h = Harness::new();
        let mut all = h.spawn("WaitAll");
        all.set_input("Pass", json!("p"), false, 0).unwrap();
        assert!(h.fire(&mut all).is_none());
        all.set_input("Wait", json!("w"), false, 0).unwrap();
        let sent = h.fire(&mut all).unwrap();
        assert!(sent.iter().any(|e| e.output == "Out" && e.value == json!("p")));
        assert!(!all.core.input("Pass").unwrap().value_set());
    }

    #[test]
    fn break_pops_one_level() {
        let h = Harness::new();
        let mut brk = h.spawn("Break");
        brk.set_input("Input", json!(5), false, 2).unwrap();
        let sent = h.fire(&mut brk).unwrap();
        assert!(sent.iter().all(|e| e.loop_level == 1));
        assert!(h.fire(&mut brk).is_none(), "fires once per value");
    }
}
