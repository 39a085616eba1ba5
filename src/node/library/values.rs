/// Nodes backed by the graph's value tables
///
/// Named variables (`SetValue`, `GetValue`, `CreateList`, `AppendValue`,
/// `ShowValues`, `MakeTable`), graph inputs supplied before execution (`InputNode`) and
/// dynamically loaded sub-graphs fed through `SetDynamicInput`.

use serde_json::{json, Value};
use std::{collections::BTreeMap, sync::Arc};

use crate::error::Result;
use crate::graph::dataflow::Graph;
use crate::graph::registry::NodeRegistry;
use crate::node::class::NodeClass;
use crate::node::info::{InputDecl, OutputDecl, TRIGGER};
use crate::node::instance::{ExecContext, NodeBehavior, NodeCore};
use crate::runtime::engine::ExecutionEngine;
use crate::types::OBJECT;

use super::{failed, simple, text};

pub(crate) fn register(registry: &NodeRegistry) -> Result<()> {
    registry.register(simple(
        "SetValue",
        &["values"],
        vec![InputDecl::new("Name", "str"), InputDecl::new("Value", OBJECT)],
        vec![OutputDecl::new("Trigger", OBJECT)],
        set_value,
    )?)?;
    registry.register(simple(
        "GetValue",
        &["values"],
        vec![InputDecl::new("Name", "str")],
        vec![OutputDecl::new("Value", OBJECT)],
        get_value,
    )?)?;
    registry.register(simple(
        "CreateList",
        &["values"],
        vec![InputDecl::new("Name", "str")],
        vec![OutputDecl::new("List", OBJECT).list()],
        create_list,
    )?)?;
    registry.register(simple(
        "AppendValue",
        &["values"],
        vec![InputDecl::new("Name", "str"), InputDecl::new("Value", OBJECT)],
        vec![OutputDecl::new("List", OBJECT).list()],
        append_value,
    )?)?;
    registry.register(
        NodeClass::builder("ShowValues")
            .output(OutputDecl::new("Values", OBJECT))
            .tag("values")
            .tag("debug")
            .behavior(|| Box::new(ShowValues::default()))
            .build()?,
    )?;
    registry.register(simple(
        "MakeTable",
        &["values"],
        vec![InputDecl::new("Keys", "str").list()],
        vec![OutputDecl::new("Table", "str")],
        make_table,
    )?)?;
    registry.register(simple(
        "InputNode",
        &["graph"],
        vec![
            InputDecl::new("Name", "str"),
            InputDecl::new("Default", OBJECT).optional(),
        ],
        vec![OutputDecl::new("Value", OBJECT)],
        input_node,
    )?)?;
    registry.register(simple(
        "SetDynamicInput",
        &["graph"],
        vec![
            InputDecl::new("GraphID", "str"),
            InputDecl::new("Name", "str"),
            InputDecl::new("Value", OBJECT),
        ],
        vec![OutputDecl::new("Trigger", OBJECT)],
        set_dynamic_input,
    )?)?;
    registry.register(simple(
        "DynamicSubGraph",
        &["graph"],
        vec![InputDecl::new("GraphName", "str"), InputDecl::new("GraphID", "str")],
        vec![
            OutputDecl::new("ReturnValue", OBJECT),
            OutputDecl::new("ReturningNode", "int"),
        ],
        dynamic_sub_graph,
    )?)?;
    Ok(())
}

fn set_value(core: &mut NodeCore, ctx: &ExecContext<'_>) -> Result<()> {
    let name = text(core, "Name")?;
    let value = core.input_value("Value")?;
    ctx.values.store(&name, value.clone());
    core.set_output("Trigger", value)
}

/// Pair with a wired `TRIGGER` when the name is a default, so the read happens after the write
fn get_value(core: &mut NodeCore, ctx: &ExecContext<'_>) -> Result<()> {
    let name = text(core, "Name")?;
    let value = ctx
        .values
        .stored(&name)
        .ok_or_else(|| failed(core, format!("no stored value named '{}'", name)))?;
    core.set_output("Value", value)
}

fn create_list(core: &mut NodeCore, ctx: &ExecContext<'_>) -> Result<()> {
    let name = text(core, "Name")?;
    ctx.values.store(&name, json!([]));
    core.set_output("List", json!([]))
}

fn append_value(core: &mut NodeCore, ctx: &ExecContext<'_>) -> Result<()> {
    let name = text(core, "Name")?;
    let value = core.input_value("Value")?;
    if !ctx.values.append(&name, value) {
        return Err(failed(core, format!("stored value '{}' is not a list", name)));
    }
    let list = ctx.values.stored(&name).unwrap_or_else(|| json!([]));
    core.set_output("List", list)
}

/// Stored lists named by `Keys` laid out as space separated columns
///
/// The header row holds the keys; rows stop at the shortest list.
fn make_table(core: &mut NodeCore, ctx: &ExecContext<'_>) -> Result<()> {
    let keys: Vec<String> = match core.input_value("Keys")? {
        Value::Array(keys) => keys.iter().map(|k| k.as_str().map(str::to_string).unwrap_or_else(|| k.to_string())).collect(),
        other => vec![other.as_str().map(str::to_string).unwrap_or_else(|| other.to_string())],
    };

    let mut columns = Vec::with_capacity(keys.len());
    for key in &keys {
        match ctx.values.stored(key) {
            Some(Value::Array(column)) => columns.push(column),
            Some(_) => return Err(failed(core, format!("stored value '{}' is not a list", key))),
            None => return Err(failed(core, format!("no stored value named '{}'", key))),
        }
    }

    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut lines = vec![keys.join(" ")];
    for row in 0..rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|column| match &column[row] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        lines.push(cells.join(" "));
    }
    core.set_output("Table", Value::String(lines.join("\n")))
}

/// Snapshot of the stored variables, taken each time `TRIGGER` fires
#[derive(Default)]
pub struct ShowValues {
    shown: BTreeMap<String, Value>,
}

impl NodeBehavior for ShowValues {
    fn run(&mut self, core: &mut NodeCore, ctx: &ExecContext<'_>) -> Result<()> {
        core.input_value(TRIGGER)?;
        self.shown = ctx.values.stored_values().into_iter().collect();
        for (key, value) in &self.shown {
            tracing::info!("📋 {}: {}", key, value);
        }
        core.set_output("Values", json!(self.shown))
    }
}

fn input_node(core: &mut NodeCore, ctx: &ExecContext<'_>) -> Result<()> {
    let name = text(core, "Name")?;
    let value = match ctx.values.input(&name) {
        Some(value) => value,
        None if core.input("Default")?.peek_available() => core.input_value("Default")?,
        None => return Err(failed(core, format!("no graph input named '{}'", name))),
    };
    core.set_output("Value", value)
}

fn set_dynamic_input(core: &mut NodeCore, ctx: &ExecContext<'_>) -> Result<()> {
    let graph_id = text(core, "GraphID")?;
    let name = text(core, "Name")?;
    let value = core.input_value("Value")?;
    ctx.values.set_dynamic_input(&graph_id, &name, value);
    core.set_output("Trigger", json!(graph_id))
}

/// Load a saved graph, seed its inputs from the dynamic table and run it to completion
fn dynamic_sub_graph(core: &mut NodeCore, ctx: &ExecContext<'_>) -> Result<()> {
    let path = text(core, "GraphName")?;
    let graph_id = text(core, "GraphID")?;

    let sub = Graph::new(Arc::clone(ctx.registry));
    sub.load(&path, None)?;
    sub.values().replace_inputs(ctx.values.dynamic_inputs(&graph_id));
    tracing::info!("🧩 {} running sub graph {} ({})", core.label(), path, sub.instance_id());
    ExecutionEngine::default().self_execute(&sub);

    let returned = sub.return_state();
    core.set_output("ReturnValue", returned.value)?;
    core.set_output("ReturningNode", returned.node.map(Value::from).unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::values::{ReturnSlot, ValueStore};

    fn run(registry: &Arc<NodeRegistry>, values: &ValueStore, class: &str, inputs: &[(&str, Value)]) -> Result<NodeCore> {
        let mut node = registry.spawn(class, 3)?;
        for (name, value) in inputs {
            node.set_input(name, value.clone(), false, 0)?;
        }
        let returns = ReturnSlot::new();
        let label = node.label();
        let ctx = ExecContext {
            node_id: 3,
            label: &label,
            values,
            returns: &returns,
            registry,
        };
        node.run(&ctx)?;
        Ok(node.core)
    }

    #[test]
    fn set_then_get_through_the_store() {
        let registry = Arc::new(NodeRegistry::with_builtins().unwrap());
        let values = ValueStore::new();
        run(&registry, &values, "SetValue", &[("Name", json!("x")), ("Value", json!(42))]).unwrap();
        let core = run(&registry, &values, "GetValue", &[("Name", json!("x"))]).unwrap();
        assert_eq!(core.output("Value").unwrap().value(), Some(&json!(42)));

        let missing = run(&registry, &values, "GetValue", &[("Name", json!("nope"))]);
        assert!(missing.is_err());
    }

    #[test]
    fn append_builds_a_list() {
        let registry = Arc::new(NodeRegistry::with_builtins().unwrap());
        let values = ValueStore::new();
        run(&registry, &values, "CreateList", &[("Name", json!("items"))]).unwrap();
        run(&registry, &values, "AppendValue", &[("Name", json!("items")), ("Value", json!(1))]).unwrap();
        let core = run(&registry, &values, "AppendValue", &[("Name", json!("items")), ("Value", json!(2))]).unwrap();
        assert_eq!(core.output("List").unwrap().value(), Some(&json!([1, 2])));

        values.store("scalar", json!(1));
        assert!(run(&registry, &values, "AppendValue", &[("Name", json!("scalar")), ("Value", json!(2))]).is_err());
    }

    #[test]
    fn make_table_lays_out_stored_lists() {
        let registry = Arc::new(NodeRegistry::with_builtins().unwrap());
        let values = ValueStore::new();
        values.store("x", json!([1, 2, 3]));
        values.store("name", json!(["a", "b"]));
        let core = run(&registry, &values, "MakeTable", &[("Keys", json!(["x", "name"]))]).unwrap();
        assert_eq!(core.output("Table").unwrap().value(), Some(&json!("x name\n1 a\n2 b")));
        assert_eq!(values.stored("x"), Some(json!([1, 2, 3])));

        assert!(run(&registry, &values, "MakeTable", &[("Keys", json!(["missing"]))]).is_err());
    }

    #[test]
    fn input_node_falls_back_to_its_default() {
        let registry = Arc::new(NodeRegistry::with_builtins().unwrap());
        let values = ValueStore::new();
        values.set_input("size", json!(8));
        let core = run(&registry, &values, "InputNode", &[("Name", json!("size"))]).unwrap();
        assert_eq!(core.output("Value").unwrap().value(), Some(&json!(8)));

        let core = run(&registry, &values, "InputNode", &[("Name", json!("color")), ("Default", json!("red"))]).unwrap();
        assert_eq!(core.output("Value").unwrap().value(), Some(&json!("red")));
        assert!(run(&registry, &values, "InputNode", &[("Name", json!("color"))]).is_err());
    }

    #[test]
    fn dynamic_inputs_are_keyed_by_graph_id() {
        let registry = Arc::new(NodeRegistry::with_builtins().unwrap());
        let values = ValueStore::new();
        run(
            &registry,
            &values,
            "SetDynamicInput",
            &[("GraphID", json!("job-1")), ("Name", json!("size")), ("Value", json!(3))],
        )
        .unwrap();
        assert_eq!(values.dynamic_inputs("job-1").get("size"), Some(&json!(3)));
        assert!(values.dynamic_inputs("job-2").is_empty());
    }
}
