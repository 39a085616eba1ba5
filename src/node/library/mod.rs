/// Builtin node library
///
/// Control-flow nodes drive branching and iteration through loop levels and
/// the multi-edge `Control` input. Value nodes talk to the graph's value
/// tables; basic nodes create, convert and print values.

pub mod basic;
pub mod control;
pub mod values;

use serde_json::Value;

use crate::error::{GraphError, Result};
use crate::graph::registry::NodeRegistry;
use crate::node::class::NodeClass;
use crate::node::info::{InputDecl, OutputDecl};
use crate::node::instance::{ExecContext, NodeBehavior, NodeCore};

/// Register every builtin class with `registry`
pub fn register_builtin_nodes(registry: &NodeRegistry) -> Result<()> {
    control::register(registry)?;
    values::register(registry)?;
    basic::register(registry)?;
    Ok(())
}

/// Signature of a stateless node body
type RunFn = fn(&mut NodeCore, &ExecContext<'_>) -> Result<()>;

/// Behavior wrapping a plain function; check and notify use the defaults
struct Compute(RunFn);

impl NodeBehavior for Compute {
    fn run(&mut self, core: &mut NodeCore, ctx: &ExecContext<'_>) -> Result<()> {
        (self.0)(core, ctx)
    }
}

/// Declare a class whose body is a plain function
fn simple(name: &str, tags: &[&str], inputs: Vec<InputDecl>, outputs: Vec<OutputDecl>, run: RunFn) -> Result<NodeClass> {
    let mut builder = NodeClass::builder(name);
    for tag in tags {
        builder = builder.tag(tag);
    }
    for input in inputs {
        builder = builder.input(input);
    }
    for output in outputs {
        builder = builder.output(output);
    }
    builder.behavior(move || Box::new(Compute(run))).build()
}

/// Read an input as text; `str` pins are already coerced to strings
fn text(core: &mut NodeCore, name: &str) -> Result<String> {
    Ok(match core.input_value(name)? {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

fn failed(core: &NodeCore, message: impl ToString) -> GraphError {
    GraphError::node_run(core.label(), message)
}
