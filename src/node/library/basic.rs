/// Basic value nodes: constructors, conversions, strings, files, returns

use serde_json::{json, Value};

use crate::error::Result;
use crate::graph::registry::NodeRegistry;
use crate::node::info::{InputDecl, OutputDecl};
use crate::node::instance::{ExecContext, NodeCore};
use crate::types::OBJECT;

use super::{failed, simple, text};

pub(crate) fn register(registry: &NodeRegistry) -> Result<()> {
    registry.register(simple(
        "CreateBool",
        &["create"],
        vec![InputDecl::new("Value", "bool").select(vec![json!(true), json!(false)])],
        vec![OutputDecl::new("Boolean", "bool")],
        |core, _| relay(core, "Value", "Boolean"),
    )?)?;
    registry.register(simple(
        "CreateInt",
        &["create"],
        vec![InputDecl::new("Value", "int")],
        vec![OutputDecl::new("Integer", "int")],
        |core, _| relay(core, "Value", "Integer"),
    )?)?;
    registry.register(simple(
        "CreateFloat",
        &["create"],
        vec![InputDecl::new("Value", "float")],
        vec![OutputDecl::new("Float", "float")],
        |core, _| relay(core, "Value", "Float"),
    )?)?;
    registry.register(simple(
        "CreateString",
        &["create"],
        vec![InputDecl::new("Str", "str")],
        vec![OutputDecl::new("String", "str")],
        |core, _| relay(core, "Str", "String"),
    )?)?;

    registry.register(simple(
        "IsEqual",
        &["logic"],
        vec![InputDecl::new("Object1", OBJECT), InputDecl::new("Object2", OBJECT)],
        vec![OutputDecl::new("Equal", "bool")],
        is_equal,
    )?)?;
    registry.register(simple(
        "ToString",
        &["convert"],
        vec![InputDecl::new("Value", OBJECT)],
        vec![OutputDecl::new("String", "str")],
        to_string,
    )?)?;
    registry.register(simple(
        "Join",
        &["string"],
        vec![InputDecl::new("Str1", "str"), InputDecl::new("Str2", "str")],
        vec![OutputDecl::new("Joined", "str")],
        join,
    )?)?;
    registry.register(simple(
        "Split",
        &["string"],
        vec![InputDecl::new("String", "str"), InputDecl::new("Separator", "str")],
        vec![OutputDecl::new("List", "str").list()],
        split,
    )?)?;
    registry.register(simple(
        "SplitLines",
        &["string"],
        vec![InputDecl::new("String", "str")],
        vec![OutputDecl::new("List", "str").list()],
        split_lines,
    )?)?;
    registry.register(simple(
        "Int2Float",
        &["convert"],
        vec![InputDecl::new("Integer", "int")],
        vec![OutputDecl::new("Float", "float")],
        int_to_float,
    )?)?;
    registry.register(simple(
        "String2Float",
        &["convert"],
        vec![InputDecl::new("String", "str")],
        vec![OutputDecl::new("Float", "float")],
        string_to_float,
    )?)?;
    registry.register(simple(
        "DebugPrint",
        &["debug"],
        vec![InputDecl::new("Object", OBJECT)],
        vec![OutputDecl::new("Out", OBJECT)],
        debug_print,
    )?)?;
    registry.register(simple(
        "ReadFile",
        &["file"],
        vec![InputDecl::new("Name", "str")],
        vec![OutputDecl::new("Content", "str")],
        read_file,
    )?)?;
    registry.register(simple(
        "WriteFile",
        &["file"],
        vec![InputDecl::new("Name", "str"), InputDecl::new("Content", "str")],
        vec![OutputDecl::new("Trigger", OBJECT)],
        write_file,
    )?)?;
    registry.register(simple(
        "SimpleReturn",
        &["return"],
        vec![
            InputDecl::new("Value", OBJECT).with_default(json!(0)),
            InputDecl::new("Priority", "int").with_default(json!(0)),
        ],
        vec![],
        simple_return,
    )?)?;
    registry.register(simple(
        "ReturnIsEqual",
        &["return"],
        vec![
            InputDecl::new("Value1", OBJECT),
            InputDecl::new("Value2", OBJECT).optional(),
            InputDecl::new("Priority", "int").with_default(json!(0)),
        ],
        vec![],
        return_is_equal,
    )?)?;
    registry.register(simple(
        "TestReturn",
        &["return", "debug"],
        vec![
            InputDecl::new("Value", OBJECT),
            InputDecl::new("Reference", OBJECT).optional(),
        ],
        vec![],
        test_return,
    )?)?;
    Ok(())
}

fn relay(core: &mut NodeCore, input: &str, output: &str) -> Result<()> {
    let value = core.input_value(input)?;
    core.set_output(output, value)
}

fn is_equal(core: &mut NodeCore, _ctx: &ExecContext<'_>) -> Result<()> {
    let equal = core.input_value("Object1")? == core.input_value("Object2")?;
    core.set_output("Equal", Value::Bool(equal))
}

fn to_string(core: &mut NodeCore, _ctx: &ExecContext<'_>) -> Result<()> {
    let value = text(core, "Value")?;
    core.set_output("String", Value::String(value))
}

fn join(core: &mut NodeCore, _ctx: &ExecContext<'_>) -> Result<()> {
    let joined = text(core, "Str1")? + &text(core, "Str2")?;
    core.set_output("Joined", Value::String(joined))
}

fn split(core: &mut NodeCore, _ctx: &ExecContext<'_>) -> Result<()> {
    let source = text(core, "String")?;
    let separator = text(core, "Separator")?;
    if separator.is_empty() {
        return Err(failed(core, "empty separator"));
    }
    let parts: Vec<&str> = source.split(separator.as_str()).collect();
    core.set_output("List", json!(parts))
}

fn split_lines(core: &mut NodeCore, _ctx: &ExecContext<'_>) -> Result<()> {
    let source = text(core, "String")?;
    let lines: Vec<&str> = source.lines().collect();
    core.set_output("List", json!(lines))
}

fn int_to_float(core: &mut NodeCore, _ctx: &ExecContext<'_>) -> Result<()> {
    let value = core.input_value("Integer")?.as_f64().unwrap_or_default();
    core.set_output("Float", json!(value))
}

fn string_to_float(core: &mut NodeCore, _ctx: &ExecContext<'_>) -> Result<()> {
    let source = text(core, "String")?;
    let value: f64 = source
        .trim()
        .parse()
        .map_err(|_| failed(core, format!("'{}' is not a number", source)))?;
    core.set_output("Float", json!(value))
}

fn debug_print(core: &mut NodeCore, _ctx: &ExecContext<'_>) -> Result<()> {
    let value = core.input_value("Object")?;
    tracing::info!("🐛 [DEBUG] {}: {}", core.label(), value);
    core.set_output("Out", value)
}

fn read_file(core: &mut NodeCore, _ctx: &ExecContext<'_>) -> Result<()> {
    let name = text(core, "Name")?;
    let content = std::fs::read_to_string(&name).map_err(|e| failed(core, format!("No file named {}: {}", name, e)))?;
    core.set_output("Content", Value::String(content))
}

fn write_file(core: &mut NodeCore, _ctx: &ExecContext<'_>) -> Result<()> {
    let name = text(core, "Name")?;
    let content = text(core, "Content")?;
    std::fs::write(&name, content).map_err(|e| failed(core, format!("Cannot write {}: {}", name, e)))?;
    core.set_output("Trigger", Value::String(name))
}

fn priority(core: &mut NodeCore) -> Result<i64> {
    Ok(core.input_value("Priority")?.as_i64().unwrap_or(0))
}

fn simple_return(core: &mut NodeCore, ctx: &ExecContext<'_>) -> Result<()> {
    let value = core.input_value("Value")?;
    let priority = priority(core)?;
    ctx.set_return(value, priority);
    Ok(())
}

/// Returns 0 when both values match, 1 otherwise
fn return_is_equal(core: &mut NodeCore, ctx: &ExecContext<'_>) -> Result<()> {
    let first = core.input_value("Value1")?;
    let second = if core.input("Value2")?.peek_available() {
        core.input_value("Value2")?
    } else {
        Value::Null
    };
    let priority = priority(core)?;
    ctx.set_return(json!(if first == second { 0 } else { 1 }), priority);
    Ok(())
}

/// Marks that execution reached this point; both values are only logged
fn test_return(core: &mut NodeCore, ctx: &ExecContext<'_>) -> Result<()> {
    let value = core.input_value("Value")?;
    let reference = if core.input("Reference")?.peek_available() {
        core.input_value("Reference")?
    } else {
        Value::Null
    };
    tracing::debug!("🧪 {} value {} reference {}", core.label(), value, reference);
    ctx.set_return(json!(TEST_RETURN_VALUE), 0);
    Ok(())
}

/// Value offered by `TestReturn`
pub const TEST_RETURN_VALUE: &str = "Test Return Value";
