/// Managed nodes: runtime defined node classes with Lua bodies
///
/// A `ManagedNodeDescriptor` carries the pin declarations of a class plus
/// optional `setup`, `check` and `run` scripts. Each script runs in a fresh,
/// sandboxed Lua state (no `os`, `io`, `debug`, `package`, `dofile`,
/// `loadfile`, `load` or `require`) with these globals:
///
/// - `inputs`: available input values keyed by pin name
/// - `outputs`: table the script fills; keys matching declared outputs are set
/// - `state`: per-instance table persisted between runs
/// - `node_id`: the instance id
/// - `graph_return(value, priority)`: offer a graph return value
/// - `now()` / `time()`: RFC 3339 timestamp and unix seconds
///
/// Descriptors persist one per line as `name:::json`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use crate::error::{GraphError, Result};
use crate::graph::lock;
use crate::node::info::{InputDecl, OutputDecl};
use crate::node::instance::{ExecContext, NodeBehavior, NodeCore};

/// Separator between the class name and its JSON body in a managed nodes file
pub const LINE_SEPARATOR: &str = ":::";

/// Data-driven declaration of a managed node class
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedNodeDescriptor {
    pub name: String,
    #[serde(default)]
    pub base_class: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<InputDecl>,
    #[serde(default)]
    pub outputs: Vec<OutputDecl>,
    #[serde(default)]
    pub setup: Option<String>,
    #[serde(default)]
    pub check: Option<String>,
    #[serde(default)]
    pub run: Option<String>,
}

impl ManagedNodeDescriptor {
    fn bodies(&self) -> Vec<(&'static str, &str)> {
        let mut bodies = Vec::new();
        if let Some(src) = &self.setup {
            bodies.push(("setup", src.as_str()));
        }
        if let Some(src) = &self.check {
            bodies.push(("check", src.as_str()));
        }
        if let Some(src) = &self.run {
            bodies.push(("run", src.as_str()));
        }
        bodies
    }

    /// Compile every provided body; collects one error per failing method
    pub fn validate(&self) -> Result<()> {
        let lua = mlua::Lua::new();
        let mut errors = BTreeMap::new();
        for (method, src) in self.bodies() {
            if let Err(e) = lua.load(src).set_name(method).into_function() {
                errors.insert(method.to_string(), e.to_string());
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(GraphError::NodeUpdate {
                class: self.name.clone(),
                errors,
            })
        }
    }

    /// Parse one `name:::json` line
    pub fn from_line(line: &str) -> Result<Self> {
        let (name, body) = line
            .split_once(LINE_SEPARATOR)
            .ok_or_else(|| GraphError::ManagedNode(format!("malformed managed node line: {}", line)))?;
        let mut descriptor: ManagedNodeDescriptor = serde_json::from_str(body)?;
        if descriptor.name.is_empty() {
            descriptor.name = name.trim().to_string();
        }
        if descriptor.name != name.trim() {
            return Err(GraphError::ManagedNode(format!(
                "line key '{}' does not match class name '{}'",
                name.trim(),
                descriptor.name
            )));
        }
        Ok(descriptor)
    }

    pub fn to_line(&self) -> Result<String> {
        Ok(format!("{}{}{}", self.name, LINE_SEPARATOR, serde_json::to_string(self)?))
    }
}

/// Behavior executing a descriptor's scripts
pub struct LuaBehavior {
    descriptor: Arc<ManagedNodeDescriptor>,
    state: Value,
}

impl LuaBehavior {
    pub fn new(descriptor: Arc<ManagedNodeDescriptor>) -> Self {
        Self {
            descriptor,
            state: Value::Object(Default::default()),
        }
    }
}

type Offers = Arc<Mutex<Vec<(Value, i64)>>>;

/// Fresh sandboxed Lua state with the node globals installed
fn sandbox(core: &NodeCore, inputs: &serde_json::Map<String, Value>, state: &Value) -> mlua::Result<(mlua::Lua, Offers)> {
    let lua = mlua::Lua::new();
    let globals = lua.globals();

    for name in ["os", "io", "debug", "package", "dofile", "loadfile", "load", "require"] {
        globals.set(name, mlua::Nil)?;
    }

    globals.set("now", lua.create_function(|_, ()| Ok(chrono::Utc::now().to_rfc3339()))?)?;
    globals.set("time", lua.create_function(|_, ()| Ok(chrono::Utc::now().timestamp()))?)?;

    globals.set("inputs", json_to_lua(&lua, &Value::Object(inputs.clone()))?)?;
    globals.set("outputs", lua.create_table()?)?;
    let state_table = match state {
        Value::Object(_) => json_to_lua(&lua, state)?,
        _ => mlua::Value::Table(lua.create_table()?),
    };
    globals.set("state", state_table)?;
    globals.set("node_id", core.id as i64)?;

    let offers: Offers = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&offers);
    globals.set(
        "graph_return",
        lua.create_function(move |_, (value, priority): (mlua::Value, Option<i64>)| {
            let value = lua_to_json(value)?;
            lock(&sink).push((value, priority.unwrap_or(0)));
            Ok(())
        })?,
    )?;

    drop(globals);
    Ok((lua, offers))
}

/// Values of every input that is currently available, coerced
fn available_inputs(core: &mut NodeCore, consume: bool) -> serde_json::Map<String, Value> {
    let mut values = serde_json::Map::new();
    for pin in core.inputs_mut() {
        if !pin.peek_available() {
            continue;
        }
        let value = if consume { pin.value().ok() } else { pin.peek_value() };
        if let Some(value) = value {
            values.insert(pin.name.clone(), value);
        }
    }
    values
}

impl NodeBehavior for LuaBehavior {
    fn setup(&mut self, core: &mut NodeCore) -> Result<()> {
        let Some(src) = self.descriptor.setup.clone() else {
            return Ok(());
        };
        let label = core.label();
        let inputs = available_inputs(core, false);
        let result = sandbox(core, &inputs, &self.state).and_then(|(lua, _)| {
            let returned: mlua::Value = lua.load(src.as_str()).set_name("setup").eval()?;
            lua_to_json(returned)
        });
        match result {
            Ok(Value::Object(initial)) => self.state = Value::Object(initial),
            Ok(_) => {}
            Err(e) => return Err(GraphError::node_run(label, e)),
        }
        tracing::debug!("🧪 Managed node {} set up", core.label());
        Ok(())
    }

    fn check(&mut self, core: &mut NodeCore) -> bool {
        let Some(src) = self.descriptor.check.clone() else {
            return core.default_check();
        };
        if core.blocked() {
            return false;
        }
        let inputs = available_inputs(core, false);
        let result = sandbox(core, &inputs, &self.state)
            .and_then(|(lua, _)| lua.load(src.as_str()).set_name("check").eval::<bool>());
        match result {
            Ok(ready) => ready,
            Err(e) => {
                tracing::warn!("⚠️ Check script of {} failed: {}", core.label(), e);
                false
            }
        }
    }

    fn run(&mut self, core: &mut NodeCore, ctx: &ExecContext<'_>) -> Result<()> {
        let Some(src) = self.descriptor.run.clone() else {
            return Ok(());
        };
        let label = core.label();
        let inputs = available_inputs(core, true);

        let (lua, offers) = sandbox(core, &inputs, &self.state).map_err(|e| GraphError::node_run(&label, e))?;
        lua.load(src.as_str())
            .set_name("run")
            .exec()
            .map_err(|e| GraphError::node_run(&label, e))?;

        let globals = lua.globals();
        let outputs: mlua::Table = globals.get("outputs").map_err(|e| GraphError::node_run(&label, e))?;
        for decl in &self.descriptor.outputs {
            let value: mlua::Value = outputs.get(decl.name.as_str()).map_err(|e| GraphError::node_run(&label, e))?;
            if value.is_nil() {
                continue;
            }
            let value = lua_to_json(value).map_err(|e| GraphError::node_run(&label, e))?;
            core.set_output(&decl.name, value)?;
        }
        let state: mlua::Value = globals.get("state").map_err(|e| GraphError::node_run(&label, e))?;
        self.state = lua_to_json(state).map_err(|e| GraphError::node_run(&label, e))?;

        for (value, priority) in lock(&offers).drain(..) {
            ctx.set_return(value, priority);
        }
        Ok(())
    }
}

/// Convert a JSON value into a Lua value
pub fn json_to_lua(lua: &mlua::Lua, value: &Value) -> mlua::Result<mlua::Value> {
    Ok(match value {
        Value::Null => mlua::Nil,
        Value::Bool(b) => mlua::Value::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => mlua::Value::Integer(i),
            None => mlua::Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => mlua::Value::String(lua.create_string(s)?),
        Value::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, json_to_lua(lua, item)?)?;
            }
            mlua::Value::Table(table)
        }
        Value::Object(map) => {
            let table = lua.create_table()?;
            for (key, item) in map {
                table.raw_set(key.as_str(), json_to_lua(lua, item)?)?;
            }
            mlua::Value::Table(table)
        }
    })
}

/// Convert a Lua value back to JSON; sequences become arrays
pub fn lua_to_json(value: mlua::Value) -> mlua::Result<Value> {
    match value {
        mlua::Value::Nil => Ok(Value::Null),
        mlua::Value::Boolean(b) => Ok(Value::Bool(b)),
        mlua::Value::Integer(i) => Ok(Value::from(i)),
        mlua::Value::Number(f) => Ok(serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)),
        mlua::Value::String(s) => Ok(Value::String(s.to_str()?.to_string())),
        mlua::Value::Table(table) => {
            let mut is_array = true;
            let mut max_index = 0usize;
            let mut count = 0usize;
            for pair in table.pairs::<mlua::Value, mlua::Value>() {
                let (key, _) = pair?;
                count += 1;
                match key {
                    mlua::Value::Integer(i) if i > 0 => max_index = max_index.max(i as usize),
                    _ => {
                        is_array = false;
                        break;
                    }
                }
            }

            if is_array && count > 0 && count == max_index {
                let mut items = Vec::with_capacity(max_index);
                for i in 1..=max_index {
                    items.push(lua_to_json(table.raw_get(i)?)?);
                }
                Ok(Value::Array(items))
            } else {
                let mut map = serde_json::Map::new();
                for pair in table.pairs::<mlua::Value, mlua::Value>() {
                    let (key, item) = pair?;
                    let key = match key {
                        mlua::Value::String(s) => s.to_str()?.to_string(),
                        mlua::Value::Integer(i) => i.to_string(),
                        mlua::Value::Number(f) => f.to_string(),
                        _ => continue,
                    };
                    map.insert(key, lua_to_json(item)?);
                }
                Ok(Value::Object(map))
            }
        }
        _ => Ok(Value::Null),
    }
}
