/// Pin declarations and per-pin runtime state
///
/// `InputDecl`/`OutputDecl` are the class-level declarations. `InputInfo` and
/// `OutputInfo` are the per-instance slots that carry values, defaults,
/// connection state and the loop-level bookkeeping that decides availability.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GraphError, Result};
use crate::types::VarType;

/// Name of the reserved re-convergence input on control-flow nodes
pub const CONTROL: &str = "Control";

/// Name of the implicit optional input every node class carries
pub const TRIGGER: &str = "TRIGGER";

/// Pure counter stage at which a default counts as consumed
const PURE_CONSUMED: u8 = 2;

/// Declared input of a node class
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: String,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub list: bool,
    #[serde(default)]
    pub optional: bool,
    /// Selectable value set offered to editors
    #[serde(default)]
    pub select: Option<Vec<Value>>,
    #[serde(default)]
    pub hints: Vec<String>,
}

impl InputDecl {
    pub fn new(name: &str, var_type: &str) -> Self {
        Self {
            name: name.to_string(),
            var_type: var_type.to_string(),
            default: None,
            list: false,
            optional: false,
            select: None,
            hints: Vec::new(),
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn list(mut self) -> Self {
        self.list = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn select(mut self, values: Vec<Value>) -> Self {
        self.select = Some(values);
        self
    }
}

/// Declared output of a node class
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: String,
    #[serde(default)]
    pub list: bool,
}

impl OutputDecl {
    pub fn new(name: &str, var_type: &str) -> Self {
        Self {
            name: name.to_string(),
            var_type: var_type.to_string(),
            list: false,
        }
    }

    pub fn list(mut self) -> Self {
        self.list = true;
        self
    }
}

/// Runtime state of one input slot
#[derive(Debug, Clone)]
pub struct InputInfo {
    pub name: String,
    pub var_type: VarType,
    pub list: bool,
    pub optional: bool,
    pub select: Option<Vec<Value>>,
    owner: String,
    value: Option<Value>,
    value_set: bool,
    connected: bool,
    default: Option<Value>,
    declared_default: Option<Value>,
    used_default: bool,
    loop_level: u32,
    pure: u8,
    multi_conn: usize,
    multi_counter: usize,
}

/// Comparable view of an input's mutable state
#[derive(Debug, Clone, PartialEq)]
pub struct InputState {
    pub value: Option<Value>,
    pub value_set: bool,
    pub connected: bool,
    pub default: Option<Value>,
    pub used_default: bool,
    pub loop_level: u32,
    pub pure: u8,
    pub multi_conn: usize,
    pub multi_counter: usize,
}

impl InputInfo {
    pub fn new(decl: &InputDecl, var_type: VarType, owner: &str) -> Self {
        let default = decl.default.clone().filter(|v| !v.is_null());
        Self {
            name: decl.name.clone(),
            var_type,
            list: decl.list,
            optional: decl.optional,
            select: decl.select.clone(),
            owner: owner.to_string(),
            value: None,
            value_set: false,
            connected: false,
            default: default.clone(),
            declared_default: default,
            used_default: false,
            loop_level: 0,
            pure: 0,
            multi_conn: 0,
            multi_counter: 0,
        }
    }

    pub fn is_control(&self) -> bool {
        self.name == CONTROL
    }

    /// Store a value arriving over an edge or from a caller.
    ///
    /// Control inputs count arrivals instead of recording a loop level.
    pub fn set(&mut self, value: Value, override_: bool, loop_level: u32) -> Result<()> {
        if self.value_set && !override_ {
            return Err(GraphError::InputAlreadySet {
                node: self.owner.clone(),
                input: self.name.clone(),
            });
        }
        self.value = Some(value);
        self.value_set = true;
        if self.is_control() {
            self.multi_counter += 1;
        } else {
            self.loop_level = loop_level;
        }
        Ok(())
    }

    fn default_available(&self) -> bool {
        self.default.is_some() && !self.connected && !self.used_default && self.pure < PURE_CONSUMED
    }

    /// Inspection-mode availability; never changes state
    pub fn peek_available(&self) -> bool {
        if self.is_control() && self.multi_counter < self.multi_conn {
            return false;
        }
        self.value_set || self.default_available()
    }

    /// Availability as seen by the scheduler.
    ///
    /// With `inspect` set this is identical to `peek_available`. Otherwise a
    /// pure control input that falls back to its default marks it consumed.
    pub fn is_available(&mut self, inspect: bool) -> bool {
        if inspect {
            return self.peek_available();
        }
        if self.is_control() && self.multi_counter < self.multi_conn {
            return false;
        }
        if self.value_set {
            return true;
        }
        if self.default_available() {
            if self.is_control() && self.pure == 1 {
                self.pure = PURE_CONSUMED;
            }
            return true;
        }
        false
    }

    /// Read the value, coercing it through the declared type
    pub fn value(&mut self) -> Result<Value> {
        if self.value_set {
            let raw = self.value.clone().unwrap_or(Value::Null);
            return self.coerce(&raw);
        }
        if self.default_available() {
            self.used_default = self.loop_level > 0;
            if self.pure == 1 {
                self.pure = PURE_CONSUMED;
            }
            let raw = self.default.clone().unwrap_or(Value::Null);
            return self.coerce(&raw);
        }
        Err(GraphError::InputNotAvailable {
            node: self.owner.clone(),
            input: self.name.clone(),
        })
    }

    /// Visible value without side effects: the set value, else a usable default
    pub fn peek_value(&self) -> Option<Value> {
        if self.value_set {
            self.value.clone()
        } else if self.default_available() {
            self.default.clone()
        } else {
            None
        }
    }

    fn coerce(&self, raw: &Value) -> Result<Value> {
        if self.var_type.is_object() {
            return Ok(raw.clone());
        }
        let invalid = |reason: String| GraphError::InvalidValue {
            pin: format!("{}.{}", self.owner, self.name),
            reason,
        };
        if self.list {
            let items = raw
                .as_array()
                .ok_or_else(|| invalid(format!("expected a list, got {}", raw)))?;
            items
                .iter()
                .map(|item| self.var_type.coerce(item).map_err(invalid))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array)
        } else {
            self.var_type.coerce(raw).map_err(invalid)
        }
    }

    /// Clear value, default and arrival count. A node running deeper than the
    /// level the value was set at leaves it alone unless forced.
    pub fn reset(&mut self, node_loop_level: u32, force: bool) {
        if node_loop_level > self.loop_level && !force {
            return;
        }
        self.default = None;
        self.value_set = false;
        self.value = None;
        self.multi_counter = 0;
    }

    /// Replace both the current and the declared default
    pub fn set_default(&mut self, default: Option<Value>) {
        let default = default.filter(|v| !v.is_null());
        self.default = default.clone();
        self.declared_default = default;
    }

    /// Bring back the declared default after a topology change
    pub(crate) fn restore_default(&mut self) {
        self.default = self.declared_default.clone();
        self.used_default = false;
        if self.pure == PURE_CONSUMED {
            self.pure = 1;
        }
    }

    pub(crate) fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
        self.restore_default();
    }

    pub(crate) fn set_multi_conn(&mut self, count: usize) {
        self.multi_conn = count;
    }

    pub(crate) fn set_pure(&mut self) {
        self.pure = 1;
    }

    pub fn value_set(&self) -> bool {
        self.value_set
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn declared_default(&self) -> Option<&Value> {
        self.declared_default.as_ref()
    }

    pub fn loop_level(&self) -> u32 {
        self.loop_level
    }

    pub fn multi_conn(&self) -> usize {
        self.multi_conn
    }

    pub fn multi_counter(&self) -> usize {
        self.multi_counter
    }

    pub fn state(&self) -> InputState {
        InputState {
            value: self.value.clone(),
            value_set: self.value_set,
            connected: self.connected,
            default: self.default.clone(),
            used_default: self.used_default,
            loop_level: self.loop_level,
            pure: self.pure,
            multi_conn: self.multi_conn,
            multi_counter: self.multi_counter,
        }
    }
}

/// Runtime state of one output slot
#[derive(Debug, Clone)]
pub struct OutputInfo {
    pub name: String,
    pub var_type: VarType,
    pub list: bool,
    value: Option<Value>,
    value_set: bool,
    default: Option<Value>,
}

impl OutputInfo {
    pub fn new(decl: &OutputDecl, var_type: VarType) -> Self {
        Self {
            name: decl.name.clone(),
            var_type,
            list: decl.list,
            value: None,
            value_set: false,
            default: None,
        }
    }

    pub fn set(&mut self, value: Value) {
        self.value = Some(value);
        self.value_set = true;
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn value_set(&self) -> bool {
        self.value_set
    }

    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn set_default(&mut self, default: Option<Value>) {
        self.default = default.filter(|v| !v.is_null());
    }

    /// Value pushed downstream: the set value, else the default, else null
    pub fn emitted(&self) -> Value {
        if self.value_set {
            self.value.clone().unwrap_or(Value::Null)
        } else {
            self.default.clone().unwrap_or(Value::Null)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeRegistry;
    use serde_json::json;

    fn input(name: &str, ty: &str) -> InputInfo {
        let registry = TypeRegistry::with_builtins();
        InputInfo::new(&InputDecl::new(name, ty), registry.resolve(ty).unwrap(), "Test(0)")
    }

    #[test]
    fn second_plain_write_is_rejected() {
        let mut pin = input("Value", "int");
        pin.set(json!(1), false, 0).unwrap();
        let err = pin.set(json!(2), false, 0).unwrap_err();
        assert!(matches!(err, GraphError::InputAlreadySet { .. }));
        pin.set(json!(3), true, 0).unwrap();
        assert_eq!(pin.value().unwrap(), json!(3));
    }

    #[test]
    fn control_needs_every_converging_edge() {
        let mut pin = input(CONTROL, "object");
        pin.set_connected(true);
        pin.set_multi_conn(3);
        pin.set(json!("a"), true, 0).unwrap();
        pin.set(json!("b"), true, 0).unwrap();
        assert!(!pin.is_available(false));
        pin.set(json!("c"), true, 0).unwrap();
        assert!(pin.is_available(false));
        pin.reset(0, true);
        assert_eq!(pin.multi_counter(), 0);
        assert!(!pin.is_available(false));
    }

    #[test]
    fn inspection_has_no_side_effects() {
        let mut pin = input(CONTROL, "object");
        pin.set_default(Some(json!("go")));
        pin.set_pure();
        let before = pin.state();
        assert!(pin.is_available(true));
        assert!(pin.is_available(true));
        assert_eq!(pin.state(), before);
        assert!(pin.is_available(false));
        assert_ne!(pin.state(), before);
    }

    #[test]
    fn reset_protects_deeper_loop_levels() {
        let mut pin = input("Value", "object");
        pin.set(json!(1), false, 1).unwrap();
        pin.reset(1, false);
        assert!(!pin.value_set(), "reset at the same level clears");

        pin.set(json!(1), false, 1).unwrap();
        pin.reset(0, false);
        assert!(!pin.value_set(), "reset from a shallower level clears");

        let mut outer = input("Value", "object");
        outer.set(json!(1), false, 0).unwrap();
        outer.reset(2, false);
        assert!(outer.value_set(), "value from an outer level survives an inner reset");
        outer.reset(2, true);
        assert!(!outer.value_set());
    }

    #[test]
    fn default_serves_until_reset_then_returns_after_disconnect() {
        let mut pin = input("Value", "int");
        pin.set_default(Some(json!("5")));
        pin.set_connected(true);
        assert!(!pin.is_available(false), "connected inputs ignore defaults");

        pin.set_connected(false);
        assert!(pin.is_available(false));
        assert_eq!(pin.value().unwrap(), json!(5));
        pin.reset(0, false);
        assert!(!pin.is_available(false));

        pin.set_connected(true);
        pin.set_connected(false);
        assert!(pin.is_available(false));
    }

    #[test]
    fn list_pins_coerce_elements() {
        let registry = TypeRegistry::with_builtins();
        let decl = InputDecl::new("Items", "int").list();
        let mut pin = InputInfo::new(&decl, registry.resolve("int").unwrap(), "Test(0)");
        pin.set(json!(["1", 2, 3.5]), false, 0).unwrap();
        assert_eq!(pin.value().unwrap(), json!([1, 2, 3]));

        pin.set(json!(4), true, 0).unwrap();
        assert!(matches!(pin.value(), Err(GraphError::InvalidValue { .. })));
    }

    #[test]
    fn unavailable_read_fails() {
        let mut pin = input("Value", "int");
        assert!(matches!(pin.value(), Err(GraphError::InputNotAvailable { .. })));
    }

    #[test]
    fn output_emits_default_when_unset() {
        let registry = TypeRegistry::with_builtins();
        let mut out = OutputInfo::new(&OutputDecl::new("Out", "int"), registry.resolve("int").unwrap());
        assert_eq!(out.emitted(), Value::Null);
        out.set_default(Some(json!(9)));
        assert_eq!(out.emitted(), json!(9));
        out.set(json!(1));
        assert_eq!(out.emitted(), json!(1));
    }
}
