/// Type registry with nominal subtyping
///
/// Each declared type name resolves to a `TypeDescriptor` holding an optional
/// parent and a validator. Reads of pin values run through the validator;
/// `object` is the wildcard and never coerces.

use serde_json::{Number, Value};
use std::{collections::HashMap, fmt, sync::Arc};

use crate::error::{GraphError, Result};

/// Name of the wildcard type
pub const OBJECT: &str = "object";

/// Validator signature: takes a raw value, returns the coerced value or a reason
pub type Validator = Arc<dyn Fn(&Value) -> std::result::Result<Value, String> + Send + Sync>;

/// A registered variable type
pub struct TypeDescriptor {
    pub name: String,
    pub parent: Option<String>,
    validator: Option<Validator>,
}

impl TypeDescriptor {
    /// Coerce a value into this type; `object` and validator-less types pass through
    pub fn coerce(&self, value: &Value) -> std::result::Result<Value, String> {
        match &self.validator {
            Some(validate) => validate(value),
            None => Ok(value.clone()),
        }
    }

    pub fn is_object(&self) -> bool {
        self.name == OBJECT
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .finish()
    }
}

/// Shared handle to a resolved type, held by every pin
pub type VarType = Arc<TypeDescriptor>;

/// Registry of known variable types
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: HashMap<String, VarType>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl TypeRegistry {
    /// Registry containing `object`, `int`, `float`, `str` and `bool`
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            types: HashMap::new(),
        };
        registry.insert(OBJECT, None, None);
        registry.insert("int", None, Some(Arc::new(coerce_int)));
        registry.insert("float", None, Some(Arc::new(coerce_float)));
        registry.insert("str", None, Some(Arc::new(coerce_str)));
        registry.insert("bool", Some("int"), Some(Arc::new(coerce_bool)));
        registry
    }

    fn insert(&mut self, name: &str, parent: Option<&str>, validator: Option<Validator>) {
        self.types.insert(
            name.to_string(),
            Arc::new(TypeDescriptor {
                name: name.to_string(),
                parent: parent.map(str::to_string),
                validator,
            }),
        );
    }

    /// Register a domain type. The parent, when given, must already be known.
    pub fn register<F>(&mut self, name: &str, parent: Option<&str>, validator: F) -> Result<()>
    where
        F: Fn(&Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        if let Some(parent) = parent {
            if !self.types.contains_key(parent) {
                return Err(GraphError::UnknownType(parent.to_string()));
            }
        }
        self.insert(name, parent, Some(Arc::new(validator)));
        tracing::debug!("🧩 Registered variable type '{}'", name);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<VarType> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| GraphError::UnknownType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// True if `ancestor` is `name` or appears on its parent chain
    fn descends_from(&self, name: &str, ancestor: &str) -> bool {
        let mut current = Some(name.to_string());
        while let Some(type_name) = current {
            if type_name == ancestor {
                return true;
            }
            current = self.types.get(&type_name).and_then(|t| t.parent.clone());
        }
        false
    }

    /// Bidirectional compatibility between an output type and an input type
    pub fn compatible(&self, a: &str, b: &str) -> bool {
        a == OBJECT || b == OBJECT || self.descends_from(a, b) || self.descends_from(b, a)
    }
}

fn coerce_int(value: &Value) -> std::result::Result<Value, String> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::from(i))
            } else {
                n.as_f64()
                    .map(|f| Value::from(f.trunc() as i64))
                    .ok_or_else(|| format!("{} is not an integer", n))
            }
        }
        Value::Bool(b) => Ok(Value::from(*b as i64)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|e| format!("cannot parse '{}' as int: {}", s, e)),
        other => Err(format!("cannot convert {} to int", other)),
    }
}

fn coerce_float(value: &Value) -> std::result::Result<Value, String> {
    let float = match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    float
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| format!("cannot convert {} to float", value))
}

fn coerce_str(value: &Value) -> std::result::Result<Value, String> {
    match value {
        Value::String(_) => Ok(value.clone()),
        other => Ok(Value::String(other.to_string())),
    }
}

fn coerce_bool(value: &Value) -> std::result::Result<Value, String> {
    match value {
        Value::Bool(_) => Ok(value.clone()),
        Value::Number(n) => Ok(Value::Bool(n.as_f64().map(|f| f != 0.0).unwrap_or(false))),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" | "" => Ok(Value::Bool(false)),
            _ => Err(format!("cannot convert '{}' to bool", s)),
        },
        other => Err(format!("cannot convert {} to bool", other)),
    }
}
