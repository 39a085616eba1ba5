/// Node class declarations
///
/// A `NodeClass` is the type-level description of a node: ordered input and
/// output declarations, discovery tags and a factory for the behavior that
/// implements `check`/`run`/`notify`. Classes are built through
/// `NodeClassBuilder`, which merges inherited declarations and appends the
/// implicit `TRIGGER` input.

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, sync::Arc};

use crate::error::{GraphError, Result};
use crate::graph::types::NodeId;
use crate::node::info::{InputDecl, InputInfo, OutputDecl, OutputInfo, TRIGGER};
use crate::node::instance::{Node, NodeBehavior, NodeCore};
use crate::node::managed::ManagedNodeDescriptor;
use crate::types::{TypeRegistry, OBJECT};

/// Creates a fresh behavior for each spawned instance
pub type BehaviorFactory = Arc<dyn Fn() -> Box<dyn NodeBehavior> + Send + Sync>;

/// Where a class declaration came from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassOrigin {
    Builtin,
    Managed { descriptor: ManagedNodeDescriptor },
    /// Synthesized at load time from a record marked dynamic
    Dynamic,
}

/// Type-level declaration of a node
#[derive(Clone)]
pub struct NodeClass {
    pub name: String,
    pub parent: Option<String>,
    pub tags: Vec<String>,
    pub inputs: Vec<InputDecl>,
    pub outputs: Vec<OutputDecl>,
    pub is_abstract: bool,
    /// Control input waits for every converging edge (multiConn = fan-in)
    pub waits_for_all_controls: bool,
    pub origin: ClassOrigin,
    factory: Option<BehaviorFactory>,
}

impl fmt::Debug for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeClass")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("is_abstract", &self.is_abstract)
            .finish()
    }
}

impl NodeClass {
    pub fn builder(name: &str) -> NodeClassBuilder {
        NodeClassBuilder::new(name)
    }

    pub fn input(&self, name: &str) -> Option<&InputDecl> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&OutputDecl> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    pub fn is_managed(&self) -> bool {
        matches!(self.origin, ClassOrigin::Managed { .. })
    }

    /// Build a node instance with freshly resolved pins
    pub fn instantiate(&self, id: NodeId, types: &TypeRegistry) -> Result<Node> {
        if self.is_abstract {
            return Err(GraphError::AbstractNodeClass(self.name.clone()));
        }
        let factory = self
            .factory
            .as_ref()
            .ok_or_else(|| GraphError::AbstractNodeClass(self.name.clone()))?;

        let label = format!("{}({})", self.name, id);
        let mut inputs = Vec::with_capacity(self.inputs.len());
        for decl in &self.inputs {
            inputs.push(InputInfo::new(decl, types.resolve(&decl.var_type)?, &label));
        }
        if inputs.len() == 2 {
            inputs[1].set_pure();
        }
        let mut outputs = Vec::with_capacity(self.outputs.len());
        for decl in &self.outputs {
            outputs.push(OutputInfo::new(decl, types.resolve(&decl.var_type)?));
        }

        let core = NodeCore::new(id, &self.name, inputs, outputs);
        let mut node = Node::new(core, factory(), self.waits_for_all_controls);
        node.setup()?;
        Ok(node)
    }
}

/// Builder for `NodeClass`
pub struct NodeClassBuilder {
    name: String,
    parent: Option<String>,
    tags: Vec<String>,
    inputs: Vec<InputDecl>,
    outputs: Vec<OutputDecl>,
    inherited_inputs: Vec<InputDecl>,
    inherited_outputs: Vec<OutputDecl>,
    is_abstract: bool,
    waits_for_all_controls: bool,
    origin: ClassOrigin,
    factory: Option<BehaviorFactory>,
}

impl NodeClassBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            tags: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            inherited_inputs: Vec::new(),
            inherited_outputs: Vec::new(),
            is_abstract: false,
            waits_for_all_controls: false,
            origin: ClassOrigin::Builtin,
            factory: None,
        }
    }

    /// Inherit declarations and tags from a parent class
    pub fn extends(mut self, parent: &NodeClass) -> Self {
        self.parent = Some(parent.name.clone());
        self.inherited_inputs = parent
            .inputs
            .iter()
            .filter(|i| i.name != TRIGGER)
            .cloned()
            .collect();
        self.inherited_outputs = parent.outputs.clone();
        for tag in &parent.tags {
            if !self.tags.contains(tag) {
                self.tags.push(tag.clone());
            }
        }
        self.waits_for_all_controls |= parent.waits_for_all_controls;
        self
    }

    pub fn input(mut self, decl: InputDecl) -> Self {
        self.inputs.push(decl);
        self
    }

    pub fn output(mut self, decl: OutputDecl) -> Self {
        self.outputs.push(decl);
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn abstract_class(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn waits_for_all_controls(mut self) -> Self {
        self.waits_for_all_controls = true;
        self
    }

    pub fn origin(mut self, origin: ClassOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn behavior<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn NodeBehavior> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn behavior_factory(mut self, factory: BehaviorFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Merge own and inherited declarations.
    ///
    /// Own declarations come first and shadow inherited ones of the same name;
    /// `TRIGGER` is always last.
    pub fn build(self) -> Result<NodeClass> {
        let mut inputs: Vec<InputDecl> = Vec::new();
        for decl in self.inputs.into_iter().chain(self.inherited_inputs) {
            if decl.name == TRIGGER || inputs.iter().any(|i| i.name == decl.name) {
                continue;
            }
            inputs.push(decl);
        }
        inputs.push(InputDecl::new(TRIGGER, OBJECT).optional());

        let mut outputs: Vec<OutputDecl> = Vec::new();
        for decl in self.outputs.into_iter().chain(self.inherited_outputs) {
            if !outputs.iter().any(|o| o.name == decl.name) {
                outputs.push(decl);
            }
        }

        if !self.is_abstract && self.factory.is_none() {
            return Err(GraphError::ManagedNode(format!(
                "class '{}' has no behavior",
                self.name
            )));
        }

        Ok(NodeClass {
            name: self.name,
            parent: self.parent,
            tags: self.tags,
            inputs,
            outputs,
            is_abstract: self.is_abstract,
            waits_for_all_controls: self.waits_for_all_controls,
            origin: self.origin,
            factory: self.factory,
        })
    }
}

/// Name-indexed view used by registries
pub type ClassMap = HashMap<String, Arc<NodeClass>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::instance::PassiveBehavior;

    fn base() -> NodeClass {
        NodeClass::builder("Base")
            .input(InputDecl::new("Start", "object"))
            .input(InputDecl::new("Control", "object"))
            .output(OutputDecl::new("Final", "object"))
            .tag("control")
            .abstract_class()
            .build()
            .unwrap()
    }

    #[test]
    fn own_declarations_shadow_inherited_ones() {
        let class = NodeClass::builder("Loop")
            .extends(&base())
            .input(InputDecl::new("Start", "object").list())
            .output(OutputDecl::new("Item", "object"))
            .behavior(|| Box::new(PassiveBehavior))
            .build()
            .unwrap();
        let names: Vec<_> = class.inputs.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Start", "Control", "TRIGGER"]);
        assert!(class.input("Start").unwrap().list);
        let outputs: Vec<_> = class.outputs.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(outputs, vec!["Item", "Final"]);
        assert!(class.has_tag("Control"));
    }

    #[test]
    fn abstract_classes_cannot_be_spawned() {
        let types = TypeRegistry::with_builtins();
        let err = base().instantiate(1, &types).unwrap_err();
        assert!(matches!(err, GraphError::AbstractNodeClass(_)));
    }

    #[test]
    fn two_input_classes_get_a_pure_second_input() {
        let types = TypeRegistry::with_builtins();
        let class = NodeClass::builder("Single")
            .input(InputDecl::new("Value", "int"))
            .behavior(|| Box::new(PassiveBehavior))
            .build()
            .unwrap();
        let node = class.instantiate(4, &types).unwrap();
        assert_eq!(node.core.inputs().len(), 2);
        assert_eq!(node.core.inputs()[1].state().pure, 1);
        assert_eq!(node.core.inputs()[0].state().pure, 0);
    }

    #[test]
    fn unknown_pin_types_are_rejected_at_spawn() {
        let types = TypeRegistry::with_builtins();
        let class = NodeClass::builder("Odd")
            .input(InputDecl::new("Value", "matrix"))
            .behavior(|| Box::new(PassiveBehavior))
            .build()
            .unwrap();
        assert!(matches!(
            class.instantiate(1, &types),
            Err(GraphError::UnknownType(_))
        ));
    }
}
