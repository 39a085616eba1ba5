/// Hot-swappable node class registry using ArcSwap
///
/// The registry is an explicit object injected into every `Graph` and loader.
/// Readers take lock-free snapshots; every install or removal clones the class
/// map and swaps the pointer, so graphs that are mid-execution keep working
/// against the classes they resolved.

use arc_swap::ArcSwap;
use serde_json::Value;
use std::{collections::HashMap, path::Path, sync::Arc};

use crate::error::{GraphError, Result};
use crate::graph::types::{NodeId, PinRecord};
use crate::node::class::{ClassMap, ClassOrigin, NodeClass};
use crate::node::info::{InputDecl, OutputDecl, TRIGGER};
use crate::node::instance::{Node, PassiveBehavior};
use crate::node::library;
use crate::node::managed::{LuaBehavior, ManagedNodeDescriptor};
use crate::types::{TypeRegistry, OBJECT};

/// Registry of node classes and variable types
#[derive(Debug)]
pub struct NodeRegistry {
    /// Key: class name
    classes: ArcSwap<ClassMap>,
    types: ArcSwap<TypeRegistry>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

impl NodeRegistry {
    /// Registry with builtin variable types and no node classes
    pub fn empty() -> Self {
        Self {
            classes: ArcSwap::new(Arc::new(HashMap::new())),
            types: ArcSwap::new(Arc::new(TypeRegistry::with_builtins())),
        }
    }

    /// Registry preloaded with the control-flow and builtin node library
    pub fn with_builtins() -> Result<Self> {
        let registry = Self::empty();
        library::register_builtin_nodes(&registry)?;
        tracing::info!(
            "📚 Node registry initialized with {} classes",
            registry.classes.load().len()
        );
        Ok(registry)
    }

    /// Snapshot of the current type registry
    pub fn types(&self) -> Arc<TypeRegistry> {
        self.types.load_full()
    }

    /// Register a domain variable type
    pub fn register_type<F>(&self, name: &str, parent: Option<&str>, validator: F) -> Result<()>
    where
        F: Fn(&Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        let mut types = (**self.types.load()).clone();
        types.register(name, parent, validator)?;
        self.types.store(Arc::new(types));
        Ok(())
    }

    fn check_types(&self, class: &NodeClass) -> Result<()> {
        let types = self.types.load();
        for name in class
            .inputs
            .iter()
            .map(|i| &i.var_type)
            .chain(class.outputs.iter().map(|o| &o.var_type))
        {
            if !types.contains(name) {
                return Err(GraphError::UnknownType(name.clone()));
            }
        }
        Ok(())
    }

    /// Add or replace a class
    pub fn register(&self, class: NodeClass) -> Result<Arc<NodeClass>> {
        self.check_types(&class)?;
        let class = Arc::new(class);
        let current = self.classes.load();
        let mut updated = (**current).clone();
        updated.insert(class.name.clone(), Arc::clone(&class));
        self.classes.store(Arc::new(updated));
        tracing::debug!("➕ Registered node class '{}'", class.name);
        Ok(class)
    }

    pub fn get(&self, name: &str) -> Option<Arc<NodeClass>> {
        self.classes.load().get(name).cloned()
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<NodeClass>> {
        self.get(name)
            .ok_or_else(|| GraphError::UnknownNodeClass(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.load().contains_key(name)
    }

    /// Sorted names of every class
    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.load().keys().cloned().collect();
        names.sort();
        names
    }

    /// Sorted names of concrete classes carrying `tag`
    pub fn classes_with_tag(&self, tag: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .classes
            .load()
            .values()
            .filter(|c| !c.is_abstract && c.has_tag(tag))
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Instantiate a class under `id`
    pub fn spawn(&self, class_name: &str, id: NodeId) -> Result<Node> {
        let class = self.resolve(class_name)?;
        class.instantiate(id, &self.types.load())
    }

    /// Install or update a managed node class.
    ///
    /// Every script body must compile; builtin classes cannot be replaced.
    pub fn install_managed(&self, descriptor: ManagedNodeDescriptor) -> Result<Arc<NodeClass>> {
        if let Some(existing) = self.get(&descriptor.name) {
            if matches!(existing.origin, ClassOrigin::Builtin) {
                return Err(GraphError::ManagedNode(format!(
                    "'{}' is a builtin class and cannot be replaced",
                    descriptor.name
                )));
            }
        }
        descriptor.validate()?;

        let mut builder = NodeClass::builder(&descriptor.name);
        if let Some(base) = &descriptor.base_class {
            let parent = self.resolve(base)?;
            builder = builder.extends(&parent);
        }
        for input in &descriptor.inputs {
            builder = builder.input(input.clone());
        }
        for output in &descriptor.outputs {
            builder = builder.output(output.clone());
        }
        for tag in &descriptor.tags {
            builder = builder.tag(tag);
        }
        let shared = Arc::new(descriptor.clone());
        let class = builder
            .origin(ClassOrigin::Managed { descriptor })
            .behavior(move || Box::new(LuaBehavior::new(Arc::clone(&shared))))
            .build()?;

        let class = self.register(class)?;
        tracing::info!("🔧 Installed managed node class '{}'", class.name);
        Ok(class)
    }

    /// Remove a managed or dynamic class
    pub fn remove_managed(&self, name: &str) -> Result<()> {
        let existing = self.resolve(name)?;
        if matches!(existing.origin, ClassOrigin::Builtin) {
            return Err(GraphError::ManagedNode(format!(
                "'{}' is a builtin class and cannot be removed",
                name
            )));
        }
        let current = self.classes.load();
        let mut updated = (**current).clone();
        updated.remove(name);
        self.classes.store(Arc::new(updated));
        tracing::info!("🗑️ Removed node class '{}'", name);
        Ok(())
    }

    /// Descriptors of every installed managed class, sorted by name
    pub fn managed_descriptors(&self) -> Vec<ManagedNodeDescriptor> {
        let mut descriptors: Vec<ManagedNodeDescriptor> = self
            .classes
            .load()
            .values()
            .filter_map(|c| match &c.origin {
                ClassOrigin::Managed { descriptor } => Some(descriptor.clone()),
                _ => None,
            })
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Install every descriptor found in a `name:::json` file.
    ///
    /// Bad lines are logged and skipped; returns the number installed.
    pub fn load_managed_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let mut installed = 0;
        for (number, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match ManagedNodeDescriptor::from_line(line).and_then(|d| self.install_managed(d)) {
                Ok(_) => installed += 1,
                Err(e) => tracing::error!(
                    "❌ Skipping managed node on line {} of {}: {}",
                    number + 1,
                    path.as_ref().display(),
                    e
                ),
            }
        }
        Ok(installed)
    }

    pub fn save_managed_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut lines = Vec::new();
        for descriptor in self.managed_descriptors() {
            lines.push(descriptor.to_line()?);
        }
        std::fs::write(path, lines.join("\n"))?;
        Ok(())
    }

    /// Synthesize a passive class from persisted pin records
    pub fn register_dynamic(
        &self,
        name: &str,
        inputs: &[PinRecord],
        outputs: &[PinRecord],
    ) -> Result<Arc<NodeClass>> {
        let types = self.types.load();
        let known = |type_name: &str| {
            if types.contains(type_name) {
                type_name.to_string()
            } else {
                OBJECT.to_string()
            }
        };
        let mut builder = NodeClass::builder(name)
            .origin(ClassOrigin::Dynamic)
            .tag("dynamic")
            .behavior(|| Box::new(PassiveBehavior));
        for pin in inputs.iter().filter(|p| p.name() != TRIGGER) {
            builder = builder.input(InputDecl::new(pin.name(), &known(pin.type_name())));
        }
        for pin in outputs {
            builder = builder.output(OutputDecl::new(pin.name(), &known(pin.type_name())));
        }
        let class = self.register(builder.build()?)?;
        tracing::warn!("🧬 Synthesized dynamic node class '{}'", name);
        Ok(class)
    }
}
