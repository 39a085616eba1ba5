/// Node layer: pins, classes, instances and the builtin library
///
/// - `info`: per-pin runtime state and availability rules
/// - `class`: type-level node declarations
/// - `instance`: the check/run/notify state machine
/// - `managed`: Lua-scripted node classes defined at runtime
/// - `library`: control-flow and builtin nodes

pub mod class;
pub mod info;
pub mod instance;
pub mod library;
pub mod managed;

pub use class::{ClassOrigin, NodeClass, NodeClassBuilder};
pub use info::{InputDecl, InputInfo, InputState, OutputDecl, OutputInfo, CONTROL, TRIGGER};
pub use instance::{Emission, ExecContext, Node, NodeBehavior, NodeCore, Outbox, PassiveBehavior};
pub use managed::ManagedNodeDescriptor;
