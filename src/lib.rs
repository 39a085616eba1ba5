/// pinflow: typed dataflow graph engine
///
/// Nodes with typed input/output pins are wired into a graph and executed by
/// a fixed-point sweep scheduler. Control-flow nodes implement branching and
/// iteration through loop levels and a multi-edge `Control` input. Graphs can
/// be saved, loaded and executed in a remote interpreter process steered over
/// a small framed TCP protocol.

// Core configuration and setup
pub mod config;

// Error taxonomy shared by every layer
pub mod error;

// Type registry - declared pin types, coercion and compatibility
pub mod types;

// Node layer - pins, classes, instances, managed nodes and the builtin library
pub mod node;

// Graph layer - topology, value stores, registry and persistence
pub mod graph;

// Runtime execution - sweep scheduler, node executor and remote interpreter
pub mod runtime;

// Remote execution protocol - commands, client and session
pub mod protocol;

// Interpreter server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{GraphError, Result};
pub use graph::{Connection, Graph, GraphSnapshot, NodeId, NodeRegistry};
pub use runtime::{ExecutionEngine, Interpreter, NodeExecutor, RuntimeOptions};
pub use server::start_server;
