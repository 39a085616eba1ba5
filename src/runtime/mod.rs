/// Runtime execution
///
/// This module drives graphs. It handles:
/// - In-process sweep scheduling to a fixed point
/// - The run+notify span of one node and value delivery along edges
/// - Concurrent dispatch of nodes onto tokio's blocking pool
/// - The remote interpreter state machine behind the wire protocol

// Sweep scheduler and hard-cycle analysis
pub mod engine;

// Individual node execution and concurrent dispatch
pub mod executor;

// Remote interpreter: pause, step, goto, push, update, status
pub mod scheduler;

// Re-export main types
pub use engine::{ExecutionEngine, ExecutionSummary};
pub use executor::{NodeExecutor, StepOutcome};
pub use scheduler::{Interpreter, RuntimeOptions};
