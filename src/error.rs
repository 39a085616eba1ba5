/// Error taxonomy for the dataflow engine
///
/// Library operations return `crate::Result<T>`. The server and interpreter loop
/// wrap these in `anyhow` at the application edge.

use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised by pins, nodes, the graph and the remote protocol
#[derive(Error, Debug)]
pub enum GraphError {
    /// A pin was read before a value or usable default was present
    #[error("input '{input}' of node {node} is not available")]
    InputNotAvailable { node: String, input: String },

    /// A second non-override write hit a single-producer input
    #[error("input '{input}' of node {node} is already set")]
    InputAlreadySet { node: String, input: String },

    /// Connecting two pins whose declared types are not compatible
    #[error("cannot connect {output} ({output_type}) to {input} ({input_type})")]
    TypeMismatch {
        output: String,
        output_type: String,
        input: String,
        input_type: String,
    },

    #[error("unknown node class '{0}'")]
    UnknownNodeClass(String),

    #[error("node class '{0}' is abstract and cannot be spawned")]
    AbstractNodeClass(String),

    /// A managed node's behavior failed to install; maps method name to error
    #[error("failed to install managed node '{class}': {}", format_method_errors(.errors))]
    NodeUpdate {
        class: String,
        errors: BTreeMap<String, String>,
    },

    #[error("managed node error: {0}")]
    ManagedNode(String),

    #[error("unknown node id {0}")]
    UnknownNode(u64),

    #[error("node id {0} is already in use")]
    DuplicateNode(u64),

    #[error("unknown pin '{0}'")]
    UnknownPin(String),

    #[error("invalid pin id '{0}'")]
    InvalidPinId(String),

    #[error("invalid value for '{pin}': {reason}")]
    InvalidValue { pin: String, reason: String },

    #[error("unknown variable type '{0}'")]
    UnknownType(String),

    /// A node's run body failed
    #[error("node {node} failed: {message}")]
    NodeRun { node: String, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_method_errors(errors: &BTreeMap<String, String>) -> String {
    errors
        .iter()
        .map(|(method, error)| format!("{}: {}", method, error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl GraphError {
    /// Shorthand for node body failures
    pub fn node_run(node: impl Into<String>, message: impl ToString) -> Self {
        GraphError::NodeRun {
            node: node.into(),
            message: message.to_string(),
        }
    }
}

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, GraphError>;
