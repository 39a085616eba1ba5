/// Remote execution protocol
///
/// The interpreter process owns node execution; the graph owner observes it
/// with `STATUS` and steers it with control verbs over a framed TCP stream.

// Wire commands, responses and length-prefixed framing
pub mod command;

// One-command-at-a-time client with disconnect degradation
pub mod client;

// Graph-owner bookkeeping: history, running nodes, reports, return value
pub mod session;

pub use client::RunnerClient;
pub use command::{Command, Response, ReturnReport, StatusReport};
pub use session::RemoteSession;
