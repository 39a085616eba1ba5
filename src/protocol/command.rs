/// Remote control commands, responses and framing
///
/// Commands are ASCII verbs with an optional payload glued to the verb
/// (`PUSH<json>`, `GOTO<id>`, `STATUS***<id>`). Responses are JSON objects.
/// Both directions travel as frames: a 4-byte big-endian length followed by
/// the UTF-8 payload.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{GraphError, Result};
use crate::graph::types::{GraphSnapshot, NodeId};

/// Largest frame either side accepts
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const STATUS_PREFIX: &str = "STATUS***";

/// One command sent from the graph owner to the interpreter
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Pause,
    Unpause,
    Step,
    /// Replace the remote graph wholesale
    Push(GraphSnapshot),
    /// Reconcile the remote graph with a new snapshot
    Update(GraphSnapshot),
    /// Poll status, optionally with a report of one node
    Status(Option<NodeId>),
    /// Runtime options map
    Configure(Value),
    Goto(NodeId),
    Drop,
    Kill,
}

impl Command {
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Pause => "PAUSE",
            Command::Unpause => "UNPAUSE",
            Command::Step => "STEP",
            Command::Push(_) => "PUSH",
            Command::Update(_) => "UPDATE",
            Command::Status(_) => "STATUS",
            Command::Configure(_) => "CONFIGURE",
            Command::Goto(_) => "GOTO",
            Command::Drop => "DROP",
            Command::Kill => "KILL",
        }
    }

    /// Wire text of the command
    pub fn encode(&self) -> Result<String> {
        Ok(match self {
            Command::Push(snapshot) => format!("PUSH{}", snapshot.to_json()?),
            Command::Update(snapshot) => format!("UPDATE{}", snapshot.to_json()?),
            Command::Status(target) => match target {
                Some(id) => format!("{}{}", STATUS_PREFIX, id),
                None => STATUS_PREFIX.to_string(),
            },
            Command::Configure(options) => format!("CONFIGURE{}", serde_json::to_string(options)?),
            Command::Goto(id) => format!("GOTO{}", id),
            other => other.verb().to_string(),
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        match text {
            "PAUSE" => return Ok(Command::Pause),
            "UNPAUSE" => return Ok(Command::Unpause),
            "STEP" => return Ok(Command::Step),
            "DROP" => return Ok(Command::Drop),
            "KILL" => return Ok(Command::Kill),
            "STATUS" => return Ok(Command::Status(None)),
            _ => {}
        }

        if let Some(target) = text.strip_prefix(STATUS_PREFIX) {
            let target = target.trim();
            return if target.is_empty() {
                Ok(Command::Status(None))
            } else {
                Ok(Command::Status(Some(parse_id(target)?)))
            };
        }
        if let Some(payload) = text.strip_prefix("CONFIGURE") {
            return Ok(Command::Configure(serde_json::from_str(payload)?));
        }
        if let Some(payload) = text.strip_prefix("UPDATE") {
            return Ok(Command::Update(GraphSnapshot::from_json(payload)?));
        }
        if let Some(payload) = text.strip_prefix("PUSH") {
            return Ok(Command::Push(GraphSnapshot::from_json(payload)?));
        }
        if let Some(target) = text.strip_prefix("GOTO") {
            return Ok(Command::Goto(parse_id(target.trim())?));
        }

        let verb: String = text.chars().take(16).collect();
        Err(GraphError::Protocol(format!("unknown command '{}'", verb)))
    }
}

fn parse_id(text: &str) -> Result<NodeId> {
    text.parse()
        .map_err(|_| GraphError::Protocol(format!("invalid node id '{}'", text)))
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Status(Some(id)) | Command::Goto(id) => write!(f, "{} {}", self.verb(), id),
            Command::Push(s) | Command::Update(s) => write!(f, "{} ({} nodes)", self.verb(), s.len()),
            other => f.write_str(other.verb()),
        }
    }
}

/// Value returned by a finished execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnReport {
    pub value: Value,
    pub node: Option<NodeId>,
    pub priority: i64,
}

/// Progress of the remote execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Nodes that completed since the previous poll
    pub ran: Vec<NodeId>,
    /// Nodes currently inside run+notify
    pub running: Vec<NodeId>,
    #[serde(default)]
    pub paused: bool,
    /// Report of the requested node, `{}` when none was requested
    #[serde(skip)]
    pub report: Value,
}

/// Interpreter answer to one command
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ack(String),
    Error(String),
    Status(StatusReport),
    Return(ReturnReport),
}

impl Response {
    pub fn ack(command: &Command) -> Self {
        Response::Ack(command.verb().to_string())
    }

    pub fn to_json(&self) -> Result<Value> {
        Ok(match self {
            Response::Ack(verb) => json!({ "ACK": verb }),
            Response::Error(message) => json!({ "ERROR": message }),
            Response::Status(status) => json!({
                "STATUS": serde_json::to_value(status)?,
                "REPORT": status.report,
            }),
            Response::Return(report) => json!({
                "STATUS": "RETURN",
                "REPORT": serde_json::to_value(report)?,
            }),
        })
    }

    pub fn encode(&self) -> Result<String> {
        Ok(self.to_json()?.to_string())
    }

    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let object = value
            .as_object()
            .ok_or_else(|| GraphError::Protocol("response is not an object".into()))?;

        if let Some(verb) = object.get("ACK") {
            return Ok(Response::Ack(verb.as_str().unwrap_or_default().to_string()));
        }
        if let Some(message) = object.get("ERROR") {
            let message = match message {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Ok(Response::Error(message));
        }

        let report = object.get("REPORT").cloned().unwrap_or_else(|| json!({}));
        match object.get("STATUS") {
            Some(Value::String(s)) if s == "RETURN" => Ok(Response::Return(serde_json::from_value(report)?)),
            Some(status @ Value::Object(_)) => {
                let mut status: StatusReport = serde_json::from_value(status.clone())?;
                status.report = report;
                Ok(Response::Status(status))
            }
            _ => Err(GraphError::Protocol(format!("unrecognised response {}", value))),
        }
    }
}

/// Write one length-prefixed frame
pub async fn write_frame<W>(writer: &mut W, payload: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = payload.as_bytes();
    if bytes.len() > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds the limit", bytes.len()),
        ));
    }
    writer.write_u32(bytes.len() as u32).await?;
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Read one frame; `None` when the peer closed the stream between frames
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds the limit", len),
        ));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf)
        .map(Some)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
