/// Graph-owner side of the remote channel
///
/// Sends one command at a time and waits for its response. Any transport
/// failure or an acknowledgement that does not arrive in time drops the
/// stream; from then on every send is a no-op returning `None` until a new
/// client is connected.

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::ClientConfig;
use crate::protocol::command::{read_frame, write_frame, Command, Response};

#[derive(Debug)]
pub struct RunnerClient {
    address: String,
    config: ClientConfig,
    stream: Option<TcpStream>,
}

impl RunnerClient {
    /// Connect to an interpreter; failure yields a disconnected client
    pub async fn connect(address: &str, config: &ClientConfig) -> Self {
        let stream = match timeout(config.connect_timeout(), TcpStream::connect(address)).await {
            Ok(Ok(stream)) => {
                tracing::info!("🔌 Connected to interpreter at {}", address);
                Some(stream)
            }
            Ok(Err(e)) => {
                tracing::warn!("⚠️ Could not connect to {}: {}", address, e);
                None
            }
            Err(_) => {
                tracing::warn!("⚠️ Connecting to {} timed out", address);
                None
            }
        };
        Self {
            address: address.to_string(),
            config: config.clone(),
            stream,
        }
    }

    /// A client that never had a connection
    pub fn disconnected(address: &str, config: &ClientConfig) -> Self {
        Self {
            address: address.to_string(),
            config: config.clone(),
            stream: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send `command` and wait for its response
    ///
    /// Taking `&mut self` keeps exactly one command in flight.
    pub async fn send(&mut self, command: &Command) -> Option<Response> {
        let stream = self.stream.as_mut()?;

        let text = match command.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("❌ Cannot encode {}: {}", command, e);
                return None;
            }
        };

        let ack_timeout = self.config.ack_timeout();
        let exchange = async {
            write_frame(&mut *stream, &text).await?;
            read_frame(&mut *stream).await
        };

        match timeout(ack_timeout, exchange).await {
            Ok(Ok(Some(reply))) => match Response::parse(&reply) {
                Ok(response) => Some(response),
                Err(e) => {
                    tracing::warn!("⚠️ Unreadable response to {}: {}", command, e);
                    None
                }
            },
            Ok(Ok(None)) => self.disconnect(format!("interpreter closed the channel during {}", command)),
            Ok(Err(e)) => self.disconnect(format!("{} failed: {}", command, e)),
            Err(_) => self.disconnect(format!("no acknowledgement for {} within {:?}", command, ack_timeout)),
        }
    }

    fn disconnect(&mut self, reason: String) -> Option<Response> {
        tracing::warn!("🔌 Disconnected from {}: {}", self.address, reason);
        self.stream = None;
        None
    }
}
