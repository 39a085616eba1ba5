/// Configuration management for pinflow
///
/// Handles the interpreter server address, remote client timeouts, engine
/// limits and the managed node library location.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Interpreter server configuration
    pub interpreter: InterpreterConfig,
    /// Remote client configuration
    pub client: ClientConfig,
    /// Execution engine configuration
    pub engine: EngineConfig,
    /// Node library configuration
    pub library: LibraryConfig,
}

/// Interpreter server bind address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterConfig {
    /// Bind address (e.g., "127.0.0.1")
    pub host: String,
    pub port: u16,
}

impl InterpreterConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Timeouts of the graph-owner side of the remote channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub connect_timeout_ms: u64,
    /// Bounded wait for a command acknowledgement; on expiry the client disconnects
    pub ack_timeout_ms: u64,
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: env_or("PINFLOW_CONNECT_TIMEOUT_MS", 2000),
            ack_timeout_ms: env_or("PINFLOW_ACK_TIMEOUT_MS", 5000),
        }
    }
}

/// Execution engine limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Sweep limit for in-process execution (None = run to a fixed point)
    pub max_sweeps: Option<usize>,
    /// How long executed nodes stay in the remote execution history
    pub history_window_secs: u64,
}

impl EngineConfig {
    pub fn history_window(&self) -> Duration {
        Duration::from_secs(self.history_window_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_sweeps: std::env::var("PINFLOW_MAX_SWEEPS").ok().and_then(|v| v.parse().ok()),
            history_window_secs: env_or("PINFLOW_HISTORY_WINDOW_SECS", 15),
        }
    }
}

/// Where managed (scripted) node classes are persisted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryConfig {
    pub managed_nodes_path: Option<String>,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            interpreter: InterpreterConfig {
                host: std::env::var("PINFLOW_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: env_or("PINFLOW_PORT", 8079),
            },
            client: ClientConfig::default(),
            engine: EngineConfig::default(),
            library: LibraryConfig {
                managed_nodes_path: std::env::var("PINFLOW_MANAGED_NODES").ok(),
            },
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = Config::default();
        assert!(!config.interpreter.host.is_empty());
        assert!(config.client.ack_timeout_ms > 0);
        assert!(config.interpreter.address().contains(':'));
    }

    #[test]
    fn config_serializes_round_trip() {
        let config = Config::default();
        let text = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&text).unwrap();
        assert_eq!(back.interpreter.port, config.interpreter.port);
        assert_eq!(back.engine.history_window_secs, config.engine.history_window_secs);
    }
}
