/// Remote session: the graph owner's view of a remote execution
///
/// Wraps a [`RunnerClient`] with the bookkeeping an editor needs: which
/// nodes ran and when, which are running now, the last requested node
/// report and the return value once execution finishes.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

use crate::config::Config;
use crate::graph::dataflow::Graph;
use crate::graph::types::NodeId;
use crate::protocol::client::RunnerClient;
use crate::protocol::command::{Command, Response, ReturnReport};
use crate::runtime::scheduler::RuntimeOptions;

#[derive(Debug)]
pub struct RemoteSession {
    client: RunnerClient,
    window: Duration,
    history: Vec<(NodeId, DateTime<Utc>)>,
    running: Vec<NodeId>,
    report_target: Option<NodeId>,
    report: Option<Value>,
    returned: Option<ReturnReport>,
}

impl RemoteSession {
    pub fn new(client: RunnerClient, window: Duration) -> Self {
        Self {
            client,
            window,
            history: Vec::new(),
            running: Vec::new(),
            report_target: None,
            report: None,
            returned: None,
        }
    }

    /// Connect to the interpreter named in `config`
    pub async fn connect(config: &Config) -> Self {
        let client = RunnerClient::connect(&config.interpreter.address(), &config.client).await;
        Self::new(client, config.engine.history_window())
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    async fn acked(&mut self, command: Command) -> bool {
        match self.client.send(&command).await {
            Some(Response::Ack(_)) => true,
            Some(Response::Error(message)) => {
                tracing::warn!("⚠️ Interpreter rejected {}: {}", command, message);
                false
            }
            Some(other) => {
                tracing::warn!("⚠️ Unexpected answer to {}: {:?}", command, other);
                false
            }
            None => false,
        }
    }

    /// Replace the remote graph; clears local history and stored values
    pub async fn push(&mut self, graph: &Graph) -> bool {
        graph.values().clear_stored();
        self.history.clear();
        self.running.clear();
        self.returned = None;
        self.acked(Command::Pause).await && self.acked(Command::Push(graph.serialize())).await
    }

    pub async fn update(&mut self, graph: &Graph) -> bool {
        self.returned = None;
        self.acked(Command::Pause).await && self.acked(Command::Update(graph.serialize())).await
    }

    pub async fn pause(&mut self) -> bool {
        self.acked(Command::Pause).await
    }

    pub async fn unpause(&mut self) -> bool {
        self.acked(Command::Unpause).await
    }

    pub async fn step(&mut self) -> bool {
        self.acked(Command::Step).await
    }

    pub async fn goto(&mut self, id: NodeId) -> bool {
        self.acked(Command::Goto(id)).await
    }

    pub async fn drop_graph(&mut self) -> bool {
        self.acked(Command::Drop).await
    }

    pub async fn kill(&mut self) -> bool {
        self.acked(Command::Kill).await
    }

    pub async fn configure(&mut self, options: &RuntimeOptions) -> bool {
        self.acked(Command::Configure(options.to_value())).await
    }

    /// Ask for `id`'s report with every following status poll
    pub fn request_report(&mut self, id: NodeId) {
        self.report_target = Some(id);
    }

    pub async fn request_status(&mut self) -> Option<Response> {
        self.client.send(&Command::Status(self.report_target)).await
    }

    /// Poll status and fold it into local state; true when something changed
    pub async fn needs_update(&mut self) -> bool {
        let outcome = self.poll().await;
        self.prune_history();
        outcome
    }

    async fn poll(&mut self) -> bool {
        match self.request_status().await {
            Some(Response::Status(status)) => {
                let now = Utc::now();
                let changed = !status.ran.is_empty() || status.running != self.running;
                self.history.extend(status.ran.into_iter().map(|id| (id, now)));
                self.running = status.running;
                if self.report_target.is_some() {
                    self.report = Some(status.report);
                }
                changed
            }
            Some(Response::Return(report)) => {
                let changed = self.returned.as_ref() != Some(&report);
                if changed {
                    tracing::info!("🏁 Remote execution returned {} from {:?}", report.value, report.node);
                }
                self.running.clear();
                self.returned = Some(report);
                changed
            }
            Some(Response::Error(message)) => {
                tracing::warn!("⚠️ Status poll failed: {}", message);
                false
            }
            Some(Response::Ack(_)) | None => false,
        }
    }

    /// Drop entries older than the window, keeping the most recent one
    fn prune_history(&mut self) {
        let Some(cutoff) = chrono::Duration::from_std(self.window).ok().map(|w| Utc::now() - w) else {
            return;
        };
        let last = self.history.len().saturating_sub(1);
        let mut index = 0;
        self.history.retain(|(_, at)| {
            let keep = index == last || *at >= cutoff;
            index += 1;
            keep
        });
    }

    /// Recently executed nodes with their age in seconds, newest last
    ///
    /// Entries older than the window are left out, except the most recent one.
    pub fn execution_history(&self) -> Vec<(NodeId, f64)> {
        let now = Utc::now();
        let age = |at: &DateTime<Utc>| (now - *at).to_std().unwrap_or_default();
        let last = self.history.len().checked_sub(1);
        self.history
            .iter()
            .enumerate()
            .filter(|(i, (_, at))| Some(*i) == last || age(at) <= self.window)
            .map(|(_, (id, at))| (*id, age(at).as_secs_f64()))
            .collect()
    }

    /// Push, configure and start the remote execution
    pub async fn execute(&mut self, graph: &Graph, options: &RuntimeOptions) -> bool {
        self.push(graph).await && self.configure(options).await && self.unpause().await
    }

    pub fn running_nodes(&self) -> &[NodeId] {
        &self.running
    }

    pub fn take_report(&mut self) -> Option<Value> {
        self.report.take()
    }

    pub fn returned(&self) -> Option<&ReturnReport> {
        self.returned.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;

    fn offline() -> RemoteSession {
        let config = ClientConfig {
            connect_timeout_ms: 100,
            ack_timeout_ms: 100,
        };
        RemoteSession::new(RunnerClient::disconnected("127.0.0.1:1", &config), Duration::from_secs(15))
    }

    #[tokio::test]
    async fn offline_session_degrades_quietly() {
        let mut session = offline();
        assert!(!session.pause().await);
        assert!(!session.step().await);
        assert!(!session.needs_update().await);
        assert!(session.request_status().await.is_none());
        assert!(!session.is_connected());
        assert!(session.execution_history().is_empty());
    }

    #[test]
    fn history_keeps_the_latest_entry_past_the_window() {
        let mut session = offline();
        session.window = Duration::from_secs(1);
        let old = Utc::now() - chrono::Duration::seconds(30);
        session.history = vec![(1, old), (2, old)];
        let history = session.execution_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].0, 2);
        assert!(history[0].1 >= 29.0);

        session.history.push((3, Utc::now()));
        let ids: Vec<NodeId> = session.execution_history().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[tokio::test]
    async fn polling_prunes_stored_history() {
        let mut session = offline();
        session.window = Duration::from_secs(1);
        let old = Utc::now() - chrono::Duration::hours(1);
        session.history = (0..10_000).map(|id| (id, old)).collect();

        session.needs_update().await;
        assert_eq!(session.history.len(), 1);
        assert_eq!(session.history[0].0, 9_999);

        session.history.push((42, Utc::now()));
        session.needs_update().await;
        let ids: Vec<NodeId> = session.history.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![42]);
    }
}
