/// Node executor
///
/// Owns the run+notify span of a single node: check, run, notify into an
/// outbox, then deliver the emissions to downstream inputs. Failures are
/// caught here, logged against the node label and lock the node, so sibling
/// nodes and the scheduling loop keep going.

use std::sync::Arc;
use tokio::sync::oneshot;

use crate::error::{GraphError, Result};
use crate::graph::dataflow::{Graph, NodeHandle};
use crate::graph::types::NodeId;
use crate::node::instance::{Emission, ExecContext, Outbox};

/// What happened when a node was offered to the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// `check` said no, or the node is locked
    NotReady,
    /// Ran and notified
    Ran,
    /// Replayed buffered outputs to newly connected consumers
    Replayed,
    /// `run` raised; the node is now locked
    Failed,
}

impl StepOutcome {
    /// True when the node did something observable this round
    pub fn progressed(self) -> bool {
        !matches!(self, StepOutcome::NotReady)
    }
}

/// Executes individual nodes against a graph
#[derive(Debug, Clone, Default)]
pub struct NodeExecutor;

impl NodeExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Check the node and, when ready, run and notify it
    pub fn execute_node(&self, graph: &Graph, id: NodeId) -> Result<StepOutcome> {
        let handle = graph.handle(id)?;
        Ok(self.step(graph, &handle, false))
    }

    /// Run the node without consulting `check` (GOTO)
    ///
    /// Inputs that are not available read as errors inside `run`, which
    /// fails and locks the node like any other run failure.
    pub fn force_node(&self, graph: &Graph, id: NodeId) -> Result<StepOutcome> {
        let handle = graph.handle(id)?;
        Ok(self.step(graph, &handle, true))
    }

    fn step(&self, graph: &Graph, handle: &NodeHandle, force: bool) -> StepOutcome {
        let id = handle.id;
        // Topology read happens before the node lock is taken
        let has_consumers = graph.has_consumers(id);

        let (outcome, emissions) = {
            let mut node = handle.lock();

            if node.core.buffered && has_consumers && !node.core.locked {
                let mut outbox = Outbox::new(true);
                node.core.replay_buffer(&mut outbox);
                tracing::debug!("📤 {} replayed {} buffered outputs", node.label(), outbox.emissions().len());
                graph.mark_running(id);
                (StepOutcome::Replayed, outbox.into_emissions())
            } else {
                if node.core.locked || (!force && !node.check()) {
                    return StepOutcome::NotReady;
                }

                graph.mark_running(id);
                let label = node.label();
                let ctx = ExecContext {
                    node_id: id,
                    label: &label,
                    values: graph.values(),
                    returns: graph.returns(),
                    registry: graph.registry(),
                };

                tracing::debug!("⚡ Running {}", label);
                if let Err(e) = node.run(&ctx) {
                    tracing::error!("❌ {} failed: {}", label, e);
                    node.core.locked = true;
                    drop(node);
                    graph.mark_finished(id);
                    return StepOutcome::Failed;
                }

                let mut outbox = Outbox::new(has_consumers);
                node.notify(&mut outbox);
                (StepOutcome::Ran, outbox.into_emissions())
            }
        };

        self.deliver(graph, id, emissions);
        graph.mark_finished(id);
        outcome
    }

    /// Push emissions into every input wired to the emitting outputs
    pub fn deliver(&self, graph: &Graph, from: NodeId, emissions: Vec<Emission>) {
        for emission in emissions {
            for conn in graph.connections_of_output(from, &emission.output) {
                let target = match graph.handle(conn.input_node) {
                    Ok(target) => target,
                    Err(e) => {
                        tracing::warn!("⚠️ Dropping value for {}: {}", conn, e);
                        continue;
                    }
                };
                let mut node = target.lock();
                if let Err(e) = node.set_input(
                    &conn.input_name,
                    emission.value.clone(),
                    emission.override_,
                    emission.loop_level,
                ) {
                    tracing::error!("❌ Delivery along {} failed: {}", conn, e);
                }
            }
        }
    }

    /// Dispatch one node onto the blocking pool
    ///
    /// The node's run token is held for the whole run+notify span, so two
    /// dispatches of the same node never interleave. The receiver resolves
    /// with the outcome once the node is done.
    pub fn run_node_par(&self, graph: &Graph, id: NodeId) -> Result<oneshot::Receiver<StepOutcome>> {
        let handle = graph.handle(id)?;
        let token = Arc::clone(&handle.run_token);
        let graph = graph.clone();
        let executor = self.clone();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let _token = token.lock_owned().await;
            let outcome = tokio::task::spawn_blocking(move || executor.step(&graph, &handle, false))
                .await
                .unwrap_or_else(|e| {
                    tracing::error!("❌ Node {} task aborted: {}", id, e);
                    StepOutcome::Failed
                });
            let _ = tx.send(outcome);
        });

        Ok(rx)
    }

    /// Run the graph in rounds of concurrent dispatches until a round makes no progress
    ///
    /// Returns the number of node executions that made progress.
    pub async fn par_execute(&self, graph: &Graph, max_rounds: Option<usize>) -> Result<usize> {
        let mut progressed = 0;
        let mut round = 0;

        loop {
            if max_rounds.is_some_and(|max| round >= max) {
                tracing::warn!("⏱️ Stopping after {} rounds", round);
                break;
            }
            round += 1;

            let mut pending = Vec::new();
            for id in graph.node_ids() {
                pending.push(self.run_node_par(graph, id)?);
            }

            let mut this_round = 0;
            for rx in pending {
                let outcome = rx
                    .await
                    .map_err(|e| GraphError::Protocol(format!("node task dropped its result: {}", e)))?;
                if outcome.progressed() {
                    this_round += 1;
                }
            }

            tracing::debug!("🔄 Round {} ran {} nodes", round, this_round);
            if this_round == 0 {
                break;
            }
            progressed += this_round;
        }

        Ok(progressed)
    }
}
