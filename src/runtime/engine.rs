/// Sweep-based execution engine
///
/// Runs a graph in-process by sweeping its nodes in id order: every node whose
/// `check` passes is run and notified on the spot, and sweeps repeat until a
/// full pass makes no progress. There is no topological sort; ordering along
/// edges falls out of the availability rules. petgraph is only used up front
/// to warn about hard cycles that no loop construct can break.

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

use crate::graph::dataflow::Graph;
use crate::graph::types::NodeId;
use crate::node::info::CONTROL;
use crate::runtime::executor::{NodeExecutor, StepOutcome};

/// Summary of one `self_execute` call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionSummary {
    /// Number of sweeps performed, including the final idle one
    pub sweeps: usize,
    /// Nodes that ran or replayed, in execution order
    pub executed: Vec<NodeId>,
    /// Nodes whose run failed
    pub failed: Vec<NodeId>,
    /// False when the sweep limit stopped execution early
    pub converged: bool,
}

/// In-process scheduler over a [`Graph`]
#[derive(Debug, Clone, Default)]
pub struct ExecutionEngine {
    executor: NodeExecutor,
    max_sweeps: Option<usize>,
}

impl ExecutionEngine {
    pub fn new(executor: NodeExecutor) -> Self {
        Self {
            executor,
            max_sweeps: None,
        }
    }

    /// Bound the number of sweeps; `None` runs to a fixed point
    pub fn with_max_sweeps(mut self, max_sweeps: Option<usize>) -> Self {
        self.max_sweeps = max_sweeps;
        self
    }

    pub fn max_sweeps(&self) -> Option<usize> {
        self.max_sweeps
    }

    pub fn executor(&self) -> &NodeExecutor {
        &self.executor
    }

    /// Run the graph until a full sweep finds no ready node
    pub fn self_execute(&self, graph: &Graph) -> ExecutionSummary {
        tracing::info!("🚀 Starting sweep execution of {} nodes", graph.len());

        for cycle in Self::find_hard_cycles(graph) {
            tracing::warn!("⚠️ Hard cycle outside any loop construct: {:?}", cycle);
        }

        let mut summary = ExecutionSummary::default();
        loop {
            if self.max_sweeps.is_some_and(|max| summary.sweeps >= max) {
                tracing::warn!("⏱️ Sweep limit {} reached before convergence", summary.sweeps);
                return summary;
            }
            summary.sweeps += 1;

            let mut progressed = false;
            for (id, outcome) in self.sweep(graph) {
                match outcome {
                    StepOutcome::Ran | StepOutcome::Replayed => summary.executed.push(id),
                    StepOutcome::Failed => summary.failed.push(id),
                    StepOutcome::NotReady => continue,
                }
                progressed = true;
            }

            if !progressed {
                break;
            }
        }

        summary.converged = true;
        tracing::info!(
            "✅ Sweep execution finished after {} sweeps ({} executed, {} failed)",
            summary.sweeps,
            summary.executed.len(),
            summary.failed.len()
        );
        summary
    }

    /// One pass over every node in id order
    pub fn sweep(&self, graph: &Graph) -> Vec<(NodeId, StepOutcome)> {
        graph
            .node_ids()
            .into_iter()
            .filter_map(|id| match self.executor.execute_node(graph, id) {
                Ok(outcome) => Some((id, outcome)),
                // Deleted between listing and execution
                Err(_) => None,
            })
            .collect()
    }

    /// Execute the first ready node after `cursor`, wrapping around once
    ///
    /// Used by the interpreter to advance one node at a time while keeping
    /// sweep order.
    pub fn run_next(&self, graph: &Graph, cursor: Option<NodeId>) -> Option<(NodeId, StepOutcome)> {
        let ids = graph.node_ids();
        let start = match cursor {
            Some(cursor) => ids.partition_point(|id| *id <= cursor),
            None => 0,
        };
        let (head, tail) = ids.split_at(start);
        tail.iter().chain(head.iter()).find_map(|&id| {
            match self.executor.execute_node(graph, id) {
                Ok(outcome) if outcome.progressed() => Some((id, outcome)),
                _ => None,
            }
        })
    }

    /// Strongly connected groups of nodes joined by non-`Control` edges
    ///
    /// Loop bodies close through `Control`, so anything reported here can
    /// never become ready on its own.
    pub fn find_hard_cycles(graph: &Graph) -> Vec<Vec<NodeId>> {
        let mut dag: DiGraph<NodeId, ()> = DiGraph::new();
        let mut index: HashMap<NodeId, NodeIndex> = HashMap::new();
        for id in graph.node_ids() {
            index.insert(id, dag.add_node(id));
        }

        let mut self_loops = Vec::new();
        for conn in graph.all_connections() {
            if conn.input_name == CONTROL {
                continue;
            }
            if let (Some(&from), Some(&to)) = (index.get(&conn.output_node), index.get(&conn.input_node)) {
                if from == to {
                    self_loops.push(conn.output_node);
                }
                dag.add_edge(from, to, ());
            }
        }

        let mut cycles: Vec<Vec<NodeId>> = tarjan_scc(&dag)
            .into_iter()
            .filter_map(|component| {
                let mut ids: Vec<NodeId> = component.iter().map(|ix| dag[*ix]).collect();
                ids.sort_unstable();
                let is_cycle = ids.len() > 1 || ids.first().is_some_and(|id| self_loops.contains(id));
                is_cycle.then_some(ids)
            })
            .collect();
        cycles.sort();
        cycles
    }
}
