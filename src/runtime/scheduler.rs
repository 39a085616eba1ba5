/// Remote interpreter
///
/// Holds the live copy of a graph on the remote side and drives it according
/// to the control commands received over the wire: paused after PUSH,
/// continuous sweeps after UNPAUSE, single steps, forced GOTO targets.
/// Command handling is quick and synchronous; node execution happens in
/// `tick`, one node at a time, outside the interpreter lock.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::config::EngineConfig;
use crate::graph::dataflow::Graph;
use crate::graph::lock;
use crate::graph::registry::NodeRegistry;
use crate::graph::types::NodeId;
use crate::protocol::command::{Command, Response, ReturnReport, StatusReport};
use crate::runtime::engine::ExecutionEngine;
use crate::runtime::executor::StepOutcome;

/// Poll interval of the run loop while idle
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Options applied with `CONFIGURE<json>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeOptions {
    /// Pause between node executions while running continuously
    pub step_delay_ms: u64,
    pub max_sweeps: Option<usize>,
    /// Answer STATUS with RETURN once execution has finished
    pub report_return: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            step_delay_ms: 0,
            max_sweeps: None,
            report_return: true,
        }
    }
}

impl RuntimeOptions {
    /// Merge a partial options map; unknown keys are ignored with a warning
    pub fn merge(&mut self, options: &Value) -> crate::Result<()> {
        let map = options
            .as_object()
            .ok_or_else(|| crate::GraphError::Protocol("CONFIGURE expects an object".into()))?;
        for (key, value) in map {
            match key.as_str() {
                "stepDelayMs" => self.step_delay_ms = serde_json::from_value(value.clone())?,
                "maxSweeps" => self.max_sweeps = serde_json::from_value(value.clone())?,
                "reportReturn" => self.report_return = serde_json::from_value(value.clone())?,
                other => tracing::warn!("⚠️ Ignoring unknown runtime option '{}'", other),
            }
        }
        Ok(())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }
}

struct State {
    graph: Graph,
    options: RuntimeOptions,
    paused: bool,
    /// STEP requests not yet served
    steps: usize,
    goto: Option<NodeId>,
    /// Last node executed, where the next sweep position starts
    cursor: Option<NodeId>,
    /// Executed since the last STATUS
    ran: Vec<NodeId>,
    /// Node executions since PUSH or UNPAUSE, compared against `maxSweeps`
    executions: usize,
    /// A full pass found nothing ready
    idle: bool,
    finished: bool,
    shutdown: bool,
}

/// Remote-side owner of a live graph
#[derive(Clone)]
pub struct Interpreter {
    registry: Arc<NodeRegistry>,
    engine: ExecutionEngine,
    state: Arc<Mutex<State>>,
    wake: Arc<Notify>,
}

impl Interpreter {
    pub fn new(registry: Arc<NodeRegistry>, config: &EngineConfig) -> Self {
        let options = RuntimeOptions {
            max_sweeps: config.max_sweeps,
            ..RuntimeOptions::default()
        };
        Self {
            engine: ExecutionEngine::default(),
            state: Arc::new(Mutex::new(State {
                graph: Graph::new(Arc::clone(&registry)),
                options,
                paused: true,
                steps: 0,
                goto: None,
                cursor: None,
                ran: Vec::new(),
                executions: 0,
                idle: false,
                finished: false,
                shutdown: false,
            })),
            registry,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Current live graph
    pub fn graph(&self) -> Graph {
        lock(&self.state).graph.clone()
    }

    pub fn options(&self) -> RuntimeOptions {
        lock(&self.state).options.clone()
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.state).paused
    }

    pub fn is_finished(&self) -> bool {
        lock(&self.state).finished
    }

    pub fn is_shut_down(&self) -> bool {
        lock(&self.state).shutdown
    }

    /// Apply one command and produce its response
    pub fn handle(&self, command: Command) -> Response {
        tracing::debug!("📨 {}", command);
        let response = match &command {
            Command::Status(target) => return self.status(*target),
            Command::Pause => {
                lock(&self.state).paused = true;
                Response::ack(&command)
            }
            Command::Unpause => {
                let mut s = lock(&self.state);
                s.paused = false;
                s.idle = false;
                s.finished = false;
                s.executions = 0;
                Response::ack(&command)
            }
            Command::Step => {
                let mut s = lock(&self.state);
                s.paused = true;
                s.steps += 1;
                s.idle = false;
                Response::ack(&command)
            }
            Command::Goto(id) => {
                let mut s = lock(&self.state);
                if s.graph.contains(*id) {
                    s.goto = Some(*id);
                    s.idle = false;
                    Response::ack(&command)
                } else {
                    Response::Error(format!("unknown node id {}", id))
                }
            }
            Command::Push(snapshot) => {
                let graph = Graph::new(Arc::clone(&self.registry));
                let mut problems = Vec::new();
                let mut reporter = |message: &str| problems.push(message.to_string());
                match graph.load_state(snapshot, Some(&mut reporter), true) {
                    Ok(_) => {
                        for problem in &problems {
                            tracing::warn!("⚠️ {}", problem);
                        }
                        tracing::info!("📥 Pushed graph with {} nodes", graph.len());
                        self.replace_graph(graph);
                        Response::ack(&command)
                    }
                    Err(e) => Response::Error(e.to_string()),
                }
            }
            Command::Update(snapshot) => {
                let mut s = lock(&self.state);
                match s.graph.update_state(snapshot) {
                    Ok(_) => {
                        s.idle = false;
                        s.finished = false;
                        if s.goto.is_some_and(|id| !s.graph.contains(id)) {
                            s.goto = None;
                        }
                        tracing::info!("🔄 Updated graph to {} nodes", s.graph.len());
                        Response::ack(&command)
                    }
                    Err(e) => Response::Error(e.to_string()),
                }
            }
            Command::Configure(options) => {
                let mut s = lock(&self.state);
                match s.options.merge(options) {
                    Ok(()) => {
                        tracing::info!("⚙️ Runtime options now {}", s.options.to_value());
                        Response::ack(&command)
                    }
                    Err(e) => Response::Error(e.to_string()),
                }
            }
            Command::Drop => {
                self.replace_graph(Graph::new(Arc::clone(&self.registry)));
                tracing::info!("🗑️ Dropped graph");
                Response::ack(&command)
            }
            Command::Kill => {
                lock(&self.state).shutdown = true;
                tracing::info!("🛑 Kill requested");
                Response::ack(&command)
            }
        };
        self.wake.notify_one();
        response
    }

    fn replace_graph(&self, graph: Graph) {
        let mut s = lock(&self.state);
        s.graph = graph;
        s.paused = true;
        s.steps = 0;
        s.goto = None;
        s.cursor = None;
        s.ran.clear();
        s.executions = 0;
        s.idle = false;
        s.finished = false;
    }

    /// STATUS: either the finished execution's return or the progress since the last poll
    pub fn status(&self, target: Option<NodeId>) -> Response {
        let mut s = lock(&self.state);
        if s.finished && s.options.report_return {
            let returned = s.graph.return_state();
            return Response::Return(ReturnReport {
                value: returned.value,
                node: returned.node,
                priority: returned.priority,
            });
        }

        let report = match target {
            Some(id) => s.graph.report(id).unwrap_or_else(|_| json!({})),
            None => json!({}),
        };
        Response::Status(StatusReport {
            ran: std::mem::take(&mut s.ran),
            running: s.graph.running_nodes(),
            paused: s.paused,
            report,
        })
    }

    /// Execute at most one node, honouring pause, step and GOTO
    ///
    /// Returns the id of the node that made progress.
    pub fn tick(&self) -> Option<NodeId> {
        let (graph, target, cursor) = {
            let mut s = lock(&self.state);
            if s.shutdown || (s.paused && s.steps == 0) {
                return None;
            }
            if s.idle && s.goto.is_none() {
                return None;
            }
            if let Some(limit) = s.options.max_sweeps {
                // Each sweep visits every node once
                if !s.paused && s.executions >= limit.saturating_mul(s.graph.len().max(1)) {
                    s.idle = true;
                    return None;
                }
            }
            if s.paused {
                s.steps -= 1;
            }
            (s.graph.clone(), s.goto.take(), s.cursor)
        };

        let forced = target.and_then(|id| match self.engine.executor().force_node(&graph, id) {
            Ok(StepOutcome::NotReady) => {
                tracing::warn!("⚠️ GOTO target {} is locked, resuming normal order", id);
                None
            }
            Err(e) => {
                tracing::warn!("⚠️ GOTO target {} could not run: {}", id, e);
                None
            }
            Ok(outcome) => Some((id, outcome)),
        });
        let result = forced.or_else(|| self.engine.run_next(&graph, cursor));

        let mut s = lock(&self.state);
        // PUSH or DROP replaced the graph while this node ran
        if s.graph.instance_id() != graph.instance_id() {
            return None;
        }
        match result {
            Some((id, outcome)) => {
                if outcome == StepOutcome::Failed {
                    tracing::warn!("⚠️ Node {} failed and is now locked", id);
                }
                s.cursor = Some(id);
                s.ran.push(id);
                s.executions += 1;
                Some(id)
            }
            None => {
                s.idle = true;
                if !s.paused && s.executions > 0 && !s.finished {
                    s.finished = true;
                    tracing::info!("🏁 Execution finished after {} node runs", s.executions);
                }
                None
            }
        }
    }

    /// Scheduling loop; returns once KILL has been handled
    pub async fn run(&self) {
        tracing::info!("🔁 Interpreter loop started");
        loop {
            if self.is_shut_down() {
                break;
            }
            let interpreter = self.clone();
            let ran = tokio::task::spawn_blocking(move || interpreter.tick())
                .await
                .unwrap_or_else(|e| {
                    tracing::error!("❌ Interpreter tick aborted: {}", e);
                    None
                });

            match ran {
                Some(_) => {
                    let delay = lock(&self.state).options.step_delay_ms;
                    if delay > 0 {
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    } else {
                        tokio::task::yield_now().await;
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep(IDLE_POLL) => {}
                    }
                }
            }
        }
        tracing::info!("👋 Interpreter loop stopped");
    }

    /// Wake the run loop, e.g. after shutdown was requested from outside
    pub fn wake(&self) {
        self.wake.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interpreter() -> Interpreter {
        let registry = Arc::new(NodeRegistry::with_builtins().unwrap());
        Interpreter::new(registry, &EngineConfig { max_sweeps: None, history_window_secs: 15 })
    }

    /// CreateString -> DebugPrint -> SimpleReturn
    fn snapshot() -> crate::graph::types::GraphSnapshot {
        let registry = Arc::new(NodeRegistry::with_builtins().unwrap());
        let g = Graph::new(registry);
        let text = g.spawn_node("CreateString").unwrap();
        let print = g.spawn_node("DebugPrint").unwrap();
        let ret = g.spawn_node("SimpleReturn").unwrap();
        g.set_input_default(text, "Str", Some(json!("hello"))).unwrap();
        g.connect(text, "String", print, "Object").unwrap();
        g.connect(print, "Out", ret, "Value").unwrap();
        g.serialize()
    }

    #[test]
    fn push_leaves_the_interpreter_paused() {
        let it = interpreter();
        assert_eq!(it.handle(Command::Push(snapshot())), Response::Ack("PUSH".into()));
        assert!(it.is_paused());
        assert_eq!(it.graph().len(), 3);
        assert_eq!(it.tick(), None);
    }

    #[test]
    fn step_runs_one_node_then_waits() {
        let it = interpreter();
        it.handle(Command::Push(snapshot()));
        it.handle(Command::Step);
        assert_eq!(it.tick(), Some(0));
        assert_eq!(it.tick(), None);

        match it.handle(Command::Status(Some(1))) {
            Response::Status(status) => {
                assert_eq!(status.ran, vec![0]);
                assert!(status.paused);
                assert_eq!(status.report["ID"], json!(1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unpause_runs_to_a_return() {
        let it = interpreter();
        it.handle(Command::Push(snapshot()));
        it.handle(Command::Unpause);
        let mut ran = Vec::new();
        while let Some(id) = it.tick() {
            ran.push(id);
        }
        assert_eq!(ran, vec![0, 1, 2]);
        assert!(it.is_finished());

        match it.handle(Command::Status(None)) {
            Response::Return(report) => {
                assert_eq!(report.value, json!("hello"));
                assert_eq!(report.node, Some(2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn goto_overrides_sweep_order_and_check() {
        let it = interpreter();
        it.handle(Command::Push(snapshot()));
        assert_eq!(it.handle(Command::Goto(2)), Response::Ack("GOTO".into()));
        it.handle(Command::Step);
        // Node 2 is not ready: its Value is wired but empty, so the forced run fails
        assert_eq!(it.tick(), Some(2));
        assert!(it.graph().with_node(2, |n| n.core.locked).unwrap());
        match it.handle(Command::Status(None)) {
            Response::Status(status) => assert_eq!(status.ran, vec![2]),
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(it.handle(Command::Goto(99)), Response::Error(_)));
    }

    #[test]
    fn goto_on_a_locked_node_falls_back_to_sweep_order() {
        let registry = Arc::new(NodeRegistry::with_builtins().unwrap());
        let g = Graph::new(registry);
        let bad = g.spawn_node("String2Float").unwrap();
        let text = g.spawn_node("CreateString").unwrap();
        let print = g.spawn_node("DebugPrint").unwrap();
        g.set_input_default(bad, "String", Some(json!("x"))).unwrap();
        g.set_input_default(text, "Str", Some(json!("hi"))).unwrap();
        g.connect(text, "String", print, "Object").unwrap();

        let it = interpreter();
        it.handle(Command::Push(g.serialize()));
        it.handle(Command::Unpause);
        assert_eq!(it.tick(), Some(bad));
        assert!(it.graph().with_node(bad, |n| n.core.locked).unwrap());

        it.handle(Command::Goto(bad));
        let mut ran = Vec::new();
        for _ in 0..10 {
            if let Some(id) = it.tick() {
                ran.push(id);
            }
        }
        assert_eq!(ran, vec![text, print]);
        assert!(it.is_finished());
        assert_eq!(it.graph().output_value(print, "Out").unwrap(), Some(json!("hi")));
    }

    #[test]
    fn configure_merges_known_keys() {
        let it = interpreter();
        let response = it.handle(Command::Configure(json!({"stepDelayMs": 10, "reportReturn": false, "colour": 1})));
        assert_eq!(response, Response::Ack("CONFIGURE".into()));
        let options = it.options();
        assert_eq!(options.step_delay_ms, 10);
        assert!(!options.report_return);
        assert!(matches!(it.handle(Command::Configure(json!(3))), Response::Error(_)));
    }

    #[test]
    fn drop_and_kill() {
        let it = interpreter();
        it.handle(Command::Push(snapshot()));
        it.handle(Command::Drop);
        assert!(it.graph().is_empty());
        it.handle(Command::Kill);
        assert!(it.is_shut_down());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_loop_stops_on_kill() {
        let it = interpreter();
        it.handle(Command::Push(snapshot()));
        it.handle(Command::Unpause);
        let runner = tokio::spawn({
            let it = it.clone();
            async move { it.run().await }
        });
        for _ in 0..100 {
            if it.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(it.is_finished());
        it.handle(Command::Kill);
        tokio::time::timeout(Duration::from_secs(2), runner).await.unwrap().unwrap();
    }
}
