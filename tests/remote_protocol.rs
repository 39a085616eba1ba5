use pinflow::config::{ClientConfig, EngineConfig};
use pinflow::graph::{Graph, NodeRegistry};
use pinflow::protocol::command::{read_frame, write_frame, Response};
use pinflow::protocol::{RemoteSession, RunnerClient};
use pinflow::runtime::{Interpreter, RuntimeOptions};
use pinflow::server::serve;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

fn registry() -> Arc<NodeRegistry> {
    Arc::new(NodeRegistry::with_builtins().unwrap())
}

fn client_config() -> ClientConfig {
    ClientConfig {
        connect_timeout_ms: 1000,
        ack_timeout_ms: 2000,
    }
}

async fn start() -> (String, JoinHandle<anyhow::Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let config = EngineConfig {
        max_sweeps: None,
        history_window_secs: 15,
    };
    let interpreter = Interpreter::new(registry(), &config);
    (address, tokio::spawn(serve(listener, interpreter)))
}

async fn session(address: &str) -> RemoteSession {
    let client = RunnerClient::connect(address, &client_config()).await;
    RemoteSession::new(client, Duration::from_secs(15))
}

/// CreateString -> DebugPrint -> SimpleReturn
fn hello_graph() -> Graph {
    let g = Graph::new(registry());
    let text = g.spawn_node("CreateString").unwrap();
    let print = g.spawn_node("DebugPrint").unwrap();
    let ret = g.spawn_node("SimpleReturn").unwrap();
    g.set_input_default(text, "Str", Some(json!("hello"))).unwrap();
    g.connect(text, "String", print, "Object").unwrap();
    g.connect(print, "Out", ret, "Value").unwrap();
    g
}

async fn poll_until<F>(session: &mut RemoteSession, done: F) -> bool
where
    F: Fn(&RemoteSession) -> bool,
{
    for _ in 0..200 {
        session.needs_update().await;
        if done(session) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_execution_reports_its_return() {
    let (address, server) = start().await;
    let mut session = session(&address).await;
    assert!(session.is_connected());

    let g = hello_graph();
    assert!(session.execute(&g, &RuntimeOptions::default()).await);
    assert!(poll_until(&mut session, |s| s.returned().is_some()).await);

    let returned = session.returned().unwrap();
    assert_eq!(returned.value, json!("hello"));
    assert_eq!(returned.node, Some(2));
    assert_eq!(returned.priority, 0);

    assert!(session.kill().await);
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    // The interpreter is gone: polls and controls degrade without raising
    assert!(session.request_status().await.is_none());
    assert!(!session.pause().await);
    assert!(!session.step().await);
    assert!(!session.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stepping_records_history_and_reports() {
    let (address, server) = start().await;
    let mut session = session(&address).await;
    let g = hello_graph();

    assert!(session.push(&g).await);
    assert!(session.step().await);
    assert!(poll_until(&mut session, |s| !s.execution_history().is_empty()).await);
    let history = session.execution_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].0, 0);
    assert!(history[0].1 < 15.0);
    assert!(session.returned().is_none());

    session.request_report(1);
    session.needs_update().await;
    let report = session.take_report().unwrap();
    assert_eq!(report["ID"], json!(1));
    assert_eq!(report["class"], json!("DebugPrint"));

    assert!(session.goto(2).await);
    assert!(!session.goto(42).await, "unknown ids are rejected");
    assert!(session.update(&g).await);
    let options = RuntimeOptions {
        step_delay_ms: 5,
        ..RuntimeOptions::default()
    };
    assert!(session.configure(&options).await);
    assert!(session.drop_graph().await);

    // A fresh push clears the local history
    assert!(session.push(&g).await);
    assert!(session.execution_history().is_empty());

    assert!(session.kill().await);
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_commands_get_an_error_frame() {
    let (address, server) = start().await;
    let mut stream = TcpStream::connect(&address).await.unwrap();

    write_frame(&mut stream, "TELEPORT").await.unwrap();
    let reply = read_frame(&mut stream).await.unwrap().unwrap();
    assert!(matches!(Response::parse(&reply).unwrap(), Response::Error(_)));

    write_frame(&mut stream, "STATUS***").await.unwrap();
    let reply = read_frame(&mut stream).await.unwrap().unwrap();
    match Response::parse(&reply).unwrap() {
        Response::Status(status) => {
            assert!(status.ran.is_empty());
            assert!(status.paused);
        }
        other => panic!("unexpected {:?}", other),
    }

    write_frame(&mut stream, "KILL").await.unwrap();
    let reply = read_frame(&mut stream).await.unwrap().unwrap();
    assert_eq!(Response::parse(&reply).unwrap(), Response::Ack("KILL".into()));
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn unreachable_interpreter_is_a_quiet_no_op() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let mut session = session(&address).await;
    assert!(session.request_status().await.is_none());
    assert!(!session.pause().await);
    assert!(!session.step().await);
    assert!(!session.needs_update().await);
    assert!(!session.is_connected());
}
