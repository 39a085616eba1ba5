use pinflow::graph::{Graph, NodeRegistry};
use pinflow::node::CONTROL;
use pinflow::runtime::ExecutionEngine;
use serde_json::json;
use std::sync::Arc;

fn graph() -> Graph {
    Graph::new(Arc::new(NodeRegistry::with_builtins().unwrap()))
}

/// ForEach -> AppendValue -> back into Control; Final -> SimpleReturn
#[test]
fn for_each_iterates_in_order_and_is_reusable() {
    let g = graph();
    let each = g.spawn_node("ForEach").unwrap();
    let append = g.spawn_node("AppendValue").unwrap();
    let ret = g.spawn_node("SimpleReturn").unwrap();

    g.set_input_default(each, "Start", Some(json!([1, 2, 3, 4, 5]))).unwrap();
    g.set_input_default(append, "Name", Some(json!("seen"))).unwrap();
    g.connect(each, "ListElement", append, "Value").unwrap();
    g.connect(append, "List", each, CONTROL).unwrap();
    g.connect(each, "Final", ret, "Value").unwrap();
    g.values().store("seen", json!([]));

    let summary = ExecutionEngine::default().self_execute(&g);
    assert!(summary.converged);
    assert!(summary.failed.is_empty());

    assert_eq!(g.values().stored("seen"), Some(json!([1, 2, 3, 4, 5])));
    let appended = summary.executed.iter().filter(|id| **id == append).count();
    assert_eq!(appended, 5);
    assert_eq!(summary.executed.last(), Some(&ret));
    assert_eq!(g.return_state().value, json!([1, 2, 3, 4, 5]));

    // Body ran one level deeper; the loop itself stays outside
    assert_eq!(g.loop_level(append).unwrap(), 1);
    assert_eq!(g.loop_level(each).unwrap(), 0);
    assert_eq!(g.is_fresh(each).unwrap(), Some(true));

    // Fresh again: a new list starts a second sequence
    g.set_input_value(each, "Start", json!(["a", "b"])).unwrap();
    let summary = ExecutionEngine::default().self_execute(&g);
    assert!(summary.converged);
    assert_eq!(g.values().stored("seen"), Some(json!([1, 2, 3, 4, 5, "a", "b"])));
    assert_eq!(g.output_value(each, "Final").unwrap(), Some(json!(["a", "b"])));
    assert_eq!(g.is_fresh(each).unwrap(), Some(true));
}

/// Switch -> True branch -> Control; the False branch never runs
#[test]
fn switch_routes_one_branch_and_converges() {
    let g = graph();
    let switch = g.spawn_node("Switch").unwrap();
    let on_true = g.spawn_node("DebugPrint").unwrap();
    let on_false = g.spawn_node("DebugPrint").unwrap();
    let ret = g.spawn_node("SimpleReturn").unwrap();

    g.set_input_default(switch, "Switch", Some(json!(true))).unwrap();
    g.set_input_default(switch, "Start", Some(json!("x"))).unwrap();
    g.connect(switch, "True", on_true, "Object").unwrap();
    g.connect(switch, "False", on_false, "Object").unwrap();
    g.connect(on_true, "Out", switch, CONTROL).unwrap();
    g.connect(switch, "Final", ret, "Value").unwrap();

    let summary = ExecutionEngine::default().self_execute(&g);
    assert_eq!(summary.executed, vec![switch, on_true, switch, ret]);
    assert!(!summary.executed.contains(&on_false));
    assert_eq!(g.return_state().value, json!("x"));
    assert_eq!(g.return_state().node, Some(ret));
    assert_eq!(g.is_fresh(switch).unwrap(), Some(true));

    // A new Switch+Start pair is accepted
    g.set_input_value(switch, "Switch", json!(false)).unwrap();
    g.set_input_value(switch, "Start", json!("y")).unwrap();
    let summary = ExecutionEngine::default().self_execute(&g);
    assert_eq!(summary.executed, vec![switch, on_false]);
    assert_eq!(g.output_value(on_false, "Out").unwrap(), Some(json!("y")));
    assert_eq!(g.is_fresh(switch).unwrap(), Some(false));
}

#[test]
fn control_needs_every_converging_edge() {
    let g = graph();
    let each = g.spawn_node("ForEach").unwrap();
    let left = g.spawn_node("DebugPrint").unwrap();
    let right = g.spawn_node("DebugPrint").unwrap();
    g.connect(left, "Out", each, CONTROL).unwrap();
    g.connect(right, "Out", each, CONTROL).unwrap();
    assert_eq!(g.input_state(each, CONTROL).unwrap().multi_conn, 2);

    let available = |g: &Graph| {
        g.with_node(each, |n| n.core.input(CONTROL).unwrap().peek_available())
            .unwrap()
    };

    g.with_node(each, |n| n.set_input(CONTROL, json!(1), true, 0)).unwrap().unwrap();
    assert!(!available(&g), "M-1 arrivals leave Control unavailable");
    g.with_node(each, |n| n.set_input(CONTROL, json!(2), true, 0)).unwrap().unwrap();
    assert!(available(&g));

    let edge = g.connections_of_control_input(each)[0].clone();
    assert!(g.disconnect(&edge));
    assert_eq!(g.input_state(each, CONTROL).unwrap().multi_conn, 1);
    assert!(g.indices_consistent());
}

#[test]
fn inspection_never_changes_pin_state() {
    let g = graph();
    let join = g.spawn_node("Join").unwrap();
    g.set_input_default(join, "Str1", Some(json!("a"))).unwrap();
    let before = g.input_state(join, "Str1").unwrap();
    for _ in 0..3 {
        g.with_node(join, |n| n.core.input("Str1").unwrap().peek_available()).unwrap();
        g.report(join).unwrap();
    }
    assert_eq!(g.input_state(join, "Str1").unwrap(), before);
}

#[test]
fn disconnected_input_falls_back_to_its_default_once() {
    let g = graph();
    let source = g.spawn_node("CreateString").unwrap();
    let join = g.spawn_node("Join").unwrap();
    g.set_input_default(join, "Str1", Some(json!("a"))).unwrap();
    g.set_input_default(join, "Str2", Some(json!("b"))).unwrap();

    let edge = g.connect(source, "String", join, "Str1").unwrap();
    let peek = |g: &Graph| {
        g.with_node(join, |n| n.core.input("Str1").unwrap().peek_available())
            .unwrap()
    };
    assert!(!peek(&g), "a connected input ignores its default");

    assert!(g.disconnect(&edge));
    assert!(peek(&g));

    let summary = ExecutionEngine::default().self_execute(&g);
    assert_eq!(summary.executed, vec![join]);
    assert_eq!(g.output_value(join, "Joined").unwrap(), Some(json!("ab")));
    assert!(!peek(&g), "the default is spent for this reset cycle");

    // Reconnecting and disconnecting restores it
    let edge = g.connect(source, "String", join, "Str1").unwrap();
    g.disconnect(&edge);
    assert!(peek(&g));
}

#[test]
fn break_lets_a_value_escape_the_loop_body() {
    let g = graph();
    let each = g.spawn_node("ForEach").unwrap();
    let brk = g.spawn_node("Break").unwrap();
    let print = g.spawn_node("DebugPrint").unwrap();
    g.set_input_default(each, "Start", Some(json!([42]))).unwrap();
    g.connect(each, "ListElement", brk, "Input").unwrap();
    g.connect(brk, "Output", print, "Object").unwrap();

    ExecutionEngine::default().self_execute(&g);
    assert_eq!(g.output_value(print, "Out").unwrap(), Some(json!(42)));
    assert_eq!(g.loop_level(brk).unwrap(), 1);
    assert_eq!(g.loop_level(print).unwrap(), 0);
}
