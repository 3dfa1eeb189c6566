//! End-to-end runs through the engine with headless desktop backends

use flowpilot::config::{Config, OverflowPolicy};
use flowpilot::desktop::{Desktop, InputAction, MouseButton, RecordingActuator};
use flowpilot::graph::{Graph, Link, Node, NodeType};
use flowpilot::runtime::{Engine, EngineError, EngineEvent, EngineState, LogLevel, RunSummary};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn config() -> Config {
    let mut config = Config::default();
    config.engine.supervisor_poll = Duration::from_millis(10);
    config.engine.iconify_on_run = false;
    config.engine.max_concurrency = 50;
    config.engine.overflow = OverflowPolicy::Drop;
    config.locator.runtime_scale = Some(1.0);
    config.locator.multiscale = false;
    config
}

fn engine_with(config: Config) -> (Arc<Engine>, Arc<RecordingActuator>) {
    let actuator = Arc::new(RecordingActuator::new());
    let desktop = Desktop::headless().with_actuator(actuator.clone());
    (Arc::new(Engine::new(&config, desktop)), actuator)
}

fn engine() -> (Arc<Engine>, Arc<RecordingActuator>) {
    engine_with(config())
}

fn click(id: &str, x: i64) -> Node {
    Node::new(id, NodeType::Mouse).with("x", x).with("y", 0)
}

fn wait(id: &str, seconds: f64) -> Node {
    Node::new(id, NodeType::Wait).with("seconds", seconds)
}

fn set_var(id: &str, name: &str, value: &str) -> Node {
    Node::new(id, NodeType::SetVar).with("var_name", name).with("var_value", value)
}

/// x coordinates of every click, in order
fn clicks(actuator: &RecordingActuator) -> Vec<i32> {
    actuator
        .actions()
        .into_iter()
        .filter_map(|action| match action {
            InputAction::Click { x, .. } => Some(x),
            _ => None,
        })
        .collect()
}

async fn finish(engine: &Engine) -> RunSummary {
    tokio::time::timeout(Duration::from_secs(10), engine.wait_idle())
        .await
        .expect("run did not finish");
    engine.status().last_run.expect("no run recorded")
}

#[tokio::test]
async fn linear_flow_runs_to_completion() {
    let (engine, actuator) = engine();
    let mut graph = Graph::new();
    graph
        .add_node(Node::new("s", NodeType::Start))
        .add_node(set_var("v", "x", "1"))
        .add_node(click("m", 5));
    graph.connect("s", "out", "v").connect("v", "out", "m");
    engine.load(graph).unwrap();

    let ctx = engine.start(None).unwrap();
    let summary = finish(&engine).await;

    assert_eq!(
        actuator.actions(),
        vec![InputAction::Click {
            x: 5,
            y: 0,
            button: MouseButton::Left,
            clicks: 1
        }]
    );
    assert_eq!(ctx.memory.text("x"), "1");
    assert_eq!(summary.nodes_executed, 3);
    assert_eq!(summary.errors, 0);
    assert_eq!(engine.state(), EngineState::Idle);
}

#[tokio::test]
async fn bounded_loop_runs_body_then_exits_once() {
    let (engine, actuator) = engine();
    let mut graph = Graph::new();
    graph
        .add_node(Node::new("s", NodeType::Start))
        .add_node(Node::new("L", NodeType::Loop).with("infinite", false).with("count", 3))
        .add_node(click("body", 1))
        .add_node(click("after", 99));
    graph
        .connect("s", "out", "L")
        .connect("L", "loop", "body")
        .connect("body", "out", "L")
        .connect("L", "exit", "after");
    engine.load(graph).unwrap();

    let ctx = engine.start(None).unwrap();
    finish(&engine).await;

    assert_eq!(clicks(&actuator), vec![1, 1, 1, 99]);
    assert!(!ctx.memory.contains("loop_L"));
}

#[tokio::test]
async fn every_link_traversal_is_its_own_task() {
    let (engine, actuator) = engine();
    let mut graph = Graph::new();
    graph.add_node(Node::new("s", NodeType::Start)).add_node(click("m", 3));
    graph.connect("s", "out", "m").connect("s", "out", "m");
    engine.load(graph).unwrap();

    engine.start(None).unwrap();
    let summary = finish(&engine).await;

    assert_eq!(clicks(&actuator), vec![3, 3]);
    assert_eq!(summary.nodes_executed, 3);
}

#[tokio::test]
async fn run_does_not_end_between_a_task_and_its_successor() {
    let mut config = config();
    config.engine.supervisor_poll = Duration::from_millis(1);
    let (engine, _) = engine_with(config);

    let mut graph = Graph::new();
    graph.add_node(Node::new("s", NodeType::Start));
    let mut previous = "s".to_string();
    for i in 0..8 {
        let id = format!("v{}", i);
        graph.add_node(set_var(&id, &id, "done"));
        graph.connect(&previous, "out", &id);
        previous = id;
    }
    engine.load(graph).unwrap();

    let ctx = engine.start(None).unwrap();
    finish(&engine).await;

    for i in 0..8 {
        assert_eq!(ctx.memory.text(&format!("v{}", i)), "done");
    }
}

#[tokio::test]
async fn parallel_branches_share_run_memory() {
    let (engine, _) = engine();
    let mut graph = Graph::new();
    graph.add_node(Node::new("s", NodeType::Start));
    for i in 0..20 {
        let id = format!("w{}", i);
        graph.add_node(set_var(&id, &id, &i.to_string()));
        graph.connect("s", "out", &id);
    }
    engine.load(graph).unwrap();

    let ctx = engine.start(None).unwrap();
    finish(&engine).await;

    assert_eq!(ctx.memory.len(), 20);
    assert_eq!(ctx.memory.text("w13"), "13");
}

fn never(id: &str) -> Node {
    Node::new(id, NodeType::VarSwitch)
        .with("var_name", "mode")
        .with("var_value", "on")
}

/// Sequence of three branches; each branch's first port leads to a click
/// at the branch number, `else` clicks at 9
fn sequence_graph(branches: [Node; 3]) -> Graph {
    let mut graph = Graph::new();
    graph
        .add_node(Node::new("s", NodeType::Start))
        .add_node(Node::new("q", NodeType::Sequence).with("num_steps", 3))
        .add_node(click("fallback", 9));
    graph.connect("s", "out", "q").connect("q", "else", "fallback");
    for (i, branch) in branches.into_iter().enumerate() {
        let step = (i + 1).to_string();
        let after = format!("after{}", step);
        let port = branch.output_ports()[0].clone();
        let id = branch.id.clone();
        graph.add_node(branch).add_node(click(&after, i as i64 + 1));
        graph.connect("q", &step, &id).connect(&id, &port, &after);
    }
    graph
}

#[tokio::test]
async fn sequence_stops_at_first_successful_branch() {
    let (engine, actuator) = engine();
    engine
        .load(sequence_graph([
            never("b1"),
            set_var("b2", "picked", "two"),
            set_var("b3", "picked", "three"),
        ]))
        .unwrap();

    let ctx = engine.start(None).unwrap();
    finish(&engine).await;

    assert_eq!(clicks(&actuator), vec![2]);
    assert_eq!(ctx.memory.text("picked"), "two");
}

#[tokio::test]
async fn sequence_falls_back_to_else_after_every_branch_fails() {
    let (engine, actuator) = engine();
    // the image node has no reference image and faults
    engine
        .load(sequence_graph([never("b1"), Node::new("b2", NodeType::Image), never("b3")]))
        .unwrap();

    engine.start(None).unwrap();
    let summary = finish(&engine).await;

    assert_eq!(clicks(&actuator), vec![9]);
    assert_eq!(summary.errors, 1);
}

#[tokio::test]
async fn multi_switch_routes_to_matching_case() {
    let (engine, actuator) = engine();
    let mut graph = Graph::new();
    graph
        .add_node(Node::new("s", NodeType::Start))
        .add_node(
            Node::new("v", NodeType::SetVar)
                .with("batch_vars", json!([{"name": "a", "value": 1}, {"name": "b", "value": "1"}])),
        )
        .add_node(
            Node::new("w", NodeType::VarSwitch)
                .with("var_list", "a,b")
                .with("cases", json!([{"id": "c0", "value": "2"}, {"id": "c1", "value": "1"}])),
        )
        .add_node(click("zero", 0))
        .add_node(click("one", 1))
        .add_node(click("other", 9));
    graph
        .connect("s", "out", "v")
        .connect("v", "out", "w")
        .connect("w", "c0", "zero")
        .connect("w", "c1", "one")
        .connect("w", "else", "other");
    engine.load(graph).unwrap();

    engine.start(None).unwrap();
    finish(&engine).await;

    assert_eq!(clicks(&actuator), vec![1]);
}

#[tokio::test]
async fn faults_take_the_fail_port() {
    let (engine, actuator) = engine();
    let mut graph = Graph::new();
    graph
        .add_node(Node::new("s", NodeType::Start))
        .add_node(Node::new("i", NodeType::Image))
        .add_node(click("recover", 7));
    graph.connect("s", "out", "i").connect("i", "fail", "recover");
    engine.load(graph).unwrap();

    engine.start(None).unwrap();
    let summary = finish(&engine).await;

    assert_eq!(clicks(&actuator), vec![7]);
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.nodes_executed, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pause_holds_work_until_resume() {
    let (engine, actuator) = engine();
    let mut graph = Graph::new();
    graph
        .add_node(Node::new("s", NodeType::Start))
        .add_node(wait("w", 0.1))
        .add_node(click("m", 1));
    graph.connect("s", "out", "w").connect("w", "out", "m");
    engine.load(graph).unwrap();

    engine.start(None).unwrap();
    assert!(engine.pause());
    assert!(!engine.pause());
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(engine.state(), EngineState::Paused);
    assert!(actuator.actions().is_empty());

    assert!(engine.resume());
    finish(&engine).await;
    assert_eq!(clicks(&actuator), vec![1]);
    assert!(!engine.resume());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resume_releases_every_parked_branch_in_order() {
    let (engine, actuator) = engine();
    let mut graph = Graph::new();
    graph.add_node(Node::new("s", NodeType::Start));
    for i in 1..=3 {
        let (w, first, second) = (format!("w{}", i), format!("a{}", i), format!("b{}", i));
        graph
            .add_node(wait(&w, 0.15))
            .add_node(click(&first, i))
            .add_node(click(&second, 10 + i));
        graph
            .connect("s", "out", &w)
            .connect(&w, "out", &first)
            .connect(&first, "out", &second);
    }
    engine.load(graph).unwrap();

    engine.start(None).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(engine.pause());
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(actuator.actions().is_empty());

    assert!(engine.resume());
    let summary = finish(&engine).await;

    let order = clicks(&actuator);
    let mut sorted = order.clone();
    sorted.sort();
    assert_eq!(sorted, vec![1, 2, 3, 11, 12, 13]);
    for i in 1..=3 {
        let first = order.iter().position(|x| *x == i as i32).unwrap();
        let second = order.iter().position(|x| *x == 10 + i as i32).unwrap();
        assert!(first < second, "branch {} ran out of order: {:?}", i, order);
    }
    assert_eq!(summary.nodes_executed, 10);
}

#[tokio::test]
async fn stop_interrupts_waits_and_returns_to_idle() {
    let (engine, actuator) = engine();
    let mut graph = Graph::new();
    graph
        .add_node(Node::new("s", NodeType::Start))
        .add_node(wait("w", 30.0))
        .add_node(click("m", 1));
    graph.connect("s", "out", "w").connect("w", "out", "m");
    engine.load(graph).unwrap();

    engine.start(None).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(engine.stop());
    tokio::time::timeout(Duration::from_secs(2), engine.wait_idle())
        .await
        .expect("stop did not end the run");

    assert_eq!(engine.state(), EngineState::Idle);
    assert!(!engine.stop());
    assert!(actuator.actions().is_empty());
}

#[tokio::test]
async fn end_node_stops_sibling_branches() {
    let (engine, actuator) = engine();
    let mut graph = Graph::new();
    graph
        .add_node(Node::new("s", NodeType::Start))
        .add_node(Node::new("e", NodeType::End))
        .add_node(wait("w", 30.0))
        .add_node(click("m", 1));
    graph
        .connect("s", "out", "w")
        .connect("s", "out", "e")
        .connect("w", "out", "m");
    engine.load(graph).unwrap();

    engine.start(None).unwrap();
    tokio::time::timeout(Duration::from_secs(2), engine.wait_idle())
        .await
        .expect("end did not stop the run");
    assert!(actuator.actions().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn breakpoint_pauses_before_the_node() {
    let (engine, actuator) = engine();
    let mut graph = Graph::new();
    graph.add_node(Node::new("s", NodeType::Start)).add_node(click("m", 4));
    graph.connect("s", "out", "m");
    engine.load(graph).unwrap();
    engine.set_breakpoint("m", true);
    let mut events = engine.subscribe();

    engine.start(None).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.state(), EngineState::Paused);
    assert!(actuator.actions().is_empty());

    assert!(engine.resume());
    finish(&engine).await;
    assert_eq!(clicks(&actuator), vec![4]);

    let mut hit = false;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::Log {
            level: LogLevel::Paused,
            message,
            ..
        } = event
        {
            hit |= message.contains("Breakpoint");
        }
    }
    assert!(hit);
}

fn fan_out() -> Graph {
    let mut graph = Graph::new();
    graph
        .add_node(Node::new("s", NodeType::Start))
        .add_node(wait("a", 0.05))
        .add_node(wait("b", 0.05));
    graph.connect("s", "out", "a").connect("s", "out", "b");
    graph
}

#[tokio::test]
async fn forks_over_the_cap_are_dropped() {
    let mut config = config();
    config.engine.max_concurrency = 2;
    let (engine, _) = engine_with(config);
    engine.load(fan_out()).unwrap();

    engine.start(None).unwrap();
    let summary = finish(&engine).await;

    assert_eq!(summary.dropped_forks, 1);
    assert_eq!(summary.nodes_executed, 2);
}

#[tokio::test]
async fn forks_over_the_cap_can_be_queued() {
    let mut config = config();
    config.engine.max_concurrency = 2;
    config.engine.overflow = OverflowPolicy::Queue;
    let (engine, _) = engine_with(config);
    engine.load(fan_out()).unwrap();

    engine.start(None).unwrap();
    let summary = finish(&engine).await;

    assert_eq!(summary.dropped_forks, 0);
    assert_eq!(summary.nodes_executed, 3);
}

#[tokio::test]
async fn start_preconditions_are_reported() {
    let (engine, _) = engine();
    assert!(matches!(engine.start(None), Err(EngineError::NoGraph)));

    let mut no_start = Graph::new();
    no_start.add_node(click("m", 1));
    engine.load(no_start).unwrap();
    assert!(matches!(engine.start(None), Err(EngineError::NoStartNode)));
    assert!(matches!(
        engine.start(Some("ghost")),
        Err(EngineError::UnknownStartNode(id)) if id == "ghost"
    ));

    let mut dangling = Graph::new();
    dangling.add_node(Node::new("s", NodeType::Start));
    dangling.links.push(Link::new("s", "out", "nowhere"));
    assert!(matches!(engine.load(dangling), Err(EngineError::InvalidGraph(_))));

    let mut long = Graph::new();
    long.add_node(Node::new("s", NodeType::Start)).add_node(wait("w", 30.0));
    long.connect("s", "out", "w");
    engine.load(long).unwrap();
    engine.start(None).unwrap();
    assert!(matches!(engine.start(None), Err(EngineError::AlreadyRunning)));
    engine.stop();
    finish(&engine).await;
}

#[tokio::test]
async fn start_from_a_chosen_node() {
    let (engine, actuator) = engine();
    let mut graph = Graph::new();
    graph
        .add_node(Node::new("s", NodeType::Start))
        .add_node(click("skipped", 1))
        .add_node(click("chosen", 2));
    graph.connect("s", "out", "skipped");
    engine.load(graph).unwrap();

    engine.start(Some("chosen")).unwrap();
    finish(&engine).await;

    assert_eq!(clicks(&actuator), vec![2]);
}
