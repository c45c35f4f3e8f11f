//! End-to-end engine scenarios: chains, branching, loops, retry
//! exhaustion, parallel isolation, cancellation, and recovery.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use flowrun::{
    share_workflow, validate_workflow, ActionHandler, CompareOp, ConditionExpr, EngineError,
    EngineResult, ExecutionContext, ExecutionStatus, NodeKind, RecoveryStrategy, Workflow,
    WorkflowEdge, WorkflowEngine, WorkflowNode, WorkflowTrigger, TRIGGER_SOURCE,
};

fn obj(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(m) => m,
        _ => panic!("expected object"),
    }
}

fn action_node(id: &str, action: &str) -> WorkflowNode {
    WorkflowNode {
        id: id.into(),
        name: String::new(),
        kind: NodeKind::Action {
            action: action.into(),
        },
        config: Map::new(),
        outputs: vec![],
    }
}

fn workflow(nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> Workflow {
    let mut wf = Workflow::new("tester", "scenario", WorkflowTrigger::manual());
    wf.nodes = nodes;
    wf.edges = edges;
    wf
}

/// Counts invocations and returns a fixed output map.
struct CountingHandler {
    calls: Arc<AtomicUsize>,
    output: Map<String, Value>,
}

impl CountingHandler {
    fn new(calls: Arc<AtomicUsize>) -> Self {
        CountingHandler {
            calls,
            output: Map::new(),
        }
    }
}

#[async_trait]
impl ActionHandler for CountingHandler {
    async fn execute(
        &self,
        _config: &Map<String, Value>,
        _context: &ExecutionContext,
    ) -> EngineResult<Map<String, Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

/// Always raises a recoverable error.
struct AlwaysFailing {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ActionHandler for AlwaysFailing {
    async fn execute(
        &self,
        _config: &Map<String, Value>,
        _context: &ExecutionContext,
    ) -> EngineResult<Map<String, Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(EngineError::execution("upstream service down"))
    }
}

// ================================
// Scenario A: simple action chain
// ================================

#[tokio::test]
async fn simple_action_chain_completes() {
    let engine = WorkflowEngine::with_defaults();
    let calls_a = Arc::new(AtomicUsize::new(0));
    let calls_b = Arc::new(AtomicUsize::new(0));
    engine.register_action("act_a", Arc::new(CountingHandler::new(calls_a.clone())));
    engine.register_action("act_b", Arc::new(CountingHandler::new(calls_b.clone())));

    let wf = share_workflow(workflow(
        vec![action_node("a", "act_a"), action_node("b", "act_b")],
        vec![
            WorkflowEdge::new(TRIGGER_SOURCE, "a"),
            WorkflowEdge::new("a", "b"),
        ],
    ));

    let exec = engine.execute(&wf, Map::new(), Map::new()).await.unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(exec.steps.len(), 2);
    assert!(exec
        .steps
        .iter()
        .all(|s| s.status == ExecutionStatus::Completed));
    assert_eq!(exec.steps[0].node_id, "a");
    assert_eq!(exec.steps[1].node_id, "b");
    assert_eq!(calls_a.load(Ordering::SeqCst), 1);
    assert_eq!(calls_b.load(Ordering::SeqCst), 1);
}

// ================================
// Scenario B: condition branch
// ================================

#[tokio::test]
async fn condition_routes_true_branch_only() {
    let engine = WorkflowEngine::with_defaults();
    let calls_c = Arc::new(AtomicUsize::new(0));
    let calls_d = Arc::new(AtomicUsize::new(0));
    engine.register_action("act_c", Arc::new(CountingHandler::new(calls_c.clone())));
    engine.register_action("act_d", Arc::new(CountingHandler::new(calls_d.clone())));

    let gate = WorkflowNode {
        id: "gate".into(),
        name: String::new(),
        kind: NodeKind::Condition {
            condition: Some(ConditionExpr::Simple {
                field: "{{input.amount}}".into(),
                operator: CompareOp::GreaterThan,
                value: json!(100),
            }),
            true_branch: vec!["c".into()],
            false_branch: vec!["d".into()],
        },
        config: Map::new(),
        outputs: vec![],
    };
    let wf = share_workflow(workflow(
        vec![gate, action_node("c", "act_c"), action_node("d", "act_d")],
        vec![WorkflowEdge::new(TRIGGER_SOURCE, "gate")],
    ));

    let exec = engine
        .execute(&wf, obj(json!({"amount": 150})), Map::new())
        .await
        .unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    // Exactly one step beyond the condition step, and it is C.
    assert_eq!(exec.steps.len(), 2);
    assert_eq!(exec.steps[0].node_id, "gate");
    assert_eq!(exec.steps[0].output["branch"], json!("true"));
    assert_eq!(exec.steps[1].node_id, "c");
    assert_eq!(calls_c.load(Ordering::SeqCst), 1);
    assert_eq!(calls_d.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn condition_without_expression_is_always_true() {
    let engine = WorkflowEngine::with_defaults();
    let calls = Arc::new(AtomicUsize::new(0));
    engine.register_action("act", Arc::new(CountingHandler::new(calls.clone())));

    let gate = WorkflowNode {
        id: "gate".into(),
        name: String::new(),
        kind: NodeKind::Condition {
            condition: None,
            true_branch: vec!["c".into()],
            false_branch: vec![],
        },
        config: Map::new(),
        outputs: vec![],
    };
    let wf = share_workflow(workflow(
        vec![gate, action_node("c", "act")],
        vec![WorkflowEdge::new(TRIGGER_SOURCE, "gate")],
    ));

    let exec = engine.execute(&wf, Map::new(), Map::new()).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ================================
// Scenario C: loop
// ================================

#[tokio::test]
async fn loop_runs_body_once_per_item() {
    let engine = WorkflowEngine::with_defaults();
    let calls = Arc::new(AtomicUsize::new(0));
    engine.register_action("act_e", Arc::new(CountingHandler::new(calls.clone())));

    let each = WorkflowNode {
        id: "each".into(),
        name: String::new(),
        kind: NodeKind::Loop {
            collection: "{{input.items}}".into(),
            item_variable: "item".into(),
            body: vec!["e".into()],
        },
        config: Map::new(),
        outputs: vec![],
    };
    let wf = share_workflow(workflow(
        vec![each, action_node("e", "act_e")],
        vec![WorkflowEdge::new(TRIGGER_SOURCE, "each")],
    ));

    let exec = engine
        .execute(&wf, obj(json!({"items": ["x", "y", "z"]})), Map::new())
        .await
        .unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let e_steps = exec.steps_for_node("e");
    assert_eq!(e_steps.len(), 3);
    for (i, step) in e_steps.iter().enumerate() {
        assert_eq!(step.input["context"]["item_index"], json!(i));
    }
    // The loop's own step records the iteration count.
    let loop_step = &exec.steps_for_node("each")[0];
    assert_eq!(loop_step.output["iterations"], json!(3));
}

#[tokio::test]
async fn loop_over_non_list_runs_zero_iterations() {
    let engine = WorkflowEngine::with_defaults();
    let calls = Arc::new(AtomicUsize::new(0));
    engine.register_action("act_e", Arc::new(CountingHandler::new(calls.clone())));

    let each = WorkflowNode {
        id: "each".into(),
        name: String::new(),
        kind: NodeKind::Loop {
            collection: "{{input.not_a_list}}".into(),
            item_variable: "item".into(),
            body: vec!["e".into()],
        },
        config: Map::new(),
        outputs: vec![],
    };
    let wf = share_workflow(workflow(
        vec![each, action_node("e", "act_e")],
        vec![WorkflowEdge::new(TRIGGER_SOURCE, "each")],
    ));

    let exec = engine
        .execute(&wf, obj(json!({"not_a_list": 42})), Map::new())
        .await
        .unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(exec.steps_for_node("each")[0].output["iterations"], json!(0));
}

// ================================
// Scenario D: retry exhaustion
// ================================

#[tokio::test]
async fn retry_budget_exhaustion_fails_execution() {
    let engine = WorkflowEngine::with_defaults();
    let calls = Arc::new(AtomicUsize::new(0));
    engine.register_action("flaky", Arc::new(AlwaysFailing { calls: calls.clone() }));

    let mut node = action_node("a", "flaky");
    node.config = obj(json!({
        "retry": {"max_retries": 2, "initial_delay_ms": 1, "backoff": "fixed"}
    }));
    let wf = share_workflow(workflow(
        vec![node],
        vec![WorkflowEdge::new(TRIGGER_SOURCE, "a")],
    ));

    let exec = engine.execute(&wf, Map::new(), Map::new()).await.unwrap();

    assert_eq!(exec.status, ExecutionStatus::Failed);
    let err = exec.error.as_ref().unwrap();
    assert_eq!(err.kind, flowrun::ErrorKind::RetryExhausted);
    assert!(!err.is_recoverable());
    assert_eq!(err.details["last_error"], json!("upstream service down"));

    // Two retry sleeps means three invocations total.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let step = &exec.steps[0];
    assert_eq!(step.retry_count, 2);
    assert_eq!(step.status, ExecutionStatus::Failed);
    assert!(step.error.as_deref().unwrap().contains("upstream service down"));
    assert_eq!(wf.read().failure_count, 1);
}

// ================================
// Scenario E: validation
// ================================

#[test]
fn validator_reports_dangling_edge_target() {
    let wf = workflow(
        vec![action_node("a", "noop")],
        vec![
            WorkflowEdge::new(TRIGGER_SOURCE, "a"),
            WorkflowEdge::new("a", "ghost"),
        ],
    );
    let errors = validate_workflow(&wf);
    assert!(!errors.is_empty());
    assert!(errors.iter().any(|e| e.contains("ghost")), "{:?}", errors);
}

// ================================
// Parallel branches
// ================================

/// Records what it saw in the context under "observed", after an optional
/// sleep, and publishes its configured "mark".
struct ProbeHandler {
    sleep_ms: u64,
    seen: Arc<Mutex<Vec<Option<Value>>>>,
}

#[async_trait]
impl ActionHandler for ProbeHandler {
    async fn execute(
        &self,
        config: &Map<String, Value>,
        context: &ExecutionContext,
    ) -> EngineResult<Map<String, Value>> {
        if self.sleep_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.sleep_ms)).await;
        }
        self.seen.lock().push(context.get("mark").cloned());
        let mut out = Map::new();
        if let Some(mark) = config.get("mark") {
            out.insert("mark".into(), mark.clone());
        }
        Ok(out)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_branches_are_isolated_and_merge_in_order() {
    let engine = WorkflowEngine::with_defaults();
    let seen = Arc::new(Mutex::new(Vec::new()));

    // Slow branch observes the context *after* the fast branch has
    // published; snapshot isolation means it must not see the write.
    engine.register_action(
        "slow",
        Arc::new(ProbeHandler { sleep_ms: 80, seen: seen.clone() }),
    );
    engine.register_action(
        "fast",
        Arc::new(ProbeHandler { sleep_ms: 0, seen: seen.clone() }),
    );

    let mut slow_node = action_node("slow_n", "slow");
    slow_node.config = obj(json!({"mark": "from_slow"}));
    slow_node.outputs = vec!["mark".into()];
    let mut fast_node = action_node("fast_n", "fast");
    fast_node.config = obj(json!({"mark": "from_fast"}));
    fast_node.outputs = vec!["mark".into()];

    let fan = WorkflowNode {
        id: "fan".into(),
        name: String::new(),
        kind: NodeKind::Parallel {
            branches: vec![vec!["slow_n".into()], vec!["fast_n".into()]],
        },
        config: Map::new(),
        outputs: vec![],
    };
    let wf = share_workflow(workflow(
        vec![fan, slow_node, fast_node],
        vec![WorkflowEdge::new(TRIGGER_SOURCE, "fan")],
    ));

    let exec = engine.execute(&wf, Map::new(), Map::new()).await.unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(exec.steps.len(), 3);
    // Neither branch saw a sibling's write.
    assert!(seen.lock().iter().all(|v| v.is_none()));
    // After the join, branch writes merge in declaration order: the
    // second branch is the last writer.
    assert_eq!(exec.context["mark"], json!("from_fast"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_branches_overlap_in_time() {
    struct Gauge {
        current: Arc<AtomicUsize>,
        max_seen: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ActionHandler for Gauge {
        async fn execute(
            &self,
            _config: &Map<String, Value>,
            _context: &ExecutionContext,
        ) -> EngineResult<Map<String, Value>> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(Map::new())
        }
    }

    let engine = WorkflowEngine::with_defaults();
    let current = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    engine.register_action(
        "gauge",
        Arc::new(Gauge { current: current.clone(), max_seen: max_seen.clone() }),
    );

    let fan = WorkflowNode {
        id: "fan".into(),
        name: String::new(),
        kind: NodeKind::Parallel {
            branches: vec![vec!["g1".into()], vec!["g2".into()], vec!["g3".into()]],
        },
        config: Map::new(),
        outputs: vec![],
    };
    let wf = share_workflow(workflow(
        vec![
            fan,
            action_node("g1", "gauge"),
            action_node("g2", "gauge"),
            action_node("g3", "gauge"),
        ],
        vec![WorkflowEdge::new(TRIGGER_SOURCE, "fan")],
    ));

    let exec = engine.execute(&wf, Map::new(), Map::new()).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert!(max_seen.load(Ordering::SeqCst) >= 2, "branches did not overlap");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_branch_failure_fails_the_join() {
    let engine = WorkflowEngine::with_defaults();
    let calls = Arc::new(AtomicUsize::new(0));
    engine.register_action("ok", Arc::new(CountingHandler::new(calls.clone())));
    engine.register_action("bad", Arc::new(AlwaysFailing { calls: calls.clone() }));

    let mut bad_node = action_node("bad_n", "bad");
    bad_node.config = obj(json!({"retry": {"max_retries": 0, "initial_delay_ms": 1}}));

    let fan = WorkflowNode {
        id: "fan".into(),
        name: String::new(),
        kind: NodeKind::Parallel {
            branches: vec![vec!["ok_n".into()], vec!["bad_n".into()]],
        },
        config: Map::new(),
        outputs: vec![],
    };
    let wf = share_workflow(workflow(
        vec![fan, action_node("ok_n", "ok"), bad_node],
        vec![WorkflowEdge::new(TRIGGER_SOURCE, "fan")],
    ));

    let exec = engine.execute(&wf, Map::new(), Map::new()).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Failed);
    // The parallel node's own step failed after the join.
    let fan_step = &exec.steps_for_node("fan")[0];
    assert_eq!(fan_step.status, ExecutionStatus::Failed);
}

// ================================
// Delay and cancellation
// ================================

#[tokio::test]
async fn delay_in_the_past_is_a_noop() {
    let engine = WorkflowEngine::with_defaults();
    let wait = WorkflowNode {
        id: "wait".into(),
        name: String::new(),
        kind: NodeKind::Delay {
            duration_ms: None,
            until: Some("2000-01-01T00:00:00Z".into()),
        },
        config: Map::new(),
        outputs: vec![],
    };
    let wf = share_workflow(workflow(
        vec![wait],
        vec![WorkflowEdge::new(TRIGGER_SOURCE, "wait")],
    ));

    let started = std::time::Instant::now();
    let exec = engine.execute(&wf, Map::new(), Map::new()).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(exec.steps[0].output["slept_ms"], json!(0));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_wakes_a_sleeping_delay() {
    let engine = Arc::new(WorkflowEngine::with_defaults());
    let calls = Arc::new(AtomicUsize::new(0));
    engine.register_action("after", Arc::new(CountingHandler::new(calls.clone())));

    let wait = WorkflowNode {
        id: "wait".into(),
        name: String::new(),
        kind: NodeKind::Delay {
            duration_ms: Some(60_000),
            until: None,
        },
        config: Map::new(),
        outputs: vec![],
    };
    let wf = share_workflow(workflow(
        vec![wait, action_node("a", "after")],
        vec![
            WorkflowEdge::new(TRIGGER_SOURCE, "wait"),
            WorkflowEdge::new("wait", "a"),
        ],
    ));

    let run = {
        let engine = engine.clone();
        let wf = wf.clone();
        tokio::spawn(async move { engine.execute(&wf, Map::new(), Map::new()).await })
    };

    // Wait until the delay step is actually sleeping, then cancel.
    let execution_id = loop {
        let live = engine.get_running_executions();
        if let Some(exec) = live.iter().find(|e| !e.steps.is_empty()) {
            break exec.id.clone();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    let started = std::time::Instant::now();
    assert!(engine.cancel_execution(&execution_id));

    let exec = run.await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(exec.status, ExecutionStatus::Cancelled);
    assert!(exec.finished_at.is_some());
    // No further steps started after cancellation.
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(exec.steps.len(), 1);
    assert_eq!(exec.steps[0].status, ExecutionStatus::Cancelled);
    // A second cancel is a no-op.
    assert!(!engine.cancel_execution(&exec.id));
}

// ================================
// Context publishing
// ================================

#[tokio::test]
async fn published_outputs_flow_into_later_templates() {
    struct Lookup;

    #[async_trait]
    impl ActionHandler for Lookup {
        async fn execute(
            &self,
            _config: &Map<String, Value>,
            _context: &ExecutionContext,
        ) -> EngineResult<Map<String, Value>> {
            Ok(obj(json!({"customer": {"email": "ada@example.com"}, "ignored": 1})))
        }
    }

    struct CaptureConfig {
        configs: Arc<Mutex<Vec<Map<String, Value>>>>,
    }

    #[async_trait]
    impl ActionHandler for CaptureConfig {
        async fn execute(
            &self,
            config: &Map<String, Value>,
            _context: &ExecutionContext,
        ) -> EngineResult<Map<String, Value>> {
            self.configs.lock().push(config.clone());
            Ok(Map::new())
        }
    }

    let engine = WorkflowEngine::with_defaults();
    let configs = Arc::new(Mutex::new(Vec::new()));
    engine.register_action("lookup", Arc::new(Lookup));
    engine.register_action("send", Arc::new(CaptureConfig { configs: configs.clone() }));

    let mut lookup_node = action_node("lookup_n", "lookup");
    // Only the declared name is published; "ignored" stays step-local.
    lookup_node.outputs = vec!["customer".into()];
    let mut send_node = action_node("send_n", "send");
    send_node.config = obj(json!({"to": "{{customer.email}}", "missing": "{{ignored}}"}));

    let wf = share_workflow(workflow(
        vec![lookup_node, send_node],
        vec![
            WorkflowEdge::new(TRIGGER_SOURCE, "lookup_n"),
            WorkflowEdge::new("lookup_n", "send_n"),
        ],
    ));

    let exec = engine.execute(&wf, Map::new(), Map::new()).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);

    let captured = configs.lock();
    assert_eq!(captured[0]["to"], json!("ada@example.com"));
    // Unpublished output resolves as missing -> native null.
    assert_eq!(captured[0]["missing"], Value::Null);
    assert_eq!(exec.context["customer"]["email"], json!("ada@example.com"));
}

// ================================
// Recovery
// ================================

#[tokio::test]
async fn skip_recovery_resumes_after_failed_node() {
    let engine = WorkflowEngine::with_defaults();
    let tail_calls = Arc::new(AtomicUsize::new(0));
    let fail_calls = Arc::new(AtomicUsize::new(0));
    engine.register_action("bad", Arc::new(AlwaysFailing { calls: fail_calls.clone() }));
    engine.register_action("tail", Arc::new(CountingHandler::new(tail_calls.clone())));

    let mut bad_node = action_node("bad_n", "bad");
    bad_node.config = obj(json!({"retry": {"max_retries": 0, "initial_delay_ms": 1}}));
    let wf = share_workflow(workflow(
        vec![bad_node, action_node("tail_n", "tail")],
        vec![
            WorkflowEdge::new(TRIGGER_SOURCE, "bad_n"),
            WorkflowEdge::new("bad_n", "tail_n"),
        ],
    ));

    let exec = engine.execute(&wf, Map::new(), Map::new()).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(tail_calls.load(Ordering::SeqCst), 0);

    let recovered = engine
        .recover_execution(&wf, &exec.id, &RecoveryStrategy::Skip)
        .await
        .unwrap();

    assert_eq!(recovered.status, ExecutionStatus::Completed);
    assert_eq!(tail_calls.load(Ordering::SeqCst), 1);
    // The failed step stays in the history for diagnosis.
    assert_eq!(
        recovered.steps_for_node("bad_n")[0].status,
        ExecutionStatus::Failed
    );
    assert_eq!(
        recovered.steps_for_node("tail_n")[0].status,
        ExecutionStatus::Completed
    );
}

#[tokio::test]
async fn escalate_recovery_parks_execution_as_waiting() {
    let engine = WorkflowEngine::with_defaults();
    let calls = Arc::new(AtomicUsize::new(0));
    engine.register_action("bad", Arc::new(AlwaysFailing { calls }));

    let mut bad_node = action_node("bad_n", "bad");
    bad_node.config = obj(json!({"retry": {"max_retries": 0, "initial_delay_ms": 1}}));
    let wf = share_workflow(workflow(
        vec![bad_node],
        vec![WorkflowEdge::new(TRIGGER_SOURCE, "bad_n")],
    ));

    let exec = engine.execute(&wf, Map::new(), Map::new()).await.unwrap();
    let parked = engine
        .recover_execution(&wf, &exec.id, &RecoveryStrategy::Escalate)
        .await
        .unwrap();

    assert_eq!(parked.status, ExecutionStatus::Waiting);
    assert!(parked.error.is_some());
    assert_eq!(
        engine.get_execution(&exec.id).unwrap().status,
        ExecutionStatus::Waiting
    );
}
