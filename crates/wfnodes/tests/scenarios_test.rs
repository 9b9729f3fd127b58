use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wfcore::{
    DomainEvent, FlowError, FlowRecord, NodeRecord, PendingStep, ProcessDefinition,
    RegistrationResult, ResumeSignal, TriggerKind, TriggerRegistrar, TriggerRequest,
    WorkflowError, WorkflowState, WorkflowStatus,
};
use wfnodes::standard_registry;
use wfruntime::{
    FlowRuntime, InMemoryStateRepository, InMemoryTriggerRegistrar, RuntimeConfig, StartOptions,
    StateRepository, TurnReport,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

struct Harness {
    runtime: FlowRuntime,
    repository: Arc<InMemoryStateRepository>,
    triggers: Arc<InMemoryTriggerRegistrar>,
}

fn harness_with(config: RuntimeConfig) -> Harness {
    init_tracing();
    let repository = Arc::new(InMemoryStateRepository::new());
    let triggers = Arc::new(InMemoryTriggerRegistrar::new());
    let runtime = FlowRuntime::new(
        Arc::new(standard_registry()),
        repository.clone(),
        triggers.clone(),
        config,
    );
    Harness {
        runtime,
        repository,
        triggers,
    }
}

fn harness() -> Harness {
    harness_with(RuntimeConfig::default())
}

impl Harness {
    async fn start(&self, definition: ProcessDefinition) -> TurnReport {
        let id = definition.id.clone();
        self.runtime.register_definition(definition).await.unwrap();
        self.runtime
            .start_workflow(&id, StartOptions::new())
            .await
            .unwrap()
    }

    async fn resume(&self, workflow_id: &str, node_id: &str, signal: ResumeSignal) -> TurnReport {
        self.runtime.resume(workflow_id, node_id, signal).await.unwrap()
    }

    async fn stored(&self, workflow_id: &str) -> WorkflowState {
        self.repository.get(workflow_id).await.unwrap().unwrap()
    }
}

fn status(report: &TurnReport, node_id: &str) -> Option<WorkflowStatus> {
    report.state.last_node_snapshot(node_id).map(|s| s.status)
}

fn finished_count(report: &TurnReport, node_id: &str) -> usize {
    report
        .state
        .executed_nodes()
        .iter()
        .filter(|s| s.node_id == node_id)
        .count()
}

fn outcome(name: &str) -> ResumeSignal {
    ResumeSignal::new().with_outcome(name)
}

fn add(def: &mut ProcessDefinition, id: &str, node_type: &str) {
    def.add_node(NodeRecord::new(id, node_type));
}

/// start -> task -> end
fn single_task() -> ProcessDefinition {
    let mut def = ProcessDefinition::new("single-task");
    add(&mut def, "start", "startEvent");
    add(&mut def, "task", "userTask");
    add(&mut def, "end", "endEvent");
    def.connect("f1", "start", "task");
    def.connect("f2", "task", "end");
    def
}

/// start -> split -> (a, b) -> join -> after -> end
fn parallel() -> ProcessDefinition {
    let mut def = ProcessDefinition::new("parallel");
    add(&mut def, "start", "startEvent");
    add(&mut def, "split", "parallelGateway");
    add(&mut def, "a", "userTask");
    add(&mut def, "b", "serviceTask");
    add(&mut def, "join", "parallelGateway");
    add(&mut def, "after", "userTask");
    add(&mut def, "end", "endEvent");
    def.connect("f1", "start", "split");
    def.connect("f2", "split", "a");
    def.connect("f3", "split", "b");
    def.connect("f4", "a", "join");
    def.connect("f5", "b", "join");
    def.connect("f6", "join", "after");
    def.connect("f7", "after", "end");
    def
}

/// start -> review -> decide -(Approve)-> approved / -(Reject)-> rejected
fn approval() -> ProcessDefinition {
    let mut def = ProcessDefinition::new("approval");
    add(&mut def, "start", "startEvent");
    add(&mut def, "review", "userTask");
    add(&mut def, "decide", "exclusiveGateway");
    add(&mut def, "approved", "endEvent");
    add(&mut def, "rejected", "endEvent");
    def.connect("f1", "start", "review");
    def.connect("f2", "review", "decide");
    def.add_flow(FlowRecord::new("f3", "decide", "approved").with_condition("Approve"));
    def.add_flow(FlowRecord::new("f4", "decide", "rejected").with_condition("Reject"));
    def
}

#[tokio::test]
async fn test_start_task_resume_end() {
    let h = harness();
    let started = h.start(single_task()).await;

    assert_eq!(started.status, WorkflowStatus::Halted);
    assert_eq!(started.blocking_nodes, vec!["task".to_string()]);
    assert_eq!(status(&started, "start"), Some(WorkflowStatus::Finished));
    assert!(started
        .events
        .iter()
        .any(|e| matches!(e, DomainEvent::ProcessStarted { .. })));

    let signal = ResumeSignal::new()
        .with_output("amount", 42)
        .by_user("alice");
    let done = h.resume(&started.workflow_id, "task", signal).await;

    assert_eq!(done.status, WorkflowStatus::Finished);
    assert_eq!(done.state.output.get("amount"), Some(&serde_json::json!(42)));
    assert_eq!(done.state.last_node_snapshot("task").unwrap().outcomes, vec!["Done"]);
    let executed: Vec<&str> = done
        .state
        .executed_nodes()
        .iter()
        .map(|s| s.node_id.as_str())
        .collect();
    assert_eq!(executed, vec!["start", "task", "end"]);
    assert!(matches!(
        done.events.last(),
        Some(DomainEvent::WorkflowFinished { status: WorkflowStatus::Finished, node, .. }) if node.id == "end"
    ));

    let stored = h.stored(&started.workflow_id).await;
    assert_eq!(stored, done.state);
}

#[tokio::test]
async fn test_parallel_join_fires_once_in_any_order() {
    for order in [["a", "b"], ["b", "a"]] {
        let h = harness();
        let started = h.start(parallel()).await;
        assert_eq!(started.blocking_nodes, vec!["a".to_string(), "b".to_string()]);

        let first = h.resume(&started.workflow_id, order[0], ResumeSignal::new()).await;
        assert_eq!(status(&first, "join"), Some(WorkflowStatus::Idle));
        assert_eq!(status(&first, "after"), None);
        assert_eq!(first.status, WorkflowStatus::Halted);

        let second = h.resume(&started.workflow_id, order[1], ResumeSignal::new()).await;
        assert_eq!(finished_count(&second, "join"), 1, "join fires once for {:?}", order);
        assert_eq!(status(&second, "after"), Some(WorkflowStatus::Halted));
        assert_eq!(second.blocking_nodes, vec!["after".to_string()]);
    }
}

#[tokio::test]
async fn test_exclusive_gateway_takes_one_branch() {
    let h = harness();
    let started = h.start(approval()).await;

    let done = h.resume(&started.workflow_id, "review", outcome("Approve")).await;
    assert_eq!(done.status, WorkflowStatus::Finished);
    assert_eq!(status(&done, "approved"), Some(WorkflowStatus::Finished));
    assert_eq!(status(&done, "rejected"), None);

    // both conditions hold: the first flow in definition order wins
    let started = h.runtime.start_workflow("approval", StartOptions::new()).await.unwrap();
    let signal = ResumeSignal::new().with_outcome("Reject").with_outcome("Approve");
    let done = h.resume(&started.workflow_id, "review", signal).await;
    assert_eq!(status(&done, "approved"), Some(WorkflowStatus::Finished));
    assert_eq!(status(&done, "rejected"), None);
    assert_eq!(done.state.flow_snapshots.len(), 3);
}

#[tokio::test]
async fn test_exclusive_default_flow_taken_last() {
    let mut def = ProcessDefinition::new("default-flow");
    add(&mut def, "start", "startEvent");
    add(&mut def, "review", "userTask");
    add(&mut def, "decide", "exclusiveGateway");
    add(&mut def, "fallback", "userTask");
    add(&mut def, "yes", "userTask");
    add(&mut def, "end", "endEvent");
    def.connect("f1", "start", "review");
    def.connect("f2", "review", "decide");
    // declared before the conditional flow on purpose
    def.add_flow(FlowRecord::new("f_default", "decide", "fallback").as_default());
    def.add_flow(FlowRecord::new("f_yes", "decide", "yes").with_condition("Yes"));
    def.connect("f3", "fallback", "end");
    def.connect("f4", "yes", "end");

    let h = harness();
    let first = h.start(def).await;
    let matched = h.resume(&first.workflow_id, "review", outcome("Yes")).await;
    assert_eq!(matched.blocking_nodes, vec!["yes".to_string()]);
    assert!(matched.state.last_flow_snapshot("f_default").is_none());

    let second = h
        .runtime
        .start_workflow("default-flow", StartOptions::new())
        .await
        .unwrap();
    let unmatched = h.resume(&second.workflow_id, "review", outcome("Other")).await;
    assert_eq!(unmatched.blocking_nodes, vec!["fallback".to_string()]);
    assert!(unmatched.state.last_flow_snapshot("f_yes").is_none());
}

#[tokio::test]
async fn test_exclusive_without_match_is_modeling_fault() {
    let h = harness();
    let started = h.start(approval()).await;

    let err = h
        .runtime
        .resume(&started.workflow_id, "review", outcome("Maybe"))
        .await
        .unwrap_err();
    assert!(err.is_modeling(), "unexpected error {:?}", err);

    // nothing from the failed turn was saved
    let stored = h.stored(&started.workflow_id).await;
    assert_eq!(stored, started.state);
}

#[tokio::test]
async fn test_event_based_race() {
    let mut def = ProcessDefinition::new("race");
    add(&mut def, "start", "startEvent");
    add(&mut def, "race", "eventBasedGateway");
    def.add_node(NodeRecord::new("msg", "messageIntermediateCatchEvent").with_config("message", "paid"));
    def.add_node(NodeRecord::new("timer", "timerIntermediateCatchEvent").with_config("duration", "PT1H"));
    add(&mut def, "ship", "userTask");
    add(&mut def, "remind", "userTask");
    add(&mut def, "end1", "endEvent");
    add(&mut def, "end2", "endEvent");
    def.connect("f1", "start", "race");
    def.connect("f2", "race", "msg");
    def.connect("f3", "race", "timer");
    def.connect("f4", "msg", "ship");
    def.connect("f5", "timer", "remind");
    def.connect("f6", "ship", "end1");
    def.connect("f7", "remind", "end2");

    let h = harness();
    let started = h.start(def).await;
    assert_eq!(started.blocking_nodes, vec!["msg".to_string(), "timer".to_string()]);
    assert!(started
        .events
        .iter()
        .any(|e| matches!(e, DomainEvent::TimerEventStart { node, .. } if node.id == "timer")));

    let armed = h.triggers.pending_for(&started.workflow_id).await;
    assert_eq!(armed.len(), 2);
    assert_eq!(armed[0].kind, TriggerKind::Message);
    assert_eq!(armed[0].config.get("message"), Some(&serde_json::json!("paid")));
    assert_eq!(armed[1].kind, TriggerKind::Timer);

    let won = h.resume(&started.workflow_id, "msg", ResumeSignal::new()).await;
    assert_eq!(status(&won, "msg"), Some(WorkflowStatus::Finished));
    assert_eq!(status(&won, "timer"), Some(WorkflowStatus::Aborted));
    assert_eq!(won.blocking_nodes, vec!["ship".to_string()]);
    assert!(won
        .events
        .iter()
        .any(|e| matches!(e, DomainEvent::NodeCancelled { node_id, .. } if node_id == "timer")));

    let late = h.resume(&started.workflow_id, "timer", ResumeSignal::new()).await;
    assert!(late.skipped.is_some());
    assert_eq!(status(&late, "remind"), None);
    assert_eq!(h.stored(&started.workflow_id).await, won.state);
}

#[tokio::test]
async fn test_duplicate_resume_is_skipped() {
    let h = harness();
    let started = h.start(parallel()).await;

    let first = h.resume(&started.workflow_id, "a", ResumeSignal::new()).await;
    let again = h.resume(&started.workflow_id, "a", ResumeSignal::new()).await;

    assert!(first.skipped.is_none());
    assert!(again.skipped.is_some());
    assert_eq!(again.state, first.state);
    assert_eq!(again.steps, 0);
    assert_eq!(h.stored(&started.workflow_id).await, first.state);
}

#[tokio::test]
async fn test_error_boundary_only_catches_faults() {
    let mut def = single_task();
    def.add_node(NodeRecord::new("catch", "errorBoundaryEvent").attached_to("task"));
    add(&mut def, "handler", "userTask");
    add(&mut def, "end2", "endEvent");
    def.connect("f3", "catch", "handler");
    def.connect("f4", "handler", "end2");

    let h = harness();
    let started = h.start(def).await;
    assert_eq!(status(&started, "catch"), None, "host is healthy");

    let caught = h
        .resume(&started.workflow_id, "task", ResumeSignal::new().failed("boom"))
        .await;
    assert_eq!(status(&caught, "task"), Some(WorkflowStatus::Faulted));
    assert_eq!(status(&caught, "catch"), Some(WorkflowStatus::Finished));
    assert_eq!(caught.state.last_node_snapshot("catch").unwrap().outcomes, vec!["Catched"]);
    assert_eq!(caught.blocking_nodes, vec!["handler".to_string()]);
    assert_eq!(caught.status, WorkflowStatus::Halted);
    assert!(caught.state.workflow.fault_message.is_none());
}

#[tokio::test]
async fn test_uncaught_fault_faults_workflow() {
    let h = harness();
    let started = h.start(single_task()).await;

    let faulted = h
        .resume(&started.workflow_id, "task", ResumeSignal::new().failed("boom"))
        .await;
    assert_eq!(faulted.status, WorkflowStatus::Faulted);
    assert_eq!(faulted.state.workflow.fault_message.as_deref(), Some("boom"));
    assert_eq!(
        faulted.state.last_node_snapshot("task").unwrap().message.as_deref(),
        Some("boom")
    );

    let err = h
        .runtime
        .resume(&started.workflow_id, "task", ResumeSignal::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FlowError::Workflow(WorkflowError::Terminated { status: WorkflowStatus::Faulted, .. })
    ));
}

fn timer_guarded() -> ProcessDefinition {
    let mut def = single_task();
    def.add_node(
        NodeRecord::new("deadline", "timerBoundaryEvent")
            .attached_to("task")
            .with_config("duration", "P1D"),
    );
    add(&mut def, "escalate", "userTask");
    add(&mut def, "end2", "endEvent");
    def.connect("f3", "deadline", "escalate");
    def.connect("f4", "escalate", "end2");
    def
}

#[tokio::test]
async fn test_timer_boundary_interrupts_host() {
    let h = harness();
    let started = h.start(timer_guarded()).await;
    assert_eq!(
        started.blocking_nodes,
        vec!["task".to_string(), "deadline".to_string()]
    );

    let fired = h.resume(&started.workflow_id, "deadline", ResumeSignal::new()).await;
    assert_eq!(status(&fired, "task"), Some(WorkflowStatus::Aborted));
    assert_eq!(status(&fired, "deadline"), Some(WorkflowStatus::Finished));
    assert_eq!(fired.blocking_nodes, vec!["escalate".to_string()]);
    assert!(fired
        .events
        .iter()
        .any(|e| matches!(e, DomainEvent::NodeCancelled { node_id, .. } if node_id == "task")));
}

#[tokio::test]
async fn test_host_completion_cancels_timer_boundary() {
    let h = harness();
    let started = h.start(timer_guarded()).await;

    let done = h.resume(&started.workflow_id, "task", ResumeSignal::new()).await;
    assert_eq!(status(&done, "deadline"), Some(WorkflowStatus::Aborted));
    assert_eq!(done.status, WorkflowStatus::Finished);

    let err = h
        .runtime
        .resume(&started.workflow_id, "deadline", ResumeSignal::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FlowError::Workflow(WorkflowError::Terminated { status: WorkflowStatus::Finished, .. })
    ));
}

/// start -> sub(sub_start -> inner -> sub_end) -> end
fn nested() -> ProcessDefinition {
    let mut def = ProcessDefinition::new("nested");
    add(&mut def, "start", "startEvent");
    add(&mut def, "sub", "subProcess");
    def.add_node(NodeRecord::new("sub_start", "startEvent").with_owner("sub"));
    def.add_node(NodeRecord::new("inner", "userTask").with_owner("sub"));
    def.add_node(NodeRecord::new("sub_end", "endEvent").with_owner("sub"));
    add(&mut def, "end", "endEvent");
    def.connect("f1", "start", "sub");
    def.connect("f2", "sub_start", "inner");
    def.connect("f3", "inner", "sub_end");
    def.connect("f4", "sub", "end");
    def
}

#[tokio::test]
async fn test_subprocess_halts_until_inner_end() {
    let h = harness();
    let started = h.start(nested()).await;
    assert_eq!(status(&started, "sub"), Some(WorkflowStatus::Halted));
    assert_eq!(status(&started, "inner"), Some(WorkflowStatus::Halted));
    assert_eq!(started.status, WorkflowStatus::Halted);

    let done = h.resume(&started.workflow_id, "inner", ResumeSignal::new()).await;
    assert_eq!(status(&done, "sub_end"), Some(WorkflowStatus::Finished));
    assert_eq!(status(&done, "sub"), Some(WorkflowStatus::Finished));
    assert_eq!(done.state.last_node_snapshot("sub").unwrap().outcomes, vec!["Done"]);
    assert_eq!(done.status, WorkflowStatus::Finished);
    let process_events = done
        .events
        .iter()
        .filter(|e| matches!(e, DomainEvent::ProcessFinished { .. }))
        .count();
    assert_eq!(process_events, 2, "inner and outer end events");
}

#[tokio::test]
async fn test_fault_bubbles_to_subprocess_boundary() {
    let mut def = nested();
    def.add_node(NodeRecord::new("catch", "errorBoundaryEvent").attached_to("sub"));
    add(&mut def, "handler", "userTask");
    add(&mut def, "end2", "endEvent");
    def.connect("f5", "catch", "handler");
    def.connect("f6", "handler", "end2");

    let h = harness();
    let started = h.start(def).await;
    let caught = h
        .resume(&started.workflow_id, "inner", ResumeSignal::new().failed("disk full"))
        .await;

    assert_eq!(status(&caught, "inner"), Some(WorkflowStatus::Faulted));
    assert_eq!(status(&caught, "sub"), Some(WorkflowStatus::Faulted));
    assert_eq!(status(&caught, "catch"), Some(WorkflowStatus::Finished));
    assert_eq!(caught.blocking_nodes, vec!["handler".to_string()]);
    assert_eq!(caught.status, WorkflowStatus::Halted);
}

#[tokio::test]
async fn test_cancel_end_aborts_subprocess() {
    let mut def = ProcessDefinition::new("cancelled");
    add(&mut def, "start", "startEvent");
    add(&mut def, "sub", "subProcess");
    def.add_node(NodeRecord::new("sub_start", "startEvent").with_owner("sub"));
    def.add_node(NodeRecord::new("split", "parallelGateway").with_owner("sub"));
    def.add_node(NodeRecord::new("inner", "userTask").with_owner("sub"));
    def.add_node(NodeRecord::new("stop", "cancelEndEvent").with_owner("sub"));
    def.add_node(NodeRecord::new("sub_end", "endEvent").with_owner("sub"));
    add(&mut def, "end", "endEvent");
    def.connect("f1", "start", "sub");
    def.connect("f2", "sub_start", "split");
    def.connect("f3", "split", "inner");
    def.connect("f4", "split", "stop");
    def.connect("f5", "inner", "sub_end");
    def.connect("f6", "sub", "end");

    let h = harness();
    let started = h.start(def).await;

    assert_eq!(status(&started, "inner"), Some(WorkflowStatus::Aborted));
    assert_eq!(status(&started, "stop"), Some(WorkflowStatus::Aborted));
    assert_eq!(status(&started, "sub"), Some(WorkflowStatus::Aborted));
    assert_eq!(status(&started, "end"), None);
    assert!(started.blocking_nodes.is_empty());
}

#[tokio::test]
async fn test_inclusive_split_and_join() {
    let mut def = ProcessDefinition::new("inclusive");
    add(&mut def, "start", "startEvent");
    add(&mut def, "review", "userTask");
    add(&mut def, "split", "inclusiveGateway");
    add(&mut def, "a", "userTask");
    add(&mut def, "b", "userTask");
    add(&mut def, "c", "userTask");
    add(&mut def, "join", "inclusiveGateway");
    add(&mut def, "after", "userTask");
    add(&mut def, "end", "endEvent");
    def.connect("f1", "start", "review");
    def.connect("f2", "review", "split");
    def.add_flow(FlowRecord::new("fa", "split", "a").with_condition("A"));
    def.add_flow(FlowRecord::new("fb", "split", "b").with_condition("B"));
    def.add_flow(FlowRecord::new("fc", "split", "c").with_condition("C"));
    def.connect("ja", "a", "join");
    def.connect("jb", "b", "join");
    def.connect("jc", "c", "join");
    def.connect("f3", "join", "after");
    def.connect("f4", "after", "end");

    let h = harness();
    let started = h.start(def).await;
    let signal = ResumeSignal::new().with_outcome("A").with_outcome("B");
    let split = h.resume(&started.workflow_id, "review", signal).await;
    assert_eq!(split.blocking_nodes, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(status(&split, "c"), None);

    let one = h.resume(&started.workflow_id, "a", ResumeSignal::new()).await;
    assert_eq!(status(&one, "join"), Some(WorkflowStatus::Idle), "b can still arrive");

    let both = h.resume(&started.workflow_id, "b", ResumeSignal::new()).await;
    assert_eq!(finished_count(&both, "join"), 1);
    assert_eq!(both.blocking_nodes, vec!["after".to_string()]);
}

#[tokio::test]
async fn test_end_event_waits_for_parallel_branches() {
    let mut def = ProcessDefinition::new("early-end");
    add(&mut def, "start", "startEvent");
    add(&mut def, "split", "parallelGateway");
    add(&mut def, "end1", "endEvent");
    add(&mut def, "b", "userTask");
    add(&mut def, "end2", "endEvent");
    def.connect("f1", "start", "split");
    def.connect("f2", "split", "end1");
    def.connect("f3", "split", "b");
    def.connect("f4", "b", "end2");

    let h = harness();
    let started = h.start(def).await;
    assert_eq!(status(&started, "end1"), Some(WorkflowStatus::Finished));
    assert_eq!(started.status, WorkflowStatus::Halted);

    let done = h.resume(&started.workflow_id, "b", ResumeSignal::new()).await;
    assert_eq!(done.status, WorkflowStatus::Finished);
}

#[tokio::test]
async fn test_terminate_end_aborts_workflow() {
    let mut def = ProcessDefinition::new("terminate");
    add(&mut def, "start", "startEvent");
    add(&mut def, "split", "parallelGateway");
    add(&mut def, "b", "userTask");
    add(&mut def, "stop", "terminateEndEvent");
    add(&mut def, "end", "endEvent");
    def.connect("f1", "start", "split");
    def.connect("f2", "split", "b");
    def.connect("f3", "split", "stop");
    def.connect("f4", "b", "end");

    let h = harness();
    let started = h.start(def).await;

    assert_eq!(started.status, WorkflowStatus::Aborted);
    assert_eq!(status(&started, "b"), Some(WorkflowStatus::Aborted));
    assert!(started.blocking_nodes.is_empty());
    assert!(started.events.iter().any(|e| matches!(
        e,
        DomainEvent::WorkflowFinished { status: WorkflowStatus::Aborted, .. }
    )));
}

#[tokio::test]
async fn test_throw_event_passes_through() {
    let mut def = ProcessDefinition::new("throw");
    add(&mut def, "start", "startEvent");
    add(&mut def, "notify", "intermediateThrowEvent");
    add(&mut def, "task", "manualTask");
    add(&mut def, "end", "endEvent");
    def.connect("f1", "start", "notify");
    def.connect("f2", "notify", "task");
    def.connect("f3", "task", "end");

    let h = harness();
    let started = h.start(def).await;
    assert_eq!(started.state.last_node_snapshot("notify").unwrap().outcomes, vec!["Throwed"]);
    assert_eq!(started.blocking_nodes, vec!["task".to_string()]);
}

struct RejectingRegistrar;

#[async_trait]
impl TriggerRegistrar for RejectingRegistrar {
    async fn register(&self, _request: TriggerRequest) -> RegistrationResult {
        RegistrationResult::failure("no broker")
    }
}

#[tokio::test]
async fn test_failed_registration_faults_catch_event() {
    init_tracing();
    let runtime = FlowRuntime::new(
        Arc::new(standard_registry()),
        Arc::new(InMemoryStateRepository::new()),
        Arc::new(RejectingRegistrar),
        RuntimeConfig::default(),
    );
    let mut def = ProcessDefinition::new("wait-message");
    add(&mut def, "start", "startEvent");
    add(&mut def, "msg", "messageIntermediateCatchEvent");
    add(&mut def, "end", "endEvent");
    def.connect("f1", "start", "msg");
    def.connect("f2", "msg", "end");
    runtime.register_definition(def).await.unwrap();

    let report = runtime
        .start_workflow("wait-message", StartOptions::new())
        .await
        .unwrap();
    assert_eq!(status(&report, "msg"), Some(WorkflowStatus::Faulted));
    assert_eq!(report.status, WorkflowStatus::Faulted);
    assert_eq!(report.state.workflow.fault_message.as_deref(), Some("no broker"));
}

#[tokio::test]
async fn test_cancelled_turn_is_persisted() {
    let h = harness();
    h.runtime.register_definition(single_task()).await.unwrap();
    let token = CancellationToken::new();
    token.cancel();

    let report = h
        .runtime
        .start_workflow("single-task", StartOptions::new().with_cancellation(token))
        .await
        .unwrap();

    assert!(report.interrupted);
    assert_eq!(report.steps, 0);
    assert_eq!(report.status, WorkflowStatus::Idle);
    assert_eq!(
        report.state.pending_steps,
        vec![PendingStep::StartScope {
            owner_id: String::new()
        }]
    );
    assert_eq!(h.stored(&report.workflow_id).await, report.state);

    let resumed = h
        .runtime
        .continue_workflow(&report.workflow_id, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!resumed.interrupted);
    assert!(resumed.pending.is_empty());
    assert_eq!(resumed.blocking_nodes, vec!["task".to_string()]);

    let idle = h
        .runtime
        .continue_workflow(&report.workflow_id, &CancellationToken::new())
        .await
        .unwrap();
    assert!(idle.skipped.is_some());
}

/// Accepts the wait, then cancels the turn that registered it
struct CancellingRegistrar {
    token: CancellationToken,
}

#[async_trait]
impl TriggerRegistrar for CancellingRegistrar {
    async fn register(&self, _request: TriggerRequest) -> RegistrationResult {
        self.token.cancel();
        RegistrationResult::success()
    }
}

#[tokio::test]
async fn test_interrupted_branch_runs_on_continue() {
    init_tracing();
    let token = CancellationToken::new();
    let runtime = FlowRuntime::new(
        Arc::new(standard_registry()),
        Arc::new(InMemoryStateRepository::new()),
        Arc::new(CancellingRegistrar {
            token: token.clone(),
        }),
        RuntimeConfig::default(),
    );
    let mut def = ProcessDefinition::new("split-wait");
    add(&mut def, "start", "startEvent");
    add(&mut def, "split", "parallelGateway");
    add(&mut def, "msg", "messageIntermediateCatchEvent");
    add(&mut def, "task", "userTask");
    add(&mut def, "end1", "endEvent");
    add(&mut def, "end2", "endEvent");
    def.connect("f1", "start", "split");
    def.connect("f2", "split", "msg");
    def.connect("f3", "split", "task");
    def.connect("f4", "msg", "end1");
    def.connect("f5", "task", "end2");
    runtime.register_definition(def).await.unwrap();

    let cut = runtime
        .start_workflow("split-wait", StartOptions::new().with_cancellation(token))
        .await
        .unwrap();
    assert!(cut.interrupted);
    assert_eq!(status(&cut, "msg"), Some(WorkflowStatus::Halted));
    assert_eq!(status(&cut, "task"), None);
    assert!(cut.state.last_flow_snapshot("f3").is_some());
    assert_eq!(cut.pending, vec!["task".to_string()]);

    let done = runtime
        .continue_workflow(&cut.workflow_id, &CancellationToken::new())
        .await
        .unwrap();
    assert!(done.state.pending_steps.is_empty());
    assert_eq!(done.blocking_nodes, vec!["msg".to_string(), "task".to_string()]);
    assert_eq!(done.state.last_node_snapshot("task").unwrap().incoming_flow.as_deref(), Some("f3"));
}

#[tokio::test]
async fn test_endless_loop_hits_step_limit() {
    let mut def = ProcessDefinition::new("loop");
    add(&mut def, "start", "startEvent");
    add(&mut def, "x", "exclusiveGateway");
    add(&mut def, "y", "parallelGateway");
    def.connect("f1", "start", "x");
    def.connect("f2", "x", "y");
    def.connect("f3", "y", "x");

    let h = harness_with(RuntimeConfig {
        max_steps: 50,
        ..RuntimeConfig::default()
    });
    h.runtime.register_definition(def).await.unwrap();
    let err = h
        .runtime
        .start_workflow("loop", StartOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        FlowError::Workflow(WorkflowError::StepLimitExceeded(50))
    ));
    assert!(err.is_modeling());
    assert!(h.repository.is_empty().await);
}

#[tokio::test]
async fn test_correlation_id_addresses_instance() {
    let h = harness();
    h.runtime.register_definition(single_task()).await.unwrap();
    let started = h
        .runtime
        .start_workflow(
            "single-task",
            StartOptions::new()
                .with_correlation("order-42")
                .with_input("customer", "acme"),
        )
        .await
        .unwrap();

    let done = h.resume("order-42", "task", ResumeSignal::new()).await;
    assert_eq!(done.workflow_id, started.workflow_id);
    assert_eq!(done.status, WorkflowStatus::Finished);
    assert_eq!(done.state.input.get("customer"), Some(&serde_json::json!("acme")));
}

#[tokio::test]
async fn test_uncaught_fault_lets_siblings_finish_their_turn() {
    init_tracing();
    let runtime = FlowRuntime::new(
        Arc::new(standard_registry()),
        Arc::new(InMemoryStateRepository::new()),
        Arc::new(RejectingRegistrar),
        RuntimeConfig::default(),
    );
    let mut def = ProcessDefinition::new("fault-and-sibling");
    add(&mut def, "start", "startEvent");
    add(&mut def, "split", "parallelGateway");
    add(&mut def, "msg", "messageIntermediateCatchEvent");
    add(&mut def, "notify", "intermediateThrowEvent");
    add(&mut def, "task", "userTask");
    add(&mut def, "end1", "endEvent");
    add(&mut def, "end2", "endEvent");
    def.connect("f1", "start", "split");
    def.connect("f2", "split", "msg");
    def.connect("f3", "split", "notify");
    def.connect("f4", "notify", "task");
    def.connect("f5", "msg", "end1");
    def.connect("f6", "task", "end2");
    runtime.register_definition(def).await.unwrap();

    let report = runtime
        .start_workflow("fault-and-sibling", StartOptions::new())
        .await
        .unwrap();

    assert_eq!(status(&report, "msg"), Some(WorkflowStatus::Faulted));
    assert_eq!(status(&report, "notify"), Some(WorkflowStatus::Finished));
    assert_eq!(status(&report, "task"), Some(WorkflowStatus::Halted));
    assert!(report.state.last_flow_snapshot("f4").is_some());
    assert_eq!(report.status, WorkflowStatus::Faulted);
    assert_eq!(report.state.workflow.fault_message.as_deref(), Some("no broker"));
}

#[tokio::test]
async fn test_terminate_end_drops_queued_work_in_subprocess() {
    let mut def = ProcessDefinition::new("terminate-inner");
    add(&mut def, "start", "startEvent");
    add(&mut def, "sub", "subProcess");
    def.add_node(NodeRecord::new("sub_start", "startEvent").with_owner("sub"));
    def.add_node(NodeRecord::new("split", "parallelGateway").with_owner("sub"));
    def.add_node(NodeRecord::new("stop", "terminateEndEvent").with_owner("sub"));
    def.add_node(NodeRecord::new("inner", "userTask").with_owner("sub"));
    def.add_node(NodeRecord::new("sub_end", "endEvent").with_owner("sub"));
    add(&mut def, "end", "endEvent");
    def.connect("f1", "start", "sub");
    def.connect("f2", "sub_start", "split");
    // the terminate end is reached before the task branch
    def.connect("f3", "split", "stop");
    def.connect("f4", "split", "inner");
    def.connect("f5", "inner", "sub_end");
    def.connect("f6", "sub", "end");

    let h = harness();
    let report = h.start(def).await;

    assert_eq!(status(&report, "stop"), Some(WorkflowStatus::Aborted));
    assert_eq!(status(&report, "inner"), None);
    assert_eq!(status(&report, "sub"), Some(WorkflowStatus::Finished));
    assert!(report.blocking_nodes.is_empty());
    assert_eq!(report.status, WorkflowStatus::Finished);
}

#[tokio::test]
async fn test_parallel_join_resynchronises_in_loop() {
    let mut def = ProcessDefinition::new("review-loop");
    add(&mut def, "start", "startEvent");
    add(&mut def, "merge", "exclusiveGateway");
    add(&mut def, "split", "parallelGateway");
    add(&mut def, "a", "userTask");
    add(&mut def, "b", "userTask");
    add(&mut def, "join", "parallelGateway");
    add(&mut def, "check", "userTask");
    add(&mut def, "decide", "exclusiveGateway");
    add(&mut def, "end", "endEvent");
    def.connect("f1", "start", "merge");
    def.connect("f2", "merge", "split");
    def.connect("f3", "split", "a");
    def.connect("f4", "split", "b");
    def.connect("f5", "a", "join");
    def.connect("f6", "b", "join");
    def.connect("f7", "join", "check");
    def.connect("f8", "check", "decide");
    def.add_flow(FlowRecord::new("again", "decide", "merge").with_condition("Again"));
    def.add_flow(FlowRecord::new("done", "decide", "end").as_default());

    let h = harness();
    let started = h.start(def).await;
    let id = started.workflow_id.clone();
    let checks = |report: &TurnReport| {
        report
            .state
            .node_snapshots
            .iter()
            .filter(|s| s.node_id == "check")
            .count()
    };

    h.resume(&id, "a", ResumeSignal::new()).await;
    let first = h.resume(&id, "b", ResumeSignal::new()).await;
    assert_eq!(finished_count(&first, "join"), 1);
    assert_eq!(checks(&first), 1);

    let looped = h.resume(&id, "check", outcome("Again")).await;
    assert_eq!(looped.blocking_nodes, vec!["a".to_string(), "b".to_string()]);

    let half = h.resume(&id, "b", ResumeSignal::new()).await;
    assert_eq!(status(&half, "join"), Some(WorkflowStatus::Idle), "waits for a again");
    assert_eq!(finished_count(&half, "join"), 1);

    let second = h.resume(&id, "a", ResumeSignal::new()).await;
    assert_eq!(finished_count(&second, "join"), 2);
    assert_eq!(checks(&second), 2);
    assert_eq!(second.blocking_nodes, vec!["check".to_string()]);

    let done = h.resume(&id, "check", ResumeSignal::new()).await;
    assert_eq!(done.status, WorkflowStatus::Finished);
    assert_eq!(finished_count(&done, "join"), 2);
}

#[tokio::test]
async fn test_concurrent_starts_share_no_correlation_id() {
    let h = harness();
    h.runtime.register_definition(single_task()).await.unwrap();

    let options = || StartOptions::new().with_correlation("order-7");
    let (first, second) = tokio::join!(
        h.runtime.start_workflow("single-task", options()),
        h.runtime.start_workflow("single-task", options()),
    );

    let winners = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one start may claim the correlation id");
    assert_eq!(h.repository.len().await, 1);
    let owner = if let Ok(report) = &first { report } else { second.as_ref().unwrap() };
    let stored = h.stored("order-7").await;
    assert_eq!(stored.workflow_id(), owner.workflow_id);
}

#[tokio::test]
async fn test_instance_locks_released_after_turns() {
    let h = harness();
    h.runtime.register_definition(parallel()).await.unwrap();

    for _ in 0..3 {
        let started = h
            .runtime
            .start_workflow("parallel", StartOptions::new())
            .await
            .unwrap();
        h.resume(&started.workflow_id, "a", ResumeSignal::new()).await;
    }
    h.runtime
        .start_workflow("parallel", StartOptions::new().with_correlation("kept"))
        .await
        .unwrap();

    assert_eq!(h.runtime.tracked_locks().await, 0);
}
