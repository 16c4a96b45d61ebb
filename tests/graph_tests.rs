use std::sync::Arc;

use batch_lite::error::BatchError;
use batch_lite::scheduler::{JobArgs, JobGraph, JobId, JobState};
use batch_lite::worker::{LogWork, Work};
use serde_json::Value;

fn work() -> Arc<dyn Work> {
    Arc::new(LogWork)
}

fn add(graph: &mut JobGraph, deps: &[JobId]) -> JobId {
    graph
        .submit(work(), JobArgs::from_positional(["msg"]), deps)
        .unwrap()
}

/// Claim and run a specific job, as the dispatcher would.
fn start(graph: &mut JobGraph, id: JobId) {
    graph.mark_running(&id).unwrap();
}

#[test]
fn test_submit_without_dependencies_is_ready() {
    let mut graph = JobGraph::new();
    let a = add(&mut graph, &[]);

    assert_eq!(graph.state_of(&a), Some(JobState::Ready));
    assert_eq!(graph.ready_set(), vec![a]);
    assert_eq!(graph.len(), 1);
    assert_eq!(graph.get_job(&a).unwrap().name, "log");
}

#[test]
fn test_ids_are_monotonic() {
    let mut graph = JobGraph::new();
    let a = add(&mut graph, &[]);
    let b = add(&mut graph, &[a]);
    let c = add(&mut graph, &[]);
    assert!(a < b && b < c);
}

#[test]
fn test_unknown_dependency_is_rejected() {
    let mut graph = JobGraph::new();
    let a = add(&mut graph, &[]);
    let mut other = JobGraph::new();
    add(&mut other, &[]);
    let foreign = add(&mut other, &[]);

    let err = graph
        .submit(work(), JobArgs::new(), &[a, foreign])
        .unwrap_err();
    assert!(matches!(err, BatchError::InvalidDependency(id) if id == foreign));
    // The failed submission leaves nothing behind
    assert_eq!(graph.len(), 1);
    assert!(graph.get_job(&a).unwrap().dependents.is_empty());
}

#[test]
fn test_dependent_waits_for_every_dependency() {
    let mut graph = JobGraph::new();
    let a = add(&mut graph, &[]);
    let b = add(&mut graph, &[]);
    let c = add(&mut graph, &[a, b, a]);

    assert_eq!(graph.state_of(&c), Some(JobState::Pending));
    assert_eq!(graph.get_job(&c).unwrap().dependencies, vec![a, b]);

    start(&mut graph, a);
    graph.mark_done(&a, Value::Null).unwrap();
    assert_eq!(graph.state_of(&c), Some(JobState::Pending));
    assert_eq!(graph.ready_set(), vec![b]);

    start(&mut graph, b);
    graph.mark_done(&b, Value::Null).unwrap();
    assert_eq!(graph.state_of(&c), Some(JobState::Ready));
    assert_eq!(graph.ready_set(), vec![c]);
}

#[test]
fn test_claim_next_marks_running() {
    let mut graph = JobGraph::new();
    let a = add(&mut graph, &[]);
    let b = add(&mut graph, &[]);

    let claim = graph.claim_next().unwrap();
    assert_eq!(claim.id, a);
    assert_eq!(claim.args.str_arg(0).unwrap(), "msg");
    assert_eq!(graph.state_of(&a), Some(JobState::Running));
    assert_eq!(graph.running_count(), 1);

    assert_eq!(graph.claim_next().unwrap().id, b);
    assert!(graph.claim_next().is_none());
    assert_eq!(graph.running_count(), 2);
}

#[test]
fn test_mark_running_requires_ready() {
    let mut graph = JobGraph::new();
    let a = add(&mut graph, &[]);
    let b = add(&mut graph, &[a]);

    let err = graph.mark_running(&b).unwrap_err();
    assert!(matches!(
        err,
        BatchError::InvalidTransition {
            from: JobState::Pending,
            to: JobState::Running,
            ..
        }
    ));

    start(&mut graph, a);
    assert!(graph.ready_set().is_empty());
    assert!(graph.mark_running(&a).is_err());
}

#[test]
fn test_mark_done_requires_running() {
    let mut graph = JobGraph::new();
    let a = add(&mut graph, &[]);
    assert!(matches!(
        graph.mark_done(&a, Value::Null),
        Err(BatchError::InvalidTransition { .. })
    ));
}

#[test]
fn test_unknown_job_operations() {
    let mut graph = JobGraph::new();
    let mut other = JobGraph::new();
    let ghost = add(&mut other, &[]);

    assert!(matches!(graph.mark_running(&ghost), Err(BatchError::JobNotFound(_))));
    assert!(matches!(
        graph.mark_done(&ghost, Value::Null),
        Err(BatchError::JobNotFound(_))
    ));
    assert!(matches!(
        graph.mark_failed(&ghost, "x"),
        Err(BatchError::JobNotFound(_))
    ));
    assert!(matches!(graph.status_of(&[ghost]), Err(BatchError::JobNotFound(_))));
}

#[test]
fn test_mark_done_twice_is_idempotent() {
    let mut graph = JobGraph::new();
    let a = add(&mut graph, &[]);
    let b = add(&mut graph, &[a]);
    let c = add(&mut graph, &[a, b]);

    start(&mut graph, a);
    assert!(graph.mark_done(&a, Value::from(1)).unwrap());
    assert!(!graph.mark_done(&a, Value::from(2)).unwrap());
    assert!(!graph.mark_failed(&a, "late").unwrap());

    // The second call must not decrement c's countdown again
    assert_eq!(graph.state_of(&c), Some(JobState::Pending));
    assert_eq!(graph.get_job(&a).unwrap().result, Some(Value::from(1)));
    assert_eq!(graph.running_count(), 0);

    let first = graph.status_of(&[a]).unwrap();
    let second = graph.status_of(&[a]).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.succeeded, 1);
    assert!(first.is_terminal());
}

#[test]
fn test_failure_cascades_to_transitive_dependents() {
    let mut graph = JobGraph::new();
    let a = add(&mut graph, &[]);
    let b = add(&mut graph, &[a]);
    let c = add(&mut graph, &[b]);
    let d = add(&mut graph, &[c]);
    let unrelated = add(&mut graph, &[]);

    start(&mut graph, a);
    assert!(graph.mark_failed(&a, "commit analysis crashed").unwrap());

    for id in [b, c, d] {
        assert_eq!(graph.state_of(&id), Some(JobState::Skipped));
        assert_eq!(graph.get_job(&id).unwrap().skipped_because, Some(a));
    }
    assert_eq!(graph.state_of(&unrelated), Some(JobState::Ready));
    assert_eq!(graph.ready_set(), vec![unrelated]);

    let status = graph.status_of(&[d]).unwrap();
    assert!(status.is_terminal());
    assert_eq!(status.total, 4);
    assert_eq!(status.failure.failed_ids(), vec![a]);
    assert_eq!(status.failure.failed[0].error, "commit analysis crashed");
    assert_eq!(status.failure.skipped_ids(), vec![b, c, d]);
    assert!(status.failure.skipped.iter().all(|s| s.cause == a));
}

#[test]
fn test_submit_after_failure_is_skipped_immediately() {
    let mut graph = JobGraph::new();
    let a = add(&mut graph, &[]);
    let b = add(&mut graph, &[a]);
    start(&mut graph, a);
    graph.mark_failed(&a, "boom").unwrap();

    let late = add(&mut graph, &[b]);
    assert_eq!(graph.state_of(&late), Some(JobState::Skipped));
    assert_eq!(graph.get_job(&late).unwrap().skipped_because, Some(a));

    let direct = add(&mut graph, &[a]);
    assert_eq!(graph.state_of(&direct), Some(JobState::Skipped));
    assert_eq!(graph.get_job(&direct).unwrap().skipped_because, Some(a));
    assert!(graph.ready_set().is_empty());
}

#[test]
fn test_status_counts_running_jobs() {
    let mut graph = JobGraph::new();
    let a = add(&mut graph, &[]);
    let b = add(&mut graph, &[a]);
    start(&mut graph, a);

    let status = graph.status_of(&[b]).unwrap();
    assert_eq!(status.total, 2);
    assert_eq!(status.unfinished, 2);
    assert_eq!(status.running, 1);

    graph.mark_done(&a, Value::Null).unwrap();
    let status = graph.status_of(&[a]).unwrap();
    assert!(status.is_terminal());
    assert_eq!(status.running, 0);
}

#[test]
fn test_submit_after_success_is_ready_immediately() {
    let mut graph = JobGraph::new();
    let a = add(&mut graph, &[]);
    start(&mut graph, a);
    graph.mark_done(&a, Value::Null).unwrap();

    let b = add(&mut graph, &[a]);
    assert_eq!(graph.state_of(&b), Some(JobState::Ready));
}

#[test]
fn test_diamond_with_failed_branch() {
    let mut graph = JobGraph::new();
    let a = add(&mut graph, &[]);
    let b = add(&mut graph, &[a]);
    let c = add(&mut graph, &[a]);
    let d = add(&mut graph, &[b, c]);

    start(&mut graph, a);
    graph.mark_done(&a, Value::Null).unwrap();
    assert_eq!(graph.ready_set(), vec![b, c]);

    start(&mut graph, b);
    start(&mut graph, c);
    graph.mark_failed(&b, "boom").unwrap();
    assert_eq!(graph.state_of(&d), Some(JobState::Skipped));
    assert_eq!(graph.state_of(&c), Some(JobState::Running));

    // D is terminal but C, which it depends on, is not
    let status = graph.status_of(&[d]).unwrap();
    assert!(!status.is_terminal());
    assert_eq!(status.unfinished, 1);

    graph.mark_done(&c, Value::Null).unwrap();
    let status = graph.status_of(&[d]).unwrap();
    assert!(status.is_terminal());
    assert_eq!(status.succeeded, 2);
    assert_eq!(status.failure.failed_ids(), vec![b]);
    assert_eq!(status.failure.skipped_ids(), vec![d]);
    assert_eq!(graph.state_of(&c), Some(JobState::Succeeded));
}

#[test]
fn test_cleanup_keeps_jobs_with_unfinished_dependents() {
    let mut graph = JobGraph::new();
    let a = add(&mut graph, &[]);
    let b = add(&mut graph, &[a]);
    let lone = add(&mut graph, &[]);

    start(&mut graph, a);
    graph.mark_done(&a, Value::Null).unwrap();
    start(&mut graph, lone);
    graph.mark_done(&lone, Value::Null).unwrap();

    // a still has a runnable dependent, lone has none
    assert_eq!(graph.cleanup_finished_jobs(), 1);
    assert!(graph.get_job(&lone).is_none());
    assert!(graph.get_job(&a).is_some());

    start(&mut graph, b);
    graph.mark_done(&b, Value::Null).unwrap();
    assert_eq!(graph.cleanup_finished_jobs(), 2);
    assert!(graph.is_empty());
}

#[test]
fn test_unfinished_count_and_summaries() {
    let mut graph = JobGraph::new();
    let a = add(&mut graph, &[]);
    let b = add(&mut graph, &[a]);
    assert_eq!(graph.unfinished_count(), 2);

    start(&mut graph, a);
    graph.mark_failed(&a, "boom").unwrap();
    assert_eq!(graph.unfinished_count(), 0);

    let summaries = graph.summaries();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].id, a);
    assert_eq!(summaries[0].state, JobState::Failed);
    assert_eq!(summaries[0].error.as_deref(), Some("boom"));
    assert!(summaries[0].started_at.is_some());
    assert_eq!(summaries[1].id, b);
    assert_eq!(summaries[1].skipped_because, Some(a));
    assert!(summaries[1].started_at.is_none());
}
