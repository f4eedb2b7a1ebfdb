//! # Orchestrator Integration Tests
//!
//! Drive the public orchestrator API against in-memory stores and collaborators,
//! with the scheduler running on millisecond intervals.

mod common;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use opsflow_core::access::{AccessContext, Role};
use opsflow_core::collaborators::CollaboratorError;
use opsflow_core::constants::task_operations;
use opsflow_core::database::{ClaimRequest, TaskStore};
use opsflow_core::events::ProgressEventKind;
use opsflow_core::models::{AuditStatus, TaskFilter, TaskType};
use opsflow_core::orchestration::EnqueueRequest;
use opsflow_core::rate_limit::ProfileQuota;
use opsflow_core::TaskStatus;

#[tokio::test]
async fn test_deploy_sync_succeeds_on_third_attempt() {
    let harness = TestOrchestrator::new(fast_config());
    harness.deployment.fail_next_syncs([
        CollaboratorError::Timeout("sync request".into()),
        CollaboratorError::Timeout("sync request".into()),
    ]);
    let orchestrator = &harness.orchestrator;
    let mut events = orchestrator.subscribe_progress(&operator(), None).await.unwrap();
    orchestrator.start().unwrap();

    let task_uuid = orchestrator
        .enqueue_task(
            &operator(),
            EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("billing")).max_attempts(3),
        )
        .await
        .unwrap();

    let task = harness.wait_terminal(task_uuid).await;
    assert_eq!(task.status, TaskStatus::Succeeded);
    assert_eq!(task.attempt, 3);
    assert_eq!(task.progress, 100);
    assert_eq!(task.result.as_ref().unwrap()["application"], "billing");
    assert_eq!(harness.deployment.sync_calls(), 3);

    // Progress stream: ordered, two retryable failures, last progress at 100
    let mut received = Vec::new();
    let drain = async {
        while let Some(event) = events.recv().await {
            if event.task_uuid != task_uuid {
                continue;
            }
            let terminal = event.is_terminal();
            received.push(event);
            if terminal {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), drain).await.unwrap();
    assert!(received.windows(2).all(|w| w[0].sequence < w[1].sequence));
    let retries = received
        .iter()
        .filter(|e| matches!(e.kind, ProgressEventKind::Failed { will_retry: true, .. }))
        .count();
    assert_eq!(retries, 2);
    let last_percent = received.iter().filter_map(|e| e.percent()).last();
    assert_eq!(last_percent, Some(100));
    assert_eq!(received.last().unwrap().status(), Some(TaskStatus::Succeeded));

    // Attempt outcomes: two retries then success, stamped in order
    let trail = harness.wait_audited(task_uuid, task_operations::SUCCEED).await;
    let outcomes: Vec<_> = trail
        .iter()
        .filter(|e| {
            [task_operations::RETRY, task_operations::SUCCEED, task_operations::DEAD_LETTER]
                .contains(&e.operation.as_str())
        })
        .collect();
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0].status, AuditStatus::Failure);
    assert_eq!(outcomes[1].status, AuditStatus::Failure);
    assert_eq!(outcomes[2].status, AuditStatus::Success);
    assert!(outcomes.windows(2).all(|w| w[0].created_at < w[1].created_at));
    assert!(trail.windows(2).all(|w| w[0].created_at < w[1].created_at));

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_task_depending_on_dead_lettered_prerequisite_is_cancelled() {
    let harness = TestOrchestrator::new(fast_config());
    let orchestrator = &harness.orchestrator;
    orchestrator.start().unwrap();

    // Unknown application: a non-retryable failure
    let prerequisite = orchestrator
        .enqueue_task(
            &operator(),
            EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("ghost")),
        )
        .await
        .unwrap();
    harness.wait_audited(prerequisite, task_operations::DEAD_LETTER).await;
    let failed = harness.wait_terminal(prerequisite).await;
    assert_eq!(failed.status, TaskStatus::DeadLettered);
    assert_eq!(failed.attempt, 1);
    assert_eq!(failed.last_error.as_ref().unwrap().code, "NOT_FOUND");

    let dependent = orchestrator
        .enqueue_task(
            &admin(),
            EnqueueRequest::new(TaskType::BulkUpdate, bulk_update_payload()).depends_on([prerequisite]),
        )
        .await
        .unwrap();

    let task = orchestrator.get_task_status(&admin(), dependent).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.attempt, 0);
    assert!(task.started_at.is_none());

    let trail = orchestrator.task_audit_trail(&admin(), dependent).await.unwrap();
    let operations: Vec<_> = trail.iter().map(|e| e.operation.as_str()).collect();
    assert_eq!(operations, vec![task_operations::ENQUEUE, task_operations::CANCEL]);

    // Give the scheduler a chance to misbehave
    tokio::time::sleep(Duration::from_millis(50)).await;
    let task = orchestrator.get_task_status(&admin(), dependent).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(harness
        .source_control
        .file("infra", "ops/raise-replicas", "apps/billing/values.yaml")
        .is_none());

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failure_cascades_to_waiting_dependents() {
    let harness = TestOrchestrator::new(fast_config());
    let orchestrator = &harness.orchestrator;

    let first = orchestrator
        .enqueue_task(&operator(), EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("ghost")))
        .await
        .unwrap();
    let second = orchestrator
        .enqueue_task(
            &operator(),
            EnqueueRequest::new(TaskType::DeployRefresh, json!({ "applications": ["billing"] }))
                .depends_on([first]),
        )
        .await
        .unwrap();
    let third = orchestrator
        .enqueue_task(
            &operator(),
            EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("search")).depends_on([second]),
        )
        .await
        .unwrap();

    orchestrator.start().unwrap();
    assert_eq!(harness.wait_terminal(first).await.status, TaskStatus::DeadLettered);
    assert_eq!(harness.wait_terminal(second).await.status, TaskStatus::Cancelled);
    assert_eq!(harness.wait_terminal(third).await.status, TaskStatus::Cancelled);
    let trail = harness.wait_audited(third, task_operations::CANCEL).await;
    assert!(trail.iter().all(|e| e.operation != task_operations::CLAIM));
    assert!(harness.deployment.refreshed().is_empty());

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_dependent_runs_after_prerequisite_succeeds() {
    let harness = TestOrchestrator::new(fast_config());
    let orchestrator = &harness.orchestrator;

    let sync = orchestrator
        .enqueue_task(&operator(), EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("billing")))
        .await
        .unwrap();
    let refresh = orchestrator
        .enqueue_task(
            &operator(),
            EnqueueRequest::new(TaskType::DeployRefresh, json!({ "applications": ["billing"] }))
                .depends_on([sync]),
        )
        .await
        .unwrap();

    orchestrator.start().unwrap();
    let refresh = harness.wait_terminal(refresh).await;
    let sync = harness.wait_terminal(sync).await;
    assert_eq!(sync.status, TaskStatus::Succeeded);
    assert_eq!(refresh.status, TaskStatus::Succeeded);
    assert!(refresh.started_at.unwrap() >= sync.completed_at.unwrap());

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancel_running_task() {
    let harness = TestOrchestrator::with_executors(fast_config(), |registry| {
        registry.with(Arc::new(UntilCancelled(TaskType::DeployRefresh)))
    });
    let orchestrator = &harness.orchestrator;
    orchestrator.start().unwrap();

    let task_uuid = orchestrator
        .enqueue_task(
            &operator(),
            EnqueueRequest::new(TaskType::DeployRefresh, json!({ "applications": ["billing"] })),
        )
        .await
        .unwrap();
    harness
        .wait_for(task_uuid, |t| t.status == TaskStatus::Running && t.progress == 25)
        .await;

    let flagged = orchestrator.cancel_task(&operator(), task_uuid).await.unwrap();
    assert_eq!(flagged.status, TaskStatus::Running);
    assert!(flagged.cancel_requested);

    let task = harness.wait_terminal(task_uuid).await;
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.attempt, 1);

    let trail = harness.wait_audited(task_uuid, task_operations::CANCEL).await;
    let requested = trail
        .iter()
        .find(|e| e.operation == task_operations::CANCEL_REQUESTED)
        .unwrap();
    assert_eq!(requested.actor_user_id, "operator");
    assert_eq!(trail.last().unwrap().operation, task_operations::CANCEL);

    // Cancelling again is a no-op
    let again = orchestrator.cancel_task(&operator(), task_uuid).await.unwrap();
    assert_eq!(again.status, TaskStatus::Cancelled);

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancel_pending_task_without_scheduler() {
    let harness = TestOrchestrator::new(fast_config());
    let orchestrator = &harness.orchestrator;
    let task_uuid = orchestrator
        .enqueue_task(&operator(), EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("billing")))
        .await
        .unwrap();

    let task = orchestrator.cancel_task(&operator(), task_uuid).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.completed_at.is_some());
}

#[tokio::test]
async fn test_attempt_exceeding_max_duration_is_retryable_failure() {
    let mut config = fast_config();
    config.executors.deploy_refresh_max_duration_secs = 1;
    let harness = TestOrchestrator::with_executors(config, |registry| {
        registry.with(Arc::new(Hang(TaskType::DeployRefresh)))
    });
    let orchestrator = &harness.orchestrator;
    orchestrator.start().unwrap();

    let task_uuid = orchestrator
        .enqueue_task(
            &operator(),
            EnqueueRequest::new(TaskType::DeployRefresh, json!({ "applications": ["billing"] })).max_attempts(1),
        )
        .await
        .unwrap();

    let task = harness.wait_terminal(task_uuid).await;
    assert_eq!(task.status, TaskStatus::DeadLettered);
    let failure = task.last_error.unwrap();
    assert_eq!(failure.code, "TRANSIENT_FAILURE");
    assert_eq!(failure.details.unwrap()["timeout_ms"], 1000);

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_operator_fail_cascades() {
    let harness = TestOrchestrator::new(fast_config());
    let orchestrator = &harness.orchestrator;
    let first = orchestrator
        .enqueue_task(&operator(), EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("billing")))
        .await
        .unwrap();
    let second = orchestrator
        .enqueue_task(
            &operator(),
            EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("search")).depends_on([first]),
        )
        .await
        .unwrap();

    let err = orchestrator
        .fail_task(&operator(), first, "bad change window")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    let failed = orchestrator
        .fail_task(&admin(), first, "bad change window")
        .await
        .unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.last_error.unwrap().code, "TERMINAL_FAILURE");

    let dependent = orchestrator.get_task_status(&admin(), second).await.unwrap();
    assert_eq!(dependent.status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn test_add_dependency_rejects_cycles() {
    let harness = TestOrchestrator::new(fast_config());
    let orchestrator = &harness.orchestrator;
    let a = orchestrator
        .enqueue_task(&operator(), EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("billing")))
        .await
        .unwrap();
    let b = orchestrator
        .enqueue_task(
            &operator(),
            EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("search")).depends_on([a]),
        )
        .await
        .unwrap();
    let c = orchestrator
        .enqueue_task(&operator(), EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("billing")))
        .await
        .unwrap();

    orchestrator.add_dependency(&operator(), c, b).await.unwrap();

    let err = orchestrator.add_dependency(&operator(), a, c).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_FAILED");
    let err = orchestrator.add_dependency(&operator(), a, a).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_FAILED");

    let failures: Vec<_> = harness
        .audit
        .all()
        .into_iter()
        .filter(|e| e.operation == task_operations::ADD_DEPENDENCY && e.status == AuditStatus::Failure)
        .collect();
    assert_eq!(failures.len(), 2);
}

#[tokio::test]
async fn test_invalid_payload_creates_no_task() {
    let harness = TestOrchestrator::new(fast_config());
    let orchestrator = &harness.orchestrator;

    let err = orchestrator
        .enqueue_task(&operator(), EnqueueRequest::new(TaskType::DeploySync, json!({ "app": "billing" })))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_FAILED");

    let err = orchestrator
        .enqueue_task(
            &operator(),
            EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("billing")).max_attempts(0),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_FAILED");

    let tasks = orchestrator.list_tasks(&viewer(), TaskFilter::default()).await.unwrap();
    assert!(tasks.is_empty());

    let entries = harness.audit.all();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.status == AuditStatus::Failure));
}

#[tokio::test]
async fn test_roles_gate_enqueue_by_task_type() {
    let harness = TestOrchestrator::new(fast_config());
    let orchestrator = &harness.orchestrator;

    let err = orchestrator
        .enqueue_task(&viewer(), EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("billing")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    let err = orchestrator
        .enqueue_task(&operator(), EnqueueRequest::new(TaskType::BulkUpdate, bulk_update_payload()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    orchestrator
        .enqueue_task(&admin(), EnqueueRequest::new(TaskType::BulkUpdate, bulk_update_payload()))
        .await
        .unwrap();

    let tasks = orchestrator.list_tasks(&viewer(), TaskFilter::default()).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].actor_user_id, "ops-admin");
}

#[tokio::test]
async fn test_tasks_are_tenant_isolated() {
    let harness = TestOrchestrator::new(fast_config());
    let orchestrator = &harness.orchestrator;
    let task_uuid = orchestrator
        .enqueue_task(&operator(), EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("billing")))
        .await
        .unwrap();

    let outsider = AccessContext::new("mallory", "globex", Role::Admin);
    for err in [
        orchestrator.get_task_status(&outsider, task_uuid).await.unwrap_err(),
        orchestrator.cancel_task(&outsider, task_uuid).await.unwrap_err(),
        orchestrator.task_audit_trail(&outsider, task_uuid).await.unwrap_err(),
        orchestrator.subscribe_progress(&outsider, Some(task_uuid)).await.err().unwrap(),
    ] {
        assert_eq!(err.code(), "FORBIDDEN");
    }

    let err = orchestrator
        .enqueue_task(
            &outsider,
            EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("billing")).depends_on([task_uuid]),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    assert!(orchestrator
        .list_tasks(&outsider, TaskFilter::default())
        .await
        .unwrap()
        .is_empty());
    let task = orchestrator.get_task_status(&operator(), task_uuid).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_enqueue_is_rate_limited_per_profile() {
    let mut config = fast_config();
    config.rate_limit.sync = ProfileQuota::new(2, 60);
    let harness = TestOrchestrator::new(config);
    let orchestrator = &harness.orchestrator;

    for _ in 0..2 {
        orchestrator
            .enqueue_task(&operator(), EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("billing")))
            .await
            .unwrap();
    }
    let err = orchestrator
        .enqueue_task(&operator(), EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("billing")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "RATE_LIMITED");
    let reset_at: chrono::DateTime<chrono::Utc> =
        serde_json::from_value(err.details.as_ref().unwrap()["reset_at"].clone()).unwrap();
    assert!(reset_at > chrono::Utc::now());

    // Another user and another profile are unaffected
    let colleague = AccessContext::new("colleague", TENANT, Role::ReadWrite);
    orchestrator
        .enqueue_task(&colleague, EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("billing")))
        .await
        .unwrap();
    orchestrator
        .enqueue_task(
            &operator(),
            EnqueueRequest::new(
                TaskType::PrWorkflow,
                json!({ "repo": "infra", "head": "feature", "base": "main", "title": "Bump" }),
            ),
        )
        .await
        .unwrap();

    let tasks = orchestrator.list_tasks(&viewer(), TaskFilter::default()).await.unwrap();
    assert_eq!(tasks.len(), 4);
}

#[tokio::test]
async fn test_higher_priority_runs_first() {
    let mut config = fast_config();
    config.scheduler.worker_pool_size = 1;
    let harness = TestOrchestrator::new(config);
    let orchestrator = &harness.orchestrator;

    let low = orchestrator
        .enqueue_task(&operator(), EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("billing")))
        .await
        .unwrap();
    let high = orchestrator
        .enqueue_task(
            &operator(),
            EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("search")).priority(10),
        )
        .await
        .unwrap();

    orchestrator.start().unwrap();
    let low = harness.wait_terminal(low).await;
    let high = harness.wait_terminal(high).await;
    assert!(high.started_at.unwrap() < low.started_at.unwrap());

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_quiet_tenant_is_not_starved_by_busy_tenant() {
    let mut config = fast_config();
    config.scheduler.worker_pool_size = 1;
    let harness = TestOrchestrator::new(config);
    let orchestrator = &harness.orchestrator;

    // Tenants are listed alphabetically, so the busy one would always go first
    let quiet = AccessContext::new("quiet-ops", "zzz-quiet", Role::ReadWrite);
    let busy = AccessContext::new("busy-ops", "aaa-busy", Role::ReadWrite);

    let quiet_task = orchestrator
        .enqueue_task(&quiet, EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("billing")))
        .await
        .unwrap();
    let mut busy_tasks = Vec::new();
    for _ in 0..6 {
        busy_tasks.push(
            orchestrator
                .enqueue_task(&busy, EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("search")))
                .await
                .unwrap(),
        );
    }

    orchestrator.start().unwrap();
    let quiet_started = harness.wait_terminal(quiet_task).await.started_at.unwrap();
    let mut started_before = 0;
    for task_uuid in busy_tasks {
        let task = harness.wait_terminal(task_uuid).await;
        assert_eq!(task.status, TaskStatus::Succeeded);
        if task.started_at.unwrap() < quiet_started {
            started_before += 1;
        }
    }
    assert!(started_before <= 1, "{started_before} busy tasks ran before the quiet tenant");

    orchestrator.shutdown().await.unwrap();
}

/// Claim the tenant's next task as a replica that then disappears: the deadline
/// is the claim time itself, so the attempt is overdue straight away.
async fn claim_as_lost_replica(harness: &TestOrchestrator) -> opsflow_core::Task {
    let request = ClaimRequest {
        tenant_id: TENANT.to_string(),
        worker_id: "vanished-replica".to_string(),
        executable: vec![(TaskType::DeploySync, Duration::ZERO)],
        tenant_cap: 4,
        now: chrono::Utc::now(),
    };
    let task = harness.store.claim_next(&request).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    task
}

#[tokio::test]
async fn test_reaper_requeues_overdue_attempt_with_backoff() {
    let mut config = fast_config();
    config.scheduler.deadline_grace_secs = 0;
    let harness = TestOrchestrator::new(config);
    let orchestrator = &harness.orchestrator;
    let task_uuid = orchestrator
        .enqueue_task(
            &operator(),
            EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("billing")).max_attempts(3),
        )
        .await
        .unwrap();

    let claimed = claim_as_lost_replica(&harness).await;
    assert_eq!(claimed.task_uuid, task_uuid);
    assert!(claimed.deadline_at.unwrap() <= chrono::Utc::now());

    let reaped = orchestrator.scheduler().reap_expired().await.unwrap();
    assert_eq!(reaped, 1);

    let task = orchestrator.get_task_status(&operator(), task_uuid).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.attempt, 1);
    assert!(task.ready_at > claimed.started_at.unwrap());
    assert_eq!(task.last_error.as_ref().unwrap().code, "TRANSIENT_FAILURE");

    let trail = orchestrator.task_audit_trail(&operator(), task_uuid).await.unwrap();
    let retry = trail
        .iter()
        .find(|e| e.operation == task_operations::RETRY)
        .unwrap();
    assert_eq!(retry.status, AuditStatus::Failure);

    // Nothing left to reap
    assert_eq!(orchestrator.scheduler().reap_expired().await.unwrap(), 0);
}

#[tokio::test]
async fn test_reaper_dead_letters_final_attempt() {
    let mut config = fast_config();
    config.scheduler.deadline_grace_secs = 0;
    let harness = TestOrchestrator::new(config);
    let orchestrator = &harness.orchestrator;
    let task_uuid = orchestrator
        .enqueue_task(
            &operator(),
            EnqueueRequest::new(TaskType::DeploySync, deploy_sync_payload("billing")).max_attempts(1),
        )
        .await
        .unwrap();

    claim_as_lost_replica(&harness).await;
    assert_eq!(orchestrator.scheduler().reap_expired().await.unwrap(), 1);

    let task = orchestrator.get_task_status(&operator(), task_uuid).await.unwrap();
    assert_eq!(task.status, TaskStatus::DeadLettered);
    assert!(task.completed_at.is_some());
    let trail = orchestrator.task_audit_trail(&operator(), task_uuid).await.unwrap();
    assert_eq!(trail.last().unwrap().operation, task_operations::DEAD_LETTER);
}
