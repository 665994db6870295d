//! Sequential-workflow scheduling: stage progression, idempotent
//! materialization, and pause semantics.

mod common;

use common::{kernel, manual_policy, previous_stage_policy};
use scanforge::domain::models::{ExecutionMode, ProjectStatus, ResultEnvelope, TaskStatus};
use scanforge::domain::ports::{ProjectRepository, TaskRepository};

#[tokio::test]
async fn sequential_happy_path_runs_stages_in_order() {
    let k = kernel().await;
    k.online_agent("agent-1", &["nmap", "nuclei"]).await;

    let project = k.running_project("P", &["10.0.0.0/24"]).await;
    let wf = k.workflow(project.id, ExecutionMode::Sequential).await;
    let stage_a = k
        .stage(
            wf.id,
            "discovery",
            1,
            "nmap",
            vec![],
            serde_json::json!({
                "target_sources": [{"source_type": "project_target", "target_type": "ip_range"}]
            }),
        )
        .await;
    let stage_b = k.stage(wf.id, "vuln-scan", 2, "nuclei", vec![], previous_stage_policy()).await;

    // Tick 1: only the discovery stage materializes, one task per seed.
    let stats = k.scheduler.tick().await.unwrap();
    assert_eq!(stats.stages_materialized, 1);
    assert_eq!(stats.tasks_created, 1);
    assert_eq!(stats.dispatch.dispatched, 1);
    assert!(k.tasks.list_for_stage(stage_b.id).await.unwrap().is_empty());

    let a_tasks = k.tasks.list_for_stage(stage_a.id).await.unwrap();
    assert_eq!(a_tasks.len(), 1);
    assert_eq!(a_tasks[0].status, TaskStatus::Dispatched);
    assert_eq!(a_tasks[0].target_value, "10.0.0.0/24");

    // Discovery completes and reports one live host.
    k.finish_stage_tasks(
        stage_a.id,
        serde_json::json!([{"result_type": "host", "target_type": "ip", "target_value": "10.0.0.5"}]),
    )
    .await;

    // Tick 2: the vuln stage materializes exactly one task for the host.
    let stats = k.scheduler.tick().await.unwrap();
    assert_eq!(stats.stages_materialized, 1);
    assert_eq!(stats.tasks_created, 1);

    let b_tasks = k.tasks.list_for_stage(stage_b.id).await.unwrap();
    assert_eq!(b_tasks.len(), 1);
    assert_eq!(b_tasks[0].target_value, "10.0.0.5");
    assert_eq!(b_tasks[0].tool_name, "nuclei");
    assert_eq!(b_tasks[0].status, TaskStatus::Dispatched);

    // The vuln task completes; the next tick finishes the project.
    k.finish_stage_tasks(stage_b.id, serde_json::json!([])).await;
    let stats = k.scheduler.tick().await.unwrap();
    assert_eq!(stats.projects_finished, 1);
    assert_eq!(
        k.projects.get(project.id).await.unwrap().unwrap().status,
        ProjectStatus::Finished
    );
}

#[tokio::test]
async fn no_second_stage_task_before_first_stage_terminal() {
    let k = kernel().await;
    k.online_agent("agent-1", &["nmap"]).await;

    let project = k.running_project("P", &[]).await;
    let wf = k.workflow(project.id, ExecutionMode::Sequential).await;
    let stage_a = k
        .stage(wf.id, "a", 1, "nmap", vec![], manual_policy("10.0.0.1,10.0.0.2", "ip"))
        .await;
    let stage_b = k.stage(wf.id, "b", 2, "nmap", vec![], manual_policy("10.0.0.9", "ip")).await;

    k.scheduler.tick().await.unwrap();

    // Finish only one of stage A's two tasks.
    let a_tasks = k.tasks.list_for_stage(stage_a.id).await.unwrap();
    k.ingestor.ingest(ResultEnvelope::finished(a_tasks[0].id)).await.unwrap();

    // Stage B stays unmaterialized while any A task is non-terminal.
    for _ in 0..3 {
        k.scheduler.tick().await.unwrap();
        assert!(k.tasks.list_for_stage(stage_b.id).await.unwrap().is_empty());
    }

    k.ingestor.ingest(ResultEnvelope::finished(a_tasks[1].id)).await.unwrap();
    k.scheduler.tick().await.unwrap();
    assert_eq!(k.tasks.list_for_stage(stage_b.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_prior_task_does_not_block_sequential_progression() {
    let k = kernel().await;
    k.online_agent("agent-1", &["nmap"]).await;

    let project = k.running_project("P", &[]).await;
    let wf = k.workflow(project.id, ExecutionMode::Sequential).await;
    let stage_a = k
        .stage(wf.id, "a", 1, "nmap", vec![], manual_policy("10.0.0.1,10.0.0.2", "ip"))
        .await;
    let stage_b = k.stage(wf.id, "b", 2, "nmap", vec![], manual_policy("10.0.0.9", "ip")).await;

    k.scheduler.tick().await.unwrap();
    let a_tasks = k.tasks.list_for_stage(stage_a.id).await.unwrap();
    k.ingestor.ingest(ResultEnvelope::finished(a_tasks[0].id)).await.unwrap();
    k.ingestor
        .ingest(ResultEnvelope::failed(a_tasks[1].id, "target unreachable"))
        .await
        .unwrap();

    // Failures are per-target; the workflow proceeds.
    k.scheduler.tick().await.unwrap();
    assert_eq!(k.tasks.list_for_stage(stage_b.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn materialization_is_idempotent_across_ticks() {
    let k = kernel().await;
    // No agent: tasks stay pending and the stage would re-materialize
    // every tick if idempotency were broken.
    let project = k.running_project("P", &[]).await;
    let wf = k.workflow(project.id, ExecutionMode::Sequential).await;
    let stage = k
        .stage(wf.id, "a", 1, "nmap", vec![], manual_policy("10.0.0.1,10.0.0.2", "ip"))
        .await;

    let first = k.scheduler.tick().await.unwrap();
    assert_eq!(first.tasks_created, 2);

    for _ in 0..3 {
        let stats = k.scheduler.tick().await.unwrap();
        assert_eq!(stats.tasks_created, 0);
    }
    assert_eq!(k.tasks.list_for_stage(stage.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn paused_project_generates_no_new_tasks_but_results_still_ingest() {
    let k = kernel().await;
    k.online_agent("agent-1", &["nmap"]).await;

    let project = k.running_project("P", &[]).await;
    let wf = k.workflow(project.id, ExecutionMode::Sequential).await;
    let stage_a = k.stage(wf.id, "a", 1, "nmap", vec![], manual_policy("10.0.0.1", "ip")).await;
    let stage_b = k.stage(wf.id, "b", 2, "nmap", vec![], manual_policy("10.0.0.9", "ip")).await;

    k.scheduler.tick().await.unwrap();
    assert_eq!(k.channel.sent_count(), 1);

    // Operator pauses the project while stage A is in flight.
    assert!(k
        .projects
        .update_status(project.id, ProjectStatus::Running, ProjectStatus::Paused)
        .await
        .unwrap());

    // The in-flight task's result is still ingested.
    let a_tasks = k.tasks.list_for_stage(stage_a.id).await.unwrap();
    k.ingestor.ingest(ResultEnvelope::finished(a_tasks[0].id)).await.unwrap();
    assert_eq!(
        k.tasks.get(a_tasks[0].id).await.unwrap().unwrap().status,
        TaskStatus::Finished
    );

    // But no new stages materialize while paused.
    for _ in 0..3 {
        let stats = k.scheduler.tick().await.unwrap();
        assert_eq!(stats.tasks_created, 0);
        assert!(k.tasks.list_for_stage(stage_b.id).await.unwrap().is_empty());
    }

    // Resuming picks up where the workflow left off.
    assert!(k
        .projects
        .update_status(project.id, ProjectStatus::Paused, ProjectStatus::Running)
        .await
        .unwrap());
    k.scheduler.tick().await.unwrap();
    assert_eq!(k.tasks.list_for_stage(stage_b.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn empty_target_sources_fall_back_to_scope_seeds() {
    let k = kernel().await;
    k.online_agent("agent-1", &["nmap"]).await;

    let project = k.running_project("P", &["10.1.0.0/24", "10.2.0.0/24"]).await;
    let wf = k.workflow(project.id, ExecutionMode::Sequential).await;
    let stage = k.stage(wf.id, "a", 1, "nmap", vec![], serde_json::json!({})).await;

    let stats = k.scheduler.tick().await.unwrap();
    assert_eq!(stats.tasks_created, 2);

    let values: Vec<String> = k
        .tasks
        .list_for_stage(stage.id)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.target_value)
        .collect();
    assert_eq!(values, vec!["10.1.0.0/24", "10.2.0.0/24"]);
}
