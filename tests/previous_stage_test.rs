//! End-to-end `previous_stage` resolution: direct emission, unwind
//! pipelines, and agent trust filtering.

mod common;

use common::{kernel, manual_policy};
use scanforge::domain::models::{ExecutionMode, ResultEnvelope, TaskStatus};
use scanforge::domain::ports::TaskRepository;

#[tokio::test]
async fn unwind_filters_and_renders_port_targets() {
    let k = kernel().await;
    k.online_agent("agent-1", &["nmap", "httpx"]).await;

    let project = k.running_project("P", &[]).await;
    let wf = k.workflow(project.id, ExecutionMode::Sequential).await;
    let stage_a = k.stage(wf.id, "portscan", 1, "nmap", vec![], manual_policy("10.0.0.1", "ip")).await;
    let stage_b = k
        .stage(
            wf.id,
            "probe",
            2,
            "httpx",
            vec![],
            serde_json::json!({
                "target_sources": [{
                    "source_type": "previous_stage",
                    "target_type": "url",
                    "parser_config": {
                        "unwind": {
                            "path": "@this",
                            "filter": {
                                "and": [
                                    {"field": "state", "operator": "equals", "value": "open"},
                                    {"or": [
                                        {"field": "port", "operator": "greater_than", "value": 100},
                                        {"field": "service", "operator": "equals", "value": "http"}
                                    ]}
                                ]
                            }
                        },
                        "generate": {
                            "value_template": "{{target_value}}:{{item.port}}",
                            "type": "url",
                            "meta_map": {"service": "{{item.service}}"}
                        }
                    }
                }]
            }),
        )
        .await;

    k.scheduler.tick().await.unwrap();

    // The port scan reports three ports on one host.
    k.finish_stage_tasks(
        stage_a.id,
        serde_json::json!([{
            "result_type": "ports",
            "target_type": "ip",
            "target_value": "10.0.0.1",
            "attributes": [
                {"port": 80, "service": "http", "state": "open"},
                {"port": 22, "service": "ssh", "state": "open"},
                {"port": 443, "service": "https", "state": "closed"}
            ]
        }]),
    )
    .await;

    k.scheduler.tick().await.unwrap();

    // Exactly one target survives the filter: 10.0.0.1:80.
    let b_tasks = k.tasks.list_for_stage(stage_b.id).await.unwrap();
    assert_eq!(b_tasks.len(), 1);
    assert_eq!(b_tasks[0].target_value, "10.0.0.1:80");

    let target: scanforge::domain::models::Target = serde_json::from_str(&b_tasks[0].input_target).unwrap();
    assert_eq!(target.meta.get("service").map(String::as_str), Some("http"));
}

#[tokio::test]
async fn stage_name_filter_selects_a_specific_stage() {
    let k = kernel().await;
    k.online_agent("agent-1", &["nmap"]).await;

    let project = k.running_project("P", &[]).await;
    let wf = k.workflow(project.id, ExecutionMode::Sequential).await;
    let stage_a = k.stage(wf.id, "subdomains", 1, "nmap", vec![], manual_policy("example.com", "domain")).await;
    let stage_b = k.stage(wf.id, "middle", 2, "nmap", vec![], manual_policy("10.9.9.9", "ip")).await;
    let stage_c = k
        .stage(
            wf.id,
            "resolve",
            3,
            "nmap",
            vec![],
            serde_json::json!({
                "target_sources": [{
                    "source_type": "previous_stage",
                    "target_type": "domain",
                    "filter_rules": {"stage_name": "subdomains"}
                }]
            }),
        )
        .await;

    // Run stage A, record results, then run the rest of the workflow.
    k.scheduler.tick().await.unwrap();
    k.finish_stage_tasks(
        stage_a.id,
        serde_json::json!([
            {"result_type": "subdomain", "target_type": "domain", "target_value": "a.example.com"},
            {"result_type": "subdomain", "target_type": "domain", "target_value": "b.example.com"}
        ]),
    )
    .await;

    k.scheduler.tick().await.unwrap();
    k.finish_stage_tasks(stage_b.id, serde_json::json!([])).await;
    k.scheduler.tick().await.unwrap();

    // Stage C read "subdomains" results, not the nearest stage's.
    let mut c_values: Vec<String> = k
        .tasks
        .list_for_stage(stage_c.id)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.target_value)
        .collect();
    c_values.sort();
    assert_eq!(c_values, vec!["a.example.com", "b.example.com"]);
}

#[tokio::test]
async fn stage_status_filter_trusts_only_matching_agents() {
    let k = kernel().await;
    k.online_agent("agent-1", &["nmap"]).await;

    let project = k.running_project("P", &[]).await;
    let wf = k.workflow(project.id, ExecutionMode::Sequential).await;
    let stage_a = k.stage(wf.id, "a", 1, "nmap", vec![], manual_policy("10.0.0.1,10.0.0.2", "ip")).await;
    let stage_b = k
        .stage(
            wf.id,
            "b",
            2,
            "nmap",
            vec![],
            serde_json::json!({
                "target_sources": [{
                    "source_type": "previous_stage",
                    "target_type": "ip",
                    "filter_rules": {"stage_status": ["finished"]}
                }]
            }),
        )
        .await;

    k.scheduler.tick().await.unwrap();

    // One task finishes with a finding; the other fails after emitting one.
    let a_tasks = k.tasks.list_for_stage(stage_a.id).await.unwrap();
    let mut fin = ResultEnvelope::finished(a_tasks[0].id);
    fin.findings = serde_json::from_value(serde_json::json!([
        {"result_type": "host", "target_type": "ip", "target_value": "10.0.0.50"}
    ]))
    .unwrap();
    k.ingestor.ingest(fin).await.unwrap();
    k.ingestor
        .ingest(ResultEnvelope::failed(a_tasks[1].id, "died"))
        .await
        .unwrap();

    k.scheduler.tick().await.unwrap();

    // agent-1 did finish a task, so its results are trusted.
    let b_tasks = k.tasks.list_for_stage(stage_b.id).await.unwrap();
    assert_eq!(b_tasks.len(), 1);
    assert_eq!(b_tasks[0].target_value, "10.0.0.50");
    assert_eq!(b_tasks[0].status, TaskStatus::Dispatched);
}
