//! Shared fixtures for integration tests: a full orchestration kernel
//! wired against an in-memory SQLite database and a recording agent
//! channel standing in for the fleet.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use scanforge::adapters::sqlite::{
    create_test_pool, migrate, SqliteAgentRegistry, SqlitePolicyRuleRepository, SqliteProjectRepository,
    SqliteStageResultRepository, SqliteTaskRepository, SqliteWorkflowRepository,
};
use scanforge::domain::errors::{DomainError, DomainResult};
use scanforge::domain::models::{
    Agent, ExecutionMode, Project, ProjectStatus, ResultEnvelope, ScanStage, SchedulerConfig, TargetPolicy,
    TaskEnvelope, Workflow,
};
use scanforge::domain::ports::{
    AgentChannel, AgentRegistry, NullTagService, ProjectRepository, TaskRepository, WorkflowRepository,
};
use scanforge::services::{
    ApiProvider, DatabaseProvider, FileProvider, Ingestor, ManualProvider, PolicyEnforcer, PreviousStageProvider,
    ProjectTargetProvider, ProviderRegistry, ResourceAllocator, Scheduler, TargetProviderService, TaskDispatcher,
};

/// Agent channel that records deliveries instead of crossing the network.
#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<(String, TaskEnvelope)>>,
    pub fail: Mutex<bool>,
}

impl RecordingChannel {
    pub fn sent_targets(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, env)| {
                serde_json::from_str::<scanforge::domain::models::Target>(&env.input_target)
                    .map(|t| t.value)
                    .unwrap_or_else(|_| env.input_target.clone())
            })
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl AgentChannel for RecordingChannel {
    async fn send_task(&self, agent_id: &str, envelope: &TaskEnvelope) -> DomainResult<()> {
        if *self.fail.lock().unwrap() {
            return Err(DomainError::Transport("recording channel set to fail".into()));
        }
        self.sent.lock().unwrap().push((agent_id.to_string(), envelope.clone()));
        Ok(())
    }
}

/// A fully wired kernel over an in-memory database.
pub struct TestKernel {
    pub pool: sqlx::SqlitePool,
    pub projects: Arc<SqliteProjectRepository>,
    pub workflows: Arc<SqliteWorkflowRepository>,
    pub tasks: Arc<SqliteTaskRepository>,
    pub results: Arc<SqliteStageResultRepository>,
    pub agents: Arc<SqliteAgentRegistry>,
    pub rules: Arc<SqlitePolicyRuleRepository>,
    pub channel: Arc<RecordingChannel>,
    pub scheduler: Scheduler,
    pub ingestor: Ingestor,
    pub etl_rx: mpsc::Receiver<ResultEnvelope>,
}

pub async fn kernel() -> TestKernel {
    let pool = create_test_pool().await.expect("test pool");
    migrate(&pool).await.expect("migrations");

    let projects = Arc::new(SqliteProjectRepository::new(pool.clone()));
    let workflows = Arc::new(SqliteWorkflowRepository::new(pool.clone()));
    let tasks = Arc::new(SqliteTaskRepository::new(pool.clone()));
    let results = Arc::new(SqliteStageResultRepository::new(pool.clone()));
    let agents = Arc::new(SqliteAgentRegistry::new(pool.clone()));
    let rules = Arc::new(SqlitePolicyRuleRepository::new(pool.clone()));
    let channel = Arc::new(RecordingChannel::default());

    let registry = Arc::new(ProviderRegistry::new());
    registry.register(Arc::new(ManualProvider));
    registry.register(Arc::new(ProjectTargetProvider));
    registry.register(Arc::new(FileProvider));
    registry.register(Arc::new(ApiProvider));
    registry.register(Arc::new(DatabaseProvider::new(pool.clone())));
    registry.register(Arc::new(PreviousStageProvider::new(
        workflows.clone(),
        tasks.clone(),
        results.clone(),
    )));
    let provider = Arc::new(TargetProviderService::new(registry));

    let enforcer = Arc::new(PolicyEnforcer::new(rules.clone()));
    let allocator = Arc::new(ResourceAllocator::new(Arc::new(NullTagService)));
    let dispatcher = Arc::new(TaskDispatcher::new(
        enforcer,
        allocator,
        agents.clone(),
        tasks.clone(),
        channel.clone(),
    ));

    let scheduler = Scheduler::new(
        projects.clone(),
        workflows.clone(),
        tasks.clone(),
        provider,
        dispatcher,
        SchedulerConfig {
            tick_interval_secs: 1,
            project_deadline_secs: 30,
            ..SchedulerConfig::default()
        },
    );

    let (ingestor, etl_rx) = Ingestor::new(tasks.clone(), results.clone(), agents.clone(), 64);

    TestKernel {
        pool,
        projects,
        workflows,
        tasks,
        results,
        agents,
        rules,
        channel,
        scheduler,
        ingestor,
        etl_rx,
    }
}

impl TestKernel {
    /// Register one online agent supporting the given tools.
    pub async fn online_agent(&self, agent_id: &str, tools: &[&str]) {
        let agent = Agent::online(agent_id, tools.iter().map(ToString::to_string).collect());
        self.agents.upsert(&agent).await.expect("upsert agent");
    }

    /// Create a running project with the given scope.
    pub async fn running_project(&self, name: &str, scope: &[&str]) -> Project {
        let project = Project::new(name)
            .with_scope(scope.iter().map(ToString::to_string).collect())
            .with_status(ProjectStatus::Running);
        self.projects.create(&project).await.expect("create project");
        project
    }

    pub async fn workflow(&self, project_id: Uuid, mode: ExecutionMode) -> Workflow {
        let workflow = Workflow::new(project_id, "wf", mode);
        self.workflows.create(&workflow).await.expect("create workflow");
        workflow
    }

    /// Add a stage; `policy` as a JSON value in the wire shape.
    pub async fn stage(
        &self,
        workflow_id: Uuid,
        name: &str,
        order: i64,
        tool: &str,
        predecessors: Vec<Uuid>,
        policy: serde_json::Value,
    ) -> ScanStage {
        let policy: TargetPolicy = serde_json::from_value(policy).expect("parse policy");
        let stage = ScanStage::new(workflow_id, name, order, tool)
            .with_predecessors(predecessors)
            .with_policy(policy)
            .with_timeout_secs(3600);
        self.workflows.insert_stage(&stage).await.expect("insert stage");
        stage
    }

    /// Finish every dispatched task of a stage with the given findings.
    pub async fn finish_stage_tasks(&self, stage_id: Uuid, findings: serde_json::Value) {
        let tasks = self.tasks.list_for_stage(stage_id).await.expect("list tasks");
        for task in tasks {
            if task.is_terminal() {
                continue;
            }
            let mut envelope = ResultEnvelope::finished(task.id);
            if let Ok(parsed) = serde_json::from_value(findings.clone()) {
                envelope.findings = parsed;
            }
            self.ingestor.ingest(envelope).await.expect("ingest");
        }
    }

    /// Drain the ETL queue so backpressure never interferes with a test.
    pub fn drain_etl(&mut self) {
        while self.etl_rx.try_recv().is_ok() {}
    }
}

/// Manual-source policy for a fixed list of targets.
pub fn manual_policy(targets: &str, target_type: &str) -> serde_json::Value {
    serde_json::json!({
        "target_sources": [
            {"source_type": "manual", "target_type": target_type, "source_value": targets}
        ]
    })
}

/// Policy reading the nearest previous stage's results directly.
pub fn previous_stage_policy() -> serde_json::Value {
    serde_json::json!({
        "target_sources": [
            {"source_type": "previous_stage", "target_type": "ip"}
        ]
    })
}

/// Small sleep for the rare case a test needs wall-clock separation.
#[allow(dead_code)]
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
