//! SQLite implementation of the AgentRegistry.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Agent, AgentStatus};
use crate::domain::ports::AgentRegistry;

use super::utils::{parse_opt_ts, parse_string_vec, to_json_string};

#[derive(Clone)]
pub struct SqliteAgentRegistry {
    pool: SqlitePool,
}

impl SqliteAgentRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AgentRow {
    agent_id: String,
    status: String,
    supported_tools: String,
    tags: String,
    current_load: i64,
    last_seen_at: Option<String>,
}

impl TryFrom<AgentRow> for Agent {
    type Error = DomainError;

    fn try_from(row: AgentRow) -> Result<Self, Self::Error> {
        Ok(Agent {
            agent_id: row.agent_id,
            status: AgentStatus::parse_str(&row.status)
                .ok_or_else(|| DomainError::Serialization(format!("unknown agent status {:?}", row.status)))?,
            supported_tools: parse_string_vec(&row.supported_tools)?,
            tags: parse_string_vec(&row.tags)?,
            current_load: row.current_load,
            last_seen_at: parse_opt_ts(row.last_seen_at.as_deref())?,
        })
    }
}

#[async_trait]
impl AgentRegistry for SqliteAgentRegistry {
    async fn get(&self, agent_id: &str) -> DomainResult<Option<Agent>> {
        let row: Option<AgentRow> = sqlx::query_as("SELECT * FROM agents WHERE agent_id = ?")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Agent::try_from).transpose()
    }

    async fn list_online(&self) -> DomainResult<Vec<Agent>> {
        let rows: Vec<AgentRow> = sqlx::query_as("SELECT * FROM agents WHERE status = 'online' ORDER BY agent_id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Agent::try_from).collect()
    }

    async fn adjust_load(&self, agent_id: &str, delta: i64) -> DomainResult<()> {
        sqlx::query("UPDATE agents SET current_load = MAX(0, current_load + ?) WHERE agent_id = ?")
            .bind(delta)
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert(&self, agent: &Agent) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO agents (agent_id, status, supported_tools, tags, current_load, last_seen_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(agent_id) DO UPDATE SET
                   status = excluded.status,
                   supported_tools = excluded.supported_tools,
                   tags = excluded.tags,
                   current_load = excluded.current_load,
                   last_seen_at = excluded.last_seen_at"#,
        )
        .bind(&agent.agent_id)
        .bind(agent.status.as_str())
        .bind(to_json_string(&agent.supported_tools)?)
        .bind(to_json_string(&agent.tags)?)
        .bind(agent.current_load)
        .bind(agent.last_seen_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
