//! SQLite adapters for the repository ports.

pub mod agent_repository;
pub mod connection;
pub mod migrations;
pub mod policy_rule_repository;
pub mod project_repository;
pub mod stage_result_repository;
pub mod task_repository;
mod utils;
pub mod workflow_repository;

pub use agent_repository::SqliteAgentRegistry;
pub use connection::{create_pool, create_test_pool, verify_connection, PoolConfig};
pub use migrations::{all_embedded_migrations, migrate, Migration, Migrator};
pub use policy_rule_repository::SqlitePolicyRuleRepository;
pub use project_repository::SqliteProjectRepository;
pub use stage_result_repository::SqliteStageResultRepository;
pub use task_repository::SqliteTaskRepository;
pub use workflow_repository::SqliteWorkflowRepository;
