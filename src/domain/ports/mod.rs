//! Port traits decoupling the kernel from persistence and transport.

pub mod agent_channel;
pub mod agent_registry;
pub mod policy_rule_repository;
pub mod project_repository;
pub mod stage_result_repository;
pub mod tag_service;
pub mod task_repository;
pub mod workflow_repository;

pub use agent_channel::AgentChannel;
pub use agent_registry::AgentRegistry;
pub use policy_rule_repository::PolicyRuleRepository;
pub use project_repository::ProjectRepository;
pub use stage_result_repository::{StageResultFilter, StageResultRepository};
pub use tag_service::{NullTagService, Tag, TagService};
pub use task_repository::{TaskCounts, TaskRepository};
pub use workflow_repository::WorkflowRepository;
