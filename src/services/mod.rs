//! Orchestration services: the scheduling kernel.

pub mod allocator;
pub mod dispatcher;
pub mod ingestor;
pub mod policy_enforcer;
pub mod scheduler;
pub mod target_provider;

pub use allocator::ResourceAllocator;
pub use dispatcher::{DispatchOutcome, DispatchStats, TaskDispatcher};
pub use ingestor::{IngestOutcome, Ingestor};
pub use policy_enforcer::{EnforcementOutcome, PolicyEnforcer};
pub use scheduler::{Scheduler, TickStats};
pub use target_provider::{
    ApiProvider, DatabaseProvider, FileProvider, ManualProvider, PreviousStageProvider, ProjectTargetProvider,
    ProvideContext, ProviderRegistry, SourceProvider, TargetProviderService,
};
