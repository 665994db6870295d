//! Project domain model.
//!
//! A project is a named scanning engagement bounded by a target scope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Defined but not yet scheduled.
    Draft,
    /// Actively scheduled each tick.
    Running,
    /// Operator-paused; no new tasks are generated.
    Paused,
    /// All workflows settled.
    Finished,
    /// Unrecoverable error (e.g. cyclic stage graph).
    Failed,
}

impl Default for ProjectStatus {
    fn default() -> Self {
        Self::Draft
    }
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "finished" => Some(Self::Finished),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Valid transitions. Progress is monotonic except the paused/running
    /// pair, which flips both ways.
    pub fn valid_transitions(&self) -> &'static [ProjectStatus] {
        match self {
            Self::Draft => &[Self::Running, Self::Failed],
            Self::Running => &[Self::Paused, Self::Finished, Self::Failed],
            Self::Paused => &[Self::Running, Self::Failed],
            Self::Finished => &[],
            Self::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// A named scanning engagement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    /// Permissible target entries (CIDR / IP / `.suffix` domains).
    /// Empty means unconstrained. Immutable after first dispatch.
    pub scope: Vec<String>,
    pub status: ProjectStatus,
    /// Environment tags fed into skip-policy evaluation.
    pub tags: Vec<String>,
    /// Short reason recorded when the project fails.
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            scope: Vec::new(),
            status: ProjectStatus::default(),
            tags: Vec::new(),
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_scope(mut self, scope: Vec<String>) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_status(mut self, status: ProjectStatus) -> Self {
        self.status = status;
        self
    }

    pub fn can_transition_to(&self, new_status: ProjectStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    pub fn transition_to(&mut self, new_status: ProjectStatus) -> Result<(), String> {
        if !self.can_transition_to(new_status) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.status.as_str(),
                new_status.as_str()
            ));
        }
        self.status = new_status;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Comma-joined scope string, the form the scope validator splits.
    pub fn scope_string(&self) -> String {
        self.scope.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in [
            ProjectStatus::Draft,
            ProjectStatus::Running,
            ProjectStatus::Paused,
            ProjectStatus::Finished,
            ProjectStatus::Failed,
        ] {
            assert_eq!(ProjectStatus::parse_str(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_pause_resume_round_trip() {
        let mut p = Project::new("P").with_status(ProjectStatus::Running);
        p.transition_to(ProjectStatus::Paused).unwrap();
        p.transition_to(ProjectStatus::Running).unwrap();
        assert_eq!(p.status, ProjectStatus::Running);
    }

    #[test]
    fn test_monotonic_otherwise() {
        let mut p = Project::new("P").with_status(ProjectStatus::Running);
        p.transition_to(ProjectStatus::Finished).unwrap();
        assert!(p.transition_to(ProjectStatus::Running).is_err());
        assert!(p.transition_to(ProjectStatus::Draft).is_err());

        let mut p = Project::new("P");
        assert!(p.transition_to(ProjectStatus::Finished).is_err());
        p.transition_to(ProjectStatus::Running).unwrap();
    }

    #[test]
    fn test_terminal_states() {
        assert!(ProjectStatus::Finished.is_terminal());
        assert!(ProjectStatus::Failed.is_terminal());
        assert!(!ProjectStatus::Paused.is_terminal());
    }
}
