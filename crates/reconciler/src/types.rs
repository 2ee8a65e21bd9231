//! Actions a reconciliation pass takes and how it went.

use std::fmt;

/// Why a container was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// No active image exists for the container's tag.
    ImageMissing,
    /// The active image for the tag has no repo tag.
    ImageUntagged,
    /// The container runs an image that is no longer active.
    Superseded,
    /// The branch claiming the name uses a different image.
    BranchMismatch,
    /// The container runs the branch's image under a name nobody claims.
    Unwanted,
    /// Recreation was forced although the container was current.
    Forced,
    /// The name is needed for a container of another image.
    NameConflict,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::ImageMissing => "image missing",
            Self::ImageUntagged => "image untagged",
            Self::Superseded => "image superseded",
            Self::BranchMismatch => "branch uses another image",
            Self::Unwanted => "name not desired",
            Self::Forced => "forced recreate",
            Self::NameConflict => "name conflict",
        };
        f.write_str(reason)
    }
}

/// One step of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Remove a container.
    RemoveContainer {
        name: String,
        id: String,
        reason: RemovalReason,
    },
    /// Create a missing container.
    CreateContainer { name: String, image: String },
    /// Recreate a container on its tag's new image, keeping name and ports.
    RecreateContainer { name: String, image: String },
}

impl ReconcileAction {
    /// Name of the container the action concerns.
    pub fn container_name(&self) -> &str {
        match self {
            Self::RemoveContainer { name, .. }
            | Self::CreateContainer { name, .. }
            | Self::RecreateContainer { name, .. } => name,
        }
    }

    pub const fn is_removal(&self) -> bool {
        matches!(self, Self::RemoveContainer { .. })
    }
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileResult {
    /// Actions that were taken.
    pub actions_taken: Vec<ReconcileAction>,
    /// Actions that failed, with the reason.
    pub actions_failed: Vec<(ReconcileAction, String)>,
    /// Branches left alone because their image is not present yet.
    pub skipped_branches: Vec<String>,
    /// Whether nothing needed doing and no branch was skipped.
    pub converged: bool,
}

impl ReconcileResult {
    /// Create a new reconcile result.
    pub fn new(
        actions_taken: Vec<ReconcileAction>,
        actions_failed: Vec<(ReconcileAction, String)>,
    ) -> Self {
        let converged = actions_taken.is_empty() && actions_failed.is_empty();
        Self {
            actions_taken,
            actions_failed,
            skipped_branches: Vec::new(),
            converged,
        }
    }

    /// A branch that could not be converged because it has no image.
    pub fn skipped(branch: impl Into<String>) -> Self {
        Self {
            actions_taken: Vec::new(),
            actions_failed: Vec::new(),
            skipped_branches: vec![branch.into()],
            converged: false,
        }
    }

    /// A pass that found nothing to do.
    pub fn unchanged() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Check if all actions succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.actions_failed.is_empty()
    }

    /// Fold another pass into this one.
    pub fn merge(&mut self, other: Self) {
        self.actions_taken.extend(other.actions_taken);
        self.actions_failed.extend(other.actions_failed);
        self.skipped_branches.extend(other.skipped_branches);
        self.converged = self.actions_taken.is_empty()
            && self.actions_failed.is_empty()
            && self.skipped_branches.is_empty();
    }

    /// Number of create and recreate actions, successful or not.
    pub fn creations(&self) -> usize {
        self.actions_taken
            .iter()
            .chain(self.actions_failed.iter().map(|(action, _)| action))
            .filter(|action| !action.is_removal())
            .count()
    }

    /// Number of removals taken.
    pub fn removals(&self) -> usize {
        self.actions_taken
            .iter()
            .filter(|action| action.is_removal())
            .count()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::indexing_slicing)]

    use super::*;

    fn create(name: &str) -> ReconcileAction {
        ReconcileAction::CreateContainer {
            name: name.to_string(),
            image: "alice/lgd:release".to_string(),
        }
    }

    #[test]
    fn test_empty_result_is_converged() {
        let result = ReconcileResult::unchanged();
        assert!(result.converged);
        assert!(result.all_succeeded());
    }

    #[test]
    fn test_merge_recomputes_convergence() {
        let mut result = ReconcileResult::unchanged();
        result.merge(ReconcileResult::new(vec![create("lgd0")], Vec::new()));
        assert!(!result.converged);
        assert_eq!(result.creations(), 1);
        assert_eq!(result.removals(), 0);
    }

    #[test]
    fn test_skipped_branch_is_not_converged() {
        let mut result = ReconcileResult::unchanged();
        result.merge(ReconcileResult::skipped("release"));
        assert!(!result.converged);
        assert!(result.all_succeeded());
        assert_eq!(result.skipped_branches, vec!["release".to_string()]);
    }

    #[test]
    fn test_failed_creations_are_counted() {
        let result = ReconcileResult::new(
            vec![ReconcileAction::RemoveContainer {
                name: "lgd0".to_string(),
                id: "c-1".to_string(),
                reason: RemovalReason::Superseded,
            }],
            vec![(create("lgd0"), "timed out".to_string())],
        );
        assert_eq!(result.creations(), 1);
        assert_eq!(result.removals(), 1);
        assert!(!result.all_succeeded());
        assert_eq!(result.actions_failed[0].0.container_name(), "lgd0");
    }
}
