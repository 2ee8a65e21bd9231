//! The process-wide table of deployment branches.

use std::collections::HashMap;

use crate::branch::Branch;
use crate::error::Error;
use crate::result::Result;

/// Ways a registry tag string may name a branch's image.
///
/// Push payloads carry a bare tag (`release`), the CLI usually passes
/// `lgd:release`, and the branch stores `alice/lgd:release`. Strategies
/// are tried in [`TagMatch::ORDER`]; the first one that hits wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagMatch {
    /// The tag is the branch's image reference verbatim.
    Exact,
    /// `<registryUser>/<tag>`.
    UserPrefixed,
    /// `<registryUser>/<image>:<tag>`.
    Qualified,
}

impl TagMatch {
    pub const ORDER: [Self; 3] = [Self::Exact, Self::UserPrefixed, Self::Qualified];

    /// The image reference this strategy expects for `tag`.
    pub fn candidate(self, tag: &str, registry_user: &str, image: &str) -> String {
        match self {
            Self::Exact => tag.to_string(),
            Self::UserPrefixed => format!("{registry_user}/{tag}"),
            Self::Qualified => format!("{registry_user}/{image}:{tag}"),
        }
    }
}

/// Immutable mapping of branch name to [`Branch`].
///
/// Built once at startup; there are no mutating methods.
#[derive(Debug, Clone)]
pub struct ConfigCatalog {
    branches: Vec<Branch>,
    registry_user: String,
    image: String,
}

impl ConfigCatalog {
    /// Build a catalog, checking that container names partition across branches.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateContainerName`] when two branches claim the
    /// same container, or [`Error::InvalidConfig`] on duplicate branch names.
    pub fn new(
        registry_user: impl Into<String>,
        image: impl Into<String>,
        branches: Vec<Branch>,
    ) -> Result<Self> {
        let mut owners: HashMap<&str, &str> = HashMap::new();
        for (position, branch) in branches.iter().enumerate() {
            let repeated = branches
                .iter()
                .take(position)
                .any(|earlier| earlier.name() == branch.name());
            if repeated {
                return Err(Error::invalid_config(format!(
                    "branch '{}' is declared twice",
                    branch.name()
                )));
            }

            for name in branch.containers().keys() {
                if let Some(first) = owners.insert(name.as_str(), branch.name()) {
                    return Err(Error::duplicate_container_name(name, first, branch.name()));
                }
            }
        }

        Ok(Self {
            branches,
            registry_user: registry_user.into(),
            image: image.into(),
        })
    }

    /// All branches in declaration order.
    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    pub fn branch(&self, name: &str) -> Option<&Branch> {
        self.branches.iter().find(|branch| branch.name() == name)
    }

    pub fn registry_user(&self) -> &str {
        &self.registry_user
    }

    /// The branch whose desired containers include `name`.
    pub fn branch_for_container_name(&self, name: &str) -> Option<&Branch> {
        self.branches.iter().find(|branch| branch.claims(name))
    }

    /// Resolve a registry tag to its branch, trying every [`TagMatch`] in order.
    pub fn branch_for_tag(&self, tag: &str) -> Option<&Branch> {
        TagMatch::ORDER.iter().find_map(|strategy| {
            let candidate = strategy.candidate(tag, &self.registry_user, &self.image);
            self.branches
                .iter()
                .find(|branch| branch.image_tag() == candidate)
        })
    }
}
