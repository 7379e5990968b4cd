//! Static group membership from `[identity.groups]`.

use std::collections::{BTreeMap, BTreeSet};

use wiki_index_core::acl::GroupResolver;

use crate::config::IdentityConfig;

/// Group name → members, fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticGroups {
    groups: BTreeMap<String, BTreeSet<String>>,
}

impl StaticGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &IdentityConfig) -> Self {
        let mut groups = Self::new();
        for (group, members) in &config.groups {
            for member in members {
                groups.add(group, member);
            }
        }
        groups
    }

    pub fn add(&mut self, group: &str, principal: &str) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(principal.to_string());
    }

    pub fn with(mut self, group: &str, principal: &str) -> Self {
        self.add(group, principal);
        self
    }
}

impl GroupResolver for StaticGroups {
    fn is_member(&self, principal: &str, group: &str) -> bool {
        self.groups
            .get(group)
            .map(|members| members.contains(principal))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let config = IdentityConfig {
            groups: BTreeMap::from([(
                "editors".to_string(),
                vec!["alice".to_string(), "bob".to_string()],
            )]),
        };
        let groups = StaticGroups::from_config(&config);
        assert!(groups.is_member("alice", "editors"));
        assert!(!groups.is_member("carol", "editors"));
        assert!(!groups.is_member("alice", "admins"));
    }
}
