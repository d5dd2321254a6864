//! Permission Model
//!
//! Maps `API key → user → groups → targets` over an immutable snapshot.
//!
//! # Modes
//! - **Open mode**: the document has no `users` section. Every caller may access
//!   every target, whatever key (or no key) it presents.
//! - **Enabled mode**: a `users` section is present, even empty. A key must match a
//!   user exactly; the user's targets are the union of their groups' targets.
//!
//! # Invariants (checked once by [`validate`], never at request time)
//! - Target names are unique and non-empty; ports are positive
//! - Every group target reference resolves to a target
//! - Every user group reference resolves to a group
//! - No two users share an API key

use std::collections::{HashMap, HashSet};

use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::config::ConfigDocument;
use crate::registry::{RegistryError, Target, TargetRegistry};

/// Raised when the configuration document is structurally invalid.
///
/// Fatal at startup: a snapshot that fails validation is never served.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchemaError {
    #[error("targets[{index}].{field} cannot be empty")]
    EmptyField { index: usize, field: &'static str },

    #[error("targets[{index}].port must be a positive integer")]
    InvalidPort { index: usize },

    #[error("Duplicate target name '{0}'")]
    DuplicateTarget(String),

    #[error("groups[{0}].name cannot be empty")]
    EmptyGroupName(usize),

    #[error("Duplicate group name '{0}'")]
    DuplicateGroup(String),

    #[error("groups[{index}] references unknown target '{target}'")]
    UnknownTarget { index: usize, target: String },

    #[error("users[{0}].name cannot be empty")]
    EmptyUserName(usize),

    #[error("users[{0}].api_key must be a non-empty string")]
    EmptyApiKey(usize),

    #[error("Duplicate api_key across users is not allowed")]
    DuplicateApiKey,

    #[error("users[{index}] references unknown group '{group}'")]
    UnknownGroup { index: usize, group: String },
}

/// Check the document's referential integrity.
pub fn validate(document: &ConfigDocument) -> Result<(), SchemaError> {
    let mut target_names: HashSet<&str> = HashSet::new();
    for (index, target) in document.targets.iter().enumerate() {
        let name = target.name.trim();
        if name.is_empty() {
            return Err(SchemaError::EmptyField {
                index,
                field: "name",
            });
        }
        if target.host.trim().is_empty() {
            return Err(SchemaError::EmptyField {
                index,
                field: "host",
            });
        }
        if target.user.trim().is_empty() {
            return Err(SchemaError::EmptyField {
                index,
                field: "user",
            });
        }
        if target.port == 0 {
            return Err(SchemaError::InvalidPort { index });
        }
        if !target_names.insert(name) {
            return Err(SchemaError::DuplicateTarget(name.to_string()));
        }
    }

    let mut group_names: HashSet<&str> = HashSet::new();
    for (index, group) in document.groups.iter().flatten().enumerate() {
        let name = group.name.trim();
        if name.is_empty() {
            return Err(SchemaError::EmptyGroupName(index));
        }
        if !group_names.insert(name) {
            return Err(SchemaError::DuplicateGroup(name.to_string()));
        }
        for target in &group.targets {
            if !target_names.contains(target.as_str()) {
                return Err(SchemaError::UnknownTarget {
                    index,
                    target: target.clone(),
                });
            }
        }
    }

    let mut api_keys: HashSet<&str> = HashSet::new();
    for (index, user) in document.users.iter().flatten().enumerate() {
        if user.name.trim().is_empty() {
            return Err(SchemaError::EmptyUserName(index));
        }
        if user.api_key.is_empty() {
            return Err(SchemaError::EmptyApiKey(index));
        }
        if !api_keys.insert(user.api_key.as_str()) {
            return Err(SchemaError::DuplicateApiKey);
        }
        for group in &user.groups {
            if !group_names.contains(group.as_str()) {
                return Err(SchemaError::UnknownGroup {
                    index,
                    group: group.clone(),
                });
            }
        }
    }

    Ok(())
}

/// A named bundle of targets
#[derive(Debug, Clone)]
pub struct Group {
    pub name: String,
    pub targets: Vec<String>,
}

/// An identity bound to an API key
#[derive(Clone)]
pub struct User {
    pub name: String,
    api_key: Zeroizing<String>,
    pub groups: Vec<String>,
}

impl User {
    fn key_matches(&self, candidate: &str) -> bool {
        self.api_key.as_bytes().ct_eq(candidate.as_bytes()).into()
    }
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("name", &self.name)
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}

/// The validated, immutable (targets, groups, users) tuple.
#[derive(Debug, Clone)]
pub struct PermissionSnapshot {
    registry: TargetRegistry,
    groups: Vec<Group>,
    group_index: HashMap<String, usize>,
    users: Option<Vec<User>>,
}

impl PermissionSnapshot {
    /// Validate the document and build the snapshot. Nothing is applied on failure.
    pub fn load(document: &ConfigDocument) -> Result<Self, SchemaError> {
        validate(document)?;

        let registry = TargetRegistry::new(document.targets.iter().map(Target::from_config))
            .map_err(|e| match e {
                RegistryError::Duplicate(name) | RegistryError::NotFound(name) => {
                    SchemaError::DuplicateTarget(name)
                }
            })?;

        let groups: Vec<Group> = document
            .groups
            .iter()
            .flatten()
            .map(|g| Group {
                name: g.name.trim().to_string(),
                targets: g.targets.clone(),
            })
            .collect();
        let group_index = groups
            .iter()
            .enumerate()
            .map(|(i, g)| (g.name.clone(), i))
            .collect();

        let users = document.users.as_ref().map(|users| {
            users
                .iter()
                .map(|u| User {
                    name: u.name.trim().to_string(),
                    api_key: Zeroizing::new(u.api_key.clone()),
                    groups: u.groups.clone(),
                })
                .collect::<Vec<_>>()
        });

        info!(
            "[permissions] Permission snapshot loaded: {} targets, {} groups, {}",
            registry.len(),
            groups.len(),
            match &users {
                Some(u) => format!("{} users (permissions enabled)", u.len()),
                None => "no users section (open mode)".to_string(),
            }
        );

        Ok(Self {
            registry,
            groups,
            group_index,
            users,
        })
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// True iff the document carried a `users` section
    pub fn permissions_enabled(&self) -> bool {
        self.users.is_some()
    }

    /// Exact-match lookup of the user owning `api_key`.
    ///
    /// Every user is compared in constant time and the scan never stops early.
    pub fn find_user(&self, api_key: &str) -> Option<&User> {
        let mut found = None;
        for user in self.users.iter().flatten() {
            if user.key_matches(api_key) && found.is_none() {
                found = Some(user);
            }
        }
        found
    }

    /// Union of the user's group targets, de-duplicated, first-seen order
    pub fn targets_for_user(&self, user: &User) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for group in &user.groups {
            let Some(&i) = self.group_index.get(group) else {
                continue;
            };
            for target in &self.groups[i].targets {
                if seen.insert(target.as_str()) {
                    result.push(target.clone());
                }
            }
        }
        result
    }

    /// Targets reachable with `api_key`.
    ///
    /// Open mode: every target. Enabled mode: the matching user's targets, or an
    /// empty list when the key matches nobody. Whether an unknown key is an error
    /// is the gateway's decision.
    pub fn authorized_targets(&self, api_key: &str) -> Vec<String> {
        if !self.permissions_enabled() {
            return self.registry.list_targets();
        }
        match self.find_user(api_key) {
            Some(user) => self.targets_for_user(user),
            None => {
                debug!("[permissions] API key matched no user");
                Vec::new()
            }
        }
    }

    pub fn can_access(&self, api_key: &str, target: &str) -> bool {
        self.authorized_targets(api_key).iter().any(|t| t == target)
    }
}
