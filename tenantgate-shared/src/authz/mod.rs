/// Fine-grained authorization
///
/// Permissions are `(module, action)` pairs granted to principals. A module
/// is a named capability area (`patients`, `appointments`, ...); the standard
/// actions are `view`, `create`, `edit` and `delete`.
///
/// - [`PermissionSet`]: module → action → bool map, normalised so absent
///   entries read as `false`
/// - [`GrantRepository`]: storage seam; [`PgGrantRepository`] in production
/// - [`PermissionEngine`]: evaluation, superuser bypass and the fail-closed
///   [`PermissionEngine::authorize`] gate

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub mod engine;
pub mod postgres;
pub mod repository;

pub use engine::PermissionEngine;
pub use postgres::PgGrantRepository;
pub use repository::{GrantRepository, ModuleInfo};

/// Standard module actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    View,
    Create,
    Edit,
    Delete,
}

impl Action {
    /// Every standard action, in display order
    pub const ALL: [Action; 4] = [Action::View, Action::Create, Action::Edit, Action::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Create => "create",
            Action::Edit => "edit",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(Action::View),
            "create" => Ok(Action::Create),
            "edit" => Ok(Action::Edit),
            "delete" => Ok(Action::Delete),
            other => Err(format!("Unknown action: {}", other)),
        }
    }
}

impl AsRef<str> for Action {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Module → action → allowed
///
/// Serialises as a plain nested JSON object so it can travel inside access
/// tokens and API responses:
///
/// ```json
/// {"patients": {"view": true, "create": false, "edit": false, "delete": false}}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeMap<String, BTreeMap<String, bool>>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `module` with every standard action set to `allowed`
    ///
    /// Existing entries for the module are overwritten.
    pub fn seed_module(&mut self, module: impl Into<String>, allowed: bool) {
        let actions = Action::ALL
            .iter()
            .map(|a| (a.as_str().to_string(), allowed))
            .collect();
        self.0.insert(module.into(), actions);
    }

    pub fn set(&mut self, module: impl Into<String>, action: impl Into<String>, allowed: bool) {
        self.0
            .entry(module.into())
            .or_default()
            .insert(action.into(), allowed);
    }

    pub fn grant(&mut self, module: impl Into<String>, action: impl Into<String>) {
        self.set(module, action, true);
    }

    /// Whether `action` on `module` is explicitly allowed
    pub fn allows(&self, module: &str, action: &str) -> bool {
        self.0
            .get(module)
            .and_then(|actions| actions.get(action))
            .copied()
            .unwrap_or(false)
    }

    pub fn contains_module(&self, module: &str) -> bool {
        self.0.contains_key(module)
    }

    pub fn module(&self, module: &str) -> Option<&BTreeMap<String, bool>> {
        self.0.get(module)
    }

    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Every `(module, action)` pair set to `true`
    pub fn granted_pairs(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .flat_map(|(module, actions)| {
                actions
                    .iter()
                    .filter(|(_, allowed)| **allowed)
                    .map(move |(action, _)| (module.clone(), action.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl crate::cache::Cacheable for PermissionSet {
    const SCHEMA_VERSION: u32 = 1;
}
