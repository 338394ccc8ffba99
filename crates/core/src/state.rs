//! Simulated observed state of the broker
//!
//! This models what the broker admin surface would report: users,
//! vhosts, permissions, tags, and managed file contents. The executor
//! is the only component that mutates it; the planner reads it to skip
//! actions whose target state already holds.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A broker user as observed: password plus tag set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserState {
    pub password: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// Snapshot of the broker's current state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedState {
    #[serde(default)]
    pub users: BTreeMap<String, UserState>,

    #[serde(default)]
    pub vhosts: BTreeSet<String>,

    /// user -> vhost -> permission string.
    #[serde(default)]
    pub permissions: BTreeMap<String, BTreeMap<String, String>>,

    /// Managed file contents, keyed by path.
    #[serde(default)]
    pub files: BTreeMap<String, String>,

    /// Services restarted during runs against this state, in order.
    #[serde(default)]
    pub restarts: Vec<String>,
}

impl ObservedState {
    /// State of a freshly installed broker: the stock `guest` user with
    /// the stock password, the `/` vhost, and full guest permissions.
    pub fn default_broker() -> Self {
        let mut state = Self::default();
        state.users.insert(
            "guest".to_string(),
            UserState {
                password: "guest".to_string(),
                tags: BTreeSet::new(),
            },
        );
        state.vhosts.insert("/".to_string());
        state
            .permissions
            .entry("guest".to_string())
            .or_default()
            .insert("/".to_string(), ".* .* .*".to_string());
        state
    }

    pub fn from_json_str(json: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &std::path::Path) -> Result<Self, CoreError> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub fn to_json_string(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn has_user(&self, user: &str) -> bool {
        self.users.contains_key(user)
    }

    pub fn user_password(&self, user: &str) -> Option<&str> {
        self.users.get(user).map(|u| u.password.as_str())
    }

    pub fn has_vhost(&self, vhost: &str) -> bool {
        self.vhosts.contains(vhost)
    }

    pub fn permissions_for(&self, user: &str, vhost: &str) -> Option<&str> {
        self.permissions
            .get(user)
            .and_then(|by_vhost| by_vhost.get(vhost))
            .map(String::as_str)
    }

    pub fn has_tag(&self, user: &str, tag: &str) -> bool {
        self.users.get(user).is_some_and(|u| u.tags.contains(tag))
    }

    pub fn file_content(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }
}
