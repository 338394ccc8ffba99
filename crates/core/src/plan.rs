//! Plan computation
//!
//! The planner translates a [`ResolvedConfig`] into an ordered list of
//! idempotent actions: it emits only the actions whose target state
//! differs from what is currently observed, so converging an
//! already-converged broker produces an empty plan.

use serde::Serialize;
use tracing::debug;

use crate::notify::Timing;
use crate::render::{BROKER_CONF_PATH, ENV_CONF_PATH, render_broker_conf, render_env_conf};
use crate::resolve::{GUEST_USER, ResolvedConfig};
use crate::state::ObservedState;

/// Service restarted when a managed config file changes.
pub const BROKER_SERVICE: &str = "rabbitmq-server";

/// Permission string granted to the managed user on its vhost.
pub const DEFAULT_PERMISSIONS: &str = ".* .* .*";

/// Tag granted to the managed user.
pub const ADMIN_TAG: &str = "administrator";

/// One idempotent convergence action.
///
/// Each variant carries the fields needed both to execute it and to
/// compare against prior state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    DeleteUser {
        user: String,
    },
    AddUser {
        user: String,
        password: String,
    },
    ChangePassword {
        user: String,
        password: String,
    },
    AddVhost {
        vhost: String,
    },
    SetPermissions {
        user: String,
        vhost: String,
        permissions: String,
    },
    SetTag {
        user: String,
        tag: String,
    },
    RenderFile {
        path: String,
        content: String,
    },
    NotifyService {
        service: String,
        timing: Timing,
    },
}

impl Action {
    /// Stable identity used in errors and notification records.
    pub fn identity(&self) -> String {
        match self {
            Action::DeleteUser { user } => format!("delete_user({user})"),
            Action::AddUser { user, .. } => format!("add_user({user})"),
            Action::ChangePassword { user, .. } => format!("change_password({user})"),
            Action::AddVhost { vhost } => format!("add_vhost({vhost})"),
            Action::SetPermissions { user, vhost, .. } => {
                format!("set_permissions({user}, {vhost})")
            }
            Action::SetTag { user, tag } => format!("set_tag({user}, {tag})"),
            Action::RenderFile { path, .. } => format!("render_file({path})"),
            Action::NotifyService { service, .. } => format!("notify_service({service})"),
        }
    }

    /// Human-readable description of the change.
    pub fn description(&self) -> String {
        match self {
            Action::DeleteUser { user } => format!("delete user '{user}'"),
            Action::AddUser { user, .. } => format!("add user '{user}'"),
            Action::ChangePassword { user, .. } => format!("change password for '{user}'"),
            Action::AddVhost { vhost } => format!("add vhost '{vhost}'"),
            Action::SetPermissions {
                user,
                vhost,
                permissions,
            } => format!("grant '{permissions}' to '{user}' on '{vhost}'"),
            Action::SetTag { user, tag } => format!("tag '{user}' as '{tag}'"),
            Action::RenderFile { path, content } => {
                format!("render {path} ({} lines)", content.lines().count())
            }
            Action::NotifyService { service, timing } => {
                let mode = match timing {
                    Timing::Immediate => "immediately",
                    Timing::Deferred => "at end of run",
                };
                format!("restart {service} {mode}")
            }
        }
    }
}

/// An ordered list of actions for one convergence run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
    pub actions: Vec<Action>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the observed state already matches the desired state.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn has_changes(&self) -> bool {
        !self.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.actions.len()
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }

    fn push(&mut self, action: Action) {
        debug!(action = %action.identity(), "planned");
        self.actions.push(action);
    }
}

/// Compute the plan that drives `observed` toward `resolved`.
///
/// Order matters: the guest user is removed before the replacement
/// user is provisioned, permissions follow user and vhost creation,
/// and file renders come last so a restart picks up the final state.
///
/// User and vhost provisioning runs only when the resolved credentials
/// depart from the broker defaults; in the stock `guest` + `/` case it
/// degenerates to no actions and the guest user is never deleted.
pub fn compute_plan(resolved: &ResolvedConfig, observed: &ObservedState) -> Plan {
    let mut plan = Plan::new();

    if resolved.has_custom_credentials() {
        plan_credentials(resolved, observed, &mut plan);
    }

    for (path, content) in [
        (ENV_CONF_PATH, render_env_conf(resolved)),
        (BROKER_CONF_PATH, render_broker_conf(resolved)),
    ] {
        if observed.file_content(path) != Some(content.as_str()) {
            plan.push(Action::RenderFile {
                path: path.to_string(),
                content,
            });
        }
    }

    plan
}

fn plan_credentials(resolved: &ResolvedConfig, observed: &ObservedState, plan: &mut Plan) {
    // The deletion targets the stock guest account. When guest is the
    // managed user and already carries the desired password, it has
    // been provisioned by a previous run and must survive, or the plan
    // would churn forever.
    let guest_is_managed_self = resolved.user == GUEST_USER
        && observed.user_password(GUEST_USER) == Some(resolved.password.as_str());

    // Track the effect of our own earlier actions so the plan stays
    // executable when the managed user is `guest` itself.
    let mut guest_deleted = false;

    if observed.has_user(GUEST_USER) && !guest_is_managed_self {
        plan.push(Action::DeleteUser {
            user: GUEST_USER.to_string(),
        });
        guest_deleted = true;
    }

    let user_exists =
        observed.has_user(&resolved.user) && !(guest_deleted && resolved.user == GUEST_USER);

    if !user_exists {
        plan.push(Action::AddUser {
            user: resolved.user.clone(),
            password: resolved.password.clone(),
        });
    } else if observed.user_password(&resolved.user) != Some(resolved.password.as_str()) {
        plan.push(Action::ChangePassword {
            user: resolved.user.clone(),
            password: resolved.password.clone(),
        });
    }

    if !observed.has_vhost(&resolved.vhost) {
        plan.push(Action::AddVhost {
            vhost: resolved.vhost.clone(),
        });
    }

    let permissions_current = user_exists
        && observed.permissions_for(&resolved.user, &resolved.vhost) == Some(DEFAULT_PERMISSIONS);
    if !permissions_current {
        plan.push(Action::SetPermissions {
            user: resolved.user.clone(),
            vhost: resolved.vhost.clone(),
            permissions: DEFAULT_PERMISSIONS.to_string(),
        });
    }

    let tagged = user_exists && observed.has_tag(&resolved.user, ADMIN_TAG);
    if !tagged {
        plan.push(Action::SetTag {
            user: resolved.user.clone(),
            tag: ADMIN_TAG.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::AttributeStore;
    use crate::resolve::{StaticInterfaces, resolve};

    fn resolved_with(overrides: &[(&str, &str)]) -> ResolvedConfig {
        let mut store = AttributeStore::new();
        for (path, value) in overrides {
            store.set(path, *value).unwrap();
        }
        resolve(&store, &StaticInterfaces::new()).unwrap()
    }

    /// Broker state where the managed files already match `resolved`.
    fn broker_with_files(resolved: &ResolvedConfig) -> ObservedState {
        let mut state = ObservedState::default_broker();
        state
            .files
            .insert(ENV_CONF_PATH.to_string(), render_env_conf(resolved));
        state
            .files
            .insert(BROKER_CONF_PATH.to_string(), render_broker_conf(resolved));
        state
    }

    #[test]
    fn default_credentials_emit_no_user_actions() {
        let resolved = resolved_with(&[]);
        let plan = compute_plan(&resolved, &broker_with_files(&resolved));

        assert!(plan.is_empty());
        assert!(!plan.has_changes());
    }

    #[test]
    fn fresh_broker_with_defaults_only_renders_files() {
        let resolved = resolved_with(&[]);
        let plan = compute_plan(&resolved, &ObservedState::default_broker());

        assert_eq!(plan.change_count(), 2);
        assert!(
            plan.actions()
                .all(|a| matches!(a, Action::RenderFile { .. }))
        );
    }

    #[test]
    fn custom_user_emits_full_provisioning_sequence() {
        let resolved = resolved_with(&[("mq.user", "not-a-guest"), ("mq.vhost", "/foo")]);
        let plan = compute_plan(&resolved, &broker_with_files(&resolved));

        let identities: Vec<String> = plan.actions().map(Action::identity).collect();
        assert_eq!(
            identities,
            vec![
                "delete_user(guest)",
                "add_user(not-a-guest)",
                "add_vhost(/foo)",
                "set_permissions(not-a-guest, /foo)",
                "set_tag(not-a-guest, administrator)",
            ]
        );
    }

    #[test]
    fn guest_deleted_iff_user_or_vhost_customized() {
        let state = ObservedState::default_broker();

        for (user, vhost, expect_delete) in [
            ("guest", "/", false),
            ("foo", "/", true),
            ("guest", "/bar", true),
            ("foo", "/bar", true),
        ] {
            let resolved = resolved_with(&[("mq.user", user), ("mq.vhost", vhost)]);
            let plan = compute_plan(&resolved, &state);
            let deleted = plan
                .actions()
                .any(|a| matches!(a, Action::DeleteUser { user } if user == "guest"));
            assert_eq!(deleted, expect_delete, "user={user} vhost={vhost}");
        }
    }

    #[test]
    fn guest_delete_skipped_when_guest_already_absent() {
        let resolved = resolved_with(&[("mq.user", "foo")]);
        let mut state = broker_with_files(&resolved);
        state.users.remove("guest");
        state.permissions.remove("guest");

        let plan = compute_plan(&resolved, &state);
        assert!(
            !plan
                .actions()
                .any(|a| matches!(a, Action::DeleteUser { .. }))
        );
    }

    #[test]
    fn custom_vhost_with_guest_user_recreates_guest() {
        // Deleting guest and keeping it as the managed user means the
        // plan must add it back afterwards.
        let resolved = resolved_with(&[("mq.vhost", "/foo")]);
        let plan = compute_plan(&resolved, &broker_with_files(&resolved));

        let identities: Vec<String> = plan.actions().map(Action::identity).collect();
        assert_eq!(
            identities,
            vec![
                "delete_user(guest)",
                "add_user(guest)",
                "add_vhost(/foo)",
                "set_permissions(guest, /foo)",
                "set_tag(guest, administrator)",
            ]
        );
    }

    #[test]
    fn password_change_planned_for_existing_user() {
        let resolved = resolved_with(&[("mq.user", "foo"), ("mq.password", "new-pass")]);
        let mut state = broker_with_files(&resolved);
        state.users.remove("guest");
        state.permissions.remove("guest");
        state.users.insert(
            "foo".to_string(),
            crate::state::UserState {
                password: "old-pass".to_string(),
                tags: [ADMIN_TAG.to_string()].into(),
            },
        );
        state
            .permissions
            .entry("foo".to_string())
            .or_default()
            .insert("/".to_string(), DEFAULT_PERMISSIONS.to_string());

        let plan = compute_plan(&resolved, &state);
        let identities: Vec<String> = plan.actions().map(Action::identity).collect();
        assert_eq!(identities, vec!["change_password(foo)"]);
    }

    #[test]
    fn existing_vhost_not_recreated() {
        let resolved = resolved_with(&[("mq.user", "foo")]);
        let plan = compute_plan(&resolved, &broker_with_files(&resolved));

        // vhost is "/" which the broker already has.
        assert!(!plan.actions().any(|a| matches!(a, Action::AddVhost { .. })));
    }

    #[test]
    fn render_planned_only_when_content_differs() {
        let resolved = resolved_with(&[]);
        let mut state = broker_with_files(&resolved);
        state
            .files
            .insert(ENV_CONF_PATH.to_string(), "stale".to_string());

        let plan = compute_plan(&resolved, &state);
        let renders: Vec<&Action> = plan
            .actions()
            .filter(|a| matches!(a, Action::RenderFile { .. }))
            .collect();
        assert_eq!(renders.len(), 1);
        assert!(
            matches!(renders[0], Action::RenderFile { path, .. } if path == ENV_CONF_PATH)
        );
    }
}
