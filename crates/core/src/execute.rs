//! Plan execution and convergence orchestration
//!
//! The executor applies each planned action against the observed-state
//! model in order, mutating it in place and recording which actions
//! were actually applied versus skipped as no-ops. A rejected action
//! aborts the rest of the plan without rolling back what already
//! applied; re-running convergence after the cause is fixed reaches
//! the same end state.

use tracing::{debug, info};

use crate::attrs::AttributeStore;
use crate::error::CoreError;
use crate::notify::{NotificationCoordinator, NotificationRecord, Timing};
use crate::plan::{Action, BROKER_SERVICE, Plan, compute_plan};
use crate::resolve::{InterfaceResolver, ResolvedConfig, resolve};
use crate::state::{ObservedState, UserState};

/// What happened when a plan executed.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// Actions applied, in execution order. Service restarts appear at
    /// the point they fired.
    pub applied: Vec<Action>,

    /// Actions skipped because the target state already held.
    pub skipped: Vec<Action>,

    /// Notifications recorded during the run, deduplicated per service.
    pub notifications: Vec<NotificationRecord>,
}

/// Result of one full convergence run.
#[derive(Debug, Clone)]
pub struct ConvergeReport {
    pub resolved: ResolvedConfig,
    pub plan: Plan,
    pub execution: ExecutionReport,
}

/// Execute a plan against the observed state.
///
/// Each action is checked against current state first, so replaying a
/// plan that already converged records only skips. File renders whose
/// content changed trigger an immediate broker restart through the
/// coordinator, deduplicated per service per run.
pub fn execute_plan(
    plan: &Plan,
    state: &mut ObservedState,
    coordinator: &mut NotificationCoordinator,
) -> Result<ExecutionReport, CoreError> {
    let mut report = ExecutionReport::default();

    for action in plan.actions() {
        apply_action(action, state, coordinator, &mut report)?;
    }

    for record in coordinator.flush_deferred() {
        state.restarts.push(record.service.clone());
        report.applied.push(Action::NotifyService {
            service: record.service.clone(),
            timing: Timing::Deferred,
        });
        report.notifications.push(record);
    }

    info!(
        applied = report.applied.len(),
        skipped = report.skipped.len(),
        restarts = report.notifications.len(),
        "plan executed"
    );

    Ok(report)
}

fn apply_action(
    action: &Action,
    state: &mut ObservedState,
    coordinator: &mut NotificationCoordinator,
    report: &mut ExecutionReport,
) -> Result<(), CoreError> {
    match action {
        Action::DeleteUser { user } => {
            if state.users.remove(user).is_none() {
                return skip(action, report);
            }
            state.permissions.remove(user);
        }

        Action::AddUser { user, password } => {
            if let Some(existing) = state.users.get(user) {
                if existing.password == *password {
                    return skip(action, report);
                }
                return Err(reject(action, format!("user '{user}' already exists")));
            }
            state.users.insert(
                user.clone(),
                UserState {
                    password: password.clone(),
                    tags: Default::default(),
                },
            );
        }

        Action::ChangePassword { user, password } => {
            let Some(existing) = state.users.get_mut(user) else {
                return Err(reject(action, format!("user '{user}' does not exist")));
            };
            if existing.password == *password {
                return skip(action, report);
            }
            existing.password = password.clone();
        }

        Action::AddVhost { vhost } => {
            if !state.vhosts.insert(vhost.clone()) {
                return skip(action, report);
            }
        }

        Action::SetPermissions {
            user,
            vhost,
            permissions,
        } => {
            if !state.users.contains_key(user) {
                return Err(reject(action, format!("user '{user}' does not exist")));
            }
            if !state.vhosts.contains(vhost) {
                return Err(reject(action, format!("vhost '{vhost}' does not exist")));
            }
            if state.permissions_for(user, vhost) == Some(permissions.as_str()) {
                return skip(action, report);
            }
            state
                .permissions
                .entry(user.clone())
                .or_default()
                .insert(vhost.clone(), permissions.clone());
        }

        Action::SetTag { user, tag } => {
            let Some(existing) = state.users.get_mut(user) else {
                return Err(reject(action, format!("user '{user}' does not exist")));
            };
            if !existing.tags.insert(tag.clone()) {
                return skip(action, report);
            }
        }

        Action::RenderFile { path, content } => {
            if state.file_content(path) == Some(content.as_str()) {
                return skip(action, report);
            }
            state.files.insert(path.clone(), content.clone());
            report.applied.push(action.clone());

            // Changed file content restarts the broker right away,
            // before any later plan action executes.
            if let Some(record) = coordinator.request_immediate(&action.identity(), BROKER_SERVICE)
            {
                state.restarts.push(record.service.clone());
                report.applied.push(Action::NotifyService {
                    service: record.service.clone(),
                    timing: Timing::Immediate,
                });
                report.notifications.push(record);
            }
            return Ok(());
        }

        Action::NotifyService { service, timing } => match timing {
            Timing::Immediate => {
                let Some(record) = coordinator.request_immediate(&action.identity(), service)
                else {
                    return skip(action, report);
                };
                state.restarts.push(record.service.clone());
                report.notifications.push(record);
            }
            Timing::Deferred => {
                // Queued now, executed and reported at flush.
                coordinator.request_deferred(&action.identity(), service);
                return Ok(());
            }
        },
    }

    debug!(action = %action.identity(), "applied");
    report.applied.push(action.clone());
    Ok(())
}

fn skip(action: &Action, report: &mut ExecutionReport) -> Result<(), CoreError> {
    debug!(action = %action.identity(), "target state already holds, skipping");
    report.skipped.push(action.clone());
    Ok(())
}

fn reject(action: &Action, message: String) -> CoreError {
    CoreError::ActionFailed {
        action: action.identity(),
        message,
    }
}

/// Run one full convergence: resolve, plan, execute.
///
/// Resolution failures abort before any state mutation. An empty plan
/// returns early without touching the state.
pub fn converge(
    store: &AttributeStore,
    interfaces: &dyn InterfaceResolver,
    state: &mut ObservedState,
) -> Result<ConvergeReport, CoreError> {
    let resolved = resolve(store, interfaces)?;
    let plan = compute_plan(&resolved, state);

    if plan.is_empty() {
        info!("observed state already matches desired state, nothing to do");
        return Ok(ConvergeReport {
            resolved,
            plan,
            execution: ExecutionReport::default(),
        });
    }

    info!(changes = plan.change_count(), "executing convergence plan");
    let mut coordinator = NotificationCoordinator::new();
    let execution = execute_plan(&plan, state, &mut coordinator)?;

    Ok(ConvergeReport {
        resolved,
        plan,
        execution,
    })
}
