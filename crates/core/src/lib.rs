//! mqstate-core: declarative convergence engine for a RabbitMQ broker
//!
//! One convergence run flows in a single direction:
//!
//! ```text
//! AttributeStore -> resolve() -> ResolvedConfig -> compute_plan() -> Plan
//!                -> execute_plan() -> ObservedState + notifications
//! ```
//!
//! Every action is idempotent: replaying a converged plan produces an
//! empty follow-up plan.

mod attrs;
mod error;
mod execute;
mod notify;
mod plan;
mod render;
mod resolve;
mod state;

pub use attrs::{AttrValue, AttributeStore};
pub use error::CoreError;
pub use execute::{ConvergeReport, ExecutionReport, converge, execute_plan};
pub use notify::{NotificationCoordinator, NotificationRecord, Timing};
pub use plan::{ADMIN_TAG, Action, BROKER_SERVICE, DEFAULT_PERMISSIONS, Plan, compute_plan};
pub use render::{BROKER_CONF_PATH, ENV_CONF_PATH, render_broker_conf, render_env_conf};
pub use resolve::{
    DEFAULT_PORT, DEFAULT_SSL_PORT, DEFAULT_VHOST, ERLANG_COOKIE, GUEST_USER, InterfaceResolver,
    ResolvedConfig, StaticInterfaces, default_attributes, resolve,
};
pub use state::{ObservedState, UserState};

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
