//! Resolution of raw attributes into a broker configuration
//!
//! This module turns an [`AttributeStore`] into a [`ResolvedConfig`],
//! applying the precedence and defaulting rules for the message-broker
//! deployment. Resolution is pure apart from the interface-address
//! lookup, which goes through the [`InterfaceResolver`] collaborator.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

use serde::Serialize;
use tracing::{debug, warn};

use crate::attrs::{AttrValue, AttributeStore};
use crate::error::CoreError;

/// The broker's stock administrative user.
pub const GUEST_USER: &str = "guest";

/// The broker's stock vhost.
pub const DEFAULT_VHOST: &str = "/";

/// Plain-text TCP port used when SSL is off and no override is given.
pub const DEFAULT_PORT: u16 = 5672;

/// TLS port used when SSL is on and no explicit override is given.
pub const DEFAULT_SSL_PORT: u16 = 5671;

/// Placeholder cluster cookie; a real deployment substitutes a secret.
pub const ERLANG_COOKIE: &str = "erlang-cookie";

/// Attribute paths the resolver recognizes. Anything else under the
/// `mq.` or `endpoints.mq.` namespaces is ignored with a warning.
const RECOGNIZED_PATHS: &[&str] = &[
    "endpoints.mq.port",
    "endpoints.mq.bind_interface",
    "mq.listen",
    "mq.user",
    "mq.password",
    "mq.vhost",
    "mq.rabbitmq.use_ssl",
    "mq.cluster",
    "mq.cluster_disk_nodes",
];

/// Resolves an interface name to its bound address.
///
/// External collaborator: in production this would query the host's
/// network configuration.
pub trait InterfaceResolver {
    fn address_of(&self, interface: &str) -> Option<IpAddr>;
}

/// A fixed interface table, used by the CLI and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces {
    table: BTreeMap<String, IpAddr>,
}

impl StaticInterfaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, interface: impl Into<String>, address: IpAddr) {
        self.table.insert(interface.into(), address);
    }
}

impl InterfaceResolver for StaticInterfaces {
    fn address_of(&self, interface: &str) -> Option<IpAddr> {
        self.table.get(interface).copied()
    }
}

impl FromIterator<(String, IpAddr)> for StaticInterfaces {
    fn from_iter<T: IntoIterator<Item = (String, IpAddr)>>(iter: T) -> Self {
        Self {
            table: iter.into_iter().collect(),
        }
    }
}

/// The fully resolved broker configuration for one convergence run.
///
/// Derived once from the attribute store and never mutated afterwards;
/// this is the single source of truth the planner consumes.
///
/// Invariant: exactly one of `port` / `ssl_port` is set, matching
/// `use_ssl`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConfig {
    pub listen_address: IpAddr,
    pub port: Option<u16>,
    pub ssl_port: Option<u16>,
    pub use_ssl: bool,
    pub user: String,
    pub password: String,
    pub vhost: String,
    pub cluster_enabled: bool,
    /// Cluster peers, each prefixed `guest@`, sorted ascending.
    pub cluster_disk_nodes: Vec<String>,
    /// Present only when clustering is enabled.
    pub erlang_cookie: Option<String>,
}

impl ResolvedConfig {
    /// The effective endpoint port, regardless of SSL mode.
    pub fn endpoint_port(&self) -> u16 {
        // The invariant guarantees exactly one side is set.
        self.port.or(self.ssl_port).unwrap_or(DEFAULT_PORT)
    }

    /// True when the user or vhost departs from the broker defaults.
    /// Downstream deletion of the guest user hinges on this.
    pub fn has_custom_credentials(&self) -> bool {
        self.user != GUEST_USER || self.vhost != DEFAULT_VHOST
    }
}

/// The global defaults layer, lowest precedence.
pub fn default_attributes() -> AttributeStore {
    let mut defaults = AttributeStore::new();
    // Infallible: paths are literals with no scalar prefixes.
    let _ = defaults.set("endpoints.mq.port", DEFAULT_PORT.to_string());
    let _ = defaults.set("mq.user", GUEST_USER);
    let _ = defaults.set("mq.password", "rabbit-pass");
    let _ = defaults.set("mq.vhost", DEFAULT_VHOST);
    let _ = defaults.set("mq.rabbitmq.use_ssl", false);
    let _ = defaults.set("mq.cluster", false);
    defaults
}

/// Resolve the attribute store into a [`ResolvedConfig`].
///
/// Precedence: explicit override > defaults layer. The passed store
/// holds the explicit values; defaults are merged in here without
/// overwriting them.
pub fn resolve(
    store: &AttributeStore,
    interfaces: &dyn InterfaceResolver,
) -> Result<ResolvedConfig, CoreError> {
    warn_unknown_paths(store);

    let mut attrs = store.clone();
    attrs.merge(&default_attributes());

    let listen_address = resolve_listen_address(&attrs, interfaces)?;
    let use_ssl = attrs.is_truthy("mq.rabbitmq.use_ssl");

    // An explicit port override always wins; the SSL default applies
    // only when the operator set nothing.
    let endpoint_port = match store.get("endpoints.mq.port") {
        Some(value) => value.as_port().ok_or_else(|| {
            CoreError::invalid(format!(
                "endpoints.mq.port is not a valid port: {value:?}"
            ))
        })?,
        None => {
            if use_ssl {
                DEFAULT_SSL_PORT
            } else {
                DEFAULT_PORT
            }
        }
    };

    let (port, ssl_port) = if use_ssl {
        (None, Some(endpoint_port))
    } else {
        (Some(endpoint_port), None)
    };

    let user = required_str(&attrs, "mq.user")?.to_string();
    let password = required_str(&attrs, "mq.password")?.to_string();
    let vhost = required_str(&attrs, "mq.vhost")?.to_string();

    let cluster_enabled = attrs.is_truthy("mq.cluster");
    let cluster_disk_nodes = if cluster_enabled {
        resolve_cluster_nodes(&attrs)?
    } else {
        Vec::new()
    };
    let erlang_cookie = cluster_enabled.then(|| ERLANG_COOKIE.to_string());

    let resolved = ResolvedConfig {
        listen_address,
        port,
        ssl_port,
        use_ssl,
        user,
        password,
        vhost,
        cluster_enabled,
        cluster_disk_nodes,
        erlang_cookie,
    };

    debug!(
        listen = %resolved.listen_address,
        port = ?resolved.port,
        ssl_port = ?resolved.ssl_port,
        user = %resolved.user,
        vhost = %resolved.vhost,
        cluster = resolved.cluster_enabled,
        "resolved broker configuration"
    );

    Ok(resolved)
}

fn resolve_listen_address(
    attrs: &AttributeStore,
    interfaces: &dyn InterfaceResolver,
) -> Result<IpAddr, CoreError> {
    if let Some(listen) = attrs.get("mq.listen") {
        let text = listen
            .as_str()
            .ok_or_else(|| CoreError::invalid(format!("mq.listen is not a string: {listen:?}")))?;
        return text
            .parse()
            .map_err(|_| CoreError::invalid(format!("mq.listen is not an IP address: '{text}'")));
    }

    if let Some(interface) = attrs.get_str("endpoints.mq.bind_interface") {
        return interfaces.address_of(interface).ok_or_else(|| {
            CoreError::invalid(format!("no address for bind interface '{interface}'"))
        });
    }

    Ok(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn resolve_cluster_nodes(attrs: &AttributeStore) -> Result<Vec<String>, CoreError> {
    let nodes = match attrs.get("mq.cluster_disk_nodes") {
        Some(AttrValue::List(items)) => {
            let mut nodes = Vec::with_capacity(items.len());
            for item in items {
                let host = item.as_str().ok_or_else(|| {
                    CoreError::invalid(format!("cluster disk node is not a string: {item:?}"))
                })?;
                nodes.push(format!("{GUEST_USER}@{host}"));
            }
            nodes
        }
        Some(other) => {
            return Err(CoreError::invalid(format!(
                "mq.cluster_disk_nodes is not a list: {other:?}"
            )));
        }
        None => Vec::new(),
    };

    if nodes.is_empty() {
        return Err(CoreError::invalid(
            "clustering is enabled but no disk nodes are configured",
        ));
    }

    // Deterministic membership regardless of input order.
    let mut nodes = nodes;
    nodes.sort();
    Ok(nodes)
}

fn required_str<'a>(attrs: &'a AttributeStore, path: &str) -> Result<&'a str, CoreError> {
    attrs
        .get(path)
        .and_then(AttrValue::as_str)
        .ok_or_else(|| CoreError::invalid(format!("{path} is missing or not a string")))
}

fn warn_unknown_paths(store: &AttributeStore) {
    for path in store.leaf_paths() {
        let managed = path.starts_with("mq.") || path.starts_with("endpoints.mq.");
        if managed && !RECOGNIZED_PATHS.contains(&path.as_str()) {
            warn!(path = %path, "ignoring unrecognized attribute");
        }
    }
}
