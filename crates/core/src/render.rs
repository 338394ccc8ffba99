//! Rendering of managed broker configuration files
//!
//! The file formats are opaque text as far as the engine is concerned;
//! the only contract is determinism, so content comparison decides
//! whether a render action (and the restart it triggers) is needed.

use crate::resolve::ResolvedConfig;

/// Path of the broker environment file.
pub const ENV_CONF_PATH: &str = "/etc/rabbitmq/rabbitmq-env.conf";

/// Path of the broker's Erlang-term configuration file.
pub const BROKER_CONF_PATH: &str = "/etc/rabbitmq/rabbitmq.config";

const HEADER: &str = "Managed by mqstate. Local changes will be overwritten.";

/// Render `rabbitmq-env.conf` content.
pub fn render_env_conf(config: &ResolvedConfig) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {HEADER}\n"));
    out.push_str(&format!(
        "RABBITMQ_NODE_IP_ADDRESS={}\n",
        config.listen_address
    ));
    if let Some(port) = config.port {
        out.push_str(&format!("RABBITMQ_NODE_PORT={port}\n"));
    }
    out
}

/// Render `rabbitmq.config` content.
pub fn render_broker_conf(config: &ResolvedConfig) -> String {
    let mut rabbit = Vec::new();

    if let Some(ssl_port) = config.ssl_port {
        rabbit.push(format!("{{ssl_listeners, [{ssl_port}]}}"));
    } else if let Some(port) = config.port {
        rabbit.push(format!(
            "{{tcp_listeners, [{{\"{}\", {port}}}]}}",
            config.listen_address
        ));
    }

    if config.cluster_enabled {
        let nodes = config
            .cluster_disk_nodes
            .iter()
            .map(|n| format!("'{n}'"))
            .collect::<Vec<_>>()
            .join(", ");
        rabbit.push(format!("{{cluster_nodes, {{[{nodes}], disc}}}}"));
    }

    let mut out = String::new();
    out.push_str(&format!("%% {HEADER}\n"));
    out.push_str("[\n  {rabbit, [\n");
    for (i, entry) in rabbit.iter().enumerate() {
        let sep = if i + 1 == rabbit.len() { "" } else { "," };
        out.push_str(&format!("    {entry}{sep}\n"));
    }
    out.push_str("  ]}\n].\n");
    out
}
