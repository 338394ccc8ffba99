use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use console::{Term, style};
use mqstate_core::{
    Action, AttributeStore, ObservedState, Plan, StaticInterfaces, compute_plan, converge, resolve,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// mqstate - Declarative message-broker convergence
#[derive(Parser)]
#[command(name = "mqstate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve attributes into the effective broker configuration
    Resolve {
        /// Path to the attributes file (JSON)
        attrs: PathBuf,

        /// Interface address in NAME=ADDR form (repeatable)
        #[arg(long = "iface", value_name = "NAME=ADDR")]
        ifaces: Vec<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show what changes a convergence run would make (dry-run)
    Plan {
        /// Path to the attributes file (JSON)
        attrs: PathBuf,

        /// Path to the observed-state file (default: fresh broker)
        #[arg(short, long)]
        state: Option<PathBuf>,

        /// Interface address in NAME=ADDR form (repeatable)
        #[arg(long = "iface", value_name = "NAME=ADDR")]
        ifaces: Vec<String>,
    },

    /// Run a convergence and persist the resulting state
    Apply {
        /// Path to the attributes file (JSON)
        attrs: PathBuf,

        /// Path to the observed-state file; created or updated in place
        #[arg(short, long)]
        state: Option<PathBuf>,

        /// Interface address in NAME=ADDR form (repeatable)
        #[arg(long = "iface", value_name = "NAME=ADDR")]
        ifaces: Vec<String>,
    },

    /// Summarize an observed-state file
    Status {
        /// Path to the observed-state file (default: fresh broker)
        #[arg(short, long)]
        state: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .without_time()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Resolve { attrs, ifaces, json } => cmd_resolve(&attrs, &ifaces, json),
        Commands::Plan {
            attrs,
            state,
            ifaces,
        } => cmd_plan(&attrs, state.as_deref(), &ifaces),
        Commands::Apply {
            attrs,
            state,
            ifaces,
        } => cmd_apply(&attrs, state.as_deref(), &ifaces),
        Commands::Status { state } => cmd_status(state.as_deref()),
    }
}

fn cmd_resolve(attrs_path: &Path, ifaces: &[String], json: bool) -> Result<()> {
    let term = Term::stderr();
    let store = load_attrs(&term, attrs_path)?;
    let interfaces = parse_interfaces(ifaces)?;

    let resolved = match resolve(&store, &interfaces) {
        Ok(r) => r,
        Err(e) => fail(&term, &format!("Failed to resolve: {e}"))?,
    };
    debug!(listen = %resolved.listen_address, user = %resolved.user, "resolved configuration");

    if json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
        return Ok(());
    }

    println!("listen address: {}", resolved.listen_address);
    match (resolved.port, resolved.ssl_port) {
        (Some(port), _) => println!("port:           {port}"),
        (_, Some(port)) => println!("ssl port:       {port}"),
        _ => {}
    }
    println!("use ssl:        {}", resolved.use_ssl);
    println!("user:           {}", resolved.user);
    println!("vhost:          {}", resolved.vhost);
    println!("cluster:        {}", resolved.cluster_enabled);
    if resolved.cluster_enabled {
        println!("disk nodes:     {}", resolved.cluster_disk_nodes.join(", "));
    }

    Ok(())
}

fn cmd_plan(attrs_path: &Path, state_path: Option<&Path>, ifaces: &[String]) -> Result<()> {
    let term = Term::stderr();
    let store = load_attrs(&term, attrs_path)?;
    let state = load_state(&term, state_path)?;
    let interfaces = parse_interfaces(ifaces)?;

    let resolved = match resolve(&store, &interfaces) {
        Ok(r) => r,
        Err(e) => fail(&term, &format!("Failed to resolve: {e}"))?,
    };
    let plan = compute_plan(&resolved, &state);
    info!(changes = plan.change_count(), "plan computed");

    if !plan.has_changes() {
        term.write_line(&format!(
            "{} No changes would be made",
            style("::").cyan().bold()
        ))?;
        return Ok(());
    }

    print_plan(&term, &plan)?;
    term.write_line("")?;
    term.write_line(&format!(
        "{} Would apply {} change(s)",
        style("::").cyan().bold(),
        plan.change_count()
    ))?;

    Ok(())
}

fn cmd_apply(attrs_path: &Path, state_path: Option<&Path>, ifaces: &[String]) -> Result<()> {
    let term = Term::stderr();
    let store = load_attrs(&term, attrs_path)?;
    let mut state = load_state(&term, state_path)?;
    let interfaces = parse_interfaces(ifaces)?;

    let report = match converge(&store, &interfaces, &mut state) {
        Ok(r) => r,
        Err(e) => fail(&term, &format!("Convergence failed: {e}"))?,
    };
    info!(
        applied = report.execution.applied.len(),
        skipped = report.execution.skipped.len(),
        "convergence finished"
    );

    if report.plan.is_empty() {
        term.write_line(&format!(
            "{} No changes to apply",
            style("::").cyan().bold()
        ))?;
    } else {
        print_plan(&term, &report.plan)?;
        term.write_line("")?;
        term.write_line(&format!(
            "{} Applied {} action(s), {} already up to date",
            style("::").cyan().bold(),
            report.execution.applied.len(),
            report.execution.skipped.len()
        ))?;
        for record in &report.execution.notifications {
            term.write_line(&format!(
                "{} Restarted {} ({})",
                style("::").yellow().bold(),
                record.service,
                record.source
            ))?;
        }
    }

    if let Some(path) = state_path {
        std::fs::write(path, state.to_json_string()?)
            .with_context(|| format!("writing state file {}", path.display()))?;
        term.write_line(&format!(
            "{} State written to {}",
            style("::").green().bold(),
            path.display()
        ))?;
    }

    term.write_line(&format!("{} Done!", style("::").green().bold()))?;
    Ok(())
}

fn cmd_status(state_path: Option<&Path>) -> Result<()> {
    let term = Term::stderr();
    let state = load_state(&term, state_path)?;

    term.write_line(&format!(
        "{} mqstate v{}",
        style("::").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    ))?;
    term.write_line("")?;
    term.write_line(&format!("  Users:    {}", state.users.len()))?;
    term.write_line(&format!("  Vhosts:   {}", state.vhosts.len()))?;
    term.write_line(&format!("  Files:    {}", state.files.len()))?;
    term.write_line(&format!("  Restarts: {}", state.restarts.len()))?;

    Ok(())
}

fn load_attrs(term: &Term, path: &Path) -> Result<AttributeStore> {
    if !path.exists() {
        return fail(term, &format!("Attributes file not found: {}", path.display()));
    }
    match AttributeStore::from_json_file(path) {
        Ok(store) => Ok(store),
        Err(e) => fail(term, &format!("Failed to parse attributes: {e}")),
    }
}

fn load_state(term: &Term, path: Option<&Path>) -> Result<ObservedState> {
    let Some(path) = path else {
        return Ok(ObservedState::default_broker());
    };
    if !path.exists() {
        // First apply against this state file starts from a fresh broker.
        return Ok(ObservedState::default_broker());
    }
    match ObservedState::from_json_file(path) {
        Ok(state) => Ok(state),
        Err(e) => fail(term, &format!("Failed to parse state file: {e}")),
    }
}

fn parse_interfaces(ifaces: &[String]) -> Result<StaticInterfaces> {
    let mut table = StaticInterfaces::new();
    for entry in ifaces {
        let Some((name, addr)) = entry.split_once('=') else {
            bail!("invalid --iface '{entry}', expected NAME=ADDR");
        };
        let addr: IpAddr = addr
            .parse()
            .with_context(|| format!("invalid address in --iface '{entry}'"))?;
        table.insert(name, addr);
    }
    Ok(table)
}

fn print_plan(term: &Term, plan: &Plan) -> Result<()> {
    for action in plan.actions() {
        let symbol = match action {
            Action::DeleteUser { .. } => style("-").red().bold(),
            Action::ChangePassword { .. } => style("~").yellow().bold(),
            Action::NotifyService { .. } => style("!").cyan().bold(),
            _ => style("+").green().bold(),
        };
        term.write_line(&format!("  {} {}", symbol, action.description()))?;
    }
    Ok(())
}

fn fail<T>(term: &Term, message: &str) -> Result<T> {
    term.write_line(&format!("{} {}", style("error:").red().bold(), message))?;
    std::process::exit(1);
}
