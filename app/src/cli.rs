use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use otterstax_adapters::render::OutputFormat;
use otterstax_core::environments::Protocol;

#[derive(Debug, Parser)]
#[command(name = "otterstax", version, about = "OtterStax CLI client", long_about = None)]
#[command(subcommand_required = true, arg_required_else_help = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    /// Protocol for this invocation only (mysql or postgres)
    #[arg(short, long, global = true)]
    pub protocol: Option<Protocol>,

    /// Do not start a port-forward for cluster environments; assume one is running
    #[arg(long, global = true)]
    pub no_tunnel: bool,

    /// kubeconfig context for cluster port-forwards
    #[arg(long, global = true, env = "OTTERSTAX_KUBE_CONTEXT", value_name = "NAME")]
    pub kube_context: Option<String>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true, env = "OTTERSTAX_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Check that the backend answers on the selected protocol
    Connect {
        /// Switch to this environment first
        #[arg(long, value_name = "NAME")]
        env: Option<String>,
    },
    /// Run one SQL statement
    Query {
        sql: String,
        #[arg(long, default_value_t)]
        format: OutputFormat,
        /// Positional parameter value; repeat for each placeholder
        #[arg(long = "bind", value_name = "VALUE")]
        binds: Vec<String>,
    },
    /// List databases, tables of a database, or columns of a table
    Schema {
        #[arg(short, long)]
        database: Option<String>,
        #[arg(short, long)]
        table: Option<String>,
        #[arg(long, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Register an external data source with the backend
    AddSource(AddSourceArgs),
    /// Manage environments
    Env {
        #[command(subcommand)]
        action: EnvAction,
    },
    /// Show or persist the default protocol
    Protocol {
        #[command(subcommand)]
        action: ProtocolAction,
    },
}

#[derive(Debug, Clone, Args)]
pub struct AddSourceArgs {
    #[arg(long)]
    pub alias: String,
    #[arg(long)]
    pub host: String,
    #[arg(long)]
    pub port: u16,
    #[arg(long)]
    pub user: String,
    #[arg(long)]
    pub password: String,
    #[arg(long)]
    pub database: String,
}

#[derive(Debug, Clone, Subcommand)]
pub enum EnvAction {
    List,
    Set { name: String },
    /// Print a profile (the active one by default)
    Show { name: Option<String> },
}

#[derive(Debug, Clone, Subcommand)]
pub enum ProtocolAction {
    Show,
    Set { name: String },
}
