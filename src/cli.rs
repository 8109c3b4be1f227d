use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "ktop",
    version,
    about = "A top-like live dashboard for Kubernetes clusters."
)]
pub struct CliArgs {
    /// Watch a specific namespace
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Watch all namespaces
    #[arg(short = 'A', long)]
    pub all_namespaces: bool,

    /// kubeconfig context to use instead of the current one
    #[arg(long)]
    pub context: Option<String>,

    /// Pods refresh interval in seconds
    #[arg(long, value_name = "SECS")]
    pub pods_refresh: Option<u64>,

    /// Nodes refresh interval in seconds
    #[arg(long, value_name = "SECS")]
    pub nodes_refresh: Option<u64>,

    /// Cluster summary refresh interval in seconds
    #[arg(long, value_name = "SECS")]
    pub summary_refresh: Option<u64>,

    /// Deadline for one refresh cycle in seconds
    #[arg(long, value_name = "SECS")]
    pub cycle_timeout: Option<u64>,

    /// How long to wait for namespaces, nodes and pods to sync in seconds
    #[arg(long, value_name = "SECS")]
    pub sync_timeout: Option<u64>,

    /// tracing filter (for example: info,debug,trace)
    #[arg(long, default_value = "info")]
    pub log_filter: String,

    /// Write logs to this file instead of discarding them
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}
