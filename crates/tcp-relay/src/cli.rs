use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tcp-relay", version, about = "Interactive TCP port-forwarding relay")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "tcp-relay.yaml")]
    pub config: PathBuf,

    /// Per-direction buffer size in bytes for new rules (overrides config file setting)
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Seconds without traffic before a session is closed (overrides config file setting)
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,

    /// Address rule listeners bind to (overrides config file setting)
    #[arg(long)]
    pub bind_host: Option<String>,

    /// Path of the JSON-lines session journal (overrides config file setting)
    #[arg(long)]
    pub journal: Option<PathBuf>,

    /// Log level filter used when RUST_LOG is unset (overrides config file setting)
    #[arg(long)]
    pub log_level: Option<String>,
}
