use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "rmt-avail")]
#[command(about = "Fetch practitioner availability from clinic booking pages")]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "rmt-avail.toml")]
    pub config: String,

    /// Only process the clinic with this id
    #[arg(long)]
    pub clinic: Option<String>,

    /// First day of the query window (YYYY-MM-DD), defaults to today
    #[arg(long)]
    pub date: Option<String>,

    /// Number of days to query, overrides [engine].num_days
    #[arg(long)]
    pub days: Option<u32>,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON")]
    pub json_logs: bool,
}
