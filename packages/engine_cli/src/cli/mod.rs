mod output;
mod session;

use clap::Parser;

pub use output::{logs_command, stat_path_command, stats_command};
pub use session::{attach_command, exec_command};

#[derive(Parser)]
pub struct AttachArgs {
    /// Container name or ID
    pub container: String,

    /// The container was created with a TTY (raw output, no stderr)
    #[arg(short, long)]
    pub tty: bool,

    /// Key sequence that detaches from the container, e.g. ctrl-p,ctrl-q
    #[arg(long)]
    pub detach_keys: Option<String>,
}

#[derive(Parser)]
pub struct ExecArgs {
    /// Container name or ID
    pub container: String,

    /// Allocate a TTY for the command
    #[arg(short, long)]
    pub tty: bool,

    /// Environment variables, KEY=VALUE
    #[arg(short, long = "env")]
    pub env: Vec<String>,

    /// Working directory inside the container
    #[arg(short, long)]
    pub workdir: Option<String>,

    /// User to run as
    #[arg(short, long)]
    pub user: Option<String>,

    /// Command and arguments
    #[arg(required = true, last = true)]
    pub command: Vec<String>,
}

#[derive(Parser)]
pub struct LogsArgs {
    /// Container name or ID
    pub container: String,

    /// Keep streaming new output
    #[arg(short, long)]
    pub follow: bool,

    /// Number of lines from the end (default: all)
    #[arg(long)]
    pub tail: Option<String>,

    /// Prefix each line with the daemon's timestamp
    #[arg(short = 'T', long)]
    pub timestamps: bool,

    /// The container was created with a TTY
    #[arg(short, long)]
    pub tty: bool,
}

#[derive(Parser)]
pub struct StatsArgs {
    /// Container name or ID
    pub container: String,

    /// Print a single sample and exit
    #[arg(long)]
    pub no_stream: bool,

    /// Print raw JSON samples
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct StatPathArgs {
    /// Container name or ID
    pub container: String,

    /// Absolute path inside the container
    pub path: String,
}
