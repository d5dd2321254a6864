use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// sshgate - run commands on configured machines, authorized by API key
#[derive(Parser, Debug)]
#[command(name = "sshgate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration document (JSON)
    #[arg(long, short = 'c', env = "SSHGATE_CONFIG", global = true, default_value = "sshgate.json")]
    pub config: PathBuf,

    /// Caller API key
    #[arg(long, env = "SSHGATE_API_KEY", global = true, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Authorization header value ("Bearer <key>" or a raw key); wins over --api-key
    #[arg(long, global = true)]
    pub authorization: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the configuration document and exit
    Check,

    /// List targets the caller may use
    List,

    /// Run a shell command on a target
    #[command(trailing_var_arg = true)]
    #[command(after_help = "EXAMPLES:
    # Simple command
    sshgate run web-01 -- uptime

    # Environment and working directory
    sshgate run web-01 --env RELEASE=v42 --cwd /srv/app -- ./deploy.sh
")]
    Run(RunArgs),

    /// Upload a local script and run it on a target
    Script(ScriptArgs),

    /// Check whether a target's SSH port accepts TCP connections
    Up {
        target: String,

        /// Probe timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,
    },

    /// Collect OS, platform and network facts from a target
    Diag { target: String },
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Export NAME=VALUE before running (repeatable)
    #[arg(long = "env", short = 'e', value_name = "NAME=VALUE")]
    pub env: Vec<String>,

    /// Working directory on the target
    #[arg(long)]
    pub cwd: Option<String>,

    /// Command timeout in seconds
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Allocate a pseudo terminal
    #[arg(long)]
    pub pty: bool,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    pub target: String,

    #[command(flatten)]
    pub exec: ExecArgs,

    /// Command text (joined with spaces)
    #[arg(required = true)]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ScriptArgs {
    pub target: String,

    /// Local script path
    pub path: PathBuf,

    /// Remote destination (default /tmp/<basename>)
    #[arg(long)]
    pub remote_path: Option<String>,

    /// Interpreter, may include arguments (default /bin/bash)
    #[arg(long)]
    pub interpreter: Option<String>,

    #[command(flatten)]
    pub exec: ExecArgs,
}
