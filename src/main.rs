mod cli;

use std::collections::BTreeMap;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cli::{Cli, Commands, ExecArgs};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sshgate_lib::config::{load_document, StorageError};
use sshgate_lib::gateway::{Gateway, GatewayError};
use sshgate_lib::permissions::{PermissionSnapshot, SchemaError};
use sshgate_lib::recorder::TracingRecorder;
use sshgate_lib::request::extract_api_key;
use sshgate_lib::ssh::{RunOptions, ScriptOptions};

/// Time allowed for background recordings before the process exits
const RECORD_FLUSH_LIMIT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] StorageError),

    #[error("Invalid configuration: {0}")]
    Schema(#[from] SchemaError),

    #[error("{0}")]
    Usage(String),

    #[error("Failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

enum Outcome {
    Done,
    /// The gateway refused or the command failed; the error was printed as JSON
    Rejected,
}

fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(Outcome::Done) => ExitCode::SUCCESS,
        Ok(Outcome::Rejected) => ExitCode::from(1),
        Err(e) => {
            error!("{}", e);
            eprintln!("sshgate: {}", e);
            ExitCode::from(2)
        }
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<(), CliError> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", text);
    Ok(())
}

fn encode<T: Serialize>(
    result: Result<T, GatewayError>,
) -> Result<Result<serde_json::Value, GatewayError>, CliError> {
    match result {
        Ok(value) => Ok(Ok(serde_json::to_value(value)?)),
        Err(e) => Ok(Err(e)),
    }
}

fn seconds(value: Option<f64>) -> Result<Option<Duration>, CliError> {
    match value {
        None => Ok(None),
        Some(secs) if secs.is_finite() && secs > 0.0 => Ok(Some(Duration::from_secs_f64(secs))),
        Some(secs) => Err(CliError::Usage(format!("invalid timeout: {}", secs))),
    }
}

fn run_options(args: &ExecArgs) -> Result<RunOptions, CliError> {
    let mut environment = BTreeMap::new();
    for entry in &args.env {
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| CliError::Usage(format!("expected NAME=VALUE, got '{}'", entry)))?;
        environment.insert(name.to_string(), value.to_string());
    }
    Ok(RunOptions {
        working_directory: args.cwd.clone(),
        environment,
        timeout: seconds(args.timeout)?,
        allocate_pty: args.pty,
    })
}

async fn run(cli: Cli) -> Result<Outcome, CliError> {
    let document = load_document(&cli.config)?;
    let snapshot = Arc::new(PermissionSnapshot::load(&document)?);

    if let Commands::Check = cli.command {
        info!("Configuration {} is valid", cli.config.display());
        print_json(
            &serde_json::json!({
                "valid": true,
                "targets": snapshot.registry().len(),
                "groups": snapshot.groups().len(),
                "permissions_enabled": snapshot.permissions_enabled(),
            }),
            cli.pretty,
        )?;
        return Ok(Outcome::Done);
    }

    let api_key = match &cli.authorization {
        Some(header) => extract_api_key(header),
        None => cli.api_key.as_deref().and_then(extract_api_key),
    };
    let api_key = api_key.as_deref();

    let gateway = Gateway::from_settings(snapshot, Arc::new(TracingRecorder), &document.settings);

    let result = match &cli.command {
        Commands::Check => return Ok(Outcome::Done),
        Commands::List => gateway
            .list_accessible(api_key)
            .map(|targets| serde_json::json!({ "targets": targets })),
        Commands::Run(args) => {
            let options = run_options(&args.exec)?;
            let command = args.command.join(" ");
            encode(
                gateway
                    .execute(api_key, &args.target, &command, &options)
                    .await,
            )?
        }
        Commands::Script(args) => {
            let options = ScriptOptions {
                remote_path: args.remote_path.clone(),
                interpreter: args.interpreter.clone(),
                run: run_options(&args.exec)?,
            };
            encode(
                gateway
                    .execute_script(api_key, &args.target, &args.path, &options)
                    .await,
            )?
        }
        Commands::Up { target, timeout } => encode(
            gateway
                .check_reachable(api_key, target, seconds(*timeout)?)
                .await,
        )?,
        Commands::Diag { target } => encode(gateway.diagnostics(api_key, target).await)?,
    };

    gateway.flush_records(RECORD_FLUSH_LIMIT).await;

    match result {
        Ok(value) => {
            print_json(&value, cli.pretty)?;
            Ok(Outcome::Done)
        }
        Err(e) => {
            info!("Operation ended with {}", e.kind());
            print_json(&e, cli.pretty)?;
            Ok(Outcome::Rejected)
        }
    }
}
