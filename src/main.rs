//! Binary entry point for the `driftless` CLI.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::process;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use driftless::api::OutageFilter;
use driftless::client::AtlasClient;
use driftless::config::AtlasConfig;
use driftless::error::ReconcileError;
use driftless::resources::Timeouts;
use driftless::resources::outage_simulation::{
    DEFAULT_TIMEOUTS, DesiredOutageSimulation, OutageSimulationReconciler, OutageSimulationState,
};
use driftless::state_id::{CompositeKey, StateIdError, decode_state_id, encode_state_id};

mod cli;

use cli::{ClusterTarget, Cli, OutageCommand, OutageStartCommand, StateIdCommand};

/// Environment variable holding the tracing filter directive.
const LOG_ENV: &str = "DRIFTLESS_LOG";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("client error: {0}")]
    Client(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    StateId(#[from] StateIdError),
    #[error(transparent)]
    Reconcile(#[from] Box<ReconcileError>),
}

impl From<ReconcileError> for CliError {
    fn from(value: ReconcileError) -> Self {
        Self::Reconcile(Box::new(value))
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(output) => {
            write_output(io::stdout(), &output);
            0
        }
        Err(err) => {
            write_output(io::stderr(), &err.to_string());
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

async fn dispatch(cli: Cli) -> Result<String, CliError> {
    match cli {
        Cli::StateId(command) => run_state_id(command),
        Cli::Outage(command) => run_outage(command).await,
    }
}

fn run_state_id(command: StateIdCommand) -> Result<String, CliError> {
    match command {
        StateIdCommand::Encode { fields } => {
            let pairs = fields
                .iter()
                .map(|field| parse_pair(field))
                .collect::<Result<BTreeMap<_, _>, _>>()?;
            Ok(encode_state_id(pairs))
        }
        StateIdCommand::Decode { id } => Ok(render_fields(&decode_state_id(&id)?)),
        StateIdCommand::Import { raw, fields } => {
            let names: Vec<&str> = fields.iter().map(String::as_str).collect();
            Ok(CompositeKey::from_import_id(&raw, &names)?.encode())
        }
    }
}

fn parse_pair(field: &str) -> Result<(&str, &str), CliError> {
    match field.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => Err(CliError::InvalidArgument(format!(
            "expected KEY=VALUE, got '{field}'"
        ))),
    }
}

fn parse_region(region: &str) -> Result<OutageFilter, CliError> {
    match region.split_once(':') {
        Some((provider, name)) if !provider.is_empty() && !name.is_empty() => {
            Ok(OutageFilter::region(provider, name))
        }
        _ => Err(CliError::InvalidArgument(format!(
            "expected PROVIDER:REGION, got '{region}'"
        ))),
    }
}

fn render_fields(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_simulation(state: &OutageSimulationState) -> String {
    format!(
        "id={}\nstate={}",
        state.id,
        state.state.as_deref().unwrap_or("UNKNOWN")
    )
}

fn cluster_id(target: &ClusterTarget) -> String {
    CompositeKey::new()
        .with("project_id", &target.project_id)
        .with("cluster_name", &target.cluster_name)
        .encode()
}

fn build_outage_reconciler() -> Result<OutageSimulationReconciler<AtlasClient>, CliError> {
    let config =
        AtlasConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let client = AtlasClient::from_config(&config).map_err(|err| CliError::Client(err.to_string()))?;
    Ok(OutageSimulationReconciler::new(client).with_cleanup_policy(config.cleanup_policy()))
}

fn start_timeouts(timeout_minutes: Option<u64>) -> Timeouts {
    match timeout_minutes {
        Some(minutes) => Timeouts {
            create: Duration::from_secs(minutes.saturating_mul(60)),
            ..DEFAULT_TIMEOUTS
        },
        None => DEFAULT_TIMEOUTS,
    }
}

/// Cancels the returned token on Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling");
            trigger.cancel();
        }
    });
    token
}

async fn run_outage(command: OutageCommand) -> Result<String, CliError> {
    let cancel = cancel_on_interrupt();
    match command {
        OutageCommand::Start(OutageStartCommand {
            target,
            regions,
            timeout_minutes,
        }) => {
            let desired = regions.iter().try_fold(
                DesiredOutageSimulation::new(&target.project_id, &target.cluster_name),
                |desired, region| Ok::<_, CliError>(desired.with_filter(parse_region(region)?)),
            )?;
            let reconciler =
                build_outage_reconciler()?.with_timeouts(start_timeouts(timeout_minutes));
            let state = reconciler.create(&desired, &cancel).await?;
            Ok(render_simulation(&state))
        }
        OutageCommand::End(target) => {
            build_outage_reconciler()?
                .delete(&cluster_id(&target), &cancel)
                .await?;
            Ok(format!("outage simulation on {} ended", target.cluster_name))
        }
        OutageCommand::Status(target) => {
            let state = build_outage_reconciler()?
                .read(&cluster_id(&target), &cancel)
                .await?;
            Ok(state.map_or_else(
                || format!("no outage simulation on {}", target.cluster_name),
                |state| render_simulation(&state),
            ))
        }
    }
}

fn write_output(mut target: impl Write, output: &str) {
    writeln!(target, "{output}").ok();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
