use futures::{Stream, stream};
use materialize::binding::{Binding, validate};
use materialize::concurrency::shutdown::ShutdownTx;
use materialize::destination::{Destination, OpenOptions, apply};
use materialize::error::MaterializeResult;
use materialize::pipeline::MaterializationPipeline;
use materialize::types::{ChangeEvent, ChangeLine, Checkpoint};
use materialize_config::shared::{DriverConfig, EndpointConfig};
use materialize_telemetry::set_global_materialization;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::config::load_driver_config;

pub async fn start_materialization() -> anyhow::Result<()> {
    info!("starting materialization driver");
    let config = load_driver_config()?;

    set_global_materialization(config.materialization.clone());
    log_config(&config);

    let bindings = build_bindings(&config)?;

    let description = apply(&config.endpoint, &bindings).await?;
    if !description.is_empty() {
        info!(%description, "applied destination resources");
    }

    let options = OpenOptions {
        materialization: config.materialization.clone(),
        key_begin: config.key_begin,
        key_end: config.key_end,
        load_batch_size: config.load_batch.max_size,
    };
    let (destination, checkpoint) = Destination::open(&config.endpoint, &bindings, &options).await?;
    report_opened(checkpoint.as_ref())?;

    run_pipeline(destination, bindings).await?;

    info!("materialization driver completed");
    Ok(())
}

/// Validates every configured binding against the endpoint and builds it.
fn build_bindings(config: &DriverConfig) -> MaterializeResult<Vec<Binding>> {
    config
        .bindings
        .iter()
        .enumerate()
        .map(|(index, binding)| {
            let validated = validate(&config.endpoint, binding)?;
            Binding::build(index, binding, validated)
        })
        .collect()
}

/// Writes the checkpoint the session resumes from to stdout, so the upstream feed
/// can replay from it.
fn report_opened(checkpoint: Option<&Checkpoint>) -> anyhow::Result<()> {
    let opened = serde_json::json!({ "opened": { "checkpoint": checkpoint } });
    println!("{}", serde_json::to_string(&opened)?);

    Ok(())
}

fn log_config(config: &DriverConfig) {
    info!(
        materialization = config.materialization,
        key_begin = config.key_begin,
        key_end = config.key_end,
        bindings = config.bindings.len(),
        load_batch_max_size = config.load_batch.max_size,
        "materialization config"
    );
    log_endpoint_config(&config.endpoint);
}

fn log_endpoint_config(config: &EndpointConfig) {
    match config {
        EndpointConfig::Postgres(config) => {
            info!(
                host = config.host,
                port = config.port,
                user = config.user,
                database = config.database.as_deref(),
                "postgres endpoint config"
            );
        }
        EndpointConfig::Elasticsearch(config) => {
            info!(endpoint = config.endpoint, "elasticsearch endpoint config");
        }
        EndpointConfig::Webhook(config) => {
            info!(address = config.address, "webhook endpoint config");
        }
    }
}

#[tracing::instrument(skip_all, fields(destination = destination.kind()))]
async fn run_pipeline(destination: Destination, bindings: Vec<Binding>) -> anyhow::Result<()> {
    let events = stdin_events(bindings.clone());
    let pipeline = MaterializationPipeline::new(destination, bindings);

    let shutdown_handle = tokio::spawn(shutdown_on_signal(pipeline.shutdown_tx()));

    let result = pipeline.run(events).await;

    // The pipeline may end with its input before any signal arrives.
    shutdown_handle.abort();

    let stats = result?;
    info!(
        transactions = stats.transactions,
        documents = stats.documents,
        "change feed drained"
    );

    Ok(())
}

/// Triggers shutdown on SIGINT or SIGTERM.
async fn shutdown_on_signal(shutdown_tx: ShutdownTx) {
    match wait_for_signal().await {
        Ok(signal) => {
            info!(signal, "signal received, shutting down materialization");
            shutdown_tx.shutdown();
        }
        Err(err) => {
            warn!("failed to listen for shutdown signals: {err}");
        }
    }
}

async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            Ok("SIGINT")
        }
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

/// Reads newline-delimited [`ChangeLine`]s from stdin. Blank lines are skipped.
fn stdin_events(bindings: Vec<Binding>) -> impl Stream<Item = MaterializeResult<ChangeEvent>> {
    let lines = BufReader::new(tokio::io::stdin()).lines();

    stream::unfold((lines, bindings), |(mut lines, bindings)| async move {
        loop {
            let event = match lines.next_line().await {
                Ok(None) => return None,
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => parse_line(&line, &bindings),
                Err(err) => Err(err.into()),
            };

            return Some((event, (lines, bindings)));
        }
    })
}

fn parse_line(line: &str, bindings: &[Binding]) -> MaterializeResult<ChangeEvent> {
    serde_json::from_str::<ChangeLine>(line)?.into_event(bindings)
}
