use materialize_telemetry::init_tracing;

use crate::core::start_materialization;

mod config;
mod core;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_name = env!("CARGO_BIN_NAME");

    let _log_flusher = init_tracing(app_name)?;

    start_materialization().await?;

    Ok(())
}
