use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use pepper_engine::{Controller, FileSink, Format, Sink, StdoutSink};
use pepperd::config::{Config, SinkFormatArg};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("pepperd=info".parse().unwrap()))
        .init();

    let config = Config::parse();
    if let Err(err) = config.validate() {
        error!("invalid configuration: {err}");
        return ExitCode::FAILURE;
    }

    info!("pepperd v{} starting", env!("CARGO_PKG_VERSION"));

    let format = match config.sink_format {
        SinkFormatArg::Json => Format::Json,
        SinkFormatArg::Cbor => Format::Cbor,
    };
    let sink: Arc<dyn Sink> = match &config.sink_path {
        Some(path) => Arc::new(FileSink::new(path.clone(), format)),
        None => Arc::new(StdoutSink::new(format)),
    };

    let controller = Controller::new(config.epoch_params(), sink);
    controller.set_obfuscation(!config.no_obfuscation, 0);
    controller.twr_set_tx_offset(config.tx_offset_ticks);
    controller.twr_set_rx_offset(config.rx_offset_ticks);

    if let Err(err) = controller.start(config.align).await {
        error!("failed to start controller: {err}");
        return ExitCode::FAILURE;
    }

    let shutdown_controller = controller.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        shutdown_controller.stop().await;
    });

    // Block until the controller's epoch loop exits, either because
    // `iterations` was exhausted or `stop` was called from the signal task.
    while controller.status() != pepper_engine::RunStatus::Stopped {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }

    info!("pepperd exiting");
    ExitCode::SUCCESS
}
