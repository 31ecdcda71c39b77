use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use channel_sensor::{
    args::{convert_filter, Args},
    config::{Config, SourceConfig},
    metadata::SensorDocuments,
    sensor,
    session::HttpNegotiator,
    source::{IqSource, NoiseSource},
};
use clap::Parser;
use tracing::info;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(convert_filter(args.verbose.log_level_filter()))
        .init();

    let config = Config::try_from(&args)?;
    let source_config = SourceConfig::try_from(&args)?;
    let documents = SensorDocuments::load(&args.location, &args.system)
        .context("Loading sensor location/system documents")?;
    let negotiator = HttpNegotiator::new(config.control_port, config.control_timeout);

    // Operator interrupt is caught once and turned into an orderly close
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;

    let summary = match source_config {
        SourceConfig::Noise { serial } => {
            let mut source = NoiseSource::new(config.fft_size, config.sample_rate, rand::random())
                .paced(true);
            if let Some(serial) = serial {
                source = source.with_serial(serial);
            }
            sensor::run(&config, source, &negotiator, &documents, shutdown)?
        }
        SourceConfig::Iq { path, serial } => {
            let mut source = IqSource::open(&path, config.fft_size, config.sample_rate)?;
            if let Some(serial) = serial {
                source = source.with_serial(serial);
            }
            sensor::run(&config, source, &negotiator, &documents, shutdown)?
        }
    };
    info!(
        "Sent {} measurements ({} dropped)",
        summary.frames_sent, summary.frames_dropped
    );
    Ok(())
}
