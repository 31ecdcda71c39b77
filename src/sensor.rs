//! Drives one sensor: bring the session up, then run spectra through the pipeline until told to stop

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use chrono::Utc;
use tracing::{info, warn};

use crate::{
    capture::spawn_capture,
    channels::{map_channels, ChannelPlan},
    config::Config,
    error::Result,
    exfil::SendOutcome,
    metadata::{epoch_seconds, DataHeader, MeasurementParams, SensorDocuments},
    monitoring::{Counters, RunSummary},
    pipeline::Pipeline,
    power::{PowerConverter, Quantizer},
    session::{PortNegotiator, StreamSession},
    source::SpectrumSource,
    stats::MeasurementTiming,
    SpectrumFrame,
};

/// Pause when the ring is empty
const IDLE_BACKOFF: Duration = Duration::from_micros(100);
/// Frame periods the capture thread gets to notice shutdown before it's left behind
const CAPTURE_GRACE_FRAMES: u32 = 10;
const MIN_CAPTURE_GRACE: Duration = Duration::from_millis(50);

/// Everything derived from the configuration and the source before streaming starts
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementSetup {
    pub plan: ChannelPlan,
    pub timing: MeasurementTiming,
    pub converter: PowerConverter,
}

impl MeasurementSetup {
    pub fn new(config: &Config, sample_rate: f64, window_power: f64) -> Self {
        let plan = map_channels(&config.band_request(sample_rate));
        let timing = MeasurementTiming::new(config.meas_interval, sample_rate, config.fft_size);
        info!("Actual measurement duration = {} s", timing.duration);
        Self {
            plan,
            timing,
            converter: PowerConverter::new(config.fft_size, window_power),
        }
    }

    pub fn params(&self, config: &Config) -> MeasurementParams {
        MeasurementParams {
            f_start: self.plan.start_freq,
            f_stop: self.plan.stop_freq,
            n: config.num_channels,
            td: -1,
            tm: self.timing.duration,
            det: config.detector.to_string(),
            atten: config.attenuation,
        }
    }

    pub fn pipeline(&self, config: &Config) -> Pipeline {
        Pipeline::new(
            self.plan.map.clone(),
            self.timing.frames,
            config.detector,
            self.converter,
            Quantizer::default(),
        )
    }
}

/// Run a sensor session to completion.
///
/// Returns once the source runs dry or `shutdown` is raised, after closing the session.
/// Any failure while setting up the session, or losing the collector, is returned as an error.
pub fn run<S, N>(
    config: &Config,
    mut source: S,
    negotiator: &N,
    documents: &SensorDocuments,
    shutdown: Arc<AtomicBool>,
) -> Result<RunSummary>
where
    S: SpectrumSource + 'static,
    N: PortNegotiator + ?Sized,
{
    assert_eq!(source.fft_size(), config.fft_size);
    let mut session = StreamSession::new(config.dest_host.clone());
    session.tune(&mut source, config.center_freq)?;
    session.negotiate(negotiator)?;
    session.connect()?;

    let sensor_id = source.serial_id();
    info!("Serial no. {}", sensor_id);
    let [location, system] = documents.stamp(epoch_seconds(&Utc::now()), &sensor_id);
    session.send_metadata(&location, &system)?;

    let setup = MeasurementSetup::new(config, source.sample_rate(), source.window_power());
    let header = DataHeader::new(&sensor_id, epoch_seconds(&Utc::now()), setup.params(config));
    session.send_header(&header)?;
    session.start_streaming(config.send_buffer, config.send_timeout)?;
    info!(
        "fc = {} MHz. Sending data to {}",
        config.center_freq / 1e6,
        config.dest_host
    );

    let frame_period = Duration::from_secs_f64(config.fft_size as f64 / source.sample_rate());
    let counters = Arc::new(Counters::default());
    let mut pipeline = setup.pipeline(config);
    let (mut consumer, capture) =
        spawn_capture(source, config.ring_capacity, shutdown.clone(), counters.clone())?;

    let streamed = stream(&mut session, &mut pipeline, &mut consumer, &shutdown, &counters);

    // Either way the capture thread has to wind down
    shutdown.store(true, Ordering::Relaxed);
    let closed = session.close();
    join_capture(
        &consumer,
        capture,
        (frame_period * CAPTURE_GRACE_FRAMES).max(MIN_CAPTURE_GRACE),
    );

    let summary = counters.summary();
    info!(?summary, "Session finished");
    streamed?;
    closed?;
    Ok(summary)
}

/// Wait up to `grace` for the capture thread to drop its end of the ring, then join it.
/// Returns false if it had to be left running.
fn join_capture(
    consumer: &rtrb::Consumer<SpectrumFrame>,
    capture: JoinHandle<Result<()>>,
    grace: Duration,
) -> bool {
    let deadline = Instant::now() + grace;
    while !consumer.is_abandoned() {
        if Instant::now() >= deadline {
            // A source blocked on a read (stdin) can't see the flag, so it's left to die with the process
            warn!("Capture thread still busy after {:?}, not waiting for it", grace);
            return false;
        }
        thread::sleep(IDLE_BACKOFF);
    }
    match capture.join() {
        Ok(Err(e)) => warn!("Capture ended with error: {}", e),
        Err(_) => warn!("Capture thread panicked"),
        Ok(Ok(())) => {}
    }
    true
}

fn stream(
    session: &mut StreamSession,
    pipeline: &mut Pipeline,
    consumer: &mut rtrb::Consumer<SpectrumFrame>,
    shutdown: &AtomicBool,
    counters: &Counters,
) -> Result<()> {
    loop {
        // Cancellation is only observed between frames
        if shutdown.load(Ordering::Relaxed) {
            info!("Interrupted, closing session");
            return Ok(());
        }
        let frame = match consumer.pop() {
            Ok(f) => f,
            Err(_) if consumer.is_abandoned() && consumer.is_empty() => {
                info!("Spectrum source finished");
                return Ok(());
            }
            Err(_) => {
                thread::sleep(IDLE_BACKOFF);
                continue;
            }
        };
        counters.processed();
        if let Some(measurement) = pipeline.process(&frame) {
            counters.measured();
            match session.send_frame(&measurement)? {
                SendOutcome::Queued => counters.sent(),
                SendOutcome::Dropped => {
                    let dropped = counters.dropped();
                    warn!("Collector is behind, dropped measurement ({} so far)", dropped);
                }
            }
        }
    }
}
