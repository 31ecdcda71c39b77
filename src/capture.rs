//! This module contains all the capture logic

// The capture thread will do one thing, as fast as the source allows:
// pull spectra out of the source, and that's it. We pass those frames through
// an rtrb ring buffer to be processed on the pipeline thread

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, error, warn};

use crate::{error::Result, monitoring::Counters, source::SpectrumSource, SpectrumFrame};

/// How long to back off when the ring buffer is full
const STALL_BACKOFF: Duration = Duration::from_micros(200);

/// Run the source on its own thread. The returned consumer is abandoned once the source runs dry,
/// errors, or `shutdown` is raised.
pub fn spawn_capture<S>(
    source: S,
    capacity: usize,
    shutdown: Arc<AtomicBool>,
    counters: Arc<Counters>,
) -> Result<(rtrb::Consumer<SpectrumFrame>, JoinHandle<Result<()>>)>
where
    S: SpectrumSource + 'static,
{
    let (producer, consumer) = rtrb::RingBuffer::new(capacity);
    let handle = thread::Builder::new()
        .name("capture".to_owned())
        .spawn(move || {
            let res = capture_frames(source, producer, &shutdown, &counters);
            if let Err(e) = &res {
                error!("Spectrum source failed: {}", e);
            }
            res
        })?;
    Ok((consumer, handle))
}

pub fn capture_frames<S: SpectrumSource>(
    mut source: S,
    mut producer: rtrb::Producer<SpectrumFrame>,
    shutdown: &AtomicBool,
    counters: &Counters,
) -> Result<()> {
    while !shutdown.load(Ordering::Relaxed) {
        let mut frame = match source.next_frame()? {
            Some(f) => f,
            None => {
                debug!("Spectrum source exhausted");
                break;
            }
        };
        counters.captured();
        // Hold on to the frame until the pipeline makes room
        loop {
            match producer.push(frame) {
                Ok(()) => break,
                Err(rtrb::PushError::Full(f)) => {
                    frame = f;
                    let stalls = counters.stalled();
                    if stalls == 1 || stalls % 10_000 == 0 {
                        warn!("Ring buffer full, capture stalled ({} times so far)", stalls);
                    }
                    if shutdown.load(Ordering::Relaxed) {
                        return Ok(());
                    }
                    thread::sleep(STALL_BACKOFF);
                }
            }
        }
    }
    Ok(())
}
