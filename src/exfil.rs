//! This module is responsible for exfilling measurement frames to the collector

use std::{
    io::{self, BufWriter, Write},
    thread::{self, JoinHandle},
};

use byte_slice_cast::AsByteSlice;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::error;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// The writer is behind and the queue is full, so this frame was discarded
    Dropped,
}

/// Bounded queue in front of a writer thread. The pipeline never blocks on the socket.
pub struct FrameSender {
    tx: Sender<Vec<u8>>,
    handle: JoinHandle<io::Result<()>>,
}

impl FrameSender {
    pub fn spawn<W: Write + Send + 'static>(writer: W, capacity: usize) -> Result<Self> {
        let (tx, rx) = bounded(capacity);
        let handle = thread::Builder::new()
            .name("exfil".to_owned())
            .spawn(move || {
                let mut writer = BufWriter::new(writer);
                let res = drain(&mut writer, rx);
                if let Err(e) = &res {
                    error!("Writing to collector failed: {}", e);
                    // Dropping a BufWriter flushes, which would block on a stalled peer all over again
                    let _ = writer.into_parts();
                }
                res
            })?;
        Ok(Self { tx, handle })
    }

    pub fn send(&self, frame: &[i8]) -> Result<SendOutcome> {
        match self.tx.try_send(frame.as_byte_slice().to_vec()) {
            Ok(()) => Ok(SendOutcome::Queued),
            Err(TrySendError::Full(_)) => Ok(SendOutcome::Dropped),
            // Writer thread bailed out, the socket is dead
            Err(TrySendError::Disconnected(_)) => Err(Error::CollectorGone),
        }
    }

    /// Stop accepting frames, write out whatever is queued, and wait for the writer.
    ///
    /// This only returns promptly if the underlying writer can't block forever,
    /// so sockets need a write timeout.
    pub fn finish(self) -> Result<()> {
        drop(self.tx);
        match self.handle.join() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if is_stall(&e) => Err(Error::CollectorGone),
            Ok(Err(e)) => Err(Error::from(e)),
            Err(_) => Err(Error::CollectorGone),
        }
    }
}

/// A write that timed out means the peer stopped reading
fn is_stall(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn drain<W: Write>(writer: &mut W, rx: Receiver<Vec<u8>>) -> io::Result<()> {
    for frame in rx.iter() {
        writer.write_all(&frame)?;
        if rx.is_empty() {
            writer.flush()?;
        }
    }
    writer.flush()
}
