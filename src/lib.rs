//! Channelized RF power measurement, streamed to a remote collector.
//!
//! Spectra from a [`source::SpectrumSource`] are summed into channels, averaged over
//! a measurement window, converted to dBm, quantized to one signed byte per channel,
//! and forwarded over a [`session::StreamSession`].

pub mod args;
pub mod capture;
pub mod channels;
pub mod config;
pub mod error;
pub mod exfil;
pub mod f_engine;
pub mod metadata;
pub mod monitoring;
pub mod pipeline;
pub mod power;
pub mod sensor;
pub mod session;
pub mod source;
pub mod stats;

pub use error::{Error, Result};

/// One power spectrum, `fft_size` magnitude-squared bins with DC at `channels::dc_bin`
pub type SpectrumFrame = Vec<f32>;
