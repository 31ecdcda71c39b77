//! Runtime configuration, settled once at startup

use std::{path::PathBuf, time::Duration};

use crate::{
    args::{Args, SourceKind},
    channels::BandRequest,
    error::{Error, Result},
    stats::Detector,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub center_freq: f64,
    pub bandwidth: f64,
    pub sample_rate: f64,
    pub meas_interval: f64,
    pub num_channels: usize,
    pub fft_size: usize,
    pub skip_dc: bool,
    pub detector: Detector,
    pub attenuation: f64,
    pub dest_host: String,
    pub control_port: u16,
    pub control_timeout: Duration,
    pub ring_capacity: usize,
    pub send_buffer: usize,
    /// Longest a single socket write may block
    pub send_timeout: Duration,
}

/// Where the spectra come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceConfig {
    Noise { serial: Option<String> },
    Iq { path: PathBuf, serial: Option<String> },
}

impl Config {
    /// Reject anything the pipeline can't sensibly run with
    pub fn validate(self) -> Result<Self> {
        let bad = |msg: String| Err(Error::Config(msg));
        if self.fft_size == 0 {
            return bad("FFT size must be positive".to_owned());
        }
        if self.num_channels == 0 {
            return bad("Need at least one channel".to_owned());
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return bad(format!("Invalid sample rate {}", self.sample_rate));
        }
        if !(self.meas_interval.is_finite() && self.meas_interval > 0.0) {
            return bad(format!("Invalid measurement interval {}", self.meas_interval));
        }
        if !(self.bandwidth.is_finite() && self.bandwidth > 0.0) {
            return bad(format!("Invalid bandwidth {}", self.bandwidth));
        }
        if !self.center_freq.is_finite() {
            return bad(format!("Invalid center frequency {}", self.center_freq));
        }
        let hz_per_bin = self.sample_rate / self.fft_size as f64;
        if (self.bandwidth / self.num_channels as f64 / hz_per_bin).round() < 1.0 {
            return bad(format!(
                "{} Hz is too narrow for {} channels at {} Hz per bin",
                self.bandwidth, self.num_channels, hz_per_bin
            ));
        }
        if self.ring_capacity == 0 || self.send_buffer == 0 {
            return bad("Buffer capacities must be positive".to_owned());
        }
        if self.send_timeout.is_zero() {
            return bad("Send timeout must be positive".to_owned());
        }
        if self.dest_host.is_empty() {
            return bad("No destination host".to_owned());
        }
        Ok(self)
    }

    pub fn band_request(&self, sample_rate: f64) -> BandRequest {
        BandRequest {
            fft_size: self.fft_size,
            center_freq: self.center_freq,
            sample_rate,
            bandwidth: self.bandwidth,
            num_channels: self.num_channels,
            skip_dc: self.skip_dc,
        }
    }
}

impl TryFrom<&Args> for Config {
    type Error = Error;

    fn try_from(args: &Args) -> Result<Self> {
        Config {
            center_freq: args.center_freq,
            bandwidth: args.bandwidth,
            sample_rate: args.samp_rate,
            meas_interval: args.meas_interval,
            num_channels: args.number_channels,
            fft_size: args.fft_size,
            skip_dc: args.skip_dc,
            detector: args.detector,
            attenuation: args.attenuation,
            dest_host: args.dest_host.clone(),
            control_port: args.control_port,
            control_timeout: Duration::from_secs(10),
            ring_capacity: args.ring_capacity,
            send_buffer: args.send_buffer,
            send_timeout: Duration::try_from_secs_f64(args.send_timeout)
                .map_err(|_| Error::Config(format!("Invalid send timeout {}", args.send_timeout)))?,
        }
        .validate()
    }
}

impl TryFrom<&Args> for SourceConfig {
    type Error = Error;

    fn try_from(args: &Args) -> Result<Self> {
        let serial = args.serial.clone();
        match args.source {
            SourceKind::Noise => Ok(SourceConfig::Noise { serial }),
            SourceKind::Iq => match &args.iq_file {
                Some(path) => Ok(SourceConfig::Iq {
                    path: path.clone(),
                    serial,
                }),
                None => Err(Error::Config("--source iq needs --iq-file".to_owned())),
            },
        }
    }
}
