//! Argument parsing for running from the command line

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::stats::Detector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// Simulated front end producing noise
    Noise,
    /// Recorded or piped fc32 I/Q samples
    Iq,
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Center frequency of the band (e.g. 915M)
    #[clap(value_parser = parse_eng)]
    pub center_freq: f64,
    /// Total width of the band to split into channels (e.g. 10M)
    #[clap(value_parser = parse_eng)]
    pub bandwidth: f64,
    /// Sample rate of the spectrum source
    #[clap(short, long, default_value = "1M", value_parser = parse_eng)]
    pub samp_rate: f64,
    /// Interval over which to measure the statistic, in seconds
    #[clap(long, default_value_t = 0.1)]
    pub meas_interval: f64,
    /// Number of uniform channels to report power for
    #[clap(short = 'c', long, default_value_t = 100)]
    pub number_channels: usize,
    /// Number of FFT bins
    #[clap(short = 'F', long, default_value_t = 1024)]
    pub fft_size: usize,
    /// Collector host to stream measurements to
    #[clap(short, long)]
    pub dest_host: String,
    /// Port of the collector's HTTP control plane
    #[clap(long, default_value_t = crate::session::CONTROL_PORT)]
    #[clap(value_parser = clap::value_parser!(u16).range(1..))]
    pub control_port: u16,
    /// Skip the DC bin when mapping channels
    #[clap(long)]
    pub skip_dc: bool,
    /// Statistic applied over each measurement interval
    #[clap(long, value_enum, default_value = "average")]
    pub detector: Detector,
    /// Front end attenuation to report in the data header, in dB
    #[clap(long, default_value_t = 0.0)]
    pub attenuation: f64,
    /// Sensor location document
    #[clap(long, default_value = "sensor.loc")]
    pub location: PathBuf,
    /// Sensor system document
    #[clap(long, default_value = "sensor.sys")]
    pub system: PathBuf,
    /// Where spectra come from
    #[clap(long, value_enum, default_value = "noise")]
    pub source: SourceKind,
    /// fc32 I/Q recording to read for `--source iq` (`-` for stdin)
    #[clap(long)]
    pub iq_file: Option<PathBuf>,
    /// Override the sensor id reported by the source
    #[clap(long)]
    pub serial: Option<String>,
    /// Spectrum frames buffered between the source and the pipeline
    #[clap(long, default_value_t = 256)]
    pub ring_capacity: usize,
    /// Measurement frames buffered in front of the collector socket
    #[clap(long, default_value_t = 64)]
    pub send_buffer: usize,
    /// Seconds a write to the collector may block before it's considered gone
    #[clap(long, default_value_t = 5.0)]
    pub send_timeout: f64,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

/// Parse a number with an optional engineering suffix, like `2.4G` or `250k`
pub fn parse_eng(s: &str) -> Result<f64, String> {
    let s = s.trim();
    let (digits, mult) = match s.chars().last() {
        Some('T') => (&s[..s.len() - 1], 1e12),
        Some('G') => (&s[..s.len() - 1], 1e9),
        Some('M') => (&s[..s.len() - 1], 1e6),
        Some('k') => (&s[..s.len() - 1], 1e3),
        Some('m') => (&s[..s.len() - 1], 1e-3),
        Some('u') => (&s[..s.len() - 1], 1e-6),
        Some('n') => (&s[..s.len() - 1], 1e-9),
        _ => (s, 1.0),
    };
    digits
        .parse::<f64>()
        .map(|x| x * mult)
        .map_err(|_| format!("Invalid number \"{}\"", s))
}
