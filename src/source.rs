//! Spectrum sources: anything that can be tuned and hands out one power spectrum per FFT frame

use std::{
    f64::consts::PI,
    fs::File,
    io::{self, BufReader, Read},
    path::Path,
    thread,
    time::{Duration, Instant},
};

use byte_slice_cast::AsMutByteSlice;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rustfft::num_complex::Complex;
use tracing::{debug, info};

use crate::{error::Result, f_engine::FEngine, SpectrumFrame};

pub trait SpectrumSource: Send {
    /// Ask the front end to tune to `freq` Hz. Returns false if it refused.
    fn tune(&mut self, freq: f64) -> bool;
    fn sample_rate(&self) -> f64;
    /// Hardware serial number, reported to the collector as the sensor id
    fn serial_id(&self) -> String;
    fn fft_size(&self) -> usize;
    /// Sum of squares of the spectral window used to estimate each frame
    fn window_power(&self) -> f64;
    /// The next power spectrum, or `None` once the source has run dry
    fn next_frame(&mut self) -> Result<Option<SpectrumFrame>>;
}

/// Interleaved native-endian f32 I/Q samples (the usual `fc32` recording format)
pub struct IqSource<R> {
    reader: R,
    engine: FEngine,
    sample_rate: f64,
    serial: String,
    raw: Vec<f32>,
    samples: Vec<Complex<f32>>,
}

impl<R: Read + Send> IqSource<R> {
    pub fn new(reader: R, fft_size: usize, sample_rate: f64) -> Self {
        Self {
            reader,
            engine: FEngine::new(fft_size),
            sample_rate,
            serial: "IQFILE".to_owned(),
            raw: vec![0.0; 2 * fft_size],
            samples: vec![Complex::default(); fft_size],
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = serial.into();
        self
    }
}

impl IqSource<Box<dyn Read + Send>> {
    /// Open a recording, where `-` means stdin
    pub fn open(path: &Path, fft_size: usize, sample_rate: f64) -> Result<Self> {
        let reader: Box<dyn Read + Send> = if path == Path::new("-") {
            Box::new(io::stdin())
        } else {
            Box::new(BufReader::new(File::open(path)?))
        };
        info!("Reading I/Q samples from {}", path.display());
        Ok(Self::new(reader, fft_size, sample_rate))
    }
}

impl<R: Read + Send> SpectrumSource for IqSource<R> {
    fn tune(&mut self, freq: f64) -> bool {
        // A recording is wherever it was recorded
        debug!("Recorded source assumed to be centered on {} Hz", freq);
        true
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn serial_id(&self) -> String {
        self.serial.clone()
    }

    fn fft_size(&self) -> usize {
        self.engine.fft_size()
    }

    fn window_power(&self) -> f64 {
        self.engine.window_power()
    }

    fn next_frame(&mut self) -> Result<Option<SpectrumFrame>> {
        match self.reader.read_exact(self.raw.as_mut_byte_slice()) {
            Ok(()) => {}
            // A trailing partial frame is dropped
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        for (s, iq) in self.samples.iter_mut().zip(self.raw.chunks_exact(2)) {
            *s = Complex::new(iq[0], iq[1]);
        }
        let mut frame = vec![0f32; self.samples.len()];
        self.engine.process(&self.samples, &mut frame);
        Ok(Some(frame))
    }
}

/// A carrier added on top of the noise floor, relative to the tuned frequency
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub offset: f64,
    pub amplitude: f32,
}

/// Simulated front end producing uniform complex noise, and optionally a tone
pub struct NoiseSource {
    engine: FEngine,
    sample_rate: f64,
    serial: String,
    rng: StdRng,
    amplitude: f32,
    tone: Option<Tone>,
    phase: f64,
    tuned: Option<f64>,
    paced: bool,
    started: Option<Instant>,
    frames: u64,
    samples: Vec<Complex<f32>>,
}

impl NoiseSource {
    pub fn new(fft_size: usize, sample_rate: f64, seed: u64) -> Self {
        Self {
            engine: FEngine::new(fft_size),
            sample_rate,
            serial: "SIM-0001".to_owned(),
            rng: StdRng::seed_from_u64(seed),
            amplitude: 1e-3,
            tone: None,
            phase: 0.0,
            tuned: None,
            paced: false,
            started: None,
            frames: 0,
            samples: vec![Complex::default(); fft_size],
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = serial.into();
        self
    }

    /// Peak amplitude of each noise component, in volts
    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    pub fn with_tone(mut self, tone: Tone) -> Self {
        self.tone = Some(tone);
        self
    }

    /// Hold each frame back until a real front end would have produced it
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn tuned_frequency(&self) -> Option<f64> {
        self.tuned
    }

    fn wait_for_cadence(&mut self) {
        let started = *self.started.get_or_insert_with(Instant::now);
        let period = self.engine.fft_size() as f64 / self.sample_rate;
        let due = started + Duration::from_secs_f64(period * self.frames as f64);
        let now = Instant::now();
        if due > now {
            thread::sleep(due - now);
        }
    }
}

impl SpectrumSource for NoiseSource {
    fn tune(&mut self, freq: f64) -> bool {
        if !freq.is_finite() || freq < 0.0 {
            return false;
        }
        self.tuned = Some(freq);
        true
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn serial_id(&self) -> String {
        self.serial.clone()
    }

    fn fft_size(&self) -> usize {
        self.engine.fft_size()
    }

    fn window_power(&self) -> f64 {
        self.engine.window_power()
    }

    fn next_frame(&mut self) -> Result<Option<SpectrumFrame>> {
        if self.paced {
            self.wait_for_cadence();
        }
        let a = self.amplitude;
        let step = self.tone.map(|t| 2.0 * PI * t.offset / self.sample_rate);
        for s in self.samples.iter_mut() {
            let mut x = if a > 0.0 {
                Complex::new(self.rng.gen_range(-a..a), self.rng.gen_range(-a..a))
            } else {
                Complex::default()
            };
            if let (Some(tone), Some(step)) = (self.tone, step) {
                x += Complex::new(self.phase.cos() as f32, self.phase.sin() as f32) * tone.amplitude;
                self.phase = (self.phase + step) % (2.0 * PI);
            }
            *s = x;
        }
        self.frames += 1;
        let mut frame = vec![0f32; self.samples.len()];
        self.engine.process(&self.samples, &mut frame);
        Ok(Some(frame))
    }
}
