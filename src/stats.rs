//! Time statistics over consecutive channel frames (tumbling windows)

use std::fmt;

use clap::ValueEnum;

/// Which statistic is applied across a measurement window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Detector {
    #[default]
    Average,
    Peak,
}

impl fmt::Display for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Detector::Average => write!(f, "Average"),
            Detector::Peak => write!(f, "Peak"),
        }
    }
}

/// How many FFT frames make up one reported measurement, and how long that really is
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementTiming {
    pub frames: usize,
    /// Realized duration in seconds, which may differ from the request
    pub duration: f64,
}

impl MeasurementTiming {
    pub fn new(interval: f64, sample_rate: f64, fft_size: usize) -> Self {
        let frames = ((interval * sample_rate / fft_size as f64).round() as usize).max(1);
        let duration = frames as f64 * fft_size as f64 / sample_rate;
        Self { frames, duration }
    }
}

/// Per-channel accumulator that emits one result every `meas_frames` inputs
#[derive(Debug, Clone)]
pub struct WindowStatistics {
    acc: Vec<f32>,
    count: usize,
    meas_frames: usize,
    detector: Detector,
}

impl WindowStatistics {
    pub fn new(num_channels: usize, meas_frames: usize, detector: Detector) -> Self {
        assert!(meas_frames > 0);
        Self {
            acc: vec![0.0; num_channels],
            count: 0,
            meas_frames,
            detector,
        }
    }

    /// Frames folded into the current (incomplete) window
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn meas_frames(&self) -> usize {
        self.meas_frames
    }

    pub fn detector(&self) -> Detector {
        self.detector
    }

    /// Fold one channel frame in. Returns the window's statistic when this frame completes it.
    pub fn push(&mut self, frame: &[f32]) -> Option<Vec<f32>> {
        assert_eq!(frame.len(), self.acc.len());
        if self.count == 0 {
            self.acc.copy_from_slice(frame);
        } else {
            match self.detector {
                Detector::Average => self
                    .acc
                    .iter_mut()
                    .zip(frame)
                    .for_each(|(a, x)| *a += x),
                Detector::Peak => self
                    .acc
                    .iter_mut()
                    .zip(frame)
                    .for_each(|(a, x)| *a = a.max(*x)),
            }
        }
        self.count += 1;
        if self.count < self.meas_frames {
            return None;
        }
        self.count = 0;
        let out = match self.detector {
            Detector::Average => {
                let n = self.meas_frames as f32;
                self.acc.iter().map(|x| x / n).collect()
            }
            Detector::Peak => self.acc.clone(),
        };
        Some(out)
    }

    /// Throw away a partially filled window
    pub fn reset(&mut self) {
        self.count = 0;
    }
}
