//! Conversion of averaged magnitude-squared values to dBm, and quantization for the wire

use num_traits::clamp;

/// Reference impedance the front end is assumed to present, in ohms
pub const IMPEDANCE_OHMS: f64 = 50.0;

/// Output for channels with no measurable power (the bottom of the int8 range)
pub const DBM_FLOOR: f32 = i8::MIN as f32;

/// dB offset taking |FFT|^2 in volts to watts, normalized for the FFT length and window
pub fn vsq_to_watts_db(fft_size: usize, window_power: f64, impedance: f64) -> f64 {
    -10.0 * (fft_size as f64 * window_power * impedance).log10()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerConverter {
    /// Everything additive, computed once: window/FFT normalization plus W to mW
    offset_db: f32,
}

impl PowerConverter {
    pub fn new(fft_size: usize, window_power: f64) -> Self {
        Self::with_impedance(fft_size, window_power, IMPEDANCE_OHMS)
    }

    pub fn with_impedance(fft_size: usize, window_power: f64, impedance: f64) -> Self {
        Self {
            offset_db: (30.0 + vsq_to_watts_db(fft_size, window_power, impedance)) as f32,
        }
    }

    pub fn offset_db(&self) -> f32 {
        self.offset_db
    }

    pub fn to_dbm(&self, power: f32) -> f32 {
        // log10 of zero or a negative would hand -inf/NaN downstream.
        // +inf is a saturated channel and goes through, the quantizer pins it to the top.
        if power.is_nan() || power <= 0.0 {
            return DBM_FLOOR;
        }
        10.0 * power.log10() + self.offset_db
    }

    pub fn convert(&self, input: &[f32], output: &mut [f32]) {
        assert_eq!(input.len(), output.len());
        input
            .iter()
            .zip(output.iter_mut())
            .for_each(|(x, y)| *y = self.to_dbm(*x));
    }
}

/// Linear float to int8 mapping with saturation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantizer {
    scale: f32,
}

impl Default for Quantizer {
    fn default() -> Self {
        Self { scale: 1.0 }
    }
}

impl Quantizer {
    pub fn new(scale: f32) -> Self {
        Self { scale }
    }

    pub fn quantize_one(&self, x: f32) -> i8 {
        let scaled = x * self.scale;
        if scaled.is_nan() {
            return i8::MIN;
        }
        clamp(scaled.round(), i8::MIN as f32, i8::MAX as f32) as i8
    }

    pub fn quantize(&self, input: &[f32], output: &mut [i8]) {
        assert_eq!(input.len(), output.len());
        input
            .iter()
            .zip(output.iter_mut())
            .for_each(|(x, y)| *y = self.quantize_one(*x));
    }
}
