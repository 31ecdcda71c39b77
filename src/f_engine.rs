//! Turning blocks of complex samples into power spectra
//
// For each block of `fft_size` samples we
// * multiply with a Blackman-Harris window
// * FFT
// * take |X|^2
// * rotate so the zero-frequency bin sits on `channels::dc_bin`

use std::{f32::consts::PI, sync::Arc};

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::channels::dc_bin;

/// Symmetric 4-term Blackman-Harris window
pub fn blackman_harris(n: usize) -> Vec<f32> {
    const A: [f32; 4] = [0.35875, 0.48829, 0.14128, 0.01168];
    if n == 1 {
        return vec![1.0];
    }
    let denom = (n - 1) as f32;
    (0..n)
        .map(|i| {
            let x = 2.0 * PI * i as f32 / denom;
            A[0] - A[1] * x.cos() + A[2] * (2.0 * x).cos() - A[3] * (3.0 * x).cos()
        })
        .collect()
}

/// Sum of squared window coefficients
pub fn window_power(window: &[f32]) -> f64 {
    window.iter().map(|&w| w as f64 * w as f64).sum()
}

pub struct FEngine {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buf: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl FEngine {
    pub fn new(fft_size: usize) -> Self {
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        Self {
            fft,
            window: blackman_harris(fft_size),
            buf: vec![Complex::default(); fft_size],
            scratch,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.window.len()
    }

    pub fn window_power(&self) -> f64 {
        window_power(&self.window)
    }

    /// Compute one shifted magnitude-squared spectrum
    pub fn process(&mut self, samples: &[Complex<f32>], output: &mut [f32]) {
        let n = self.fft_size();
        assert_eq!(samples.len(), n);
        assert_eq!(output.len(), n);
        for ((b, s), w) in self.buf.iter_mut().zip(samples).zip(&self.window) {
            *b = *s * *w;
        }
        self.fft.process_with_scratch(&mut self.buf, &mut self.scratch);
        let dc = dc_bin(n) % n;
        for (k, x) in self.buf.iter().enumerate() {
            output[(k + dc) % n] = x.norm_sqr();
        }
    }
}
