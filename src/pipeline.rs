//! The per-frame measurement chain: aggregate, window, convert, quantize

use tracing::debug;

use crate::{
    channels::{aggregate, ChannelMap},
    power::{PowerConverter, Quantizer},
    stats::{Detector, WindowStatistics},
};

pub struct Pipeline {
    map: ChannelMap,
    stats: WindowStatistics,
    converter: PowerConverter,
    quantizer: Quantizer,
    channel_frame: Vec<f32>,
    dbm: Vec<f32>,
}

impl Pipeline {
    pub fn new(
        map: ChannelMap,
        meas_frames: usize,
        detector: Detector,
        converter: PowerConverter,
        quantizer: Quantizer,
    ) -> Self {
        let n = map.num_channels();
        Self {
            map,
            stats: WindowStatistics::new(n, meas_frames, detector),
            converter,
            quantizer,
            channel_frame: vec![0.0; n],
            dbm: vec![0.0; n],
        }
    }

    pub fn num_channels(&self) -> usize {
        self.map.num_channels()
    }

    pub fn fft_size(&self) -> usize {
        self.map.len()
    }

    pub fn channel_map(&self) -> &ChannelMap {
        &self.map
    }

    /// Swap in a new channel map between frames. It must describe the same channels.
    pub fn set_channel_map(&mut self, map: ChannelMap) {
        assert_eq!(map.num_channels(), self.map.num_channels());
        self.map = map;
    }

    /// Feed one power spectrum. Returns the quantized measurement when a window completes.
    pub fn process(&mut self, spectrum: &[f32]) -> Option<Vec<i8>> {
        aggregate(spectrum, &self.map, &mut self.channel_frame);
        let measurement = self.stats.push(&self.channel_frame)?;
        self.converter.convert(&measurement, &mut self.dbm);
        let mut out = vec![0i8; self.dbm.len()];
        self.quantizer.quantize(&self.dbm, &mut out);
        debug!(?out, "Measurement complete");
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_pipeline(meas_frames: usize) -> Pipeline {
        Pipeline::new(
            ChannelMap::new(vec![0, 0, 1, 2, 3, 4, 0, 0], 4),
            meas_frames,
            Detector::Average,
            // Offset of exactly +30 dB
            PowerConverter::with_impedance(1, 1.0, 1.0),
            Quantizer::default(),
        )
    }

    #[test]
    fn test_emits_once_per_window() {
        let mut pipeline = identity_pipeline(3);
        let spectrum = [5.0, 5.0, 1e-3, 1e-2, 1.0, 0.0, 5.0, 5.0];
        assert_eq!(pipeline.process(&spectrum), None);
        assert_eq!(pipeline.process(&spectrum), None);
        let out = pipeline.process(&spectrum).unwrap();
        assert_eq!(out.len(), pipeline.num_channels());
        assert_eq!(out, vec![0, 10, 30, -128]);
    }

    #[test]
    fn test_output_length_independent_of_fft_size() {
        for fft_size in [4usize, 64, 1000] {
            let bins = (0..fft_size).map(|i| i % 3).collect();
            let mut pipeline = Pipeline::new(
                ChannelMap::new(bins, 2),
                1,
                Detector::Peak,
                PowerConverter::new(fft_size, fft_size as f64),
                Quantizer::default(),
            );
            let out = pipeline.process(&vec![1.0; fft_size]).unwrap();
            assert_eq!(out.len(), 2);
        }
    }

    #[test]
    fn test_map_replacement() {
        let mut pipeline = identity_pipeline(1);
        let spectrum = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        assert_eq!(pipeline.process(&spectrum).unwrap(), vec![-128; 4]);
        pipeline.set_channel_map(ChannelMap::new(vec![1, 0, 0, 0, 0, 0, 0, 4], 4));
        assert_eq!(pipeline.process(&spectrum).unwrap(), vec![30, -128, -128, 30]);
    }

    #[test]
    #[should_panic]
    fn test_wrong_spectrum_length() {
        identity_pipeline(1).process(&[1.0; 7]);
    }
}
