//! Mapping of FFT bins onto logical channels, and summing spectra into those channels

use tracing::{info, warn};

/// Everything needed to lay channels over a spectrum
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandRequest {
    pub fft_size: usize,
    pub center_freq: f64,
    pub sample_rate: f64,
    /// Requested total width of the band, before quantizing to whole bins
    pub bandwidth: f64,
    pub num_channels: usize,
    pub skip_dc: bool,
}

/// Bin to channel assignment. Entry `0` means the bin belongs to no channel,
/// every other entry is a channel id in `1..=num_channels`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMap {
    bins: Vec<usize>,
    num_channels: usize,
}

impl ChannelMap {
    pub fn new(bins: Vec<usize>, num_channels: usize) -> Self {
        assert!(
            bins.iter().all(|&ch| ch <= num_channels),
            "Channel map entry out of range"
        );
        Self { bins, num_channels }
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Number of bins (the FFT size this map was built for)
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.bins
    }

    /// How many bins feed channel `channel` (1-based)
    pub fn bins_in_channel(&self, channel: usize) -> usize {
        self.bins.iter().filter(|&&ch| ch == channel).count()
    }
}

/// The result of laying out channels over the band
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelPlan {
    pub map: ChannelMap,
    pub hz_per_bin: f64,
    /// Width of one channel, always a whole number of bins
    pub channel_bw: f64,
    /// Realized total width, `channel_bw * num_channels`
    pub bandwidth: f64,
    pub start_freq: f64,
    pub stop_freq: f64,
}

/// Index of the bin sitting exactly on the center frequency.
/// For odd sizes this is the bin just above the midpoint.
pub fn dc_bin(fft_size: usize) -> usize {
    fft_size / 2 + fft_size % 2
}

/// Center frequency of bin `i` for a shifted spectrum
pub fn bin_freq(i: usize, fft_size: usize, center_freq: f64, hz_per_bin: f64) -> f64 {
    center_freq + hz_per_bin * (i as f64 - dc_bin(fft_size) as f64)
}

/// Build the bin to channel map for a band request
pub fn map_channels(req: &BandRequest) -> ChannelPlan {
    assert!(req.fft_size > 0 && req.num_channels > 0);
    let hz_per_bin = req.sample_rate / req.fft_size as f64;
    let bins_per_channel = (req.bandwidth / req.num_channels as f64 / hz_per_bin).round();
    assert!(bins_per_channel >= 1.0, "Channels must be at least one bin wide");
    let channel_bw = bins_per_channel * hz_per_bin;
    let bandwidth = channel_bw * req.num_channels as f64;
    let start_freq = req.center_freq - bandwidth / 2.0;
    let stop_freq = start_freq + bandwidth;

    let mut bins: Vec<usize> = (0..req.fft_size)
        .map(|i| {
            let f = bin_freq(i, req.fft_size, req.center_freq, hz_per_bin);
            if f >= start_freq && f < stop_freq {
                // Rounding right at the stop edge must not spill into a phantom channel
                (((f - start_freq) / channel_bw).floor() as usize + 1).min(req.num_channels)
            } else {
                0
            }
        })
        .collect();

    if req.skip_dc {
        let dc = dc_bin(req.fft_size);
        if dc < bins.len() {
            // Shift everything above DC up one bin, losing the last assignment
            bins.copy_within(dc..req.fft_size - 1, dc + 1);
            bins[dc] = 0;
        }
    }

    info!("Actual width of band is {} MHz", bandwidth / 1e6);
    if bandwidth > req.sample_rate {
        warn!(
            "Width of band ({} MHz) is greater than the sample rate ({} MHz)",
            bandwidth / 1e6,
            req.sample_rate / 1e6
        );
    }

    ChannelPlan {
        map: ChannelMap::new(bins, req.num_channels),
        hz_per_bin,
        channel_bw,
        bandwidth,
        start_freq,
        stop_freq,
    }
}

/// Sum the power of every bin into its channel. Unmapped bins are ignored.
pub fn aggregate(frame: &[f32], map: &ChannelMap, output: &mut [f32]) {
    assert_eq!(frame.len(), map.len());
    assert_eq!(output.len(), map.num_channels());
    output.iter_mut().for_each(|x| *x = 0.0);
    for (power, &ch) in frame.iter().zip(map.as_slice()) {
        if ch != 0 {
            output[ch - 1] += power;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(fft_size: usize, bandwidth: f64, num_channels: usize) -> BandRequest {
        BandRequest {
            fft_size,
            center_freq: 0.0,
            sample_rate: 8e6,
            bandwidth,
            num_channels,
            skip_dc: false,
        }
    }

    #[test]
    fn test_eight_bin_example() {
        let plan = map_channels(&request(8, 4e6, 4));
        assert_eq!(plan.hz_per_bin, 1e6);
        assert_eq!(plan.channel_bw, 1e6);
        assert_eq!(plan.bandwidth, 4e6);
        assert_eq!(plan.start_freq, -2e6);
        assert_eq!(plan.stop_freq, 2e6);
        assert_eq!(plan.map.as_slice(), &[0, 0, 1, 2, 3, 4, 0, 0]);
    }

    #[test]
    fn test_skip_dc_even() {
        let mut req = request(8, 4e6, 4);
        req.skip_dc = true;
        let plan = map_channels(&req);
        assert_eq!(plan.map.as_slice(), &[0, 0, 1, 2, 0, 3, 4, 0]);
    }

    #[test]
    fn test_skip_dc_odd() {
        // 7 bins, DC at index 4, frequencies -4..=2 MHz
        let mut req = request(7, 4e6, 4);
        req.sample_rate = 7e6;
        let plan = map_channels(&req);
        assert_eq!(dc_bin(7), 4);
        assert_eq!(bin_freq(4, 7, 0.0, plan.hz_per_bin), 0.0);
        assert_eq!(plan.map.as_slice(), &[0, 0, 1, 2, 3, 4, 0]);
        req.skip_dc = true;
        let plan = map_channels(&req);
        assert_eq!(plan.map.as_slice(), &[0, 0, 1, 2, 0, 3, 4]);
    }

    #[test]
    fn test_skip_dc_single_bin() {
        let req = BandRequest {
            fft_size: 1,
            center_freq: 100e6,
            sample_rate: 1e6,
            bandwidth: 1e6,
            num_channels: 1,
            skip_dc: true,
        };
        assert_eq!(map_channels(&req).map.as_slice(), &[0]);
    }

    #[test]
    fn test_bandwidth_quantized_to_bins() {
        // 1 MHz / 1024 bins, ask for 300 kHz over 7 channels
        let req = BandRequest {
            fft_size: 1024,
            center_freq: 915e6,
            sample_rate: 1e6,
            bandwidth: 300e3,
            num_channels: 7,
            skip_dc: false,
        };
        let plan = map_channels(&req);
        let bins_per_channel = (plan.channel_bw / plan.hz_per_bin).round();
        assert_eq!(bins_per_channel, 44.0);
        assert_eq!(plan.bandwidth, plan.hz_per_bin * bins_per_channel * 7.0);
    }

    #[test]
    fn test_uniform_partition() {
        for &(fft_size, sample_rate, bandwidth, num_channels) in &[
            (1024usize, 1e6, 500e3, 100usize),
            (1023, 1e6, 800e3, 10),
            (512, 2.4e6, 2.4e6, 16),
            (64, 1e6, 3e6, 8),
            (4096, 10e6, 1e6, 3),
            (9, 9e3, 4e3, 2),
        ] {
            for skip_dc in [false, true] {
                let plan = map_channels(&BandRequest {
                    fft_size,
                    center_freq: 100e6,
                    sample_rate,
                    bandwidth,
                    num_channels,
                    skip_dc,
                });
                assert_eq!(plan.map.len(), fft_size);
                assert!(plan.map.as_slice().iter().all(|&c| c <= num_channels));
                let expected = plan.channel_bw / plan.hz_per_bin;
                let in_band = plan.bandwidth <= sample_rate;
                for ch in 1..=num_channels {
                    let count = plan.map.bins_in_channel(ch) as f64;
                    // Channels that hang off the edge of the spectrum lose bins
                    if in_band {
                        assert!(
                            (count - expected).abs() <= 1.0,
                            "channel {} has {} bins, expected {}",
                            ch,
                            count,
                            expected
                        );
                    } else {
                        assert!(count <= expected + 1.0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_aggregate() {
        let map = ChannelMap::new(vec![0, 0, 1, 2, 3, 4, 0, 0], 4);
        let frame = [100.0, 100.0, 1.0, 2.0, 3.0, 4.0, 100.0, 100.0];
        let mut out = [0f32; 4];
        aggregate(&frame, &map, &mut out);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_aggregate_sums_and_zeroes_empty_channels() {
        let map = ChannelMap::new(vec![1, 1, 1, 0, 3, 3], 3);
        let frame = [1.0, 2.0, 3.0, 9.0, 0.5, 0.25];
        let mut out = [7f32; 3];
        aggregate(&frame, &map, &mut out);
        assert_eq!(out, [6.0, 0.0, 0.75]);
    }

    #[test]
    #[should_panic]
    fn test_aggregate_length_mismatch() {
        let map = ChannelMap::new(vec![1, 2], 2);
        let mut out = [0f32; 2];
        aggregate(&[1.0, 2.0, 3.0], &map, &mut out);
    }
}
