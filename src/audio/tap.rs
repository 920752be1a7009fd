use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::{Arc, Mutex};

/// Transform size of the analysis tap. Fixed by design.
pub const FFT_SIZE: usize = 256;
/// Number of frequency bins exposed to readers (positive frequencies only).
pub const BIN_COUNT: usize = FFT_SIZE / 2;

// Per-bin temporal smoothing applied inside the tap, before readers see the
// spectrum. Separate from the frame-level smoothing in `level.rs`.
const SMOOTHING_TIME_CONSTANT: f32 = 0.7;

// Byte mapping range: magnitudes below the floor read as 0, above the
// ceiling as 255.
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

struct TapState {
    /// Ring of the most recent mono samples.
    ring: Vec<f32>,
    write_pos: usize,
    /// Smoothed bin magnitudes carried across reads.
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

/// Shared frequency analyzer all active sources are routed through.
///
/// Whichever source is currently active calls `feed()` with mono samples;
/// the level extraction loop is the only reader via `byte_frequency_data()`.
/// Connection topology (who feeds it) is managed exclusively by the source
/// manager.
pub struct AnalysisTap {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    state: Mutex<TapState>,
}

impl Default for AnalysisTap {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisTap {
    pub fn new() -> Self {
        let fft = FftPlanner::new().plan_fft_forward(FFT_SIZE);

        // Hann window for smoother frequency response
        let window: Vec<f32> = (0..FFT_SIZE)
            .map(|i| {
                0.5 * (1.0
                    - (2.0 * std::f32::consts::PI * i as f32 / (FFT_SIZE - 1) as f32).cos())
            })
            .collect();

        Self {
            fft,
            window,
            state: Mutex::new(TapState {
                ring: vec![0.0; FFT_SIZE],
                write_pos: 0,
                smoothed: vec![0.0; BIN_COUNT],
                scratch: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            }),
        }
    }

    /// Append mono samples to the ring. Only the last `FFT_SIZE` samples are
    /// retained; callers may feed batches of any size.
    pub fn feed(&self, samples: &[f32]) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for &sample in samples {
            let pos = state.write_pos;
            state.ring[pos] = sample;
            state.write_pos = (pos + 1) % FFT_SIZE;
        }
    }

    /// Clear ring and smoothing state. Called when a new source is wired in
    /// so the first frames do not show the previous source's spectrum.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.ring.fill(0.0);
        state.write_pos = 0;
        state.smoothed.fill(0.0);
    }

    /// Compute the current byte spectrum: windowed FFT over the most recent
    /// `FFT_SIZE` samples, per-bin exponential smoothing, then a dB mapping
    /// onto 0-255.
    pub fn byte_frequency_data(&self, out: &mut [u8; BIN_COUNT]) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        // Unroll the ring into time order, oldest first, applying the window.
        let start = state.write_pos;
        for i in 0..FFT_SIZE {
            let sample = state.ring[(start + i) % FFT_SIZE];
            state.scratch[i] = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process(&mut state.scratch);

        for (i, byte) in out.iter_mut().enumerate() {
            let magnitude = state.scratch[i].norm() / FFT_SIZE as f32;
            let smoothed = state.smoothed[i] * SMOOTHING_TIME_CONSTANT
                + magnitude * (1.0 - SMOOTHING_TIME_CONSTANT);
            state.smoothed[i] = smoothed;
            *byte = magnitude_to_byte(smoothed);
        }
    }
}

fn magnitude_to_byte(magnitude: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
    (scaled.clamp(0.0, 1.0) * 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_bins(tap: &AnalysisTap) -> [u8; BIN_COUNT] {
        let mut bins = [0u8; BIN_COUNT];
        tap.byte_frequency_data(&mut bins);
        bins
    }

    /// Feed a full-scale sine whose period divides the transform size so its
    /// energy lands on a single bin.
    fn sine(cycles: usize) -> Vec<f32> {
        (0..FFT_SIZE)
            .map(|i| {
                (2.0 * std::f32::consts::PI * cycles as f32 * i as f32 / FFT_SIZE as f32).sin()
            })
            .collect()
    }

    #[test]
    fn silence_reads_as_zero() {
        let tap = AnalysisTap::new();
        assert!(read_bins(&tap).iter().all(|&b| b == 0));
    }

    #[test]
    fn sine_energy_lands_on_its_bin() {
        let tap = AnalysisTap::new();
        let cycles = 16;
        tap.feed(&sine(cycles));
        let bins = read_bins(&tap);

        assert!(bins[cycles] > 0, "expected energy at bin {}", cycles);
        // Bins well away from the tone stay near the floor.
        assert!(bins[cycles] > bins[cycles + 20].saturating_add(50));
        assert!(bins[cycles] > bins[cycles.saturating_sub(10)].saturating_add(50));
    }

    #[test]
    fn smoothing_decays_after_input_goes_silent() {
        let tap = AnalysisTap::new();
        let bin = 16;
        tap.feed(&sine(bin));
        let loud = read_bins(&tap)[bin];
        assert!(loud > 0);

        tap.feed(&vec![0.0; FFT_SIZE]);
        let first = read_bins(&tap)[bin];
        let second = read_bins(&tap)[bin];

        // Magnitudes fall gradually rather than cutting to zero at once.
        assert!(first < loud);
        assert!(second <= first);
    }

    #[test]
    fn reset_clears_spectrum() {
        let tap = AnalysisTap::new();
        tap.feed(&sine(16));
        assert!(read_bins(&tap).iter().any(|&b| b > 0));

        tap.reset();
        assert!(read_bins(&tap).iter().all(|&b| b == 0));
    }

    #[test]
    fn partial_feeds_keep_only_latest_window() {
        let tap = AnalysisTap::new();
        // Two half-window feeds form one full sine period across the ring.
        let wave = sine(16);
        tap.feed(&wave[..FFT_SIZE / 2]);
        tap.feed(&wave[FFT_SIZE / 2..]);
        assert!(read_bins(&tap)[16] > 0);
    }
}
