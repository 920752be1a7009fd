use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use super::tap::{AnalysisTap, BIN_COUNT};

/// Frame-level smoothing factor. Lower is smoother.
pub const SMOOTHING_FACTOR: f32 = 0.15;

// Bins in the lower half of the spectrum carry most speech energy and get
// extra weight; the divisor stays the raw bin count, so the weighting shifts
// the scale rather than normalizing it.
const LOW_BIN_WEIGHT: f32 = 1.5;
const HIGH_BIN_WEIGHT: f32 = 0.8;

// Perceptual compression: quiet input reads quieter, loud transients pop.
const LOUDNESS_EXPONENT: f32 = 1.8;
const LOUDNESS_NORM: f32 = 128.0;

/// Sampling quantum of the extraction loop.
const FRAME_RATE: f64 = 60.0;

/// Reduce a byte spectrum to a single loudness estimate in [0, 1].
pub fn target_level(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }

    let half = bins.len() / 2;
    let mut sum = 0.0f32;
    for (i, &magnitude) in bins.iter().enumerate() {
        let weight = if i < half { LOW_BIN_WEIGHT } else { HIGH_BIN_WEIGHT };
        sum += magnitude as f32 * weight;
    }
    let average = sum / bins.len() as f32;

    (average / LOUDNESS_NORM).powf(LOUDNESS_EXPONENT).min(1.0)
}

/// One-pole low-pass over successive target levels.
#[derive(Debug, Default)]
pub struct LevelMeter {
    previous: f32,
}

impl LevelMeter {
    pub fn step(&mut self, target: f32) -> f32 {
        self.previous += (target - self.previous) * SMOOTHING_FACTOR;
        self.previous
    }

    pub fn reset(&mut self) {
        self.previous = 0.0;
    }

    pub fn value(&self) -> f32 {
        self.previous
    }
}

/// Cancellable per-frame sampling task.
///
/// `Stopped` and `Running` are the only states. While running, a tokio task
/// ticks at the frame quantum, reads the tap, smooths and publishes. `stop()`
/// flips the cancellation flag so the next tick is a no-op, then resets the
/// published level to zero. Start while running and stop while stopped are
/// both no-ops.
pub struct LevelLoop {
    tap: Arc<AnalysisTap>,
    sender: watch::Sender<f32>,
    cancel: Option<Arc<AtomicBool>>,
}

impl LevelLoop {
    pub fn new(tap: Arc<AnalysisTap>, sender: watch::Sender<f32>) -> Self {
        Self {
            tap,
            sender,
            cancel: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.cancel.is_some()
    }

    pub fn start(&mut self) {
        if self.cancel.is_some() {
            return;
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        let tap = self.tap.clone();
        let sender = self.sender.clone();

        tokio::spawn(async move {
            let mut meter = LevelMeter::default();
            let mut bins = [0u8; BIN_COUNT];
            let mut ticker = interval(Duration::from_secs_f64(1.0 / FRAME_RATE));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            debug!("level extraction loop started");
            loop {
                ticker.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                tap.byte_frequency_data(&mut bins);
                let level = meter.step(target_level(&bins));

                // The publish is gated on the flag under the channel lock so
                // a frame racing a concurrent stop() cannot land after the
                // stop's zero reset.
                sender.send_if_modified(|slot| {
                    if flag.load(Ordering::Relaxed) {
                        return false;
                    }
                    *slot = level;
                    true
                });
            }
            debug!("level extraction loop stopped");
        });

        self.cancel = Some(cancel);
    }

    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.store(true, Ordering::Relaxed);
            self.sender.send_replace(0.0);
        }
    }
}

impl Drop for LevelLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_bins_give_zero_target() {
        assert_eq!(target_level(&[0u8; BIN_COUNT]), 0.0);
    }

    #[test]
    fn saturated_bins_clamp_to_one() {
        // Weighted average of all-255 bins exceeds the norm, so the clamp
        // lands exactly on 1.0 regardless of the exponent.
        assert_eq!(target_level(&[255u8; BIN_COUNT]), 1.0);
    }

    #[test]
    fn low_bins_weigh_more_than_high_bins() {
        let mut low = [0u8; BIN_COUNT];
        low[..BIN_COUNT / 2].fill(200);
        let mut high = [0u8; BIN_COUNT];
        high[BIN_COUNT / 2..].fill(200);

        assert!(target_level(&low) > target_level(&high));
    }

    #[test]
    fn meter_converges_geometrically() {
        // From zero toward a constant target T, N steps land on
        // T * (1 - 0.85^N).
        let expectations = [(1, 0.15f32), (5, 0.5563), (20, 0.9612)];
        for (steps, expected) in expectations {
            let mut meter = LevelMeter::default();
            let mut value = 0.0;
            for _ in 0..steps {
                value = meter.step(1.0);
            }
            assert!(
                (value - expected).abs() < 1e-3,
                "after {} steps: {} != {}",
                steps,
                value,
                expected
            );
        }
    }

    #[test]
    fn meter_reset_returns_to_zero() {
        let mut meter = LevelMeter::default();
        meter.step(1.0);
        assert!(meter.value() > 0.0);
        meter.reset();
        assert_eq!(meter.value(), 0.0);
    }

    #[tokio::test]
    async fn loop_publishes_while_running_and_resets_on_stop() {
        let tap = Arc::new(AnalysisTap::new());
        // Keep the tap loud so every frame has a nonzero target.
        let wave: Vec<f32> = (0..256)
            .map(|i| (2.0 * std::f32::consts::PI * 16.0 * i as f32 / 256.0).sin())
            .collect();
        tap.feed(&wave);

        let (tx, rx) = watch::channel(0.0f32);
        let mut level_loop = LevelLoop::new(tap, tx);
        level_loop.start();
        assert!(level_loop.is_running());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(*rx.borrow() > 0.0, "loop should have published a level");

        level_loop.stop();
        assert!(!level_loop.is_running());
        assert_eq!(*rx.borrow(), 0.0);

        // A second stop is a no-op.
        level_loop.stop();
        assert_eq!(*rx.borrow(), 0.0);
    }

    #[tokio::test]
    async fn double_start_is_a_no_op() {
        let tap = Arc::new(AnalysisTap::new());
        let (tx, _rx) = watch::channel(0.0f32);
        let mut level_loop = LevelLoop::new(tap, tx);

        level_loop.start();
        let flag = level_loop.cancel.clone();
        level_loop.start();
        assert!(Arc::ptr_eq(
            flag.as_ref().unwrap(),
            level_loop.cancel.as_ref().unwrap()
        ));
        level_loop.stop();
    }
}
