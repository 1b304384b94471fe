//! Amplitude sourcing strategies
//!
//! "How loud is it right now" as a normalized `[0,1]` value, sampled once per
//! animation frame. Two strategies, chosen once at startup: spectral energy
//! from the live capture window, or a smooth oscillation gated by the speaking
//! flag when no capture device is available.

use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};

use crate::voice::{LevelTap, SpeakingFlag};

/// FFT length for the live source (power of two)
const FFT_SIZE: usize = 256;

/// Average low-band magnitude treated as full scale when normalizing
const LOW_BAND_REF: f32 = 0.02;

/// Per-frame phase advance for the simulated source
const SIM_TIME_STEP: f32 = 0.05;

/// A normalized loudness signal driving the visual pulse
pub trait AmplitudeSource: Send {
    /// Sample the current amplitude; called once per animation frame
    fn sample(&mut self) -> f32;
}

/// Live strategy: frequency-domain energy from the capture window
///
/// Applies a Hann window and a forward FFT to the most recent capture
/// samples, then averages magnitudes over the lower quarter of the
/// positive-frequency bins — the band where voice energy lives.
pub struct LiveAmplitude {
    tap: LevelTap,
    fft: Arc<dyn Fft<f32>>,
    hann_window: Vec<f32>,
}

impl LiveAmplitude {
    /// Create a live source reading from the given capture tap
    #[must_use]
    pub fn new(tap: LevelTap) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        #[allow(clippy::cast_precision_loss)]
        let hann_window: Vec<f32> = (0..FFT_SIZE)
            .map(|i| {
                0.5 * (1.0
                    - (2.0 * std::f32::consts::PI * i as f32 / (FFT_SIZE - 1) as f32).cos())
            })
            .collect();

        Self {
            tap,
            fft,
            hann_window,
        }
    }
}

impl AmplitudeSource for LiveAmplitude {
    fn sample(&mut self) -> f32 {
        let window = self.tap.snapshot();
        if window.is_empty() {
            return 0.0;
        }

        // Most recent FFT_SIZE samples, zero-padded at the front when short
        let start = window.len().saturating_sub(FFT_SIZE);
        let recent = &window[start..];
        let pad = FFT_SIZE - recent.len();

        let mut buffer: Vec<Complex<f32>> = std::iter::repeat_n(0.0, pad)
            .chain(recent.iter().copied())
            .zip(self.hann_window.iter())
            .map(|(sample, &w)| Complex::new(sample * w, 0.0))
            .collect();

        self.fft.process(&mut buffer);

        // Positive-frequency magnitudes, lower quarter only
        let num_bins = FFT_SIZE / 2;
        let low_band = num_bins / 4;
        #[allow(clippy::cast_precision_loss)]
        let avg: f32 = buffer[..low_band]
            .iter()
            .map(|c| (c.re * c.re + c.im * c.im).sqrt() / FFT_SIZE as f32)
            .sum::<f32>()
            / low_band as f32;

        (avg / LOW_BAND_REF).clamp(0.0, 1.0)
    }
}

/// Simulated strategy: a smooth pulse while synthesis is active, zero otherwise
pub struct SimulatedAmplitude {
    speaking: SpeakingFlag,
    time: f32,
}

impl SimulatedAmplitude {
    /// Create a simulated source gated by the shared speaking flag
    #[must_use]
    pub const fn new(speaking: SpeakingFlag) -> Self {
        Self { speaking, time: 0.0 }
    }
}

impl AmplitudeSource for SimulatedAmplitude {
    fn sample(&mut self) -> f32 {
        let value = if self.speaking.is_set() {
            ((self.time * 2.0).sin() + 1.0) / 2.0 * 0.5
        } else {
            0.0
        };
        self.time += SIM_TIME_STEP;
        value
    }
}

/// Pick the amplitude strategy once at startup
///
/// Live when a capture tap was acquired; otherwise falls back to the
/// simulated pulse with a logged warning.
#[must_use]
pub fn select_source(
    tap: Option<LevelTap>,
    speaking: &SpeakingFlag,
) -> Box<dyn AmplitudeSource> {
    match tap {
        Some(tap) => Box::new(LiveAmplitude::new(tap)),
        None => {
            tracing::warn!("no capture device, using simulated amplitude during synthesis");
            Box::new(SimulatedAmplitude::new(speaking.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_is_zero_when_not_speaking() {
        let flag = SpeakingFlag::default();
        let mut source = SimulatedAmplitude::new(flag);

        for _ in 0..10 {
            assert!(source.sample().abs() < f32::EPSILON);
        }
    }

    #[test]
    fn simulated_oscillates_while_speaking() {
        let flag = SpeakingFlag::default();
        flag.set(true);
        let mut source = SimulatedAmplitude::new(flag);

        let samples: Vec<f32> = (0..100).map(|_| source.sample()).collect();
        let max = samples.iter().copied().fold(0.0f32, f32::max);
        let min = samples.iter().copied().fold(1.0f32, f32::min);

        assert!(max > 0.4, "oscillation should approach 0.5, got {max}");
        assert!(max <= 0.5 + f32::EPSILON);
        assert!(min < 0.1, "oscillation should dip near zero, got {min}");
    }

    #[test]
    fn live_is_silent_on_empty_tap() {
        let tap = LevelTap::default();
        let mut source = LiveAmplitude::new(tap);
        assert!(source.sample().abs() < f32::EPSILON);
    }

    #[test]
    fn live_responds_to_a_low_frequency_tone() {
        let tap = LevelTap::default();

        // 250Hz tone at 16kHz lands well inside the lower quarter of bins
        #[allow(clippy::cast_precision_loss)]
        let tone: Vec<f32> = (0..1024)
            .map(|i| (2.0 * std::f32::consts::PI * 250.0 * i as f32 / 16000.0).sin() * 0.8)
            .collect();
        tap.feed(&tone);

        let mut source = LiveAmplitude::new(tap);
        let amp = source.sample();
        assert!(amp > 0.2, "tone should register, got {amp}");
        assert!(amp <= 1.0);
    }

    #[test]
    fn live_is_quiet_on_silence() {
        let tap = LevelTap::default();
        tap.feed(&vec![0.0f32; 1024]);

        let mut source = LiveAmplitude::new(tap);
        assert!(source.sample() < 0.01);
    }

    #[test]
    fn select_source_falls_back_to_simulated() {
        let speaking = SpeakingFlag::default();
        // No tap: simulated, gated by the flag
        let mut source = select_source(None, &speaking);
        assert!(source.sample().abs() < f32::EPSILON);

        speaking.set(true);
        let lively: f32 = (0..50).map(|_| source.sample()).fold(0.0, f32::max);
        assert!(lively > 0.0);
    }
}
