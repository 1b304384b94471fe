//! Audio-reactive visuals: amplitude sources and the glow renderer

mod amplitude;
mod visualizer;

pub use amplitude::{AmplitudeSource, LiveAmplitude, SimulatedAmplitude, select_source};
pub use visualizer::{GlowFrame, Visualizer};
