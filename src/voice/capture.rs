//! Audio capture from microphone
//!
//! The capture callback feeds two consumers: the recognition pipeline drains
//! the main buffer, while the amplitude source reads a small rolling window
//! through a [`LevelTap`] without disturbing it.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Rolling window length kept for amplitude sampling
const LEVEL_WINDOW: usize = 1024;

/// Shared buffer of captured samples, drained by the recognition pipeline
#[derive(Debug, Clone, Default)]
pub struct SampleBuffer(Arc<Mutex<Vec<f32>>>);

impl SampleBuffer {
    /// Take all buffered samples, leaving the buffer empty
    #[must_use]
    pub fn take(&self) -> Vec<f32> {
        self.0
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    /// Clear the buffer
    pub fn clear(&self) {
        if let Ok(mut buf) = self.0.lock() {
            buf.clear();
        }
    }

    fn push(&self, data: &[f32]) {
        if let Ok(mut buf) = self.0.lock() {
            buf.extend_from_slice(data);
        }
    }
}

/// Rolling window of the most recent capture samples
///
/// Cloneable handle; the capture callback keeps it topped up for the process
/// lifetime once the device is acquired.
#[derive(Debug, Clone, Default)]
pub struct LevelTap(Arc<Mutex<Vec<f32>>>);

impl LevelTap {
    /// Snapshot the current window (most recent samples last)
    #[must_use]
    pub fn snapshot(&self) -> Vec<f32> {
        self.0.lock().map(|buf| buf.clone()).unwrap_or_default()
    }

    fn push(&self, data: &[f32]) {
        if let Ok(mut buf) = self.0.lock() {
            buf.extend_from_slice(data);
            let len = buf.len();
            if len > LEVEL_WINDOW {
                buf.drain(..len - LEVEL_WINDOW);
            }
        }
    }

    /// Feed samples directly (tests and synthetic sources)
    #[cfg(test)]
    pub fn feed(&self, data: &[f32]) {
        self.push(data);
    }
}

/// Captures audio from the default input device
pub struct AudioCapture {
    #[allow(dead_code)]
    device: Device,
    config: StreamConfig,
    buffer: SampleBuffer,
    level: LevelTap,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a new audio capture instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            buffer: SampleBuffer::default(),
            level: LevelTap::default(),
            stream: None,
        })
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns error if capture fails
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = self.buffer.clone();
        let level = self.level.clone();
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device".to_string()))?;

        let config = self.config.clone();

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    buffer.push(data);
                    level.push(data);
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    /// Handle to the drainable sample buffer
    #[must_use]
    pub fn buffer_handle(&self) -> SampleBuffer {
        self.buffer.clone()
    }

    /// Handle to the rolling level window
    #[must_use]
    pub fn level_tap(&self) -> LevelTap {
        self.level.clone()
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Get the sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_buffer_take_drains() {
        let buf = SampleBuffer::default();
        buf.push(&[0.1, 0.2]);
        buf.push(&[0.3]);

        assert_eq!(buf.take().len(), 3);
        assert!(buf.take().is_empty());
    }

    #[test]
    fn level_tap_keeps_a_bounded_window() {
        let tap = LevelTap::default();
        tap.feed(&vec![0.5; LEVEL_WINDOW * 2]);

        let window = tap.snapshot();
        assert_eq!(window.len(), LEVEL_WINDOW);
    }

    #[test]
    fn level_tap_keeps_most_recent_samples() {
        let tap = LevelTap::default();
        tap.feed(&vec![0.0; LEVEL_WINDOW]);
        tap.feed(&[0.9, 0.8]);

        let window = tap.snapshot();
        assert_eq!(window.len(), LEVEL_WINDOW);
        assert!((window[LEVEL_WINDOW - 2] - 0.9).abs() < f32::EPSILON);
        assert!((window[LEVEL_WINDOW - 1] - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn wav_encoding_produces_riff_header() {
        let samples = vec![0.0f32; 160];
        let wav = samples_to_wav(&samples, SAMPLE_RATE).unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
    }
}
