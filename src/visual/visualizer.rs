//! Glow visualizer
//!
//! A repeating render loop that paints a pulsing radial glow sized by the
//! current amplitude. Independent of what produced the amplitude: the loop
//! samples its [`AmplitudeSource`] once per frame and writes into an RGBA
//! frame buffer.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::AmplitudeSource;

/// Frame cadence (~30fps)
const FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Grace period before the final clear after `stop()`, allowing a trailing fade
const CLEAR_GRACE: Duration = Duration::from_millis(500);

/// Glow color at the center (neon blue)
const CENTER_COLOR: [f32; 3] = [0.0, 0.75, 1.0];

/// Glow color toward the edge (deep blue)
const EDGE_COLOR: [f32; 3] = [0.0, 0.39, 0.78];

/// Linear mapping constants: radius and opacity both scale with amplitude
const RADIUS_BASE_FRACTION: f32 = 0.20;
const RADIUS_AMPLITUDE_SCALE: f32 = 0.3;
const ALPHA_BASE: f32 = 0.6;
const ALPHA_AMPLITUDE_SCALE: f32 = 0.4;
const ALPHA_MID: f32 = 0.3;

/// RGBA frame buffer the glow is painted into
#[derive(Debug, Clone)]
pub struct GlowFrame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl GlowFrame {
    /// Create a cleared frame
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; (width * height * 4) as usize],
        }
    }

    /// Blank the frame to full transparency
    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA pixel data, row-major
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// RGBA value at a pixel
    ///
    /// # Panics
    ///
    /// Panics if the coordinates are out of bounds
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        assert!(x < self.width && y < self.height, "pixel out of bounds");
        let offset = ((y * self.width + x) * 4) as usize;
        [
            self.pixels[offset],
            self.pixels[offset + 1],
            self.pixels[offset + 2],
            self.pixels[offset + 3],
        ]
    }

    /// Whether any pixel is non-transparent
    #[must_use]
    pub fn is_lit(&self) -> bool {
        self.pixels.chunks_exact(4).any(|px| px[3] > 0)
    }
}

/// Paint a single radial glow frame for the given amplitude
///
/// Radius and opacity are linear in amplitude with fixed base/scale constants;
/// the gradient falls to transparent at 1.5x the pulse radius.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn render_glow(frame: &mut GlowFrame, amplitude: f32) {
    let amplitude = amplitude.clamp(0.0, 1.0);
    let width = frame.width;
    let height = frame.height;

    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;

    let base_radius = width.min(height) as f32 * RADIUS_BASE_FRACTION;
    let radius = base_radius * RADIUS_AMPLITUDE_SCALE.mul_add(amplitude, 1.0);
    let glow_extent = radius * 1.5;
    let center_alpha = ALPHA_AMPLITUDE_SCALE.mul_add(amplitude, ALPHA_BASE);

    for y in 0..height {
        for x in 0..width {
            let dx = (x as f32 + 0.5) - cx;
            let dy = (y as f32 + 0.5) - cy;
            let dist = (dx * dx + dy * dy).sqrt();

            let offset = ((y * width + x) * 4) as usize;

            if dist > glow_extent {
                frame.pixels[offset..offset + 4].fill(0);
                continue;
            }

            // Two-segment gradient: center alpha -> mid stop -> transparent
            let t = dist / glow_extent;
            let alpha = if t < 0.5 {
                lerp(center_alpha, ALPHA_MID, t / 0.5)
            } else {
                lerp(ALPHA_MID, 0.0, (t - 0.5) / 0.5)
            };

            let r = lerp(CENTER_COLOR[0], EDGE_COLOR[0], t);
            let g = lerp(CENTER_COLOR[1], EDGE_COLOR[1], t);
            let b = lerp(CENTER_COLOR[2], EDGE_COLOR[2], t);

            frame.pixels[offset] = (r * 255.0) as u8;
            frame.pixels[offset + 1] = (g * 255.0) as u8;
            frame.pixels[offset + 2] = (b * 255.0) as u8;
            frame.pixels[offset + 3] = (alpha * 255.0) as u8;
        }
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    (b - a).mul_add(t.clamp(0.0, 1.0), a)
}

struct VisualizerInner {
    running: AtomicBool,
    generation: AtomicU64,
    active_loops: AtomicUsize,
    frames_rendered: AtomicU64,
    frame: Mutex<GlowFrame>,
    source: Mutex<Box<dyn AmplitudeSource>>,
}

impl VisualizerInner {
    fn frame_lock(&self) -> MutexGuard<'_, GlowFrame> {
        self.frame.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn source_lock(&self) -> MutexGuard<'_, Box<dyn AmplitudeSource>> {
        self.source.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The continuous rendering loop
///
/// `start()` is idempotent: a second call while running is a no-op. `stop()`
/// defers the final clear by a short grace period; an intervening `start()`
/// cancels the pending clear.
#[derive(Clone)]
pub struct Visualizer {
    inner: Arc<VisualizerInner>,
}

impl Visualizer {
    /// Create a visualizer painting into a frame of the given size
    #[must_use]
    pub fn new(source: Box<dyn AmplitudeSource>, width: u32, height: u32) -> Self {
        Self {
            inner: Arc::new(VisualizerInner {
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                active_loops: AtomicUsize::new(0),
                frames_rendered: AtomicU64::new(0),
                frame: Mutex::new(GlowFrame::new(width, height)),
                source: Mutex::new(source),
            }),
        }
    }

    /// Start the render loop. No-op when already running.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            inner.active_loops.fetch_add(1, Ordering::SeqCst);
            let mut ticker = tokio::time::interval(FRAME_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if !inner.running.load(Ordering::SeqCst)
                    || inner.generation.load(Ordering::SeqCst) != generation
                {
                    break;
                }

                let amplitude = inner.source_lock().sample();
                render_glow(&mut inner.frame_lock(), amplitude);
                inner.frames_rendered.fetch_add(1, Ordering::Relaxed);
            }

            inner.active_loops.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Stop the render loop and schedule a deferred clear
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let generation = self.inner.generation.load(Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            tokio::time::sleep(CLEAR_GRACE).await;
            // Cancelled by any start() since: it bumps the generation
            if !inner.running.load(Ordering::SeqCst)
                && inner.generation.load(Ordering::SeqCst) == generation
            {
                inner.frame_lock().clear();
                tracing::trace!("visualizer frame cleared");
            }
        });
    }

    /// Whether the render loop is active
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the current frame
    #[must_use]
    pub fn frame(&self) -> GlowFrame {
        self.inner.frame_lock().clone()
    }

    /// Total frames rendered since creation
    #[must_use]
    pub fn frames_rendered(&self) -> u64 {
        self.inner.frames_rendered.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn active_loops(&self) -> usize {
        self.inner.active_loops.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ConstAmplitude(f32);

    impl AmplitudeSource for ConstAmplitude {
        fn sample(&mut self) -> f32 {
            self.0
        }
    }

    fn visualizer(amplitude: f32) -> Visualizer {
        Visualizer::new(Box::new(ConstAmplitude(amplitude)), 64, 64)
    }

    #[test]
    fn render_center_is_brighter_than_edge() {
        let mut frame = GlowFrame::new(64, 64);
        render_glow(&mut frame, 0.5);

        let center = frame.pixel(32, 32);
        let corner = frame.pixel(0, 0);
        assert!(center[3] > 0, "center should be lit");
        assert_eq!(corner[3], 0, "corner should be transparent");
    }

    #[test]
    fn render_amplitude_grows_radius_and_opacity() {
        let mut quiet = GlowFrame::new(64, 64);
        let mut loud = GlowFrame::new(64, 64);
        render_glow(&mut quiet, 0.0);
        render_glow(&mut loud, 1.0);

        let lit = |f: &GlowFrame| f.pixels().chunks_exact(4).filter(|px| px[3] > 0).count();
        assert!(lit(&loud) > lit(&quiet), "louder frame should light more pixels");

        let center_quiet = quiet.pixel(32, 32)[3];
        let center_loud = loud.pixel(32, 32)[3];
        assert!(center_loud > center_quiet, "louder frame should glow stronger");
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let vis = visualizer(0.5);
        vis.start();
        vis.start();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(vis.active_loops(), 1, "exactly one render loop must be active");
        assert!(vis.is_running());
        assert!(vis.frames_rendered() > 0);

        vis.stop();
    }

    #[tokio::test]
    async fn stop_clears_after_grace_period() {
        let vis = visualizer(0.8);
        vis.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(vis.frame().is_lit());

        vis.stop();
        assert!(!vis.is_running());
        // Before the grace elapses the last frame remains
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(vis.frame().is_lit());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!vis.frame().is_lit(), "frame should clear after the grace period");
    }

    #[tokio::test]
    async fn restart_cancels_pending_clear() {
        let vis = visualizer(0.8);
        vis.start();
        tokio::time::sleep(Duration::from_millis(100)).await;

        vis.stop();
        vis.start();
        tokio::time::sleep(Duration::from_millis(700)).await;

        assert!(vis.is_running());
        assert!(vis.frame().is_lit(), "restart must cancel the deferred clear");

        vis.stop();
    }
}
