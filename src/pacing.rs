// Frame pacing: what decides *when* the next tick runs.
// A window refresh callback, a fixed-rate timer and a test closure all fit behind `Pacer`.

use std::thread;
use std::time::{Duration, Instant};

pub trait Pacer {
    /// Block until the next tick should start.
    fn wait(&mut self);
}

/// Any closure can pace a session, e.g. one that stops it after N ticks.
impl<F: FnMut()> Pacer for F {
    fn wait(&mut self) {
        self()
    }
}

/// Ticks as fast as the source and renderer allow (the camera usually blocks anyway).
#[derive(Debug, Default, Clone, Copy)]
pub struct Unpaced;

impl Pacer for Unpaced {
    fn wait(&mut self) {}
}

/// Sleeps to a fixed tick rate. A late tick resets the schedule instead of
/// running a burst of catch-up ticks.
#[derive(Debug, Clone)]
pub struct FixedRate {
    interval: Duration,
    next: Option<Instant>,
}

impl FixedRate {
    pub fn new(fps: u32) -> Self {
        Self {
            interval: Duration::from_secs(1) / fps.max(1),
            next: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Pacer for FixedRate {
    fn wait(&mut self) {
        let now = Instant::now();
        let deadline = match self.next {
            Some(deadline) if deadline > now => {
                thread::sleep(deadline - now);
                deadline
            }
            // First tick starts immediately; a late one starts now.
            _ => now,
        };
        self.next = Some(deadline + self.interval);
    }
}

/// Counts presented frames and reports a rate once per second of wall time.
#[derive(Debug, Clone)]
pub struct FpsCounter {
    window_start: Instant,
    frames: u32,
    last: f32,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self { window_start: Instant::now(), frames: 0, last: 0.0 }
    }

    /// Record one frame. Returns the fresh rate when a full second has elapsed.
    pub fn frame(&mut self) -> Option<f32> {
        self.frames += 1;
        let elapsed = self.window_start.elapsed();
        if elapsed < Duration::from_secs(1) {
            return None;
        }
        self.last = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.window_start = Instant::now();
        Some(self.last)
    }

    /// Most recent rate, 0 until the first second has passed.
    pub fn fps(&self) -> f32 {
        self.last
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}
