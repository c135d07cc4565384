// Motion delta: replaces each frame with its per-channel difference from the previous one.
// Still parts of the scene go black; only movement above the threshold lights up.

use crate::types::{CHANNELS, PixelBuffer};

/// Differences above this are treated as sensor flicker, not motion.
const MAX_DELTA: u8 = 250;

pub struct MotionDelta {
    threshold: u8,
    previous: Option<PixelBuffer>,
}

impl MotionDelta {
    /// `threshold` is the smallest per-channel difference that counts as motion.
    pub fn new(threshold: u8) -> Self {
        Self { threshold, previous: None }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Difference `frame` against the last frame seen, then remember `frame`.
    ///
    /// The first frame, and the first after a size change, has nothing to compare
    /// against and comes out opaque black.
    pub fn apply(&mut self, frame: PixelBuffer) -> PixelBuffer {
        let out = match &self.previous {
            Some(prev) if prev.width() == frame.width() && prev.height() == frame.height() => {
                self.diff(&frame, prev)
            }
            _ => PixelBuffer::filled(frame.width(), frame.height(), [0, 0, 0, 255]),
        };
        self.previous = Some(frame);
        out
    }

    /// Forget the retained frame.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    fn diff(&self, cur: &PixelBuffer, prev: &PixelBuffer) -> PixelBuffer {
        let keep = |d: u8| if d < self.threshold || d > MAX_DELTA { 0 } else { d };

        let mut data = Vec::with_capacity(cur.as_bytes().len());
        for (a, b) in cur.as_bytes().chunks_exact(CHANNELS).zip(prev.as_bytes().chunks_exact(CHANNELS)) {
            // Only pixels opaque in both frames carry a meaningful difference.
            if a[3] == 255 && b[3] == 255 {
                data.extend_from_slice(&[
                    keep(a[0].abs_diff(b[0])),
                    keep(a[1].abs_diff(b[1])),
                    keep(a[2].abs_diff(b[2])),
                    255,
                ]);
            } else {
                data.extend_from_slice(&[0, 0, 0, 0]);
            }
        }
        // One output pixel per input pixel: same shape as `cur`.
        PixelBuffer::from_parts(cur.width(), cur.height(), data)
    }
}
