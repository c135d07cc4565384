// The convolution engine: applies a Kernel to a whole frame and returns a new frame.
//
// Per output pixel and per RGB channel:
//   acc    = sum over the (2r+1)^2 footprint of weight * source sample
//   result = clamp(round(acc / divisor), 0, 255)
// Samples outside the frame are clamped to the nearest edge pixel (no dark borders).
// Alpha is copied from the source pixel, never convolved.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::kernel::{Kernel, Taps};
use crate::types::{CHANNELS, PixelBuffer};

/// Which RGB channels survive filtering: bit 1 = R, 2 = G, 4 = B.
/// A masked-off channel is written as 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelMask(u8);

impl ChannelMask {
    pub const R: Self = Self(0b001);
    pub const G: Self = Self(0b010);
    pub const B: Self = Self(0b100);
    pub const RGB: Self = Self(0b111);

    /// Bits above the low three are ignored.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & 0b111)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// `channel` is 0 (R), 1 (G) or 2 (B).
    #[inline]
    pub fn contains(self, channel: usize) -> bool {
        (self.0 >> channel) & 1 == 1
    }
}

impl Default for ChannelMask {
    fn default() -> Self {
        Self::RGB
    }
}

impl std::ops::BitOr for ChannelMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineOptions {
    pub channels: ChannelMask,
    /// Take |acc / divisor| before clamping, so negative edge responses show up
    /// instead of clamping to black.
    pub rectify: bool,
    /// Split output rows across the rayon pool.
    pub parallel: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { channels: ChannelMask::RGB, rectify: false, parallel: true }
    }
}

/// Stateless apart from its options; one engine can serve any number of frames and kernels.
#[derive(Clone, Debug, Default)]
pub struct ConvolutionEngine {
    options: EngineOptions,
}

impl ConvolutionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: EngineOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// Convolve `source` with `kernel` into a fresh buffer of the same size.
    /// Fails with `DimensionMismatch` on a zero-sized frame; `source` is never touched.
    pub fn apply(&self, source: &PixelBuffer, kernel: &Kernel) -> Result<PixelBuffer> {
        if source.is_empty() {
            return Err(Error::DimensionMismatch {
                width: source.width(),
                height: source.height(),
            });
        }

        let mut out = vec![0u8; source.as_bytes().len()];
        match kernel.taps() {
            Taps::Int { weights, divisor } => match kernel.uniform_weight() {
                Some(weight) if kernel.radius() > 0 => {
                    self.box_sum(source, kernel.radius(), weight, *divisor, &mut out)
                }
                _ => self.run(&Pass::new(source, weights.as_slice(), *divisor, kernel.radius(), self.options), &mut out),
            },
            Taps::Float { weights, divisor } => {
                self.run(&Pass::new(source, weights.as_slice(), *divisor, kernel.radius(), self.options), &mut out)
            }
        }

        PixelBuffer::new(source.width(), source.height(), out)
    }

    /// General path: every tap visited for every pixel.
    fn run<W: Weight>(&self, pass: &Pass<'_, W>, out: &mut [u8]) {
        let side = 2 * pass.radius + 1;
        // Literal sides let the optimizer unroll the tap loops for the common sizes.
        let row = |(y, row_out): (usize, &mut [u8])| match side {
            1 => convolve_row(pass, 1, y, row_out),
            3 => convolve_row(pass, 3, y, row_out),
            5 => convolve_row(pass, 5, y, row_out),
            7 => convolve_row(pass, 7, y, row_out),
            9 => convolve_row(pass, 9, y, row_out),
            _ => convolve_row(pass, side, y, row_out),
        };
        self.for_each_row(out, pass.src.stride(), row);
    }

    /// Separable path for kernels whose weights are all equal: a sliding-window
    /// horizontal sum per row, then a vertical sum of those per output pixel.
    /// Exact integer arithmetic, so it matches `run` bit for bit.
    fn box_sum(&self, src: &PixelBuffer, radius: usize, weight: i32, divisor: i32, out: &mut [u8]) {
        let w = src.width();
        let h = src.height();
        let r = radius;

        /* ---- Pass 1: horizontal window sums, 3 channels per pixel ---- */
        let mut rows = vec![0u32; w * h * 3];
        self.for_each_row(&mut rows, w * 3, |(y, sums): (usize, &mut [u32])| {
            let line = src.row(y);
            let at = |x: usize, c: usize| line[x * CHANNELS + c] as u32;

            for c in 0..3 {
                // Edge pixel x=0 repeats r+1 times (left clamp), then prime the right side.
                let mut s = at(0, c) * (r as u32 + 1);
                for x in 1..=r {
                    s += at(x.min(w - 1), c);
                }
                for x in 0..w {
                    sums[x * 3 + c] = s;
                    let left = x.saturating_sub(r);
                    let right = (x + r + 1).min(w - 1);
                    s = s + at(right, c) - at(left, c);
                }
            }
        });

        /* ---- Pass 2: vertical sums of the row sums, straight into the output ---- */
        let options = self.options;
        self.for_each_row(out, src.stride(), |(y, row_out): (usize, &mut [u8])| {
            let alpha = src.row(y);
            for x in 0..w {
                let mut s = [0u32; 3];
                for ky in 0..(2 * r + 1) {
                    let sy = (y + ky).saturating_sub(r).min(h - 1);
                    let i = (sy * w + x) * 3;
                    s[0] += rows[i];
                    s[1] += rows[i + 1];
                    s[2] += rows[i + 2];
                }
                let o = x * CHANNELS;
                for c in 0..3 {
                    row_out[o + c] = if options.channels.contains(c) {
                        i32::resolve(s[c] as i64 * weight as i64, divisor, options.rectify)
                    } else {
                        0
                    };
                }
                row_out[o + 3] = alpha[o + 3];
            }
        });
    }

    /// Hand each `stride`-long row of `buf` to `f`, in parallel when enabled.
    /// Rows are disjoint, so workers need no synchronization beyond the final join.
    fn for_each_row<T, F>(&self, buf: &mut [T], stride: usize, f: F)
    where
        T: Send,
        F: Fn((usize, &mut [T])) + Send + Sync,
    {
        if self.options.parallel {
            buf.par_chunks_mut(stride).enumerate().for_each(f);
        } else {
            buf.chunks_mut(stride).enumerate().for_each(f);
        }
    }
}

/// Everything one row of the general path needs.
struct Pass<'a, W> {
    src: &'a PixelBuffer,
    taps: &'a [W],
    divisor: W,
    radius: usize,
    options: EngineOptions,
}

impl<'a, W: Weight> Pass<'a, W> {
    fn new(src: &'a PixelBuffer, taps: &'a [W], divisor: W, radius: usize, options: EngineOptions) -> Self {
        Self { src, taps, divisor, radius, options }
    }
}

#[inline(always)]
fn convolve_row<W: Weight>(pass: &Pass<'_, W>, side: usize, y: usize, row_out: &mut [u8]) {
    let w = pass.src.width();
    let h = pass.src.height();
    let r = pass.radius;

    // Source rows under the footprint, clamped at the top and bottom edges.
    let lines: Vec<&[u8]> = (0..side)
        .map(|ky| pass.src.row((y + ky).saturating_sub(r).min(h - 1)))
        .collect();

    for x in 0..w {
        let mut acc = [W::ZERO; 3];

        if x >= r && x + r < w {
            // Interior: the footprint is one contiguous run of each line.
            let base = (x - r) * CHANNELS;
            for (line, taps) in lines.iter().zip(pass.taps.chunks_exact(side)) {
                let window = &line[base..base + side * CHANNELS];
                for (px, &wt) in window.chunks_exact(CHANNELS).zip(taps) {
                    acc[0] = W::mac(acc[0], wt, px[0]);
                    acc[1] = W::mac(acc[1], wt, px[1]);
                    acc[2] = W::mac(acc[2], wt, px[2]);
                }
            }
        } else {
            // Left/right border: clamp every column.
            for (line, taps) in lines.iter().zip(pass.taps.chunks_exact(side)) {
                for (kx, &wt) in taps.iter().enumerate() {
                    let sx = (x + kx).saturating_sub(r).min(w - 1) * CHANNELS;
                    acc[0] = W::mac(acc[0], wt, line[sx]);
                    acc[1] = W::mac(acc[1], wt, line[sx + 1]);
                    acc[2] = W::mac(acc[2], wt, line[sx + 2]);
                }
            }
        }

        let o = x * CHANNELS;
        for c in 0..3 {
            row_out[o + c] = if pass.options.channels.contains(c) {
                W::resolve(acc[c], pass.divisor, pass.options.rectify)
            } else {
                0
            };
        }
        // lines[r] is row y itself.
        row_out[o + 3] = lines[r][o + 3];
    }
}

/// A kernel weight type and the accumulator it sums into.
trait Weight: Copy + Send + Sync {
    type Acc: Copy;
    const ZERO: Self::Acc;

    fn mac(acc: Self::Acc, weight: Self, sample: u8) -> Self::Acc;

    /// Divide, round to nearest, optionally rectify, saturate to a channel value.
    fn resolve(acc: Self::Acc, divisor: Self, rectify: bool) -> u8;
}

impl Weight for i32 {
    // 255 * i32::MAX * 65^2 still fits.
    type Acc = i64;
    const ZERO: i64 = 0;

    #[inline(always)]
    fn mac(acc: i64, weight: i32, sample: u8) -> i64 {
        acc + weight as i64 * sample as i64
    }

    #[inline(always)]
    fn resolve(acc: i64, divisor: i32, rectify: bool) -> u8 {
        let q = div_round(acc, divisor as i64);
        let q = if rectify { q.abs() } else { q };
        q.clamp(0, 255) as u8
    }
}

// Kernel::from_floats bounds sum(|w|) * 255, so no partial sum reaches infinity.
impl Weight for f64 {
    type Acc = f64;
    const ZERO: f64 = 0.0;

    #[inline(always)]
    fn mac(acc: f64, weight: f64, sample: u8) -> f64 {
        acc + weight * sample as f64
    }

    #[inline(always)]
    fn resolve(acc: f64, divisor: f64, rectify: bool) -> u8 {
        let q = (acc / divisor).round();
        let q = if rectify { q.abs() } else { q };
        q.clamp(0.0, 255.0) as u8
    }
}

/// Integer division rounding half away from zero (same as `f64::round`). `d != 0`.
#[inline(always)]
fn div_round(n: i64, d: i64) -> i64 {
    let (n, d) = if d < 0 { (-n, -d) } else { (n, d) };
    if n >= 0 { (n + d / 2) / d } else { -((-n + d / 2) / d) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets;

    /// Deterministic xorshift noise so failures reproduce.
    fn noise_frame(w: usize, h: usize, seed: u32) -> PixelBuffer {
        let mut s = seed | 1;
        let data = (0..w * h * CHANNELS)
            .map(|_| {
                s ^= s << 13;
                s ^= s >> 17;
                s ^= s << 5;
                (s >> 24) as u8
            })
            .collect();
        PixelBuffer::new(w, h, data).unwrap()
    }

    fn noise_weights(n: usize, seed: u32) -> Vec<i32> {
        let mut s = seed | 1;
        (0..n)
            .map(|_| {
                s ^= s << 13;
                s ^= s >> 17;
                s ^= s << 5;
                (s % 41) as i32 - 20
            })
            .collect()
    }

    /// The formula, spelled out with no fast paths.
    fn reference(src: &PixelBuffer, k: &Kernel) -> PixelBuffer {
        let (w, h) = (src.width() as i64, src.height() as i64);
        let r = k.radius() as i64;
        let mut out = Vec::with_capacity(src.as_bytes().len());
        for y in 0..h {
            for x in 0..w {
                let mut acc = [0.0f64; 3];
                for dy in -r..=r {
                    for dx in -r..=r {
                        let sx = (x + dx).clamp(0, w - 1) as usize;
                        let sy = (y + dy).clamp(0, h - 1) as usize;
                        let px = src.pixel(sx, sy);
                        let wt = k.weight(dx as i32, dy as i32).unwrap();
                        for c in 0..3 {
                            acc[c] += wt * px[c] as f64;
                        }
                    }
                }
                for a in acc {
                    out.push((a / k.divisor()).round().clamp(0.0, 255.0) as u8);
                }
                out.push(src.pixel(x as usize, y as usize)[3]);
            }
        }
        PixelBuffer::new(src.width(), src.height(), out).unwrap()
    }

    fn serial() -> ConvolutionEngine {
        ConvolutionEngine::with_options(EngineOptions { parallel: false, ..Default::default() })
    }

    #[test]
    fn div_round_is_half_away_from_zero() {
        assert_eq!(div_round(5, 2), 3);
        assert_eq!(div_round(-5, 2), -3);
        assert_eq!(div_round(7, -2), -4);
        assert_eq!(div_round(2, 5), 0);
        assert_eq!(div_round(3, 5), 1);
        assert_eq!(div_round(-3, 5), -1);
    }

    #[test]
    fn preserves_dimensions() {
        let engine = ConvolutionEngine::new();
        for (w, h) in [(1, 1), (2, 5), (13, 9), (64, 3)] {
            let src = noise_frame(w, h, 7);
            for name in presets::names() {
                let k = presets::by_name(name).unwrap();
                let out = engine.apply(&src, &k).unwrap();
                assert_eq!((out.width(), out.height()), (w, h), "{name} on {w}x{h}");
            }
        }
    }

    #[test]
    fn identity_is_a_no_op() {
        let src = noise_frame(17, 11, 99);
        let out = ConvolutionEngine::new().apply(&src, &Kernel::identity()).unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn alpha_is_copied_not_convolved() {
        let src = noise_frame(9, 9, 3);
        let k = presets::by_name("laplacian3").unwrap();
        let out = ConvolutionEngine::new().apply(&src, &k).unwrap();
        for (a, b) in out.as_bytes().chunks_exact(4).zip(src.as_bytes().chunks_exact(4)) {
            assert_eq!(a[3], b[3]);
        }
    }

    #[test]
    fn normalized_kernels_keep_flat_color() {
        let c = [200, 37, 128, 255];
        let src = PixelBuffer::filled(12, 8, c);
        let kernels = [
            presets::by_name("box3").unwrap(),
            presets::by_name("cross5").unwrap(),
            Kernel::new(vec![0, -1, 0, -1, 5, -1, 0, -1, 0], 1, 1).unwrap(),
            Kernel::from_floats(vec![0.25; 9], 1, 2.25).unwrap(),
            Kernel::new(vec![3; 49], 3, 147).unwrap(),
        ];
        let engine = ConvolutionEngine::new();
        for k in &kernels {
            let out = engine.apply(&src, k).unwrap();
            for px in out.as_bytes().chunks_exact(4) {
                for ch in 0..3 {
                    assert!((px[ch] as i32 - c[ch] as i32).abs() <= 1, "{k:?} gave {px:?}");
                }
                assert_eq!(px[3], 255);
            }
        }
    }

    #[test]
    fn single_pixel_replicates_across_footprint() {
        let p = [40, 3, 90, 128];
        let src = PixelBuffer::filled(1, 1, p);
        let k = Kernel::new(vec![1, 2, 1, 2, 4, 2, 1, 2, 1], 1, 8).unwrap();
        // Weight sum 16 over divisor 8: every channel doubles (then saturates).
        let out = ConvolutionEngine::new().apply(&src, &k).unwrap();
        assert_eq!(out.pixel(0, 0), [80, 6, 180, 128]);
    }

    #[test]
    fn centered_delta_on_flat_image() {
        let src = PixelBuffer::filled(3, 3, [10, 10, 10, 255]);
        let k = Kernel::new(vec![0, 0, 0, 0, 1, 0, 0, 0, 0], 1, 1).unwrap();
        assert_eq!(ConvolutionEngine::new().apply(&src, &k).unwrap(), src);
    }

    #[test]
    fn cross_kernel_spreads_a_red_dot() {
        let mut data = PixelBuffer::filled(3, 3, [0, 0, 0, 255]).into_vec();
        data[4 * 4] = 255;
        let src = PixelBuffer::new(3, 3, data).unwrap();
        let k = Kernel::new(vec![0, 1, 0, 1, 1, 1, 0, 1, 0], 1, 5).unwrap();
        let out = ConvolutionEngine::new().apply(&src, &k).unwrap();

        assert_eq!(out.pixel(1, 1), [51, 0, 0, 255]);
        // Edge-adjacent pixels see the dot once: 255 / 5.
        assert_eq!(out.pixel(1, 0)[0], 51);
        assert_eq!(out.pixel(0, 1)[0], 51);
        // Corners never reach it.
        for (x, y) in [(0, 0), (2, 0), (0, 2), (2, 2)] {
            assert_eq!(out.pixel(x, y), [0, 0, 0, 255]);
        }
    }

    #[test]
    fn fast_paths_match_reference() {
        for (i, radius) in [0usize, 1, 2, 3, 4, 5].into_iter().enumerate() {
            let side = 2 * radius + 1;
            let weights = noise_weights(side * side, 11 + i as u32);
            let divisor = 1 + (i as i32 * 7) % 13;
            let k = Kernel::new(weights, radius as i32, divisor).unwrap();
            for (w, h) in [(13, 9), (4, 3), (1, 6)] {
                let src = noise_frame(w, h, 5 + i as u32);
                let want = reference(&src, &k);
                assert_eq!(serial().apply(&src, &k).unwrap(), want, "serial r={radius} {w}x{h}");
                assert_eq!(ConvolutionEngine::new().apply(&src, &k).unwrap(), want, "parallel r={radius} {w}x{h}");
            }
        }
    }

    #[test]
    fn box_path_matches_reference() {
        for (radius, weight, divisor) in [(1, 1, 9), (2, 3, 75), (3, 1, 40), (4, -2, -81)] {
            let side = 2 * radius + 1;
            let k = Kernel::new(vec![weight; (side * side) as usize], radius, divisor).unwrap();
            assert!(k.uniform_weight().is_some());
            for (w, h) in [(16, 10), (3, 2)] {
                let src = noise_frame(w, h, radius as u32 + 40);
                assert_eq!(serial().apply(&src, &k).unwrap(), reference(&src, &k), "r={radius} {w}x{h}");
            }
        }
    }

    #[test]
    fn float_kernels_match_reference() {
        let weights: Vec<f64> = noise_weights(25, 77).into_iter().map(|w| w as f64 * 0.37).collect();
        let k = Kernel::from_floats(weights, 2, 3.1).unwrap();
        let src = noise_frame(10, 7, 21);
        assert_eq!(serial().apply(&src, &k).unwrap(), reference(&src, &k));
        assert_eq!(ConvolutionEngine::new().apply(&src, &k).unwrap(), reference(&src, &k));
    }

    #[test]
    fn extreme_float_weights_do_not_overflow() {
        let src = PixelBuffer::filled(4, 4, [10, 10, 10, 255]);
        let k = Kernel::from_floats(vec![0.0, 0.0, 0.0, 0.0, 2e38, -1e38, 0.0, 0.0, 0.0], 1, 1e38).unwrap();
        let out = ConvolutionEngine::new().apply(&src, &k).unwrap();
        for px in out.as_bytes().chunks_exact(4) {
            assert_eq!(px, [10, 10, 10, 255]);
        }
    }

    #[test]
    fn float_literals_are_not_rounded_before_use() {
        // 16777217 - 16777216 + 0.5 = 1.5 per unit sample, which rounds to 2.
        let k = crate::kernel::KernelConfig {
            weights: vec![16_777_217.0, -16_777_216.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 0.0],
            radius: 1,
            divisor: 1.0,
        }
        .build()
        .unwrap();
        let src = PixelBuffer::filled(3, 3, [1, 1, 1, 255]);
        let out = ConvolutionEngine::new().apply(&src, &k).unwrap();
        assert_eq!(out.pixel(1, 1), [2, 2, 2, 255]);
    }

    #[test]
    fn saturates_instead_of_wrapping() {
        let src = PixelBuffer::filled(4, 4, [200, 10, 0, 255]);
        let k = Kernel::new(vec![2], 0, 1).unwrap();
        let out = ConvolutionEngine::new().apply(&src, &k).unwrap();
        assert_eq!(out.pixel(2, 2), [255, 20, 0, 255]);

        let k = Kernel::new(vec![-1], 0, 1).unwrap();
        let out = ConvolutionEngine::new().apply(&src, &k).unwrap();
        assert_eq!(out.pixel(2, 2), [0, 0, 0, 255]);
    }

    #[test]
    fn rectify_shows_negative_responses() {
        let src = PixelBuffer::filled(3, 3, [10, 20, 30, 255]);
        let k = Kernel::new(vec![-2], 0, 1).unwrap();
        let engine = ConvolutionEngine::with_options(EngineOptions { rectify: true, ..Default::default() });
        assert_eq!(engine.apply(&src, &k).unwrap().pixel(1, 1), [20, 40, 60, 255]);
    }

    #[test]
    fn channel_mask_blanks_disabled_channels() {
        let src = PixelBuffer::filled(5, 5, [10, 20, 30, 255]);
        let engine = ConvolutionEngine::with_options(EngineOptions {
            channels: ChannelMask::R | ChannelMask::B,
            ..Default::default()
        });
        let out = engine.apply(&src, &presets::by_name("box3").unwrap()).unwrap();
        assert_eq!(out.pixel(2, 2), [10, 0, 30, 255]);
        assert_eq!(ChannelMask::from_bits(0xff), ChannelMask::RGB);
    }

    #[test]
    fn zero_sized_frames_are_rejected() {
        let src = PixelBuffer::new(0, 3, Vec::new()).unwrap();
        let err = ConvolutionEngine::new().apply(&src, &Kernel::identity()).unwrap_err();
        assert_eq!(err, Error::DimensionMismatch { width: 0, height: 3 });
    }
}
