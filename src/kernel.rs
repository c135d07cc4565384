// Convolution kernels: a validated, immutable square of weights plus a divisor.
// Kernels arrive as literal data (config file, presets, UI); nothing here derives them.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Weights, stored the cheapest way that still represents them exactly.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Taps {
    Int { weights: Vec<i32>, divisor: i32 },
    Float { weights: Vec<f64>, divisor: f64 },
}

/// Odd-sided square kernel, row-major. Entry (ky, kx) is the weight for
/// offset (dx, dy) = (kx - r, ky - r).
#[derive(Clone, Debug, PartialEq)]
pub struct Kernel {
    radius: usize,
    taps: Taps,
}

impl Kernel {
    /// Largest radius accepted (a 65x65 footprint).
    pub const MAX_RADIUS: usize = 32;

    /// Integer kernel. The weight count must be exactly (2 * radius + 1)^2.
    pub fn new(weights: Vec<i32>, radius: i32, divisor: i32) -> Result<Self> {
        let radius = check_radius(radius, weights.len())?;
        if divisor == 0 {
            return Err(Error::InvalidKernel("divisor must be non-zero".into()));
        }
        Ok(Self { radius, taps: Taps::Int { weights, divisor } })
    }

    /// Floating-point kernel. Weights and divisor must be finite, and a full-white
    /// footprint (255 under every weight, in any sign mix) must stay finite too.
    pub fn from_floats(weights: Vec<f64>, radius: i32, divisor: f64) -> Result<Self> {
        let radius = check_radius(radius, weights.len())?;
        if divisor == 0.0 {
            return Err(Error::InvalidKernel("divisor must be non-zero".into()));
        }
        if !divisor.is_finite() || weights.iter().any(|w| !w.is_finite()) {
            return Err(Error::InvalidKernel("weights and divisor must be finite".into()));
        }
        // Bounds every partial sum the engine can form.
        let worst = weights.iter().map(|w| w.abs()).sum::<f64>() * 255.0;
        if !worst.is_finite() {
            return Err(Error::InvalidKernel("weights are too large to accumulate".into()));
        }
        Ok(Self { radius, taps: Taps::Float { weights, divisor } })
    }

    /// Integer kernel from a side length. The side is checked, not trusted:
    /// it must be odd and agree with the weight count.
    pub fn from_side(weights: Vec<i32>, side: usize, divisor: i32) -> Result<Self> {
        if side % 2 == 0 {
            return Err(Error::InvalidKernel(format!("side {side} is not odd")));
        }
        let radius = i32::try_from((side - 1) / 2)
            .map_err(|_| Error::InvalidKernel(format!("side {side} is too large")))?;
        Self::new(weights, radius, divisor)
    }

    /// 1x1 kernel of weight 1, divisor 1: leaves RGB untouched.
    pub fn identity() -> Self {
        Self { radius: 0, taps: Taps::Int { weights: vec![1], divisor: 1 } }
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    /// 2r + 1.
    pub fn side(&self) -> usize {
        2 * self.radius + 1
    }

    pub fn divisor(&self) -> f64 {
        match &self.taps {
            Taps::Int { divisor, .. } => *divisor as f64,
            Taps::Float { divisor, .. } => *divisor,
        }
    }

    /// Weight at offset (dx, dy), both in [-r, r]. None outside the footprint.
    pub fn weight(&self, dx: i32, dy: i32) -> Option<f64> {
        let r = self.radius as i64;
        let (dx, dy) = (dx as i64, dy as i64);
        if dx.abs() > r || dy.abs() > r {
            return None;
        }
        let i = ((dy + r) * self.side() as i64 + (dx + r)) as usize;
        Some(match &self.taps {
            Taps::Int { weights, .. } => weights[i] as f64,
            Taps::Float { weights, .. } => weights[i],
        })
    }

    pub fn weight_sum(&self) -> f64 {
        match &self.taps {
            Taps::Int { weights, .. } => weights.iter().map(|&w| w as f64).sum(),
            Taps::Float { weights, .. } => weights.iter().sum(),
        }
    }

    /// True when weights and divisor are stored as integers (exact i64 accumulation).
    pub fn is_integral(&self) -> bool {
        matches!(self.taps, Taps::Int { .. })
    }

    /// The shared weight of an integer kernel whose weights are all equal.
    /// Such kernels are separable, and the engine takes a box-sum path for them.
    pub fn uniform_weight(&self) -> Option<i32> {
        match &self.taps {
            Taps::Int { weights, .. } => {
                let first = *weights.first()?;
                weights.iter().all(|&w| w == first).then_some(first)
            }
            Taps::Float { .. } => None,
        }
    }

    pub(crate) fn taps(&self) -> &Taps {
        &self.taps
    }
}

fn check_radius(radius: i32, count: usize) -> Result<usize> {
    if radius < 0 {
        return Err(Error::InvalidKernel(format!("radius {radius} is negative")));
    }
    let radius = radius as usize;
    if radius > Kernel::MAX_RADIUS {
        return Err(Error::InvalidKernel(format!(
            "radius {radius} exceeds the maximum of {}",
            Kernel::MAX_RADIUS
        )));
    }
    let side = 2 * radius + 1;
    if count != side * side {
        return Err(Error::InvalidKernel(format!(
            "radius {radius} needs {} weights, got {count}",
            side * side
        )));
    }
    Ok(radius)
}

/// Kernel as literal configuration: an ordered weight list, a radius and a divisor.
///
/// ```toml
/// weights = [3, 14, 3, 14, 100, 14, 3, 14, 3]
/// radius = 1
/// divisor = 7
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KernelConfig {
    pub weights: Vec<f64>,
    pub radius: i32,
    pub divisor: f64,
}

impl KernelConfig {
    /// Validate and build. Integer storage is picked whenever every weight and the
    /// divisor are whole numbers that fit in i32; otherwise the f64 values are kept as written.
    pub fn build(&self) -> Result<Kernel> {
        let integral = |v: f64| v.fract() == 0.0 && v.abs() <= i32::MAX as f64;
        if self.weights.iter().copied().all(integral) && integral(self.divisor) {
            let weights = self.weights.iter().map(|&w| w as i32).collect();
            Kernel::new(weights, self.radius, self.divisor as i32)
        } else {
            Kernel::from_floats(self.weights.clone(), self.radius, self.divisor)
        }
    }
}
