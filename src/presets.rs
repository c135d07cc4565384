// Named kernels the mirror ships with. Pick one with `--preset` or `preset = "..."`.

use crate::kernel::Kernel;

struct Preset {
    name: &'static str,
    radius: i32,
    divisor: i32,
    weights: &'static [i32],
}

#[rustfmt::skip]
const PRESETS: &[Preset] = &[
    Preset { name: "identity", radius: 0, divisor: 1, weights: &[1] },
    // Bright bloom; the weights sum well past the divisor so highlights saturate.
    Preset { name: "glow", radius: 1, divisor: 7, weights: &[
        3, 14, 3,
        14, 100, 14,
        3, 14, 3,
    ]},
    Preset { name: "box3", radius: 1, divisor: 9, weights: &[1; 9] },
    Preset { name: "laplacian3", radius: 1, divisor: 1, weights: &[
        1, -2, 1,
        -2, 4, -2,
        1, -2, 1,
    ]},
    Preset { name: "cross5", radius: 2, divisor: 48, weights: &[
        1, 1, 2, 1, 1,
        1, 1, 4, 1, 1,
        4, 4, 4, 4, 4,
        1, 1, 4, 1, 1,
        1, 1, 2, 1, 1,
    ]},
    // Laplacian of Gaussian; pair with `rectify = true` to see both edge polarities.
    Preset { name: "log5", radius: 2, divisor: 1, weights: &[
        1, 4, 6, 4, 1,
        4, 16, 24, 16, 4,
        6, 24, -476, 24, 6,
        4, 16, 24, 16, 4,
        1, 4, 6, 4, 1,
    ]},
    Preset { name: "sharpen7", radius: 3, divisor: 1, weights: &[
        1, 1, 1, 1, 1, 1, 1,
        1, 1, 1, 1, 1, 1, 1,
        1, 1, 1, 1, 1, 1, 1,
        1, 1, 1, -270, 1, 1, 1,
        1, 1, 1, 1, 1, 1, 1,
        1, 1, 1, 1, 1, 1, 1,
        1, 1, 1, 1, 1, 1, 1,
    ]},
    Preset { name: "ripple7", radius: 3, divisor: 7, weights: &[
        1, 1, -4, -5, -4, 1, 1,
        1, -5, 8, 14, 8, -5, 1,
        -4, 8, -6, -37, -6, 8, -4,
        -5, 14, -37, 100, -37, 14, -5,
        -4, 8, -6, -37, -6, 8, -4,
        1, -5, 8, 14, 8, -5, 1,
        1, 1, -4, -5, -4, 1, 1,
    ]},
    Preset { name: "ripple9", radius: 4, divisor: 7, weights: &[
        -6, -8, 8, -12, 14, -12, 8, -8, -6,
        -8, 10, 3, 3, -22, 3, 3, 10, -8,
        8, 3, -3, 30, 37, 30, -3, 3, 8,
        -12, 3, 30, -32, -61, -32, 30, 3, -12,
        14, -22, 37, -61, 100, -61, 37, -22, 14,
        -12, 3, 30, -32, -61, -32, 30, 3, -12,
        8, 3, -3, 30, 37, 30, -3, 3, 8,
        -8, 10, 3, 3, -22, 3, 3, 10, -8,
        -6, -8, 8, -12, 14, -12, 8, -8, -6,
    ]},
];

/// Look up a preset by name (case-insensitive).
pub fn by_name(name: &str) -> Option<Kernel> {
    let p = PRESETS.iter().find(|p| p.name.eq_ignore_ascii_case(name))?;
    // Preset tables are checked by the test below, so this only fails on a typo there.
    Kernel::new(p.weights.to_vec(), p.radius, p.divisor).ok()
}

pub fn names() -> impl Iterator<Item = &'static str> {
    PRESETS.iter().map(|p| p.name)
}
