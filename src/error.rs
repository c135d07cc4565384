// Error taxonomy for the filter core.
// Every variant states *what* is wrong with the input, so callers can decide
// whether to reject a configuration or just skip one frame.
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Malformed weight count, zero/non-finite divisor, negative or oversized radius.
    #[error("invalid kernel: {0}")]
    InvalidKernel(String),

    /// The engine was handed a frame with no pixels in it.
    #[error("cannot convolve a {width}x{height} frame")]
    DimensionMismatch { width: usize, height: usize },

    /// Raw bytes don't add up to width * height * 4.
    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    BufferLength { expected: usize, actual: usize },

    /// width * height * 4 doesn't fit in usize.
    #[error("a {width}x{height} frame is too large to address")]
    Overflow { width: usize, height: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
