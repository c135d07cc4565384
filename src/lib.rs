//! Convoluted Mirror: live camera frames run through a 2D convolution kernel and
//! presented back, frame by frame.
//!
//! The pieces, leaves first:
//!
//! - [`PixelBuffer`]: an immutable RGBA frame.
//! - [`Kernel`]: a validated odd-sided weight matrix plus divisor ([`KernelConfig`] is its
//!   literal form, [`presets`] has named ones).
//! - [`ConvolutionEngine`]: `apply(frame, kernel) -> frame`, clamp-to-edge, alpha untouched.
//! - [`FrameSource`] / [`Renderer`]: where frames come from and go to.
//! - [`MirrorSession`]: the Idle/Running/Stopped tick loop, with a hot-swappable kernel.
//!
//! ```
//! use convoluted_mirror::{ConvolutionEngine, Kernel, PixelBuffer};
//!
//! let frame = PixelBuffer::filled(4, 4, [10, 10, 10, 255]);
//! let blur = Kernel::new(vec![1; 9], 1, 9).unwrap();
//! let out = ConvolutionEngine::new().apply(&frame, &blur).unwrap();
//! assert_eq!(out, frame);
//! ```

pub mod config;
pub mod convolve;
pub mod delta;
pub mod error;
pub mod io;
pub mod kernel;
pub mod logging;
pub mod pacing;
pub mod presets;
pub mod session;
pub mod types;

pub use convolve::{ChannelMask, ConvolutionEngine, EngineOptions};
pub use delta::MotionDelta;
pub use error::{Error, Result};
pub use io::{FrameSource, RenderError, Renderer, SourceError};
pub use kernel::{Kernel, KernelConfig};
pub use pacing::{FixedRate, FpsCounter, Pacer, Unpaced};
pub use session::{MirrorSession, SessionError, SessionHandle, SessionReport, SessionState, SkipReason, TickOutcome};
pub use types::PixelBuffer;
