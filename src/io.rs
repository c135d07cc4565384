// The two collaborators the mirror talks to: where frames come from and where they go.
// The library only defines the seams; the binary plugs in a camera and a window.

use thiserror::Error;

use crate::types::PixelBuffer;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Nothing ready this tick; try again next tick.
    #[error("no frame available")]
    NoFrameAvailable,
    /// The stream is gone for good.
    #[error("frame source closed: {0}")]
    SourceClosed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// The surface can't take a frame right now; this one is dropped.
    #[error("surface not ready: {0}")]
    SurfaceNotReady(String),
    /// The surface was closed (e.g. the user closed the window).
    #[error("surface closed")]
    SurfaceClosed,
}

/// Supplies live frames. `next_frame` may block until one is ready.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<PixelBuffer, SourceError>;
}

/// Presents frames on some display surface.
pub trait Renderer {
    fn present(&mut self, frame: &PixelBuffer) -> Result<(), RenderError>;
}

// Lets a session borrow collaborators the caller keeps owning.
impl<T: FrameSource + ?Sized> FrameSource for &mut T {
    fn next_frame(&mut self) -> Result<PixelBuffer, SourceError> {
        (**self).next_frame()
    }
}

impl<T: Renderer + ?Sized> Renderer for &mut T {
    fn present(&mut self, frame: &PixelBuffer) -> Result<(), RenderError> {
        (**self).present(frame)
    }
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn next_frame(&mut self) -> Result<PixelBuffer, SourceError> {
        (**self).next_frame()
    }
}

impl<T: Renderer + ?Sized> Renderer for Box<T> {
    fn present(&mut self, frame: &PixelBuffer) -> Result<(), RenderError> {
        (**self).present(frame)
    }
}
