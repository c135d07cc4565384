// Opens a camera and hands out RGBA frames for the mirror session.
// Visual expectation: every `next_frame()` is one fresh image from the webcam.

use anyhow::Context;
use convoluted_mirror::{FrameSource, PixelBuffer, SourceError};
use tracing::{debug, warn};

// Bring in nokhwa types for camera control.
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    utils::{
        CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
    },
};

/// Consecutive failed grabs (about a second at 30 FPS) before we try reopening the stream.
const MAX_FETCH_FAILURES: u32 = 30;

// A small wrapper around nokhwa::Camera so the session only sees PixelBuffers.
pub struct CameraCapture {
    cam: Camera,
    width: u32,
    height: u32,
    failures: u32,
}

impl CameraCapture {
    /// Open camera `index` near the requested resolution and frame rate.
    /// The driver may pick something slightly different; see `resolution()`.
    pub fn new(index: u32, width: u32, height: u32, fps: u32) -> anyhow::Result<Self> {
        let fmt = CameraFormat::new(
            Resolution::new(width, height),
            FrameFormat::YUYV, // uncompressed; cheap to convert to RGB
            fps,
        );
        let req = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(fmt));

        let mut cam = Camera::new(CameraIndex::Index(index), req)
            .with_context(|| format!("create camera {index}"))?;
        cam.open_stream().context("open camera stream")?;

        let actual = cam.resolution();
        Ok(Self {
            cam,
            width: actual.width(),
            height: actual.height(),
            failures: 0,
        })
    }

    /// Report the actual resolution the camera is delivering.
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn grab(&mut self) -> Result<PixelBuffer, String> {
        // Blocks until the driver has a new frame.
        let frame = self.cam.frame().map_err(|e| format!("fetch frame: {e}"))?;
        let rgb = frame
            .decode_image::<RgbFormat>()
            .map_err(|e| format!("decode RGB: {e}"))?;
        let (w, h) = rgb.dimensions();
        PixelBuffer::from_rgb(w as usize, h as usize, rgb.as_raw()).map_err(|e| e.to_string())
    }

    /// A run of failures: restart the stream once, give up if that fails.
    fn recover(&mut self) -> Result<(), SourceError> {
        warn!(failures = self.failures, "camera keeps failing; reopening stream");
        self.failures = 0;
        if let Err(err) = self.cam.stop_stream() {
            debug!(%err, "stop_stream failed; reopening anyway");
        }
        self.cam
            .open_stream()
            .map_err(|e| SourceError::SourceClosed(format!("reopen stream: {e}")))
    }
}

impl FrameSource for CameraCapture {
    fn next_frame(&mut self) -> Result<PixelBuffer, SourceError> {
        match self.grab() {
            Ok(frame) => {
                self.failures = 0;
                Ok(frame)
            }
            Err(reason) => {
                debug!(%reason, "camera frame dropped");
                self.failures += 1;
                if self.failures >= MAX_FETCH_FAILURES {
                    self.recover()?;
                }
                Err(SourceError::NoFrameAvailable)
            }
        }
    }
}
