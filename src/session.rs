// The mirror loop: pull a frame, filter it with the current kernel, present it, repeat.
//
// State machine: Idle -> Running -> Stopped (terminal).
// The kernel lives in a shared slot so a UI or reload thread can swap it while the
// loop runs; every tick reads the slot exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::convolve::ConvolutionEngine;
use crate::delta::MotionDelta;
use crate::error::Error;
use crate::io::{FrameSource, RenderError, Renderer, SourceError};
use crate::kernel::Kernel;
use crate::pacing::{FpsCounter, Pacer};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Stopped,
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            IDLE => Self::Idle,
            RUNNING => Self::Running,
            _ => Self::Stopped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session has not been started")]
    NotStarted,
    #[error("session is already running")]
    AlreadyStarted,
    #[error("session is stopped")]
    Stopped,
    #[error("frame source closed: {0}")]
    SourceClosed(String),
}

/// Why a tick produced no new picture. The loop keeps going after any of these.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    NoFrame,
    SurfaceNotReady(String),
    Filter(Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// A frame reached the surface; `filtered` is false when no kernel was set.
    Presented { filtered: bool },
    Skipped(SkipReason),
    /// The session is stopped; nothing was done.
    Stopped,
}

/// Running totals, returned by `run` when the session stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub ticks: u64,
    pub presented: u64,
    pub skipped: u64,
    pub filtered: u64,
}

struct Shared {
    state: AtomicU8,
    kernel: RwLock<Option<Arc<Kernel>>>,
}

impl Shared {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns true if this call did the stopping.
    fn stop(&self) -> bool {
        let prev = self.state.swap(STOPPED, Ordering::AcqRel);
        if prev != STOPPED {
            info!(from = ?SessionState::from_u8(prev), "mirror session stopped");
        }
        prev != STOPPED
    }

    // The write lock only covers a pointer swap; readers clone the Arc and let go.
    fn swap_kernel(&self, kernel: Option<Arc<Kernel>>) {
        match &kernel {
            Some(k) => info!(radius = k.radius(), divisor = k.divisor(), "kernel swapped"),
            None => info!("kernel cleared; frames pass through unfiltered"),
        }
        *self.kernel.write() = kernel;
    }

    fn kernel(&self) -> Option<Arc<Kernel>> {
        self.kernel.read().clone()
    }
}

/// Cheap, cloneable control over a running session, usable from any thread.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Takes effect on the next tick; a tick already in flight keeps its kernel.
    pub fn set_kernel(&self, kernel: Kernel) {
        self.shared.swap_kernel(Some(Arc::new(kernel)));
    }

    pub fn clear_kernel(&self) {
        self.shared.swap_kernel(None);
    }

    pub fn kernel(&self) -> Option<Arc<Kernel>> {
        self.shared.kernel()
    }

    /// Stop the session before its next tick. Returns false if it was already stopped.
    pub fn stop(&self) -> bool {
        self.shared.stop()
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }
}

pub struct MirrorSession<S, R> {
    source: Option<S>,
    renderer: Option<R>,
    engine: ConvolutionEngine,
    delta: Option<MotionDelta>,
    shared: Arc<Shared>,
    report: SessionReport,
    fps: FpsCounter,
}

impl<S: FrameSource, R: Renderer> MirrorSession<S, R> {
    /// New idle session with no kernel (frames pass through until one is set).
    pub fn new(source: S, renderer: R, engine: ConvolutionEngine) -> Self {
        Self {
            source: Some(source),
            renderer: Some(renderer),
            engine,
            delta: None,
            shared: Arc::new(Shared {
                state: AtomicU8::new(IDLE),
                kernel: RwLock::new(None),
            }),
            report: SessionReport::default(),
            fps: FpsCounter::new(),
        }
    }

    pub fn with_kernel(self, kernel: Kernel) -> Self {
        self.shared.swap_kernel(Some(Arc::new(kernel)));
        self
    }

    /// Difference every frame against the previous one before filtering.
    pub fn with_motion_delta(mut self, threshold: u8) -> Self {
        self.delta = Some(MotionDelta::new(threshold));
        self
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle { shared: Arc::clone(&self.shared) }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn report(&self) -> SessionReport {
        self.report
    }

    pub fn set_kernel(&self, kernel: Kernel) {
        self.shared.swap_kernel(Some(Arc::new(kernel)));
    }

    pub fn clear_kernel(&self) {
        self.shared.swap_kernel(None);
    }

    pub fn start(&mut self) -> Result<(), SessionError> {
        match self.shared.state.compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                info!("mirror session running");
                Ok(())
            }
            Err(RUNNING) => Err(SessionError::AlreadyStarted),
            Err(_) => Err(SessionError::Stopped),
        }
    }

    /// Stop and let go of the frame source and renderer.
    pub fn stop(&mut self) {
        self.shared.stop();
        self.release();
    }

    /// One capture -> filter -> present iteration.
    pub fn tick(&mut self) -> Result<TickOutcome, SessionError> {
        match self.state() {
            SessionState::Idle => return Err(SessionError::NotStarted),
            SessionState::Stopped => {
                self.release();
                return Ok(TickOutcome::Stopped);
            }
            SessionState::Running => {}
        }

        let Some(source) = self.source.as_mut() else {
            return Ok(TickOutcome::Stopped);
        };
        self.report.ticks += 1;

        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(SourceError::NoFrameAvailable) => {
                debug!("no frame available; tick skipped");
                return Ok(self.skip(SkipReason::NoFrame));
            }
            Err(SourceError::SourceClosed(reason)) => {
                error!(%reason, "frame source closed");
                self.stop();
                return Err(SessionError::SourceClosed(reason));
            }
        };

        let frame = match self.delta.as_mut() {
            Some(delta) => delta.apply(frame),
            None => frame,
        };

        // One read of the slot per tick: a swap mid-tick lands on the next one.
        let kernel = self.shared.kernel();
        let (frame, filtered) = match kernel.as_deref() {
            Some(kernel) => match self.engine.apply(&frame, kernel) {
                Ok(out) => (out, true),
                Err(err) => {
                    warn!(%err, width = frame.width(), height = frame.height(), "filter failed; tick skipped");
                    return Ok(self.skip(SkipReason::Filter(err)));
                }
            },
            None => (frame, false),
        };

        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(TickOutcome::Stopped);
        };
        match renderer.present(&frame) {
            Ok(()) => {
                self.report.presented += 1;
                if filtered {
                    self.report.filtered += 1;
                }
                if let Some(fps) = self.fps.frame() {
                    info!(fps = %format!("{fps:.1}"), skipped = self.report.skipped, "frame rate");
                }
                Ok(TickOutcome::Presented { filtered })
            }
            Err(RenderError::SurfaceNotReady(reason)) => {
                warn!(%reason, "surface not ready; tick skipped");
                Ok(self.skip(SkipReason::SurfaceNotReady(reason)))
            }
            Err(RenderError::SurfaceClosed) => {
                info!("surface closed");
                self.stop();
                Ok(TickOutcome::Stopped)
            }
        }
    }

    /// Drive ticks from `pacer` until the session stops.
    ///
    /// Starts an idle session. Returns the totals on a normal stop, or the
    /// `SourceClosed` error if the stream died.
    pub fn run<P: Pacer + ?Sized>(&mut self, pacer: &mut P) -> Result<SessionReport, SessionError> {
        match self.state() {
            SessionState::Idle => self.start()?,
            SessionState::Running => {}
            SessionState::Stopped => return Err(SessionError::Stopped),
        }

        while self.state() == SessionState::Running {
            pacer.wait();
            // stop() may have landed during the wait; don't start another tick.
            if self.state() != SessionState::Running {
                break;
            }
            self.tick()?;
        }

        self.release();
        info!(
            ticks = self.report.ticks,
            presented = self.report.presented,
            skipped = self.report.skipped,
            "mirror loop finished"
        );
        Ok(self.report)
    }

    fn skip(&mut self, reason: SkipReason) -> TickOutcome {
        self.report.skipped += 1;
        TickOutcome::Skipped(reason)
    }

    fn release(&mut self) {
        self.source = None;
        self.renderer = None;
        if let Some(delta) = self.delta.as_mut() {
            delta.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelBuffer;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Plays back scripted results, then repeats a gray frame forever.
    struct ScriptedSource {
        script: VecDeque<Result<PixelBuffer, SourceError>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<PixelBuffer, SourceError>>) -> Self {
            Self { script: script.into() }
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<PixelBuffer, SourceError> {
            self.script.pop_front().unwrap_or_else(|| Ok(gray()))
        }
    }

    /// Records presented frames; answers with scripted errors first.
    struct Recorder {
        frames: Rc<RefCell<Vec<PixelBuffer>>>,
        answers: VecDeque<Result<(), RenderError>>,
    }

    impl Recorder {
        fn new() -> (Self, Rc<RefCell<Vec<PixelBuffer>>>) {
            Self::answering(Vec::new())
        }

        fn answering(answers: Vec<Result<(), RenderError>>) -> (Self, Rc<RefCell<Vec<PixelBuffer>>>) {
            let frames = Rc::new(RefCell::new(Vec::new()));
            (Self { frames: Rc::clone(&frames), answers: answers.into() }, frames)
        }
    }

    impl Renderer for Recorder {
        fn present(&mut self, frame: &PixelBuffer) -> Result<(), RenderError> {
            let answer = self.answers.pop_front().unwrap_or(Ok(()));
            if answer.is_ok() {
                self.frames.borrow_mut().push(frame.clone());
            }
            answer
        }
    }

    fn gray() -> PixelBuffer {
        PixelBuffer::filled(4, 3, [50, 60, 70, 255])
    }

    fn doubler() -> Kernel {
        Kernel::new(vec![2], 0, 1).unwrap()
    }

    fn session(source: ScriptedSource, renderer: Recorder) -> MirrorSession<ScriptedSource, Recorder> {
        MirrorSession::new(source, renderer, ConvolutionEngine::new())
    }

    #[test]
    fn state_machine() {
        let (rec, _) = Recorder::new();
        let mut s = session(ScriptedSource::new(vec![]), rec);
        assert_eq!(s.state(), SessionState::Idle);
        assert_eq!(s.tick(), Err(SessionError::NotStarted));

        s.start().unwrap();
        assert_eq!(s.state(), SessionState::Running);
        assert_eq!(s.start(), Err(SessionError::AlreadyStarted));

        s.stop();
        assert_eq!(s.state(), SessionState::Stopped);
        assert_eq!(s.start(), Err(SessionError::Stopped));
        assert_eq!(s.tick(), Ok(TickOutcome::Stopped));
        assert!(matches!(s.run(&mut crate::pacing::Unpaced), Err(SessionError::Stopped)));
    }

    #[test]
    fn raw_frames_pass_through_without_a_kernel() {
        let (rec, frames) = Recorder::new();
        let mut s = session(ScriptedSource::new(vec![]), rec);
        s.start().unwrap();
        assert_eq!(s.tick(), Ok(TickOutcome::Presented { filtered: false }));
        assert_eq!(frames.borrow()[0], gray());
    }

    #[test]
    fn kernel_is_applied() {
        let (rec, frames) = Recorder::new();
        let mut s = session(ScriptedSource::new(vec![]), rec).with_kernel(doubler());
        s.start().unwrap();
        assert_eq!(s.tick(), Ok(TickOutcome::Presented { filtered: true }));
        assert_eq!(frames.borrow()[0].pixel(0, 0), [100, 120, 140, 255]);
    }

    #[test]
    fn kernel_swap_lands_on_next_tick() {
        let (rec, frames) = Recorder::new();
        let mut s = session(ScriptedSource::new(vec![]), rec);
        let handle = s.handle();
        s.start().unwrap();

        s.tick().unwrap();
        handle.set_kernel(doubler());
        s.tick().unwrap();
        handle.clear_kernel();
        s.tick().unwrap();

        let frames = frames.borrow();
        assert_eq!(frames[0].pixel(0, 0)[0], 50);
        assert_eq!(frames[1].pixel(0, 0)[0], 100);
        assert_eq!(frames[2].pixel(0, 0)[0], 50);
    }

    #[test]
    fn missing_frame_skips_and_continues() {
        let (rec, frames) = Recorder::new();
        let mut s = session(ScriptedSource::new(vec![Err(SourceError::NoFrameAvailable)]), rec);
        s.start().unwrap();
        assert_eq!(s.tick(), Ok(TickOutcome::Skipped(SkipReason::NoFrame)));
        assert_eq!(s.tick(), Ok(TickOutcome::Presented { filtered: false }));
        assert_eq!(frames.borrow().len(), 1);
        assert_eq!(s.report().skipped, 1);
    }

    #[test]
    fn unready_surface_skips_and_continues() {
        let (rec, frames) = Recorder::answering(vec![Err(RenderError::SurfaceNotReady("minimized".into()))]);
        let mut s = session(ScriptedSource::new(vec![]), rec);
        s.start().unwrap();
        assert_eq!(
            s.tick(),
            Ok(TickOutcome::Skipped(SkipReason::SurfaceNotReady("minimized".into())))
        );
        assert_eq!(s.state(), SessionState::Running);
        assert_eq!(s.tick(), Ok(TickOutcome::Presented { filtered: false }));
        assert_eq!(frames.borrow().len(), 1);
    }

    #[test]
    fn bad_frame_is_a_skipped_tick() {
        let empty = PixelBuffer::new(0, 0, Vec::new()).unwrap();
        let (rec, _) = Recorder::new();
        let mut s = session(ScriptedSource::new(vec![Ok(empty)]), rec).with_kernel(doubler());
        s.start().unwrap();
        assert_eq!(
            s.tick(),
            Ok(TickOutcome::Skipped(SkipReason::Filter(Error::DimensionMismatch { width: 0, height: 0 })))
        );
        assert_eq!(s.tick(), Ok(TickOutcome::Presented { filtered: true }));
    }

    #[test]
    fn closed_source_stops_once_and_releases() {
        let (rec, frames) = Recorder::new();
        let mut s = session(ScriptedSource::new(vec![Err(SourceError::SourceClosed("unplugged".into()))]), rec);
        s.start().unwrap();
        assert_eq!(Rc::strong_count(&frames), 2);

        assert_eq!(s.tick(), Err(SessionError::SourceClosed("unplugged".into())));
        assert_eq!(s.state(), SessionState::Stopped);
        assert_eq!(s.tick(), Ok(TickOutcome::Stopped));
        // The renderer (and its clone of `frames`) is gone.
        assert_eq!(Rc::strong_count(&frames), 1);
    }

    #[test]
    fn run_surfaces_source_closed() {
        let (rec, _) = Recorder::new();
        let script = vec![Ok(gray()), Ok(gray()), Err(SourceError::SourceClosed("eof".into()))];
        let mut s = session(ScriptedSource::new(script), rec);
        let res = s.run(&mut crate::pacing::Unpaced);
        assert_eq!(res, Err(SessionError::SourceClosed("eof".into())));
        assert_eq!(s.report().presented, 2);
    }

    #[test]
    fn stop_from_handle_ends_run_before_next_tick() {
        let (rec, frames) = Recorder::new();
        let mut s = session(ScriptedSource::new(vec![]), rec);
        let handle = s.handle();
        let mut waits = 0;
        let report = s
            .run(&mut || {
                waits += 1;
                if waits > 3 {
                    handle.stop();
                }
            })
            .unwrap();
        assert_eq!(report.ticks, 3);
        assert_eq!(report.presented, 3);
        assert_eq!(frames.borrow().len(), 3);
        assert_eq!(Rc::strong_count(&frames), 1);
    }

    #[test]
    fn closed_surface_ends_run() {
        let (rec, _) = Recorder::answering(vec![Ok(()), Err(RenderError::SurfaceClosed)]);
        let mut s = session(ScriptedSource::new(vec![]), rec);
        let report = s.run(&mut crate::pacing::Unpaced).unwrap();
        assert_eq!(report.presented, 1);
        assert_eq!(s.state(), SessionState::Stopped);
    }

    #[test]
    fn motion_delta_runs_before_the_kernel() {
        let (rec, frames) = Recorder::new();
        let script = vec![Ok(gray()), Ok(PixelBuffer::filled(4, 3, [250, 60, 70, 255]))];
        let mut s = session(ScriptedSource::new(script), rec).with_motion_delta(100);
        s.start().unwrap();
        s.tick().unwrap();
        s.tick().unwrap();
        let frames = frames.borrow();
        assert_eq!(frames[0].pixel(0, 0), [0, 0, 0, 255]);
        assert_eq!(frames[1].pixel(0, 0), [200, 0, 0, 255]);
    }

    #[test]
    fn kernel_swaps_from_another_thread_never_tear() {
        let blur = Kernel::new(vec![1; 9], 1, 9).unwrap();
        let frames = Rc::new(RefCell::new(Vec::new()));
        let rec = Recorder { frames: Rc::clone(&frames), answers: VecDeque::new() };
        let mut s = session(ScriptedSource::new(vec![]), rec).with_kernel(blur.clone());
        let handle = s.handle();

        std::thread::scope(|scope| {
            let writer = handle.clone();
            scope.spawn(move || {
                for i in 0..200 {
                    if i % 2 == 0 {
                        writer.set_kernel(doubler());
                    } else {
                        writer.set_kernel(Kernel::new(vec![1; 9], 1, 9).unwrap());
                    }
                }
            });
            let mut waits = 0;
            s.run(&mut || {
                waits += 1;
                if waits > 100 {
                    handle.stop();
                }
            })
            .unwrap();
        });

        // Every frame is the output of exactly one of the two kernels.
        let engine = ConvolutionEngine::new();
        let doubled = engine.apply(&gray(), &doubler()).unwrap();
        let blurred = engine.apply(&gray(), &blur).unwrap();
        for f in frames.borrow().iter() {
            assert!(*f == doubled || *f == blurred);
        }
    }
}
