// What you SEE:
// • The live camera, run through the configured convolution kernel, in a window.
// • HUD line: kernel name + FPS. ESC or closing the window quits.
// • Edit the --config file while running: the new kernel shows up on the next frame.
//
// Without a camera, `--still in.png --output out.png` filters a single image and exits.

mod camera;
mod draw;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use anyhow::Context;
use camera::CameraCapture;
use clap::{Parser, ValueHint};
use convoluted_mirror::config::MirrorConfig;
use convoluted_mirror::{
    ConvolutionEngine, FixedRate, Kernel, MirrorSession, PixelBuffer, SessionHandle, SessionState, logging, presets,
};
use draw::Drawer;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// How often the config file is checked for a new kernel.
const RELOAD_POLL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(author, version, about = "Live camera mirror through a 2D convolution kernel")]
struct Cli {
    /// TOML config file; also watched for kernel changes
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Kernel preset, overriding the config file
    #[arg(long)]
    preset: Option<String>,

    /// Tick rate, overriding [camera].fps
    #[arg(long)]
    fps: Option<u32>,

    /// Camera index, overriding [camera].index
    #[arg(long)]
    camera: Option<u32>,

    /// Print the preset names and exit
    #[arg(long)]
    list_presets: bool,

    /// Filter this image once instead of opening the camera
    #[arg(long, value_hint = ValueHint::FilePath, requires = "output")]
    still: Option<PathBuf>,

    /// Where `--still` writes its result
    #[arg(long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    let cli = Cli::parse();

    if cli.list_presets {
        for name in presets::names() {
            println!("{name}");
        }
        return Ok(());
    }

    /* --- Config: file first, then CLI overrides --- */
    let mut config = match &cli.config {
        Some(path) => MirrorConfig::load(path)?,
        None => MirrorConfig::default(),
    };
    config.override_preset(cli.preset.as_deref());
    if let Some(fps) = cli.fps {
        config.camera.fps = fps;
    }
    if let Some(index) = cli.camera {
        config.camera.index = index;
    }

    let (name, kernel) = config.kernel()?;
    let engine = ConvolutionEngine::with_options(config.engine.options());
    info!(kernel = %name, radius = kernel.radius(), divisor = kernel.divisor(), "kernel loaded");

    if let (Some(input), Some(output)) = (&cli.still, &cli.output) {
        return filter_still(input, output, &engine, &kernel);
    }

    /* --- Camera + window setup ---
       Visual: window opens with the filtered camera feed. */
    let cam_cfg = &config.camera;
    let mut cam = CameraCapture::new(cam_cfg.index, cam_cfg.width, cam_cfg.height, cam_cfg.fps)?;
    let (w, h) = cam.resolution();
    info!(width = w, height = h, index = cam_cfg.index, "camera streaming");

    let label = Arc::new(Mutex::new(name));
    let mut drawer = Drawer::new(&config.window.title, w as usize, h as usize, Arc::clone(&label))?;

    let mut session = MirrorSession::new(&mut cam, &mut drawer, engine).with_kernel(kernel);
    if let Some(threshold) = config.engine.motion_threshold {
        session = session.with_motion_delta(threshold);
    }

    if let Some(path) = cli.config.clone() {
        watch_config(path, cli.preset.clone(), session.handle(), label)?;
    }

    /* --- Main loop: runs until ESC, window close, or the camera dies --- */
    let report = session.run(&mut FixedRate::new(config.camera.fps))?;
    info!(
        presented = report.presented,
        skipped = report.skipped,
        filtered = report.filtered,
        "mirror closed"
    );
    Ok(())
}

/// One-shot: filter an image file and save it.
fn filter_still(input: &Path, output: &Path, engine: &ConvolutionEngine, kernel: &Kernel) -> anyhow::Result<()> {
    let img = image::open(input)
        .with_context(|| format!("open {}", input.display()))?
        .to_rgba8();
    let frame = PixelBuffer::from(img);

    let started = Instant::now();
    let out = engine.apply(&frame, kernel)?;
    info!(
        width = frame.width(),
        height = frame.height(),
        elapsed_ms = started.elapsed().as_secs_f64() * 1e3,
        "filtered still"
    );

    out.to_rgba_image()
        .context("frame too large to save")?
        .save(output)
        .with_context(|| format!("save {}", output.display()))?;
    Ok(())
}

/// Poll the config file's mtime; on change, swap in its kernel.
/// A `--preset` override is re-applied to every reload. A broken edit is logged and
/// the current kernel stays.
fn watch_config(
    path: PathBuf,
    preset: Option<String>,
    handle: SessionHandle,
    label: Arc<Mutex<String>>,
) -> anyhow::Result<()> {
    let modified = |p: &Path| fs::metadata(p).and_then(|m| m.modified()).ok();
    let mut last: Option<SystemTime> = modified(&path);

    thread::Builder::new()
        .name("config-watch".into())
        .spawn(move || {
            while handle.state() != SessionState::Stopped {
                thread::sleep(RELOAD_POLL);
                let now = modified(&path);
                if now == last {
                    continue;
                }
                last = now;

                let reloaded = MirrorConfig::load(&path).and_then(|mut cfg| {
                    cfg.override_preset(preset.as_deref());
                    cfg.kernel()
                });
                match reloaded {
                    Ok((_, kernel)) if handle.kernel().as_deref() == Some(&kernel) => {
                        debug!(path = %path.display(), "config changed; kernel unchanged");
                    }
                    Ok((name, kernel)) => {
                        info!(kernel = %name, path = %path.display(), "config changed");
                        *label.lock() = name;
                        handle.set_kernel(kernel);
                    }
                    Err(err) => warn!(%err, "ignoring config change"),
                }
            }
        })
        .context("spawn config watcher")?;
    Ok(())
}
