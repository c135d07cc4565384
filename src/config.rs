// Mirror configuration: a TOML file with optional sections, every field defaulted.
//
//   [camera]  index, width, height, fps
//   [window]  title
//   [engine]  parallel, channels, rectify, motion_threshold
//   [kernel]  preset = "glow"  |  weights = [...], radius = 1, divisor = 7

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::convolve::{ChannelMask, EngineOptions};
use crate::error::Error;
use crate::kernel::{Kernel, KernelConfig};
use crate::presets;

/// Preset used when the file names no kernel.
pub const DEFAULT_PRESET: &str = "glow";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML {path:?}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    Kernel(#[from] Error),
    #[error("unknown kernel preset {0:?}")]
    UnknownPreset(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct MirrorConfig {
    pub camera: CameraConfig,
    pub window: WindowConfig,
    pub engine: EngineConfig,
    pub kernel: Option<KernelSection>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CameraConfig {
    /// Device index; 0 is the default webcam.
    pub index: u32,
    pub width: u32,
    pub height: u32,
    /// Requested capture rate, also the tick rate of the loop.
    pub fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self { index: 0, width: 640, height: 480, fps: 30 }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WindowConfig {
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { title: "Convoluted Mirror".into() }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub parallel: bool,
    /// RGB bit mask: 1 = R, 2 = G, 4 = B.
    pub channels: ChannelMask,
    pub rectify: bool,
    /// Difference consecutive frames before filtering; unset disables it.
    pub motion_threshold: Option<u8>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let options = EngineOptions::default();
        Self {
            parallel: options.parallel,
            channels: options.channels,
            rectify: options.rectify,
            motion_threshold: None,
        }
    }
}

impl EngineConfig {
    pub fn options(&self) -> EngineOptions {
        EngineOptions {
            channels: ChannelMask::from_bits(self.channels.bits()),
            rectify: self.rectify,
            parallel: self.parallel,
        }
    }
}

/// Either a named preset or a literal kernel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum KernelSection {
    Preset { preset: String },
    Literal(KernelConfig),
}

impl KernelSection {
    /// The kernel plus a short label for the HUD.
    pub fn build(&self) -> Result<(String, Kernel), ConfigError> {
        match self {
            KernelSection::Preset { preset } => presets::by_name(preset)
                .map(|k| (preset.to_ascii_lowercase(), k))
                .ok_or_else(|| ConfigError::UnknownPreset(preset.clone())),
            KernelSection::Literal(literal) => {
                let kernel = literal.build()?;
                let side = kernel.side();
                Ok((format!("custom {side}x{side}"), kernel))
            }
        }
    }
}

impl MirrorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Replace the `[kernel]` section with a named preset, when one is given.
    /// Applied after every load, so a command-line preset survives file reloads.
    pub fn override_preset(&mut self, preset: Option<&str>) {
        if let Some(preset) = preset {
            self.kernel = Some(KernelSection::Preset { preset: preset.to_owned() });
        }
    }

    /// The configured kernel, or the default preset when none is given.
    pub fn kernel(&self) -> Result<(String, Kernel), ConfigError> {
        match &self.kernel {
            Some(section) => section.build(),
            None => KernelSection::Preset { preset: DEFAULT_PRESET.into() }.build(),
        }
    }
}
