//! E-paper driver access
//!
//! The daemon talks to the display driver only through [`DriverSink`], a
//! small synchronous interface: read and write the driver and dither modes
//! and the redraw delay, read the default hint, upload hint rectangles and
//! trigger a full refresh.
//!
//! - [`RockchipEbc`]: hrdl's rockchip_ebc kernel driver (DRM ioctls + sysfs)
//! - [`MemoryDriver`]: in-process stand-in with configurable mode latency
//! - [`ModeController`]: validated, confirmed mode transitions on top of a sink

mod controller;
mod memory;
mod rockchip_ebc;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hint::HintSpec;
use crate::registry::DriverHints;

pub use controller::{ModeController, ModeError, TransitionState};
pub use memory::MemoryDriver;
pub use rockchip_ebc::RockchipEbc;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{op} ioctl failed: {source}")]
    Ioctl {
        op: &'static str,
        #[source]
        source: nix::Error,
    },

    #[error("failed to read {path}: {source}")]
    Sysfs {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("driver reported invalid {what} value {value}")]
    BadValue { what: &'static str, value: String },

    #[error("driver rejected command: {0}")]
    Rejected(String),
}

/// Waveform selection of the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverMode {
    Normal,
    Fast,
    ZeroWaveform,
}

impl DriverMode {
    pub fn raw(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Fast => 1,
            Self::ZeroWaveform => 8,
        }
    }

    /// Modes a client may request; ZeroWaveform is entered by other means
    pub fn is_settable(self) -> bool {
        matches!(self, Self::Normal | Self::Fast)
    }

    /// Normal and Fast toggle, anything else stays put
    pub fn cycle_next(self) -> Self {
        match self {
            Self::Normal => Self::Fast,
            Self::Fast => Self::Normal,
            other => other,
        }
    }
}

impl TryFrom<u8> for DriverMode {
    type Error = DriverError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Fast),
            8 => Ok(Self::ZeroWaveform),
            _ => Err(DriverError::BadValue {
                what: "driver mode",
                value: raw.to_string(),
            }),
        }
    }
}

impl fmt::Display for DriverMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Normal => "normal",
            Self::Fast => "fast",
            Self::ZeroWaveform => "zero_waveform",
        })
    }
}

impl FromStr for DriverMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "normal" | "0" => Ok(Self::Normal),
            "fast" | "1" => Ok(Self::Fast),
            "zero_waveform" | "zero-waveform" | "zerowaveform" | "8" => Ok(Self::ZeroWaveform),
            _ => Err(format!("Unknown driver mode: {}", s)),
        }
    }
}

/// Dithering pattern used for `D` hints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DitherMode {
    Bayer,
    BlueNoise16,
    BlueNoise32,
}

impl DitherMode {
    pub fn raw(self) -> u8 {
        match self {
            Self::Bayer => 0,
            Self::BlueNoise16 => 1,
            Self::BlueNoise32 => 2,
        }
    }

    pub fn cycle_next(self) -> Self {
        match self {
            Self::Bayer => Self::BlueNoise16,
            Self::BlueNoise16 => Self::BlueNoise32,
            Self::BlueNoise32 => Self::Bayer,
        }
    }
}

impl TryFrom<u8> for DitherMode {
    type Error = DriverError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Bayer),
            1 => Ok(Self::BlueNoise16),
            2 => Ok(Self::BlueNoise32),
            _ => Err(DriverError::BadValue {
                what: "dither mode",
                value: raw.to_string(),
            }),
        }
    }
}

impl fmt::Display for DitherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bayer => "bayer",
            Self::BlueNoise16 => "blue_noise16",
            Self::BlueNoise32 => "blue_noise32",
        })
    }
}

impl FromStr for DitherMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "bayer" | "0" => Ok(Self::Bayer),
            "blue_noise16" | "bluenoise16" | "1" => Ok(Self::BlueNoise16),
            "blue_noise32" | "bluenoise32" | "2" => Ok(Self::BlueNoise32),
            _ => Err(format!("Unknown dither mode: {}", s)),
        }
    }
}

/// Cached view of the hardware mode registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverState {
    pub mode: DriverMode,
    pub dither: DitherMode,
    pub redraw_delay: u16,
}

/// Commands and readable state of an e-paper driver.
///
/// Calls block for at most a single ioctl or sysfs read; implementations
/// must not wait for a mode change to take effect.
pub trait DriverSink: Send + Sync {
    fn driver_mode(&self) -> Result<DriverMode, DriverError>;

    /// Issue a mode change; completion is observed through [`Self::driver_mode`]
    fn set_driver_mode(&self, mode: DriverMode) -> Result<(), DriverError>;

    fn dither_mode(&self) -> Result<DitherMode, DriverError>;

    fn set_dither_mode(&self, mode: DitherMode) -> Result<(), DriverError>;

    /// Delay before regions hinted with `R` are redrawn
    fn redraw_delay(&self) -> Result<u16, DriverError>;

    fn set_redraw_delay(&self, delay: u16) -> Result<(), DriverError>;

    /// Hint the driver applies to pixels not covered by any rectangle
    fn default_hint(&self) -> Result<HintSpec, DriverError>;

    fn upload_hints(&self, hints: &DriverHints) -> Result<(), DriverError>;

    fn global_refresh(&self) -> Result<(), DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_values() {
        for mode in [DriverMode::Normal, DriverMode::Fast, DriverMode::ZeroWaveform] {
            assert_eq!(DriverMode::try_from(mode.raw()).unwrap(), mode);
        }
        for mode in [DitherMode::Bayer, DitherMode::BlueNoise16, DitherMode::BlueNoise32] {
            assert_eq!(DitherMode::try_from(mode.raw()).unwrap(), mode);
        }
        assert_eq!(DriverMode::ZeroWaveform.raw(), 8);
        assert!(DriverMode::try_from(2).is_err());
        assert!(DitherMode::try_from(3).is_err());
    }

    #[test]
    fn test_cycles() {
        assert_eq!(DriverMode::Normal.cycle_next(), DriverMode::Fast);
        assert_eq!(DriverMode::Fast.cycle_next(), DriverMode::Normal);
        assert_eq!(DriverMode::ZeroWaveform.cycle_next(), DriverMode::ZeroWaveform);

        assert_eq!(DitherMode::Bayer.cycle_next(), DitherMode::BlueNoise16);
        assert_eq!(DitherMode::BlueNoise16.cycle_next(), DitherMode::BlueNoise32);
        assert_eq!(DitherMode::BlueNoise32.cycle_next(), DitherMode::Bayer);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("Fast".parse::<DriverMode>().unwrap(), DriverMode::Fast);
        assert_eq!("zero-waveform".parse::<DriverMode>().unwrap(), DriverMode::ZeroWaveform);
        assert_eq!("blue-noise32".parse::<DitherMode>().unwrap(), DitherMode::BlueNoise32);
        assert!("turbo".parse::<DriverMode>().is_err());
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&DriverMode::ZeroWaveform).unwrap(),
            "\"zero_waveform\""
        );
        assert_eq!(
            serde_json::from_str::<DitherMode>("\"blue_noise16\"").unwrap(),
            DitherMode::BlueNoise16
        );
    }
}
