//! hrdl's rockchip_ebc driver
//!
//! Mode and hint commands go through DRM ioctls on the card node; the
//! default hint is read from the module parameters in sysfs.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::PathBuf;

use nix::{ioctl_readwrite, ioctl_write_ptr};

use super::{DitherMode, DriverError, DriverMode, DriverSink};
use crate::hint::HintSpec;
use crate::registry::DriverHints;

const IOCTL_MAGIC: u8 = b'd';
const COMMAND_BASE: u8 = 0x40;

const GLOBAL_REFRESH_NR: u8 = COMMAND_BASE;
const RECT_HINTS_NR: u8 = COMMAND_BASE + 0x03;
const MODE_NR: u8 = COMMAND_BASE + 0x04;

#[repr(C)]
pub struct RawGlobalRefresh {
    trigger_global_refresh: u8,
}

#[repr(C)]
pub struct RawRect {
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
}

#[repr(C)]
pub struct RawRectHint {
    pixel_hints: u8,
    _padding: [u8; 7],
    rect: RawRect,
}

#[repr(C)]
pub struct RawRectHints {
    set_default_hints: u8,
    default_hints: u8,
    _padding: [u8; 2],
    num_rects: u32,
    ptr_rect_hints: u64,
}

#[repr(C)]
#[derive(Default)]
pub struct RawMode {
    set_driver_mode: u8,
    driver_mode: u8,
    set_dither_mode: u8,
    dither_mode: u8,
    redraw_delay: u16,
    set_redraw_delay: u8,
    _pad: u8,
}

ioctl_readwrite!(global_refresh_iowr, IOCTL_MAGIC, GLOBAL_REFRESH_NR, RawGlobalRefresh);
ioctl_write_ptr!(rect_hints_iow, IOCTL_MAGIC, RECT_HINTS_NR, RawRectHints);
ioctl_readwrite!(
    /// Reads the mode registers, writing those whose `set_*` flag is non-zero
    mode_iowr,
    IOCTL_MAGIC,
    MODE_NR,
    RawMode
);

#[derive(Debug, Clone)]
pub struct RockchipEbc {
    device: PathBuf,
    parameters: PathBuf,
}

impl RockchipEbc {
    pub fn new(device: impl Into<PathBuf>, parameters: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
            parameters: parameters.into(),
        }
    }

    fn open(&self) -> Result<File, DriverError> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.device)
            .map_err(|source| DriverError::Open {
                path: self.device.clone(),
                source,
            })
    }

    fn read_parameter(&self, name: &str) -> Result<String, DriverError> {
        let path = self.parameters.join(name);
        std::fs::read_to_string(&path)
            .map(|s| s.trim().to_string())
            .map_err(|source| DriverError::Sysfs { path, source })
    }

    fn mode_ioctl(&self, mut data: RawMode) -> Result<RawMode, DriverError> {
        let file = self.open()?;
        // SAFETY: `data` is a live repr(C) struct matching the kernel's layout
        unsafe { mode_iowr(file.as_raw_fd(), &mut data) }
            .map_err(|source| DriverError::Ioctl { op: "mode", source })?;
        Ok(data)
    }
}

impl DriverSink for RockchipEbc {
    fn driver_mode(&self) -> Result<DriverMode, DriverError> {
        let data = self.mode_ioctl(RawMode::default())?;
        DriverMode::try_from(data.driver_mode)
    }

    fn set_driver_mode(&self, mode: DriverMode) -> Result<(), DriverError> {
        self.mode_ioctl(RawMode {
            set_driver_mode: 1,
            driver_mode: mode.raw(),
            ..Default::default()
        })?;
        Ok(())
    }

    fn dither_mode(&self) -> Result<DitherMode, DriverError> {
        let data = self.mode_ioctl(RawMode::default())?;
        DitherMode::try_from(data.dither_mode)
    }

    fn set_dither_mode(&self, mode: DitherMode) -> Result<(), DriverError> {
        self.mode_ioctl(RawMode {
            set_dither_mode: 1,
            dither_mode: mode.raw(),
            ..Default::default()
        })?;
        Ok(())
    }

    fn redraw_delay(&self) -> Result<u16, DriverError> {
        Ok(self.mode_ioctl(RawMode::default())?.redraw_delay)
    }

    fn set_redraw_delay(&self, delay: u16) -> Result<(), DriverError> {
        self.mode_ioctl(RawMode {
            set_redraw_delay: 1,
            redraw_delay: delay,
            ..Default::default()
        })?;
        Ok(())
    }

    fn default_hint(&self) -> Result<HintSpec, DriverError> {
        let text = self.read_parameter("default_hint")?;
        text.parse::<u8>()
            .ok()
            .and_then(HintSpec::from_raw)
            .ok_or(DriverError::BadValue {
                what: "default hint",
                value: text,
            })
    }

    fn upload_hints(&self, hints: &DriverHints) -> Result<(), DriverError> {
        let rects: Vec<RawRectHint> = hints
            .rects
            .iter()
            .map(|r| RawRectHint {
                pixel_hints: r.hint.to_raw(),
                _padding: [0; 7],
                rect: RawRect {
                    x1: r.area.x1,
                    y1: r.area.y1,
                    x2: r.area.x2,
                    y2: r.area.y2,
                },
            })
            .collect();

        let data = RawRectHints {
            set_default_hints: 1,
            default_hints: hints.default_hint.to_raw(),
            _padding: [0; 2],
            num_rects: rects.len() as u32,
            ptr_rect_hints: rects.as_ptr() as u64,
        };

        let file = self.open()?;
        // SAFETY: `rects` outlives the call and `num_rects` matches its length
        unsafe { rect_hints_iow(file.as_raw_fd(), &data) }
            .map_err(|source| DriverError::Ioctl { op: "rect hints", source })?;

        tracing::trace!(rects = rects.len(), "Uploaded rect hints");
        Ok(())
    }

    fn global_refresh(&self) -> Result<(), DriverError> {
        let file = self.open()?;
        let mut data = RawGlobalRefresh {
            trigger_global_refresh: 1,
        };
        // SAFETY: `data` is a live repr(C) struct matching the kernel's layout
        unsafe { global_refresh_iowr(file.as_raw_fd(), &mut data) }
            .map_err(|source| DriverError::Ioctl { op: "global refresh", source })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_layouts() {
        assert_eq!(std::mem::size_of::<RawMode>(), 8);
        assert_eq!(std::mem::size_of::<RawRectHint>(), 24);
        assert_eq!(std::mem::size_of::<RawRectHints>(), 16);
        assert_eq!(std::mem::size_of::<RawGlobalRefresh>(), 1);
    }

    #[test]
    fn test_default_hint_from_sysfs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("default_hint"), "96\n").unwrap();

        let ebc = RockchipEbc::new("/nonexistent/card", dir.path());
        assert_eq!(ebc.default_hint().unwrap(), "Y4|D".parse::<HintSpec>().unwrap());
    }

    #[test]
    fn test_bad_default_hint() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("default_hint"), "255\n").unwrap();

        let ebc = RockchipEbc::new("/nonexistent/card", dir.path());
        assert!(matches!(
            ebc.default_hint(),
            Err(DriverError::BadValue { what: "default hint", .. })
        ));
    }

    #[test]
    fn test_missing_parameter_dir() {
        let ebc = RockchipEbc::new("/nonexistent/card", "/nonexistent/params");
        assert!(matches!(ebc.default_hint(), Err(DriverError::Sysfs { .. })));
    }

    #[test]
    fn test_missing_device() {
        let ebc = RockchipEbc::new("/nonexistent/card", "/nonexistent/params");
        assert!(matches!(ebc.driver_mode(), Err(DriverError::Open { .. })));
        assert!(matches!(ebc.global_refresh(), Err(DriverError::Open { .. })));
        assert!(matches!(ebc.set_redraw_delay(50), Err(DriverError::Open { .. })));
    }
}
