//! In-process driver
//!
//! Behaves like the kernel driver from the daemon's point of view, without
//! any hardware. A requested mode becomes visible after a configurable
//! number of reads, which lets the confirmation logic be exercised.

use std::sync::Mutex;

use super::{DitherMode, DriverError, DriverMode, DriverSink};

/// Redraw delay, in driver ticks, before anything sets one
const DEFAULT_REDRAW_DELAY: u16 = 100;
use crate::hint::HintSpec;
use crate::registry::DriverHints;

#[derive(Debug)]
struct MemoryState {
    mode: DriverMode,
    pending: Option<(DriverMode, u32)>,
    dither: DitherMode,
    redraw_delay: u16,
    default_hint: HintSpec,
    latency_reads: Option<u32>,
    fail_commands: bool,
    fail_reads: bool,
    mode_commands: u32,
    mode_reads: u32,
    last_upload: Option<DriverHints>,
    upload_count: u32,
    refreshes: u32,
}

#[derive(Debug)]
pub struct MemoryDriver {
    state: Mutex<MemoryState>,
}

impl MemoryDriver {
    pub fn new(default_hint: HintSpec) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                mode: DriverMode::Normal,
                pending: None,
                dither: DitherMode::Bayer,
                redraw_delay: DEFAULT_REDRAW_DELAY,
                default_hint,
                latency_reads: Some(0),
                fail_commands: false,
                fail_reads: false,
                mode_commands: 0,
                mode_reads: 0,
                last_upload: None,
                upload_count: 0,
                refreshes: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // plain data, still usable after a poisoning panic
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mode changes show up after `reads` further mode reads; `None` never
    pub fn set_latency(&self, reads: Option<u32>) {
        self.lock().latency_reads = reads;
    }

    /// Make every command fail with [`DriverError::Rejected`]
    pub fn set_fail_commands(&self, fail: bool) {
        self.lock().fail_commands = fail;
    }

    /// Make driver mode reads fail with [`DriverError::Rejected`]
    pub fn set_fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Change the mode as if done outside the daemon
    pub fn force_mode(&self, mode: DriverMode) {
        let mut state = self.lock();
        state.mode = mode;
        state.pending = None;
    }

    pub fn mode_commands(&self) -> u32 {
        self.lock().mode_commands
    }

    pub fn mode_reads(&self) -> u32 {
        self.lock().mode_reads
    }

    pub fn upload_count(&self) -> u32 {
        self.lock().upload_count
    }

    pub fn last_upload(&self) -> Option<DriverHints> {
        self.lock().last_upload.clone()
    }

    pub fn refreshes(&self) -> u32 {
        self.lock().refreshes
    }

    fn check(state: &MemoryState, op: &str) -> Result<(), DriverError> {
        if state.fail_commands {
            Err(DriverError::Rejected(format!("{} (memory driver)", op)))
        } else {
            Ok(())
        }
    }
}

impl DriverSink for MemoryDriver {
    fn driver_mode(&self) -> Result<DriverMode, DriverError> {
        let mut state = self.lock();
        if state.fail_reads {
            return Err(DriverError::Rejected("read driver mode (memory driver)".to_string()));
        }
        state.mode_reads += 1;
        if let Some((target, remaining)) = state.pending {
            if remaining == 0 {
                state.mode = target;
                state.pending = None;
            } else {
                state.pending = Some((target, remaining - 1));
            }
        }
        Ok(state.mode)
    }

    fn set_driver_mode(&self, mode: DriverMode) -> Result<(), DriverError> {
        let mut state = self.lock();
        Self::check(&state, "set driver mode")?;
        state.mode_commands += 1;
        match state.latency_reads {
            Some(0) => {
                state.mode = mode;
                state.pending = None;
            }
            Some(n) => state.pending = Some((mode, n)),
            None => state.pending = None,
        }
        Ok(())
    }

    fn dither_mode(&self) -> Result<DitherMode, DriverError> {
        Ok(self.lock().dither)
    }

    fn set_dither_mode(&self, mode: DitherMode) -> Result<(), DriverError> {
        let mut state = self.lock();
        Self::check(&state, "set dither mode")?;
        state.dither = mode;
        Ok(())
    }

    fn redraw_delay(&self) -> Result<u16, DriverError> {
        Ok(self.lock().redraw_delay)
    }

    fn set_redraw_delay(&self, delay: u16) -> Result<(), DriverError> {
        let mut state = self.lock();
        Self::check(&state, "set redraw delay")?;
        state.redraw_delay = delay;
        Ok(())
    }

    fn default_hint(&self) -> Result<HintSpec, DriverError> {
        Ok(self.lock().default_hint)
    }

    fn upload_hints(&self, hints: &DriverHints) -> Result<(), DriverError> {
        let mut state = self.lock();
        Self::check(&state, "upload hints")?;
        state.default_hint = hints.default_hint;
        state.last_upload = Some(hints.clone());
        state.upload_count += 1;
        Ok(())
    }

    fn global_refresh(&self) -> Result<(), DriverError> {
        let mut state = self.lock();
        Self::check(&state, "global refresh")?;
        state.refreshes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> MemoryDriver {
        MemoryDriver::new("Y4".parse().unwrap())
    }

    #[test]
    fn test_immediate_mode_change() {
        let d = driver();
        d.set_driver_mode(DriverMode::Fast).unwrap();
        assert_eq!(d.driver_mode().unwrap(), DriverMode::Fast);
        assert_eq!(d.mode_commands(), 1);
    }

    #[test]
    fn test_latency_in_reads() {
        let d = driver();
        d.set_latency(Some(2));
        d.set_driver_mode(DriverMode::Fast).unwrap();
        assert_eq!(d.driver_mode().unwrap(), DriverMode::Normal);
        assert_eq!(d.driver_mode().unwrap(), DriverMode::Normal);
        assert_eq!(d.driver_mode().unwrap(), DriverMode::Fast);
    }

    #[test]
    fn test_stalled_never_changes() {
        let d = driver();
        d.set_latency(None);
        d.set_driver_mode(DriverMode::Fast).unwrap();
        for _ in 0..10 {
            assert_eq!(d.driver_mode().unwrap(), DriverMode::Normal);
        }
    }

    #[test]
    fn test_failing_commands() {
        let d = driver();
        d.set_fail_commands(true);
        assert!(matches!(
            d.set_dither_mode(DitherMode::BlueNoise16),
            Err(DriverError::Rejected(_))
        ));
        assert_eq!(d.dither_mode().unwrap(), DitherMode::Bayer);
        assert!(d.set_redraw_delay(5).is_err());
        assert_eq!(d.redraw_delay().unwrap(), DEFAULT_REDRAW_DELAY);
    }

    #[test]
    fn test_failing_reads() {
        let d = driver();
        d.set_fail_reads(true);
        assert!(matches!(d.driver_mode(), Err(DriverError::Rejected(_))));
        assert_eq!(d.mode_reads(), 0);

        d.set_fail_reads(false);
        assert_eq!(d.driver_mode().unwrap(), DriverMode::Normal);
    }

    #[test]
    fn test_only_last_upload_kept() {
        let d = driver();
        assert_eq!(d.last_upload(), None);

        for depth in ["Y1", "Y2", "Y4"] {
            d.upload_hints(&DriverHints {
                default_hint: depth.parse().unwrap(),
                rects: Vec::new(),
            })
            .unwrap();
        }

        assert_eq!(d.upload_count(), 3);
        assert_eq!(d.last_upload().unwrap().default_hint, "Y4".parse().unwrap());
        assert_eq!(d.default_hint().unwrap(), "Y4".parse().unwrap());
    }

    #[test]
    fn test_redraw_delay() {
        let d = driver();
        assert_eq!(d.redraw_delay().unwrap(), DEFAULT_REDRAW_DELAY);
        d.set_redraw_delay(250).unwrap();
        assert_eq!(d.redraw_delay().unwrap(), 250);
    }
}
