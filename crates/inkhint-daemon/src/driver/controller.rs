//! Driver mode transitions
//!
//! A mode change is issued to the driver and then confirmed by polling the
//! hardware until it reports the requested mode, bounded by a timeout. Only
//! one transition runs at a time; concurrent requests fail immediately.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use super::{DitherMode, DriverError, DriverMode, DriverSink, DriverState};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_MODE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionState {
    Idle,
    Applying,
    Confirming,
    /// Last transition timed out or was abandoned; new requests are accepted
    Failed,
}

impl TransitionState {
    fn in_flight(self) -> bool {
        matches!(self, Self::Applying | Self::Confirming)
    }
}

#[derive(Debug, Error)]
pub enum ModeError {
    #[error("mode {0} cannot be requested")]
    InvalidMode(DriverMode),

    #[error("driver busy: {0}")]
    DriverBusy(String),

    #[error("driver did not report mode {requested} within {timeout:?}")]
    ModeApplyTimeout {
        requested: DriverMode,
        timeout: Duration,
    },

    #[error(transparent)]
    Driver(#[from] DriverError),
}

#[derive(Debug)]
struct Inner {
    transition: TransitionState,
    cache: DriverState,
}

/// Marks the transition failed unless it is explicitly finished,
/// so a dropped request future frees the slot.
struct TransitionGuard {
    inner: Arc<Mutex<Inner>>,
    done: bool,
}

impl TransitionGuard {
    fn set(&self, state: TransitionState) {
        lock(&self.inner).transition = state;
    }

    fn finish(mut self, state: TransitionState) {
        self.set(state);
        self.done = true;
    }
}

impl Drop for TransitionGuard {
    fn drop(&mut self) {
        if !self.done {
            tracing::warn!("Mode transition abandoned");
            self.set(TransitionState::Failed);
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared handle applying driver and dither mode changes
#[derive(Clone)]
pub struct ModeController {
    sink: Arc<dyn DriverSink>,
    inner: Arc<Mutex<Inner>>,
    poll_interval: Duration,
    timeout: Duration,
}

impl ModeController {
    /// Reads the current hardware state to seed the cache
    pub fn new(
        sink: Arc<dyn DriverSink>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<Self, DriverError> {
        let cache = DriverState {
            mode: sink.driver_mode()?,
            dither: sink.dither_mode()?,
            redraw_delay: sink.redraw_delay()?,
        };
        tracing::debug!(
            mode = %cache.mode,
            dither = %cache.dither,
            redraw_delay = cache.redraw_delay,
            "Driver state"
        );

        Ok(Self {
            sink,
            inner: Arc::new(Mutex::new(Inner {
                transition: TransitionState::Idle,
                cache,
            })),
            poll_interval,
            timeout,
        })
    }

    pub fn sink(&self) -> &Arc<dyn DriverSink> {
        &self.sink
    }

    /// Cached state; does not touch the hardware
    pub fn state(&self) -> DriverState {
        lock(&self.inner).cache
    }

    pub fn transition(&self) -> TransitionState {
        lock(&self.inner).transition
    }

    /// Re-read the hardware into the cache
    pub fn refresh(&self) -> Result<DriverState, DriverError> {
        let state = DriverState {
            mode: self.sink.driver_mode()?,
            dither: self.sink.dither_mode()?,
            redraw_delay: self.sink.redraw_delay()?,
        };
        lock(&self.inner).cache = state;
        Ok(state)
    }

    /// Switch the driver to `mode` and wait until the hardware reports it
    pub async fn request_mode(&self, mode: DriverMode) -> Result<DriverMode, ModeError> {
        if !mode.is_settable() {
            return Err(ModeError::InvalidMode(mode));
        }

        let guard = {
            let mut inner = lock(&self.inner);
            if inner.transition.in_flight() {
                return Err(ModeError::DriverBusy(
                    "another mode transition is in progress".to_string(),
                ));
            }
            inner.transition = TransitionState::Applying;
            TransitionGuard {
                inner: Arc::clone(&self.inner),
                done: false,
            }
        };

        // no command sent yet
        let current = match self.sink.driver_mode() {
            Ok(current) => current,
            Err(e) => {
                guard.finish(TransitionState::Idle);
                return Err(e.into());
            }
        };
        if !current.is_settable() {
            guard.finish(TransitionState::Idle);
            return Err(ModeError::DriverBusy(format!("driver is in {} mode", current)));
        }

        tracing::info!(from = %current, to = %mode, "Requesting driver mode");
        if let Err(e) = self.sink.set_driver_mode(mode) {
            guard.finish(TransitionState::Failed);
            tracing::warn!(mode = %mode, "Driver rejected mode change: {}", e);
            return Err(e.into());
        }
        guard.set(TransitionState::Confirming);

        let deadline = Instant::now() + self.timeout;
        loop {
            match self.sink.driver_mode() {
                Ok(observed) if observed == mode => {
                    lock(&self.inner).cache.mode = mode;
                    guard.finish(TransitionState::Idle);
                    tracing::info!(mode = %mode, "Driver mode confirmed");
                    return Ok(mode);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Failed to read driver mode while confirming: {}", e),
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep_until((now + self.poll_interval).min(deadline)).await;
        }

        guard.finish(TransitionState::Failed);
        tracing::warn!(mode = %mode, timeout = ?self.timeout, "Driver mode not confirmed");
        Err(ModeError::ModeApplyTimeout {
            requested: mode,
            timeout: self.timeout,
        })
    }

    /// Toggle between Normal and Fast. ZeroWaveform is left alone.
    pub async fn cycle_mode(&self) -> Result<DriverMode, ModeError> {
        let current = self.sink.driver_mode()?;
        let next = current.cycle_next();
        if next == current {
            tracing::debug!(mode = %current, "Mode not cyclable, leaving unchanged");
            return Ok(current);
        }
        self.request_mode(next).await
    }

    pub fn set_dither(&self, dither: DitherMode) -> Result<DitherMode, ModeError> {
        self.sink.set_dither_mode(dither)?;
        lock(&self.inner).cache.dither = dither;
        tracing::info!(dither = %dither, "Dither mode set");
        Ok(dither)
    }

    pub fn cycle_dither(&self) -> Result<DitherMode, ModeError> {
        let current = self.sink.dither_mode()?;
        self.set_dither(current.cycle_next())
    }

    pub fn set_redraw_delay(&self, delay: u16) -> Result<u16, ModeError> {
        self.sink.set_redraw_delay(delay)?;
        lock(&self.inner).cache.redraw_delay = delay;
        tracing::info!(redraw_delay = delay, "Redraw delay set");
        Ok(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;

    fn setup() -> (Arc<MemoryDriver>, ModeController) {
        let driver = Arc::new(MemoryDriver::new("Y4".parse().unwrap()));
        let controller =
            ModeController::new(driver.clone(), DEFAULT_POLL_INTERVAL, DEFAULT_MODE_TIMEOUT)
                .unwrap();
        (driver, controller)
    }

    #[tokio::test(start_paused = true)]
    async fn test_mode_confirmed_after_polling() {
        let (driver, ctl) = setup();
        driver.set_latency(Some(3));

        let start = Instant::now();
        assert_eq!(ctl.request_mode(DriverMode::Fast).await.unwrap(), DriverMode::Fast);
        assert!(start.elapsed() < DEFAULT_MODE_TIMEOUT);
        assert_eq!(ctl.state().mode, DriverMode::Fast);
        assert_eq!(ctl.transition(), TransitionState::Idle);
        assert_eq!(driver.mode_commands(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_cache_and_is_not_sticky() {
        let (driver, ctl) = setup();
        driver.set_latency(None);

        let start = Instant::now();
        let err = ctl.request_mode(DriverMode::Fast).await.unwrap_err();
        assert!(matches!(
            err,
            ModeError::ModeApplyTimeout {
                requested: DriverMode::Fast,
                ..
            }
        ));
        assert!(start.elapsed() >= DEFAULT_MODE_TIMEOUT);
        assert_eq!(ctl.state().mode, DriverMode::Normal);
        assert_eq!(ctl.transition(), TransitionState::Failed);

        driver.set_latency(Some(0));
        assert_eq!(ctl.request_mode(DriverMode::Fast).await.unwrap(), DriverMode::Fast);
        assert_eq!(ctl.transition(), TransitionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_request_is_busy() {
        let (driver, ctl) = setup();
        driver.set_latency(None);

        let background = ctl.clone();
        let pending = tokio::spawn(async move { background.request_mode(DriverMode::Fast).await });
        while ctl.transition() != TransitionState::Confirming {
            tokio::task::yield_now().await;
        }

        let start = Instant::now();
        let err = ctl.request_mode(DriverMode::Normal).await.unwrap_err();
        assert!(matches!(err, ModeError::DriverBusy(_)));
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(driver.mode_commands(), 1);

        pending.abort();
    }

    #[tokio::test]
    async fn test_invalid_mode_never_reaches_hardware() {
        let (driver, ctl) = setup();
        let reads = driver.mode_reads();

        let err = ctl.request_mode(DriverMode::ZeroWaveform).await.unwrap_err();
        assert!(matches!(err, ModeError::InvalidMode(DriverMode::ZeroWaveform)));
        assert_eq!(driver.mode_commands(), 0);
        assert_eq!(driver.mode_reads(), reads);
        assert_eq!(ctl.transition(), TransitionState::Idle);
    }

    #[tokio::test]
    async fn test_zero_waveform_hardware_is_busy() {
        let (driver, ctl) = setup();
        driver.force_mode(DriverMode::ZeroWaveform);

        let err = ctl.request_mode(DriverMode::Fast).await.unwrap_err();
        assert!(matches!(err, ModeError::DriverBusy(_)));
        assert_eq!(driver.mode_commands(), 0);
        assert_eq!(ctl.transition(), TransitionState::Idle);
    }

    #[tokio::test]
    async fn test_cycle_mode() {
        let (driver, ctl) = setup();
        assert_eq!(ctl.cycle_mode().await.unwrap(), DriverMode::Fast);
        assert_eq!(ctl.cycle_mode().await.unwrap(), DriverMode::Normal);

        driver.force_mode(DriverMode::ZeroWaveform);
        let commands = driver.mode_commands();
        assert_eq!(ctl.cycle_mode().await.unwrap(), DriverMode::ZeroWaveform);
        assert_eq!(driver.mode_commands(), commands);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_request_frees_slot() {
        let (driver, ctl) = setup();
        driver.set_latency(None);

        let result =
            tokio::time::timeout(Duration::from_millis(200), ctl.request_mode(DriverMode::Fast))
                .await;
        assert!(result.is_err());
        assert_eq!(ctl.transition(), TransitionState::Failed);

        driver.set_latency(Some(0));
        assert!(ctl.request_mode(DriverMode::Fast).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_mode_read_ends_transition_idle() {
        let (driver, ctl) = setup();
        driver.set_fail_reads(true);

        let err = ctl.request_mode(DriverMode::Fast).await.unwrap_err();
        assert!(matches!(err, ModeError::Driver(DriverError::Rejected(_))));
        assert_eq!(ctl.transition(), TransitionState::Idle);
        assert_eq!(ctl.state().mode, DriverMode::Normal);
        assert_eq!(driver.mode_commands(), 0);

        driver.set_fail_reads(false);
        assert_eq!(ctl.request_mode(DriverMode::Fast).await.unwrap(), DriverMode::Fast);
        assert_eq!(ctl.transition(), TransitionState::Idle);
    }

    #[tokio::test]
    async fn test_rejected_mode_command_fails_transition() {
        let (driver, ctl) = setup();
        driver.set_fail_commands(true);

        let err = ctl.request_mode(DriverMode::Fast).await.unwrap_err();
        assert!(matches!(err, ModeError::Driver(DriverError::Rejected(_))));
        assert_eq!(ctl.transition(), TransitionState::Failed);
        assert_eq!(ctl.state().mode, DriverMode::Normal);
        assert_eq!(driver.driver_mode().unwrap(), DriverMode::Normal);

        driver.set_fail_commands(false);
        assert_eq!(ctl.request_mode(DriverMode::Fast).await.unwrap(), DriverMode::Fast);
        assert_eq!(ctl.state().mode, DriverMode::Fast);
        assert_eq!(ctl.transition(), TransitionState::Idle);
    }

    #[test]
    fn test_redraw_delay_cached() {
        let (driver, ctl) = setup();
        let initial = driver.redraw_delay().unwrap();
        assert_eq!(ctl.state().redraw_delay, initial);

        assert_eq!(ctl.set_redraw_delay(300).unwrap(), 300);
        assert_eq!(ctl.state().redraw_delay, 300);
        assert_eq!(driver.redraw_delay().unwrap(), 300);

        driver.set_fail_commands(true);
        assert!(ctl.set_redraw_delay(10).is_err());
        assert_eq!(ctl.state().redraw_delay, 300);
    }

    #[test]
    fn test_dither_cycle_and_set() {
        let (driver, ctl) = setup();
        assert_eq!(ctl.cycle_dither().unwrap(), DitherMode::BlueNoise16);
        assert_eq!(ctl.cycle_dither().unwrap(), DitherMode::BlueNoise32);
        assert_eq!(ctl.cycle_dither().unwrap(), DitherMode::Bayer);
        assert_eq!(ctl.set_dither(DitherMode::BlueNoise32).unwrap(), DitherMode::BlueNoise32);
        assert_eq!(ctl.state().dither, DitherMode::BlueNoise32);
        assert_eq!(driver.dither_mode().unwrap(), DitherMode::BlueNoise32);
    }

    #[test]
    fn test_refresh_reads_hardware() {
        let (driver, ctl) = setup();
        driver.force_mode(DriverMode::Fast);
        assert_eq!(ctl.state().mode, DriverMode::Normal);
        assert_eq!(ctl.refresh().unwrap().mode, DriverMode::Fast);
        assert_eq!(ctl.state().mode, DriverMode::Fast);
    }
}
