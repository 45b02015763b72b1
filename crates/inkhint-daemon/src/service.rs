//! Registry owner and dispatcher
//!
//! The [`Registry`] lives inside a single task. Bridges and IPC clients talk
//! to it through a [`ServiceHandle`], which sends commands over an mpsc
//! channel and awaits the reply. Each command is processed to completion,
//! including hint recomputation and upload, before the next one starts.
//!
//! Mode changes bypass the actor: they go to the shared [`ModeController`]
//! from their own task, so confirmation polling never blocks the registry.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::driver::{
    DitherMode, DriverError, DriverMode, DriverSink, DriverState, ModeController, ModeError,
    TransitionState,
};
use crate::hint::{HintParseError, HintSpec};
use crate::rect::Rect;
use crate::registry::{Applied, DriverHints, Mutation, RectHint, Registry, RegistryError};

const COMMAND_BUFFER: usize = 64;
const NOTIFY_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Mode(#[from] ModeError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Hint(#[from] HintParseError),

    #[error("service is not running")]
    Closed,
}

/// Change events broadcast to watchers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    DriverModeChanged { mode: DriverMode },
    DitherModeChanged { dither: DitherMode },
    RedrawDelayChanged { redraw_delay: u16 },
    DefaultHintChanged { hint: HintSpec },
    HintsChanged { hints: DriverHints },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStatus {
    pub apps: usize,
    pub windows: usize,
    pub default_hint: HintSpec,
}

enum Command {
    Mutate {
        mutation: Mutation,
        reply: oneshot::Sender<Result<Applied, RegistryError>>,
    },
    ResolveAt {
        x: i32,
        y: i32,
        reply: oneshot::Sender<HintSpec>,
    },
    ResolveAll {
        reply: oneshot::Sender<Vec<RectHint>>,
    },
    DriverHints {
        reply: oneshot::Sender<DriverHints>,
    },
    Status {
        reply: oneshot::Sender<RegistryStatus>,
    },
}

struct Service {
    registry: Registry,
    sink: Arc<dyn DriverSink>,
    screen: Rect,
    last_hints: Option<DriverHints>,
    upload_pending: bool,
    notify: broadcast::Sender<Notification>,
}

impl Service {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        self.sync_driver();

        while let Some(command) = commands.recv().await {
            self.handle(command);
        }

        tracing::debug!("Service command channel closed");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Mutate { mutation, reply } => {
                let previous_default = self.registry.default_hint();
                let result = self.registry.apply(mutation);
                if let Err(e) = &result {
                    tracing::debug!("Mutation rejected: {}", e);
                }

                let default_hint = self.registry.default_hint();
                if default_hint != previous_default {
                    tracing::info!(hint = %default_hint, "Default hint changed");
                    let _ = self
                        .notify
                        .send(Notification::DefaultHintChanged { hint: default_hint });
                }

                self.sync_driver();
                let _ = reply.send(result);
            }
            Command::ResolveAt { x, y, reply } => {
                let _ = reply.send(self.registry.resolve_hint_at(x, y));
            }
            Command::ResolveAll { reply } => {
                let _ = reply.send(self.registry.resolve_all());
            }
            Command::DriverHints { reply } => {
                let _ = reply.send(self.registry.driver_hints(self.screen));
            }
            Command::Status { reply } => {
                let _ = reply.send(RegistryStatus {
                    apps: self.registry.app_count(),
                    windows: self.registry.window_count(),
                    default_hint: self.registry.default_hint(),
                });
            }
        }
    }

    /// Upload the driver hints if they differ from the last computed set
    fn sync_driver(&mut self) {
        let hints = self.registry.driver_hints(self.screen);
        let changed = self.last_hints.as_ref() != Some(&hints);
        if !changed && !self.upload_pending {
            return;
        }

        match self.sink.upload_hints(&hints) {
            Ok(()) => {
                tracing::debug!(rects = hints.rects.len(), "Uploaded driver hints");
                self.upload_pending = false;
            }
            Err(e) => {
                tracing::warn!("Failed to upload driver hints: {}", e);
                self.upload_pending = true;
            }
        }

        if changed {
            let _ = self.notify.send(Notification::HintsChanged {
                hints: hints.clone(),
            });
            self.last_hints = Some(hints);
        }
    }
}

/// Cloneable access to the running service
#[derive(Clone)]
pub struct ServiceHandle {
    commands: mpsc::Sender<Command>,
    controller: ModeController,
    notify: broadcast::Sender<Notification>,
}

/// Start the service task owning `registry`
pub fn spawn(registry: Registry, controller: ModeController, screen: Rect) -> ServiceHandle {
    let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
    let (notify, _) = broadcast::channel(NOTIFY_BUFFER);

    let service = Service {
        registry,
        sink: Arc::clone(controller.sink()),
        screen,
        last_hints: None,
        upload_pending: false,
        notify: notify.clone(),
    };
    tokio::spawn(service.run(rx));

    ServiceHandle {
        commands,
        controller,
        notify,
    }
}

impl ServiceHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, ServiceError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| ServiceError::Closed)?;
        rx.await.map_err(|_| ServiceError::Closed)
    }

    pub async fn apply(&self, mutation: Mutation) -> Result<Applied, ServiceError> {
        let result = self
            .request(|reply| Command::Mutate { mutation, reply })
            .await?;
        Ok(result?)
    }

    pub async fn resolve_hint_at(&self, x: i32, y: i32) -> Result<HintSpec, ServiceError> {
        self.request(|reply| Command::ResolveAt { x, y, reply }).await
    }

    pub async fn resolve_all(&self) -> Result<Vec<RectHint>, ServiceError> {
        self.request(|reply| Command::ResolveAll { reply }).await
    }

    /// The hints as last computed for the driver
    pub async fn driver_hints(&self) -> Result<DriverHints, ServiceError> {
        self.request(|reply| Command::DriverHints { reply }).await
    }

    pub async fn status(&self) -> Result<RegistryStatus, ServiceError> {
        self.request(|reply| Command::Status { reply }).await
    }

    pub async fn default_hint(&self) -> Result<HintSpec, ServiceError> {
        Ok(self.status().await?.default_hint)
    }

    pub async fn set_default_hint(&self, hint: HintSpec) -> Result<(), ServiceError> {
        self.apply(Mutation::SetDefaultHint(hint)).await.map(|_| ())
    }

    pub fn driver_state(&self) -> (DriverState, TransitionState) {
        (self.controller.state(), self.controller.transition())
    }

    /// Request a driver mode and wait for the hardware to confirm it.
    ///
    /// The transition keeps running if the caller goes away.
    pub async fn set_driver_mode(&self, mode: DriverMode) -> Result<DriverMode, ServiceError> {
        let controller = self.controller.clone();
        self.run_transition(async move { controller.request_mode(mode).await })
            .await
    }

    pub async fn cycle_driver_mode(&self) -> Result<DriverMode, ServiceError> {
        let controller = self.controller.clone();
        self.run_transition(async move { controller.cycle_mode().await })
            .await
    }

    async fn run_transition<F>(&self, transition: F) -> Result<DriverMode, ServiceError>
    where
        F: std::future::Future<Output = Result<DriverMode, ModeError>> + Send + 'static,
    {
        let before = self.controller.state().mode;
        let notify = self.notify.clone();
        let task = tokio::spawn(async move {
            let result = transition.await;
            if let Ok(mode) = result {
                if mode != before {
                    let _ = notify.send(Notification::DriverModeChanged { mode });
                }
            }
            result
        });

        match task.await {
            Ok(result) => Ok(result?),
            Err(e) => {
                tracing::error!("Mode transition task failed: {}", e);
                Err(ServiceError::Closed)
            }
        }
    }

    pub fn set_dither_mode(&self, dither: DitherMode) -> Result<DitherMode, ServiceError> {
        let before = self.controller.state().dither;
        let dither = self.controller.set_dither(dither)?;
        self.notify_dither(before, dither);
        Ok(dither)
    }

    pub fn cycle_dither_mode(&self) -> Result<DitherMode, ServiceError> {
        let before = self.controller.state().dither;
        let dither = self.controller.cycle_dither()?;
        self.notify_dither(before, dither);
        Ok(dither)
    }

    fn notify_dither(&self, before: DitherMode, after: DitherMode) {
        if before != after {
            let _ = self
                .notify
                .send(Notification::DitherModeChanged { dither: after });
        }
    }

    pub fn set_redraw_delay(&self, delay: u16) -> Result<u16, ServiceError> {
        let before = self.controller.state().redraw_delay;
        let delay = self.controller.set_redraw_delay(delay)?;
        if before != delay {
            let _ = self.notify.send(Notification::RedrawDelayChanged {
                redraw_delay: delay,
            });
        }
        Ok(delay)
    }

    pub fn global_refresh(&self) -> Result<(), ServiceError> {
        self.controller.sink().global_refresh()?;
        tracing::debug!("Triggered global refresh");
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notify.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;
    use crate::registry::{WindowField, WindowSpec};
    use std::time::Duration;

    fn hint(s: &str) -> HintSpec {
        s.parse().unwrap()
    }

    fn setup() -> (Arc<MemoryDriver>, ServiceHandle) {
        let driver = Arc::new(MemoryDriver::new(hint("Y4")));
        let controller = ModeController::new(
            driver.clone(),
            Duration::from_millis(50),
            Duration::from_secs(5),
        )
        .unwrap();
        let handle = spawn(Registry::new(hint("Y4")), controller, Rect::screen(100, 100));
        (driver, handle)
    }

    async fn register(handle: &ServiceHandle) -> crate::registry::AppId {
        match handle.apply(Mutation::RegisterApp { pid: 1 }).await.unwrap() {
            Applied::App(id) => id,
            other => panic!("expected app id, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mutation_uploads_hints() {
        let (driver, handle) = setup();
        let app = register(&handle).await;

        let applied = handle
            .apply(Mutation::AddWindow {
                app,
                spec: WindowSpec::new("w", Rect::new(0, 0, 50, 50)).with_hint(Some(hint("Y1"))),
            })
            .await
            .unwrap();
        assert!(matches!(applied, Applied::Window(_)));

        let upload = driver.last_upload().unwrap();
        assert_eq!(upload.rects.len(), 1);
        assert_eq!(upload.rects[0].hint, hint("Y1"));
        assert_eq!(handle.resolve_hint_at(10, 10).await.unwrap(), hint("Y1"));
        assert_eq!(handle.resolve_hint_at(60, 60).await.unwrap(), hint("Y4"));
    }

    #[tokio::test]
    async fn test_unchanged_hints_not_reuploaded() {
        let (driver, handle) = setup();
        let app = register(&handle).await;
        let uploads = driver.upload_count();

        // registering an app without windows leaves the hints alone
        register(&handle).await;
        assert_eq!(driver.upload_count(), uploads);

        let Applied::Window(win) = handle
            .apply(Mutation::AddWindow {
                app,
                spec: WindowSpec::new("w", Rect::new(0, 0, 10, 10)),
            })
            .await
            .unwrap()
        else {
            panic!("expected window id");
        };
        assert_eq!(driver.upload_count(), uploads + 1);

        handle
            .apply(Mutation::UpdateField {
                window: win,
                field: WindowField::Title("renamed".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(driver.upload_count(), uploads + 1);
    }

    #[tokio::test]
    async fn test_errors_are_per_call() {
        let (_driver, handle) = setup();
        let err = handle
            .apply(Mutation::RemoveApp("missing".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Registry(RegistryError::AppNotFound(_))));

        // the service is still alive
        assert_eq!(handle.status().await.unwrap().apps, 0);
    }

    #[tokio::test]
    async fn test_upload_failure_is_retried() {
        let (driver, handle) = setup();
        let app = register(&handle).await;

        driver.set_fail_commands(true);
        handle
            .apply(Mutation::AddWindow {
                app: app.clone(),
                spec: WindowSpec::new("w", Rect::new(0, 0, 10, 10)),
            })
            .await
            .unwrap();
        let uploads = driver.upload_count();

        driver.set_fail_commands(false);
        register(&handle).await;
        assert_eq!(driver.upload_count(), uploads + 1);
        assert_eq!(driver.last_upload().unwrap().rects.len(), 1);
    }

    #[tokio::test]
    async fn test_notifications() {
        let (_driver, handle) = setup();
        // the initial upload has happened once a reply comes back
        handle.status().await.unwrap();
        let mut watch = handle.subscribe();

        handle.set_default_hint(hint("Y2|D")).await.unwrap();
        assert_eq!(
            watch.recv().await.unwrap(),
            Notification::DefaultHintChanged { hint: hint("Y2|D") }
        );
        match watch.recv().await.unwrap() {
            Notification::HintsChanged { hints } => assert_eq!(hints.default_hint, hint("Y2|D")),
            other => panic!("expected hints_changed, got {:?}", other),
        }

        assert_eq!(handle.set_driver_mode(DriverMode::Fast).await.unwrap(), DriverMode::Fast);
        assert_eq!(
            watch.recv().await.unwrap(),
            Notification::DriverModeChanged {
                mode: DriverMode::Fast
            }
        );

        assert_eq!(handle.cycle_dither_mode().unwrap(), DitherMode::BlueNoise16);
        assert_eq!(
            watch.recv().await.unwrap(),
            Notification::DitherModeChanged {
                dither: DitherMode::BlueNoise16
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_usable_during_confirmation() {
        let (driver, handle) = setup();
        driver.set_latency(None);

        let background = handle.clone();
        let pending =
            tokio::spawn(async move { background.set_driver_mode(DriverMode::Fast).await });
        while handle.driver_state().1 != TransitionState::Confirming {
            tokio::task::yield_now().await;
        }

        let app = register(&handle).await;
        assert_eq!(handle.status().await.unwrap().apps, 1);
        assert!(matches!(
            handle.set_driver_mode(DriverMode::Normal).await,
            Err(ServiceError::Mode(ModeError::DriverBusy(_)))
        ));
        handle.apply(Mutation::RemoveApp(app)).await.unwrap();

        let result = pending.await.unwrap();
        assert!(matches!(
            result,
            Err(ServiceError::Mode(ModeError::ModeApplyTimeout { .. }))
        ));
        assert_eq!(handle.driver_state().0.mode, DriverMode::Normal);
    }

    #[tokio::test]
    async fn test_driver_hints_match_upload() {
        let (driver, handle) = setup();
        let app = register(&handle).await;
        handle
            .apply(Mutation::AddWindow {
                app,
                spec: WindowSpec::new("w", Rect::new(-20, 10, 40, 200)).with_hint(Some(hint("Y2"))),
            })
            .await
            .unwrap();

        let hints = handle.driver_hints().await.unwrap();
        assert_eq!(hints.rects.len(), 1);
        assert_eq!(hints.rects[0].area, Rect::new(0, 10, 40, 100));
        assert_eq!(Some(hints), driver.last_upload());
    }

    #[tokio::test]
    async fn test_redraw_delay_notifies_on_change() {
        let (driver, handle) = setup();
        handle.status().await.unwrap();
        let mut watch = handle.subscribe();

        assert_eq!(handle.set_redraw_delay(400).unwrap(), 400);
        assert_eq!(handle.driver_state().0.redraw_delay, 400);
        assert_eq!(driver.redraw_delay().unwrap(), 400);
        assert_eq!(
            watch.recv().await.unwrap(),
            Notification::RedrawDelayChanged { redraw_delay: 400 }
        );

        handle.set_redraw_delay(400).unwrap();
        assert!(watch.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_global_refresh() {
        let (driver, handle) = setup();
        handle.global_refresh().unwrap();
        assert_eq!(driver.refreshes(), 1);
    }
}
