//! Snapshot diffing shared by bridges
//!
//! A bridge hands the session the complete list of windows it currently
//! wants registered. The session compares it with what it registered last
//! time and sends only the difference.

use std::collections::{HashMap, HashSet};

use super::{is_not_found, MutationSink};
use crate::registry::{AppId, Applied, Mutation, WindowId, WindowSpec};
use crate::service::ServiceError;

/// One compositor window as seen by a bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Compositor-side window id
    pub key: u64,
    /// Groups windows into applications
    pub pid: i32,
    pub spec: WindowSpec,
}

#[derive(Debug)]
struct Tracked {
    id: WindowId,
    pid: i32,
    spec: WindowSpec,
}

pub struct BridgeSession<S> {
    name: &'static str,
    sink: S,
    apps: HashMap<i32, AppId>,
    windows: HashMap<u64, Tracked>,
}

impl<S: MutationSink> BridgeSession<S> {
    pub fn new(name: &'static str, sink: S) -> Self {
        Self {
            name,
            sink,
            apps: HashMap::new(),
            windows: HashMap::new(),
        }
    }

    pub fn app_count(&self) -> usize {
        self.apps.len()
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// Bring the registry in line with `snapshot`
    pub async fn sync(&mut self, snapshot: Vec<WindowSnapshot>) -> Result<(), ServiceError> {
        let wanted_pids: HashSet<i32> = snapshot.iter().map(|w| w.pid).collect();
        let wanted_keys: HashMap<u64, i32> = snapshot.iter().map(|w| (w.key, w.pid)).collect();

        let stale_apps: Vec<i32> = self
            .apps
            .keys()
            .filter(|pid| !wanted_pids.contains(pid))
            .copied()
            .collect();
        for pid in stale_apps {
            self.remove_app(pid).await?;
        }

        let stale_windows: Vec<u64> = self
            .windows
            .iter()
            .filter(|(key, tracked)| wanted_keys.get(key) != Some(&tracked.pid))
            .map(|(key, _)| *key)
            .collect();
        for key in stale_windows {
            if let Some(tracked) = self.windows.remove(&key) {
                self.ignore_not_found(self.sink.apply(Mutation::RemoveWindow(tracked.id)).await)?;
            }
        }

        for window in snapshot {
            match self.windows.get(&window.key) {
                Some(tracked) if tracked.spec == window.spec => {}
                Some(tracked) => {
                    let result = self
                        .sink
                        .apply(Mutation::UpdateWindow {
                            window: tracked.id.clone(),
                            spec: window.spec.clone(),
                        })
                        .await;
                    match result {
                        Ok(_) => {
                            if let Some(tracked) = self.windows.get_mut(&window.key) {
                                tracked.spec = window.spec;
                            }
                        }
                        Err(e) if is_not_found(&e) => {
                            tracing::warn!(bridge = self.name, key = window.key, "Window vanished from registry: {}", e);
                            self.windows.remove(&window.key);
                        }
                        Err(e) => return Err(e),
                    }
                }
                None => self.add_window(window).await?,
            }
        }

        Ok(())
    }

    async fn add_window(&mut self, window: WindowSnapshot) -> Result<(), ServiceError> {
        let app = match self.apps.get(&window.pid) {
            Some(app) => app.clone(),
            None => match self.sink.apply(Mutation::RegisterApp { pid: window.pid }).await? {
                Applied::App(app) => {
                    self.apps.insert(window.pid, app.clone());
                    app
                }
                other => {
                    tracing::error!(bridge = self.name, "Unexpected reply to app registration: {:?}", other);
                    return Ok(());
                }
            },
        };

        let result = self
            .sink
            .apply(Mutation::AddWindow {
                app,
                spec: window.spec.clone(),
            })
            .await;
        match result {
            Ok(Applied::Window(id)) => {
                self.windows.insert(
                    window.key,
                    Tracked {
                        id,
                        pid: window.pid,
                        spec: window.spec,
                    },
                );
                Ok(())
            }
            Ok(other) => {
                tracing::error!(bridge = self.name, "Unexpected reply to window add: {:?}", other);
                Ok(())
            }
            Err(e) if is_not_found(&e) => {
                tracing::warn!(bridge = self.name, pid = window.pid, "Application vanished from registry: {}", e);
                self.apps.remove(&window.pid);
                self.windows.retain(|_, t| t.pid != window.pid);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn remove_app(&mut self, pid: i32) -> Result<(), ServiceError> {
        self.windows.retain(|_, t| t.pid != pid);
        if let Some(app) = self.apps.remove(&pid) {
            self.ignore_not_found(self.sink.apply(Mutation::RemoveApp(app)).await)?;
        }
        Ok(())
    }

    fn ignore_not_found(&self, result: Result<Applied, ServiceError>) -> Result<(), ServiceError> {
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                tracing::warn!(bridge = self.name, "Stale registry key: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Remove everything this session registered
    pub async fn reset(&mut self) -> Result<(), ServiceError> {
        let pids: Vec<i32> = self.apps.keys().copied().collect();
        for pid in pids {
            self.remove_app(pid).await?;
        }
        self.windows.clear();
        tracing::debug!(bridge = self.name, "Session reset");
        Ok(())
    }
}
