//! Window and application registry
//!
//! Bridges register applications and their windows here. The registry owns
//! hint resolution: which hint the driver should use at a given pixel, and
//! the full list of per-window hint rectangles.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hint::HintSpec;
use crate::rect::Rect;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("application {0} not found")]
    AppNotFound(AppId),
    #[error("window {0} not found")]
    WindowNotFound(WindowId),
}

macro_rules! uuid_key {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

uuid_key!(AppId);
uuid_key!(WindowId);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Application {
    pub id: AppId,
    /// Informational only, never used for lookups
    pub pid: i32,
    pub windows: Vec<WindowId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Window {
    pub id: WindowId,
    pub app: AppId,
    pub title: String,
    pub area: Rect,
    #[serde(with = "crate::hint::optional")]
    pub hint: Option<HintSpec>,
    pub visible: bool,
    pub fullscreen: bool,
    pub z_index: i32,
}

/// Every mutable window property, as sent by bridges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    #[serde(default)]
    pub title: String,
    pub area: Rect,
    #[serde(default, with = "crate::hint::optional")]
    pub hint: Option<HintSpec>,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub fullscreen: bool,
    #[serde(default)]
    pub z_index: i32,
}

fn default_visible() -> bool {
    true
}

impl WindowSpec {
    pub fn new(title: impl Into<String>, area: Rect) -> Self {
        Self {
            title: title.into(),
            area,
            hint: None,
            visible: true,
            fullscreen: false,
            z_index: 0,
        }
    }

    pub fn with_hint(mut self, hint: Option<HintSpec>) -> Self {
        self.hint = hint;
        self
    }

    pub fn with_z_index(mut self, z_index: i32) -> Self {
        self.z_index = z_index;
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    fn apply_to(self, window: &mut Window) {
        window.title = self.title;
        window.area = self.area;
        window.hint = self.hint;
        window.visible = self.visible;
        window.fullscreen = self.fullscreen;
        window.z_index = self.z_index;
    }

    /// Whether `window` already carries exactly these properties
    pub fn matches(&self, window: &Window) -> bool {
        self.title == window.title
            && self.area == window.area
            && self.hint == window.hint
            && self.visible == window.visible
            && self.fullscreen == window.fullscreen
            && self.z_index == window.z_index
    }
}

/// A single-property window update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowField {
    Title(String),
    Area(Rect),
    /// `None` reverts to the default hint
    Hint(Option<HintSpec>),
    Visible(bool),
    Fullscreen(bool),
    ZIndex(i32),
}

/// A change to registry content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    RegisterApp { pid: i32 },
    RemoveApp(AppId),
    AddWindow { app: AppId, spec: WindowSpec },
    RemoveWindow(WindowId),
    UpdateWindow { window: WindowId, spec: WindowSpec },
    UpdateField { window: WindowId, field: WindowField },
    SetDefaultHint(HintSpec),
}

/// Result of a successful mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    App(AppId),
    Window(WindowId),
    Done,
}

/// A hint covering one window's area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RectHint {
    pub area: Rect,
    pub hint: HintSpec,
}

/// What gets uploaded to the driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverHints {
    pub default_hint: HintSpec,
    /// Bottom-most first; later rectangles paint over earlier ones
    pub rects: Vec<RectHint>,
}

#[derive(Debug, Clone)]
pub struct Registry {
    apps: HashMap<AppId, Application>,
    windows: HashMap<WindowId, Window>,
    default_hint: HintSpec,
}

impl Registry {
    pub fn new(default_hint: HintSpec) -> Self {
        Self {
            apps: HashMap::new(),
            windows: HashMap::new(),
            default_hint,
        }
    }

    pub fn register_app(&mut self, pid: i32) -> AppId {
        let id = AppId::generate();
        self.apps.insert(
            id.clone(),
            Application {
                id: id.clone(),
                pid,
                windows: Vec::new(),
            },
        );
        tracing::debug!(app = %id, pid, "Registered application");
        id
    }

    /// Removes the application together with all of its windows
    pub fn remove_app(&mut self, app: &AppId) -> Result<(), RegistryError> {
        let removed = self
            .apps
            .remove(app)
            .ok_or_else(|| RegistryError::AppNotFound(app.clone()))?;
        for window in &removed.windows {
            self.windows.remove(window);
        }
        tracing::debug!(app = %app, windows = removed.windows.len(), "Removed application");
        Ok(())
    }

    pub fn add_window(&mut self, app: &AppId, spec: WindowSpec) -> Result<WindowId, RegistryError> {
        let owner = self
            .apps
            .get_mut(app)
            .ok_or_else(|| RegistryError::AppNotFound(app.clone()))?;

        let id = WindowId::generate();
        owner.windows.push(id.clone());

        let mut window = Window {
            id: id.clone(),
            app: app.clone(),
            title: String::new(),
            area: Rect::default(),
            hint: None,
            visible: true,
            fullscreen: false,
            z_index: 0,
        };
        spec.apply_to(&mut window);
        tracing::debug!(window = %id, app = %app, title = %window.title, "Added window");
        self.windows.insert(id.clone(), window);
        Ok(id)
    }

    pub fn remove_window(&mut self, window: &WindowId) -> Result<(), RegistryError> {
        let removed = self
            .windows
            .remove(window)
            .ok_or_else(|| RegistryError::WindowNotFound(window.clone()))?;
        if let Some(app) = self.apps.get_mut(&removed.app) {
            app.windows.retain(|w| w != window);
        }
        tracing::debug!(window = %window, "Removed window");
        Ok(())
    }

    fn window_mut(&mut self, window: &WindowId) -> Result<&mut Window, RegistryError> {
        self.windows
            .get_mut(window)
            .ok_or_else(|| RegistryError::WindowNotFound(window.clone()))
    }

    /// Replaces every window property at once
    pub fn update_window(&mut self, window: &WindowId, spec: WindowSpec) -> Result<(), RegistryError> {
        spec.apply_to(self.window_mut(window)?);
        Ok(())
    }

    pub fn update_field(&mut self, window: &WindowId, field: WindowField) -> Result<(), RegistryError> {
        let w = self.window_mut(window)?;
        match field {
            WindowField::Title(title) => w.title = title,
            WindowField::Area(area) => w.area = area,
            WindowField::Hint(hint) => w.hint = hint,
            WindowField::Visible(visible) => w.visible = visible,
            WindowField::Fullscreen(fullscreen) => w.fullscreen = fullscreen,
            WindowField::ZIndex(z) => w.z_index = z,
        }
        Ok(())
    }

    pub fn update_title(&mut self, window: &WindowId, title: String) -> Result<(), RegistryError> {
        self.update_field(window, WindowField::Title(title))
    }

    pub fn update_area(&mut self, window: &WindowId, area: Rect) -> Result<(), RegistryError> {
        self.update_field(window, WindowField::Area(area))
    }

    pub fn update_hint(&mut self, window: &WindowId, hint: Option<HintSpec>) -> Result<(), RegistryError> {
        self.update_field(window, WindowField::Hint(hint))
    }

    pub fn update_visible(&mut self, window: &WindowId, visible: bool) -> Result<(), RegistryError> {
        self.update_field(window, WindowField::Visible(visible))
    }

    pub fn update_fullscreen(&mut self, window: &WindowId, fullscreen: bool) -> Result<(), RegistryError> {
        self.update_field(window, WindowField::Fullscreen(fullscreen))
    }

    pub fn update_zindex(&mut self, window: &WindowId, z_index: i32) -> Result<(), RegistryError> {
        self.update_field(window, WindowField::ZIndex(z_index))
    }

    pub fn set_default_hint(&mut self, hint: HintSpec) {
        self.default_hint = hint;
    }

    pub fn default_hint(&self) -> HintSpec {
        self.default_hint
    }

    pub fn apply(&mut self, mutation: Mutation) -> Result<Applied, RegistryError> {
        match mutation {
            Mutation::RegisterApp { pid } => Ok(Applied::App(self.register_app(pid))),
            Mutation::RemoveApp(app) => self.remove_app(&app).map(|_| Applied::Done),
            Mutation::AddWindow { app, spec } => self.add_window(&app, spec).map(Applied::Window),
            Mutation::RemoveWindow(window) => self.remove_window(&window).map(|_| Applied::Done),
            Mutation::UpdateWindow { window, spec } => {
                self.update_window(&window, spec).map(|_| Applied::Done)
            }
            Mutation::UpdateField { window, field } => {
                self.update_field(&window, field).map(|_| Applied::Done)
            }
            Mutation::SetDefaultHint(hint) => {
                self.set_default_hint(hint);
                Ok(Applied::Done)
            }
        }
    }

    pub fn app(&self, app: &AppId) -> Option<&Application> {
        self.apps.get(app)
    }

    pub fn window(&self, window: &WindowId) -> Option<&Window> {
        self.windows.get(window)
    }

    pub fn app_count(&self) -> usize {
        self.apps.len()
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// Visible windows, topmost first. Equal z-indexes keep map order.
    fn stacked(&self) -> Vec<&Window> {
        let mut visible: Vec<&Window> = self.windows.values().filter(|w| w.visible).collect();
        visible.sort_by_key(|w| Reverse(w.z_index));
        visible
    }

    fn effective_hint(&self, window: &Window) -> HintSpec {
        window.hint.unwrap_or(self.default_hint)
    }

    pub fn resolve_hint_at(&self, x: i32, y: i32) -> HintSpec {
        self.stacked()
            .into_iter()
            .find(|w| w.area.contains(x, y))
            .map(|w| self.effective_hint(w))
            .unwrap_or(self.default_hint)
    }

    /// Hint rectangles of all visible windows, topmost first
    pub fn resolve_all(&self) -> Vec<RectHint> {
        self.stacked()
            .into_iter()
            .map(|w| RectHint {
                area: w.area,
                hint: self.effective_hint(w),
            })
            .collect()
    }

    /// Hints as the driver wants them, bottom-most first.
    ///
    /// Each window is clipped to the screen and masked by every window above
    /// it; what stays visible is sent as its bounding box. Windows hidden by
    /// any combination of higher windows are left out.
    pub fn driver_hints(&self, screen: Rect) -> DriverHints {
        let mut above: Vec<Rect> = Vec::new();
        let mut rects = Vec::new();

        for rect_hint in self.resolve_all() {
            let Some(clipped) = screen.intersection(&rect_hint.area) else {
                continue;
            };

            let visible = above.iter().fold(vec![clipped], |parts, upper| {
                parts.iter().flat_map(|p| p.subtract(upper)).collect()
            });
            if let Some(area) = Rect::bounds(&visible) {
                rects.push(RectHint {
                    area,
                    hint: rect_hint.hint,
                });
            }
            above.push(clipped);
        }

        rects.reverse();
        DriverHints {
            default_hint: self.default_hint,
            rects,
        }
    }
}
