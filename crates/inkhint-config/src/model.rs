//! Configuration data model

use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub global: GlobalConfig,
    pub driver: DriverConfig,
    /// Hint applied to uncovered pixels, overriding the driver's own default.
    /// Kept as text; the daemon validates it with the hint codec.
    pub default_hint: Option<String>,
    pub bridges: Vec<BridgeConfig>,
}

/// Global settings
#[derive(Debug, Clone, Default)]
pub struct GlobalConfig {
    pub log_level: LogLevel,
    /// Overrides the IPC socket location
    pub socket_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// Which driver implementation the daemon talks to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DriverBackend {
    /// hrdl's rockchip_ebc kernel driver
    #[default]
    RockchipEbc,
    /// In-process driver, for running without the hardware
    Memory,
}

impl std::str::FromStr for DriverBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rockchip-ebc" | "rockchip_ebc" => Ok(Self::RockchipEbc),
            "memory" => Ok(Self::Memory),
            _ => Err(format!(
                "Unknown driver backend: {} (expected \"rockchip-ebc\" or \"memory\")",
                s
            )),
        }
    }
}

/// Driver access and mode-change timing
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub backend: DriverBackend,
    /// DRM card node accepting the ebc ioctls
    pub device: PathBuf,
    /// Directory holding the module parameters
    pub parameters: PathBuf,
    /// Panel size in pixels (width, height)
    pub screen: (i32, i32),
    pub poll_interval_ms: u64,
    pub mode_timeout_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            backend: DriverBackend::RockchipEbc,
            device: PathBuf::from("/dev/dri/by-path/platform-fdec0000.ebc-card"),
            parameters: PathBuf::from("/sys/module/rockchip_ebc/parameters"),
            screen: (1872, 1404),
            poll_interval_ms: 50,
            mode_timeout_ms: 5000,
        }
    }
}

/// A compositor integration to start
#[derive(Debug, Clone)]
pub enum BridgeConfig {
    Niri(NiriBridgeConfig),
}

impl BridgeConfig {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Niri(_) => "niri",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NiriBridgeConfig {
    /// Output the e-paper panel is attached to
    pub output: String,
    pub rules: Vec<HintRule>,
}

impl Default for NiriBridgeConfig {
    fn default() -> Self {
        Self {
            output: "DPI-1".to_string(),
            rules: Vec::new(),
        }
    }
}

/// Assigns a hint to windows matching every given criterion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintRule {
    /// Exact app-id match
    pub app_id: Option<String>,
    /// Substring of the window title
    pub title: Option<String>,
    pub hint: String,
}

impl HintRule {
    pub fn matches(&self, app_id: &str, title: &str) -> bool {
        let app_ok = self.app_id.as_deref().map_or(true, |a| a == app_id);
        let title_ok = self.title.as_deref().map_or(true, |t| title.contains(t));
        app_ok && title_ok
    }
}
