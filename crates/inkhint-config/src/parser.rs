//! KDL configuration parser

use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::model::*;

/// Location used when no `--config` is given
pub fn default_config_path() -> PathBuf {
    PathBuf::from(shellexpand::tilde("~/.config/inkhint/config.kdl").into_owned())
}

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Like [`parse_config`], but a missing file yields the defaults
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "No config file, using defaults");
        return Ok(Config::default());
    }
    parse_config(path)
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        let span = miette::SourceSpan::from((e.span.offset(), e.span.len()));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "global" => {
                config.global = parse_global(node)?;
            }
            "driver" => {
                config.driver = parse_driver(node)?;
            }
            "default-hint" => {
                config.default_hint = Some(first_string(node, "default-hint")?);
            }
            "bridge" => {
                config.bridges.push(parse_bridge(node)?);
            }
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    Ok(config)
}

fn first_string(node: &kdl::KdlNode, field: &str) -> Result<String, ConfigError> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
        .ok_or_else(|| ConfigError::MissingField {
            field: format!("{} (string argument)", field),
        })
}

fn int_args(node: &kdl::KdlNode) -> Vec<i64> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_i64())
        .collect()
}

fn first_u64(node: &kdl::KdlNode, field: &str) -> Result<u64, ConfigError> {
    match int_args(node).first() {
        Some(&v) if v > 0 => Ok(v as u64),
        Some(&v) => Err(ConfigError::Invalid {
            message: format!("{} must be positive, got {}", field, v),
        }),
        None => Err(ConfigError::MissingField {
            field: format!("{} (integer argument)", field),
        }),
    }
}

fn expand_path(val: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(val).into_owned())
}

fn parse_global(node: &kdl::KdlNode) -> Result<GlobalConfig, ConfigError> {
    let mut global = GlobalConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "log-level" => {
                    let val = first_string(child, "log-level")?;
                    global.log_level = val
                        .parse()
                        .map_err(|e| ConfigError::Invalid { message: e })?;
                }
                "socket-path" => {
                    global.socket_path = Some(expand_path(&first_string(child, "socket-path")?));
                }
                name => {
                    tracing::warn!("Unknown global config option: {}", name);
                }
            }
        }
    }

    Ok(global)
}

fn parse_driver(node: &kdl::KdlNode) -> Result<DriverConfig, ConfigError> {
    let mut driver = DriverConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "backend" => {
                    driver.backend = first_string(child, "backend")?
                        .parse()
                        .map_err(|e| ConfigError::Invalid { message: e })?;
                }
                "device" => {
                    driver.device = expand_path(&first_string(child, "device")?);
                }
                "parameters" => {
                    driver.parameters = expand_path(&first_string(child, "parameters")?);
                }
                "screen" => {
                    driver.screen = screen_size(child)?;
                }
                "poll-interval-ms" => {
                    driver.poll_interval_ms = first_u64(child, "poll-interval-ms")?;
                }
                "mode-timeout-ms" => {
                    driver.mode_timeout_ms = first_u64(child, "mode-timeout-ms")?;
                }
                name => {
                    tracing::warn!("Unknown driver config option: {}", name);
                }
            }
        }
    }

    Ok(driver)
}

fn screen_size(node: &kdl::KdlNode) -> Result<(i32, i32), ConfigError> {
    let &[w, h] = int_args(node).as_slice() else {
        return Err(ConfigError::Invalid {
            message: "screen expects two positive integers: WIDTH HEIGHT".to_string(),
        });
    };
    if w <= 0 || h <= 0 {
        return Err(ConfigError::Invalid {
            message: format!("screen size must be positive, got {}x{}", w, h),
        });
    }

    match (i32::try_from(w), i32::try_from(h)) {
        (Ok(w), Ok(h)) => Ok((w, h)),
        _ => Err(ConfigError::Invalid {
            message: format!("screen size {}x{} is too large", w, h),
        }),
    }
}

fn parse_bridge(node: &kdl::KdlNode) -> Result<BridgeConfig, ConfigError> {
    let kind = first_string(node, "bridge name (e.g., `bridge \"niri\" { ... }`)")?;

    match kind.as_str() {
        "niri" => {
            let mut niri = NiriBridgeConfig::default();
            if let Some(children) = node.children() {
                for child in children.nodes() {
                    match child.name().value() {
                        "output" => {
                            niri.output = first_string(child, "output")?;
                        }
                        "rule" => {
                            niri.rules.push(parse_rule(child)?);
                        }
                        name => {
                            tracing::warn!("Unknown niri bridge option: {}", name);
                        }
                    }
                }
            }
            Ok(BridgeConfig::Niri(niri))
        }
        other => Err(ConfigError::Invalid {
            message: format!("Unknown bridge '{}' (supported: niri)", other),
        }),
    }
}

fn parse_rule(node: &kdl::KdlNode) -> Result<HintRule, ConfigError> {
    let prop = |key: &str| {
        node.get(key)
            .and_then(|e| e.value().as_string())
            .map(|s| s.to_string())
    };

    let hint = prop("hint").ok_or_else(|| ConfigError::MissingField {
        field: "rule hint (e.g., `rule app-id=\"foot\" hint=\"Y1|T\"`)".to_string(),
    })?;
    let rule = HintRule {
        app_id: prop("app-id"),
        title: prop("title"),
        hint,
    };

    if rule.app_id.is_none() && rule.title.is_none() {
        return Err(ConfigError::Invalid {
            message: format!("Rule with hint '{}' needs app-id or title", rule.hint),
        });
    }

    Ok(rule)
}
