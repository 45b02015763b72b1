//! Configuration parsing for inkhint
//!
//! This crate handles parsing the KDL configuration file shared by the
//! daemon and the CLI.

mod error;
mod model;
mod parser;

pub use error::ConfigError;
pub use model::*;
pub use parser::{default_config_path, load_config, parse_config, parse_config_str};
