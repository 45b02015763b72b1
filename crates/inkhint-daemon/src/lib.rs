//! inkhint daemon library
//!
//! Tracks which screen regions belong to which application windows, resolves
//! the rendering hint that applies to every region and keeps the
//! `rockchip_ebc` driver's hint table and waveform mode in step.

pub mod bridge;
pub mod driver;
pub mod hint;
pub mod ipc;
pub mod niri_ipc;
pub mod protocol;
pub mod rect;
pub mod registry;
pub mod service;
