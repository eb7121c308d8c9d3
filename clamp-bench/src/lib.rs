//! Host bench for the AP-clamp core.
//!
//! Runs the real-time [`clamp_core::controller::Controller`] on a dedicated
//! tick thread against a simulated cell, with an interactive console on top.

pub mod cell;
pub mod config;
pub mod persist;
pub mod rig;
pub mod session;
