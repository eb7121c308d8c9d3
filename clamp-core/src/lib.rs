#![no_std]

//! Portable real-time core for the AP-clamp rig.
//!
//! The tick path ([`controller::Controller::execute`]) never allocates or
//! blocks. Everything it touches is either fixed-capacity (`heapless`) or
//! reserved up front ([`buffers::WaveformStore`]). Mutations arrive as
//! [`control::ControlRequest`] values applied between ticks.

extern crate alloc;

pub mod apd;
pub mod buffers;
pub mod config;
pub mod control;
pub mod controller;
pub mod protocol;
pub mod repl;
pub mod sequencer;
pub mod telemetry;
pub mod timing;
