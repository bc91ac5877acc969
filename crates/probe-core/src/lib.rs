//! Hardware-independent core library for garden probes
//!
//! This crate contains all platform-agnostic logic of a sensing probe: the
//! bounded sensor registry, the per-sensor rolling reading buffers, the
//! single-wire (1-Wire) temperature bus driver, one sampling pass over all
//! sensors, and the control-server synchronization client.
//!
//! It is `#![no_std]` and never allocates, so it compiles on both embedded
//! targets and desktop hosts (for the simulator and tests). Radio links, pins,
//! timers and wall-clock time are reached through small collaborator traits
//! ([`sync::Connection`], [`sensors::PinInput`], [`onewire::OneWire`],
//! [`app_state::Scheduler`], [`clock::Clock`]).

#![no_std]

pub mod app_state;
pub mod clock;
pub mod config;
pub mod errors;
pub mod onewire;
pub mod sampling;
pub mod sensors;
pub mod storage;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;
