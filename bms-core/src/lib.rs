#![no_std]

//! Shared logic for the battery-management controller.
//!
//! This crate stays portable across MCU firmware and host tooling by avoiding
//! the Rust standard library. The module-bus driver, pack aggregation,
//! debounced fault engine, and the controller state machine all live here so
//! the emulator and the firmware drive the exact same code.

#[cfg(test)]
extern crate std;

pub mod bus;
pub mod controller;
pub mod fault;
pub mod module;
pub mod pack;
pub mod repl;
pub mod setpoints;
