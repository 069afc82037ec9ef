//! Core library for the daq-device-gate driver.
//!
//! Mediates concurrent access to devices that can only serve one command
//! session at a time, and runs batched read/write command sequences against
//! them. The host framework owns device registration and scheduling; this
//! crate provides the per-address gate, the command pipeline and the
//! framework-facing driver entry points. Protocol details plug in through
//! [`protocol::DeviceProtocol`].

pub mod adapters;
pub mod config;
pub mod driver;
pub mod error;
pub mod gate;
pub mod models;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod tracing_setup;

pub use driver::{DeviceDriver, DriverCell};
pub use error::{DriverError, DriverResult, ReadFailure};
pub use gate::{AddressGate, AddressLease};
pub use models::{Address, CommandRequest, CommandValue};
