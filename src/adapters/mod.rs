//! Protocol adapter implementations
//!
//! This module contains implementations of the `DeviceProtocol` trait that
//! ship with the crate. Real transports live with the host framework.

pub mod mock;

pub use mock::{MockConnectionInfo, MockDescriptor, MockProtocol, MockSession};
