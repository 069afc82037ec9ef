//! Contracts for the protocol-specific collaborators of the driver.
//!
//! The driver owns admission control, exclusivity and resource cleanup. Wire
//! encoding, connection parameter resolution and the transport itself are
//! supplied by a [`DeviceProtocol`] implementation.

use crate::error::DriverResult;
use crate::models::{Address, CommandRequest, CommandValue, DeviceResource, ReadOptions};
use async_trait::async_trait;
use std::fmt::Debug;

/// Live transport session to one device.
///
/// A session is owned by exactly one pipeline invocation and is never shared.
#[async_trait]
pub trait DeviceSession: Send + 'static {
    /// Protocol descriptor addressing one resource on the device.
    type Descriptor: Send + Sync;

    /// Read the raw bytes of a resource.
    async fn get(&mut self, descriptor: &Self::Descriptor) -> DriverResult<Vec<u8>>;

    /// Write raw bytes to a resource.
    async fn set(&mut self, descriptor: &Self::Descriptor, payload: &[u8]) -> DriverResult<()>;

    /// Close the session. Failures are reported but never affect the
    /// outcome of the batch that used the session.
    async fn close(&mut self) -> DriverResult<()>;
}

/// Protocol collaborator used by the command pipeline.
#[async_trait]
pub trait DeviceProtocol: Send + Sync + 'static {
    /// Transport-specific parameters resolved from an address.
    type ConnectionInfo: Debug + Send + Sync;

    /// Protocol descriptor built from resource metadata.
    type Descriptor: Debug + Send + Sync;

    /// Session type opened by this protocol.
    type Session: DeviceSession<Descriptor = Self::Descriptor>;

    /// Check the protocol attributes of a whole batch.
    fn validate_attributes(&self, requests: &[CommandRequest]) -> DriverResult<()>;

    /// Derive connection parameters from an address.
    fn resolve_connection_info(&self, address: &Address) -> DriverResult<Self::ConnectionInfo>;

    /// Open a session using resolved connection parameters.
    async fn open_session(&self, info: &Self::ConnectionInfo) -> DriverResult<Self::Session>;

    /// Build the protocol descriptor for a resource.
    fn build_descriptor(&self, resource: &DeviceResource) -> Self::Descriptor;

    /// Turn raw bytes into a typed value.
    fn decode_to_value(
        &self,
        options: &ReadOptions,
        bytes: &[u8],
        descriptor: &Self::Descriptor,
    ) -> DriverResult<CommandValue>;

    /// Turn a typed value into a payload for `set`.
    fn encode_to_bytes(&self, descriptor: &Self::Descriptor, value: &CommandValue) -> DriverResult<Vec<u8>>;
}
