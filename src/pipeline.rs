//! Batched read/write command execution.
//!
//! Every batch runs the same sequence:
//!
//! 1. Take the address lease from the [`AddressGate`]
//! 2. Validate the whole batch's protocol attributes
//! 3. Resolve connection info and open a [`ConnectionSession`]
//! 4. Run the sub-commands strictly in request order, stopping at the first
//!    failure
//! 5. Close the session, then release the lease
//!
//! Step 5 happens on every path out of steps 2-4, including a caller dropping
//! the batch future: the open session owns the lease and closes in the
//! background before releasing it. Writes issued before a failure stay
//! applied; there is no rollback across a batch.

use crate::error::{DriverError, DriverResult, ReadFailure};
use crate::gate::AddressGate;
use crate::models::{Address, CommandRequest, CommandValue};
use crate::protocol::DeviceProtocol;
use crate::session::ConnectionSession;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Executes read and write batches against one protocol.
pub struct CommandPipeline<P: DeviceProtocol> {
    protocol: Arc<P>,
    gate: AddressGate,
}

impl<P: DeviceProtocol> CommandPipeline<P> {
    /// Pipeline using `protocol` for device access and `gate` for exclusivity.
    pub fn new(protocol: Arc<P>, gate: AddressGate) -> Self {
        Self { protocol, gate }
    }

    /// The gate guarding device addresses.
    pub fn gate(&self) -> &AddressGate {
        &self.gate
    }

    /// The protocol collaborator.
    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    /// Read every request in order and return one value per request.
    ///
    /// On failure the returned [`ReadFailure`] carries the values read before
    /// the failing request. Attribute validation runs after the lease is taken.
    pub async fn handle_read(
        &self,
        address: &Address,
        requests: &[CommandRequest],
    ) -> Result<Vec<CommandValue>, ReadFailure> {
        let lease = self
            .gate
            .acquire(address)
            .await
            .map_err(|e| ReadFailure::before_execution(e, requests.len()))?;

        let mut results: Vec<Option<CommandValue>> = vec![None; requests.len()];

        if let Err(error) = self.protocol.validate_attributes(requests) {
            info!(error = %error, "Rejecting batch with invalid attributes");
            return Err(ReadFailure { error, results });
        }

        let mut session = match ConnectionSession::open(self.protocol.as_ref(), lease).await {
            Ok(session) => session,
            Err(error) => return Err(ReadFailure { error, results }),
        };

        let outcome = self.read_all(&mut session, requests, &mut results).await;
        session.close().await;

        match outcome {
            Ok(()) => Ok(results.into_iter().flatten().collect()),
            Err(error) => Err(ReadFailure { error, results }),
        }
    }

    /// Write `values[i]` to `requests[i]` in order.
    ///
    /// Stops at the first failing write; earlier writes are not undone.
    pub async fn handle_write(
        &self,
        address: &Address,
        requests: &[CommandRequest],
        values: &[CommandValue],
    ) -> DriverResult<()> {
        let lease = self.gate.acquire(address).await?;

        if requests.len() != values.len() {
            let error = DriverError::AttributeValidation(format!(
                "{} write requests but {} values",
                requests.len(),
                values.len()
            ));
            info!(error = %error, "Rejecting batch with invalid attributes");
            return Err(error);
        }

        if let Err(error) = self.protocol.validate_attributes(requests) {
            info!(error = %error, "Rejecting batch with invalid attributes");
            return Err(error);
        }

        let mut session = ConnectionSession::open(self.protocol.as_ref(), lease).await?;
        let outcome = self.write_all(&mut session, requests, values).await;
        session.close().await;

        outcome
    }

    async fn read_all(
        &self,
        session: &mut ConnectionSession<P>,
        requests: &[CommandRequest],
        results: &mut [Option<CommandValue>],
    ) -> DriverResult<()> {
        for (index, (request, slot)) in requests.iter().zip(results.iter_mut()).enumerate() {
            let value = self.read_one(session, request).await.map_err(|e| {
                info!(index, resource = request.name(), error = %e, "Read command failed");
                DriverError::sub_command(index, request.name(), e)
            })?;
            debug!(index, resource = request.name(), value = ?value.value, "Read command finished");
            *slot = Some(value);
        }
        Ok(())
    }

    async fn read_one(
        &self,
        session: &mut ConnectionSession<P>,
        request: &CommandRequest,
    ) -> DriverResult<CommandValue> {
        let descriptor = self.protocol.build_descriptor(&request.resource);
        let bytes = session.get(&descriptor).await?;
        self.protocol
            .decode_to_value(&request.options, &bytes, &descriptor)
    }

    async fn write_all(
        &self,
        session: &mut ConnectionSession<P>,
        requests: &[CommandRequest],
        values: &[CommandValue],
    ) -> DriverResult<()> {
        for (index, (request, value)) in requests.iter().zip(values).enumerate() {
            self.write_one(session, request, value).await.map_err(|e| {
                let e = DriverError::sub_command(index, request.name(), e);
                error!(error = %e, "Write command failed");
                e
            })?;
            debug!(index, resource = request.name(), "Write command finished");
        }
        Ok(())
    }

    async fn write_one(
        &self,
        session: &mut ConnectionSession<P>,
        request: &CommandRequest,
        value: &CommandValue,
    ) -> DriverResult<()> {
        let descriptor = self.protocol.build_descriptor(&request.resource);
        let payload = self.protocol.encode_to_bytes(&descriptor, value)?;
        session.set(&descriptor, &payload).await
    }
}
