//! Framework-facing driver entry points.
//!
//! The host framework talks to one [`DeviceDriver`] for the lifetime of the
//! process. [`DriverCell`] gives the host a guarded one-time constructor so
//! the instance is built exactly once no matter how often the construction
//! entry point is called; the resulting `Arc` is then passed to call sites.
//!
//! # Example
//!
//! ```no_run
//! use daq_device_gate::adapters::MockProtocol;
//! use daq_device_gate::driver::{DeviceDriver, DriverCell};
//! use daq_device_gate::models::{Address, CommandRequest, DeviceResource, ValueType};
//! use std::num::NonZeroUsize;
//!
//! static DRIVER: DriverCell<MockProtocol> = DriverCell::new();
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let limit = NonZeroUsize::new(100).ok_or("zero limit")?;
//! let driver = DRIVER.get_or_construct(|| DeviceDriver::new(MockProtocol::new(), limit));
//!
//! let (tx, _rx) = tokio::sync::mpsc::channel(16);
//! driver.initialize(tracing::info_span!("mock_driver"), tx)?;
//!
//! let request = CommandRequest::new(DeviceResource::new("temperature"), ValueType::Int);
//! let values = driver.handle_read(&Address::from("mock://oven"), &[request]).await?;
//! println!("{values:?}");
//! # Ok(())
//! # }
//! ```

use crate::config::{ConfigError, GateConfig};
use crate::error::{DriverError, DriverResult, ReadFailure};
use crate::gate::AddressGate;
use crate::models::{Address, AsyncValues, CommandRequest, CommandValue};
use crate::pipeline::CommandPipeline;
use crate::protocol::DeviceProtocol;
use once_cell::sync::OnceCell;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// State created by [`DeviceDriver::initialize`].
struct DriverRuntime<P: DeviceProtocol> {
    log_span: Span,
    async_values: mpsc::Sender<AsyncValues>,
    pipeline: CommandPipeline<P>,
}

/// Single driver instance exposed to the host framework.
pub struct DeviceDriver<P: DeviceProtocol> {
    protocol: Arc<P>,
    limit: NonZeroUsize,
    runtime: OnceCell<DriverRuntime<P>>,
}

impl<P: DeviceProtocol> DeviceDriver<P> {
    /// Uninitialized driver admitting `limit` pending callers per address.
    pub fn new(protocol: P, limit: NonZeroUsize) -> Self {
        Self {
            protocol: Arc::new(protocol),
            limit,
            runtime: OnceCell::new(),
        }
    }

    /// Uninitialized driver using the `[gate]` configuration section.
    pub fn from_config(protocol: P, config: &GateConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(protocol, config.limit()?))
    }

    /// Store the host's log span and async value sink and create the gate.
    ///
    /// Succeeds once. Any later call returns
    /// [`DriverError::AlreadyInitialized`] and leaves the gate untouched.
    pub fn initialize(&self, log_span: Span, async_values: mpsc::Sender<AsyncValues>) -> DriverResult<()> {
        let runtime = DriverRuntime {
            log_span,
            async_values,
            pipeline: CommandPipeline::new(Arc::clone(&self.protocol), AddressGate::new(self.limit)),
        };

        if self.runtime.set(runtime).is_err() {
            warn!("Ignoring repeated driver initialization");
            return Err(DriverError::AlreadyInitialized);
        }

        if let Some(runtime) = self.runtime.get() {
            info!(parent: &runtime.log_span, limit = self.limit.get(), "Driver initialized");
        }
        Ok(())
    }

    /// Whether [`initialize`](Self::initialize) has completed.
    pub fn is_initialized(&self) -> bool {
        self.runtime.get().is_some()
    }

    /// Read a batch from the device at `address`.
    pub async fn handle_read(
        &self,
        address: &Address,
        requests: &[CommandRequest],
    ) -> Result<Vec<CommandValue>, ReadFailure> {
        let runtime = self
            .runtime()
            .map_err(|e| ReadFailure::before_execution(e, requests.len()))?;

        let span = info_span!(
            parent: &runtime.log_span,
            "read_batch",
            %address,
            commands = requests.len(),
            call_id = %Uuid::new_v4()
        );
        runtime
            .pipeline
            .handle_read(address, requests)
            .instrument(span)
            .await
    }

    /// Write a batch to the device at `address`.
    pub async fn handle_write(
        &self,
        address: &Address,
        requests: &[CommandRequest],
        values: &[CommandValue],
    ) -> DriverResult<()> {
        let runtime = self.runtime()?;

        let span = info_span!(
            parent: &runtime.log_span,
            "write_batch",
            %address,
            commands = requests.len(),
            call_id = %Uuid::new_v4()
        );
        runtime
            .pipeline
            .handle_write(address, requests, values)
            .instrument(span)
            .await
    }

    /// Push values to the host outside of a read call.
    pub async fn publish_async(&self, values: AsyncValues) -> DriverResult<()> {
        let runtime = self.runtime()?;
        debug!(parent: &runtime.log_span, device = %values.device, count = values.values.len(), "Publishing async values");
        runtime
            .async_values
            .send(values)
            .await
            .map_err(|_| DriverError::AsyncSinkClosed)
    }

    /// Not supported by this driver.
    pub fn stop(&self, force: bool) -> DriverResult<()> {
        debug!(force, "Stop requested");
        Err(DriverError::Unsupported("stop"))
    }

    /// Not supported by this driver.
    pub fn disconnect(&self, address: &Address) -> DriverResult<()> {
        debug!(%address, "Disconnect requested");
        Err(DriverError::Unsupported("disconnect"))
    }

    /// The address gate, once initialized.
    pub fn gate(&self) -> Option<&AddressGate> {
        self.runtime.get().map(|runtime| runtime.pipeline.gate())
    }

    /// The protocol collaborator.
    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    fn runtime(&self) -> DriverResult<&DriverRuntime<P>> {
        self.runtime.get().ok_or(DriverError::NotInitialized)
    }
}

/// Guarded one-time constructor for the process-wide driver.
///
/// Usable in a `static`; the first `get_or_construct` builds the driver and
/// every call, concurrent or not, gets the same instance.
pub struct DriverCell<P: DeviceProtocol> {
    cell: OnceCell<Arc<DeviceDriver<P>>>,
}

impl<P: DeviceProtocol> DriverCell<P> {
    /// Empty cell.
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// Return the driver, building it with `construct` on first use.
    pub fn get_or_construct<F>(&self, construct: F) -> Arc<DeviceDriver<P>>
    where
        F: FnOnce() -> DeviceDriver<P>,
    {
        Arc::clone(self.cell.get_or_init(|| {
            debug!("Constructing driver instance");
            Arc::new(construct())
        }))
    }

    /// The driver, if it has been constructed.
    pub fn get(&self) -> Option<Arc<DeviceDriver<P>>> {
        self.cell.get().cloned()
    }
}

impl<P: DeviceProtocol> Default for DriverCell<P> {
    fn default() -> Self {
        Self::new()
    }
}
