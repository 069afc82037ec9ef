//! Scoped transport session for one pipeline invocation.
//!
//! A [`ConnectionSession`] owns the [`AddressLease`] it was opened under, so
//! the address is only released after the session has been closed. Closing
//! runs on a detached task that drops the lease last. If the caller's future
//! is dropped mid-batch or mid-close, the device is still closed before the
//! next caller is admitted.

use crate::error::{DriverError, DriverResult};
use crate::gate::AddressLease;
use crate::models::Address;
use crate::protocol::{DeviceProtocol, DeviceSession};
use tokio::runtime::Handle;
use tracing::{debug, info, warn, Instrument};

/// Session opened for a single batch.
///
/// The pipeline finishes every batch with [`ConnectionSession::close`]. A
/// session dropped without it is closed in the background.
pub struct ConnectionSession<P: DeviceProtocol> {
    address: Address,
    inner: Option<P::Session>,
    lease: Option<AddressLease>,
}

impl<P: DeviceProtocol> ConnectionSession<P> {
    /// Resolve connection parameters for the leased address and open a session.
    ///
    /// On failure the lease is dropped and the address released.
    pub async fn open(protocol: &P, lease: AddressLease) -> DriverResult<Self> {
        let address = lease.address().clone();

        let info = protocol.resolve_connection_info(&address).map_err(|e| {
            info!(%address, error = %e, "Failed to resolve connection info");
            e
        })?;

        let session = protocol.open_session(&info).await.map_err(|e| {
            info!(%address, ?info, error = %e, "Failed to open session");
            e
        })?;

        debug!(%address, "Session opened");
        Ok(Self {
            address,
            inner: Some(session),
            lease: Some(lease),
        })
    }

    /// Read a resource through the open session.
    pub async fn get(&mut self, descriptor: &P::Descriptor) -> DriverResult<Vec<u8>> {
        match self.inner.as_mut() {
            Some(session) => session.get(descriptor).await,
            None => Err(closed_error(&self.address)),
        }
    }

    /// Write a resource through the open session.
    pub async fn set(&mut self, descriptor: &P::Descriptor, payload: &[u8]) -> DriverResult<()> {
        match self.inner.as_mut() {
            Some(session) => session.set(descriptor, payload).await,
            None => Err(closed_error(&self.address)),
        }
    }

    /// Close the session, then release the address.
    ///
    /// Close failures are logged, never returned.
    pub async fn close(mut self) {
        let Some((session, lease)) = self.take_parts() else {
            return;
        };

        match Handle::try_current() {
            Ok(handle) => {
                // Dropping the JoinHandle detaches the task, it does not abort it
                if let Err(e) = handle.spawn(shutdown(session, lease).in_current_span()).await {
                    warn!(address = %self.address, error = %e, "Session close task failed");
                }
            }
            Err(_) => shutdown(session, lease).await,
        }
    }

    fn take_parts(&mut self) -> Option<(P::Session, AddressLease)> {
        self.inner.take().zip(self.lease.take())
    }
}

impl<P: DeviceProtocol> Drop for ConnectionSession<P> {
    fn drop(&mut self) {
        let Some((session, lease)) = self.take_parts() else {
            return;
        };

        match Handle::try_current() {
            Ok(handle) => {
                warn!(address = %self.address, "Session dropped before close, closing in background");
                handle.spawn(shutdown(session, lease).in_current_span());
            }
            Err(_) => {
                warn!(
                    address = %self.address,
                    "Session dropped outside a runtime, releasing address without closing"
                );
            }
        }
    }
}

async fn shutdown<S: DeviceSession>(mut session: S, lease: AddressLease) {
    match session.close().await {
        Ok(()) => debug!(address = %lease.address(), "Session closed"),
        Err(e) => warn!(address = %lease.address(), error = %e, "Failed to close session"),
    }
    lease.release();
}

fn closed_error(address: &Address) -> DriverError {
    DriverError::Transport(format!("session for '{address}' is closed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockProtocol;
    use crate::gate::AddressGate;
    use crate::models::DeviceResource;
    use std::time::Duration;
    use tokio::time::timeout;
    use tracing_test::traced_test;

    async fn lease(gate: &AddressGate, address: &str) -> AddressLease {
        gate.acquire(&Address::from(address)).await.unwrap()
    }

    #[tokio::test]
    async fn test_open_failure_releases_address() {
        let protocol = MockProtocol::new();
        protocol.fail_open();
        let gate = AddressGate::default();

        let result = ConnectionSession::open(&protocol, lease(&gate, "mock://a").await).await;
        assert!(matches!(result, Err(DriverError::Connection(_))));
        assert_eq!(protocol.sessions_opened(), 0);
        assert_eq!(gate.pending_count(&Address::from("mock://a")), 0);
    }

    #[tokio::test]
    async fn test_resolution_failure_skips_open() {
        let protocol = MockProtocol::new();
        let gate = AddressGate::default();

        let result = ConnectionSession::open(&protocol, lease(&gate, "serial:/dev/ttyUSB0").await).await;
        assert!(matches!(result, Err(DriverError::Resolution(_))));
        assert!(protocol.call_log().is_empty());
    }

    #[tokio::test]
    async fn test_close_releases_address_after_closing() {
        let protocol = MockProtocol::new();
        let gate = AddressGate::default();
        let address = Address::from("mock://a");

        let session = ConnectionSession::open(&protocol, lease(&gate, "mock://a").await)
            .await
            .unwrap();
        assert!(gate.is_held(&address));

        session.close().await;
        assert_eq!(protocol.sessions_closed(), 1);
        assert!(!gate.is_held(&address));
        assert_eq!(gate.pending_count(&address), 0);
    }

    #[tokio::test]
    async fn test_dropped_session_is_closed_before_release() {
        let protocol = MockProtocol::new();
        let gate = AddressGate::default();
        let address = Address::from("mock://a");

        let session = ConnectionSession::open(&protocol, lease(&gate, "mock://a").await)
            .await
            .unwrap();
        drop(session);

        // The next holder only gets in once the background close is done
        let next = timeout(Duration::from_secs(1), gate.acquire(&address))
            .await
            .expect("address never released")
            .unwrap();
        assert_eq!(protocol.sessions_closed(), 1);
        assert_eq!(protocol.active_sessions("a"), 0);
        drop(next);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_close_failure_is_logged_not_returned() {
        let protocol = MockProtocol::new();
        protocol.fail_close();
        let gate = AddressGate::default();

        let mut session = ConnectionSession::open(&protocol, lease(&gate, "mock://a").await)
            .await
            .unwrap();
        let descriptor = protocol.build_descriptor(&DeviceResource::new("x"));
        session.set(&descriptor, &[1]).await.unwrap();
        session.close().await;

        assert_eq!(protocol.sessions_closed(), 1);
        assert!(logs_contain("Failed to close session"));
    }
}
