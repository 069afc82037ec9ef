//! Per-address admission control and mutual exclusion.
//!
//! Real devices handle one command session at a time, so every pipeline must
//! hold its address's token for the whole batch. Two tables back the gate:
//!
//! - a token per address (`Arc<tokio::sync::Mutex<()>>`), created lazily on
//!   first use and never removed
//! - a pending count per address, counting callers that are waiting for or
//!   holding the token
//!
//! Both tables sit behind one structural `parking_lot::Mutex`. That lock is
//! only taken for bookkeeping and is never held across an `.await`; waiting
//! for the token happens outside it.
//!
//! Admission is checked before waiting: once an address has `limit` pending
//! callers, further callers are rejected immediately instead of queueing.
//! Wake order among waiters for one address is not part of the contract.

use crate::error::{DriverError, DriverResult};
use crate::models::Address;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::{Mutex as TokenMutex, OwnedMutexGuard};
use tracing::{trace, warn};

/// Default number of callers allowed to be pending on a single address.
pub const DEFAULT_CONCURRENT_COMMAND_LIMIT: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(limit) => limit,
    None => panic!("default limit must be non-zero"),
};

type Token = Arc<TokenMutex<()>>;

#[derive(Debug, Default)]
struct GateTables {
    tokens: HashMap<Address, Token>,
    pending: HashMap<Address, usize>,
}

/// Registry of per-address exclusive-access tokens with bounded admission.
///
/// Cloning is cheap and clones share the same tables.
#[derive(Clone, Debug)]
pub struct AddressGate {
    tables: Arc<Mutex<GateTables>>,
    limit: NonZeroUsize,
}

impl Default for AddressGate {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENT_COMMAND_LIMIT)
    }
}

impl AddressGate {
    /// Create an empty gate admitting at most `limit` pending callers per address.
    pub fn new(limit: NonZeroUsize) -> Self {
        Self {
            tables: Arc::new(Mutex::new(GateTables::default())),
            limit,
        }
    }

    /// Configured per-address limit.
    pub fn limit(&self) -> usize {
        self.limit.get()
    }

    /// Take exclusive hold of `address`.
    ///
    /// Fails with [`DriverError::AdmissionRejected`] without waiting when the
    /// address is at capacity. Otherwise waits until the token is free and
    /// returns a lease that releases the address when dropped.
    ///
    /// Dropping the returned future while it waits gives the pending slot back.
    pub async fn acquire(&self, address: &Address) -> DriverResult<AddressLease> {
        let admitted = {
            let mut guard = self.tables.lock();
            let tables = &mut *guard;

            let token = tables
                .tokens
                .entry(address.clone())
                .or_insert_with(|| Arc::new(TokenMutex::new(())))
                .clone();

            let pending = tables.pending.entry(address.clone()).or_insert(0);
            if *pending >= self.limit.get() {
                None
            } else {
                *pending += 1;
                trace!(%address, pending = *pending, "Admitted caller");
                Some(token)
            }
        };

        let Some(token) = admitted else {
            warn!(
                %address,
                limit = self.limit.get(),
                "High-frequency command execution, rejecting caller"
            );
            return Err(DriverError::AdmissionRejected {
                address: address.to_string(),
                limit: self.limit.get(),
            });
        };

        // The lease owns the pending slot from here on, so a cancelled wait
        // still decrements the count.
        let mut lease = AddressLease {
            tables: Arc::clone(&self.tables),
            address: address.clone(),
            hold: None,
        };
        lease.hold = Some(token.lock_owned().await);
        Ok(lease)
    }

    /// Number of callers pending on or holding `address`.
    pub fn pending_count(&self, address: &Address) -> usize {
        self.tables.lock().pending.get(address).copied().unwrap_or(0)
    }

    /// Whether some caller currently holds `address`.
    pub fn is_held(&self, address: &Address) -> bool {
        let token = self.tables.lock().tokens.get(address).cloned();
        match token {
            Some(token) => token.try_lock().is_err(),
            None => false,
        }
    }

    /// Number of addresses the gate has ever seen.
    pub fn address_count(&self) -> usize {
        self.tables.lock().tokens.len()
    }
}

/// Exclusive hold on one address.
///
/// Dropping the lease decrements the address's pending count under the
/// structural lock and then frees the token, waking at most one waiter.
#[derive(Debug)]
#[must_use = "the address is released as soon as the lease is dropped"]
pub struct AddressLease {
    tables: Arc<Mutex<GateTables>>,
    address: Address,
    hold: Option<OwnedMutexGuard<()>>,
}

impl AddressLease {
    /// Address this lease holds.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Release the address now instead of at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for AddressLease {
    fn drop(&mut self) {
        {
            let mut tables = self.tables.lock();
            if let Some(pending) = tables.pending.get_mut(&self.address) {
                *pending = pending.saturating_sub(1);
            }
        }
        if self.hold.take().is_some() {
            trace!(address = %self.address, "Released address");
        }
    }
}
