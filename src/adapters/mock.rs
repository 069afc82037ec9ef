//! In-process mock protocol for tests and the load simulator.
//!
//! Provides a simulated device fleet without real hardware:
//! - `mock://<device>` addresses, anything else fails resolution
//! - a register map per device shared across sessions
//! - failure injection for every collaborator call
//! - a call log and session counters for verifying exclusivity and cleanup
//!
//! # Example
//!
//! ```
//! use daq_device_gate::adapters::MockProtocol;
//!
//! let protocol = MockProtocol::new();
//! protocol.fail_get("pressure");
//! assert_eq!(protocol.sessions_opened(), 0);
//! ```

use crate::error::{DriverError, DriverResult};
use crate::models::{Address, CommandRequest, CommandValue, DeviceResource, ReadOptions, Value, ValueType};
use crate::protocol::{DeviceProtocol, DeviceSession};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Address scheme accepted by [`MockProtocol`].
pub const MOCK_SCHEME: &str = "mock://";

/// Resolved mock connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockConnectionInfo {
    /// Device name taken from the address
    pub device: String,
}

/// Descriptor of one mock resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDescriptor {
    /// Resource name
    pub resource: String,
    /// Optional register number from the `register` attribute
    pub register: Option<u64>,
}

#[derive(Debug, Default)]
struct Faults {
    validation: bool,
    open: bool,
    close: bool,
    get: HashSet<String>,
    set: HashSet<String>,
    decode: HashSet<String>,
    encode: HashSet<String>,
}

#[derive(Debug, Default)]
struct MockState {
    registers: Mutex<HashMap<(String, String), Vec<u8>>>,
    faults: Mutex<Faults>,
    call_log: Mutex<Vec<String>>,
    latency: Mutex<Duration>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    active: Mutex<HashMap<String, usize>>,
    max_active: Mutex<HashMap<String, usize>>,
}

impl MockState {
    fn log_call(&self, call: String) {
        self.call_log.lock().push(call);
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

/// Mock implementation of [`DeviceProtocol`].
///
/// Clones share state, so a test can keep a handle while the driver owns
/// another.
#[derive(Clone, Debug, Default)]
pub struct MockProtocol {
    state: Arc<MockState>,
}

impl MockProtocol {
    /// Create a mock with no latency and no faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set simulated latency for open, get and set.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.state.latency.lock() = latency;
        self
    }

    /// Fail the next and all following attribute validations.
    pub fn fail_validation(&self) {
        self.state.faults.lock().validation = true;
    }

    /// Fail every session open.
    pub fn fail_open(&self) {
        self.state.faults.lock().open = true;
    }

    /// Fail every session close.
    pub fn fail_close(&self) {
        self.state.faults.lock().close = true;
    }

    /// Fail reads of `resource`.
    pub fn fail_get(&self, resource: &str) {
        self.state.faults.lock().get.insert(resource.to_string());
    }

    /// Fail writes of `resource`.
    pub fn fail_set(&self, resource: &str) {
        self.state.faults.lock().set.insert(resource.to_string());
    }

    /// Fail decoding of `resource`.
    pub fn fail_decode(&self, resource: &str) {
        self.state.faults.lock().decode.insert(resource.to_string());
    }

    /// Fail encoding of `resource`.
    pub fn fail_encode(&self, resource: &str) {
        self.state.faults.lock().encode.insert(resource.to_string());
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        *self.state.faults.lock() = Faults::default();
    }

    /// Store raw bytes for a device resource.
    pub fn preload(&self, device: &str, resource: &str, bytes: Vec<u8>) {
        self.state
            .registers
            .lock()
            .insert((device.to_string(), resource.to_string()), bytes);
    }

    /// Raw bytes currently stored for a device resource.
    pub fn register(&self, device: &str, resource: &str) -> Option<Vec<u8>> {
        self.state
            .registers
            .lock()
            .get(&(device.to_string(), resource.to_string()))
            .cloned()
    }

    /// Get the call log.
    pub fn call_log(&self) -> Vec<String> {
        self.state.call_log.lock().clone()
    }

    /// Clear the call log.
    pub fn clear_log(&self) {
        self.state.call_log.lock().clear();
    }

    /// Total sessions opened.
    pub fn sessions_opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Total sessions closed (successfully or not).
    pub fn sessions_closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Sessions currently open for `device`.
    pub fn active_sessions(&self, device: &str) -> usize {
        self.state.active.lock().get(device).copied().unwrap_or(0)
    }

    /// Highest number of simultaneously open sessions seen for `device`.
    pub fn max_concurrent_sessions(&self, device: &str) -> usize {
        self.state.max_active.lock().get(device).copied().unwrap_or(0)
    }
}

/// Encode a value with the mock wire format.
pub fn encode_value(value: &Value) -> Vec<u8> {
    match value {
        Value::Bool(b) => vec![u8::from(*b)],
        Value::Int(i) => i.to_le_bytes().to_vec(),
        Value::Float(f) => f.to_le_bytes().to_vec(),
        Value::Text(s) => s.as_bytes().to_vec(),
        Value::Binary(bytes) => bytes.clone(),
    }
}

fn decode_value(options: &ReadOptions, bytes: &[u8]) -> Result<Value, String> {
    let word = || -> Result<[u8; 8], String> {
        bytes
            .try_into()
            .map_err(|_| format!("expected 8 bytes, got {}", bytes.len()))
    };

    let value = match options.value_type {
        ValueType::Bool => match bytes.first() {
            Some(b) => Value::Bool(*b != 0),
            None => return Err("empty payload for bool".to_string()),
        },
        ValueType::Int => Value::Int(i64::from_le_bytes(word()?)),
        ValueType::Float => Value::Float(f64::from_le_bytes(word()?)),
        ValueType::Text => Value::Text(
            String::from_utf8(bytes.to_vec()).map_err(|e| format!("invalid utf-8: {e}"))?,
        ),
        ValueType::Binary => Value::Binary(bytes.to_vec()),
    };

    Ok(match (options.scale, value) {
        (Some(scale), Value::Int(i)) => Value::Float(i as f64 * scale),
        (Some(scale), Value::Float(f)) => Value::Float(f * scale),
        (_, value) => value,
    })
}

#[async_trait]
impl DeviceProtocol for MockProtocol {
    type ConnectionInfo = MockConnectionInfo;
    type Descriptor = MockDescriptor;
    type Session = MockSession;

    fn validate_attributes(&self, requests: &[CommandRequest]) -> DriverResult<()> {
        if self.state.faults.lock().validation {
            return Err(DriverError::AttributeValidation("injected failure".to_string()));
        }
        for req in requests {
            if let Some(register) = req.resource.attributes.get("register") {
                if !register.is_u64() {
                    return Err(DriverError::AttributeValidation(format!(
                        "resource '{}': register must be an unsigned integer, got {}",
                        req.name(),
                        register
                    )));
                }
            }
        }
        Ok(())
    }

    fn resolve_connection_info(&self, address: &Address) -> DriverResult<MockConnectionInfo> {
        match address.as_str().strip_prefix(MOCK_SCHEME) {
            Some(device) if !device.is_empty() => Ok(MockConnectionInfo {
                device: device.to_string(),
            }),
            _ => Err(DriverError::Resolution(format!(
                "unsupported address '{address}', expected {MOCK_SCHEME}<device>"
            ))),
        }
    }

    async fn open_session(&self, info: &MockConnectionInfo) -> DriverResult<MockSession> {
        self.state.simulate_latency().await;
        self.state.log_call("open".to_string());

        if self.state.faults.lock().open {
            return Err(DriverError::Connection(format!(
                "injected failure opening '{}'",
                info.device
            )));
        }

        self.state.opened.fetch_add(1, Ordering::SeqCst);
        {
            let mut active = self.state.active.lock();
            let count = active.entry(info.device.clone()).or_insert(0);
            *count += 1;
            let mut max_active = self.state.max_active.lock();
            let max = max_active.entry(info.device.clone()).or_insert(0);
            *max = (*max).max(*count);
        }

        Ok(MockSession {
            device: info.device.clone(),
            state: Arc::clone(&self.state),
        })
    }

    fn build_descriptor(&self, resource: &DeviceResource) -> MockDescriptor {
        MockDescriptor {
            resource: resource.name.clone(),
            register: resource.attributes.get("register").and_then(|r| r.as_u64()),
        }
    }

    fn decode_to_value(
        &self,
        options: &ReadOptions,
        bytes: &[u8],
        descriptor: &MockDescriptor,
    ) -> DriverResult<CommandValue> {
        if self.state.faults.lock().decode.contains(&descriptor.resource) {
            return Err(DriverError::Codec(format!(
                "injected decode failure for '{}'",
                descriptor.resource
            )));
        }
        let value = decode_value(options, bytes).map_err(DriverError::Codec)?;
        Ok(CommandValue::new(descriptor.resource.clone(), value))
    }

    fn encode_to_bytes(&self, descriptor: &MockDescriptor, value: &CommandValue) -> DriverResult<Vec<u8>> {
        if self.state.faults.lock().encode.contains(&descriptor.resource) {
            return Err(DriverError::Codec(format!(
                "injected encode failure for '{}'",
                descriptor.resource
            )));
        }
        Ok(encode_value(&value.value))
    }
}

/// Session opened by [`MockProtocol`].
#[derive(Debug)]
pub struct MockSession {
    device: String,
    state: Arc<MockState>,
}

#[async_trait]
impl DeviceSession for MockSession {
    type Descriptor = MockDescriptor;

    async fn get(&mut self, descriptor: &MockDescriptor) -> DriverResult<Vec<u8>> {
        self.state.simulate_latency().await;
        self.state.log_call(format!("get:{}", descriptor.resource));

        if self.state.faults.lock().get.contains(&descriptor.resource) {
            return Err(DriverError::Transport(format!(
                "injected read failure for '{}'",
                descriptor.resource
            )));
        }

        let key = (self.device.clone(), descriptor.resource.clone());
        Ok(self
            .state
            .registers
            .lock()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| vec![0; 8]))
    }

    async fn set(&mut self, descriptor: &MockDescriptor, payload: &[u8]) -> DriverResult<()> {
        self.state.simulate_latency().await;
        self.state.log_call(format!("set:{}", descriptor.resource));

        if self.state.faults.lock().set.contains(&descriptor.resource) {
            return Err(DriverError::Transport(format!(
                "injected write failure for '{}'",
                descriptor.resource
            )));
        }

        self.state
            .registers
            .lock()
            .insert((self.device.clone(), descriptor.resource.clone()), payload.to_vec());
        Ok(())
    }

    async fn close(&mut self) -> DriverResult<()> {
        self.state.log_call("close".to_string());
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        if let Some(count) = self.state.active.lock().get_mut(&self.device) {
            *count = count.saturating_sub(1);
        }

        if self.state.faults.lock().close {
            return Err(DriverError::Connection(format!(
                "injected failure closing '{}'",
                self.device
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_requires_mock_scheme() {
        let protocol = MockProtocol::new();
        let info = protocol
            .resolve_connection_info(&Address::from("mock://pump"))
            .unwrap();
        assert_eq!(info.device, "pump");

        for bad in ["tcp://10.0.0.1:502", "mock://", "pump"] {
            assert!(matches!(
                protocol.resolve_connection_info(&Address::from(bad)),
                Err(DriverError::Resolution(_))
            ));
        }
    }

    #[test]
    fn test_register_attribute_validation() {
        let protocol = MockProtocol::new();
        let good = CommandRequest::new(
            DeviceResource::new("flow").with_attribute("register", 40001),
            ValueType::Int,
        );
        let bad = CommandRequest::new(
            DeviceResource::new("flow").with_attribute("register", "forty"),
            ValueType::Int,
        );
        assert!(protocol.validate_attributes(&[good.clone()]).is_ok());
        assert!(matches!(
            protocol.validate_attributes(&[good, bad]),
            Err(DriverError::AttributeValidation(_))
        ));
        assert_eq!(
            protocol.build_descriptor(&DeviceResource::new("flow").with_attribute("register", 7)),
            MockDescriptor {
                resource: "flow".into(),
                register: Some(7)
            }
        );
    }

    #[test]
    fn test_codec_applies_scale_and_checks_length() {
        let protocol = MockProtocol::new();
        let descriptor = protocol.build_descriptor(&DeviceResource::new("level"));
        let options = ReadOptions {
            value_type: ValueType::Int,
            scale: Some(0.5),
            units: None,
        };

        let decoded = protocol
            .decode_to_value(&options, &encode_value(&Value::Int(10)), &descriptor)
            .unwrap();
        assert_eq!(decoded.value, Value::Float(5.0));
        assert_eq!(decoded.resource, "level");

        assert!(matches!(
            protocol.decode_to_value(&options, &[1, 2, 3], &descriptor),
            Err(DriverError::Codec(_))
        ));
    }

    #[tokio::test]
    async fn test_session_counters_track_open_and_close() {
        let protocol = MockProtocol::new();
        let info = MockConnectionInfo {
            device: "pump".into(),
        };

        let mut session = protocol.open_session(&info).await.unwrap();
        assert_eq!(protocol.active_sessions("pump"), 1);

        let descriptor = protocol.build_descriptor(&DeviceResource::new("speed"));
        session.set(&descriptor, &[1, 2]).await.unwrap();
        assert_eq!(session.get(&descriptor).await.unwrap(), vec![1, 2]);
        session.close().await.unwrap();

        assert_eq!(protocol.active_sessions("pump"), 0);
        assert_eq!(protocol.max_concurrent_sessions("pump"), 1);
        assert_eq!(protocol.call_log(), vec!["open", "set:speed", "get:speed", "close"]);
    }
}
