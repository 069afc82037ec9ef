//! Command and value types exchanged with the host framework.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque key identifying one physical device endpoint.
///
/// The driver never looks inside an address; it is only used as a map key
/// and handed to the protocol for resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Create an address from any string-like value.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The raw address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for Address {
    fn from(address: String) -> Self {
        Self(address)
    }
}

/// Metadata of the device resource a sub-command targets.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceResource {
    /// Resource name (e.g. "temperature", "setpoint")
    pub name: String,
    /// Protocol attributes (register, offset, function code, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl DeviceResource {
    /// Resource with no attributes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Add a protocol attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Boolean
    Bool,
    /// Signed 64-bit integer
    #[default]
    Int,
    /// 64-bit float
    Float,
    /// UTF-8 text
    Text,
    /// Raw bytes
    Binary,
}

/// Options controlling how raw bytes become a typed value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReadOptions {
    /// Expected value type
    #[serde(default)]
    pub value_type: ValueType,
    /// Multiplier applied to decoded numeric values
    #[serde(default)]
    pub scale: Option<f64>,
    /// Engineering units, informational only
    #[serde(default)]
    pub units: Option<String>,
}

/// One sub-command of a batched request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Target resource
    pub resource: DeviceResource,
    /// Read/write options
    #[serde(default)]
    pub options: ReadOptions,
}

impl CommandRequest {
    /// Request for `resource` decoded as `value_type`.
    pub fn new(resource: DeviceResource, value_type: ValueType) -> Self {
        Self {
            resource,
            options: ReadOptions {
                value_type,
                ..Default::default()
            },
        }
    }

    /// Resource name shortcut.
    pub fn name(&self) -> &str {
        &self.resource.name
    }
}

/// Typed device value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Signed 64-bit integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// UTF-8 text
    Text(String),
    /// Raw bytes
    Binary(Vec<u8>),
}

impl Value {
    /// Type tag of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Text(_) => ValueType::Text,
            Value::Binary(_) => ValueType::Binary,
        }
    }
}

/// Typed input or output value tied to one sub-command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandValue {
    /// Resource the value belongs to
    pub resource: String,
    /// The value itself
    pub value: Value,
    /// When the value was produced
    pub origin: DateTime<Utc>,
}

impl CommandValue {
    /// Value for `resource` stamped with the current time.
    pub fn new(resource: impl Into<String>, value: Value) -> Self {
        Self {
            resource: resource.into(),
            value,
            origin: Utc::now(),
        }
    }
}

/// Values pushed to the host outside of a read call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncValues {
    /// Device the values came from
    pub device: String,
    /// Readings
    pub values: Vec<CommandValue>,
}
