//! End-to-end tests through the framework-facing driver
//!
//! Exercises the process-wide driver the way a host framework would:
//! construct once, initialize once, then issue concurrent batches.

use daq_device_gate::adapters::mock::{encode_value, MockProtocol};
use daq_device_gate::config::GateConfig;
use daq_device_gate::models::{AsyncValues, CommandRequest, CommandValue, DeviceResource, Value, ValueType};
use daq_device_gate::{Address, DeviceDriver, DriverCell, DriverError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::info_span;

static DRIVER: DriverCell<MockProtocol> = DriverCell::new();

fn request(name: &str) -> CommandRequest {
    CommandRequest::new(DeviceResource::new(name), ValueType::Int)
}

#[tokio::test]
async fn test_static_cell_returns_one_initialized_driver() {
    let first = DRIVER.get_or_construct(|| {
        DeviceDriver::from_config(MockProtocol::new(), &GateConfig::default()).expect("default config")
    });
    let second = DRIVER.get_or_construct(|| panic!("driver constructed twice"));
    assert!(Arc::ptr_eq(&first, &second));

    let (tx, _rx) = mpsc::channel(4);
    // Other tests in this binary never touch DRIVER, so this is the first call
    first
        .initialize(info_span!("lifecycle_test"), tx.clone())
        .expect("first initialize");
    assert!(second.is_initialized());
    assert_eq!(
        second.initialize(info_span!("lifecycle_test"), tx),
        Err(DriverError::AlreadyInitialized)
    );

    first.protocol().preload("oven", "temperature", encode_value(&Value::Int(180)));
    let values = second
        .handle_read(&Address::from("mock://oven"), &[request("temperature")])
        .await
        .expect("read through shared driver");
    assert_eq!(values[0].value, Value::Int(180));
}

#[test]
fn test_zero_limit_config_cannot_build_driver() {
    let config = GateConfig {
        concurrent_command_limit: 0,
    };
    assert!(DeviceDriver::from_config(MockProtocol::new(), &config).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_serialize_per_device() {
    let protocol = MockProtocol::new().with_latency(Duration::from_millis(1));
    let driver = Arc::new(
        DeviceDriver::from_config(protocol.clone(), &GateConfig::default()).expect("driver"),
    );
    let (tx, _rx) = mpsc::channel(4);
    driver.initialize(info_span!("concurrency_test"), tx).expect("initialize");

    let devices = ["pump", "valve", "heater"];
    let tasks: Vec<_> = (0..30)
        .map(|i| {
            let driver = Arc::clone(&driver);
            let address = Address::new(format!("mock://{}", devices[i % devices.len()]));
            tokio::spawn(async move {
                driver
                    .handle_read(&address, &[request("a"), request("b"), request("c")])
                    .await
            })
        })
        .collect();

    let outcomes = timeout(Duration::from_secs(20), futures::future::join_all(tasks))
        .await
        .expect("deadlock detected");
    for outcome in outcomes {
        let values = outcome.expect("task panicked").expect("read failed");
        assert_eq!(values.len(), 3);
    }

    for device in devices {
        assert_eq!(protocol.max_concurrent_sessions(device), 1, "device {device}");
        assert_eq!(protocol.active_sessions(device), 0);
    }
    assert_eq!(protocol.sessions_opened(), 30);
    assert_eq!(protocol.sessions_closed(), 30);

    let gate = driver.gate().expect("initialized gate");
    for device in devices {
        assert_eq!(gate.pending_count(&Address::new(format!("mock://{device}"))), 0);
    }
}

#[tokio::test]
async fn test_admission_rejection_surfaces_through_driver() {
    let protocol = MockProtocol::new().with_latency(Duration::from_millis(50));
    let driver = Arc::new(
        DeviceDriver::from_config(
            protocol.clone(),
            &GateConfig {
                concurrent_command_limit: 1,
            },
        )
        .expect("driver"),
    );
    let (tx, _rx) = mpsc::channel(4);
    driver.initialize(info_span!("rejection_test"), tx).expect("initialize");
    let address = Address::from("mock://slow");

    let busy = {
        let driver = Arc::clone(&driver);
        let address = address.clone();
        tokio::spawn(async move { driver.handle_read(&address, &[request("a")]).await })
    };

    let gate = driver.gate().expect("gate");
    timeout(Duration::from_secs(2), async {
        while gate.pending_count(&address) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("first caller never admitted");

    let failure = driver
        .handle_read(&address, &[request("a"), request("b")])
        .await
        .expect_err("second caller must be rejected");
    assert!(failure.error.is_transient());
    assert_eq!(failure.results, vec![None, None]);

    let err = driver
        .handle_write(&address, &[request("a")], &[CommandValue::new("a", Value::Int(1))])
        .await
        .expect_err("writer must be rejected too");
    assert!(matches!(err, DriverError::AdmissionRejected { limit: 1, .. }));

    busy.await.expect("task panicked").expect("first read");
    assert_eq!(protocol.sessions_opened(), 1);
}

#[tokio::test]
async fn test_async_values_reach_host_sink() {
    let driver = DeviceDriver::from_config(MockProtocol::new(), &GateConfig::default()).expect("driver");
    let (tx, mut rx) = mpsc::channel(4);
    driver.initialize(info_span!("async_test"), tx).expect("initialize");

    driver
        .publish_async(AsyncValues {
            device: "pump".into(),
            values: vec![CommandValue::new("alarm", Value::Bool(true))],
        })
        .await
        .expect("publish");

    let received = rx.recv().await.expect("value delivered");
    assert_eq!(received.device, "pump");
    assert_eq!(received.values[0].value, Value::Bool(true));
}
