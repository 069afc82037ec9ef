//! Load simulator for the device gate
//!
//! Fires many concurrent batches at one mock device and reports how the gate
//! admitted, rejected and serialized them.
//!
//! # Usage
//!
//! ```bash
//! gate-sim --callers 200 --batch 4 --hold-ms 2
//! gate-sim --config config/device_gate.toml --address mock://pump --write
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use daq_device_gate::adapters::mock::{encode_value, MockProtocol, MOCK_SCHEME};
use daq_device_gate::config::DriverConfig;
use daq_device_gate::models::{CommandRequest, CommandValue, DeviceResource, Value, ValueType};
use daq_device_gate::{tracing_setup, Address, DeviceDriver, DriverCell, DriverError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, info_span};

static DRIVER: DriverCell<MockProtocol> = DriverCell::new();

#[derive(Parser)]
#[command(name = "gate-sim")]
#[command(about = "Concurrent load simulator for the per-address device gate", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = daq_device_gate::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Device address every caller targets
    #[arg(long, default_value = "mock://sim")]
    address: String,

    /// Number of concurrent callers
    #[arg(long, default_value_t = 200)]
    callers: usize,

    /// Sub-commands per batch
    #[arg(long, default_value_t = 4)]
    batch: usize,

    /// Simulated latency per device operation in milliseconds
    #[arg(long, default_value_t = 1)]
    hold_ms: u64,

    /// Issue write batches instead of reads
    #[arg(long)]
    write: bool,
}

#[derive(Debug, Default)]
struct Tally {
    succeeded: usize,
    rejected: usize,
    failed: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = DriverConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    tracing_setup::init_from_config(&config).map_err(anyhow::Error::msg)?;

    let protocol = MockProtocol::new().with_latency(Duration::from_millis(cli.hold_ms));
    let limit = config.gate.limit()?;
    let driver = DRIVER.get_or_construct(|| DeviceDriver::new(protocol, limit));

    let (async_tx, mut async_rx) = mpsc::channel(16);
    driver.initialize(info_span!("gate_sim"), async_tx)?;
    let drain = tokio::spawn(async move { while async_rx.recv().await.is_some() {} });

    let address = Address::new(cli.address.clone());
    let requests: Arc<Vec<CommandRequest>> = Arc::new(
        (0..cli.batch)
            .map(|i| CommandRequest::new(DeviceResource::new(format!("channel_{i}")), ValueType::Int))
            .collect(),
    );
    let device = address
        .as_str()
        .strip_prefix(MOCK_SCHEME)
        .with_context(|| format!("'{address}' is not a {MOCK_SCHEME} address"))?
        .to_string();
    for (i, req) in requests.iter().enumerate() {
        driver
            .protocol()
            .preload(&device, req.name(), encode_value(&Value::Int(i as i64)));
    }

    info!(
        address = %address,
        callers = cli.callers,
        batch = cli.batch,
        limit = limit.get(),
        write = cli.write,
        "Starting simulation"
    );

    let started = Instant::now();
    let handles: Vec<_> = (0..cli.callers)
        .map(|caller| {
            let driver = Arc::clone(&driver);
            let address = address.clone();
            let requests = Arc::clone(&requests);
            let write = cli.write;
            tokio::spawn(async move {
                if write {
                    let values: Vec<_> = requests
                        .iter()
                        .map(|r| CommandValue::new(r.name(), Value::Int(caller as i64)))
                        .collect();
                    driver.handle_write(&address, &requests, &values).await
                } else {
                    driver
                        .handle_read(&address, &requests)
                        .await
                        .map(|_| ())
                        .map_err(DriverError::from)
                }
            })
        })
        .collect();

    let mut tally = Tally::default();
    for outcome in futures::future::join_all(handles).await {
        match outcome.context("caller task panicked")? {
            Ok(()) => tally.succeeded += 1,
            Err(e) if e.is_transient() => tally.rejected += 1,
            Err(_) => tally.failed += 1,
        }
    }
    let elapsed = started.elapsed();

    drain.abort();

    let max_parallel = driver.protocol().max_concurrent_sessions(&device);
    let sessions = driver.protocol().sessions_opened();

    println!("callers:      {}", cli.callers);
    println!("succeeded:    {}", tally.succeeded);
    println!("rejected:     {}", tally.rejected);
    println!("failed:       {}", tally.failed);
    println!("sessions:     {}", sessions);
    println!("max parallel: {}", max_parallel);
    println!("elapsed:      {:?}", elapsed);

    if max_parallel > 1 {
        bail!("exclusivity violated: {max_parallel} sessions were open at once");
    }
    Ok(())
}
