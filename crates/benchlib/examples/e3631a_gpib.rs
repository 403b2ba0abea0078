//! E3631A power supply behind a Prologix GPIB controller.
//!
//! Brings up the 6 V output at 5 V with a 1 A limit, then reads back the
//! programmed and measured values.
//!
//! # Requirements
//!
//! - A Prologix-style GPIB-USB controller on a serial port
//! - An E3631A at GPIB address 5
//!
//! # Usage
//!
//! ```sh
//! cargo run -p benchlib --features keysight --example e3631a_gpib -- /dev/ttyUSB0
//! ```

use std::time::Duration;

use benchlib::keysight::E36xx;
use benchlib::prologix::{Controller, ControllerConfig};
use benchlib::transport::SerialTransport;
use benchlib::{BenchResourceManager, DcPower, Instrument};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    println!("Connecting to the GPIB controller on {port}...");

    let serial = SerialTransport::open(&port, 115_200).await?;
    let gpib = Controller::new(Box::new(serial), ControllerConfig::default()).await?;
    println!("{}", gpib.version().await?);

    let manager = BenchResourceManager::new().with_gpib_controller(0, gpib);
    let transport = manager.open_str("GPIB0::5::INSTR").await?;
    let psu = E36xx::builder().reset(true).build_with_transport(transport).await?;
    println!("Connected: {}", psu.model().await?);

    let p6v = psu.resolve_channel("P6V")?;
    psu.set_output_enabled(p6v, false).await?;
    psu.set_voltage_level(p6v, 5.0).await?;
    psu.set_current_limit(p6v, 1.0).await?;
    psu.set_output_enabled(p6v, true).await?;

    // Let the output settle before measuring.
    tokio::time::sleep(Duration::from_millis(500)).await;
    println!("Programmed: {} V", psu.get_voltage_level(p6v).await?);
    println!("Limit:      {} A", psu.get_current_limit(p6v).await?);
    println!("Measured:   {:.3} V", psu.measure_voltage(p6v).await?);
    println!("Measured:   {:.4} A", psu.measure_current(p6v).await?);

    psu.set_output_enabled(p6v, false).await?;
    Ok(())
}
