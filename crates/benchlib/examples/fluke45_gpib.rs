//! Fluke 45 multimeter behind a Prologix GPIB controller.
//!
//! Prints the controller version and the meter's primary function, takes
//! one reading, then hands the front panel back to the operator.
//!
//! # Requirements
//!
//! - A Prologix-style GPIB-USB controller on a serial port
//! - A Fluke 45 with the IEEE-488 option at GPIB address 10
//!
//! # Usage
//!
//! ```sh
//! cargo run -p benchlib --features fluke --example fluke45_gpib -- /dev/ttyUSB0
//! ```

use std::time::Duration;

use benchlib::Dmm;
use benchlib::fluke::Fluke45;
use benchlib::prologix::{Controller, ControllerConfig};
use benchlib::transport::SerialTransport;
use tracing_subscriber::EnvFilter;

const ADDRESS: u8 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/ttyUSB0".to_string());

    let serial = SerialTransport::open(&port, 115_200).await?;
    let gpib = Controller::new(Box::new(serial), ControllerConfig::default()).await?;
    println!("Using {}", gpib.version().await?);

    let dmm = Fluke45::builder()
        .build_with_transport(Box::new(gpib.device(ADDRESS)?))
        .await?;
    println!("Measurement function: {}", dmm.get_measurement_function().await?);
    println!("Reading: {}", dmm.read_measurement(Duration::from_secs(2)).await?);

    gpib.front_panel(ADDRESS, true).await?;
    gpib.close().await?;
    Ok(())
}
