//! Identify any instrument from its resource string.
//!
//! Opens the resource, sends `*IDN?` and prints the four identity fields.
//! Works for serial, socket and delegated VISA resources; GPIB needs a
//! controller and is shown in the `e3631a_gpib` example.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p benchlib --example idn -- TCPIP0::192.168.1.100::5025::SOCKET
//! RUST_LOG=trace cargo run -p benchlib --example idn -- ASRL::/dev/ttyUSB0::9600::8N2::INSTR
//! ```

use std::time::Duration;

use benchlib::scpi::SessionConfig;
use benchlib::{BenchResourceManager, Identity};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let resource = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "TCPIP0::192.168.1.100::5025::SOCKET".to_string());
    println!("Opening {resource}...");

    let manager = BenchResourceManager::new();
    let session = manager
        .open_session(&resource, SessionConfig::default().timeout(Duration::from_secs(2)))
        .await?;

    let id = Identity::parse(&session.query("*IDN?").await?)?;
    println!("Manufacturer: {}", id.manufacturer);
    println!("Model:        {}", id.model);
    println!("Serial:       {}", id.serial_number);
    println!("Firmware:     {}", id.firmware_revision);

    session.close().await?;
    Ok(())
}
