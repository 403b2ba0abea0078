//! Kikusui PMX supply over an LXI socket with current trip and OVP.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p benchlib --features kikusui --example pmx_socket -- 192.168.1.100
//! ```

use std::time::Duration;

use benchlib::kikusui::Pmx;
use benchlib::{BenchResourceManager, CurrentLimitBehavior, DcPower, Instrument};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let ip = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "192.168.1.100".to_string());
    let resource = format!("TCPIP0::{ip}::5025::SOCKET");

    let manager = BenchResourceManager::new();
    let psu = Pmx::builder()
        .reset(true)
        .build_with_transport(manager.open_str(&resource).await?)
        .await?;
    let id = psu.identity().await?;
    println!("{} {} S/N {}", id.manufacturer, id.model, id.serial_number);
    if let Some(rating) = psu.rating() {
        println!("Rated {} V, {} A", rating.volts, rating.amps);
    }

    let ch = psu.resolve_channel("CH1")?;
    psu.set_output_enabled(ch, false).await?;
    psu.set_voltage_level(ch, 50.0).await?;
    psu.configure_current_limit(ch, CurrentLimitBehavior::Trip, 0.25)
        .await?;
    psu.configure_ovp(ch, true, 60.0).await?;
    psu.set_output_enabled(ch, true).await?;

    tokio::time::sleep(Duration::from_millis(500)).await;
    println!("Voltage level = {:.0} V", psu.get_voltage_level(ch).await?);
    println!("Measured voltage = {:.3} V", psu.measure_voltage(ch).await?);

    psu.set_output_enabled(ch, false).await?;
    Ok(())
}
