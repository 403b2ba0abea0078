//! Walk the U2751A switch matrix through every crosspoint of one row.
//!
//! USB-TMC needs a platform USB stack, so this example reaches the matrix
//! through a delegated VISA layer or any other resource string.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p benchlib --features keysight --example u2751a_matrix -- "TCPIP0::192.168.1.60::5025::SOCKET"
//! ```

use std::time::Duration;

use benchlib::keysight::U2751a;
use benchlib::{BenchResourceManager, Instrument, PathCapability, Switch};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let resource = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "TCPIP0::192.168.1.60::5025::SOCKET".to_string());
    let manager = BenchResourceManager::new();
    let matrix = U2751a::builder()
        .reset(true)
        .build_with_transport(manager.open_str(&resource).await?)
        .await?;
    println!("Channels: {}", matrix.channel_names().join(", "));

    matrix.disconnect_all().await?;
    for col in 1..=8 {
        let column = format!("Col{col}");
        match matrix.can_connect("Row1", &column).await? {
            PathCapability::Available => {}
            other => {
                println!("Row1 -> {column}: {other:?}");
                continue;
            }
        }
        matrix.connect("Row1", &column).await?;
        matrix.wait_for_debounce(Duration::from_secs(1)).await?;
        println!("Row1 -> {column}: closed");
        tokio::time::sleep(Duration::from_millis(250)).await;
        matrix.disconnect("Row1", &column).await?;
    }

    // Same-axis connections are rejected before anything is sent.
    if let Err(e) = matrix.connect("Col1", "Col2").await {
        println!("Col1 -> Col2: {e}");
    }
    println!("Relay cycles, row 1: {:?}", matrix.relay_cycle_counts("Row1").await?);
    Ok(())
}
