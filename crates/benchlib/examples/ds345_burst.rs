//! DS345 burst from the internal trigger.
//!
//! Programs a 2.35 kHz sine, then a 40-cycle burst fired every 0.6 s by
//! the internal trigger rate generator.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p benchlib --features srs --example ds345_burst -- "ASRL::/dev/ttyUSB0::9600::8N2::INSTR"
//! ```

use std::time::Duration;

use benchlib::srs::Ds345;
use benchlib::{
    BenchResourceManager, FunctionGenerator, Instrument, OperationMode, TriggerSource, Waveform,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let resource = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ASRL::/dev/ttyUSB0::9600::8N2::INSTR".to_string());
    let manager = BenchResourceManager::new();
    let fgen = Ds345::builder()
        .build_with_transport(manager.open_str(&resource).await?)
        .await?;
    println!(
        "Connected: {} (firmware {})",
        fgen.model().await?,
        fgen.firmware_revision().await?
    );

    let ch = fgen.resolve_channel("CH1")?;
    fgen.set_amplitude(ch, 0.5).await?;
    fgen.set_waveform(ch, Waveform::Sine).await?;
    fgen.set_dc_offset(ch, 0.2).await?;
    fgen.set_frequency(ch, 2350.0).await?;
    println!(
        "{} at {} Hz, {} Vpp",
        fgen.get_waveform(ch).await?,
        fgen.get_frequency(ch).await?,
        fgen.get_amplitude(ch).await?
    );

    fgen.configure_standard_waveform(ch, Waveform::Sine, 0.5, 0.1, 100.0, 0.0)
        .await?;
    fgen.set_burst_count(ch, 40).await?;
    fgen.set_trigger_source(ch, TriggerSource::Internal).await?;
    fgen.set_internal_trigger_period(Duration::from_millis(600)).await?;
    fgen.set_operation_mode(ch, OperationMode::Burst).await?;
    println!(
        "Mode: {}, {} cycles at {:.3} Hz",
        fgen.get_operation_mode(ch).await?,
        fgen.get_burst_count(ch).await?,
        fgen.get_internal_trigger_rate().await?
    );

    // The DS345 output is always live.
    if let Err(e) = fgen.set_output_enabled(ch, true).await {
        println!("Output enable: {e}");
    }
    Ok(())
}
