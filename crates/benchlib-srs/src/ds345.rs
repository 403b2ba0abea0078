//! The DS345 driver and its builder.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use benchlib_core::cache::INSTRUMENT_WIDE;
use benchlib_core::error::{Error, Result};
use benchlib_core::{
    CapabilityGroup, ChannelMap, CommandDispatcher, DriverOptions, FunctionGenerator, Instrument,
    InstrumentCore, OperationMode, Transport, TriggerSource, Waveform,
};
use benchlib_scpi::Session;

use crate::commands::{self, MAX_BURST_COUNT, MAX_FREQUENCY, MAX_TRIGGER_RATE, MIN_TRIGGER_RATE};

const MODELS: &[&str] = &["DS345"];

/// Driver for the DS345 synthesized function generator.
///
/// One output, `CH1`. The output is always on; enabling or disabling it
/// reports [`Error::FunctionNotSupported`].
pub struct Ds345 {
    core: InstrumentCore,
}

/// Fluent builder for [`Ds345`].
///
/// ```no_run
/// use benchlib_srs::Ds345;
///
/// # async fn example(transport: Box<dyn benchlib_core::Transport>) -> benchlib_core::Result<()> {
/// let fgen = Ds345::builder().reset(true).build_with_transport(transport).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Ds345Builder {
    options: DriverOptions,
}

impl Ds345Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(mut self, options: DriverOptions) -> Self {
        self.options = options;
        self
    }

    /// Send `*RST` during construction.
    pub fn reset(mut self, on: bool) -> Self {
        self.options.reset = on;
        self
    }

    pub fn alias(mut self, channel: &str, alias: &str) -> Self {
        self.options = self.options.alias(channel, alias);
        self
    }

    pub async fn build<S: CommandDispatcher + 'static>(self, session: S) -> Result<Ds345> {
        let core = InstrumentCore::new(
            Arc::new(session),
            CapabilityGroup::FunctionGenerator,
            ChannelMap::new(["CH1"]),
        )
        .with_supported_models(MODELS);
        core.initialize(&self.options).await?;
        Ok(Ds345 { core })
    }

    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<Ds345> {
        self.build(Session::with_defaults(transport)).await
    }
}

impl Ds345 {
    pub fn builder() -> Ds345Builder {
        Ds345Builder::new()
    }
}

impl Instrument for Ds345 {
    fn core(&self) -> &InstrumentCore {
        &self.core
    }

    fn as_function_generator(&self) -> Option<&dyn FunctionGenerator> {
        Some(self)
    }
}

#[async_trait]
impl FunctionGenerator for Ds345 {
    async fn get_waveform(&self, ch: usize) -> Result<Waveform> {
        self.core.check_index(ch)?;
        let response = self.core.dispatcher().query("FUNC?").await?;
        let waveform = commands::parse_function(&response).map_err(|e| e.with_command("FUNC?"))?;
        self.core.cache().store(ch, "waveform", waveform.to_string());
        Ok(waveform)
    }

    async fn set_waveform(&self, ch: usize, waveform: Waveform) -> Result<()> {
        self.core.check_index(ch)?;
        let command = commands::cmd_set_function(waveform)?;
        self.core
            .set(ch, "waveform", &command, waveform.to_string())
            .await
    }

    async fn get_frequency(&self, ch: usize) -> Result<f64> {
        self.core.check_index(ch)?;
        self.core.query_f64(ch, "frequency", "FREQ?").await
    }

    async fn set_frequency(&self, ch: usize, hz: f64) -> Result<()> {
        self.core.check_index(ch)?;
        if !(hz > 0.0 && hz <= MAX_FREQUENCY) {
            return Err(Error::InvalidParameter(format!(
                "frequency {hz} outside 0 to {MAX_FREQUENCY} Hz"
            )));
        }
        self.core.set(ch, "frequency", &format!("FREQ {hz}"), hz).await
    }

    async fn get_amplitude(&self, ch: usize) -> Result<f64> {
        self.core.check_index(ch)?;
        let response = self.core.dispatcher().query("AMPL?").await?;
        let vpp = commands::parse_amplitude(&response).map_err(|e| e.with_command("AMPL?"))?;
        self.core.cache().store(ch, "amplitude", vpp);
        Ok(vpp)
    }

    async fn set_amplitude(&self, ch: usize, vpp: f64) -> Result<()> {
        self.core.check_index(ch)?;
        if !(vpp.is_finite() && vpp >= 0.0) {
            return Err(Error::InvalidParameter(format!("amplitude {vpp} must be non-negative")));
        }
        self.core
            .set(ch, "amplitude", &commands::cmd_set_amplitude(vpp), vpp)
            .await
    }

    async fn get_dc_offset(&self, ch: usize) -> Result<f64> {
        self.core.check_index(ch)?;
        self.core.query_f64(ch, "dc_offset", "OFFS?").await
    }

    async fn set_dc_offset(&self, ch: usize, volts: f64) -> Result<()> {
        self.core.check_index(ch)?;
        self.core
            .set(ch, "dc_offset", &format!("OFFS {volts}"), volts)
            .await
    }

    async fn get_start_phase(&self, ch: usize) -> Result<f64> {
        self.core.check_index(ch)?;
        self.core.query_f64(ch, "start_phase", "PHSE?").await
    }

    async fn set_start_phase(&self, ch: usize, degrees: f64) -> Result<()> {
        self.core.check_index(ch)?;
        if !(0.0..=7199.999).contains(&degrees) {
            return Err(Error::InvalidParameter(format!(
                "start phase {degrees} outside 0 to 7199.999 degrees"
            )));
        }
        self.core
            .set(ch, "start_phase", &format!("PHSE {degrees}"), degrees)
            .await
    }

    async fn get_burst_count(&self, ch: usize) -> Result<u32> {
        self.core.check_index(ch)?;
        let cycles = self.core.query_i64(ch, "burst_count", "BCNT?").await?;
        u32::try_from(cycles).map_err(|_| {
            Error::malformed(cycles.to_string(), "burst count out of range").with_command("BCNT?")
        })
    }

    async fn set_burst_count(&self, ch: usize, cycles: u32) -> Result<()> {
        self.core.check_index(ch)?;
        if !(1..=MAX_BURST_COUNT).contains(&cycles) {
            return Err(Error::InvalidParameter(format!(
                "burst count {cycles} outside 1 to {MAX_BURST_COUNT}"
            )));
        }
        self.core
            .set(ch, "burst_count", &format!("BCNT {cycles}"), cycles)
            .await
    }

    async fn get_trigger_source(&self, ch: usize) -> Result<TriggerSource> {
        self.core.check_index(ch)?;
        let response = self.core.dispatcher().query("TSRC?").await?;
        let source =
            commands::parse_trigger_source(&response).map_err(|e| e.with_command("TSRC?"))?;
        self.core
            .cache()
            .store(ch, "trigger_source", source.to_string());
        Ok(source)
    }

    async fn set_trigger_source(&self, ch: usize, source: TriggerSource) -> Result<()> {
        self.core.check_index(ch)?;
        self.core
            .set(
                ch,
                "trigger_source",
                &commands::cmd_set_trigger_source(source),
                source.to_string(),
            )
            .await
    }

    async fn get_operation_mode(&self, ch: usize) -> Result<OperationMode> {
        self.core.check_index(ch)?;
        let enabled = self.core.query_bool(ch, "modulation", "MENA?").await?;
        let modulation_type = if enabled {
            Some(self.core.dispatcher().query("MTYP?").await?)
        } else {
            None
        };
        let mode = commands::parse_operation_mode(enabled, modulation_type.as_deref())
            .map_err(|e| e.with_command("MTYP?"))?;
        self.core
            .cache()
            .store(ch, "operation_mode", mode.to_string());
        Ok(mode)
    }

    async fn set_operation_mode(&self, ch: usize, mode: OperationMode) -> Result<()> {
        self.core.check_index(ch)?;
        self.core
            .set(
                ch,
                "operation_mode",
                &commands::cmd_set_operation_mode(mode),
                mode.to_string(),
            )
            .await?;
        debug!(%mode, "operation mode set");
        Ok(())
    }

    async fn get_internal_trigger_rate(&self) -> Result<f64> {
        self.core
            .query_f64(INSTRUMENT_WIDE, "trigger_rate", "TRAT?")
            .await
    }

    async fn set_internal_trigger_rate(&self, hz: f64) -> Result<()> {
        if !(MIN_TRIGGER_RATE..=MAX_TRIGGER_RATE).contains(&hz) {
            return Err(Error::InvalidParameter(format!(
                "trigger rate {hz} outside {MIN_TRIGGER_RATE} to {MAX_TRIGGER_RATE} Hz"
            )));
        }
        self.core
            .set(INSTRUMENT_WIDE, "trigger_rate", &format!("TRAT {hz}"), hz)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchlib_test_harness::{MockTransport, ScpiSimulator};
    use std::time::Duration;

    const IDN: &str = "StanfordResearchSystems,DS345,32145,ver1.04";

    fn simulator() -> ScpiSimulator {
        ScpiSimulator::new(IDN)
            .with_register("FUNC", "0")
            .with_register("AMPL", "1.00VP")
            .with_register("MENA", "0")
            .with_register("MTYP", "0")
    }

    async fn driver(sim: &ScpiSimulator) -> Ds345 {
        Ds345::builder()
            .build_with_transport(Box::new(sim.transport()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn waveform_setup_sequence() {
        let sim = simulator();
        let fgen = driver(&sim).await;

        fgen.set_amplitude(0, 0.5).await.unwrap();
        fgen.set_waveform(0, Waveform::Sine).await.unwrap();
        fgen.set_dc_offset(0, 0.2).await.unwrap();
        fgen.set_frequency(0, 2350.0).await.unwrap();

        assert_eq!(fgen.get_waveform(0).await.unwrap(), Waveform::Sine);
        assert_eq!(fgen.get_amplitude(0).await.unwrap(), 0.5);
        assert_eq!(fgen.get_dc_offset(0).await.unwrap(), 0.2);
        assert_eq!(fgen.get_frequency(0).await.unwrap(), 2350.0);
        assert_eq!(sim.register("AMPL").as_deref(), Some("0.5VP"));
    }

    #[tokio::test]
    async fn configure_standard_waveform_sets_each_parameter() {
        let sim = simulator();
        let fgen = driver(&sim).await;
        fgen.configure_standard_waveform(0, Waveform::Triangle, 0.5, 0.1, 100.0, 0.0)
            .await
            .unwrap();
        assert_eq!(
            sim.wire_log().lines()[1..],
            ["FUNC 2", "FREQ 100", "AMPL 0.5VP", "OFFS 0.1", "PHSE 0"]
        );
    }

    #[tokio::test]
    async fn burst_from_internal_trigger() {
        let sim = simulator();
        let fgen = driver(&sim).await;
        fgen.set_burst_count(0, 40).await.unwrap();
        fgen.set_trigger_source(0, TriggerSource::Internal).await.unwrap();
        fgen.set_internal_trigger_period(Duration::from_millis(500))
            .await
            .unwrap();
        fgen.set_operation_mode(0, OperationMode::Burst).await.unwrap();

        assert_eq!(fgen.get_burst_count(0).await.unwrap(), 40);
        assert_eq!(fgen.get_trigger_source(0).await.unwrap(), TriggerSource::Internal);
        assert_eq!(fgen.get_internal_trigger_rate().await.unwrap(), 2.0);
        assert_eq!(fgen.get_operation_mode(0).await.unwrap(), OperationMode::Burst);

        fgen.set_operation_mode(0, OperationMode::Continuous)
            .await
            .unwrap();
        assert_eq!(
            fgen.get_operation_mode(0).await.unwrap(),
            OperationMode::Continuous
        );
    }

    #[tokio::test]
    async fn output_enable_is_not_supported() {
        let sim = simulator();
        let fgen = driver(&sim).await;
        let sent = sim.wire_log().len();
        assert!(fgen.set_output_enabled(0, true).await.unwrap_err().is_not_supported());
        assert!(fgen.get_output_enabled(0).await.unwrap_err().is_not_supported());
        assert!(fgen.set_waveform(0, Waveform::Dc).await.unwrap_err().is_not_supported());
        assert_eq!(sim.wire_log().len(), sent);
        assert!(fgen.core().cache().get(0, "output").is_none());
        assert!(fgen.core().cache().get(0, "waveform").is_none());
    }

    #[tokio::test]
    async fn limits_checked_before_io() {
        let sim = simulator();
        let fgen = driver(&sim).await;
        let sent = sim.wire_log().len();
        assert!(matches!(
            fgen.set_frequency(0, 40e6).await,
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            fgen.set_burst_count(0, 30_001).await,
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            fgen.set_internal_trigger_rate(20_000.0).await,
            Err(Error::InvalidParameter(_))
        ));
        assert_eq!(sim.wire_log().len(), sent);
    }

    #[tokio::test]
    async fn amplitude_in_other_units_is_malformed() {
        let mut mock = MockTransport::new();
        mock.expect(b"*IDN?\n", format!("{IDN}\r\n").as_bytes());
        mock.expect(b"AMPL?\n", b"0.35VR\r\n");
        let fgen = Ds345::builder()
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();
        let err = fgen.get_amplitude(0).await.unwrap_err();
        assert_eq!(err.command(), Some("AMPL?"));
        assert!(matches!(err.root(), Error::MalformedResponse { .. }));
    }
}
