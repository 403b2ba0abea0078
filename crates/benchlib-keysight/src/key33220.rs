//! Keysight (Agilent) 33220A 20 MHz function/arbitrary waveform generator.
//!
//! Single output channel `CH1`. Triangle and the two ramps are all the
//! `RAMP` function with different symmetry. Bursts use the 33220A burst
//! subsystem: the burst count is `BURS:NCYC`, the start phase is
//! `BURS:PHAS`, and the internal trigger rate is programmed as the burst
//! period `BURS:INT:PER`.
//!
//! # Example
//!
//! ```no_run
//! use benchlib_core::{FunctionGenerator, Waveform};
//! use benchlib_keysight::Key33220;
//!
//! # async fn example(transport: Box<dyn benchlib_core::Transport>) -> benchlib_core::Result<()> {
//! let fgen = Key33220::builder().reset(true).build_with_transport(transport).await?;
//! fgen.configure_standard_waveform(0, Waveform::Sine, 0.5, 0.0, 100.0, 0.0).await?;
//! fgen.set_output_enabled(0, true).await?;
//! # Ok(())
//! # }
//! ```

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

const MODELS: &[&str] = &["33210A", "33220A"];

/// Driver for the 33220A.
pub struct Key33220 {
    core: InstrumentCore,
}

impl Key33220 {
    pub fn builder() -> Key33220Builder {
        Key33220Builder::new()
    }
}

/// Fluent builder for [`Key33220`].
#[derive(Debug, Clone, Default)]
pub struct Key33220Builder {
    options: DriverOptions,
}

impl Key33220Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all construction options.
    pub fn options(mut self, options: DriverOptions) -> Self {
        self.options = options;
        self
    }

    /// Send `*RST` during construction.
    pub fn reset(mut self, on: bool) -> Self {
        self.options.reset = on;
        self
    }

    /// Alias the output channel.
    pub fn alias(mut self, channel: &str, alias: &str) -> Self {
        self.options = self.options.alias(channel, alias);
        self
    }

    /// Build a driver over an existing session.
    pub async fn build<S: CommandDispatcher + 'static>(self, session: S) -> Result<Key33220> {
        let core = InstrumentCore::new(
            Arc::new(session),
            CapabilityGroup::FunctionGenerator,
            ChannelMap::new(["CH1"]),
        )
        .with_supported_models(MODELS);
        core.initialize(&self.options).await?;
        Ok(Key33220 { core })
    }

    /// Build a driver over a transport with a default [`Session`].
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<Key33220> {
        self.build(Session::with_defaults(transport)).await
    }
}

/// Ramp symmetry in percent for the waveforms built on `RAMP`.
fn ramp_symmetry(waveform: Waveform) -> Option<u32> {
    match waveform {
        Waveform::RampUp => Some(100),
        Waveform::Triangle => Some(50),
        Waveform::RampDown => Some(0),
        _ => None,
    }
}

fn function_mnemonic(waveform: Waveform) -> &'static str {
    match waveform {
        Waveform::Sine => "SIN",
        Waveform::Square => "SQU",
        Waveform::Triangle | Waveform::RampUp | Waveform::RampDown => "RAMP",
        Waveform::Dc => "DC",
    }
}

fn trigger_mnemonic(source: TriggerSource) -> &'static str {
    match source {
        TriggerSource::Internal => "IMM",
        TriggerSource::External => "EXT",
        TriggerSource::Software => "BUS",
    }
}

fn parse_trigger_source(response: &str) -> Result<TriggerSource> {
    match response.trim().to_ascii_uppercase().as_str() {
        "IMM" | "IMMEDIATE" => Ok(TriggerSource::Internal),
        "EXT" | "EXTERNAL" => Ok(TriggerSource::External),
        "BUS" => Ok(TriggerSource::Software),
        other => Err(Error::malformed(other, "expected IMM, EXT or BUS")),
    }
}

fn check_positive(what: &str, value: f64) -> Result<f64> {
    if !(value.is_finite() && value > 0.0) {
        return Err(Error::InvalidParameter(format!("{what} must be positive, got {value}")));
    }
    Ok(value)
}

fn check_start_phase(degrees: f64) -> Result<f64> {
    if !(-360.0..=360.0).contains(&degrees) {
        return Err(Error::InvalidParameter(format!(
            "start phase {degrees} outside -360 to 360 degrees"
        )));
    }
    Ok(degrees)
}

impl Key33220 {
    async fn symmetry_for_ramp(&self) -> Result<Waveform> {
        let symmetry = self
            .core
            .query_f64(0, "ramp_symmetry", "FUNC:RAMP:SYMM?")
            .await?;
        Ok(if symmetry >= 99.95 {
            Waveform::RampUp
        } else if symmetry <= 0.05 {
            Waveform::RampDown
        } else {
            Waveform::Triangle
        })
    }
}

impl Instrument for Key33220 {
    fn core(&self) -> &InstrumentCore {
        &self.core
    }

    fn as_function_generator(&self) -> Option<&dyn FunctionGenerator> {
        Some(self)
    }
}

#[async_trait]
impl FunctionGenerator for Key33220 {
    async fn get_waveform(&self, ch: usize) -> Result<Waveform> {
        self.core.check_index(ch)?;
        let response = self.core.query_text("FUNC?").await?;
        let waveform = match response.to_ascii_uppercase().as_str() {
            "SIN" | "SINUSOID" => Waveform::Sine,
            "SQU" | "SQUARE" => Waveform::Square,
            "RAMP" => self.symmetry_for_ramp().await?,
            "DC" => Waveform::Dc,
            other => {
                return Err(Error::malformed(other, "not a standard waveform").with_command("FUNC?"));
            }
        };
        self.core.cache().store(ch, "waveform", waveform.to_string());
        Ok(waveform)
    }

    async fn set_waveform(&self, ch: usize, waveform: Waveform) -> Result<()> {
        self.core.check_index(ch)?;
        let command = match ramp_symmetry(waveform) {
            Some(symmetry) => format!("FUNC RAMP;:FUNC:RAMP:SYMM {symmetry}"),
            None => format!("FUNC {}", function_mnemonic(waveform)),
        };
        self.core.set(ch, "waveform", &command, waveform.to_string()).await
    }

    async fn get_frequency(&self, ch: usize) -> Result<f64> {
        self.core.check_index(ch)?;
        self.core.query_f64(ch, "frequency", "FREQ?").await
    }

    async fn set_frequency(&self, ch: usize, hz: f64) -> Result<()> {
        self.core.check_index(ch)?;
        let hz = check_positive("frequency", hz)?;
        self.core.set(ch, "frequency", &format!("FREQ {hz}"), hz).await
    }

    async fn get_amplitude(&self, ch: usize) -> Result<f64> {
        self.core.check_index(ch)?;
        self.core.query_f64(ch, "amplitude", "VOLT?").await
    }

    async fn set_amplitude(&self, ch: usize, vpp: f64) -> Result<()> {
        self.core.check_index(ch)?;
        let vpp = check_positive("amplitude", vpp)?;
        self.core.set(ch, "amplitude", &format!("VOLT {vpp}"), vpp).await
    }

    async fn get_dc_offset(&self, ch: usize) -> Result<f64> {
        self.core.check_index(ch)?;
        self.core.query_f64(ch, "dc_offset", "VOLT:OFFS?").await
    }

    async fn set_dc_offset(&self, ch: usize, volts: f64) -> Result<()> {
        self.core.check_index(ch)?;
        self.core
            .set(ch, "dc_offset", &format!("VOLT:OFFS {volts}"), volts)
            .await
    }

    async fn get_start_phase(&self, ch: usize) -> Result<f64> {
        self.core.check_index(ch)?;
        self.core.query_f64(ch, "start_phase", "BURS:PHAS?").await
    }

    async fn set_start_phase(&self, ch: usize, degrees: f64) -> Result<()> {
        self.core.check_index(ch)?;
        check_start_phase(degrees)?;
        self.core
            .set(ch, "start_phase", &format!("BURS:PHAS {degrees}"), degrees)
            .await
    }

    async fn get_output_enabled(&self, ch: usize) -> Result<bool> {
        self.core.check_index(ch)?;
        self.core.query_bool(ch, "output", "OUTP?").await
    }

    async fn set_output_enabled(&self, ch: usize, on: bool) -> Result<()> {
        self.core.check_index(ch)?;
        let command = if on { "OUTP ON" } else { "OUTP OFF" };
        self.core.set(ch, "output", command, on).await
    }

    async fn get_burst_count(&self, ch: usize) -> Result<u32> {
        self.core.check_index(ch)?;
        let cycles = self.core.query_i64(ch, "burst_count", "BURS:NCYC?").await?;
        u32::try_from(cycles).map_err(|_| {
            Error::malformed(cycles.to_string(), "burst count out of range").with_command("BURS:NCYC?")
        })
    }

    async fn set_burst_count(&self, ch: usize, cycles: u32) -> Result<()> {
        self.core.check_index(ch)?;
        if cycles == 0 {
            return Err(Error::InvalidParameter("burst count must be at least 1".into()));
        }
        self.core
            .set(ch, "burst_count", &format!("BURS:NCYC {cycles}"), cycles)
            .await
    }

    async fn get_trigger_source(&self, ch: usize) -> Result<TriggerSource> {
        self.core.check_index(ch)?;
        let response = self.core.query_text("TRIG:SOUR?").await?;
        let source = parse_trigger_source(&response).map_err(|e| e.with_command("TRIG:SOUR?"))?;
        self.core.cache().store(ch, "trigger_source", source.to_string());
        Ok(source)
    }

    async fn set_trigger_source(&self, ch: usize, source: TriggerSource) -> Result<()> {
        self.core.check_index(ch)?;
        let command = format!("TRIG:SOUR {}", trigger_mnemonic(source));
        self.core
            .set(ch, "trigger_source", &command, source.to_string())
            .await
    }

    async fn get_operation_mode(&self, ch: usize) -> Result<OperationMode> {
        self.core.check_index(ch)?;
        let mode = if self.core.query_bool(ch, "burst_state", "BURS:STAT?").await? {
            OperationMode::Burst
        } else if self.core.query_bool(ch, "sweep_state", "SWE:STAT?").await? {
            OperationMode::Sweep
        } else {
            OperationMode::Continuous
        };
        self.core.cache().store(ch, "operation_mode", mode.to_string());
        Ok(mode)
    }

    async fn set_operation_mode(&self, ch: usize, mode: OperationMode) -> Result<()> {
        self.core.check_index(ch)?;
        // Burst and sweep are mutually exclusive; turn the other one off first.
        let command = match mode {
            OperationMode::Continuous => "BURS:STAT OFF;:SWE:STAT OFF",
            OperationMode::Burst => "SWE:STAT OFF;:BURS:STAT ON",
            OperationMode::Sweep => "BURS:STAT OFF;:SWE:STAT ON",
        };
        self.core
            .set(ch, "operation_mode", command, mode.to_string())
            .await?;
        debug!(%mode, "operation mode set");
        Ok(())
    }

    async fn get_internal_trigger_rate(&self) -> Result<f64> {
        let period = self
            .core
            .query_f64(INSTRUMENT_WIDE, "burst_period", "BURS:INT:PER?")
            .await?;
        if period <= 0.0 {
            return Err(Error::malformed(period.to_string(), "burst period must be positive")
                .with_command("BURS:INT:PER?"));
        }
        // The instrument stores a period; give back the rate that produced it.
        let programmed = self
            .core
            .cache()
            .get_f64(INSTRUMENT_WIDE, "internal_trigger_rate")
            .filter(|&hz| 1.0 / hz == period);
        let hz = programmed.unwrap_or(1.0 / period);
        self.core
            .cache()
            .store(INSTRUMENT_WIDE, "internal_trigger_rate", hz);
        Ok(hz)
    }

    async fn set_internal_trigger_rate(&self, hz: f64) -> Result<()> {
        let hz = check_positive("internal trigger rate", hz)?;
        let period = 1.0 / hz;
        self.core
            .set(
                INSTRUMENT_WIDE,
                "burst_period",
                &format!("BURS:INT:PER {period}"),
                period,
            )
            .await?;
        self.core
            .cache()
            .store(INSTRUMENT_WIDE, "internal_trigger_rate", hz);
        Ok(())
    }

    async fn configure_standard_waveform(
        &self,
        ch: usize,
        waveform: Waveform,
        amplitude: f64,
        offset: f64,
        frequency: f64,
        phase: f64,
    ) -> Result<()> {
        self.core.check_index(ch)?;
        let mut commands = Vec::with_capacity(3);
        match waveform {
            Waveform::Dc => commands.push(format!("APPL:DC DEF, DEF, {offset}")),
            other => {
                let frequency = check_positive("frequency", frequency)?;
                let amplitude = check_positive("amplitude", amplitude)?;
                check_start_phase(phase)?;
                commands.push(format!(
                    "APPL:{} {frequency}, {amplitude}, {offset}",
                    function_mnemonic(other)
                ));
                if let Some(symmetry) = ramp_symmetry(other) {
                    commands.push(format!("FUNC:RAMP:SYMM {symmetry}"));
                }
                commands.push(format!("BURS:PHAS {phase}"));
            }
        }
        for command in &commands {
            self.core.dispatcher().command(command).await?;
        }

        let cache = self.core.cache();
        cache.store(ch, "waveform", waveform.to_string());
        cache.store(ch, "dc_offset", offset);
        if waveform != Waveform::Dc {
            cache.store(ch, "frequency", frequency);
            cache.store(ch, "amplitude", amplitude);
            cache.store(ch, "start_phase", phase);
        }
        debug!(%waveform, amplitude, offset, frequency, phase, "standard waveform configured");
        Ok(())
    }
}
