//! Keysight Truevolt 3446x digital multimeters (34460A, 34461A, 34465A,
//! 34470A).
//!
//! The range commands are function-scoped (`VOLT:AC:RANG`, `RES:RANG`, ...),
//! so range operations read the active function first. Frequency and period
//! share the AC voltage range of their input.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use benchlib_core::cache::INSTRUMENT_WIDE;
use benchlib_core::error::{Error, Result};
use benchlib_core::parse;
use benchlib_core::{
    AutoRange, CapabilityGroup, ChannelMap, CommandDispatcher, Dmm, DriverOptions, Instrument,
    InstrumentCore, MeasurementFunction, Terminals, Transport,
};
use benchlib_scpi::Session;

const MODELS: &[&str] = &["34460A", "34461A", "34465A", "34470A"];

/// Driver for a 3446x DMM.
pub struct Key3446x {
    core: InstrumentCore,
}

/// Fluent builder for [`Key3446x`].
#[derive(Debug, Clone, Default)]
pub struct Key3446xBuilder {
    options: DriverOptions,
}

impl Key3446xBuilder {
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

    pub async fn build<S: CommandDispatcher + 'static>(self, session: S) -> Result<Key3446x> {
        // A DMM has one measurement path and no named channels.
        let core = InstrumentCore::new(
            Arc::new(session),
            CapabilityGroup::Dmm,
            ChannelMap::new(Vec::<String>::new()),
        )
        .with_supported_models(MODELS);
        core.initialize(&self.options).await?;
        Ok(Key3446x { core })
    }

    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<Key3446x> {
        self.build(Session::with_defaults(transport)).await
    }
}

impl Key3446x {
    pub fn builder() -> Key3446xBuilder {
        Key3446xBuilder::new()
    }
}

/// Function mnemonic as sent with `FUNC` and used as the range prefix.
fn function_mnemonic(function: MeasurementFunction) -> &'static str {
    match function {
        MeasurementFunction::DcVolts => "VOLT",
        MeasurementFunction::AcVolts => "VOLT:AC",
        MeasurementFunction::DcCurrent => "CURR",
        MeasurementFunction::AcCurrent => "CURR:AC",
        MeasurementFunction::TwoWireResistance => "RES",
        MeasurementFunction::FourWireResistance => "FRES",
        MeasurementFunction::Frequency => "FREQ",
        MeasurementFunction::Period => "PER",
    }
}

fn range_prefix(function: MeasurementFunction) -> &'static str {
    match function {
        MeasurementFunction::Frequency => "FREQ:VOLT",
        MeasurementFunction::Period => "PER:VOLT",
        other => function_mnemonic(other),
    }
}

/// Parse a `FUNC?` response, long or short form, e.g. `"VOLT:DC"`.
fn parse_function(response: &str) -> Result<MeasurementFunction> {
    let s = parse::unquote(response).to_ascii_uppercase();
    let function = match s.as_str() {
        "VOLT" | "VOLT:DC" | "VOLTAGE" | "VOLTAGE:DC" => MeasurementFunction::DcVolts,
        "VOLT:AC" | "VOLTAGE:AC" => MeasurementFunction::AcVolts,
        "CURR" | "CURR:DC" | "CURRENT" | "CURRENT:DC" => MeasurementFunction::DcCurrent,
        "CURR:AC" | "CURRENT:AC" => MeasurementFunction::AcCurrent,
        "RES" | "RESISTANCE" => MeasurementFunction::TwoWireResistance,
        "FRES" | "FRESISTANCE" => MeasurementFunction::FourWireResistance,
        "FREQ" | "FREQUENCY" => MeasurementFunction::Frequency,
        "PER" | "PERIOD" => MeasurementFunction::Period,
        _ => return Err(Error::malformed(response.trim(), "unknown measurement function")),
    };
    Ok(function)
}

fn parse_terminals(response: &str) -> Result<Terminals> {
    match response.trim().to_ascii_uppercase().as_str() {
        "FRON" | "FRONT" => Ok(Terminals::Front),
        "REAR" => Ok(Terminals::Rear),
        other => Err(Error::malformed(other, "expected FRON or REAR")),
    }
}

impl Instrument for Key3446x {
    fn core(&self) -> &InstrumentCore {
        &self.core
    }

    fn as_dmm(&self) -> Option<&dyn Dmm> {
        Some(self)
    }
}

#[async_trait]
impl Dmm for Key3446x {
    async fn get_measurement_function(&self) -> Result<MeasurementFunction> {
        let response = self.core.query_text("FUNC?").await?;
        let function = parse_function(&response).map_err(|e| e.with_command("FUNC?"))?;
        self.core
            .cache()
            .store(INSTRUMENT_WIDE, "function", function.to_string());
        Ok(function)
    }

    async fn set_measurement_function(&self, function: MeasurementFunction) -> Result<()> {
        let command = format!("FUNC \"{}\"", function_mnemonic(function));
        self.core
            .set(INSTRUMENT_WIDE, "function", &command, function.to_string())
            .await?;
        debug!(%function, "measurement function set");
        Ok(())
    }

    async fn get_range(&self) -> Result<(AutoRange, f64)> {
        let prefix = range_prefix(self.get_measurement_function().await?);
        let auto = self
            .core
            .query_bool(INSTRUMENT_WIDE, "auto_range", &format!("{prefix}:RANG:AUTO?"))
            .await?;
        let range = self
            .core
            .query_f64(INSTRUMENT_WIDE, "range", &format!("{prefix}:RANG?"))
            .await?;
        let auto = if auto { AutoRange::On } else { AutoRange::Off };
        Ok((auto, range))
    }

    async fn set_range(&self, auto: AutoRange, range: f64) -> Result<()> {
        if auto == AutoRange::Off && !(range.is_finite() && range > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "manual range must be positive, got {range}"
            )));
        }
        let prefix = range_prefix(self.get_measurement_function().await?);
        match auto {
            AutoRange::On => {
                self.core
                    .set(INSTRUMENT_WIDE, "auto_range", &format!("{prefix}:RANG:AUTO ON"), true)
                    .await
            }
            AutoRange::Once => {
                // Ranges once, then the instrument holds that range.
                self.core
                    .set(
                        INSTRUMENT_WIDE,
                        "auto_range",
                        &format!("{prefix}:RANG:AUTO ONCE"),
                        false,
                    )
                    .await
            }
            AutoRange::Off => {
                let command = format!("{prefix}:RANG:AUTO OFF;:{prefix}:RANG {range}");
                self.core
                    .set(INSTRUMENT_WIDE, "range", &command, range)
                    .await?;
                self.core.cache().store(INSTRUMENT_WIDE, "auto_range", false);
                Ok(())
            }
        }
    }

    async fn read_measurement(&self, max_time: Duration) -> Result<f64> {
        if max_time.is_zero() {
            return Err(Error::InvalidParameter("max_time must be non-zero".into()));
        }
        let response = self
            .core
            .dispatcher()
            .query_with_timeout("READ?", max_time)
            .await?;
        parse::parse_f64(&response).map_err(|e| e.with_command("READ?"))
    }

    async fn get_selected_terminals(&self) -> Result<Terminals> {
        let response = self.core.query_text("ROUT:TERM?").await?;
        parse_terminals(&response).map_err(|e| e.with_command("ROUT:TERM?"))
    }
}
