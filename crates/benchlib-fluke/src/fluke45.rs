//! Fluke 45 dual display multimeter.
//!
//! The Fluke 45 speaks its own command set rather than SCPI subsystems: the
//! primary function is selected with a bare mnemonic (`VDC`, `OHMS`, ...),
//! ranges are numbered 1 to 7 per function (`RANGE 3`), and `AUTO` turns
//! autoranging back on. Only the primary display is modeled.
//!
//! The range tables are those of the slow and medium reading rates.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use benchlib_core::{AutoRange, Dmm, MeasurementFunction};
//! use benchlib_fluke::Fluke45;
//! use benchlib_prologix::Controller;
//!
//! # async fn example(gpib: Controller) -> benchlib_core::Result<()> {
//! let dmm = Fluke45::builder().build_with_transport(Box::new(gpib.device(10)?)).await?;
//! dmm.set_measurement_function(MeasurementFunction::DcVolts).await?;
//! dmm.set_range(AutoRange::Off, 20.0).await?;
//! let volts = dmm.read_measurement(Duration::from_secs(2)).await?;
//! gpib.front_panel(10, true).await?;
//! # Ok(())
//! # }
//! ```

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

const MODELS: &[&str] = &["45"];

/// Readings at or above this magnitude are the meter's `OL` display.
const OVERLOAD: f64 = 1e9;

/// Driver for the Fluke 45.
pub struct Fluke45 {
    core: InstrumentCore,
}

/// Fluent builder for [`Fluke45`].
#[derive(Debug, Clone, Default)]
pub struct Fluke45Builder {
    options: DriverOptions,
}

impl Fluke45Builder {
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

    pub async fn build<S: CommandDispatcher + 'static>(self, session: S) -> Result<Fluke45> {
        let core = InstrumentCore::new(
            Arc::new(session),
            CapabilityGroup::Dmm,
            ChannelMap::new(Vec::<String>::new()),
        )
        .with_supported_models(MODELS);
        core.initialize(&self.options).await?;
        Ok(Fluke45 { core })
    }

    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<Fluke45> {
        self.build(Session::with_defaults(transport)).await
    }
}

impl Fluke45 {
    pub fn builder() -> Fluke45Builder {
        Fluke45Builder::new()
    }

    async fn function(&self) -> Result<MeasurementFunction> {
        let response = self.core.query_text("FUNC1?").await?;
        let function = parse_function(&response).map_err(|e| e.with_command("FUNC1?"))?;
        self.core
            .cache()
            .store(INSTRUMENT_WIDE, "function", function.to_string());
        Ok(function)
    }
}

fn function_mnemonic(function: MeasurementFunction) -> Result<&'static str> {
    match function {
        MeasurementFunction::DcVolts => Ok("VDC"),
        MeasurementFunction::AcVolts => Ok("VAC"),
        MeasurementFunction::DcCurrent => Ok("ADC"),
        MeasurementFunction::AcCurrent => Ok("AAC"),
        MeasurementFunction::TwoWireResistance => Ok("OHMS"),
        MeasurementFunction::Frequency => Ok("FREQ"),
        MeasurementFunction::FourWireResistance | MeasurementFunction::Period => {
            Err(Error::not_supported(format!("{function} on the Fluke 45")))
        }
    }
}

fn parse_function(response: &str) -> Result<MeasurementFunction> {
    match response.trim().to_ascii_uppercase().as_str() {
        "VDC" => Ok(MeasurementFunction::DcVolts),
        "VAC" => Ok(MeasurementFunction::AcVolts),
        "ADC" => Ok(MeasurementFunction::DcCurrent),
        "AAC" => Ok(MeasurementFunction::AcCurrent),
        "OHMS" => Ok(MeasurementFunction::TwoWireResistance),
        "FREQ" => Ok(MeasurementFunction::Frequency),
        other => Err(Error::malformed(other, "not a supported primary function")),
    }
}

/// Full-scale value of ranges 1, 2, ... for a function.
fn ranges(function: MeasurementFunction) -> &'static [f64] {
    match function {
        MeasurementFunction::DcVolts => &[0.3, 3.0, 30.0, 300.0, 1000.0],
        MeasurementFunction::AcVolts => &[0.3, 3.0, 30.0, 300.0, 750.0],
        MeasurementFunction::DcCurrent | MeasurementFunction::AcCurrent => &[0.03, 0.1, 10.0],
        MeasurementFunction::TwoWireResistance => &[300.0, 3e3, 30e3, 300e3, 3e6, 30e6, 300e6],
        MeasurementFunction::Frequency => &[1e3, 10e3, 100e3, 1e6, 1e7],
        MeasurementFunction::FourWireResistance | MeasurementFunction::Period => &[],
    }
}

/// The smallest range that holds `value`, as its 1-based range number.
fn range_for(function: MeasurementFunction, value: f64) -> Result<(usize, f64)> {
    ranges(function)
        .iter()
        .position(|&full_scale| value <= full_scale)
        .map(|i| (i + 1, ranges(function)[i]))
        .ok_or_else(|| {
            Error::InvalidParameter(format!("no {function} range holds {value}"))
        })
}

fn parse_reading(response: &str) -> Result<f64> {
    let value = parse::parse_f64(response)?;
    if value.abs() >= OVERLOAD {
        return Err(Error::malformed(response.trim(), "meter reports overload"));
    }
    Ok(value)
}

impl Instrument for Fluke45 {
    fn core(&self) -> &InstrumentCore {
        &self.core
    }

    fn as_dmm(&self) -> Option<&dyn Dmm> {
        Some(self)
    }
}

#[async_trait]
impl Dmm for Fluke45 {
    async fn get_measurement_function(&self) -> Result<MeasurementFunction> {
        self.function().await
    }

    async fn set_measurement_function(&self, function: MeasurementFunction) -> Result<()> {
        let mnemonic = function_mnemonic(function)?;
        self.core
            .set(INSTRUMENT_WIDE, "function", mnemonic, function.to_string())
            .await?;
        debug!(%function, "measurement function set");
        Ok(())
    }

    async fn get_range(&self) -> Result<(AutoRange, f64)> {
        let function = self.function().await?;
        let auto = self
            .core
            .query_bool(INSTRUMENT_WIDE, "auto_range", "AUTO?")
            .await?;
        let number = self
            .core
            .query_i64(INSTRUMENT_WIDE, "range_number", "RANGE1?")
            .await?;
        let full_scale = usize::try_from(number)
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| ranges(function).get(i).copied())
            .ok_or_else(|| {
                Error::malformed(number.to_string(), format!("no such {function} range"))
                    .with_command("RANGE1?")
            })?;
        self.core.cache().store(INSTRUMENT_WIDE, "range", full_scale);
        let auto = if auto { AutoRange::On } else { AutoRange::Off };
        Ok((auto, full_scale))
    }

    async fn set_range(&self, auto: AutoRange, range: f64) -> Result<()> {
        match auto {
            AutoRange::On => {
                self.core
                    .set(INSTRUMENT_WIDE, "auto_range", "AUTO", true)
                    .await
            }
            AutoRange::Once => Err(Error::not_supported("single autorange on the Fluke 45")),
            AutoRange::Off => {
                if !(range.is_finite() && range > 0.0) {
                    return Err(Error::InvalidParameter(format!(
                        "manual range must be positive, got {range}"
                    )));
                }
                let function = self.function().await?;
                let (number, full_scale) = range_for(function, range)?;
                self.core
                    .set(
                        INSTRUMENT_WIDE,
                        "range",
                        &format!("RANGE {number}"),
                        full_scale,
                    )
                    .await?;
                self.core.cache().store(INSTRUMENT_WIDE, "auto_range", false);
                debug!(%function, number, full_scale, "manual range set");
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
            .query_with_timeout("MEAS1?", max_time)
            .await?;
        parse_reading(&response).map_err(|e| e.with_command("MEAS1?"))
    }

    /// The Fluke 45 only has front panel inputs.
    async fn get_selected_terminals(&self) -> Result<Terminals> {
        Ok(Terminals::Front)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchlib_core::ErrorKind;
    use benchlib_prologix::{Controller, ControllerConfig};
    use benchlib_test_harness::{MockTransport, ScpiSimulator};

    const IDN: &str = "FLUKE, 45, 5450025, 1.6 D1.6";

    fn simulator() -> ScpiSimulator {
        ScpiSimulator::new(IDN)
            .with_register("FUNC1", "VDC")
            .with_register("AUTO", "1")
            .with_register("RANGE1", "2")
    }

    async fn driver(sim: &ScpiSimulator) -> Fluke45 {
        Fluke45::builder()
            .build_with_transport(Box::new(sim.transport()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn identity_over_gpib() {
        let mut mock = MockTransport::new();
        for directive in [
            "++mode 1",
            "++auto 0",
            "++eoi 1",
            "++eos 2",
            "++read_tmo_ms 500",
            "++addr 10",
            "*IDN?",
        ] {
            mock.expect_send(format!("{directive}\n").as_bytes());
        }
        mock.expect(b"++read eoi\n", format!("{IDN}\n").as_bytes());
        mock.expect_send(b"FUNC1?\n");
        mock.expect(b"++read eoi\n", b"OHMS\n");
        mock.expect_send(b"++loc\n");

        let gpib = Controller::new(Box::new(mock), ControllerConfig::default())
            .await
            .unwrap();
        let dmm = Fluke45::builder()
            .build_with_transport(Box::new(gpib.device(10).unwrap()))
            .await
            .unwrap();
        assert_eq!(dmm.manufacturer().await.unwrap(), "FLUKE");
        assert_eq!(dmm.model().await.unwrap(), "45");
        assert_eq!(
            dmm.get_measurement_function().await.unwrap(),
            MeasurementFunction::TwoWireResistance
        );
        gpib.front_panel(10, true).await.unwrap();
    }

    #[tokio::test]
    async fn functions_use_bare_mnemonics() {
        let sim = simulator();
        let dmm = driver(&sim).await;
        assert_eq!(
            dmm.get_measurement_function().await.unwrap(),
            MeasurementFunction::DcVolts
        );
        dmm.set_measurement_function(MeasurementFunction::AcCurrent)
            .await
            .unwrap();
        dmm.set_measurement_function(MeasurementFunction::Frequency)
            .await
            .unwrap();
        let lines = sim.wire_log().lines();
        assert_eq!(lines[lines.len() - 2..].to_vec(), vec!["AAC", "FREQ"]);
    }

    #[tokio::test]
    async fn unsupported_functions_fail_before_io() {
        let sim = simulator();
        let dmm = driver(&sim).await;
        let sent = sim.wire_log().len();
        for function in [
            MeasurementFunction::FourWireResistance,
            MeasurementFunction::Period,
        ] {
            let err = dmm.set_measurement_function(function).await.unwrap_err();
            assert!(err.is_not_supported());
        }
        assert!(dmm.set_range(AutoRange::Once, 0.0).await.unwrap_err().is_not_supported());
        assert_eq!(sim.wire_log().len(), sent);
        assert!(dmm.core().cache().is_empty());
    }

    #[tokio::test]
    async fn manual_range_picks_the_smallest_that_fits() {
        let sim = simulator();
        let dmm = driver(&sim).await;
        assert_eq!(dmm.get_range().await.unwrap(), (AutoRange::On, 3.0));

        dmm.set_range(AutoRange::Off, 20.0).await.unwrap();
        assert_eq!(sim.register("RANGE").as_deref(), Some("3"));
        assert_eq!(dmm.core().cache().get_f64(INSTRUMENT_WIDE, "range"), Some(30.0));

        sim.set_register("FUNC1", "OHMS");
        dmm.set_range(AutoRange::Off, 3e3).await.unwrap();
        assert_eq!(sim.register("RANGE").as_deref(), Some("2"));

        let err = dmm.set_range(AutoRange::Off, 1e9).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        dmm.set_range(AutoRange::On, 0.0).await.unwrap();
        let lines = sim.wire_log().lines();
        assert_eq!(lines.last().map(String::as_str), Some("AUTO"));
    }

    #[tokio::test]
    async fn range_number_maps_to_full_scale() {
        let sim = simulator()
            .with_register("FUNC1", "OHMS")
            .with_register("AUTO", "0")
            .with_register("RANGE1", "7");
        let dmm = driver(&sim).await;
        assert_eq!(dmm.get_range().await.unwrap(), (AutoRange::Off, 300e6));

        sim.set_register("FUNC1", "ADC");
        let err = dmm.get_range().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
        assert_eq!(err.command(), Some("RANGE1?"));
    }

    #[tokio::test]
    async fn readings_and_overload() {
        let sim = simulator().respond("MEAS1?", "+4.9987E+0");
        let dmm = driver(&sim).await;
        assert_eq!(
            dmm.read_measurement(Duration::from_millis(100)).await.unwrap(),
            4.9987
        );

        let sim = simulator().respond("MEAS1?", "+1E+9");
        let dmm = driver(&sim).await;
        let err = dmm
            .read_measurement(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
        assert_eq!(err.command(), Some("MEAS1?"));
        assert!(matches!(
            dmm.read_measurement(Duration::ZERO).await,
            Err(Error::InvalidParameter(_))
        ));
    }

    #[tokio::test]
    async fn front_terminals_only() {
        let sim = simulator();
        let dmm = driver(&sim).await;
        let sent = sim.wire_log().len();
        assert_eq!(dmm.get_selected_terminals().await.unwrap(), Terminals::Front);
        assert_eq!(sim.wire_log().len(), sent);

        let inst: &dyn Instrument = &dmm;
        assert!(inst.as_dmm().is_some());
        assert_eq!(inst.channel_count(), 0);
    }
}
