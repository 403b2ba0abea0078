//! Keysight (Agilent) E36xx bench DC power supplies.
//!
//! The E3631A has three outputs, `P6V`, `P25V` and `N25V`, and every
//! per-output command is sent as one compound line that first selects the
//! output with `INST:SEL`, so concurrent callers can never interleave a
//! selection with another caller's setting. The single-output E3632A,
//! E3633A and E3634A take the same commands without a selection.
//!
//! Over RS-232 the supplies ignore remote commands until `SYST:REM` is
//! sent; [`E36xxBuilder::build_with_transport`] does that automatically for
//! serial transports.
//!
//! These supplies always regulate at the current limit; trip behavior and
//! over-voltage protection are not modeled and report
//! [`Error::FunctionNotSupported`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use benchlib_core::error::{Error, Result};
use benchlib_core::parse;
use benchlib_core::{
    CapabilityGroup, ChannelMap, CommandDispatcher, CurrentLimitBehavior, DcPower, DriverOptions,
    Instrument, InstrumentCore, Transport,
};
use benchlib_scpi::Session;

/// Ratings of one output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputSpec {
    /// Channel name, also the `INST:SEL` argument on multi-output models.
    pub name: &'static str,
    /// Most negative programmable voltage.
    pub min_volts: f64,
    /// Most positive programmable voltage.
    pub max_volts: f64,
    pub max_amps: f64,
}

/// Static description of one E36xx model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct E36xxModel {
    pub name: &'static str,
    /// Model strings `*IDN?` may report for this supply.
    pub identities: &'static [&'static str],
    pub outputs: &'static [OutputSpec],
}

impl E36xxModel {
    fn selects_output(&self) -> bool {
        self.outputs.len() > 1
    }
}

pub const E3631A: E36xxModel = E36xxModel {
    name: "E3631A",
    identities: &["E3631A"],
    outputs: &[
        OutputSpec {
            name: "P6V",
            min_volts: 0.0,
            max_volts: 6.18,
            max_amps: 5.15,
        },
        OutputSpec {
            name: "P25V",
            min_volts: 0.0,
            max_volts: 25.75,
            max_amps: 1.03,
        },
        OutputSpec {
            name: "N25V",
            min_volts: -25.75,
            max_volts: 0.0,
            max_amps: 1.03,
        },
    ],
};

pub const E3632A: E36xxModel = E36xxModel {
    name: "E3632A",
    identities: &["E3632A"],
    outputs: &[OutputSpec {
        name: "OUT",
        min_volts: 0.0,
        max_volts: 30.9,
        max_amps: 7.21,
    }],
};

pub const E3633A: E36xxModel = E36xxModel {
    name: "E3633A",
    identities: &["E3633A"],
    outputs: &[OutputSpec {
        name: "OUT",
        min_volts: 0.0,
        max_volts: 20.6,
        max_amps: 20.6,
    }],
};

pub const E3634A: E36xxModel = E36xxModel {
    name: "E3634A",
    identities: &["E3634A"],
    outputs: &[OutputSpec {
        name: "OUT",
        min_volts: 0.0,
        max_volts: 51.5,
        max_amps: 7.21,
    }],
};

/// Driver for an E36xx supply.
pub struct E36xx {
    core: InstrumentCore,
    model: E36xxModel,
}

/// Fluent builder for [`E36xx`]. Defaults to the [`E3631A`].
#[derive(Debug, Clone)]
pub struct E36xxBuilder {
    model: E36xxModel,
    options: DriverOptions,
    remote: Option<bool>,
}

impl Default for E36xxBuilder {
    fn default() -> Self {
        E36xxBuilder {
            model: E3631A,
            options: DriverOptions::default(),
            remote: None,
        }
    }
}

impl E36xxBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: E36xxModel) -> Self {
        self.model = model;
        self
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

    /// Send `SYST:REM` after initialization. Unset, only serial transports
    /// passed to [`build_with_transport`](Self::build_with_transport) get it.
    pub fn remote(mut self, on: bool) -> Self {
        self.remote = Some(on);
        self
    }

    pub async fn build<S: CommandDispatcher + 'static>(self, session: S) -> Result<E36xx> {
        let core = InstrumentCore::new(
            Arc::new(session),
            CapabilityGroup::DcPower,
            ChannelMap::new(self.model.outputs.iter().map(|o| o.name)),
        )
        .with_supported_models(self.model.identities);
        core.initialize(&self.options).await?;
        if self.remote == Some(true) {
            core.dispatcher().command("SYST:REM").await?;
            debug!(model = self.model.name, "remote mode enabled");
        }
        Ok(E36xx {
            core,
            model: self.model,
        })
    }

    pub async fn build_with_transport(mut self, transport: Box<dyn Transport>) -> Result<E36xx> {
        if self.remote.is_none() {
            self.remote = Some(transport.is_serial());
        }
        self.build(Session::with_defaults(transport)).await
    }
}

impl E36xx {
    pub fn builder() -> E36xxBuilder {
        E36xxBuilder::new()
    }

    /// The model this driver was built for.
    pub fn model_spec(&self) -> &E36xxModel {
        &self.model
    }

    fn output(&self, ch: usize) -> Result<&OutputSpec> {
        self.core.check_index(ch)?;
        self.model
            .outputs
            .get(ch)
            .ok_or_else(|| Error::UnknownChannel(ch.to_string()))
    }

    /// Prefix `text` with the output selection where the model needs one.
    fn scoped(&self, output: &OutputSpec, text: &str) -> String {
        if self.model.selects_output() {
            format!("INST:SEL {};:{text}", output.name)
        } else {
            text.to_string()
        }
    }
}

impl Instrument for E36xx {
    fn core(&self) -> &InstrumentCore {
        &self.core
    }

    fn as_dc_power(&self) -> Option<&dyn DcPower> {
        Some(self)
    }
}

#[async_trait]
impl DcPower for E36xx {
    async fn get_voltage_level(&self, ch: usize) -> Result<f64> {
        let output = self.output(ch)?;
        self.core
            .query_f64(ch, "voltage_level", &self.scoped(output, "VOLT?"))
            .await
    }

    async fn set_voltage_level(&self, ch: usize, volts: f64) -> Result<()> {
        let output = self.output(ch)?;
        if !(output.min_volts..=output.max_volts).contains(&volts) {
            return Err(Error::InvalidParameter(format!(
                "{} voltage {volts} outside {} to {} V",
                output.name, output.min_volts, output.max_volts
            )));
        }
        let command = self.scoped(output, &format!("VOLT {volts}"));
        self.core.set(ch, "voltage_level", &command, volts).await
    }

    async fn get_current_limit(&self, ch: usize) -> Result<f64> {
        let output = self.output(ch)?;
        self.core
            .query_f64(ch, "current_limit", &self.scoped(output, "CURR?"))
            .await
    }

    async fn set_current_limit(&self, ch: usize, amps: f64) -> Result<()> {
        let output = self.output(ch)?;
        if !(0.0..=output.max_amps).contains(&amps) {
            return Err(Error::InvalidParameter(format!(
                "{} current limit {amps} outside 0 to {} A",
                output.name, output.max_amps
            )));
        }
        let command = self.scoped(output, &format!("CURR {amps}"));
        self.core.set(ch, "current_limit", &command, amps).await
    }

    async fn get_current_limit_behavior(&self, ch: usize) -> Result<CurrentLimitBehavior> {
        self.output(ch)?;
        Ok(CurrentLimitBehavior::Regulate)
    }

    async fn set_current_limit_behavior(
        &self,
        ch: usize,
        behavior: CurrentLimitBehavior,
    ) -> Result<()> {
        self.output(ch)?;
        match behavior {
            CurrentLimitBehavior::Regulate => Ok(()),
            CurrentLimitBehavior::Trip => Err(Error::not_supported(format!(
                "current trip on the {}",
                self.model.name
            ))),
        }
    }

    /// The output relay is shared by every output of a multi-output model.
    async fn get_output_enabled(&self, ch: usize) -> Result<bool> {
        let output = self.output(ch)?;
        self.core
            .query_bool(ch, "output", &self.scoped(output, "OUTP?"))
            .await
    }

    async fn set_output_enabled(&self, ch: usize, on: bool) -> Result<()> {
        let output = self.output(ch)?;
        let command = self.scoped(output, if on { "OUTP ON" } else { "OUTP OFF" });
        self.core.dispatcher().command(&command).await?;
        for index in 0..self.model.outputs.len() {
            self.core.cache().store(index, "output", on);
        }
        debug!(model = self.model.name, on, "outputs switched");
        Ok(())
    }

    async fn measure_voltage(&self, ch: usize) -> Result<f64> {
        let output = self.output(ch)?;
        let query = self.scoped(output, "MEAS:VOLT?");
        let response = self.core.dispatcher().query(&query).await?;
        parse::parse_f64(&response).map_err(|e| e.with_command(query))
    }

    async fn measure_current(&self, ch: usize) -> Result<f64> {
        let output = self.output(ch)?;
        let query = self.scoped(output, "MEAS:CURR?");
        let response = self.core.dispatcher().query(&query).await?;
        parse::parse_f64(&response).map_err(|e| e.with_command(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchlib_test_harness::{MockTransport, ScpiSimulator};

    const IDN: &str = "Agilent Technologies,E3631A,0,2.1-5.0-1.0";

    fn simulator() -> ScpiSimulator {
        ScpiSimulator::new(IDN).scope_header("INST:SEL")
    }

    async fn driver(sim: &ScpiSimulator) -> E36xx {
        E36xx::builder()
            .build_with_transport(Box::new(sim.transport()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn outputs_are_channels() {
        let sim = simulator();
        let psu = driver(&sim).await;
        assert_eq!(psu.channel_names(), vec!["P6V", "P25V", "N25V"]);
        assert_eq!(psu.resolve_channel("N25V").unwrap(), 2);
        assert_eq!(psu.capability_group(), CapabilityGroup::DcPower);
    }

    #[tokio::test]
    async fn settings_land_on_the_selected_output() {
        let sim = simulator();
        let psu = driver(&sim).await;

        psu.set_voltage_level(0, 5.0).await.unwrap();
        psu.set_voltage_level(1, 20.0).await.unwrap();
        psu.set_current_limit(0, 1.0).await.unwrap();

        assert_eq!(sim.scoped_register("P6V", "VOLT").as_deref(), Some("5"));
        assert_eq!(sim.scoped_register("P25V", "VOLT").as_deref(), Some("20"));
        assert_eq!(psu.get_voltage_level(0).await.unwrap(), 5.0);
        assert_eq!(psu.get_voltage_level(1).await.unwrap(), 20.0);
        assert_eq!(psu.get_current_limit(0).await.unwrap(), 1.0);
        assert!(sim.wire_log().lines().contains(&"INST:SEL P25V;:VOLT 20".to_string()));
    }

    #[tokio::test]
    async fn output_sequence() {
        let sim = simulator();
        let psu = driver(&sim).await;
        psu.set_output_enabled(0, false).await.unwrap();
        psu.set_voltage_level(0, 5.0).await.unwrap();
        psu.configure_current_limit(0, CurrentLimitBehavior::Regulate, 1.0)
            .await
            .unwrap();
        psu.set_output_enabled(0, true).await.unwrap();
        assert!(psu.get_output_enabled(0).await.unwrap());
        assert_eq!(psu.core().cache().get_bool(2, "output"), Some(true));
    }

    #[tokio::test]
    async fn negative_output_range() {
        let sim = simulator();
        let psu = driver(&sim).await;
        psu.set_voltage_level(2, -12.0).await.unwrap();
        assert_eq!(psu.get_voltage_level(2).await.unwrap(), -12.0);
        assert!(matches!(
            psu.set_voltage_level(2, 5.0).await,
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            psu.set_current_limit(1, 2.0).await,
            Err(Error::InvalidParameter(_))
        ));
    }

    #[tokio::test]
    async fn measurements() {
        let sim = ScpiSimulator::new(IDN)
            .scope_header("INST:SEL")
            .with_scoped_register("P6V", "MEAS:VOLT", "+4.99870000E+00")
            .with_scoped_register("P6V", "MEAS:CURR", "+1.25000000E-02");
        let psu = driver(&sim).await;
        assert_eq!(psu.measure_voltage(0).await.unwrap(), 4.9987);
        assert_eq!(psu.measure_current(0).await.unwrap(), 0.0125);
    }

    #[tokio::test]
    async fn trip_and_ovp_are_not_supported() {
        let sim = simulator();
        let psu = driver(&sim).await;
        let sent = sim.wire_log().len();

        let err = psu
            .configure_current_limit(0, CurrentLimitBehavior::Trip, 1.0)
            .await
            .unwrap_err();
        assert!(err.is_not_supported());
        assert!(psu.configure_ovp(0, true, 7.0).await.unwrap_err().is_not_supported());
        assert!(psu.get_ovp_limit(0).await.unwrap_err().is_not_supported());
        assert_eq!(
            psu.get_current_limit_behavior(0).await.unwrap(),
            CurrentLimitBehavior::Regulate
        );

        assert_eq!(sim.wire_log().len(), sent);
        assert!(psu.core().cache().is_empty());
    }

    #[tokio::test]
    async fn serial_link_enters_remote_mode() {
        let mut mock = MockTransport::new();
        mock.set_serial(true);
        let log = mock.wire_log();
        mock.expect(b"*IDN?\n", format!("{IDN}\n").as_bytes());
        mock.expect_send(b"SYST:REM\n");
        mock.expect_send(b"INST:SEL P6V;:VOLT 5\n");
        let psu = E36xx::builder()
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();
        psu.set_voltage_level(0, 5.0).await.unwrap();
        assert_eq!(
            log.lines(),
            vec!["*IDN?", "SYST:REM", "INST:SEL P6V;:VOLT 5"]
        );
    }

    #[tokio::test]
    async fn other_links_stay_local_unless_asked() {
        let sim = simulator();
        let _psu = driver(&sim).await;
        assert_eq!(sim.wire_log().count_starting_with("SYST:REM"), 0);

        let sim = simulator();
        let _psu = E36xx::builder()
            .remote(true)
            .build_with_transport(Box::new(sim.transport()))
            .await
            .unwrap();
        assert_eq!(sim.wire_log().count_starting_with("SYST:REM"), 1);
    }

    #[tokio::test]
    async fn single_output_models_skip_selection() {
        let mut mock = MockTransport::new();
        mock.expect(b"*IDN?\n", b"Agilent Technologies,E3632A,0,1.2-5.0-1.0\n");
        mock.expect_send(b"VOLT 12.5\n");
        mock.expect(b"VOLT?\n", b"+1.25000000E+01\n");
        let psu = E36xx::builder()
            .model(E3632A)
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();
        assert_eq!(psu.channel_names(), vec!["OUT"]);
        psu.set_voltage_level(0, 12.5).await.unwrap();
        assert_eq!(psu.get_voltage_level(0).await.unwrap(), 12.5);
    }
}
