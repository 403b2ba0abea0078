//! Kikusui PMX series regulated DC power supplies.
//!
//! Every PMX has one output, `CH1`. The model name encodes the rating
//! (`PMX70-1A` is 70 V, 1 A), which the driver reads from `*IDN?` to
//! range-check settings before anything is sent.
//!
//! Over-voltage protection is always armed on these supplies; only its
//! threshold is programmable. Current trip is over-current protection
//! (`CURR:PROT:STAT`) with its trip level kept equal to the current limit.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use benchlib_core::error::{Error, Result};
use benchlib_core::parse;
use benchlib_core::{
    CachedValue, CapabilityGroup, ChannelMap, CommandDispatcher, CurrentLimitBehavior, DcPower,
    DriverOptions, Instrument, InstrumentCore, Transport,
};
use benchlib_scpi::Session;

const MODELS: &[&str] = &[
    "PMX18-2A",
    "PMX18-5A",
    "PMX35-1A",
    "PMX35-3A",
    "PMX70-1A",
    "PMX110-0.6A",
    "PMX250-0.25A",
    "PMX350-0.2A",
    "PMX500-0.1A",
];

/// Protection thresholds go up to this multiple of the rating.
const PROTECTION_HEADROOM: f64 = 1.1;

/// Output rating decoded from a PMX model name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rating {
    pub volts: f64,
    pub amps: f64,
}

impl Rating {
    /// Decode `PMX<volts>-<amps>A`.
    pub fn from_model(model: &str) -> Option<Rating> {
        let rest = model.trim().strip_prefix("PMX")?;
        let (volts, amps) = rest.split_once('-')?;
        let amps = amps.strip_suffix('A')?;
        Some(Rating {
            volts: volts.parse().ok()?,
            amps: amps.parse().ok()?,
        })
    }
}

/// Driver for a Kikusui PMX supply.
pub struct Pmx {
    core: InstrumentCore,
    rating: Option<Rating>,
}

/// Fluent builder for [`Pmx`].
#[derive(Debug, Clone, Default)]
pub struct PmxBuilder {
    options: DriverOptions,
    rating: Option<Rating>,
}

impl PmxBuilder {
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

    /// Use this rating instead of decoding it from `*IDN?`.
    pub fn rating(mut self, volts: f64, amps: f64) -> Self {
        self.rating = Some(Rating { volts, amps });
        self
    }

    pub async fn build<S: CommandDispatcher + 'static>(self, session: S) -> Result<Pmx> {
        let core = InstrumentCore::new(
            Arc::new(session),
            CapabilityGroup::DcPower,
            ChannelMap::new(["CH1"]),
        )
        .with_supported_models(MODELS);
        core.initialize(&self.options).await?;

        let rating = match self.rating {
            Some(rating) => Some(rating),
            None if self.options.id_query => {
                let model = core.identity().await?.model;
                let rating = Rating::from_model(&model);
                if rating.is_none() {
                    warn!(%model, "cannot decode rating; settings will not be range-checked");
                }
                rating
            }
            None => None,
        };
        debug!(?rating, "PMX ready");
        Ok(Pmx { core, rating })
    }

    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<Pmx> {
        self.build(Session::with_defaults(transport)).await
    }
}

impl Pmx {
    pub fn builder() -> PmxBuilder {
        PmxBuilder::new()
    }

    /// The output rating, when known.
    pub fn rating(&self) -> Option<Rating> {
        self.rating
    }

    fn check_range(&self, what: &str, value: f64, max: Option<f64>, unit: &str) -> Result<()> {
        let in_range = match max {
            Some(max) => (0.0..=max).contains(&value),
            None => value.is_finite() && value >= 0.0,
        };
        if in_range {
            return Ok(());
        }
        Err(Error::InvalidParameter(match max {
            Some(max) => format!("{what} {value} outside 0 to {max} {unit}"),
            None => format!("{what} {value} must be non-negative"),
        }))
    }

    async fn measure(&self, query: &str) -> Result<f64> {
        let response = self.core.dispatcher().query(query).await?;
        parse::parse_f64(&response).map_err(|e| e.with_command(query))
    }
}

impl Instrument for Pmx {
    fn core(&self) -> &InstrumentCore {
        &self.core
    }

    fn as_dc_power(&self) -> Option<&dyn DcPower> {
        Some(self)
    }
}

#[async_trait]
impl DcPower for Pmx {
    async fn get_voltage_level(&self, ch: usize) -> Result<f64> {
        self.core.check_index(ch)?;
        self.core.query_f64(ch, "voltage_level", "VOLT?").await
    }

    async fn set_voltage_level(&self, ch: usize, volts: f64) -> Result<()> {
        self.core.check_index(ch)?;
        self.check_range("voltage", volts, self.rating.map(|r| r.volts), "V")?;
        self.core
            .set(ch, "voltage_level", &format!("VOLT {volts}"), volts)
            .await
    }

    async fn get_current_limit(&self, ch: usize) -> Result<f64> {
        self.core.check_index(ch)?;
        self.core.query_f64(ch, "current_limit", "CURR?").await
    }

    async fn set_current_limit(&self, ch: usize, amps: f64) -> Result<()> {
        self.core.check_index(ch)?;
        self.check_range("current limit", amps, self.rating.map(|r| r.amps), "A")?;
        let tripping = matches!(
            self.core.cache().get(ch, "current_limit_behavior"),
            Some(CachedValue::Text(behavior)) if behavior == "Trip"
        );
        let command = if tripping {
            format!("CURR {amps};:CURR:PROT {amps}")
        } else {
            format!("CURR {amps}")
        };
        self.core.set(ch, "current_limit", &command, amps).await
    }

    async fn get_current_limit_behavior(&self, ch: usize) -> Result<CurrentLimitBehavior> {
        self.core.check_index(ch)?;
        let tripping = self
            .core
            .query_bool(ch, "ocp", "CURR:PROT:STAT?")
            .await?;
        let behavior = if tripping {
            CurrentLimitBehavior::Trip
        } else {
            CurrentLimitBehavior::Regulate
        };
        self.core
            .cache()
            .store(ch, "current_limit_behavior", behavior.to_string());
        Ok(behavior)
    }

    async fn set_current_limit_behavior(
        &self,
        ch: usize,
        behavior: CurrentLimitBehavior,
    ) -> Result<()> {
        self.core.check_index(ch)?;
        let command = match behavior {
            CurrentLimitBehavior::Regulate => "CURR:PROT:STAT OFF".to_string(),
            CurrentLimitBehavior::Trip => match self.core.cache().get_f64(ch, "current_limit") {
                Some(amps) => format!("CURR:PROT {amps};:CURR:PROT:STAT ON"),
                None => "CURR:PROT:STAT ON".to_string(),
            },
        };
        self.core
            .set(ch, "current_limit_behavior", &command, behavior.to_string())
            .await
    }

    async fn get_ovp_enabled(&self, ch: usize) -> Result<bool> {
        self.core.check_index(ch)?;
        Ok(true)
    }

    async fn set_ovp_enabled(&self, ch: usize, on: bool) -> Result<()> {
        self.core.check_index(ch)?;
        if !on {
            return Err(Error::not_supported(
                "disabling over-voltage protection on a PMX",
            ));
        }
        self.core.cache().store(ch, "ovp_enabled", true);
        Ok(())
    }

    async fn get_ovp_limit(&self, ch: usize) -> Result<f64> {
        self.core.check_index(ch)?;
        self.core.query_f64(ch, "ovp_limit", "VOLT:PROT?").await
    }

    async fn set_ovp_limit(&self, ch: usize, volts: f64) -> Result<()> {
        self.core.check_index(ch)?;
        let max = self.rating.map(|r| r.volts * PROTECTION_HEADROOM);
        self.check_range("over-voltage limit", volts, max, "V")?;
        self.core
            .set(ch, "ovp_limit", &format!("VOLT:PROT {volts}"), volts)
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

    async fn measure_voltage(&self, ch: usize) -> Result<f64> {
        self.core.check_index(ch)?;
        self.measure("MEAS:VOLT?").await
    }

    async fn measure_current(&self, ch: usize) -> Result<f64> {
        self.core.check_index(ch)?;
        self.measure("MEAS:CURR?").await
    }
}
