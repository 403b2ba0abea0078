//! Keysight InfiniiVision 2000/3000/4000 X-Series oscilloscopes.
//!
//! Four analog channels `CH1`..`CH4`, addressed on the wire as `:CHANn`.
//! The horizontal reference is assumed at the screen center (`:TIM:REF
//! CENT`, the power-on default), so the record start time is the timebase
//! position minus half the timebase range.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use benchlib_core::cache::INSTRUMENT_WIDE;
use benchlib_core::error::{Error, Result};
use benchlib_core::instrument::duration_from_secs;
use benchlib_core::parse;
use benchlib_core::{
    AcquisitionType, CapabilityGroup, ChannelMap, CommandDispatcher, DriverOptions, Instrument,
    InstrumentCore, Oscilloscope, Transport, TriggerType, VerticalCoupling, WaveformMeasurement,
};
use benchlib_scpi::Session;

const MODELS: &[&str] = &[
    "DSO-X 2024A",
    "MSO-X 2024A",
    "DSO-X 3024A",
    "MSO-X 3024A",
    "DSO-X 3024T",
    "MSO-X 3024T",
    "DSO-X 4024A",
    "MSO-X 4024A",
];

const CHANNELS: [&str; 4] = ["CH1", "CH2", "CH3", "CH4"];

const FIFTY_OHMS: f64 = 50.0;
const ONE_MEGOHM: f64 = 1.0e6;

/// Driver for a four-channel InfiniiVision scope.
pub struct InfiniiVision {
    core: InstrumentCore,
}

/// Fluent builder for [`InfiniiVision`].
#[derive(Debug, Clone, Default)]
pub struct InfiniiVisionBuilder {
    options: DriverOptions,
}

impl InfiniiVisionBuilder {
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

    pub async fn build<S: CommandDispatcher + 'static>(self, session: S) -> Result<InfiniiVision> {
        let core = InstrumentCore::new(
            Arc::new(session),
            CapabilityGroup::Oscilloscope,
            ChannelMap::new(CHANNELS),
        )
        .with_supported_models(MODELS);
        core.initialize(&self.options).await?;
        Ok(InfiniiVision { core })
    }

    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<InfiniiVision> {
        self.build(Session::with_defaults(transport)).await
    }
}

impl InfiniiVision {
    pub fn builder() -> InfiniiVisionBuilder {
        InfiniiVisionBuilder::new()
    }

    /// `:CHANn` header for a channel index.
    fn chan(&self, ch: usize) -> Result<String> {
        self.core.check_index(ch)?;
        Ok(format!(":CHAN{}", ch + 1))
    }
}

fn acquisition_mnemonic(acquisition: AcquisitionType) -> &'static str {
    match acquisition {
        AcquisitionType::Normal => "NORM",
        AcquisitionType::PeakDetect => "PEAK",
        AcquisitionType::HighResolution => "HRES",
        AcquisitionType::Average => "AVER",
    }
}

fn parse_acquisition(response: &str) -> Result<AcquisitionType> {
    match response.trim().to_ascii_uppercase().as_str() {
        "NORM" | "NORMAL" => Ok(AcquisitionType::Normal),
        "PEAK" => Ok(AcquisitionType::PeakDetect),
        "HRES" | "HRESOLUTION" => Ok(AcquisitionType::HighResolution),
        "AVER" | "AVERAGE" => Ok(AcquisitionType::Average),
        other => Err(Error::malformed(other, "unknown acquisition type")),
    }
}

fn parse_coupling(response: &str) -> Result<VerticalCoupling> {
    match response.trim().to_ascii_uppercase().as_str() {
        "AC" => Ok(VerticalCoupling::Ac),
        "DC" => Ok(VerticalCoupling::Dc),
        other => Err(Error::malformed(other, "expected AC or DC")),
    }
}

fn parse_trigger_mode(response: &str) -> Result<TriggerType> {
    match response.trim().to_ascii_uppercase().as_str() {
        "EDGE" => Ok(TriggerType::Edge),
        "GLIT" | "GLITCH" => Ok(TriggerType::Width),
        "TV" => Ok(TriggerType::Tv),
        other => Err(Error::malformed(other, "trigger mode not modeled")),
    }
}

fn measurement_mnemonic(measurement: WaveformMeasurement) -> &'static str {
    match measurement {
        WaveformMeasurement::VoltagePeakToPeak => "VPP",
        WaveformMeasurement::VoltageMax => "VMAX",
        WaveformMeasurement::VoltageMin => "VMIN",
        WaveformMeasurement::VoltageRms => "VRMS",
        WaveformMeasurement::Frequency => "FREQ",
        WaveformMeasurement::Period => "PER",
        WaveformMeasurement::RiseTime => "RIS",
        WaveformMeasurement::FallTime => "FALL",
    }
}

impl Instrument for InfiniiVision {
    fn core(&self) -> &InstrumentCore {
        &self.core
    }

    fn as_oscilloscope(&self) -> Option<&dyn Oscilloscope> {
        Some(self)
    }
}

#[async_trait]
impl Oscilloscope for InfiniiVision {
    async fn get_vertical_range(&self, ch: usize) -> Result<f64> {
        let chan = self.chan(ch)?;
        self.core
            .query_f64(ch, "vertical_range", &format!("{chan}:RANG?"))
            .await
    }

    async fn set_vertical_range(&self, ch: usize, volts: f64) -> Result<()> {
        let chan = self.chan(ch)?;
        if !(volts.is_finite() && volts > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "vertical range must be positive, got {volts}"
            )));
        }
        self.core
            .set(ch, "vertical_range", &format!("{chan}:RANG {volts}"), volts)
            .await
    }

    async fn get_vertical_offset(&self, ch: usize) -> Result<f64> {
        let chan = self.chan(ch)?;
        self.core
            .query_f64(ch, "vertical_offset", &format!("{chan}:OFFS?"))
            .await
    }

    async fn set_vertical_offset(&self, ch: usize, volts: f64) -> Result<()> {
        let chan = self.chan(ch)?;
        self.core
            .set(ch, "vertical_offset", &format!("{chan}:OFFS {volts}"), volts)
            .await
    }

    async fn get_vertical_coupling(&self, ch: usize) -> Result<VerticalCoupling> {
        let chan = self.chan(ch)?;
        let query = format!("{chan}:COUP?");
        let response = self.core.query_text(&query).await?;
        let coupling = parse_coupling(&response).map_err(|e| e.with_command(query))?;
        self.core
            .cache()
            .store(ch, "vertical_coupling", coupling.to_string());
        Ok(coupling)
    }

    async fn set_vertical_coupling(&self, ch: usize, coupling: VerticalCoupling) -> Result<()> {
        let chan = self.chan(ch)?;
        let mnemonic = match coupling {
            VerticalCoupling::Ac => "AC",
            VerticalCoupling::Dc => "DC",
            VerticalCoupling::Gnd => return Err(Error::not_supported("ground coupling")),
        };
        self.core
            .set(
                ch,
                "vertical_coupling",
                &format!("{chan}:COUP {mnemonic}"),
                coupling.to_string(),
            )
            .await
    }

    async fn get_probe_attenuation(&self, ch: usize) -> Result<f64> {
        let chan = self.chan(ch)?;
        self.core
            .query_f64(ch, "probe_attenuation", &format!("{chan}:PROB?"))
            .await
    }

    async fn set_probe_attenuation(&self, ch: usize, ratio: f64) -> Result<()> {
        let chan = self.chan(ch)?;
        if !(0.001..=10_000.0).contains(&ratio) {
            return Err(Error::InvalidParameter(format!(
                "probe attenuation {ratio} outside 0.001 to 10000"
            )));
        }
        self.core
            .set(ch, "probe_attenuation", &format!("{chan}:PROB {ratio}"), ratio)
            .await
    }

    async fn get_channel_enabled(&self, ch: usize) -> Result<bool> {
        let chan = self.chan(ch)?;
        self.core
            .query_bool(ch, "channel_enabled", &format!("{chan}:DISP?"))
            .await
    }

    async fn set_channel_enabled(&self, ch: usize, on: bool) -> Result<()> {
        let chan = self.chan(ch)?;
        let state = if on { "ON" } else { "OFF" };
        self.core
            .set(ch, "channel_enabled", &format!("{chan}:DISP {state}"), on)
            .await
    }

    async fn get_input_impedance(&self, ch: usize) -> Result<f64> {
        let chan = self.chan(ch)?;
        let query = format!("{chan}:IMP?");
        let response = self.core.query_text(&query).await?;
        let ohms = match response.to_ascii_uppercase().as_str() {
            "FIFT" | "FIFTY" => FIFTY_OHMS,
            "ONEM" | "ONEMEG" => ONE_MEGOHM,
            other => {
                return Err(Error::malformed(other, "expected ONEM or FIFT").with_command(query));
            }
        };
        self.core.cache().store(ch, "input_impedance", ohms);
        Ok(ohms)
    }

    async fn set_input_impedance(&self, ch: usize, ohms: f64) -> Result<()> {
        let chan = self.chan(ch)?;
        let mnemonic = if ohms == FIFTY_OHMS {
            "FIFT"
        } else if ohms == ONE_MEGOHM {
            "ONEM"
        } else {
            return Err(Error::InvalidParameter(format!(
                "input impedance must be 50 or 1e6 ohms, got {ohms}"
            )));
        };
        self.core
            .set(ch, "input_impedance", &format!("{chan}:IMP {mnemonic}"), ohms)
            .await
    }

    async fn get_acquisition_type(&self) -> Result<AcquisitionType> {
        let response = self.core.query_text(":ACQ:TYPE?").await?;
        let acquisition = parse_acquisition(&response).map_err(|e| e.with_command(":ACQ:TYPE?"))?;
        self.core
            .cache()
            .store(INSTRUMENT_WIDE, "acquisition_type", acquisition.to_string());
        Ok(acquisition)
    }

    async fn set_acquisition_type(&self, acquisition: AcquisitionType) -> Result<()> {
        let command = format!(":ACQ:TYPE {}", acquisition_mnemonic(acquisition));
        self.core
            .set(INSTRUMENT_WIDE, "acquisition_type", &command, acquisition.to_string())
            .await
    }

    async fn get_record_length(&self) -> Result<u64> {
        let points = self
            .core
            .query_i64(INSTRUMENT_WIDE, "record_length", ":WAV:POIN?")
            .await?;
        u64::try_from(points).map_err(|_| {
            Error::malformed(points.to_string(), "negative record length").with_command(":WAV:POIN?")
        })
    }

    async fn get_sample_rate(&self) -> Result<f64> {
        self.core
            .query_f64(INSTRUMENT_WIDE, "sample_rate", ":ACQ:SRAT?")
            .await
    }

    async fn get_time_per_record(&self) -> Result<Duration> {
        let seconds = self
            .core
            .query_f64(INSTRUMENT_WIDE, "time_per_record", ":TIM:RANG?")
            .await?;
        duration_from_secs(seconds).map_err(|e| e.with_command(":TIM:RANG?"))
    }

    async fn set_time_per_record(&self, time: Duration) -> Result<()> {
        let seconds = time.as_secs_f64();
        if seconds <= 0.0 {
            return Err(Error::InvalidParameter("time per record must be non-zero".into()));
        }
        self.core
            .set(
                INSTRUMENT_WIDE,
                "time_per_record",
                &format!(":TIM:RANG {seconds}"),
                seconds,
            )
            .await
    }

    async fn get_acquisition_start_time(&self) -> Result<f64> {
        let position = self
            .core
            .query_f64(INSTRUMENT_WIDE, "timebase_position", ":TIM:POS?")
            .await?;
        let range = self
            .core
            .query_f64(INSTRUMENT_WIDE, "time_per_record", ":TIM:RANG?")
            .await?;
        Ok(position - range / 2.0)
    }

    async fn set_acquisition_start_time(&self, seconds: f64) -> Result<()> {
        let range = self
            .core
            .query_f64(INSTRUMENT_WIDE, "time_per_record", ":TIM:RANG?")
            .await?;
        let position = seconds + range / 2.0;
        self.core
            .set(
                INSTRUMENT_WIDE,
                "timebase_position",
                &format!(":TIM:POS {position}"),
                position,
            )
            .await
    }

    async fn get_trigger_type(&self) -> Result<TriggerType> {
        let response = self.core.query_text(":TRIG:MODE?").await?;
        let trigger = parse_trigger_mode(&response).map_err(|e| e.with_command(":TRIG:MODE?"))?;
        self.core
            .cache()
            .store(INSTRUMENT_WIDE, "trigger_type", trigger.to_string());
        Ok(trigger)
    }

    async fn set_trigger_type(&self, trigger: TriggerType) -> Result<()> {
        let mnemonic = match trigger {
            TriggerType::Edge => "EDGE",
            TriggerType::Width => "GLIT",
            TriggerType::Tv => "TV",
            TriggerType::Immediate => return Err(Error::not_supported("immediate trigger")),
        };
        self.core
            .set(
                INSTRUMENT_WIDE,
                "trigger_type",
                &format!(":TRIG:MODE {mnemonic}"),
                trigger.to_string(),
            )
            .await?;
        debug!(%trigger, "trigger type set");
        Ok(())
    }

    async fn get_trigger_level(&self) -> Result<f64> {
        self.core
            .query_f64(INSTRUMENT_WIDE, "trigger_level", ":TRIG:LEV?")
            .await
    }

    async fn set_trigger_level(&self, volts: f64) -> Result<()> {
        self.core
            .set(
                INSTRUMENT_WIDE,
                "trigger_level",
                &format!(":TRIG:LEV {volts}"),
                volts,
            )
            .await
    }

    async fn get_trigger_holdoff(&self) -> Result<Duration> {
        let seconds = self
            .core
            .query_f64(INSTRUMENT_WIDE, "trigger_holdoff", ":TRIG:HOLD?")
            .await?;
        duration_from_secs(seconds).map_err(|e| e.with_command(":TRIG:HOLD?"))
    }

    async fn set_trigger_holdoff(&self, holdoff: Duration) -> Result<()> {
        let seconds = holdoff.as_secs_f64();
        self.core
            .set(
                INSTRUMENT_WIDE,
                "trigger_holdoff",
                &format!(":TRIG:HOLD {seconds}"),
                seconds,
            )
            .await
    }

    async fn fetch_waveform_measurement(
        &self,
        ch: usize,
        measurement: WaveformMeasurement,
    ) -> Result<f64> {
        self.core.check_index(ch)?;
        let query = format!(":MEAS:{}? CHAN{}", measurement_mnemonic(measurement), ch + 1);
        let response = self.core.dispatcher().query(&query).await?;
        parse::parse_f64(&response).map_err(|e| e.with_command(query))
    }
}
