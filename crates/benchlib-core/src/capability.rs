//! Capability-group traits.
//!
//! Each trait describes what one class of instrument can do, independent of
//! the model. Per-channel operations take a channel index (resolve names with
//! [`Instrument::resolve_channel`] or go through a
//! [`Channel`](crate::channel::Channel) view). Every method has a default
//! that fails with [`Error::FunctionNotSupported`], so a driver implements
//! exactly what its hardware does and callers can branch on
//! [`Error::is_not_supported`].

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::instrument::Instrument;
use crate::types::{
    AcquisitionType, AutoRange, CurrentLimitBehavior, MeasurementFunction, OperationMode,
    Terminals, TriggerSource, TriggerType, VerticalCoupling, Waveform, WaveformMeasurement,
};

fn unsupported<T>(op: &str) -> Result<T> {
    Err(Error::not_supported(op))
}

/// Function generator operations.
#[async_trait]
pub trait FunctionGenerator: Instrument {
    async fn get_waveform(&self, ch: usize) -> Result<Waveform> {
        let _ = ch;
        unsupported("waveform query")
    }

    async fn set_waveform(&self, ch: usize, waveform: Waveform) -> Result<()> {
        let _ = (ch, waveform);
        unsupported("waveform")
    }

    /// Output frequency in hertz.
    async fn get_frequency(&self, ch: usize) -> Result<f64> {
        let _ = ch;
        unsupported("frequency query")
    }

    async fn set_frequency(&self, ch: usize, hz: f64) -> Result<()> {
        let _ = (ch, hz);
        unsupported("frequency")
    }

    /// Amplitude in volts peak-to-peak.
    async fn get_amplitude(&self, ch: usize) -> Result<f64> {
        let _ = ch;
        unsupported("amplitude query")
    }

    async fn set_amplitude(&self, ch: usize, vpp: f64) -> Result<()> {
        let _ = (ch, vpp);
        unsupported("amplitude")
    }

    /// DC offset in volts.
    async fn get_dc_offset(&self, ch: usize) -> Result<f64> {
        let _ = ch;
        unsupported("DC offset query")
    }

    async fn set_dc_offset(&self, ch: usize, volts: f64) -> Result<()> {
        let _ = (ch, volts);
        unsupported("DC offset")
    }

    /// Start phase in degrees.
    async fn get_start_phase(&self, ch: usize) -> Result<f64> {
        let _ = ch;
        unsupported("start phase query")
    }

    async fn set_start_phase(&self, ch: usize, degrees: f64) -> Result<()> {
        let _ = (ch, degrees);
        unsupported("start phase")
    }

    async fn get_output_enabled(&self, ch: usize) -> Result<bool> {
        let _ = ch;
        unsupported("output enable query")
    }

    async fn set_output_enabled(&self, ch: usize, on: bool) -> Result<()> {
        let _ = (ch, on);
        unsupported("output enable")
    }

    /// Cycles per burst.
    async fn get_burst_count(&self, ch: usize) -> Result<u32> {
        let _ = ch;
        unsupported("burst count query")
    }

    async fn set_burst_count(&self, ch: usize, cycles: u32) -> Result<()> {
        let _ = (ch, cycles);
        unsupported("burst count")
    }

    async fn get_trigger_source(&self, ch: usize) -> Result<TriggerSource> {
        let _ = ch;
        unsupported("trigger source query")
    }

    async fn set_trigger_source(&self, ch: usize, source: TriggerSource) -> Result<()> {
        let _ = (ch, source);
        unsupported("trigger source")
    }

    async fn get_operation_mode(&self, ch: usize) -> Result<OperationMode> {
        let _ = ch;
        unsupported("operation mode query")
    }

    async fn set_operation_mode(&self, ch: usize, mode: OperationMode) -> Result<()> {
        let _ = (ch, mode);
        unsupported("operation mode")
    }

    /// Instrument-wide internal trigger rate in hertz.
    async fn get_internal_trigger_rate(&self) -> Result<f64> {
        unsupported("internal trigger rate query")
    }

    async fn set_internal_trigger_rate(&self, hz: f64) -> Result<()> {
        let _ = hz;
        unsupported("internal trigger rate")
    }

    /// Set the internal trigger rate as a period.
    async fn set_internal_trigger_period(&self, period: Duration) -> Result<()> {
        let secs = period.as_secs_f64();
        if secs <= 0.0 {
            return Err(Error::InvalidParameter(
                "internal trigger period must be positive".into(),
            ));
        }
        self.set_internal_trigger_rate(1.0 / secs).await
    }

    /// Configure shape, amplitude, offset, frequency and start phase.
    ///
    /// The default sets each in turn; drivers with a combined command
    /// override it.
    async fn configure_standard_waveform(
        &self,
        ch: usize,
        waveform: Waveform,
        amplitude: f64,
        offset: f64,
        frequency: f64,
        phase: f64,
    ) -> Result<()> {
        self.set_waveform(ch, waveform).await?;
        self.set_frequency(ch, frequency).await?;
        self.set_amplitude(ch, amplitude).await?;
        self.set_dc_offset(ch, offset).await?;
        self.set_start_phase(ch, phase).await
    }
}

/// DC power supply operations.
#[async_trait]
pub trait DcPower: Instrument {
    /// Programmed output voltage in volts.
    async fn get_voltage_level(&self, ch: usize) -> Result<f64> {
        let _ = ch;
        unsupported("voltage level query")
    }

    async fn set_voltage_level(&self, ch: usize, volts: f64) -> Result<()> {
        let _ = (ch, volts);
        unsupported("voltage level")
    }

    /// Current limit in amps.
    async fn get_current_limit(&self, ch: usize) -> Result<f64> {
        let _ = ch;
        unsupported("current limit query")
    }

    async fn set_current_limit(&self, ch: usize, amps: f64) -> Result<()> {
        let _ = (ch, amps);
        unsupported("current limit")
    }

    async fn get_current_limit_behavior(&self, ch: usize) -> Result<CurrentLimitBehavior> {
        let _ = ch;
        unsupported("current limit behavior query")
    }

    async fn set_current_limit_behavior(
        &self,
        ch: usize,
        behavior: CurrentLimitBehavior,
    ) -> Result<()> {
        let _ = (ch, behavior);
        unsupported("current limit behavior")
    }

    async fn get_ovp_enabled(&self, ch: usize) -> Result<bool> {
        let _ = ch;
        unsupported("over-voltage protection query")
    }

    async fn set_ovp_enabled(&self, ch: usize, on: bool) -> Result<()> {
        let _ = (ch, on);
        unsupported("over-voltage protection")
    }

    /// Over-voltage protection threshold in volts.
    async fn get_ovp_limit(&self, ch: usize) -> Result<f64> {
        let _ = ch;
        unsupported("over-voltage limit query")
    }

    async fn set_ovp_limit(&self, ch: usize, volts: f64) -> Result<()> {
        let _ = (ch, volts);
        unsupported("over-voltage limit")
    }

    async fn get_output_enabled(&self, ch: usize) -> Result<bool> {
        let _ = ch;
        unsupported("output enable query")
    }

    async fn set_output_enabled(&self, ch: usize, on: bool) -> Result<()> {
        let _ = (ch, on);
        unsupported("output enable")
    }

    /// Measured output voltage in volts.
    async fn measure_voltage(&self, ch: usize) -> Result<f64> {
        let _ = ch;
        unsupported("voltage measurement")
    }

    /// Measured output current in amps.
    async fn measure_current(&self, ch: usize) -> Result<f64> {
        let _ = ch;
        unsupported("current measurement")
    }

    /// Set the current-limit behavior, then the limit.
    async fn configure_current_limit(
        &self,
        ch: usize,
        behavior: CurrentLimitBehavior,
        amps: f64,
    ) -> Result<()> {
        self.set_current_limit_behavior(ch, behavior).await?;
        self.set_current_limit(ch, amps).await
    }

    /// Enable or disable over-voltage protection; the limit is only sent
    /// when enabling.
    async fn configure_ovp(&self, ch: usize, enabled: bool, volts: f64) -> Result<()> {
        if enabled {
            self.set_ovp_limit(ch, volts).await?;
        }
        self.set_ovp_enabled(ch, enabled).await
    }
}

/// Oscilloscope operations.
#[async_trait]
pub trait Oscilloscope: Instrument {
    /// Full-scale vertical range in volts.
    async fn get_vertical_range(&self, ch: usize) -> Result<f64> {
        let _ = ch;
        unsupported("vertical range query")
    }

    async fn set_vertical_range(&self, ch: usize, volts: f64) -> Result<()> {
        let _ = (ch, volts);
        unsupported("vertical range")
    }

    async fn get_vertical_offset(&self, ch: usize) -> Result<f64> {
        let _ = ch;
        unsupported("vertical offset query")
    }

    async fn set_vertical_offset(&self, ch: usize, volts: f64) -> Result<()> {
        let _ = (ch, volts);
        unsupported("vertical offset")
    }

    async fn get_vertical_coupling(&self, ch: usize) -> Result<VerticalCoupling> {
        let _ = ch;
        unsupported("vertical coupling query")
    }

    async fn set_vertical_coupling(&self, ch: usize, coupling: VerticalCoupling) -> Result<()> {
        let _ = (ch, coupling);
        unsupported("vertical coupling")
    }

    async fn get_probe_attenuation(&self, ch: usize) -> Result<f64> {
        let _ = ch;
        unsupported("probe attenuation query")
    }

    async fn set_probe_attenuation(&self, ch: usize, ratio: f64) -> Result<()> {
        let _ = (ch, ratio);
        unsupported("probe attenuation")
    }

    async fn get_channel_enabled(&self, ch: usize) -> Result<bool> {
        let _ = ch;
        unsupported("channel enable query")
    }

    async fn set_channel_enabled(&self, ch: usize, on: bool) -> Result<()> {
        let _ = (ch, on);
        unsupported("channel enable")
    }

    /// Input impedance in ohms.
    async fn get_input_impedance(&self, ch: usize) -> Result<f64> {
        let _ = ch;
        unsupported("input impedance query")
    }

    async fn set_input_impedance(&self, ch: usize, ohms: f64) -> Result<()> {
        let _ = (ch, ohms);
        unsupported("input impedance")
    }

    /// Configure a channel's vertical system in one call.
    ///
    /// With `auto_probe` the probe attenuation is left to the instrument's
    /// probe sensing and `probe` is ignored.
    #[allow(clippy::too_many_arguments)]
    async fn configure_channel(
        &self,
        ch: usize,
        range: f64,
        offset: f64,
        coupling: VerticalCoupling,
        auto_probe: bool,
        probe: f64,
        enabled: bool,
    ) -> Result<()> {
        if !auto_probe {
            self.set_probe_attenuation(ch, probe).await?;
        }
        self.set_vertical_range(ch, range).await?;
        self.set_vertical_offset(ch, offset).await?;
        self.set_vertical_coupling(ch, coupling).await?;
        self.set_channel_enabled(ch, enabled).await
    }

    async fn get_acquisition_type(&self) -> Result<AcquisitionType> {
        unsupported("acquisition type query")
    }

    async fn set_acquisition_type(&self, acquisition: AcquisitionType) -> Result<()> {
        let _ = acquisition;
        unsupported("acquisition type")
    }

    /// Number of points in an acquired record.
    async fn get_record_length(&self) -> Result<u64> {
        unsupported("record length query")
    }

    /// Sample rate in samples per second.
    async fn get_sample_rate(&self) -> Result<f64> {
        unsupported("sample rate query")
    }

    /// Horizontal time span of one record.
    async fn get_time_per_record(&self) -> Result<Duration> {
        unsupported("time per record query")
    }

    async fn set_time_per_record(&self, time: Duration) -> Result<()> {
        let _ = time;
        unsupported("time per record")
    }

    /// Record start time relative to the trigger, in seconds (negative for
    /// pre-trigger).
    async fn get_acquisition_start_time(&self) -> Result<f64> {
        unsupported("acquisition start time query")
    }

    async fn set_acquisition_start_time(&self, seconds: f64) -> Result<()> {
        let _ = seconds;
        unsupported("acquisition start time")
    }

    async fn get_trigger_type(&self) -> Result<TriggerType> {
        unsupported("trigger type query")
    }

    async fn set_trigger_type(&self, trigger: TriggerType) -> Result<()> {
        let _ = trigger;
        unsupported("trigger type")
    }

    /// Trigger level in volts.
    async fn get_trigger_level(&self) -> Result<f64> {
        unsupported("trigger level query")
    }

    async fn set_trigger_level(&self, volts: f64) -> Result<()> {
        let _ = volts;
        unsupported("trigger level")
    }

    async fn get_trigger_holdoff(&self) -> Result<Duration> {
        unsupported("trigger holdoff query")
    }

    async fn set_trigger_holdoff(&self, holdoff: Duration) -> Result<()> {
        let _ = holdoff;
        unsupported("trigger holdoff")
    }

    /// Fetch an automatic measurement of the last acquisition on a channel.
    async fn fetch_waveform_measurement(
        &self,
        ch: usize,
        measurement: WaveformMeasurement,
    ) -> Result<f64> {
        let _ = (ch, measurement);
        unsupported("waveform measurement")
    }
}

/// Digital multimeter operations.
#[async_trait]
pub trait Dmm: Instrument {
    async fn get_measurement_function(&self) -> Result<MeasurementFunction> {
        unsupported("measurement function query")
    }

    async fn set_measurement_function(&self, function: MeasurementFunction) -> Result<()> {
        let _ = function;
        unsupported("measurement function")
    }

    /// Auto-range state and the current range for the selected function.
    async fn get_range(&self) -> Result<(AutoRange, f64)> {
        unsupported("range query")
    }

    /// Set the range. With [`AutoRange::On`] the value is ignored; with
    /// [`AutoRange::Off`] it is the manual upper bound of the expected
    /// reading.
    async fn set_range(&self, auto: AutoRange, range: f64) -> Result<()> {
        let _ = (auto, range);
        unsupported("range")
    }

    /// Trigger a measurement and return the reading, waiting at most
    /// `max_time` for it.
    async fn read_measurement(&self, max_time: Duration) -> Result<f64> {
        let _ = max_time;
        unsupported("read measurement")
    }

    async fn get_selected_terminals(&self) -> Result<Terminals> {
        unsupported("terminals query")
    }
}

/// Whether a path between two switch channels can be made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathCapability {
    /// The path can be connected.
    Available,
    /// The path is already connected.
    Exists,
    /// The topology has no such path (e.g. two rows of a matrix).
    Unsupported,
    /// Both endpoints are source channels.
    SourceConflict,
}

impl fmt::Display for PathCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PathCapability::Available => "path available",
            PathCapability::Exists => "path exists",
            PathCapability::Unsupported => "path unsupported",
            PathCapability::SourceConflict => "source conflict",
        };
        write!(f, "{s}")
    }
}

/// Switch matrix operations.
///
/// Endpoints are channel names or aliases. Connections the topology cannot
/// make fail with [`Error::InvalidTopology`] before anything is sent.
#[async_trait]
pub trait Switch: Instrument {
    /// Human-readable topology, e.g. `4x8 matrix`.
    fn topology(&self) -> Result<String> {
        unsupported("topology")
    }

    /// Number of conductors switched per channel.
    fn wire_mode(&self, ch: usize) -> Result<u32> {
        let _ = ch;
        unsupported("wire mode")
    }

    fn is_source_channel(&self, ch: usize) -> Result<bool> {
        let _ = ch;
        unsupported("source channel query")
    }

    /// Mark a channel as a source; two sources may never be connected.
    fn set_source_channel(&self, ch: usize, source: bool) -> Result<()> {
        let _ = (ch, source);
        unsupported("source channel")
    }

    /// Assign virtual names (channel name to alias).
    fn set_virtual_names(&self, names: &HashMap<String, String>) -> Result<()> {
        self.core().set_aliases(names)
    }

    async fn can_connect(&self, a: &str, b: &str) -> Result<PathCapability> {
        let _ = (a, b);
        unsupported("can connect")
    }

    async fn connect(&self, a: &str, b: &str) -> Result<()> {
        let _ = (a, b);
        unsupported("connect")
    }

    async fn disconnect(&self, a: &str, b: &str) -> Result<()> {
        let _ = (a, b);
        unsupported("disconnect")
    }

    async fn disconnect_all(&self) -> Result<()> {
        unsupported("disconnect all")
    }

    async fn is_connected(&self, a: &str, b: &str) -> Result<bool> {
        let _ = (a, b);
        unsupported("connection query")
    }

    /// Wait until relays have settled, at most `max_time`.
    async fn wait_for_debounce(&self, max_time: Duration) -> Result<()> {
        let _ = max_time;
        unsupported("wait for debounce")
    }
}
