//! Shared types used across the benchlib API.
//!
//! These are the instrument-model-independent values that flow through the
//! capability traits: waveform shapes, trigger sources, couplings, DMM
//! functions and so on. Each driver translates them to and from its own
//! command dialect.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Error returned when a string cannot be parsed into one of the shared enums.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseValueError {
    kind: &'static str,
    value: String,
}

impl ParseValueError {
    fn new(kind: &'static str, value: &str) -> Self {
        ParseValueError {
            kind,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for ParseValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for ParseValueError {}

/// Capability group an instrument driver belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityGroup {
    FunctionGenerator,
    DcPower,
    Oscilloscope,
    Dmm,
    Switch,
}

impl fmt::Display for CapabilityGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CapabilityGroup::FunctionGenerator => "function generator",
            CapabilityGroup::DcPower => "DC power supply",
            CapabilityGroup::Oscilloscope => "oscilloscope",
            CapabilityGroup::Dmm => "digital multimeter",
            CapabilityGroup::Switch => "switch",
        };
        write!(f, "{s}")
    }
}

impl FromStr for CapabilityGroup {
    type Err = ParseValueError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fgen" | "function generator" => Ok(CapabilityGroup::FunctionGenerator),
            "dcpwr" | "dc power supply" => Ok(CapabilityGroup::DcPower),
            "scope" | "oscilloscope" => Ok(CapabilityGroup::Oscilloscope),
            "dmm" | "digital multimeter" => Ok(CapabilityGroup::Dmm),
            "swtch" | "switch" => Ok(CapabilityGroup::Switch),
            _ => Err(ParseValueError::new("capability group", s)),
        }
    }
}

/// Standard function generator waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Waveform {
    Sine,
    Square,
    Triangle,
    RampUp,
    RampDown,
    Dc,
}

impl fmt::Display for Waveform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Waveform::Sine => "Sine",
            Waveform::Square => "Square",
            Waveform::Triangle => "Triangle",
            Waveform::RampUp => "Ramp Up",
            Waveform::RampDown => "Ramp Down",
            Waveform::Dc => "DC",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Waveform {
    type Err = ParseValueError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sine" | "sin" => Ok(Waveform::Sine),
            "square" | "squ" => Ok(Waveform::Square),
            "triangle" | "tri" => Ok(Waveform::Triangle),
            "ramp up" | "rampup" | "ramp" => Ok(Waveform::RampUp),
            "ramp down" | "rampdown" => Ok(Waveform::RampDown),
            "dc" => Ok(Waveform::Dc),
            _ => Err(ParseValueError::new("waveform", s)),
        }
    }
}

/// Source of the trigger that starts a burst or sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerSource {
    /// Internally timed, see the generator's internal trigger rate.
    Internal,
    /// Rear-panel trigger input.
    External,
    /// Bus (software) trigger.
    Software,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerSource::Internal => "Internal",
            TriggerSource::External => "External",
            TriggerSource::Software => "Software",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TriggerSource {
    type Err = ParseValueError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "internal" | "int" | "imm" | "immediate" => Ok(TriggerSource::Internal),
            "external" | "ext" => Ok(TriggerSource::External),
            "software" | "bus" | "sw" => Ok(TriggerSource::Software),
            _ => Err(ParseValueError::new("trigger source", s)),
        }
    }
}

/// Function generator operation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperationMode {
    #[default]
    Continuous,
    Burst,
    Sweep,
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationMode::Continuous => "Continuous",
            OperationMode::Burst => "Burst",
            OperationMode::Sweep => "Sweep",
        };
        write!(f, "{s}")
    }
}

impl FromStr for OperationMode {
    type Err = ParseValueError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "continuous" | "cont" => Ok(OperationMode::Continuous),
            "burst" => Ok(OperationMode::Burst),
            "sweep" => Ok(OperationMode::Sweep),
            _ => Err(ParseValueError::new("operation mode", s)),
        }
    }
}

/// What a DC supply does when the output current reaches its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CurrentLimitBehavior {
    /// Disable the output (over-current protection).
    Trip,
    /// Hold the current at the limit (constant-current mode).
    Regulate,
}

impl fmt::Display for CurrentLimitBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CurrentLimitBehavior::Trip => "Trip",
            CurrentLimitBehavior::Regulate => "Regulate",
        };
        write!(f, "{s}")
    }
}

impl FromStr for CurrentLimitBehavior {
    type Err = ParseValueError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trip" => Ok(CurrentLimitBehavior::Trip),
            "regulate" => Ok(CurrentLimitBehavior::Regulate),
            _ => Err(ParseValueError::new("current limit behavior", s)),
        }
    }
}

/// Oscilloscope input coupling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerticalCoupling {
    Ac,
    Dc,
    Gnd,
}

impl fmt::Display for VerticalCoupling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerticalCoupling::Ac => "AC",
            VerticalCoupling::Dc => "DC",
            VerticalCoupling::Gnd => "GND",
        };
        write!(f, "{s}")
    }
}

impl FromStr for VerticalCoupling {
    type Err = ParseValueError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "AC" => Ok(VerticalCoupling::Ac),
            "DC" => Ok(VerticalCoupling::Dc),
            "GND" | "GROUND" => Ok(VerticalCoupling::Gnd),
            _ => Err(ParseValueError::new("vertical coupling", s)),
        }
    }
}

/// Oscilloscope acquisition type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcquisitionType {
    Normal,
    PeakDetect,
    HighResolution,
    Average,
}

impl fmt::Display for AcquisitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AcquisitionType::Normal => "Normal",
            AcquisitionType::PeakDetect => "Peak Detect",
            AcquisitionType::HighResolution => "High Resolution",
            AcquisitionType::Average => "Average",
        };
        write!(f, "{s}")
    }
}

impl FromStr for AcquisitionType {
    type Err = ParseValueError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "normal" | "norm" => Ok(AcquisitionType::Normal),
            "peak detect" | "peak" => Ok(AcquisitionType::PeakDetect),
            "high resolution" | "hres" => Ok(AcquisitionType::HighResolution),
            "average" | "aver" => Ok(AcquisitionType::Average),
            _ => Err(ParseValueError::new("acquisition type", s)),
        }
    }
}

/// Oscilloscope trigger type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerType {
    Edge,
    Width,
    Tv,
    Immediate,
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerType::Edge => "Edge",
            TriggerType::Width => "Width",
            TriggerType::Tv => "TV",
            TriggerType::Immediate => "Immediate",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TriggerType {
    type Err = ParseValueError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "edge" => Ok(TriggerType::Edge),
            "width" | "glitch" | "glit" => Ok(TriggerType::Width),
            "tv" => Ok(TriggerType::Tv),
            "immediate" | "imm" => Ok(TriggerType::Immediate),
            _ => Err(ParseValueError::new("trigger type", s)),
        }
    }
}

/// Automatic waveform measurement an oscilloscope can fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaveformMeasurement {
    VoltagePeakToPeak,
    VoltageMax,
    VoltageMin,
    VoltageRms,
    Frequency,
    Period,
    RiseTime,
    FallTime,
}

impl fmt::Display for WaveformMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WaveformMeasurement::VoltagePeakToPeak => "Vpp",
            WaveformMeasurement::VoltageMax => "Vmax",
            WaveformMeasurement::VoltageMin => "Vmin",
            WaveformMeasurement::VoltageRms => "Vrms",
            WaveformMeasurement::Frequency => "Frequency",
            WaveformMeasurement::Period => "Period",
            WaveformMeasurement::RiseTime => "Rise Time",
            WaveformMeasurement::FallTime => "Fall Time",
        };
        write!(f, "{s}")
    }
}

impl FromStr for WaveformMeasurement {
    type Err = ParseValueError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vpp" => Ok(WaveformMeasurement::VoltagePeakToPeak),
            "vmax" => Ok(WaveformMeasurement::VoltageMax),
            "vmin" => Ok(WaveformMeasurement::VoltageMin),
            "vrms" => Ok(WaveformMeasurement::VoltageRms),
            "frequency" | "freq" => Ok(WaveformMeasurement::Frequency),
            "period" => Ok(WaveformMeasurement::Period),
            "rise time" | "risetime" => Ok(WaveformMeasurement::RiseTime),
            "fall time" | "falltime" => Ok(WaveformMeasurement::FallTime),
            _ => Err(ParseValueError::new("waveform measurement", s)),
        }
    }
}

/// Digital multimeter measurement function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementFunction {
    DcVolts,
    AcVolts,
    DcCurrent,
    AcCurrent,
    TwoWireResistance,
    FourWireResistance,
    Frequency,
    Period,
}

impl fmt::Display for MeasurementFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MeasurementFunction::DcVolts => "DC Volts",
            MeasurementFunction::AcVolts => "AC Volts",
            MeasurementFunction::DcCurrent => "DC Current",
            MeasurementFunction::AcCurrent => "AC Current",
            MeasurementFunction::TwoWireResistance => "2-wire Resistance",
            MeasurementFunction::FourWireResistance => "4-wire Resistance",
            MeasurementFunction::Frequency => "Frequency",
            MeasurementFunction::Period => "Period",
        };
        write!(f, "{s}")
    }
}

impl FromStr for MeasurementFunction {
    type Err = ParseValueError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dc volts" | "vdc" => Ok(MeasurementFunction::DcVolts),
            "ac volts" | "vac" => Ok(MeasurementFunction::AcVolts),
            "dc current" | "adc" => Ok(MeasurementFunction::DcCurrent),
            "ac current" | "aac" => Ok(MeasurementFunction::AcCurrent),
            "2-wire resistance" | "ohms" => Ok(MeasurementFunction::TwoWireResistance),
            "4-wire resistance" | "fres" => Ok(MeasurementFunction::FourWireResistance),
            "frequency" | "freq" => Ok(MeasurementFunction::Frequency),
            "period" | "per" => Ok(MeasurementFunction::Period),
            _ => Err(ParseValueError::new("measurement function", s)),
        }
    }
}

/// DMM auto-range setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AutoRange {
    /// The meter picks the range; the range value is ignored.
    On,
    /// The range value is a manual upper bound.
    Off,
    /// Pick a range once, then hold it.
    Once,
}

impl fmt::Display for AutoRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AutoRange::On => "Auto On",
            AutoRange::Off => "Auto Off",
            AutoRange::Once => "Auto Once",
        };
        write!(f, "{s}")
    }
}

impl FromStr for AutoRange {
    type Err = ParseValueError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto on" | "on" => Ok(AutoRange::On),
            "auto off" | "off" => Ok(AutoRange::Off),
            "auto once" | "once" => Ok(AutoRange::Once),
            _ => Err(ParseValueError::new("auto range", s)),
        }
    }
}

/// Which input terminals a DMM is measuring on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Terminals {
    Front,
    Rear,
}

impl fmt::Display for Terminals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Terminals::Front => "Front",
            Terminals::Rear => "Rear",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Terminals {
    type Err = ParseValueError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "front" | "fron" => Ok(Terminals::Front),
            "rear" => Ok(Terminals::Rear),
            _ => Err(ParseValueError::new("terminals", s)),
        }
    }
}

/// Instrument identity as reported by `*IDN?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub firmware_revision: String,
}

impl Identity {
    /// Parse a comma-separated identity response.
    ///
    /// Fields beyond the fourth are folded into the firmware revision, since
    /// some instruments report it as a comma-separated list.
    pub fn parse(response: &str) -> Result<Self> {
        let fields: Vec<&str> = response.trim().splitn(4, ',').map(str::trim).collect();
        if fields.len() < 4 {
            return Err(Error::malformed(
                response.trim(),
                format!("identity needs 4 fields, got {}", fields.len()),
            ));
        }
        Ok(Identity {
            manufacturer: fields[0].to_string(),
            model: fields[1].to_string(),
            serial_number: fields[2].to_string(),
            firmware_revision: fields[3].to_string(),
        })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (S/N {}, FW {})",
            self.manufacturer, self.model, self.serial_number, self.firmware_revision
        )
    }
}
