//! DS345 command builders and response parsers.
//!
//! The DS345 predates SCPI. Headers are four letters, enumerated settings
//! are small integer codes, and amplitudes carry a unit suffix (`VP` volts
//! peak-to-peak, `VR` volts RMS, `DB` dBm). All functions here are pure;
//! the driver sends what they build and feeds responses back into them.
//!
//! Based on the DS345 operating manual, "Programming" chapter.

use benchlib_core::error::{Error, Result};
use benchlib_core::parse;
use benchlib_core::{OperationMode, TriggerSource, Waveform};

// ---------------------------------------------------------------
// Code tables
// ---------------------------------------------------------------

/// `FUNC` code for a sine wave.
const FUNC_SINE: i64 = 0;
/// `FUNC` code for a square wave.
const FUNC_SQUARE: i64 = 1;
/// `FUNC` code for a triangle wave.
const FUNC_TRIANGLE: i64 = 2;
/// `FUNC` code for a positive ramp.
const FUNC_RAMP: i64 = 3;

/// `TSRC` code for a single (software) trigger.
const TSRC_SINGLE: i64 = 0;
/// `TSRC` code for the internal trigger rate generator.
const TSRC_INTERNAL: i64 = 1;
/// `TSRC` code for the external input, rising edge.
const TSRC_EXTERNAL_RISING: i64 = 2;
/// `TSRC` code for the external input, falling edge.
const TSRC_EXTERNAL_FALLING: i64 = 3;

/// `MTYP` code for a linear sweep.
const MTYP_LINEAR_SWEEP: i64 = 0;
/// `MTYP` code for a logarithmic sweep.
const MTYP_LOG_SWEEP: i64 = 1;
/// `MTYP` code for burst.
const MTYP_BURST: i64 = 5;

/// Highest output frequency for sine and square, in hertz.
pub const MAX_FREQUENCY: f64 = 30.2e6;
/// Largest programmable burst count.
pub const MAX_BURST_COUNT: u32 = 30_000;
/// Internal trigger rate limits, in hertz.
pub const MIN_TRIGGER_RATE: f64 = 0.001;
pub const MAX_TRIGGER_RATE: f64 = 10_000.0;

// ---------------------------------------------------------------
// Command builders
// ---------------------------------------------------------------

/// Build a "set function" command (`FUNC n`).
///
/// The DS345 has no DC function and only a rising ramp.
pub fn cmd_set_function(waveform: Waveform) -> Result<String> {
    let code = match waveform {
        Waveform::Sine => FUNC_SINE,
        Waveform::Square => FUNC_SQUARE,
        Waveform::Triangle => FUNC_TRIANGLE,
        Waveform::RampUp => FUNC_RAMP,
        Waveform::RampDown | Waveform::Dc => {
            return Err(Error::not_supported(format!("{waveform} waveform")));
        }
    };
    Ok(format!("FUNC {code}"))
}

/// Build a "set amplitude" command in volts peak-to-peak (`AMPL xVP`).
pub fn cmd_set_amplitude(vpp: f64) -> String {
    format!("AMPL {vpp}VP")
}

/// Build a "set trigger source" command (`TSRC n`).
pub fn cmd_set_trigger_source(source: TriggerSource) -> String {
    let code = match source {
        TriggerSource::Software => TSRC_SINGLE,
        TriggerSource::Internal => TSRC_INTERNAL,
        TriggerSource::External => TSRC_EXTERNAL_RISING,
    };
    format!("TSRC {code}")
}

/// Build the commands that select an operation mode.
///
/// Continuous output is modulation off. Burst and sweep select the
/// modulation type first, then enable it.
pub fn cmd_set_operation_mode(mode: OperationMode) -> String {
    match mode {
        OperationMode::Continuous => "MENA 0".to_string(),
        OperationMode::Burst => format!("MTYP {MTYP_BURST};MENA 1"),
        OperationMode::Sweep => format!("MTYP {MTYP_LINEAR_SWEEP};MENA 1"),
    }
}

// ---------------------------------------------------------------
// Response parsers
// ---------------------------------------------------------------

/// Parse a `FUNC?` response.
pub fn parse_function(response: &str) -> Result<Waveform> {
    match parse::parse_i64(response)? {
        FUNC_SINE => Ok(Waveform::Sine),
        FUNC_SQUARE => Ok(Waveform::Square),
        FUNC_TRIANGLE => Ok(Waveform::Triangle),
        FUNC_RAMP => Ok(Waveform::RampUp),
        _ => Err(Error::malformed(response.trim(), "noise and arbitrary are not standard waveforms")),
    }
}

/// Parse an `AMPL?` response such as `0.50VP` into volts peak-to-peak.
///
/// Amplitudes reported in other units mean the front panel was switched
/// away from Vpp; those are reported as malformed rather than converted,
/// since the conversion depends on the waveform.
pub fn parse_amplitude(response: &str) -> Result<f64> {
    let s = response.trim();
    let upper = s.to_ascii_uppercase();
    match upper.strip_suffix("VP") {
        Some(number) => parse::parse_f64(number).map_err(|_| Error::malformed(s, "expected <number>VP")),
        None => Err(Error::malformed(s, "amplitude not in volts peak-to-peak")),
    }
}

/// Parse a `TSRC?` response.
pub fn parse_trigger_source(response: &str) -> Result<TriggerSource> {
    match parse::parse_i64(response)? {
        TSRC_SINGLE => Ok(TriggerSource::Software),
        TSRC_INTERNAL => Ok(TriggerSource::Internal),
        TSRC_EXTERNAL_RISING | TSRC_EXTERNAL_FALLING => Ok(TriggerSource::External),
        _ => Err(Error::malformed(response.trim(), "line trigger is not modeled")),
    }
}

/// Decode the operation mode from `MENA?` and, when enabled, `MTYP?`.
pub fn parse_operation_mode(enabled: bool, modulation_type: Option<&str>) -> Result<OperationMode> {
    if !enabled {
        return Ok(OperationMode::Continuous);
    }
    let Some(response) = modulation_type else {
        return Err(Error::malformed("", "modulation type missing"));
    };
    match parse::parse_i64(response)? {
        MTYP_LINEAR_SWEEP | MTYP_LOG_SWEEP => Ok(OperationMode::Sweep),
        MTYP_BURST => Ok(OperationMode::Burst),
        _ => Err(Error::malformed(
            response.trim(),
            "AM, FM and phase modulation are not operation modes",
        )),
    }
}
