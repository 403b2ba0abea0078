//! Channel naming and typed channel views.
//!
//! Every driver owns a [`ChannelMap`]: the ordered list of channel names
//! fixed at construction, plus an optional alias ("virtual name") for each
//! channel. Operations address channels by index; names and aliases are
//! resolved to an index once, up front, so an unknown name never reaches
//! the wire.
//!
//! A [`Channel`] is a thin view of one driver and one channel index. Its
//! method set depends on the capability trait it is viewed through, so a
//! switch channel has no `set_frequency`.

use std::collections::HashMap;
use std::time::Duration;

use crate::capability::{DcPower, FunctionGenerator, Oscilloscope, Switch};
use crate::error::{Error, Result};
use crate::types::{
    CurrentLimitBehavior, OperationMode, TriggerSource, VerticalCoupling, Waveform,
    WaveformMeasurement,
};

/// Ordered channel names with optional aliases.
#[derive(Debug, Clone, Default)]
pub struct ChannelMap {
    names: Vec<String>,
    aliases: HashMap<String, usize>,
}

impl ChannelMap {
    /// Create a map from channel names in index order.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ChannelMap {
            names: names.into_iter().map(Into::into).collect(),
            aliases: HashMap::new(),
        }
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the instrument has no channels.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Channel names in index order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// The name of the channel at `index`.
    pub fn name(&self, index: usize) -> Result<&str> {
        self.names
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| Error::UnknownChannel(format!("index {index}")))
    }

    /// The alias assigned to the channel at `index`, if any.
    pub fn alias(&self, index: usize) -> Option<&str> {
        self.aliases
            .iter()
            .find(|(_, i)| **i == index)
            .map(|(a, _)| a.as_str())
    }

    /// Fail with [`Error::UnknownChannel`] unless `index` is valid.
    pub fn check_index(&self, index: usize) -> Result<()> {
        if index < self.names.len() {
            Ok(())
        } else {
            Err(Error::UnknownChannel(format!(
                "index {index} (instrument has {} channels)",
                self.names.len()
            )))
        }
    }

    /// Resolve a channel name or alias to its index.
    ///
    /// Matching is exact and case-sensitive; names are tried before aliases.
    pub fn resolve(&self, name: &str) -> Result<usize> {
        if let Some(i) = self.names.iter().position(|n| n == name) {
            return Ok(i);
        }
        self.aliases
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownChannel(name.to_string()))
    }

    /// Replace all aliases.
    ///
    /// `map` goes from channel name to alias. The whole map is validated
    /// before anything changes: every key must be a channel name, no two
    /// channels may share an alias, and an alias may not be another
    /// channel's name.
    pub fn set_aliases(&mut self, map: &HashMap<String, String>) -> Result<()> {
        let mut aliases = HashMap::with_capacity(map.len());
        for (name, alias) in map {
            let index = self
                .names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| Error::UnknownChannel(name.clone()))?;
            if alias.is_empty() {
                return Err(Error::InvalidParameter(format!(
                    "empty alias for channel {name}"
                )));
            }
            if let Some(other) = self.names.iter().position(|n| n == alias) {
                if other != index {
                    return Err(Error::InvalidParameter(format!(
                        "alias {alias:?} shadows channel {alias}"
                    )));
                }
            }
            if aliases.insert(alias.clone(), index).is_some() {
                return Err(Error::InvalidParameter(format!(
                    "alias {alias:?} assigned to more than one channel"
                )));
            }
        }
        self.aliases = aliases;
        Ok(())
    }
}

/// A view of one channel of one driver.
///
/// Obtain one through the `channel()` helpers on the capability trait
/// objects, e.g. `fgen.channel("CH1")?` with `fgen: &dyn FunctionGenerator`.
pub struct Channel<'a, D: ?Sized + 'a> {
    driver: &'a D,
    index: usize,
}

impl<'a, D: ?Sized + 'a> Clone for Channel<'a, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, D: ?Sized + 'a> Copy for Channel<'a, D> {}

impl<'a, D: ?Sized + 'a> Channel<'a, D> {
    /// The channel index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The driver this channel belongs to.
    pub fn driver(&self) -> &'a D {
        self.driver
    }
}

macro_rules! channel_lookup {
    ($tr:ident) => {
        impl<'a> dyn $tr + 'a {
            /// Look up a channel by name or alias.
            pub fn channel(&'a self, name: &str) -> Result<Channel<'a, dyn $tr + 'a>> {
                let index = self.core().resolve_channel(name)?;
                Ok(Channel {
                    driver: self,
                    index,
                })
            }

            /// Look up a channel by index.
            pub fn channel_by_index(&'a self, index: usize) -> Result<Channel<'a, dyn $tr + 'a>> {
                self.core().check_index(index)?;
                Ok(Channel {
                    driver: self,
                    index,
                })
            }
        }

        impl<'a> Channel<'a, dyn $tr + 'a> {
            /// The channel's name.
            pub fn name(&self) -> String {
                self.driver.core().channel_name(self.index).unwrap_or_default()
            }
        }
    };
}

channel_lookup!(FunctionGenerator);
channel_lookup!(DcPower);
channel_lookup!(Oscilloscope);
channel_lookup!(Switch);

impl<'a> Channel<'a, dyn FunctionGenerator + 'a> {
    pub async fn waveform(&self) -> Result<Waveform> {
        self.driver.get_waveform(self.index).await
    }

    pub async fn set_waveform(&self, waveform: Waveform) -> Result<()> {
        self.driver.set_waveform(self.index, waveform).await
    }

    pub async fn frequency(&self) -> Result<f64> {
        self.driver.get_frequency(self.index).await
    }

    pub async fn set_frequency(&self, hz: f64) -> Result<()> {
        self.driver.set_frequency(self.index, hz).await
    }

    pub async fn amplitude(&self) -> Result<f64> {
        self.driver.get_amplitude(self.index).await
    }

    pub async fn set_amplitude(&self, vpp: f64) -> Result<()> {
        self.driver.set_amplitude(self.index, vpp).await
    }

    pub async fn dc_offset(&self) -> Result<f64> {
        self.driver.get_dc_offset(self.index).await
    }

    pub async fn set_dc_offset(&self, volts: f64) -> Result<()> {
        self.driver.set_dc_offset(self.index, volts).await
    }

    pub async fn output_enabled(&self) -> Result<bool> {
        self.driver.get_output_enabled(self.index).await
    }

    pub async fn set_output_enabled(&self, on: bool) -> Result<()> {
        self.driver.set_output_enabled(self.index, on).await
    }

    pub async fn burst_count(&self) -> Result<u32> {
        self.driver.get_burst_count(self.index).await
    }

    pub async fn set_burst_count(&self, cycles: u32) -> Result<()> {
        self.driver.set_burst_count(self.index, cycles).await
    }

    pub async fn trigger_source(&self) -> Result<TriggerSource> {
        self.driver.get_trigger_source(self.index).await
    }

    pub async fn set_trigger_source(&self, source: TriggerSource) -> Result<()> {
        self.driver.set_trigger_source(self.index, source).await
    }

    pub async fn operation_mode(&self) -> Result<OperationMode> {
        self.driver.get_operation_mode(self.index).await
    }

    pub async fn set_operation_mode(&self, mode: OperationMode) -> Result<()> {
        self.driver.set_operation_mode(self.index, mode).await
    }

    /// Configure shape, amplitude, offset, frequency and start phase in one call.
    pub async fn configure_standard_waveform(
        &self,
        waveform: Waveform,
        amplitude: f64,
        offset: f64,
        frequency: f64,
        phase: f64,
    ) -> Result<()> {
        self.driver
            .configure_standard_waveform(self.index, waveform, amplitude, offset, frequency, phase)
            .await
    }
}

impl<'a> Channel<'a, dyn DcPower + 'a> {
    pub async fn voltage_level(&self) -> Result<f64> {
        self.driver.get_voltage_level(self.index).await
    }

    pub async fn set_voltage_level(&self, volts: f64) -> Result<()> {
        self.driver.set_voltage_level(self.index, volts).await
    }

    pub async fn current_limit(&self) -> Result<f64> {
        self.driver.get_current_limit(self.index).await
    }

    pub async fn set_current_limit(&self, amps: f64) -> Result<()> {
        self.driver.set_current_limit(self.index, amps).await
    }

    pub async fn current_limit_behavior(&self) -> Result<CurrentLimitBehavior> {
        self.driver.get_current_limit_behavior(self.index).await
    }

    pub async fn ovp_enabled(&self) -> Result<bool> {
        self.driver.get_ovp_enabled(self.index).await
    }

    pub async fn ovp_limit(&self) -> Result<f64> {
        self.driver.get_ovp_limit(self.index).await
    }

    pub async fn output_enabled(&self) -> Result<bool> {
        self.driver.get_output_enabled(self.index).await
    }

    pub async fn set_output_enabled(&self, on: bool) -> Result<()> {
        self.driver.set_output_enabled(self.index, on).await
    }

    pub async fn measure_voltage(&self) -> Result<f64> {
        self.driver.measure_voltage(self.index).await
    }

    pub async fn measure_current(&self) -> Result<f64> {
        self.driver.measure_current(self.index).await
    }

    pub async fn configure_current_limit(
        &self,
        behavior: CurrentLimitBehavior,
        amps: f64,
    ) -> Result<()> {
        self.driver
            .configure_current_limit(self.index, behavior, amps)
            .await
    }

    pub async fn configure_ovp(&self, enabled: bool, volts: f64) -> Result<()> {
        self.driver.configure_ovp(self.index, enabled, volts).await
    }
}

impl<'a> Channel<'a, dyn Oscilloscope + 'a> {
    pub async fn vertical_range(&self) -> Result<f64> {
        self.driver.get_vertical_range(self.index).await
    }

    pub async fn set_vertical_range(&self, volts: f64) -> Result<()> {
        self.driver.set_vertical_range(self.index, volts).await
    }

    pub async fn vertical_offset(&self) -> Result<f64> {
        self.driver.get_vertical_offset(self.index).await
    }

    pub async fn set_vertical_offset(&self, volts: f64) -> Result<()> {
        self.driver.set_vertical_offset(self.index, volts).await
    }

    pub async fn vertical_coupling(&self) -> Result<VerticalCoupling> {
        self.driver.get_vertical_coupling(self.index).await
    }

    pub async fn set_vertical_coupling(&self, coupling: VerticalCoupling) -> Result<()> {
        self.driver.set_vertical_coupling(self.index, coupling).await
    }

    pub async fn probe_attenuation(&self) -> Result<f64> {
        self.driver.get_probe_attenuation(self.index).await
    }

    pub async fn set_probe_attenuation(&self, ratio: f64) -> Result<()> {
        self.driver.set_probe_attenuation(self.index, ratio).await
    }

    pub async fn channel_enabled(&self) -> Result<bool> {
        self.driver.get_channel_enabled(self.index).await
    }

    pub async fn set_channel_enabled(&self, on: bool) -> Result<()> {
        self.driver.set_channel_enabled(self.index, on).await
    }

    pub async fn input_impedance(&self) -> Result<f64> {
        self.driver.get_input_impedance(self.index).await
    }

    pub async fn set_input_impedance(&self, ohms: f64) -> Result<()> {
        self.driver.set_input_impedance(self.index, ohms).await
    }

    pub async fn configure(
        &self,
        range: f64,
        offset: f64,
        coupling: VerticalCoupling,
        auto_probe: bool,
        probe: f64,
        enabled: bool,
    ) -> Result<()> {
        self.driver
            .configure_channel(self.index, range, offset, coupling, auto_probe, probe, enabled)
            .await
    }

    pub async fn fetch_waveform_measurement(&self, measurement: WaveformMeasurement) -> Result<f64> {
        self.driver
            .fetch_waveform_measurement(self.index, measurement)
            .await
    }
}

impl<'a> Channel<'a, dyn Switch + 'a> {
    /// Whether this channel is marked as a source channel.
    pub fn is_source_channel(&self) -> Result<bool> {
        self.driver.is_source_channel(self.index)
    }

    /// Mark or unmark this channel as a source channel.
    pub fn set_source_channel(&self, source: bool) -> Result<()> {
        self.driver.set_source_channel(self.index, source)
    }

    /// Number of conductors switched per channel.
    pub fn wire_mode(&self) -> Result<u32> {
        self.driver.wire_mode(self.index)
    }

    /// Connect this channel to another one, by name or alias.
    pub async fn connect_to(&self, other: &str) -> Result<()> {
        let name = self.driver.core().channel_name(self.index)?;
        self.driver.connect(&name, other).await
    }

    /// Break the connection between this channel and another one.
    pub async fn disconnect_from(&self, other: &str) -> Result<()> {
        let name = self.driver.core().channel_name(self.index)?;
        self.driver.disconnect(&name, other).await
    }

    /// Wait for this channel's relays to settle.
    pub async fn wait_for_debounce(&self, max_time: Duration) -> Result<()> {
        self.driver.wait_for_debounce(max_time).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e3631a_map() -> ChannelMap {
        ChannelMap::new(["P6V", "P25V", "N25V"])
    }

    #[test]
    fn resolve_names() {
        let map = e3631a_map();
        assert_eq!(map.len(), 3);
        assert_eq!(map.resolve("P6V").unwrap(), 0);
        assert_eq!(map.resolve("N25V").unwrap(), 2);
    }

    #[test]
    fn resolve_is_case_sensitive() {
        let map = e3631a_map();
        assert!(matches!(map.resolve("p6v"), Err(Error::UnknownChannel(_))));
    }

    #[test]
    fn resolve_aliases_idempotent() {
        let mut map = ChannelMap::new(["Row1", "Row2", "Col1", "Col2"]);
        let aliases = HashMap::from([
            ("Row1".to_string(), "dmmblack".to_string()),
            ("Col2".to_string(), "pin2".to_string()),
        ]);
        map.set_aliases(&aliases).unwrap();

        let first = map.resolve("pin2").unwrap();
        let second = map.resolve("pin2").unwrap();
        assert_eq!(first, 3);
        assert_eq!(first, second);
        assert_eq!(map.resolve(map.name(first).unwrap()).unwrap(), first);
        assert_eq!(map.alias(0), Some("dmmblack"));
        assert_eq!(map.alias(1), None);
    }

    #[test]
    fn aliases_must_be_injective() {
        let mut map = ChannelMap::new(["Row1", "Row2"]);
        let aliases = HashMap::from([
            ("Row1".to_string(), "probe".to_string()),
            ("Row2".to_string(), "probe".to_string()),
        ]);
        let err = map.set_aliases(&aliases).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        assert!(map.resolve("probe").is_err());
    }

    #[test]
    fn alias_cannot_shadow_another_channel() {
        let mut map = ChannelMap::new(["Row1", "Row2"]);
        let aliases = HashMap::from([("Row1".to_string(), "Row2".to_string())]);
        assert!(matches!(
            map.set_aliases(&aliases),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn alias_for_unknown_channel() {
        let mut map = ChannelMap::new(["CH1"]);
        let aliases = HashMap::from([("CH9".to_string(), "x".to_string())]);
        assert!(matches!(
            map.set_aliases(&aliases),
            Err(Error::UnknownChannel(_))
        ));
    }

    #[test]
    fn set_aliases_replaces_previous() {
        let mut map = ChannelMap::new(["CH1", "CH2"]);
        map.set_aliases(&HashMap::from([("CH1".to_string(), "a".to_string())]))
            .unwrap();
        map.set_aliases(&HashMap::from([("CH2".to_string(), "b".to_string())]))
            .unwrap();
        assert!(map.resolve("a").is_err());
        assert_eq!(map.resolve("b").unwrap(), 1);
    }

    #[test]
    fn check_index_bounds() {
        let map = e3631a_map();
        assert!(map.check_index(2).is_ok());
        assert!(matches!(map.check_index(3), Err(Error::UnknownChannel(_))));
        assert_eq!(map.name(1).unwrap(), "P25V");
        assert!(map.name(7).is_err());
    }
}
