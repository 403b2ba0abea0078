//! The `Instrument` trait and the state every driver shares.
//!
//! A driver is a thin translation layer: it owns an [`InstrumentCore`]
//! (dispatcher, channel map, cached identity, settings cache) and turns
//! capability calls into command strings. Everything that is the same for
//! every driver (identity, reset, clear, pass-through, channel lookup) lives
//! here as provided methods, so a leaf driver only implements [`Instrument::core`]
//! and the capability traits it supports.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::cache::{CachedValue, SettingsCache};
use crate::capability::{DcPower, Dmm, FunctionGenerator, Oscilloscope, Switch};
use crate::channel::ChannelMap;
use crate::dispatch::CommandDispatcher;
use crate::error::{Error, Result};
use crate::parse;
use crate::types::{CapabilityGroup, Identity};

/// Construction-time options shared by every driver.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Query `*IDN?` during construction.
    pub id_query: bool,
    /// Send `*RST` during construction.
    pub reset: bool,
    /// Send `*CLS` during construction.
    pub clear: bool,
    /// Channel aliases, channel name to alias.
    pub aliases: HashMap<String, String>,
}

impl Default for DriverOptions {
    fn default() -> Self {
        DriverOptions {
            id_query: true,
            reset: false,
            clear: false,
            aliases: HashMap::new(),
        }
    }
}

impl DriverOptions {
    pub fn id_query(mut self, on: bool) -> Self {
        self.id_query = on;
        self
    }

    pub fn reset(mut self, on: bool) -> Self {
        self.reset = on;
        self
    }

    pub fn clear(mut self, on: bool) -> Self {
        self.clear = on;
        self
    }

    /// Add one channel alias.
    pub fn alias(mut self, channel: &str, alias: &str) -> Self {
        self.aliases.insert(channel.to_string(), alias.to_string());
        self
    }
}

/// State shared by every driver: the dispatcher, channels, identity and
/// settings cache.
pub struct InstrumentCore {
    dispatcher: Arc<dyn CommandDispatcher>,
    group: CapabilityGroup,
    channels: RwLock<ChannelMap>,
    identity: OnceCell<Identity>,
    cache: SettingsCache,
    supported_models: &'static [&'static str],
}

impl InstrumentCore {
    /// Create the shared state for a driver.
    pub fn new(
        dispatcher: Arc<dyn CommandDispatcher>,
        group: CapabilityGroup,
        channels: ChannelMap,
    ) -> Self {
        InstrumentCore {
            dispatcher,
            group,
            channels: RwLock::new(channels),
            identity: OnceCell::new(),
            cache: SettingsCache::new(),
            supported_models: &[],
        }
    }

    /// Model numbers this driver is written for.
    ///
    /// When set, an identity that reports another model logs a warning
    /// during [`initialize`](Self::initialize). The driver is still usable.
    pub fn with_supported_models(mut self, models: &'static [&'static str]) -> Self {
        self.supported_models = models;
        self
    }

    fn channels(&self) -> RwLockReadGuard<'_, ChannelMap> {
        self.channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn channels_mut(&self) -> RwLockWriteGuard<'_, ChannelMap> {
        self.channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run the construction sequence: aliases, `*IDN?`, `*CLS`, `*RST`.
    ///
    /// Aliases are validated first, so a bad alias map fails before any I/O.
    pub async fn initialize(&self, options: &DriverOptions) -> Result<()> {
        if !options.aliases.is_empty() {
            self.set_aliases(&options.aliases)?;
        }
        if options.id_query {
            let id = self.identity().await?;
            if !self.supported_models.is_empty()
                && !self
                    .supported_models
                    .iter()
                    .any(|m| id.model.eq_ignore_ascii_case(m))
            {
                warn!(
                    model = %id.model,
                    expected = ?self.supported_models,
                    "instrument model not among those this driver supports"
                );
            }
        }
        if options.clear {
            self.clear().await?;
        }
        if options.reset {
            self.reset().await?;
        }
        Ok(())
    }

    /// The dispatcher commands go through.
    pub fn dispatcher(&self) -> &Arc<dyn CommandDispatcher> {
        &self.dispatcher
    }

    /// The capability group tag.
    pub fn capability_group(&self) -> CapabilityGroup {
        self.group
    }

    /// The settings cache.
    pub fn cache(&self) -> &SettingsCache {
        &self.cache
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels().len()
    }

    /// Channel names in index order.
    pub fn channel_names(&self) -> Vec<String> {
        self.channels().names().to_vec()
    }

    /// Name of the channel at `index`.
    pub fn channel_name(&self, index: usize) -> Result<String> {
        self.channels().name(index).map(str::to_string)
    }

    /// Resolve a channel name or alias to its index.
    pub fn resolve_channel(&self, name: &str) -> Result<usize> {
        self.channels().resolve(name)
    }

    /// Fail with [`Error::UnknownChannel`] unless `index` is valid.
    pub fn check_index(&self, index: usize) -> Result<()> {
        self.channels().check_index(index)
    }

    /// Replace all channel aliases.
    pub fn set_aliases(&self, map: &HashMap<String, String>) -> Result<()> {
        self.channels_mut().set_aliases(map)?;
        debug!(count = map.len(), "channel aliases set");
        Ok(())
    }

    /// The instrument identity, queried with `*IDN?` on first use.
    pub async fn identity(&self) -> Result<Identity> {
        let id = self
            .identity
            .get_or_try_init(|| async {
                let response = self.dispatcher.query("*IDN?").await?;
                let id = Identity::parse(&response)?;
                debug!(manufacturer = %id.manufacturer, model = %id.model, "identity");
                Ok::<_, Error>(id)
            })
            .await?;
        Ok(id.clone())
    }

    /// Send `*RST` and forget every cached setting.
    pub async fn reset(&self) -> Result<()> {
        self.dispatcher.command("*RST").await?;
        self.cache.clear();
        debug!("instrument reset");
        Ok(())
    }

    /// Send `*CLS`.
    pub async fn clear(&self) -> Result<()> {
        self.dispatcher.command("*CLS").await
    }

    /// Send a command and, once it succeeds, cache `value` under
    /// `(channel, setting)`.
    pub async fn set(
        &self,
        channel: usize,
        setting: &'static str,
        command: &str,
        value: impl Into<CachedValue> + Send,
    ) -> Result<()> {
        self.dispatcher.command(command).await?;
        self.cache.store(channel, setting, value);
        Ok(())
    }

    /// Query a number and cache it.
    pub async fn query_f64(&self, channel: usize, setting: &'static str, query: &str) -> Result<f64> {
        let response = self.dispatcher.query(query).await?;
        let value = parse::parse_f64(&response).map_err(|e| e.with_command(query))?;
        self.cache.store(channel, setting, value);
        Ok(value)
    }

    /// Query an integer and cache it.
    pub async fn query_i64(&self, channel: usize, setting: &'static str, query: &str) -> Result<i64> {
        let response = self.dispatcher.query(query).await?;
        let value = parse::parse_i64(&response).map_err(|e| e.with_command(query))?;
        self.cache.store(channel, setting, value);
        Ok(value)
    }

    /// Query a boolean and cache it.
    pub async fn query_bool(&self, channel: usize, setting: &'static str, query: &str) -> Result<bool> {
        let response = self.dispatcher.query(query).await?;
        let value = parse::parse_bool(&response).map_err(|e| e.with_command(query))?;
        self.cache.store(channel, setting, value);
        Ok(value)
    }

    /// Query a (possibly quoted) string. Not cached; callers cache the
    /// typed value they parse from it.
    pub async fn query_text(&self, query: &str) -> Result<String> {
        let response = self.dispatcher.query(query).await?;
        Ok(parse::unquote(&response).to_string())
    }
}

/// Unified interface to any instrument driver.
///
/// The capability queries (`as_function_generator()` and friends) let code
/// holding a `&dyn Instrument` reach the capability trait the driver
/// implements; they return `None` for every other group.
#[async_trait]
pub trait Instrument: Send + Sync {
    /// The shared driver state.
    fn core(&self) -> &InstrumentCore;

    /// Which capability group this driver belongs to.
    fn capability_group(&self) -> CapabilityGroup {
        self.core().capability_group()
    }

    /// Number of channels.
    fn channel_count(&self) -> usize {
        self.core().channel_count()
    }

    /// Channel names in index order.
    fn channel_names(&self) -> Vec<String> {
        self.core().channel_names()
    }

    /// Resolve a channel name or alias to its index.
    fn resolve_channel(&self, name: &str) -> Result<usize> {
        self.core().resolve_channel(name)
    }

    /// Replace all channel aliases (channel name to alias).
    fn set_aliases(&self, map: &HashMap<String, String>) -> Result<()> {
        self.core().set_aliases(map)
    }

    /// Full identity, queried once and cached.
    async fn identity(&self) -> Result<Identity> {
        self.core().identity().await
    }

    async fn manufacturer(&self) -> Result<String> {
        Ok(self.identity().await?.manufacturer)
    }

    async fn model(&self) -> Result<String> {
        Ok(self.identity().await?.model)
    }

    async fn serial_number(&self) -> Result<String> {
        Ok(self.identity().await?.serial_number)
    }

    async fn firmware_revision(&self) -> Result<String> {
        Ok(self.identity().await?.firmware_revision)
    }

    /// Return the instrument to its power-on state.
    async fn reset(&self) -> Result<()> {
        self.core().reset().await
    }

    /// Clear the status registers and error queue.
    async fn clear(&self) -> Result<()> {
        self.core().clear().await
    }

    /// Send a model-specific command the driver does not model.
    async fn command(&self, text: &str) -> Result<()> {
        self.core().dispatcher().command(text).await
    }

    /// Send a model-specific query the driver does not model.
    async fn query(&self, text: &str) -> Result<String> {
        self.core().dispatcher().query(text).await
    }

    fn as_function_generator(&self) -> Option<&dyn FunctionGenerator> {
        None
    }

    fn as_dc_power(&self) -> Option<&dyn DcPower> {
        None
    }

    fn as_oscilloscope(&self) -> Option<&dyn Oscilloscope> {
        None
    }

    fn as_dmm(&self) -> Option<&dyn Dmm> {
        None
    }

    fn as_switch(&self) -> Option<&dyn Switch> {
        None
    }

    /// Like [`as_function_generator`](Self::as_function_generator), failing
    /// with [`Error::FunctionNotSupported`] for other groups.
    fn function_generator(&self) -> Result<&dyn FunctionGenerator> {
        self.as_function_generator()
            .ok_or_else(|| not_in_group(self.capability_group(), CapabilityGroup::FunctionGenerator))
    }

    fn dc_power(&self) -> Result<&dyn DcPower> {
        self.as_dc_power()
            .ok_or_else(|| not_in_group(self.capability_group(), CapabilityGroup::DcPower))
    }

    fn oscilloscope(&self) -> Result<&dyn Oscilloscope> {
        self.as_oscilloscope()
            .ok_or_else(|| not_in_group(self.capability_group(), CapabilityGroup::Oscilloscope))
    }

    fn dmm(&self) -> Result<&dyn Dmm> {
        self.as_dmm()
            .ok_or_else(|| not_in_group(self.capability_group(), CapabilityGroup::Dmm))
    }

    fn switch(&self) -> Result<&dyn Switch> {
        self.as_switch()
            .ok_or_else(|| not_in_group(self.capability_group(), CapabilityGroup::Switch))
    }
}

fn not_in_group(have: CapabilityGroup, want: CapabilityGroup) -> Error {
    Error::not_supported(format!("{want} operations on a {have}"))
}

/// Convert a seconds value reported by an instrument into a [`Duration`].
pub fn duration_from_secs(seconds: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| Error::malformed(seconds.to_string(), "expected a non-negative duration"))
}
