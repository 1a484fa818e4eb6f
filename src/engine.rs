//! Synchronization engine
//!
//! [`SyncEngine`] owns the [`Instrument`] (transport plus one channel model per
//! output) together with the [`DebouncedDispatcher`] that defers applies. An
//! edit stages its value immediately, marks the channel `Pending` and arms a
//! timer under the key `ch<N>.<family>.<field>`. When the user stops typing for
//! the debounce delay, the timer fires on the engine's own task and the whole
//! channel is applied. Timers of a channel that is no longer `Pending` (its
//! edits already went out with an earlier timer) do nothing.
//!
//! All work happens on the task that drives the engine: edits, timer firing and
//! the transport calls those timers make. Cross-channel operations run one
//! channel after the other.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::channel::{ChannelModel, ChannelState, Family, ParameterModel, Waveform};
use crate::config::SigGenConfig;
use crate::dispatch::DebouncedDispatcher;
use crate::error::{ApplyError, EditError, RefreshError, SyncError};
use crate::logging::SharedLogSink;
use crate::transport::Transport;
use crate::units::{QuantityDomain, UnitTag};

/// The transport and the channel models it serves.
pub struct Instrument<T> {
    transport: T,
    channels: Vec<ChannelModel>,
    failures: Vec<SyncError>,
}

impl<T: Transport> Instrument<T> {
    /// Instrument with the given channel models, ordered by channel index.
    pub fn new(transport: T, channels: Vec<ChannelModel>) -> Self {
        Self {
            transport,
            channels,
            failures: Vec::new(),
        }
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// All channel models.
    pub fn channels(&self) -> &[ChannelModel] {
        &self.channels
    }

    /// Channel model by 1-based index.
    pub fn channel(&self, index: u8) -> Result<&ChannelModel, EditError> {
        self.channels
            .iter()
            .find(|model| model.channel() == index)
            .ok_or(EditError::UnknownChannel(index))
    }

    /// Mutable channel model by 1-based index.
    pub fn channel_mut(&mut self, index: u8) -> Result<&mut ChannelModel, EditError> {
        self.channels
            .iter_mut()
            .find(|model| model.channel() == index)
            .ok_or(EditError::UnknownChannel(index))
    }

    /// Apply one channel now.
    pub fn apply_channel(&mut self, index: u8) -> Result<(), SyncError> {
        let model = self
            .channels
            .iter_mut()
            .find(|model| model.channel() == index)
            .ok_or(EditError::UnknownChannel(index))?;
        model.apply(&mut self.transport)?;
        Ok(())
    }

    /// Apply one channel if it still has staged edits. Several armed keys of
    /// the same channel thereby result in a single apply.
    fn apply_if_pending(&mut self, index: u8) -> Result<bool, SyncError> {
        if self.channel(index)?.state() != ChannelState::Pending {
            return Ok(false);
        }
        self.apply_channel(index)?;
        Ok(true)
    }

    /// Refresh one channel now.
    pub fn refresh_channel(&mut self, index: u8) -> Result<(), SyncError> {
        let model = self
            .channels
            .iter_mut()
            .find(|model| model.channel() == index)
            .ok_or(EditError::UnknownChannel(index))?;
        model.refresh(&mut self.transport)?;
        Ok(())
    }
}

/// Edit-driven synchronization of all channels.
pub struct SyncEngine<T: Transport + 'static> {
    instrument: Instrument<T>,
    dispatcher: DebouncedDispatcher<Instrument<T>>,
    debounce: Duration,
    log: SharedLogSink,
}

impl<T: Transport + 'static> SyncEngine<T> {
    /// Engine with `channel_count` basic channels.
    pub fn new(transport: T, channel_count: u8, debounce: Duration, log: SharedLogSink) -> Self {
        let channels = (1..=channel_count)
            .map(|index| ChannelModel::new(Family::Basic, index, log.clone()))
            .collect();
        Self {
            instrument: Instrument::new(transport, channels),
            dispatcher: DebouncedDispatcher::new(),
            debounce,
            log,
        }
    }

    /// Engine sized and timed from configuration.
    pub fn from_config(transport: T, config: &SigGenConfig, log: SharedLogSink) -> Self {
        Self::new(
            transport,
            config.transport.channel_count,
            config.dispatch.debounce(),
            log,
        )
    }

    /// The instrument.
    pub fn instrument(&self) -> &Instrument<T> {
        &self.instrument
    }

    /// Mutable access to the instrument.
    pub fn instrument_mut(&mut self) -> &mut Instrument<T> {
        &mut self.instrument
    }

    /// Channel model by 1-based index.
    pub fn channel(&self, index: u8) -> Result<&ChannelModel, EditError> {
        self.instrument.channel(index)
    }

    /// Debounce delay.
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Number of armed applies.
    pub fn pending(&self) -> usize {
        self.dispatcher.pending_count()
    }

    /// True if the given edit key has an armed apply.
    pub fn is_pending(&self, key: &str) -> bool {
        self.dispatcher.is_pending(key)
    }

    /// Switch a channel to another waveform family.
    ///
    /// The new model starts from the instrument's power-on defaults and is
    /// applied after the debounce delay.
    pub fn set_family(&mut self, index: u8, family: Family) -> Result<(), EditError> {
        let model = self.instrument.channel_mut(index)?;
        if model.family() != family {
            *model = ChannelModel::new(family, index, self.log.clone());
        }
        self.log
            .log(&format!("channel {index}: family set to {family}"));
        self.arm(index, family, "family");
        Ok(())
    }

    /// Stage a numeric edit and arm the channel's apply.
    pub fn edit(
        &mut self,
        index: u8,
        field: &str,
        value: f64,
        unit: UnitTag,
    ) -> Result<(), EditError> {
        let model = self.instrument.channel_mut(index)?;
        let family = model.family();
        let target = model.field_mut(field).ok_or_else(|| EditError::UnknownField {
            channel: index,
            family: family.key(),
            field: field.to_string(),
        })?;
        target.stage(value, unit);
        let name = target.name();
        self.log.log(&format!(
            "channel {index}: {name} staged as {} {unit}",
            target.display_text()
        ));
        self.arm(index, family, name);
        Ok(())
    }

    /// Stage a numeric edit whose unit is given as a display symbol.
    ///
    /// An unrecognized symbol is read as the field's base unit.
    pub fn edit_symbol(
        &mut self,
        index: u8,
        field: &str,
        value: f64,
        symbol: &str,
    ) -> Result<(), EditError> {
        let model = self.instrument.channel(index)?;
        let domain = model
            .field(field)
            .map(|target| target.binding().domain)
            .ok_or_else(|| EditError::UnknownField {
                channel: index,
                family: model.family().key(),
                field: field.to_string(),
            })?;
        // Frequency fields also take a period.
        let unit = UnitTag::lookup(domain, symbol)
            .or_else(|| {
                (domain == QuantityDomain::Frequency)
                    .then(|| UnitTag::lookup(QuantityDomain::Period, symbol))
                    .flatten()
            })
            .unwrap_or_else(|| domain.base_unit());
        self.edit(index, field, value, unit)
    }

    /// Stage a shape change and arm the channel's apply.
    pub fn select_shape(&mut self, index: u8, shape: Waveform) -> Result<(), EditError> {
        let model = self.instrument.channel_mut(index)?;
        model.select_shape(shape);
        let family = model.family();
        self.log
            .log(&format!("channel {index}: shape staged as {shape}"));
        self.arm(index, family, "shape");
        Ok(())
    }

    /// Stage an enable change and arm the channel's apply.
    pub fn set_enabled(&mut self, index: u8, enabled: bool) -> Result<(), EditError> {
        let model = self.instrument.channel_mut(index)?;
        model.set_enabled(enabled);
        let family = model.family();
        self.log.log(&format!(
            "channel {index}: {} staged {}",
            if family == Family::Basic { "output" } else { "modulation" },
            if enabled { "on" } else { "off" }
        ));
        self.arm(index, family, "enabled");
        Ok(())
    }

    fn arm(&mut self, index: u8, family: Family, field: &str) {
        if let Ok(model) = self.instrument.channel_mut(index) {
            model.mark_pending();
        }
        let key = format!("ch{index}.{family}.{field}");
        debug!(key = %key, delay = ?self.debounce, "apply armed");
        self.dispatcher
            .schedule(key, self.debounce, move |instrument: &mut Instrument<T>| {
                match instrument.apply_if_pending(index) {
                    Ok(applied) => trace!(channel = index, applied, "debounced apply"),
                    Err(err) => {
                        warn!(channel = index, error = %err, "debounced apply failed");
                        instrument.failures.push(err);
                    }
                }
            });
    }

    /// Run the applies whose delay has elapsed. Never waits.
    pub fn run_due(&mut self) -> usize {
        self.dispatcher
            .fire_due(Instant::now(), &mut self.instrument)
    }

    /// Wait for the next armed apply and run it. Pending forever when nothing
    /// is armed.
    pub async fn tick(&mut self) -> usize {
        self.dispatcher.tick(&mut self.instrument).await
    }

    /// Wait until every armed apply has run.
    pub async fn settle(&mut self) -> usize {
        self.dispatcher.run_until_idle(&mut self.instrument).await
    }

    /// Run every armed apply now.
    pub fn flush(&mut self) -> usize {
        self.dispatcher.flush(&mut self.instrument)
    }

    /// Failures of debounced applies since the last call.
    pub fn take_failures(&mut self) -> Vec<SyncError> {
        std::mem::take(&mut self.instrument.failures)
    }

    /// Apply one channel now.
    pub fn apply_channel(&mut self, index: u8) -> Result<(), SyncError> {
        self.instrument.apply_channel(index)
    }

    /// Refresh one channel now.
    pub fn refresh_channel(&mut self, index: u8) -> Result<(), SyncError> {
        self.instrument.refresh_channel(index)
    }

    /// Apply every channel in index order. Returns the failures of all channels.
    pub fn apply_all(&mut self) -> Result<(), Vec<ApplyError>> {
        let transport = &mut self.instrument.transport;
        let failures: Vec<ApplyError> = self
            .instrument
            .channels
            .iter_mut()
            .filter_map(|model| model.apply(transport).err())
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures)
        }
    }

    /// Refresh every channel in index order. Returns the failures of all channels.
    pub fn refresh_all(&mut self) -> Result<(), Vec<RefreshError>> {
        let transport = &mut self.instrument.transport;
        let failures: Vec<RefreshError> = self
            .instrument
            .channels
            .iter_mut()
            .filter_map(|model| model.refresh(transport).err())
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{MemoryLogSink, NullLogSink};
    use crate::transport::simulated::SIMULATED_RESOURCE;
    use crate::transport::{SimulatedDriver, TransportSession};
    use std::sync::Arc;

    fn engine() -> SyncEngine<TransportSession<SimulatedDriver>> {
        let mut session = TransportSession::new(SimulatedDriver::new());
        session.connect(SIMULATED_RESOURCE).unwrap();
        SyncEngine::new(session, 2, Duration::from_millis(500), Arc::new(NullLogSink))
    }

    fn written(engine: &SyncEngine<TransportSession<SimulatedDriver>>) -> Vec<String> {
        engine.instrument().transport().driver().written().to_vec()
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_burst_applies_once() {
        let mut engine = engine();
        for (value, gap_ms) in [(2.0, 0), (2.5, 120), (2.55, 240), (2.5, 360)] {
            tokio::time::sleep(Duration::from_millis(gap_ms)).await;
            engine.edit(1, "frequency", value, UnitTag::KiloHertz).unwrap();
        }
        assert_eq!(
            engine.channel(1).unwrap().state(),
            ChannelState::Pending
        );
        assert!(engine.is_pending("ch1.basic.frequency"));
        assert!(written(&engine).is_empty());

        assert_eq!(engine.settle().await, 1);
        let sent = written(&engine);
        assert_eq!(
            sent.iter().filter(|c| c.starts_with("SOUR1:FREQ")).collect::<Vec<_>>(),
            ["SOUR1:FREQ 2500"]
        );
        assert_eq!(engine.channel(1).unwrap().state(), ChannelState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_fires_before_the_delay() {
        let mut engine = engine();
        engine.edit(2, "amplitude", 1.5, UnitTag::VoltPeakToPeak).unwrap();
        tokio::time::advance(Duration::from_millis(499)).await;
        assert_eq!(engine.run_due(), 0);
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(engine.run_due(), 1);
        assert!(written(&engine).contains(&"SOUR2:VOLT 1.5".to_string()));
    }

    #[test]
    fn test_unknown_targets_are_rejected() {
        let mut engine = engine();
        assert_eq!(
            engine.edit(3, "frequency", 1.0, UnitTag::Hertz),
            Err(EditError::UnknownChannel(3))
        );
        assert!(matches!(
            engine.edit(1, "depth", 50.0, UnitTag::Percent),
            Err(EditError::UnknownField { channel: 1, family: "basic", .. })
        ));
        assert_eq!(engine.pending(), 0);
    }

    #[test]
    fn test_edit_symbol_parses_in_field_domain() {
        let mut engine = engine();
        engine.edit_symbol(1, "frequency", 2.5, "kHz").unwrap();
        engine.edit_symbol(1, "offset", 250.0, "mV").unwrap();
        assert_eq!(engine.flush(), 2);
        let sent = written(&engine);
        // Both keys fired, the channel went out once.
        assert_eq!(sent.iter().filter(|c| c.as_str() == "SOUR1:FUNC SIN").count(), 1);
        assert!(sent.contains(&"SOUR1:FREQ 2500".to_string()));
        assert!(sent.contains(&"SOUR1:VOLT:OFFS 0.25".to_string()));

        engine.edit_symbol(2, "frequency", 4.0, "ms").unwrap();
        assert_eq!(
            engine.channel(2).unwrap().field("frequency").unwrap().display_unit(),
            UnitTag::Millisecond
        );
        engine.flush();
        assert!(written(&engine).contains(&"SOUR2:FREQ 250".to_string()));
    }

    #[test]
    fn test_family_switch_applies_modulation() {
        let mut engine = engine();
        engine.set_family(2, Family::Pm).unwrap();
        engine.edit(2, "deviation", 45.0, UnitTag::Degree).unwrap();
        engine.set_enabled(2, true).unwrap();
        engine.flush();

        let sent = written(&engine);
        assert_eq!(sent.last().map(String::as_str), Some("SOUR2:MOD:STAT ON"));
        assert!(sent.contains(&"SOUR2:MOD:TYP PM".to_string()));
        assert!(sent.contains(&"SOUR2:PM:DEV 45".to_string()));
        assert_eq!(engine.channel(2).unwrap().family(), Family::Pm);
    }

    #[test]
    fn test_debounced_failures_are_kept() {
        let mut session = TransportSession::new(SimulatedDriver::new());
        session.connect(SIMULATED_RESOURCE).unwrap();
        session.disconnect().unwrap();
        let log = MemoryLogSink::new();
        let debounce = Duration::from_millis(10);
        let mut engine = SyncEngine::new(session, 1, debounce, Arc::new(log.clone()));

        engine.set_enabled(1, true).unwrap();
        engine.flush();
        let failures = engine.take_failures();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], SyncError::Apply(_)));
        assert!(log.contains("output not applied"));
        assert!(engine.take_failures().is_empty());
    }

    #[test]
    fn test_apply_and_refresh_all() {
        let mut engine = engine();
        engine.apply_all().unwrap();
        let sent = written(&engine);
        assert_eq!(sent.len(), 12);
        assert!(sent[..6].iter().all(|c| c.contains("1:")));
        assert!(sent[6..].iter().all(|c| c.contains("2:")));

        engine
            .instrument_mut()
            .transport_mut()
            .driver_mut()
            .set_register("SOUR2:FREQ", "12000");
        engine.refresh_all().unwrap();
        let frequency = engine.channel(2).unwrap().field("frequency").unwrap();
        assert_eq!(frequency.display_unit(), UnitTag::KiloHertz);
        assert_eq!(frequency.display_text(), "12.0");
    }
}
