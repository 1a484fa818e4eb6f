//! Parameter Channel Model
//!
//! Each output channel of the generator is driven by one waveform family: the
//! plain carrier ([`BasicWaveform`]) or one of the modulation schemes
//! ([`AmModulation`], [`FmModulation`], [`PmModulation`]). Families form the
//! closed set [`ChannelModel`] and share the [`ParameterModel`] capability:
//!
//! - `apply` sends every active field in a fixed order: the shape or
//!   modulation selection first, scalar parameters next, the enable state last.
//!   A failed command is logged and skipped; the remaining commands still go
//!   out and the failures are reported together.
//! - `refresh` queries every active field. A response that fails to parse
//!   leaves its field untouched. Fields with an edit that has not been applied
//!   yet are not overwritten.
//!
//! Per channel the model moves through [`ChannelState`]: an edit makes it
//! `Pending` until the debounced apply runs, `Applying` covers the apply pass
//! itself, and it returns to `Idle` afterwards.

pub mod basic;
pub mod command;
pub mod field;
pub mod modulation;
mod pass;

pub use basic::BasicWaveform;
pub use command::Waveform;
pub use field::{ClampPolicy, FieldBinding, ParameterField, ShapeField, ToggleField};
pub use modulation::{AmModulation, FmModulation, ModulationScheme, PmModulation};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ApplyError, RefreshError};
use crate::logging::SharedLogSink;
use crate::transport::Transport;

/// Synchronization state of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChannelState {
    /// Local values match what was last sent or read.
    #[default]
    Idle,
    /// An edit is staged and a debounced apply is armed.
    Pending,
    /// An apply pass is talking to the instrument.
    Applying,
}

/// Waveform family of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Family {
    /// Unmodulated carrier.
    #[default]
    Basic,
    /// Amplitude modulation.
    Am,
    /// Frequency modulation.
    Fm,
    /// Phase modulation.
    Pm,
}

impl Family {
    /// Short lowercase name, also used in dispatcher keys.
    pub fn key(self) -> &'static str {
        match self {
            Family::Basic => "basic",
            Family::Am => "am",
            Family::Fm => "fm",
            Family::Pm => "pm",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Family {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Family::Basic, Family::Am, Family::Fm, Family::Pm]
            .into_iter()
            .find(|family| family.key().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown waveform family '{s}'"))
    }
}

/// State every family carries: its channel index, sync state and log sink.
#[derive(Clone)]
pub struct ChannelCore {
    index: u8,
    state: ChannelState,
    log: SharedLogSink,
}

impl ChannelCore {
    /// Core for the 1-based channel `index`.
    pub fn new(index: u8, log: SharedLogSink) -> Self {
        Self {
            index,
            state: ChannelState::Idle,
            log,
        }
    }

    /// 1-based channel index.
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Current state.
    pub fn state(&self) -> ChannelState {
        self.state
    }
}

impl fmt::Debug for ChannelCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelCore")
            .field("index", &self.index)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Two-way synchronization of one channel's parameters with the instrument.
pub trait ParameterModel {
    /// Shared channel state.
    fn core(&self) -> &ChannelCore;

    /// Mutable shared channel state.
    fn core_mut(&mut self) -> &mut ChannelCore;

    /// Family of this model.
    fn family(&self) -> Family;

    /// Numeric field by name, active or not.
    fn field(&self, name: &str) -> Option<&ParameterField>;

    /// Mutable numeric field by name, active or not.
    fn field_mut(&mut self, name: &str) -> Option<&mut ParameterField>;

    /// Numeric fields the current shape uses, in apply order.
    fn active_fields(&self) -> Vec<&ParameterField>;

    /// Carrier shape (basic) or modulating shape (modulation families).
    fn shape(&self) -> Waveform;

    /// Stage a shape change.
    fn select_shape(&mut self, shape: Waveform);

    /// Output enable (basic) or modulation enable (modulation families).
    fn enabled(&self) -> bool;

    /// Stage an enable change.
    fn set_enabled(&mut self, enabled: bool);

    /// Send the staged parameters to the instrument.
    fn apply(&mut self, transport: &mut dyn Transport) -> Result<(), ApplyError>;

    /// Read the instrument's parameters into the model.
    fn refresh(&mut self, transport: &mut dyn Transport) -> Result<(), RefreshError>;

    /// 1-based channel index.
    fn channel(&self) -> u8 {
        self.core().index
    }

    /// Current synchronization state.
    fn state(&self) -> ChannelState {
        self.core().state
    }

    /// Record that an apply is armed for this channel.
    fn mark_pending(&mut self) {
        self.core_mut().state = ChannelState::Pending;
    }
}

/// The closed set of waveform families a channel can be driven by.
#[derive(Debug, Clone)]
pub enum ChannelModel {
    /// Unmodulated carrier.
    Basic(BasicWaveform),
    /// Amplitude modulation.
    Am(AmModulation),
    /// Frequency modulation.
    Fm(FmModulation),
    /// Phase modulation.
    Pm(PmModulation),
}

impl ChannelModel {
    /// Model of `family` for channel `index`, at the instrument's power-on defaults.
    pub fn new(family: Family, index: u8, log: SharedLogSink) -> Self {
        let core = ChannelCore::new(index, log);
        match family {
            Family::Basic => ChannelModel::Basic(BasicWaveform::new(core)),
            Family::Am => ChannelModel::Am(AmModulation::new(core)),
            Family::Fm => ChannelModel::Fm(FmModulation::new(core)),
            Family::Pm => ChannelModel::Pm(PmModulation::new(core)),
        }
    }

    fn inner(&self) -> &dyn ParameterModel {
        match self {
            ChannelModel::Basic(model) => model,
            ChannelModel::Am(model) => model,
            ChannelModel::Fm(model) => model,
            ChannelModel::Pm(model) => model,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn ParameterModel {
        match self {
            ChannelModel::Basic(model) => model,
            ChannelModel::Am(model) => model,
            ChannelModel::Fm(model) => model,
            ChannelModel::Pm(model) => model,
        }
    }
}

impl ParameterModel for ChannelModel {
    fn core(&self) -> &ChannelCore {
        self.inner().core()
    }

    fn core_mut(&mut self) -> &mut ChannelCore {
        self.inner_mut().core_mut()
    }

    fn family(&self) -> Family {
        self.inner().family()
    }

    fn field(&self, name: &str) -> Option<&ParameterField> {
        self.inner().field(name)
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut ParameterField> {
        self.inner_mut().field_mut(name)
    }

    fn active_fields(&self) -> Vec<&ParameterField> {
        self.inner().active_fields()
    }

    fn shape(&self) -> Waveform {
        self.inner().shape()
    }

    fn select_shape(&mut self, shape: Waveform) {
        self.inner_mut().select_shape(shape)
    }

    fn enabled(&self) -> bool {
        self.inner().enabled()
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.inner_mut().set_enabled(enabled)
    }

    fn apply(&mut self, transport: &mut dyn Transport) -> Result<(), ApplyError> {
        self.inner_mut().apply(transport)
    }

    fn refresh(&mut self, transport: &mut dyn Transport) -> Result<(), RefreshError> {
        self.inner_mut().refresh(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NullLogSink;
    use crate::transport::simulated::SIMULATED_RESOURCE;
    use crate::transport::{SimulatedDriver, TransportSession};
    use std::sync::Arc;

    fn connected() -> TransportSession<SimulatedDriver> {
        let mut session = TransportSession::new(SimulatedDriver::new());
        session.connect(SIMULATED_RESOURCE).unwrap();
        session.driver_mut().clear_written();
        session
    }

    #[test]
    fn test_enable_is_always_last() {
        for family in [Family::Basic, Family::Am, Family::Fm, Family::Pm] {
            for shape in Waveform::ALL {
                let mut session = connected();
                let mut model = ChannelModel::new(family, 2, Arc::new(NullLogSink));
                model.select_shape(shape);
                model.set_enabled(true);
                model.apply(&mut session).unwrap();

                let written = session.driver().written();
                let last = written.last().unwrap();
                let expected = match family {
                    Family::Basic => "OUTP2:STAT ON",
                    _ => "SOUR2:MOD:STAT ON",
                };
                assert_eq!(last, expected, "{family} {shape}: {written:?}");
                assert_eq!(
                    written.iter().filter(|c| c.as_str() == expected).count(),
                    1
                );
            }
        }
    }

    #[test]
    fn test_selection_is_always_first() {
        let mut session = connected();
        let mut model = ChannelModel::new(Family::Basic, 1, Arc::new(NullLogSink));
        model.apply(&mut session).unwrap();
        assert_eq!(session.driver().written()[0], "SOUR1:FUNC SIN");

        session.driver_mut().clear_written();
        let mut model = ChannelModel::new(Family::Fm, 1, Arc::new(NullLogSink));
        model.apply(&mut session).unwrap();
        assert_eq!(session.driver().written()[0], "SOUR1:MOD:TYP FM");
    }

    #[test]
    fn test_state_returns_to_idle() {
        let mut session = connected();
        let mut model = ChannelModel::new(Family::Am, 1, Arc::new(NullLogSink));
        model.mark_pending();
        assert_eq!(model.state(), ChannelState::Pending);
        model.apply(&mut session).unwrap();
        assert_eq!(model.state(), ChannelState::Idle);

        // A failed pass also settles back to idle.
        session.disconnect().unwrap();
        model.mark_pending();
        assert!(model.apply(&mut session).is_err());
        assert_eq!(model.state(), ChannelState::Idle);
    }

    #[test]
    fn test_family_names() {
        assert_eq!("PM".parse::<Family>(), Ok(Family::Pm));
        assert_eq!(Family::Basic.to_string(), "basic");
        assert!("xm".parse::<Family>().is_err());
    }
}
