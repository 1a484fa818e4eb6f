//! Modulation families.
//!
//! AM, FM and PM share one shape: the scheme is selected with
//! `SOUR<N>:MOD:TYP`, followed by the modulation amount (depth or deviation),
//! the internal modulating rate and shape, and finally `SOUR<N>:MOD:STAT`.
//! What differs per scheme is captured by [`ModulationScheme`].

use std::fmt;
use std::marker::PhantomData;

use super::command::{Header, Waveform};
use super::field::{FieldBinding, ParameterField, ShapeField, ToggleField};
use super::pass::{ApplyPass, RefreshPass};
use super::{ChannelCore, Family, ParameterModel};
use crate::error::{ApplyError, RefreshError};
use crate::transport::Transport;
use crate::units::{QuantityDomain, UnitTag};

const MODULATION_TYPE: Header = Header::source("MOD:TYP");
const MODULATION_STATE: Header = Header::source("MOD:STAT");

/// Per-scheme vocabulary and defaults.
pub trait ModulationScheme: fmt::Debug + Clone + Copy + Default + 'static {
    /// Family this scheme belongs to.
    const FAMILY: Family;
    /// Argument of `MOD:TYP`.
    const TOKEN: &'static str;
    /// Depth or deviation.
    const AMOUNT: FieldBinding;
    /// Internal modulating frequency.
    const RATE: FieldBinding;
    /// Internal modulating shape.
    const SHAPE: Header;
    /// Power-on amount and its display unit.
    const DEFAULT_AMOUNT: (f64, UnitTag);
}

/// Amplitude modulation. Depth is sent unclamped; the instrument decides.
#[derive(Debug, Clone, Copy, Default)]
pub struct Am;

/// Frequency modulation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fm;

/// Phase modulation. Deviation is clamped to 0..=360 degrees.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pm;

impl ModulationScheme for Am {
    const FAMILY: Family = Family::Am;
    const TOKEN: &'static str = "AM";
    const AMOUNT: FieldBinding = FieldBinding::new(
        "depth",
        Header::source("AM:DEPT"),
        QuantityDomain::Ratio,
        UnitTag::Percent,
    );
    const RATE: FieldBinding = rate(Header::source("AM:INT:FREQ"));
    const SHAPE: Header = Header::source("AM:INT:FUNC");
    const DEFAULT_AMOUNT: (f64, UnitTag) = (100.0, UnitTag::Percent);
}

impl ModulationScheme for Fm {
    const FAMILY: Family = Family::Fm;
    const TOKEN: &'static str = "FM";
    const AMOUNT: FieldBinding = FieldBinding::new(
        "deviation",
        Header::source("FM:DEV"),
        QuantityDomain::Frequency,
        UnitTag::Hertz,
    )
    .with_min_decimals(1);
    const RATE: FieldBinding = rate(Header::source("FM:INT:FREQ"));
    const SHAPE: Header = Header::source("FM:INT:FUNC");
    const DEFAULT_AMOUNT: (f64, UnitTag) = (1.0, UnitTag::KiloHertz);
}

impl ModulationScheme for Pm {
    const FAMILY: Family = Family::Pm;
    const TOKEN: &'static str = "PM";
    const AMOUNT: FieldBinding = FieldBinding::new(
        "deviation",
        Header::source("PM:DEV"),
        QuantityDomain::Phase,
        UnitTag::Degree,
    )
    .clamped(0.0, 360.0);
    const RATE: FieldBinding = rate(Header::source("PM:INT:FREQ"));
    const SHAPE: Header = Header::source("PM:INT:FUNC");
    const DEFAULT_AMOUNT: (f64, UnitTag) = (90.0, UnitTag::Degree);
}

const fn rate(header: Header) -> FieldBinding {
    FieldBinding::new("rate", header, QuantityDomain::Frequency, UnitTag::Hertz)
        .with_min_decimals(1)
}

#[derive(Debug, Clone, PartialEq)]
struct ModulationParams {
    amount: ParameterField,
    rate: ParameterField,
    shape: ShapeField,
    enabled: ToggleField,
}

/// Channel model for one modulation scheme.
#[derive(Debug, Clone)]
pub struct Modulation<S: ModulationScheme> {
    core: ChannelCore,
    params: ModulationParams,
    scheme: PhantomData<S>,
}

/// Amplitude-modulated channel.
pub type AmModulation = Modulation<Am>;
/// Frequency-modulated channel.
pub type FmModulation = Modulation<Fm>;
/// Phase-modulated channel.
pub type PmModulation = Modulation<Pm>;

impl<S: ModulationScheme> Modulation<S> {
    /// Model at the instrument's power-on defaults, modulation off.
    pub fn new(core: ChannelCore) -> Self {
        let (amount, unit) = S::DEFAULT_AMOUNT;
        let params = ModulationParams {
            amount: ParameterField::new(S::AMOUNT, amount, unit),
            rate: ParameterField::new(S::RATE, 100.0, UnitTag::Hertz),
            shape: ShapeField::new("shape", S::SHAPE, Waveform::Sine),
            enabled: ToggleField::new("enabled", MODULATION_STATE, false),
        };
        Self {
            core,
            params,
            scheme: PhantomData,
        }
    }
}

impl<S: ModulationScheme> ParameterModel for Modulation<S> {
    fn core(&self) -> &ChannelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ChannelCore {
        &mut self.core
    }

    fn family(&self) -> Family {
        S::FAMILY
    }

    fn field(&self, name: &str) -> Option<&ParameterField> {
        [&self.params.amount, &self.params.rate]
            .into_iter()
            .find(|field| field.name() == name)
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut ParameterField> {
        [&mut self.params.amount, &mut self.params.rate]
            .into_iter()
            .find(|field| field.name() == name)
    }

    fn active_fields(&self) -> Vec<&ParameterField> {
        vec![&self.params.amount, &self.params.rate]
    }

    fn shape(&self) -> Waveform {
        self.params.shape.shape()
    }

    fn select_shape(&mut self, shape: Waveform) {
        self.params.shape.stage(shape);
    }

    fn enabled(&self) -> bool {
        self.params.enabled.enabled()
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.params.enabled.stage(enabled);
    }

    fn apply(&mut self, transport: &mut dyn Transport) -> Result<(), ApplyError> {
        let params = &mut self.params;
        let mut pass = ApplyPass::begin(&mut self.core, transport);
        let channel = pass.channel();

        pass.send("type", Ok(MODULATION_TYPE.set(channel, S::TOKEN)));
        for field in [&params.amount, &params.rate] {
            pass.send(field.name(), field.set_command(channel));
        }
        pass.send(params.shape.name(), Ok(params.shape.set_command(channel)));
        pass.send(params.enabled.name(), Ok(params.enabled.set_command(channel)));
        // Failed fields are settled too; the next refresh reads them back.
        params.amount.mark_sent();
        params.rate.mark_sent();
        params.shape.mark_sent();
        params.enabled.mark_sent();
        pass.finish()
    }

    fn refresh(&mut self, transport: &mut dyn Transport) -> Result<(), RefreshError> {
        let params = &mut self.params;
        let mut pass = RefreshPass::begin(&mut self.core, transport);
        let channel = pass.channel();

        for field in [&mut params.amount, &mut params.rate] {
            let (name, dirty) = (field.name(), field.is_dirty());
            let query = field.query_command(channel);
            pass.read(name, dirty, query, |r| field.absorb(r));
        }
        let shape = &mut params.shape;
        pass.read(shape.name(), shape.is_dirty(), shape.query_command(channel), |r| {
            shape.absorb(r)
        });
        let enabled = &mut params.enabled;
        pass.read(enabled.name(), enabled.is_dirty(), enabled.query_command(channel), |r| {
            enabled.absorb(r)
        });
        pass.finish()
    }
}
