//! Field bindings and staged parameter values.
//!
//! A [`FieldBinding`] is the static description of one numeric setting: its
//! logical name, the SCPI header it maps to, its physical domain, the unit the
//! instrument speaks, how it is clamped and how many decimals it displays.
//! Bindings are `const` tables owned by each waveform family, so nothing is
//! looked up by widget name at runtime.
//!
//! A [`ParameterField`] pairs a binding with the value currently staged for it
//! and the text a display surface shows.

use serde::{Deserialize, Serialize};

use super::command::{self, Header};
use crate::error::{ConversionError, FieldFailureCause};
use crate::units::{
    auto_range, format_minimum_decimals, from_base, to_base, PhysicalQuantity, QuantityDomain,
    UnitTag,
};

/// What happens to a value outside the range the instrument accepts.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum ClampPolicy {
    /// Values are sent as entered.
    #[default]
    None,

    /// Values are clamped silently into `min..=max` before sending.
    Range {
        /// Lower bound (inclusive), in the wire unit.
        min: f64,
        /// Upper bound (inclusive), in the wire unit.
        max: f64,
    },
}

impl ClampPolicy {
    /// Clamp `value` according to the policy.
    pub fn apply(&self, value: f64) -> f64 {
        match *self {
            ClampPolicy::None => value,
            ClampPolicy::Range { min, max } => value.clamp(min, max),
        }
    }
}

/// Static description of a numeric field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldBinding {
    /// Logical field name, unique within a family.
    pub name: &'static str,
    /// Header the field is written to and queried from.
    pub header: Header,
    /// Physical domain of the value.
    pub domain: QuantityDomain,
    /// Unit the instrument sends and expects.
    pub wire_unit: UnitTag,
    /// Clamping applied before sending.
    pub clamp: ClampPolicy,
    /// Minimum decimals of the display text.
    pub min_decimals: u32,
}

impl FieldBinding {
    /// Unclamped binding displaying no forced decimals.
    pub const fn new(
        name: &'static str,
        header: Header,
        domain: QuantityDomain,
        wire_unit: UnitTag,
    ) -> Self {
        Self {
            name,
            header,
            domain,
            wire_unit,
            clamp: ClampPolicy::None,
            min_decimals: 0,
        }
    }

    /// Clamp sent values into `min..=max`.
    pub const fn clamped(mut self, min: f64, max: f64) -> Self {
        self.clamp = ClampPolicy::Range { min, max };
        self
    }

    /// Display at least `decimals` fractional digits.
    pub const fn with_min_decimals(mut self, decimals: u32) -> Self {
        self.min_decimals = decimals;
        self
    }

    /// Device-native value for a staged quantity, clamped per policy.
    ///
    /// A period staged on a frequency field is inverted, which fails for zero.
    /// A unit from an unrelated domain is read as this domain's base unit.
    pub fn encode(&self, staged: PhysicalQuantity) -> Result<f64, ConversionError> {
        let wire = match (self.domain, staged.domain()) {
            (QuantityDomain::Frequency, QuantityDomain::Period) => {
                staged.to_frequency(self.wire_unit)?.value
            }
            (binding, staged_domain) if binding == staged_domain => {
                from_base(staged.to_base(), self.wire_unit)
            }
            _ => from_base(staged.value, self.wire_unit),
        };
        Ok(self.clamp.apply(wire))
    }

    /// Set command for an already encoded value.
    pub fn set_command(&self, channel: u8, wire: f64) -> String {
        self.header.set(channel, command::number(wire))
    }

    /// Query command.
    pub fn query_command(&self, channel: u8) -> String {
        self.header.query(channel)
    }
}

/// A numeric field with its staged value and display text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterField {
    binding: FieldBinding,
    staged: PhysicalQuantity,
    text: String,
    dirty: bool,
}

impl ParameterField {
    /// Field holding `value` expressed in `unit`.
    pub fn new(binding: FieldBinding, value: f64, unit: UnitTag) -> Self {
        let staged = PhysicalQuantity::new(value, unit);
        Self {
            binding,
            staged,
            text: format_minimum_decimals(value, binding.min_decimals),
            dirty: false,
        }
    }

    /// The field's binding.
    pub fn binding(&self) -> &FieldBinding {
        &self.binding
    }

    /// Logical name.
    pub fn name(&self) -> &'static str {
        self.binding.name
    }

    /// Staged value with its unit.
    pub fn quantity(&self) -> PhysicalQuantity {
        self.staged
    }

    /// Unit the field is displayed in.
    pub fn display_unit(&self) -> UnitTag {
        self.staged.unit
    }

    /// Text shown for the field.
    pub fn display_text(&self) -> &str {
        &self.text
    }

    /// True while an edit has not yet been sent.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Stage an edit. The unit becomes the display unit.
    pub fn stage(&mut self, value: f64, unit: UnitTag) {
        self.staged = PhysicalQuantity::new(value, unit);
        self.text = format_minimum_decimals(value, self.binding.min_decimals);
        self.dirty = true;
    }

    /// Set command for the staged value.
    pub fn set_command(&self, channel: u8) -> Result<String, ConversionError> {
        let wire = self.binding.encode(self.staged)?;
        Ok(self.binding.set_command(channel, wire))
    }

    /// Query command.
    pub fn query_command(&self, channel: u8) -> String {
        self.binding.query_command(channel)
    }

    pub(crate) fn mark_sent(&mut self) {
        self.dirty = false;
    }

    /// Take a query response as the field's new value.
    ///
    /// The display unit is auto-ranged starting from the current one, so a
    /// field shown in kHz stays in kHz while the value fits the display band.
    /// On any failure the field is left untouched.
    pub fn absorb(&mut self, response: &str) -> Result<(), FieldFailureCause> {
        let wire = command::parse_number(response)
            .ok_or_else(|| FieldFailureCause::Unparseable(response.trim().to_string()))?;
        let device = PhysicalQuantity::new(wire, self.binding.wire_unit);

        let current = self.staged.unit;
        let base = match (self.binding.domain, current.domain()) {
            (QuantityDomain::Frequency, QuantityDomain::Period) => {
                device.to_period(QuantityDomain::Period.base_unit())?.value
            }
            (binding, shown) if binding == shown => to_base(wire, self.binding.wire_unit),
            _ => {
                // Display unit from another domain: fall back to the binding's own ladder.
                let base = to_base(wire, self.binding.wire_unit);
                let ladder = self.binding.domain.units();
                let (value, unit) = auto_range(base, ladder, self.binding.wire_unit);
                self.show(value, unit);
                return Ok(());
            }
        };
        let (value, unit) = auto_range(base, current.ladder(), current);
        self.show(value, unit);
        Ok(())
    }

    fn show(&mut self, value: f64, unit: UnitTag) {
        self.staged = PhysicalQuantity::new(value, unit);
        self.text = format_minimum_decimals(value, self.binding.min_decimals);
    }
}

/// A two-state setting such as the output enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleField {
    name: &'static str,
    header: Header,
    enabled: bool,
    dirty: bool,
}

impl ToggleField {
    /// Toggle bound to `header`.
    pub const fn new(name: &'static str, header: Header, enabled: bool) -> Self {
        Self {
            name,
            header,
            enabled,
            dirty: false,
        }
    }

    /// Logical name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current state.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// True while an edit has not yet been sent.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Stage a new state.
    pub fn stage(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.dirty = true;
    }

    /// Set command for the staged state.
    pub fn set_command(&self, channel: u8) -> String {
        self.header.set(channel, command::on_off(self.enabled))
    }

    /// Query command.
    pub fn query_command(&self, channel: u8) -> String {
        self.header.query(channel)
    }

    pub(crate) fn mark_sent(&mut self) {
        self.dirty = false;
    }

    /// Take a query response as the new state.
    pub fn absorb(&mut self, response: &str) -> Result<(), FieldFailureCause> {
        self.enabled = command::parse_on_off(response)
            .ok_or_else(|| FieldFailureCause::Unparseable(response.trim().to_string()))?;
        Ok(())
    }
}

/// A shape selection such as the carrier function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeField {
    name: &'static str,
    header: Header,
    shape: command::Waveform,
    dirty: bool,
}

impl ShapeField {
    /// Shape selection bound to `header`.
    pub const fn new(name: &'static str, header: Header, shape: command::Waveform) -> Self {
        Self {
            name,
            header,
            shape,
            dirty: false,
        }
    }

    /// Logical name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current shape.
    pub fn shape(&self) -> command::Waveform {
        self.shape
    }

    /// True while an edit has not yet been sent.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Stage a new shape.
    pub fn stage(&mut self, shape: command::Waveform) {
        self.shape = shape;
        self.dirty = true;
    }

    /// Set command for the staged shape.
    pub fn set_command(&self, channel: u8) -> String {
        self.header.set(channel, self.shape.token())
    }

    /// Query command.
    pub fn query_command(&self, channel: u8) -> String {
        self.header.query(channel)
    }

    pub(crate) fn mark_sent(&mut self) {
        self.dirty = false;
    }

    /// Take a query response as the new shape.
    pub fn absorb(&mut self, response: &str) -> Result<(), FieldFailureCause> {
        self.shape = command::Waveform::from_token(response)
            .ok_or_else(|| FieldFailureCause::Unparseable(response.trim().to_string()))?;
        Ok(())
    }
}
