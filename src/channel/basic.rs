//! Unmodulated carrier.
//!
//! Which scalar fields are sent depends on the selected shape: noise has no
//! frequency or phase, DC is only an offset, and each of square, ramp and
//! pulse adds its own shape parameter.

use super::command::{Header, Waveform};
use super::field::{FieldBinding, ParameterField, ShapeField, ToggleField};
use super::pass::{ApplyPass, RefreshPass};
use super::{ChannelCore, Family, ParameterModel};
use crate::error::{ApplyError, RefreshError};
use crate::transport::Transport;
use crate::units::{QuantityDomain, UnitTag};

const FUNCTION: Header = Header::source("FUNC");
const OUTPUT: Header = Header::output("STAT");

/// Carrier frequency.
pub const FREQUENCY: FieldBinding = FieldBinding::new(
    "frequency",
    Header::source("FREQ"),
    QuantityDomain::Frequency,
    UnitTag::Hertz,
)
.with_min_decimals(1);

/// Peak-to-peak amplitude.
pub const AMPLITUDE: FieldBinding = FieldBinding::new(
    "amplitude",
    Header::source("VOLT"),
    QuantityDomain::Amplitude,
    UnitTag::VoltPeakToPeak,
)
.with_min_decimals(1);

/// DC offset.
pub const OFFSET: FieldBinding = FieldBinding::new(
    "offset",
    Header::source("VOLT:OFFS"),
    QuantityDomain::Offset,
    UnitTag::Volt,
)
.with_min_decimals(1);

/// Start phase.
pub const PHASE: FieldBinding = FieldBinding::new(
    "phase",
    Header::source("PHAS"),
    QuantityDomain::Phase,
    UnitTag::Degree,
);

/// Square wave duty cycle.
pub const DUTY_CYCLE: FieldBinding = FieldBinding::new(
    "duty_cycle",
    Header::source("FUNC:SQU:DCYC"),
    QuantityDomain::Ratio,
    UnitTag::Percent,
)
.clamped(0.0, 100.0);

/// Ramp symmetry.
pub const SYMMETRY: FieldBinding = FieldBinding::new(
    "symmetry",
    Header::source("FUNC:RAMP:SYMM"),
    QuantityDomain::Ratio,
    UnitTag::Percent,
)
.clamped(0.0, 100.0);

/// Pulse duty cycle.
pub const PULSE_DUTY: FieldBinding = FieldBinding::new(
    "pulse_duty",
    Header::source("FUNC:PULS:DCYC"),
    QuantityDomain::Ratio,
    UnitTag::Percent,
)
.clamped(0.0, 100.0);

#[derive(Debug, Clone, PartialEq)]
struct BasicParams {
    shape: ShapeField,
    frequency: ParameterField,
    amplitude: ParameterField,
    offset: ParameterField,
    phase: ParameterField,
    duty_cycle: ParameterField,
    symmetry: ParameterField,
    pulse_duty: ParameterField,
    output: ToggleField,
}

impl BasicParams {
    fn all(&self) -> [&ParameterField; 7] {
        [
            &self.frequency,
            &self.amplitude,
            &self.offset,
            &self.phase,
            &self.duty_cycle,
            &self.symmetry,
            &self.pulse_duty,
        ]
    }

    fn active(&self) -> Vec<&ParameterField> {
        let mut fields = Vec::with_capacity(5);
        match self.shape.shape() {
            Waveform::Dc => fields.push(&self.offset),
            Waveform::Noise => fields.extend([&self.amplitude, &self.offset]),
            shape => {
                fields.extend([&self.frequency, &self.amplitude, &self.offset, &self.phase]);
                match shape {
                    Waveform::Square => fields.push(&self.duty_cycle),
                    Waveform::Ramp => fields.push(&self.symmetry),
                    Waveform::Pulse => fields.push(&self.pulse_duty),
                    _ => {}
                }
            }
        }
        fields
    }

    fn active_mut(&mut self) -> Vec<&mut ParameterField> {
        let mut fields = Vec::with_capacity(5);
        match self.shape.shape() {
            Waveform::Dc => fields.push(&mut self.offset),
            Waveform::Noise => fields.extend([&mut self.amplitude, &mut self.offset]),
            shape => {
                fields.extend([
                    &mut self.frequency,
                    &mut self.amplitude,
                    &mut self.offset,
                    &mut self.phase,
                ]);
                match shape {
                    Waveform::Square => fields.push(&mut self.duty_cycle),
                    Waveform::Ramp => fields.push(&mut self.symmetry),
                    Waveform::Pulse => fields.push(&mut self.pulse_duty),
                    _ => {}
                }
            }
        }
        fields
    }

    fn settle(&mut self) {
        self.shape.mark_sent();
        self.output.mark_sent();
        for field in [
            &mut self.frequency,
            &mut self.amplitude,
            &mut self.offset,
            &mut self.phase,
            &mut self.duty_cycle,
            &mut self.symmetry,
            &mut self.pulse_duty,
        ] {
            field.mark_sent();
        }
    }
}

/// Carrier-only channel model.
#[derive(Debug, Clone)]
pub struct BasicWaveform {
    core: ChannelCore,
    params: BasicParams,
}

impl BasicWaveform {
    /// Model at the instrument's power-on defaults: 1 kHz sine, 5 Vpp, output off.
    pub fn new(core: ChannelCore) -> Self {
        let params = BasicParams {
            shape: ShapeField::new("shape", FUNCTION, Waveform::Sine),
            frequency: ParameterField::new(FREQUENCY, 1000.0, UnitTag::Hertz),
            amplitude: ParameterField::new(AMPLITUDE, 5.0, UnitTag::VoltPeakToPeak),
            offset: ParameterField::new(OFFSET, 0.0, UnitTag::Volt),
            phase: ParameterField::new(PHASE, 0.0, UnitTag::Degree),
            duty_cycle: ParameterField::new(DUTY_CYCLE, 50.0, UnitTag::Percent),
            symmetry: ParameterField::new(SYMMETRY, 50.0, UnitTag::Percent),
            pulse_duty: ParameterField::new(PULSE_DUTY, 50.0, UnitTag::Percent),
            output: ToggleField::new("output", OUTPUT, false),
        };
        Self { core, params }
    }
}

impl ParameterModel for BasicWaveform {
    fn core(&self) -> &ChannelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ChannelCore {
        &mut self.core
    }

    fn family(&self) -> Family {
        Family::Basic
    }

    fn field(&self, name: &str) -> Option<&ParameterField> {
        self.params.all().into_iter().find(|field| field.name() == name)
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut ParameterField> {
        let params = &mut self.params;
        [
            &mut params.frequency,
            &mut params.amplitude,
            &mut params.offset,
            &mut params.phase,
            &mut params.duty_cycle,
            &mut params.symmetry,
            &mut params.pulse_duty,
        ]
        .into_iter()
        .find(|field| field.name() == name)
    }

    fn active_fields(&self) -> Vec<&ParameterField> {
        self.params.active()
    }

    fn shape(&self) -> Waveform {
        self.params.shape.shape()
    }

    fn select_shape(&mut self, shape: Waveform) {
        self.params.shape.stage(shape);
    }

    fn enabled(&self) -> bool {
        self.params.output.enabled()
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.params.output.stage(enabled);
    }

    fn apply(&mut self, transport: &mut dyn Transport) -> Result<(), ApplyError> {
        let params = &mut self.params;
        let mut pass = ApplyPass::begin(&mut self.core, transport);
        let channel = pass.channel();

        pass.send(params.shape.name(), Ok(params.shape.set_command(channel)));
        for field in params.active() {
            pass.send(field.name(), field.set_command(channel));
        }
        pass.send(params.output.name(), Ok(params.output.set_command(channel)));
        // Failed and inactive fields are settled too; the next refresh reads them back.
        params.settle();
        pass.finish()
    }

    fn refresh(&mut self, transport: &mut dyn Transport) -> Result<(), RefreshError> {
        let params = &mut self.params;
        let mut pass = RefreshPass::begin(&mut self.core, transport);
        let channel = pass.channel();

        let shape = &mut params.shape;
        pass.read(shape.name(), shape.is_dirty(), shape.query_command(channel), |r| {
            shape.absorb(r)
        });
        for field in params.active_mut() {
            let (name, dirty) = (field.name(), field.is_dirty());
            let query = field.query_command(channel);
            pass.read(name, dirty, query, |r| field.absorb(r));
        }
        let output = &mut params.output;
        pass.read(output.name(), output.is_dirty(), output.query_command(channel), |r| {
            output.absorb(r)
        });
        pass.finish()
    }
}
