//! SCPI command vocabulary of the function generator.
//!
//! Commands take the form `<SCOPE><N>:<SUBSYSTEM>:<ATTR> <value>` and queries
//! `<SCOPE><N>:<SUBSYSTEM>:<ATTR>?`, `N` being the 1-based channel index.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::units::format_minimum_decimals;

/// Command tree root a header lives under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// `SOUR<N>`: signal source settings.
    Source,
    /// `OUTP<N>`: output connector settings.
    Output,
}

impl Scope {
    fn prefix(self) -> &'static str {
        match self {
            Scope::Source => "SOUR",
            Scope::Output => "OUTP",
        }
    }
}

/// A channel-relative SCPI header such as `SOUR<N>:FREQ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {
    scope: Scope,
    path: &'static str,
}

impl Header {
    /// Header under `SOUR<N>`.
    pub const fn source(path: &'static str) -> Self {
        Self {
            scope: Scope::Source,
            path,
        }
    }

    /// Header under `OUTP<N>`.
    pub const fn output(path: &'static str) -> Self {
        Self {
            scope: Scope::Output,
            path,
        }
    }

    /// Header text for `channel`, e.g. `SOUR1:FREQ`.
    pub fn render(&self, channel: u8) -> String {
        format!("{}{}:{}", self.scope.prefix(), channel, self.path)
    }

    /// Set command carrying `value`.
    pub fn set(&self, channel: u8, value: impl fmt::Display) -> String {
        format!("{} {}", self.render(channel), value)
    }

    /// Query for the current value.
    pub fn query(&self, channel: u8) -> String {
        format!("{}?", self.render(channel))
    }
}

/// Numeric argument text. No resolution is dropped.
pub fn number(value: f64) -> String {
    format_minimum_decimals(value, 0)
}

/// Boolean argument text.
pub fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "ON"
    } else {
        "OFF"
    }
}

/// Parse a numeric response. Rejects anything that is not a finite number.
pub fn parse_number(response: &str) -> Option<f64> {
    response
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

/// Parse a boolean response (`ON`, `OFF`, `1`, `0`).
pub fn parse_on_off(response: &str) -> Option<bool> {
    match response.trim().to_ascii_uppercase().as_str() {
        "ON" | "1" => Some(true),
        "OFF" | "0" => Some(false),
        _ => None,
    }
}

/// Output shape, used both for the carrier and the internal modulating source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Waveform {
    /// Sinusoid.
    #[default]
    Sine,
    /// Square wave with adjustable duty cycle.
    Square,
    /// Ramp with adjustable symmetry.
    Ramp,
    /// Pulse train with adjustable duty cycle.
    Pulse,
    /// Gaussian noise. Frequency and phase do not apply.
    Noise,
    /// Constant level set by the offset.
    Dc,
}

impl Waveform {
    /// Every shape, in menu order.
    pub const ALL: [Waveform; 6] = [
        Waveform::Sine,
        Waveform::Square,
        Waveform::Ramp,
        Waveform::Pulse,
        Waveform::Noise,
        Waveform::Dc,
    ];

    /// Short-form mnemonic sent to the instrument.
    pub fn token(self) -> &'static str {
        match self {
            Waveform::Sine => "SIN",
            Waveform::Square => "SQU",
            Waveform::Ramp => "RAMP",
            Waveform::Pulse => "PULS",
            Waveform::Noise => "NOIS",
            Waveform::Dc => "DC",
        }
    }

    fn long_form(self) -> &'static str {
        match self {
            Waveform::Sine => "SINUSOID",
            Waveform::Square => "SQUARE",
            Waveform::Ramp => "RAMP",
            Waveform::Pulse => "PULSE",
            Waveform::Noise => "NOISE",
            Waveform::Dc => "DC",
        }
    }

    /// Parse an instrument response. Short and long SCPI forms are accepted.
    pub fn from_token(response: &str) -> Option<Self> {
        let response = response.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|shape| shape.token() == response || shape.long_form() == response)
    }
}

impl fmt::Display for Waveform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Waveform::Sine => "sine",
            Waveform::Square => "square",
            Waveform::Ramp => "ramp",
            Waveform::Pulse => "pulse",
            Waveform::Noise => "noise",
            Waveform::Dc => "dc",
        };
        f.write_str(name)
    }
}

impl FromStr for Waveform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|shape| shape.to_string().eq_ignore_ascii_case(s.trim()))
            .or_else(|| Self::from_token(s))
            .ok_or_else(|| format!("unknown waveform '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_rendering() {
        const FREQ: Header = Header::source("FREQ");
        const STATE: Header = Header::output("STAT");
        assert_eq!(FREQ.set(1, number(2500.0)), "SOUR1:FREQ 2500");
        assert_eq!(FREQ.query(2), "SOUR2:FREQ?");
        assert_eq!(STATE.set(2, on_off(true)), "OUTP2:STAT ON");
    }

    #[test]
    fn test_number_keeps_resolution() {
        assert_eq!(number(0.001), "0.001");
        assert_eq!(number(-1.25), "-1.25");
        assert_eq!(number(5.0), "5");
    }

    #[test]
    fn test_parse_responses() {
        assert_eq!(parse_number(" 2500\r"), Some(2500.0));
        assert_eq!(parse_number("+1.000000E+03"), Some(1000.0));
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("garbage"), None);

        assert_eq!(parse_on_off("1"), Some(true));
        assert_eq!(parse_on_off("off"), Some(false));
        assert_eq!(parse_on_off("maybe"), None);
    }

    #[test]
    fn test_waveform_tokens() {
        assert_eq!(Waveform::from_token("SQU"), Some(Waveform::Square));
        assert_eq!(Waveform::from_token("sinusoid"), Some(Waveform::Sine));
        assert_eq!(Waveform::from_token("TRI"), None);
        assert_eq!("Pulse".parse::<Waveform>(), Ok(Waveform::Pulse));
        assert_eq!("NOIS".parse::<Waveform>(), Ok(Waveform::Noise));
        assert!("triangle".parse::<Waveform>().is_err());
    }
}
