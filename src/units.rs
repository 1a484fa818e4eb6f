//! Unit Normalizer
//!
//! Pure conversions between unit-decorated display values and the fixed base
//! representation of each physical domain:
//!
//! | Domain    | Base unit            | Display units                  |
//! |-----------|----------------------|--------------------------------|
//! | Frequency | µHz                  | µHz, mHz, Hz, kHz, MHz         |
//! | Period    | ps                   | ps, ns, µs, ms, s              |
//! | Amplitude | Vpp                  | mVpp, Vpp, mVrms, Vrms         |
//! | Offset    | V                    | mV, V                          |
//! | Phase     | °                    | °                              |
//! | Ratio     | %                    | %                              |
//!
//! Every conversion between two non-base units goes through the base unit, so
//! the multiplier table below is the single source of truth for scale factors.
//! Display text is produced by [`format_minimum_decimals`] and the display unit
//! is chosen by [`auto_range`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConversionError;

/// Upper bound of the readable display band used by [`auto_range`].
pub const AUTO_RANGE_MAX: f64 = 9999.0;
/// Lower bound of the readable display band used by [`auto_range`].
pub const AUTO_RANGE_MIN: f64 = 0.1;

/// Fixed-point digits rendered before trimming, counted across integer and
/// fractional parts. Stays below the 15.95 decimal digits an `f64` can hold.
const SIGNIFICANT_DIGITS: usize = 15;

/// Physical domain a unit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuantityDomain {
    /// Signal frequency.
    Frequency,
    /// Signal period.
    Period,
    /// Peak-to-peak or RMS amplitude.
    Amplitude,
    /// DC offset.
    Offset,
    /// Phase angle.
    Phase,
    /// Dimensionless percentage (duty cycle, symmetry, depth).
    Ratio,
}

impl QuantityDomain {
    /// The base unit every value of this domain is normalized to.
    pub fn base_unit(self) -> UnitTag {
        match self {
            Self::Frequency => UnitTag::MicroHertz,
            Self::Period => UnitTag::Picosecond,
            Self::Amplitude => UnitTag::VoltPeakToPeak,
            Self::Offset => UnitTag::Volt,
            Self::Phase => UnitTag::Degree,
            Self::Ratio => UnitTag::Percent,
        }
    }

    /// Auto-range ladder of the domain, ordered from smallest to largest.
    pub fn units(self) -> &'static [UnitTag] {
        match self {
            Self::Frequency => FREQUENCY_UNITS,
            Self::Period => PERIOD_UNITS,
            Self::Amplitude => AMPLITUDE_UNITS,
            Self::Offset => OFFSET_UNITS,
            Self::Phase => &[UnitTag::Degree],
            Self::Ratio => &[UnitTag::Percent],
        }
    }
}

/// Frequency units, smallest first.
pub const FREQUENCY_UNITS: &[UnitTag] = &[
    UnitTag::MicroHertz,
    UnitTag::MilliHertz,
    UnitTag::Hertz,
    UnitTag::KiloHertz,
    UnitTag::MegaHertz,
];

/// Period units, smallest first.
pub const PERIOD_UNITS: &[UnitTag] = &[
    UnitTag::Picosecond,
    UnitTag::Nanosecond,
    UnitTag::Microsecond,
    UnitTag::Millisecond,
    UnitTag::Second,
];

/// Peak-to-peak amplitude units, smallest first. RMS units form their own
/// ladder; auto-ranging never switches between pp and RMS.
pub const AMPLITUDE_UNITS: &[UnitTag] = &[UnitTag::MilliVoltPeakToPeak, UnitTag::VoltPeakToPeak];

/// RMS amplitude units, smallest first.
pub const AMPLITUDE_RMS_UNITS: &[UnitTag] = &[UnitTag::MilliVoltRms, UnitTag::VoltRms];

/// Offset units, smallest first.
pub const OFFSET_UNITS: &[UnitTag] = &[UnitTag::MilliVolt, UnitTag::Volt];

/// A recognized display or device unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitTag {
    MicroHertz,
    MilliHertz,
    Hertz,
    KiloHertz,
    MegaHertz,
    Picosecond,
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
    MilliVoltPeakToPeak,
    VoltPeakToPeak,
    MilliVoltRms,
    VoltRms,
    MilliVolt,
    Volt,
    Degree,
    Percent,
}

impl UnitTag {
    /// Domain this unit measures.
    pub fn domain(self) -> QuantityDomain {
        use UnitTag::*;
        match self {
            MicroHertz | MilliHertz | Hertz | KiloHertz | MegaHertz => QuantityDomain::Frequency,
            Picosecond | Nanosecond | Microsecond | Millisecond | Second => QuantityDomain::Period,
            MilliVoltPeakToPeak | VoltPeakToPeak | MilliVoltRms | VoltRms => {
                QuantityDomain::Amplitude
            }
            MilliVolt | Volt => QuantityDomain::Offset,
            Degree => QuantityDomain::Phase,
            Percent => QuantityDomain::Ratio,
        }
    }

    /// Factor that takes a value in this unit to the domain's base unit.
    pub fn multiplier(self) -> f64 {
        use UnitTag::*;
        match self {
            MicroHertz => 1.0,
            MilliHertz => 1e3,
            Hertz => 1e6,
            KiloHertz => 1e9,
            MegaHertz => 1e12,
            Picosecond => 1.0,
            Nanosecond => 1e3,
            Microsecond => 1e6,
            Millisecond => 1e9,
            Second => 1e12,
            MilliVoltPeakToPeak => 1e-3,
            VoltPeakToPeak => 1.0,
            MilliVoltRms => 2.0 * std::f64::consts::SQRT_2 * 1e-3,
            VoltRms => 2.0 * std::f64::consts::SQRT_2,
            MilliVolt => 1e-3,
            Volt => 1.0,
            Degree => 1.0,
            Percent => 1.0,
        }
    }

    /// The auto-range ladder this unit sits on.
    pub fn ladder(self) -> &'static [UnitTag] {
        match self {
            UnitTag::MilliVoltRms | UnitTag::VoltRms => AMPLITUDE_RMS_UNITS,
            _ => self.domain().units(),
        }
    }

    /// Display symbol.
    pub fn symbol(self) -> &'static str {
        use UnitTag::*;
        match self {
            MicroHertz => "uHz",
            MilliHertz => "mHz",
            Hertz => "Hz",
            KiloHertz => "kHz",
            MegaHertz => "MHz",
            Picosecond => "ps",
            Nanosecond => "ns",
            Microsecond => "us",
            Millisecond => "ms",
            Second => "s",
            MilliVoltPeakToPeak => "mVpp",
            VoltPeakToPeak => "Vpp",
            MilliVoltRms => "mVrms",
            VoltRms => "Vrms",
            MilliVolt => "mV",
            Volt => "V",
            Degree => "deg",
            Percent => "%",
        }
    }

    /// Parse a display symbol within `domain`.
    ///
    /// Total by construction: a symbol that is not recognized for the domain
    /// yields the domain's base unit, i.e. a multiplier of 1.0.
    pub fn parse(domain: QuantityDomain, symbol: &str) -> UnitTag {
        Self::lookup(domain, symbol).unwrap_or_else(|| domain.base_unit())
    }

    /// Find the unit of `domain` with the given symbol or alias.
    pub fn lookup(domain: QuantityDomain, symbol: &str) -> Option<UnitTag> {
        let symbol = symbol.trim();
        domain
            .units()
            .iter()
            .chain(rms_ladder(domain))
            .find(|unit| {
                unit.symbol() == symbol || unit.aliases().iter().any(|alias| *alias == symbol)
            })
            .copied()
    }

    fn aliases(self) -> &'static [&'static str] {
        use UnitTag::*;
        match self {
            MicroHertz => &["µHz", "μHz"],
            Microsecond => &["µs", "μs"],
            KiloHertz => &["KHz", "khz"],
            Degree => &["°"],
            VoltPeakToPeak => &["V"],
            MilliVoltPeakToPeak => &["mV"],
            _ => &[],
        }
    }
}

fn rms_ladder(domain: QuantityDomain) -> &'static [UnitTag] {
    match domain {
        QuantityDomain::Amplitude => AMPLITUDE_RMS_UNITS,
        _ => &[],
    }
}

impl fmt::Display for UnitTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Scale `value` expressed in `unit` to the base unit of its domain.
pub fn to_base(value: f64, unit: UnitTag) -> f64 {
    value * unit.multiplier()
}

/// Scale a base-unit value to `unit`.
pub fn from_base(base: f64, unit: UnitTag) -> f64 {
    base / unit.multiplier()
}

/// Convert between two units of the same domain, always via the base unit.
pub fn convert(value: f64, from: UnitTag, to: UnitTag) -> f64 {
    from_base(to_base(value, from), to)
}

/// Period in seconds for a frequency in hertz.
pub fn frequency_to_period(hertz: f64) -> Result<f64, ConversionError> {
    invert(hertz)
}

/// Frequency in hertz for a period in seconds.
pub fn period_to_frequency(seconds: f64) -> Result<f64, ConversionError> {
    invert(seconds)
}

fn invert(value: f64) -> Result<f64, ConversionError> {
    if value == 0.0 {
        return Err(ConversionError::DivideByZero);
    }
    Ok(1.0 / value)
}

/// A value decorated with its unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalQuantity {
    /// Numeric value in `unit`.
    pub value: f64,
    /// Unit the value is expressed in.
    pub unit: UnitTag,
}

impl PhysicalQuantity {
    /// Create a quantity.
    pub fn new(value: f64, unit: UnitTag) -> Self {
        Self { value, unit }
    }

    /// Build a quantity from a base-unit value.
    pub fn from_base(base: f64, unit: UnitTag) -> Self {
        Self::new(from_base(base, unit), unit)
    }

    /// Domain of the quantity.
    pub fn domain(&self) -> QuantityDomain {
        self.unit.domain()
    }

    /// Value in the domain's base unit.
    pub fn to_base(&self) -> f64 {
        to_base(self.value, self.unit)
    }

    /// Re-express the quantity in another unit of the same domain.
    ///
    /// Returns `None` when `unit` belongs to a different domain.
    pub fn rescaled(&self, unit: UnitTag) -> Option<Self> {
        (unit.domain() == self.domain()).then(|| Self::from_base(self.to_base(), unit))
    }

    /// The matching period of a frequency quantity, in `unit`.
    ///
    /// A quantity that already is a period is rescaled unchanged.
    pub fn to_period(&self, unit: UnitTag) -> Result<Self, ConversionError> {
        let seconds = match self.domain() {
            QuantityDomain::Frequency => {
                frequency_to_period(from_base(self.to_base(), UnitTag::Hertz))?
            }
            _ => from_base(self.to_base(), UnitTag::Second),
        };
        Ok(Self::from_base(to_base(seconds, UnitTag::Second), unit))
    }

    /// The matching frequency of a period quantity, in `unit`.
    ///
    /// A quantity that already is a frequency is rescaled unchanged.
    pub fn to_frequency(&self, unit: UnitTag) -> Result<Self, ConversionError> {
        let hertz = match self.domain() {
            QuantityDomain::Period => {
                period_to_frequency(from_base(self.to_base(), UnitTag::Second))?
            }
            _ => from_base(self.to_base(), UnitTag::Hertz),
        };
        Ok(Self::from_base(to_base(hertz, UnitTag::Hertz), unit))
    }

    /// Auto-range within `ladder`, starting from the current unit.
    pub fn auto_ranged(&self, ladder: &[UnitTag]) -> Self {
        let (value, unit) = auto_range(self.to_base(), ladder, self.unit);
        Self::new(value, unit)
    }
}

impl fmt::Display for PhysicalQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", format_minimum_decimals(self.value, 0), self.unit)
    }
}

/// Pick the most readable unit for `base` out of `ladder` (ordered smallest
/// first), starting from `current`.
///
/// Steps one unit up while the displayed magnitude exceeds [`AUTO_RANGE_MAX`],
/// or one unit down while it is below [`AUTO_RANGE_MIN`], stopping at either end
/// of the ladder. The walk direction is fixed by the first comparison, so it
/// finishes within `ladder.len()` steps. If `current` is not on the ladder the
/// walk starts from the ladder's first unit.
pub fn auto_range(base: f64, ladder: &[UnitTag], current: UnitTag) -> (f64, UnitTag) {
    let Some(first) = ladder.first() else {
        return (from_base(base, current), current);
    };
    let mut index = ladder.iter().position(|u| *u == current).unwrap_or(0);
    let mut unit = ladder.get(index).copied().unwrap_or(*first);
    let mut shown = from_base(base, unit);

    if shown.abs() > AUTO_RANGE_MAX {
        while shown.abs() > AUTO_RANGE_MAX && index + 1 < ladder.len() {
            index += 1;
            unit = ladder[index];
            shown = from_base(base, unit);
        }
    } else if shown.abs() < AUTO_RANGE_MIN {
        while shown.abs() < AUTO_RANGE_MIN && index > 0 {
            index -= 1;
            unit = ladder[index];
            shown = from_base(base, unit);
        }
    }
    (shown, unit)
}

/// Render `value` with at least `min_decimals` fractional digits while keeping
/// every further significant fractional digit.
///
/// The value is first rendered in fixed point with fifteen significant digits,
/// counted from the first non-zero digit for magnitudes below one. Trailing
/// zeros are trimmed, and the fraction is re-padded up to the
/// minimum. This is the only routine used to turn numbers into display or wire
/// text, so display → parse → display is stable.
pub fn format_minimum_decimals(value: f64, min_decimals: u32) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let magnitude = value.abs();
    let precision = if magnitude == 0.0 {
        0
    } else if magnitude < 1.0 {
        let leading_zeros = (-magnitude.log10().floor()) as usize - 1;
        leading_zeros + SIGNIFICANT_DIGITS
    } else {
        let integer_digits = magnitude.log10().floor() as usize + 1;
        SIGNIFICANT_DIGITS.saturating_sub(integer_digits)
    };
    let fixed = format!("{value:.precision$}");

    let (integer, fraction) = match fixed.split_once('.') {
        Some((integer, fraction)) => (integer, fraction.trim_end_matches('0')),
        None => (fixed.as_str(), ""),
    };
    let integer = if integer == "-0" && fraction.is_empty() {
        "0"
    } else {
        integer
    };

    let min = min_decimals as usize;
    if fraction.is_empty() && min == 0 {
        return integer.to_string();
    }
    let width = fraction.len().max(min);
    format!("{integer}.{fraction:0<width$}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn test_round_trip_through_base() {
        for domain in [
            QuantityDomain::Frequency,
            QuantityDomain::Period,
            QuantityDomain::Amplitude,
            QuantityDomain::Offset,
        ] {
            for unit in domain.units().iter().chain(rms_ladder(domain)) {
                for value in [0.0, 1.0, 2.5, -3.75, 123.456, 9999.0, 0.000_123] {
                    let back = from_base(to_base(value, *unit), *unit);
                    assert!(close(back, value), "{value} {unit} came back as {back}");
                }
            }
        }
    }

    #[test]
    fn test_frequency_base_is_micro_hertz() {
        assert_eq!(to_base(2.5, UnitTag::KiloHertz), 2.5e9);
        assert_eq!(convert(2.5, UnitTag::KiloHertz, UnitTag::Hertz), 2500.0);
    }

    #[test]
    fn test_rms_to_peak_to_peak() {
        let vpp = convert(1.0, UnitTag::VoltRms, UnitTag::VoltPeakToPeak);
        assert!(close(vpp, 2.828_427_124_746_19));
        let mvrms = convert(2.0, UnitTag::VoltPeakToPeak, UnitTag::MilliVoltRms);
        assert!(close(mvrms, 707.106_781_186_547_5));
    }

    #[test]
    fn test_unknown_symbol_is_base_unit() {
        assert_eq!(
            UnitTag::parse(QuantityDomain::Frequency, "furlongs"),
            UnitTag::MicroHertz
        );
        assert_eq!(UnitTag::parse(QuantityDomain::Offset, ""), UnitTag::Volt);
        assert_eq!(
            UnitTag::parse(QuantityDomain::Frequency, " kHz "),
            UnitTag::KiloHertz
        );
        assert_eq!(
            UnitTag::parse(QuantityDomain::Amplitude, "Vrms"),
            UnitTag::VoltRms
        );
    }

    #[test]
    fn test_inversion() {
        assert_eq!(frequency_to_period(1000.0), Ok(0.001));
        assert_eq!(period_to_frequency(0.001), Ok(1000.0));
        assert_eq!(frequency_to_period(0.0), Err(ConversionError::DivideByZero));
        assert_eq!(period_to_frequency(0.0), Err(ConversionError::DivideByZero));
    }

    #[test]
    fn test_quantity_period_and_frequency() {
        let freq = PhysicalQuantity::new(1.0, UnitTag::KiloHertz);
        let period = freq.to_period(UnitTag::Millisecond).unwrap();
        assert!(close(period.value, 1.0));
        assert_eq!(period.unit, UnitTag::Millisecond);

        let back = period.to_frequency(UnitTag::Hertz).unwrap();
        assert!(close(back.value, 1000.0));

        let zero = PhysicalQuantity::new(0.0, UnitTag::Hertz);
        assert_eq!(
            zero.to_period(UnitTag::Second),
            Err(ConversionError::DivideByZero)
        );
    }

    #[test]
    fn test_rescaled_rejects_other_domain() {
        let q = PhysicalQuantity::new(1.5, UnitTag::Volt);
        assert_eq!(
            q.rescaled(UnitTag::MilliVolt),
            Some(PhysicalQuantity::new(1500.0, UnitTag::MilliVolt))
        );
        assert_eq!(q.rescaled(UnitTag::Hertz), None);
    }

    #[test]
    fn test_auto_range_grows_and_shrinks() {
        let base = to_base(2500.0, UnitTag::Hertz);
        assert_eq!(
            auto_range(base, FREQUENCY_UNITS, UnitTag::KiloHertz),
            (2.5, UnitTag::KiloHertz)
        );
        // 2.5e6 Hz shown in Hz is too large: step up to kHz (2500 is in band).
        let base = to_base(2.5e6, UnitTag::Hertz);
        assert_eq!(
            auto_range(base, FREQUENCY_UNITS, UnitTag::Hertz),
            (2500.0, UnitTag::KiloHertz)
        );
        // 0.05 Hz shown in kHz is too small: step down to mHz.
        let base = to_base(0.05, UnitTag::Hertz);
        let (value, unit) = auto_range(base, FREQUENCY_UNITS, UnitTag::KiloHertz);
        assert_eq!(unit, UnitTag::MilliHertz);
        assert!(close(value, 50.0));
    }

    #[test]
    fn test_auto_range_stops_at_ladder_ends() {
        let huge = to_base(1e9, UnitTag::MegaHertz);
        let (_, unit) = auto_range(huge, FREQUENCY_UNITS, UnitTag::Hertz);
        assert_eq!(unit, UnitTag::MegaHertz);

        let (value, unit) = auto_range(0.0, FREQUENCY_UNITS, UnitTag::MegaHertz);
        assert_eq!(unit, UnitTag::MicroHertz);
        assert_eq!(value, 0.0);
    }

    #[test]
    fn test_auto_range_lands_in_band() {
        for hz in [0.001, 0.37, 12.0, 999.9, 25_000.0, 1.2e6, 7.5e7] {
            let base = to_base(hz, UnitTag::Hertz);
            for start in FREQUENCY_UNITS {
                let (value, _) = auto_range(base, FREQUENCY_UNITS, *start);
                assert!(
                    (AUTO_RANGE_MIN..=AUTO_RANGE_MAX).contains(&value.abs()),
                    "{hz} Hz from {start} displayed as {value}"
                );
            }
        }
    }

    #[test]
    fn test_format_minimum_decimals() {
        assert_eq!(format_minimum_decimals(1.5, 2), "1.50");
        assert_eq!(format_minimum_decimals(1.23456, 2), "1.23456");
        assert_eq!(format_minimum_decimals(2.0, 3), "2.000");
        assert_eq!(format_minimum_decimals(2500.0, 0), "2500");
        assert_eq!(format_minimum_decimals(2.5, 1), "2.5");
        assert_eq!(format_minimum_decimals(-0.25, 1), "-0.25");
        assert_eq!(format_minimum_decimals(0.1 + 0.2, 1), "0.3");
        assert_eq!(format_minimum_decimals(1234.56, 0), "1234.56");
        assert_eq!(format_minimum_decimals(-0.0, 0), "0");
        assert_eq!(format_minimum_decimals(0.0, 2), "0.00");
        assert_eq!(format_minimum_decimals(0.000123, 0), "0.000123");
        assert_eq!(format_minimum_decimals(1e-20, 0), "0.00000000000000000001");
        assert_eq!(format_minimum_decimals(-2.5e-9, 1), "-0.0000000025");
    }
}
