//! Linear unit conversions for grid values.
//!
//! Every supported unit is expressed as `base = value * factor + offset`
//! relative to the base unit of its quantity (metre, kelvin, pascal), so any
//! pair within one quantity composes into a single linear conversion.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Length,
    Temperature,
    Pressure,
}

/// A supported measurement unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Unit {
    Millimeter,
    Meter,
    Inch,
    Foot,
    Celsius,
    Fahrenheit,
    Kelvin,
    Hectopascal,
    Kilopascal,
    InchOfMercury,
}

impl Unit {
    pub fn quantity(&self) -> Quantity {
        match self {
            Self::Millimeter | Self::Meter | Self::Inch | Self::Foot => Quantity::Length,
            Self::Celsius | Self::Fahrenheit | Self::Kelvin => Quantity::Temperature,
            Self::Hectopascal | Self::Kilopascal | Self::InchOfMercury => Quantity::Pressure,
        }
    }

    /// Canonical symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Millimeter => "mm",
            Self::Meter => "m",
            Self::Inch => "in",
            Self::Foot => "ft",
            Self::Celsius => "degC",
            Self::Fahrenheit => "degF",
            Self::Kelvin => "K",
            Self::Hectopascal => "hPa",
            Self::Kilopascal => "kPa",
            Self::InchOfMercury => "inHg",
        }
    }

    /// `(factor, offset)` into the quantity's base unit.
    fn to_base(self) -> (f64, f64) {
        match self {
            Self::Millimeter => (0.001, 0.0),
            Self::Meter => (1.0, 0.0),
            Self::Inch => (0.0254, 0.0),
            Self::Foot => (0.3048, 0.0),
            Self::Celsius => (1.0, 273.15),
            Self::Fahrenheit => (5.0 / 9.0, 273.15 - 32.0 * 5.0 / 9.0),
            Self::Kelvin => (1.0, 0.0),
            Self::Hectopascal => (100.0, 0.0),
            Self::Kilopascal => (1000.0, 0.0),
            Self::InchOfMercury => (3386.389, 0.0),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unit = match s.trim().to_lowercase().as_str() {
            "mm" | "millimeter" | "millimeters" | "millimetre" | "millimetres" => Self::Millimeter,
            "m" | "meter" | "meters" | "metre" | "metres" => Self::Meter,
            "in" | "inch" | "inches" => Self::Inch,
            "ft" | "foot" | "feet" => Self::Foot,
            "degc" | "c" | "celsius" | "°c" => Self::Celsius,
            "degf" | "f" | "fahrenheit" | "°f" => Self::Fahrenheit,
            "k" | "kelvin" => Self::Kelvin,
            "hpa" | "mb" | "mbar" | "millibar" => Self::Hectopascal,
            "kpa" => Self::Kilopascal,
            "inhg" => Self::InchOfMercury,
            _ => return Err(format!("unknown unit '{}'", s)),
        };
        Ok(unit)
    }
}

impl TryFrom<String> for Unit {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Unit> for String {
    fn from(unit: Unit) -> Self {
        unit.symbol().to_string()
    }
}

/// `to = from * factor + offset`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitConversion {
    pub factor: f64,
    pub offset: f64,
}

impl UnitConversion {
    pub const IDENTITY: Self = Self {
        factor: 1.0,
        offset: 0.0,
    };

    /// Conversion between two units of the same quantity.
    pub fn between(from: Unit, to: Unit) -> Result<Self, String> {
        if from.quantity() != to.quantity() {
            return Err(format!("cannot convert {} to {}", from, to));
        }
        if from == to {
            return Ok(Self::IDENTITY);
        }
        let (f1, o1) = from.to_base();
        let (f2, o2) = to.to_base();
        Ok(Self {
            factor: f1 / f2,
            offset: (o1 - o2) / f2,
        })
    }

    pub fn apply(&self, value: f64) -> f64 {
        value * self.factor + self.offset
    }

    pub fn is_identity(&self) -> bool {
        self.factor == 1.0 && self.offset == 0.0
    }
}
