// THEORY:
// The `coordinate` module is the bottom of the whole engine. Every region, tile,
// extent and halo is ultimately expressed as a `Coordinate`: one value for each
// of the five fixed axes (time, x, y, z, channel).
//
// Key architectural principles:
// 1.  **Fixed Axes**: The axis set never changes. Storing a plain `[f64; 5]`
//     keeps coordinates `Copy` and makes elementwise arithmetic trivial.
// 2.  **Unbounded Edges**: Values are `f64` so that `+inf`/`-inf` can stand in
//     for "not yet resolved" without a separate optional type per axis.
// 3.  **Universal Comparisons**: `a.all_lt(b)` is true only when *every* axis of
//     `a` is below the matching axis of `b`. This is not a total or lexicographic
//     order, so the type exposes explicit `all_*` methods instead of
//     `PartialOrd`, whose contract a universal quantifier cannot satisfy.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Div, Mul, Sub};

/// One of the five named axes, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    T,
    X,
    Y,
    Z,
    C,
}

impl Axis {
    /// Canonical axis order. Enumerations over all axes follow this order.
    pub const ALL: [Axis; 5] = [Axis::T, Axis::X, Axis::Y, Axis::Z, Axis::C];
    pub const SPATIAL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> char {
        match self {
            Axis::T => 't',
            Axis::X => 'x',
            Axis::Y => 'y',
            Axis::Z => 'z',
            Axis::C => 'c',
        }
    }

    pub fn from_label(label: char) -> Result<Axis> {
        match label {
            't' => Ok(Axis::T),
            'x' => Ok(Axis::X),
            'y' => Ok(Axis::Y),
            'z' => Ok(Axis::Z),
            'c' => Ok(Axis::C),
            other => Err(Error::Configuration(format!("unknown axis label '{other}'"))),
        }
    }

    /// Parses an axis order such as `"yx"` or `"tzyxc"`.
    pub fn parse_order(labels: &str) -> Result<Vec<Axis>> {
        labels.chars().map(Axis::from_label).collect()
    }
}

/// An immutable point over the axes (t, x, y, z, c).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(into = "WireCoordinate", try_from = "WireCoordinate")]
pub struct Coordinate {
    values: [f64; 5],
}

/// One axis value on the wire. JSON has no infinities, so non-finite values
/// travel as the strings `"inf"`, `"-inf"` and `"nan"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum WireValue {
    Number(f64),
    Text(String),
}

impl WireValue {
    fn encode(value: f64) -> Self {
        if value.is_finite() {
            WireValue::Number(value)
        } else if value.is_nan() {
            WireValue::Text("nan".into())
        } else if value > 0.0 {
            WireValue::Text("inf".into())
        } else {
            WireValue::Text("-inf".into())
        }
    }

    fn decode(self) -> std::result::Result<f64, String> {
        match self {
            WireValue::Number(value) => Ok(value),
            WireValue::Text(text) => match text.as_str() {
                "inf" | "+inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                "nan" => Ok(f64::NAN),
                other => Err(format!("'{other}' is not a coordinate value")),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
struct WireCoordinate([WireValue; 5]);

impl From<Coordinate> for WireCoordinate {
    fn from(coordinate: Coordinate) -> Self {
        WireCoordinate(coordinate.values.map(WireValue::encode))
    }
}

impl TryFrom<WireCoordinate> for Coordinate {
    type Error = String;

    fn try_from(wire: WireCoordinate) -> std::result::Result<Self, String> {
        let [t, x, y, z, c] = wire.0;
        Ok(Coordinate::new(t.decode()?, x.decode()?, y.decode()?, z.decode()?, c.decode()?))
    }
}

impl Coordinate {
    pub const fn new(t: f64, x: f64, y: f64, z: f64, c: f64) -> Self {
        Self {
            values: [t, x, y, z, c],
        }
    }

    pub const fn filled(value: f64) -> Self {
        Self { values: [value; 5] }
    }

    pub const fn zero() -> Self {
        Self::filled(0.0)
    }

    pub const fn one() -> Self {
        Self::filled(1.0)
    }

    pub const fn inf() -> Self {
        Self::filled(f64::INFINITY)
    }

    pub const fn ninf() -> Self {
        Self::filled(f64::NEG_INFINITY)
    }

    /// Builds a coordinate from `(axis, value)` pairs; unnamed axes take `default`.
    pub fn from_pairs(pairs: &[(Axis, f64)], default: f64) -> Self {
        pairs
            .iter()
            .fold(Self::filled(default), |acc, &(axis, value)| acc.with_axis(axis, value))
    }

    pub fn get(&self, axis: Axis) -> f64 {
        self.values[axis.index()]
    }

    pub fn t(&self) -> f64 {
        self.get(Axis::T)
    }

    pub fn x(&self) -> f64 {
        self.get(Axis::X)
    }

    pub fn y(&self) -> f64 {
        self.get(Axis::Y)
    }

    pub fn z(&self) -> f64 {
        self.get(Axis::Z)
    }

    pub fn c(&self) -> f64 {
        self.get(Axis::C)
    }

    /// Returns a copy with a single axis replaced.
    pub fn with_axis(&self, axis: Axis, value: f64) -> Self {
        let mut values = self.values;
        values[axis.index()] = value;
        Self { values }
    }

    /// Projects the coordinate onto the given axis order.
    pub fn to_tuple(&self, axis_order: &[Axis]) -> Vec<f64> {
        axis_order.iter().map(|&axis| self.get(axis)).collect()
    }

    pub fn to_array(&self) -> [f64; 5] {
        self.values
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            values: self.values.map(f),
        }
    }

    pub fn zip_with(&self, other: &Coordinate, f: impl Fn(f64, f64) -> f64) -> Self {
        let mut values = self.values;
        for (value, rhs) in values.iter_mut().zip(other.values) {
            *value = f(*value, rhs);
        }
        Self { values }
    }

    pub fn min(&self, other: &Coordinate) -> Self {
        self.zip_with(other, f64::min)
    }

    pub fn max(&self, other: &Coordinate) -> Self {
        self.zip_with(other, f64::max)
    }

    /// Elementwise `max(min(v, maximum), minimum)`. Never fails.
    pub fn clamped(&self, minimum: &Coordinate, maximum: &Coordinate) -> Self {
        self.min(maximum).max(minimum)
    }

    pub fn floor_div(&self, other: &Coordinate) -> Self {
        self.zip_with(other, |a, b| (a / b).floor())
    }

    /// Floored modulo: the result carries the sign of the divisor.
    pub fn modulo(&self, other: &Coordinate) -> Self {
        self.zip_with(other, |a, b| a - b * (a / b).floor())
    }

    fn all(&self, other: &Coordinate, relation: impl Fn(f64, f64) -> bool) -> bool {
        self.values
            .iter()
            .zip(other.values.iter())
            .all(|(&a, &b)| relation(a, b))
    }

    /// True only if `self > other` on every axis.
    pub fn all_gt(&self, other: &Coordinate) -> bool {
        self.all(other, |a, b| a > b)
    }

    /// True only if `self >= other` on every axis.
    pub fn all_ge(&self, other: &Coordinate) -> bool {
        self.all(other, |a, b| a >= b)
    }

    /// True only if `self < other` on every axis.
    pub fn all_lt(&self, other: &Coordinate) -> bool {
        self.all(other, |a, b| a < b)
    }

    /// True only if `self <= other` on every axis.
    pub fn all_le(&self, other: &Coordinate) -> bool {
        self.all(other, |a, b| a <= b)
    }
}

impl Default for Coordinate {
    fn default() -> Self {
        Self::zero()
    }
}

// Equality is universal too: every axis must match.
impl PartialEq for Coordinate {
    fn eq(&self, other: &Self) -> bool {
        self.all(other, |a, b| a == b)
    }
}

// NaN components never compare equal; all other values hash consistently with `eq`.
impl Eq for Coordinate {}

impl Hash for Coordinate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for value in self.values {
            let normalized = if value == 0.0 { 0.0 } else { value };
            normalized.to_bits().hash(state);
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = Axis::ALL
            .iter()
            .map(|&axis| format!("{}:{}", axis.label(), self.get(axis)))
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

impl Add for Coordinate {
    type Output = Coordinate;

    fn add(self, rhs: Coordinate) -> Coordinate {
        self.zip_with(&rhs, |a, b| a + b)
    }
}

impl Sub for Coordinate {
    type Output = Coordinate;

    fn sub(self, rhs: Coordinate) -> Coordinate {
        self.zip_with(&rhs, |a, b| a - b)
    }
}

impl Mul for Coordinate {
    type Output = Coordinate;

    fn mul(self, rhs: Coordinate) -> Coordinate {
        self.zip_with(&rhs, |a, b| a * b)
    }
}

impl Div for Coordinate {
    type Output = Coordinate;

    fn div(self, rhs: Coordinate) -> Coordinate {
        self.zip_with(&rhs, |a, b| a / b)
    }
}
