//! Compile-time unit safety for power system quantities.
//!
//! Study code moves active power (MW), reactive power (Mvar), apparent power
//! (MVA) and per-unit voltages through the same call chains. Raw `f64`s make
//! it easy to hand a Mvar value to a MW parameter; these newtype wrappers
//! catch that at compile time with zero runtime overhead
//! (`#[repr(transparent)]`).

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Neg, Sub};

macro_rules! impl_unit_ops {
    ($type:ty, $suffix:literal) => {
        impl Add for $type {
            type Output = Self;
            fn add(self, rhs: Self) -> Self::Output {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $type {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self::Output {
                Self(self.0 - rhs.0)
            }
        }

        impl Neg for $type {
            type Output = Self;
            fn neg(self) -> Self::Output {
                Self(-self.0)
            }
        }

        impl Mul<f64> for $type {
            type Output = Self;
            fn mul(self, rhs: f64) -> Self::Output {
                Self(self.0 * rhs)
            }
        }

        impl Div<f64> for $type {
            type Output = Self;
            fn div(self, rhs: f64) -> Self::Output {
                Self(self.0 / rhs)
            }
        }

        impl $type {
            /// Raw numeric value.
            #[inline]
            pub fn value(&self) -> f64 {
                self.0
            }

            #[inline]
            pub fn abs(&self) -> Self {
                Self(self.0.abs())
            }
        }

        impl std::fmt::Display for $type {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:.4} {}", self.0, $suffix)
            }
        }
    };
}

/// Active power in megawatts.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Megawatts(pub f64);

/// Reactive power in megavars.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Megavars(pub f64);

/// Apparent power in megavolt-amperes (machine nameplate ratings).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct MegavoltAmperes(pub f64);

/// Per-unit voltage magnitude.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct PerUnit(pub f64);

impl Default for PerUnit {
    fn default() -> Self {
        PerUnit(1.0)
    }
}

impl_unit_ops!(Megawatts, "MW");
impl_unit_ops!(Megavars, "Mvar");
impl_unit_ops!(MegavoltAmperes, "MVA");
impl_unit_ops!(PerUnit, "pu");

impl MegavoltAmperes {
    /// Apparent power from an active/reactive pair: `S = sqrt(P^2 + Q^2)`.
    pub fn from_pq(p: Megawatts, q: Megavars) -> Self {
        MegavoltAmperes(p.value().hypot(q.value()))
    }
}
