use nalgebra::ComplexField;
use std::fmt::Debug;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A trait for types that can be used as jet coefficients.
/// Real (`f64`) and complex (`Complex<f64>`) scalars both qualify.
pub trait Coefficient: ComplexField<RealField = f64> + Copy {}

impl<T: ComplexField<RealField = f64> + Copy> Coefficient for T {}

/// Arithmetic shared by concrete phase-space coordinates (`f64`) and
/// truncated power series (`Jet<f64>`), so that one propagation routine
/// serves both particles and maps.
pub trait Coordinate:
    Clone
    + Debug
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + Add<f64, Output = Self>
    + Sub<f64, Output = Self>
    + Mul<f64, Output = Self>
    + Div<f64, Output = Self>
{
    /// Value at the expansion point (the coordinate itself for `f64`).
    fn value(&self) -> f64;
    fn sqrt(&self) -> Self;
    fn sin(&self) -> Self;
    fn cos(&self) -> Self;
    fn powi(&self, n: i32) -> Self;
}

impl Coordinate for f64 {
    fn value(&self) -> f64 {
        *self
    }
    fn sqrt(&self) -> Self {
        f64::sqrt(*self)
    }
    fn sin(&self) -> Self {
        f64::sin(*self)
    }
    fn cos(&self) -> Self {
        f64::cos(*self)
    }
    fn powi(&self, n: i32) -> Self {
        f64::powi(*self, n)
    }
}

/// A beamline element: anything that maps a phase-space state in place.
pub trait Propagate {
    fn name(&self) -> &str;

    /// Design length of the element in meters.
    fn length(&self) -> f64;

    /// Transports `state` (at least six coordinates) through the element.
    fn propagate<S: Coordinate>(&self, state: &mut [S]);
}

/// An ordered sequence of elements forming a beamline or ring.
pub trait Lattice {
    type Element: Propagate;

    fn elements(&self) -> &[Self::Element];

    /// Configuration generation. Changes whenever strengths, lengths or
    /// alignment change, so derived optics can be cached against it.
    fn generation(&self) -> u64 {
        0
    }

    /// Applies every element in order.
    fn propagate<S: Coordinate>(&self, state: &mut [S]) {
        for element in self.elements() {
            element.propagate(state);
        }
    }

    fn total_length(&self) -> f64 {
        self.elements().iter().map(|e| e.length()).sum()
    }
}
