//! Phase-space layout shared by particles, maps and the optics code.
//!
//! Coordinates are ordered `x, y, cdt, npx, npy, ndp`: transverse positions,
//! longitudinal lag, transverse momenta normalized to the reference
//! momentum, and the fractional momentum offset.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const DIMENSION: usize = 6;

pub const X: usize = 0;
pub const Y: usize = 1;
pub const CDT: usize = 2;
pub const NPX: usize = 3;
pub const NPY: usize = 4;
pub const NDP: usize = 5;

/// Transverse coordinates in solver order.
pub const TRANSVERSE: [usize; 4] = [X, NPX, Y, NPY];

pub const ALL: [usize; DIMENSION] = [X, Y, CDT, NPX, NPY, NDP];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Plane {
    Horizontal,
    Vertical,
}

impl Plane {
    pub const BOTH: [Plane; 2] = [Plane::Horizontal, Plane::Vertical];

    /// Position and momentum indices of the plane.
    pub fn indices(self) -> (usize, usize) {
        match self {
            Plane::Horizontal => (X, NPX),
            Plane::Vertical => (Y, NPY),
        }
    }
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plane::Horizontal => write!(f, "horizontal"),
            Plane::Vertical => write!(f, "vertical"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transverse_indices_cover_both_planes() {
        let mut seen: Vec<usize> = Plane::BOTH
            .iter()
            .flat_map(|p| {
                let (q, p) = p.indices();
                [q, p]
            })
            .collect();
        seen.sort_unstable();
        let mut expected = TRANSVERSE.to_vec();
        expected.sort_unstable();
        assert_eq!(seen, expected);
    }
}
