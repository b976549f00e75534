//! Eigen-analysis of the transverse 2x2 blocks of a one-turn Jacobian.

use nalgebra::linalg::SVD;
use nalgebra::DMatrix;
use num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

use crate::phase_space::{Plane, NPX, NPY, X, Y};

/// `|sin(mu)|` below which a plane sits on an integer or half-integer tune.
const SIN_MU_LIMIT: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaneEigen {
    pub plane: Plane,
    pub eigenvalues: [Complex<f64>; 2],
    /// Half the trace of the block.
    pub cos_mu: f64,
    /// Imaginary part of the eigenvalue selected by the sign of `M12`.
    pub sin_mu: f64,
    /// Fractional tune in `[0, 1)`; `None` unless the motion is stable and
    /// the tune is not an integer or half-integer.
    pub tune: Option<f64>,
    /// Eigenvector `(x, px)` scaled so that `Im(conj(v_x) v_px) = 1` with
    /// `v_x` real and positive.
    pub eigenvector: Option<[Complex<f64>; 2]>,
    pub stable: bool,
}

impl PlaneEigen {
    pub fn beta(&self) -> Option<f64> {
        self.eigenvector.map(|v| v[0].norm_sqr())
    }

    pub fn alpha(&self) -> Option<f64> {
        self.eigenvector.map(|v| -(v[1] * v[0].conj()).re)
    }
}

/// Eigen data of both transverse planes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityReport {
    pub planes: [PlaneEigen; 2],
}

impl StabilityReport {
    pub fn plane(&self, plane: Plane) -> &PlaneEigen {
        match plane {
            Plane::Horizontal => &self.planes[0],
            Plane::Vertical => &self.planes[1],
        }
    }

    pub fn is_stable(&self) -> bool {
        self.planes.iter().all(|p| p.stable)
    }
}

pub fn analyze_planes(jacobian: &DMatrix<f64>, tolerance: f64) -> StabilityReport {
    StabilityReport {
        planes: [
            analyze_plane(jacobian, Plane::Horizontal, tolerance),
            analyze_plane(jacobian, Plane::Vertical, tolerance),
        ],
    }
}

/// Largest entry of the off-diagonal transverse blocks.
pub fn coupling_strength(jacobian: &DMatrix<f64>) -> f64 {
    let mut strength: f64 = 0.0;
    for &a in &[X, NPX] {
        for &b in &[Y, NPY] {
            strength = strength
                .max(jacobian[(a, b)].abs())
                .max(jacobian[(b, a)].abs());
        }
    }
    strength
}

/// Eigenvalues, tune and normalized eigenvector of one plane's block.
///
/// Motion is stable when both eigenvalues lie within `tolerance` of the unit
/// circle and form a conjugate pair.
pub fn analyze_plane(jacobian: &DMatrix<f64>, plane: Plane, tolerance: f64) -> PlaneEigen {
    let (q, p) = plane.indices();
    let idx = [q, p];
    let block = DMatrix::from_fn(2, 2, |r, c| jacobian[(idx[r], idx[c])]);
    let cos_mu = 0.5 * block.trace();
    let m12 = block[(0, 1)];

    let values = block.complex_eigenvalues();
    let eigenvalues = [values[0], values[1]];
    let on_circle = eigenvalues
        .iter()
        .all(|l| (l.norm() - 1.0).abs() <= tolerance);
    let conjugate = (eigenvalues[0] - eigenvalues[1].conj()).norm() <= tolerance;
    let stable = on_circle && conjugate;

    let lambda = if eigenvalues[0].im * m12 >= 0.0 {
        eigenvalues[0]
    } else {
        eigenvalues[1]
    };
    let sin_mu = lambda.im;

    let (tune, eigenvector) = if stable && sin_mu.abs() > SIN_MU_LIMIT {
        let tune = (lambda.arg() / TAU).rem_euclid(1.0);
        (Some(tune), null_vector(&block, lambda).and_then(normalize))
    } else {
        (None, None)
    };

    PlaneEigen {
        plane,
        eigenvalues,
        cos_mu,
        sin_mu,
        tune,
        eigenvector,
        stable,
    }
}

/// Null vector of `block - lambda I`: the right singular vector of the
/// smallest singular value.
fn null_vector(block: &DMatrix<f64>, lambda: Complex<f64>) -> Option<[Complex<f64>; 2]> {
    let mut shifted = block.map(|v| Complex::new(v, 0.0));
    for i in 0..2 {
        shifted[(i, i)] -= lambda;
    }
    let svd = SVD::new(shifted, false, true);
    let v_t = svd.v_t?;
    let row = svd.singular_values.imin();
    // Rows of V^H hold conjugated singular vectors.
    Some([v_t[(row, 0)].conj(), v_t[(row, 1)].conj()])
}

fn normalize(v: [Complex<f64>; 2]) -> Option<[Complex<f64>; 2]> {
    let magnitude = v[0].norm();
    if magnitude == 0.0 || !magnitude.is_finite() {
        return None;
    }
    let rotation = v[0].conj() / magnitude;
    let (x, px) = (v[0] * rotation, v[1] * rotation);
    let wronskian = (x.conj() * px).im;
    if wronskian <= 0.0 {
        return None;
    }
    let scale = wronskian.sqrt().recip();
    Some([x * scale, px * scale])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase_space::DIMENSION;
    use approx::assert_relative_eq;

    fn twiss_matrix(mu: f64, beta: f64, alpha: f64) -> DMatrix<f64> {
        let gamma = (1.0 + alpha * alpha) / beta;
        let (s, c) = mu.sin_cos();
        let mut m = DMatrix::identity(DIMENSION, DIMENSION);
        m[(X, X)] = c + alpha * s;
        m[(X, NPX)] = beta * s;
        m[(NPX, X)] = -gamma * s;
        m[(NPX, NPX)] = c - alpha * s;
        m
    }

    #[test]
    fn twiss_parameters_are_recovered() {
        let m = twiss_matrix(0.9, 4.2, -1.3);
        let eigen = analyze_plane(&m, Plane::Horizontal, 1e-6);
        assert!(eigen.stable);
        assert_relative_eq!(eigen.tune.unwrap(), 0.9 / TAU, epsilon = 1e-12);
        assert_relative_eq!(eigen.beta().unwrap(), 4.2, max_relative = 1e-10);
        assert_relative_eq!(eigen.alpha().unwrap(), -1.3, max_relative = 1e-10);
        let v = eigen.eigenvector.unwrap();
        assert_relative_eq!(v[0].im, 0.0, epsilon = 1e-14);
        assert_relative_eq!((v[0].conj() * v[1]).im, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn phase_advance_above_half_turn_folds_into_unit_interval() {
        let m = twiss_matrix(4.0, 2.0, 0.5);
        let eigen = analyze_plane(&m, Plane::Horizontal, 1e-6);
        assert_relative_eq!(eigen.tune.unwrap(), 4.0 / TAU, epsilon = 1e-12);
        assert!(eigen.sin_mu < 0.0);
        assert_relative_eq!(eigen.beta().unwrap(), 2.0, max_relative = 1e-10);
    }

    #[test]
    fn hyperbolic_block_is_unstable() {
        let mut m = DMatrix::identity(DIMENSION, DIMENSION);
        m[(Y, Y)] = 2.0;
        m[(NPY, NPY)] = 0.5;
        let report = analyze_planes(&m, 1e-4);
        assert!(!report.is_stable());
        let vertical = report.plane(Plane::Vertical);
        assert!(!vertical.stable);
        assert!(vertical.tune.is_none());
    }

    #[test]
    fn identity_block_has_no_tune() {
        let m = DMatrix::identity(DIMENSION, DIMENSION);
        let eigen = analyze_plane(&m, Plane::Horizontal, 1e-4);
        assert!(eigen.stable);
        assert!(eigen.tune.is_none());
        assert!(eigen.eigenvector.is_none());
    }

    #[test]
    fn coupling_strength_reads_off_diagonal_blocks() {
        let mut m = DMatrix::identity(DIMENSION, DIMENSION);
        assert_eq!(coupling_strength(&m), 0.0);
        m[(NPY, X)] = -3e-3;
        m[(X, NPX)] = 10.0;
        assert_eq!(coupling_strength(&m), 3e-3);
    }
}
