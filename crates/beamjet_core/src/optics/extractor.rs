//! Lattice functions from the one-turn map around a closed orbit.
//!
//! The normalized eigenvectors of the one-turn Jacobian at the entrance are
//! carried through the beamline by the cumulative first-order map; beta,
//! alpha and phase advance are read from their images. Dispersion follows
//! the fixed point of the map's `ndp` column, and chromaticity comes from
//! off-momentum tunes or from the second-order one-turn jet.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use tracing::{debug, info, warn};

use super::eigen::{analyze_planes, coupling_strength, PlaneEigen, StabilityReport};
use super::table::{LatticeFunctionRecord, LatticeFunctionTable, PlaneValues, RingRecord};
use crate::closed_orbit::{
    find_closed_orbit, one_turn_map, ClosedOrbit, ClosedOrbitSettings, OrbitCoordinates,
};
use crate::error::{ExtractorError, JetError};
use crate::jet::{Jet, JetEnvironment, JetVector};
use crate::phase_space::{Plane, DIMENSION, NDP, NPX, NPY, TRANSVERSE, X, Y};
use crate::traits::{Lattice, Propagate};

/// A negative phase step smaller than this is treated as roundoff.
const PHASE_ROUNDOFF: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChromaticityMethod {
    /// Centered difference of tunes at `+/- momentum_offset`.
    #[default]
    FiniteDifference,
    /// Derivative of the one-turn trace along the dispersion vector, from a
    /// second-order jet.
    JetDerivative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatticeFunctionSettings {
    /// Allowed distance of the eigenvalues from the unit circle.
    pub stability_tolerance: f64,
    /// Off-diagonal block entries above this are reported as coupling.
    pub coupling_tolerance: f64,
    /// Momentum offset of the off-momentum orbits used for chromaticity.
    pub momentum_offset: f64,
    pub chromaticity: ChromaticityMethod,
    /// Allowed drift of the eigenvector normalization along the beamline.
    pub phase_tolerance: f64,
    /// Used for the off-momentum orbits.
    pub closed_orbit: ClosedOrbitSettings,
}

impl Default for LatticeFunctionSettings {
    fn default() -> Self {
        Self {
            stability_tolerance: 1e-4,
            coupling_tolerance: 1e-10,
            momentum_offset: 5e-5,
            chromaticity: ChromaticityMethod::FiniteDifference,
            phase_tolerance: 1e-2,
            closed_orbit: ClosedOrbitSettings::default(),
        }
    }
}

impl LatticeFunctionSettings {
    pub fn validate(&self) -> Result<(), ExtractorError> {
        let positive = [
            ("stability_tolerance", self.stability_tolerance),
            ("coupling_tolerance", self.coupling_tolerance),
            ("momentum_offset", self.momentum_offset),
            ("phase_tolerance", self.phase_tolerance),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ExtractorError::InvalidArgument(format!(
                    "{name} must be positive"
                )));
            }
        }
        self.closed_orbit.validate()?;
        Ok(())
    }
}

/// Fractional tunes of both planes at the closed orbit.
pub fn compute_tunes(
    orbit: &ClosedOrbit,
    settings: &LatticeFunctionSettings,
) -> Result<PlaneValues, ExtractorError> {
    settings.validate()?;
    let report = checked_report(&orbit.one_turn_map.jacobian(), settings)?;
    tunes_of(&report)
}

pub fn compute_lattice_functions<L: Lattice>(
    lattice: &L,
    orbit: &ClosedOrbit,
    settings: &LatticeFunctionSettings,
) -> Result<LatticeFunctionTable, ExtractorError> {
    compute_lattice_functions_filtered(lattice, orbit, settings, |_, _| true)
}

/// Lattice functions recorded only at the exits of elements for which
/// `select(index, element)` holds.
pub fn compute_lattice_functions_filtered<L, F>(
    lattice: &L,
    orbit: &ClosedOrbit,
    settings: &LatticeFunctionSettings,
    mut select: F,
) -> Result<LatticeFunctionTable, ExtractorError>
where
    L: Lattice,
    F: FnMut(usize, &L::Element) -> bool,
{
    settings.validate()?;

    debug!("analyzing one-turn map");
    let jacobian = orbit.one_turn_map.jacobian();
    let report = checked_report(&jacobian, settings)?;
    let tune = tunes_of(&report)?;
    let eigenvectors = [
        embedded_eigenvector(&report.planes[0])?,
        embedded_eigenvector(&report.planes[1])?,
    ];
    let dispersion = dispersion_vector(&jacobian)?;

    debug!(method = ?settings.chromaticity, "computing chromaticity");
    let chromaticity = match settings.chromaticity {
        ChromaticityMethod::FiniteDifference => {
            finite_difference_chromaticity(lattice, orbit, &dispersion, settings)?
        }
        ChromaticityMethod::JetDerivative => {
            jet_chromaticity(lattice, orbit, &dispersion, &report)?
        }
    };

    debug!("propagating lattice functions");
    let env = JetEnvironment::new(DIMENSION, 1, orbit.state.to_vec())?;
    let mut map = JetVector::identity(&env);
    let mut phases = PhaseTracker::new(&eigenvectors);
    let start = optics_record(
        None,
        "start",
        0.0,
        &DMatrix::identity(DIMENSION, DIMENSION),
        &eigenvectors,
        &dispersion,
        &mut phases,
        settings.phase_tolerance,
    );

    let mut records = Vec::new();
    let mut arc_length = 0.0;
    for (index, element) in lattice.elements().iter().enumerate() {
        element.propagate(map.as_mut_slice());
        arc_length += element.length();
        let record = optics_record(
            Some(index),
            element.name(),
            arc_length,
            &map.jacobian(),
            &eigenvectors,
            &dispersion,
            &mut phases,
            settings.phase_tolerance,
        );
        if select(index, element) {
            records.push(record);
        }
    }

    info!(
        tune_h = tune.hor,
        tune_v = tune.ver,
        chromaticity_h = chromaticity.hor,
        chromaticity_v = chromaticity.ver,
        records = records.len(),
        "lattice functions computed"
    );
    Ok(LatticeFunctionTable {
        start,
        records,
        ring: RingRecord { tune, chromaticity },
        total_length: arc_length,
        generation: lattice.generation(),
    })
}

/// Per-plane eigen-analysis, rejecting unstable motion and integer tunes.
fn checked_report(
    jacobian: &DMatrix<f64>,
    settings: &LatticeFunctionSettings,
) -> Result<StabilityReport, ExtractorError> {
    let coupling = coupling_strength(jacobian);
    if coupling > settings.coupling_tolerance {
        warn!(coupling, "transverse planes are coupled; analyzing uncoupled blocks");
    }
    let report = analyze_planes(jacobian, settings.stability_tolerance);
    for eigen in &report.planes {
        if !eigen.stable {
            return Err(ExtractorError::UnstableMotion {
                plane: eigen.plane,
                report: Box::new(report.clone()),
            });
        }
        if eigen.tune.is_none() || eigen.eigenvector.is_none() {
            return Err(ExtractorError::IntegerTune { plane: eigen.plane });
        }
    }
    Ok(report)
}

fn tunes_of(report: &StabilityReport) -> Result<PlaneValues, ExtractorError> {
    let tune = |eigen: &PlaneEigen| {
        eigen
            .tune
            .ok_or(ExtractorError::IntegerTune { plane: eigen.plane })
    };
    Ok(PlaneValues::new(
        tune(&report.planes[0])?,
        tune(&report.planes[1])?,
    ))
}

/// The plane's normalized eigenvector as a six-component phase-space vector.
fn embedded_eigenvector(eigen: &PlaneEigen) -> Result<DVector<Complex<f64>>, ExtractorError> {
    let v = eigen
        .eigenvector
        .ok_or(ExtractorError::IntegerTune { plane: eigen.plane })?;
    let (q, p) = eigen.plane.indices();
    let mut full = DVector::zeros(DIMENSION);
    full[q] = v[0];
    full[p] = v[1];
    Ok(full)
}

/// Periodic dispersion at the entrance: solves `(T - I) d = -T[:, ndp]` on
/// the transverse block and completes it with `ndp = 1`.
fn dispersion_vector(jacobian: &DMatrix<f64>) -> Result<DVector<f64>, ExtractorError> {
    let n = TRANSVERSE.len();
    let system = DMatrix::from_fn(n, n, |r, c| {
        jacobian[(TRANSVERSE[r], TRANSVERSE[c])] - if r == c { 1.0 } else { 0.0 }
    });
    let rhs = DVector::from_fn(n, |r, _| -jacobian[(TRANSVERSE[r], NDP)]);
    let d = system
        .lu()
        .solve(&rhs)
        .ok_or(ExtractorError::Jet(JetError::SingularJacobian))?;
    let mut full = DVector::zeros(DIMENSION);
    for (k, &i) in TRANSVERSE.iter().enumerate() {
        full[i] = d[k];
    }
    full[NDP] = 1.0;
    Ok(full)
}

/// Accumulates the unwrapped phase of each plane's eigenvector image.
struct PhaseTracker {
    previous: [Complex<f64>; 2],
    total: [f64; 2],
}

impl PhaseTracker {
    fn new(eigenvectors: &[DVector<Complex<f64>>; 2]) -> Self {
        Self {
            previous: [eigenvectors[0][X], eigenvectors[1][Y]],
            total: [0.0; 2],
        }
    }

    /// Phase advance never decreases along the beamline.
    fn advance(&mut self, slot: usize, position: Complex<f64>) -> f64 {
        let mut step = (position / self.previous[slot]).arg();
        if step < -PHASE_ROUNDOFF {
            step += TAU;
        }
        self.total[slot] += step.max(0.0);
        self.previous[slot] = position;
        self.total[slot]
    }
}

#[allow(clippy::too_many_arguments)]
fn optics_record(
    element_index: Option<usize>,
    element_name: &str,
    arc_length: f64,
    cumulative: &DMatrix<f64>,
    eigenvectors: &[DVector<Complex<f64>>; 2],
    dispersion: &DVector<f64>,
    phases: &mut PhaseTracker,
    phase_tolerance: f64,
) -> LatticeFunctionRecord {
    let complex_map = cumulative.map(|v| Complex::new(v, 0.0));
    let mut beta = [0.0; 2];
    let mut alpha = [0.0; 2];
    let mut phase = [0.0; 2];
    for (slot, plane) in Plane::BOTH.into_iter().enumerate() {
        let (q, p) = plane.indices();
        let image = &complex_map * &eigenvectors[slot];
        let (w_q, w_p) = (image[q], image[p]);
        let product = w_p * w_q.conj();
        if (product.im - 1.0).abs() > phase_tolerance {
            warn!(
                element = element_name,
                %plane,
                normalization = product.im,
                "eigenvector normalization drifted"
            );
        }
        beta[slot] = w_q.norm_sqr();
        alpha[slot] = -product.re;
        phase[slot] = phases.advance(slot, w_q);
    }

    let eta = cumulative * dispersion;
    LatticeFunctionRecord {
        element_index,
        element_name: element_name.to_string(),
        arc_length,
        dispersion: PlaneValues::new(eta[X], eta[Y]),
        dispersion_prime: PlaneValues::new(eta[NPX], eta[NPY]),
        beta: PlaneValues::new(beta[0], beta[1]),
        alpha: PlaneValues::new(alpha[0], alpha[1]),
        phase_advance: PlaneValues::new(phase[0], phase[1]),
    }
}

/// Tune difference folded into `(-0.5, 0.5]`.
fn wrap_tune_difference(difference: f64) -> f64 {
    let wrapped = difference - difference.round();
    if wrapped <= -0.5 {
        wrapped + 1.0
    } else {
        wrapped
    }
}

fn finite_difference_chromaticity<L: Lattice>(
    lattice: &L,
    orbit: &ClosedOrbit,
    dispersion: &DVector<f64>,
    settings: &LatticeFunctionSettings,
) -> Result<PlaneValues, ExtractorError> {
    let delta = settings.momentum_offset;
    // The momentum offset is imposed, never solved for.
    let orbit_settings = ClosedOrbitSettings {
        coordinates: OrbitCoordinates::Transverse,
        ..settings.closed_orbit.clone()
    };

    let mut shifted = Vec::with_capacity(2);
    for sign in [1.0, -1.0] {
        let guess: Vec<f64> = (0..DIMENSION)
            .map(|i| orbit.state[i] + sign * delta * dispersion[i])
            .collect();
        let off_momentum = find_closed_orbit(lattice, &guess, &orbit_settings)?;
        let report = checked_report(&off_momentum.one_turn_map.jacobian(), settings)?;
        shifted.push(tunes_of(&report)?);
    }

    let slope = |plane: Plane| {
        wrap_tune_difference(shifted[0].get(plane) - shifted[1].get(plane)) / (2.0 * delta)
    };
    Ok(PlaneValues::new(
        slope(Plane::Horizontal),
        slope(Plane::Vertical),
    ))
}

fn jet_chromaticity<L: Lattice>(
    lattice: &L,
    orbit: &ClosedOrbit,
    dispersion: &DVector<f64>,
    report: &StabilityReport,
) -> Result<PlaneValues, ExtractorError> {
    let map = one_turn_map(lattice, &orbit.state, 2)?;
    let mut xi = [0.0; 2];
    for (slot, eigen) in xi.iter_mut().zip(&report.planes) {
        let (q, p) = eigen.plane.indices();
        // d trace / d delta along the dispersion direction.
        let trace_slope: f64 = (0..DIMENSION)
            .filter(|&k| dispersion[k] != 0.0)
            .map(|k| {
                dispersion[k]
                    * (second_derivative(&map[q], q, k) + second_derivative(&map[p], p, k))
            })
            .sum();
        *slot = -trace_slope / (2.0 * eigen.sin_mu) / TAU;
    }
    Ok(PlaneValues::new(xi[0], xi[1]))
}

fn second_derivative(jet: &Jet<f64>, a: usize, b: usize) -> f64 {
    let mut exponents = [0u32; DIMENSION];
    exponents[a] += 1;
    exponents[b] += 1;
    jet.derivative(&exponents)
}
