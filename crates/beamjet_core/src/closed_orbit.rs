//! Newton search for the closed orbit of a ring: the fixed point `z = M(z)`
//! of its one-turn map.
//!
//! Each pass linearizes the lattice around the current estimate with
//! first-order jets, tracks the estimate once around the ring and applies
//! `z <- z + (J - I)^{-1} (z - M(z))` on the active coordinates.

use nalgebra::{DMatrix, DVector, Dyn, LU};
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::error::{JetError, SolverError};
use crate::jet::{JetEnvironment, JetVector};
use crate::phase_space::{ALL, DIMENSION, TRANSVERSE};
use crate::traits::{Lattice, Propagate};

/// Smallest-to-largest singular value ratio of `J - I` treated as singular.
const SINGULAR_RATIO: f64 = 1e-12;

/// Which coordinates the solver adjusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OrbitCoordinates {
    /// `x, npx, y, npy`; `cdt` and `ndp` stay at the initial guess.
    #[default]
    Transverse,
    /// All six coordinates. Needs longitudinal focusing, otherwise the
    /// `cdt` column of `J - I` vanishes.
    Full,
}

impl OrbitCoordinates {
    pub fn indices(self) -> &'static [usize] {
        match self {
            OrbitCoordinates::Transverse => &TRANSVERSE,
            OrbitCoordinates::Full => &ALL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JacobianUpdate {
    #[default]
    EveryIteration,
    /// Linearize at the initial guess only (chord method).
    Once,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClosedOrbitSettings {
    pub max_iterations: usize,
    /// Relative change per coordinate below which the orbit is closed.
    pub jump_scale: [f64; DIMENSION],
    /// Magnitude per coordinate below which it is treated as zero.
    pub zero_scale: [f64; DIMENSION],
    pub coordinates: OrbitCoordinates,
    pub jacobian_update: JacobianUpdate,
    pub jet_order: usize,
}

impl Default for ClosedOrbitSettings {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            jump_scale: [1e-9; DIMENSION],
            zero_scale: [1e-9; DIMENSION],
            coordinates: OrbitCoordinates::Transverse,
            jacobian_update: JacobianUpdate::EveryIteration,
            jet_order: 1,
        }
    }
}

impl ClosedOrbitSettings {
    pub fn validate(&self) -> Result<(), SolverError> {
        if self.max_iterations == 0 {
            return Err(invalid("max_iterations must be greater than zero"));
        }
        if self.jet_order == 0 {
            return Err(invalid("jet_order must be at least 1"));
        }
        if self.jump_scale.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(invalid("jump_scale entries must be positive"));
        }
        if self.zero_scale.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(invalid("zero_scale entries must be non-negative"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> SolverError {
    SolverError::InvalidArgument(message.to_string())
}

/// Orbit coordinates at the exit of a selected element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrbitSnapshot {
    pub element_index: usize,
    pub element_name: String,
    pub arc_length: f64,
    pub state: [f64; DIMENSION],
}

#[derive(Debug, Clone, Serialize)]
pub struct ClosedOrbit {
    pub state: [f64; DIMENSION],
    /// Newton passes, including the one that detected convergence.
    pub iterations: usize,
    /// Largest `|z_i - M(z)_i|` over the active coordinates.
    pub residual: f64,
    pub coordinates: OrbitCoordinates,
    /// One-turn map expanded around `state`.
    #[serde(serialize_with = "serialize_map")]
    pub one_turn_map: JetVector<f64>,
    pub snapshots: Vec<OrbitSnapshot>,
}

fn serialize_map<S: Serializer>(map: &JetVector<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    let terms: Vec<_> = map.iter().map(|jet| jet.to_terms()).collect();
    terms.serialize(serializer)
}

/// Expands the lattice's transport map to `order` around `state`.
pub fn one_turn_map<L: Lattice>(
    lattice: &L,
    state: &[f64],
    order: usize,
) -> Result<JetVector<f64>, JetError> {
    let env = JetEnvironment::new(DIMENSION, order, state.to_vec())?;
    let mut map = JetVector::identity(&env);
    lattice.propagate(map.as_mut_slice());
    Ok(map)
}

pub fn find_closed_orbit<L: Lattice>(
    lattice: &L,
    initial_guess: &[f64],
    settings: &ClosedOrbitSettings,
) -> Result<ClosedOrbit, SolverError> {
    find_closed_orbit_with_snapshots(lattice, initial_guess, settings, |_, _| false)
}

/// Like [`find_closed_orbit`], additionally recording the orbit after every
/// element for which `select(index, element)` holds.
pub fn find_closed_orbit_with_snapshots<L, F>(
    lattice: &L,
    initial_guess: &[f64],
    settings: &ClosedOrbitSettings,
    mut select: F,
) -> Result<ClosedOrbit, SolverError>
where
    L: Lattice,
    F: FnMut(usize, &L::Element) -> bool,
{
    settings.validate()?;
    let mut state = to_state(initial_guess)?;
    if let Some(coordinate) = state.iter().position(|v| !v.is_finite()) {
        return Err(invalid(&format!(
            "initial guess coordinate {} is not finite",
            coordinate
        )));
    }

    let active = settings.coordinates.indices();
    let mut linearization: Option<(LU<f64, Dyn, Dyn>, JetVector<f64>)> = None;
    let mut iterations = 0usize;
    let residual;

    loop {
        if iterations >= settings.max_iterations {
            warn!(iterations, "closed orbit search hit the iteration cap");
            return Err(SolverError::ConvergenceFailure {
                best_estimate: state.to_vec(),
                iterations,
            });
        }
        iterations += 1;

        if linearization.is_none() || settings.jacobian_update == JacobianUpdate::EveryIteration {
            linearization = Some(linearize(
                lattice,
                &state,
                active,
                settings.jet_order,
                iterations,
            )?);
        }

        let mut image = state;
        lattice.propagate(&mut image[..]);
        if let Some(coordinate) = image.iter().position(|v| !v.is_finite()) {
            return Err(SolverError::NonFiniteState {
                coordinate,
                iteration: iterations,
            });
        }

        let eps = DVector::from_iterator(active.len(), active.iter().map(|&i| state[i] - image[i]));
        let step_residual = eps.amax();
        debug!(iteration = iterations, residual = step_residual, "closed orbit iteration");

        let moving = active.iter().any(|&i| {
            let scale = state[i].abs().max(image[i].abs());
            scale > settings.zero_scale[i]
                && (state[i] - image[i]).abs() > settings.jump_scale[i] * scale
        });
        if !moving {
            residual = step_residual;
            break;
        }

        let delta = linearization
            .as_ref()
            .and_then(|(lu, _)| lu.solve(&eps))
            .ok_or(SolverError::SingularJacobian {
                iteration: iterations,
            })?;
        for (k, &i) in active.iter().enumerate() {
            state[i] += delta[k];
        }
    }

    let one_turn_map = match linearization {
        Some((_, map)) if map.env().reference() == &state[..] => map,
        _ => one_turn_map(lattice, &state, settings.jet_order)?,
    };

    let mut snapshots = Vec::new();
    let mut particle = state;
    let mut arc_length = 0.0;
    for (index, element) in lattice.elements().iter().enumerate() {
        element.propagate(&mut particle[..]);
        arc_length += element.length();
        if select(index, element) {
            snapshots.push(OrbitSnapshot {
                element_index: index,
                element_name: element.name().to_string(),
                arc_length,
                state: particle,
            });
        }
    }

    info!(iterations, residual, "closed orbit converged");
    Ok(ClosedOrbit {
        state,
        iterations,
        residual,
        coordinates: settings.coordinates,
        one_turn_map,
        snapshots,
    })
}

/// Tracks `state` once around the lattice and returns the largest deviation
/// on `coordinates`, or `NotClosed` when it exceeds `tolerance`.
pub fn verify_closed_orbit<L: Lattice>(
    lattice: &L,
    state: &[f64],
    coordinates: OrbitCoordinates,
    tolerance: f64,
) -> Result<f64, SolverError> {
    let start = to_state(state)?;
    let mut image = start;
    lattice.propagate(&mut image[..]);
    let deviation = coordinates
        .indices()
        .iter()
        .map(|&i| (image[i] - start[i]).abs())
        .fold(0.0, f64::max);
    if !(deviation <= tolerance) {
        warn!(deviation, tolerance, "orbit does not close on itself");
        return Err(SolverError::NotClosed {
            deviation,
            tolerance,
        });
    }
    Ok(deviation)
}

fn to_state(values: &[f64]) -> Result<[f64; DIMENSION], SolverError> {
    <[f64; DIMENSION]>::try_from(values).map_err(|_| {
        invalid(&format!(
            "state has {} coordinates, expected {}",
            values.len(),
            DIMENSION
        ))
    })
}

/// LU factors of `J - I` restricted to `active`, together with the map the
/// Jacobian was read from.
fn linearize<L: Lattice>(
    lattice: &L,
    state: &[f64; DIMENSION],
    active: &[usize],
    order: usize,
    iteration: usize,
) -> Result<(LU<f64, Dyn, Dyn>, JetVector<f64>), SolverError> {
    let map = one_turn_map(lattice, state, order)?;
    let jacobian = map.jacobian();
    if let Some(row) = (0..DIMENSION).find(|&r| jacobian.row(r).iter().any(|v| !v.is_finite())) {
        return Err(SolverError::NonFiniteState {
            coordinate: row,
            iteration,
        });
    }

    let n = active.len();
    let shifted = DMatrix::from_fn(n, n, |r, c| {
        jacobian[(active[r], active[c])] - if r == c { 1.0 } else { 0.0 }
    });
    let singular_values = shifted.singular_values();
    let largest = singular_values.max();
    let smallest = singular_values.min();
    if smallest < SINGULAR_RATIO * largest.max(1.0) {
        return Err(SolverError::SingularJacobian { iteration });
    }
    Ok((shifted.lu(), map))
}
