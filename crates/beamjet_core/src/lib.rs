//! The `beamjet_core` crate provides the numerical engine for beamline optics.
//! Transport through a beamline is expanded as a truncated multivariate Taylor
//! series, which drives a Newton search for the closed orbit and the linear
//! optics extracted around it.
//!
//! Key components:
//! - **Jets**: `JetEnvironment`, `Jet`, `JetVector` (truncated power series
//!   and maps; composition, inversion, Jacobians).
//! - **Traits**: `Coordinate` (shared arithmetic of `f64` and jets),
//!   `Propagate` and `Lattice` (elements and beamlines).
//! - **Closed orbit**: fixed point of the one-turn map.
//! - **Optics**: tunes, beta/alpha functions, phase advance, dispersion and
//!   chromaticity, with a generation-keyed cache.
pub mod beamline;
pub mod closed_orbit;
pub mod error;
pub mod jet;
pub mod optics;
pub mod phase_space;
pub mod traits;

pub use beamline::{Beamline, Element, ElementKind};
pub use closed_orbit::{
    find_closed_orbit, find_closed_orbit_with_snapshots, one_turn_map, verify_closed_orbit,
    ClosedOrbit, ClosedOrbitSettings, JacobianUpdate, OrbitCoordinates, OrbitSnapshot,
};
pub use error::{BeamlineError, ExtractorError, JetError, SolverError};
pub use jet::{Jet, JetEnvironment, JetVector};
pub use optics::{
    compute_lattice_functions, compute_lattice_functions_filtered, compute_tunes,
    LatticeFunctionSettings, LatticeFunctionTable, OpticsCache,
};
