//! Error types for series arithmetic, the closed-orbit solver and the
//! lattice-function extractor.

use thiserror::Error;

use crate::optics::eigen::StabilityReport;
use crate::phase_space::Plane;

/// Errors raised by the jet algebra.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JetError {
    /// Operands were built in different environments.
    #[error("jet environments do not match")]
    EnvironmentMismatch,

    #[error("division by a jet whose standard part is zero")]
    DivisionByZeroStandardPart,

    /// The linear part of a map is not invertible.
    #[error("Jacobian is singular")]
    SingularJacobian,

    #[error("{function} is undefined at standard part {value}")]
    DomainError { function: &'static str, value: f64 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Errors raised while searching for a closed orbit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `J - I` could not be inverted, e.g. at an integer tune.
    #[error("one-turn Jacobian minus identity is singular (iteration {iteration})")]
    SingularJacobian { iteration: usize },

    /// The iteration cap was reached; `best_estimate` is the last iterate.
    #[error("closed orbit did not converge in {iterations} iterations")]
    ConvergenceFailure {
        best_estimate: Vec<f64>,
        iterations: usize,
    },

    #[error("phase-space coordinate {coordinate} became non-finite (iteration {iteration})")]
    NonFiniteState { coordinate: usize, iteration: usize },

    /// A candidate orbit does not return onto itself.
    #[error("orbit deviates by {deviation:e} after one turn (tolerance {tolerance:e})")]
    NotClosed { deviation: f64, tolerance: f64 },

    #[error(transparent)]
    Jet(#[from] JetError),
}

/// Errors raised while extracting lattice functions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractorError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Eigenvalues left the unit circle; the report holds both planes.
    #[error("{plane} motion is linearly unstable")]
    UnstableMotion {
        plane: Plane,
        report: Box<StabilityReport>,
    },

    /// sin(mu) vanished: integer or half-integer tune.
    #[error("{plane} tune is an integer or half-integer")]
    IntegerTune { plane: Plane },

    #[error(transparent)]
    ClosedOrbit(#[from] SolverError),

    #[error(transparent)]
    Jet(#[from] JetError),
}

/// Errors raised when editing a beamline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BeamlineError {
    #[error("element index {index} out of range for {len} elements")]
    IndexOutOfRange { index: usize, len: usize },

    /// Markers and kickers have no single strength parameter.
    #[error("element `{name}` has no adjustable strength")]
    NoStrength { name: String },
}
