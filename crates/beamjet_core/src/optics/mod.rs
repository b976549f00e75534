//! Linear optics around a closed orbit: tunes, beta and alpha functions,
//! phase advance, dispersion and chromaticity.

pub mod cache;
pub mod eigen;
pub mod extractor;
pub mod table;

pub use cache::OpticsCache;
pub use eigen::{PlaneEigen, StabilityReport};
pub use extractor::{
    compute_lattice_functions, compute_lattice_functions_filtered, compute_tunes,
    ChromaticityMethod, LatticeFunctionSettings,
};
pub use table::{LatticeFunctionRecord, LatticeFunctionTable, PlaneValues, RingRecord};
