use tracing::debug;

use super::extractor::{compute_lattice_functions, LatticeFunctionSettings};
use super::table::LatticeFunctionTable;
use crate::closed_orbit::{find_closed_orbit, ClosedOrbit};
use crate::error::ExtractorError;
use crate::traits::Lattice;

#[derive(Debug, Clone)]
struct CachedOptics {
    generation: u64,
    orbit: ClosedOrbit,
    table: LatticeFunctionTable,
}

/// Closed orbit and lattice functions of the last lattice configuration
/// seen, recomputed when the lattice generation changes.
///
/// Lattices that keep the default generation are never seen to change;
/// call [`OpticsCache::invalidate`] after editing them.
#[derive(Debug, Clone, Default)]
pub struct OpticsCache {
    settings: LatticeFunctionSettings,
    entry: Option<CachedOptics>,
}

impl OpticsCache {
    pub fn new(settings: LatticeFunctionSettings) -> Self {
        Self {
            settings,
            entry: None,
        }
    }

    pub fn settings(&self) -> &LatticeFunctionSettings {
        &self.settings
    }

    /// Replaces the settings and drops the cached results.
    pub fn set_settings(&mut self, settings: LatticeFunctionSettings) {
        self.settings = settings;
        self.invalidate();
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    pub fn is_current<L: Lattice>(&self, lattice: &L) -> bool {
        matches!(&self.entry, Some(entry) if entry.generation == lattice.generation())
    }

    pub fn closed_orbit<L: Lattice>(
        &mut self,
        lattice: &L,
        guess: &[f64],
    ) -> Result<&ClosedOrbit, ExtractorError> {
        Ok(&self.refresh(lattice, guess)?.orbit)
    }

    pub fn lattice_functions<L: Lattice>(
        &mut self,
        lattice: &L,
        guess: &[f64],
    ) -> Result<&LatticeFunctionTable, ExtractorError> {
        Ok(&self.refresh(lattice, guess)?.table)
    }

    fn refresh<L: Lattice>(
        &mut self,
        lattice: &L,
        guess: &[f64],
    ) -> Result<&CachedOptics, ExtractorError> {
        let generation = lattice.generation();
        let entry = match self.entry.take() {
            Some(entry) if entry.generation == generation => entry,
            _ => {
                debug!(generation, "recomputing optics");
                let orbit = find_closed_orbit(lattice, guess, &self.settings.closed_orbit)?;
                let table = compute_lattice_functions(lattice, &orbit, &self.settings)?;
                CachedOptics {
                    generation,
                    orbit,
                    table,
                }
            }
        };
        Ok(self.entry.insert(entry))
    }
}
