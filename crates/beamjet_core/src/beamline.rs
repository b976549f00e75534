//! Minimal element library and beamline container.
//!
//! Elements transport a phase-space state `x, y, cdt, npx, npy, ndp` and
//! are generic over [`Coordinate`], so one routine serves particles and
//! jets. Magnets are thin kicks; drifts are exact.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::BeamlineError;
use crate::phase_space::{CDT, NDP, NPX, NPY, X, Y};
use crate::traits::{Coordinate, Lattice, Propagate};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn fresh_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ElementKind {
    Marker,
    Drift {
        length: f64,
    },
    /// Integrated gradient `k1l` (1/m) with a transverse misalignment.
    ThinQuadrupole {
        k1l: f64,
        #[serde(default)]
        x_offset: f64,
        #[serde(default)]
        y_offset: f64,
    },
    ThinSextupole {
        k2l: f64,
    },
    /// Bending angle of a thin sector dipole; acts only on off-momentum
    /// particles (dispersion source) and on the path length.
    ThinBend {
        angle: f64,
    },
    Kicker {
        hkick: f64,
        vkick: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub name: String,
    pub kind: ElementKind,
}

impl Element {
    pub fn new(name: impl Into<String>, kind: ElementKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn marker(name: impl Into<String>) -> Self {
        Self::new(name, ElementKind::Marker)
    }

    pub fn drift(name: impl Into<String>, length: f64) -> Self {
        Self::new(name, ElementKind::Drift { length })
    }

    pub fn quadrupole(name: impl Into<String>, k1l: f64) -> Self {
        Self::new(
            name,
            ElementKind::ThinQuadrupole {
                k1l,
                x_offset: 0.0,
                y_offset: 0.0,
            },
        )
    }

    pub fn sextupole(name: impl Into<String>, k2l: f64) -> Self {
        Self::new(name, ElementKind::ThinSextupole { k2l })
    }

    pub fn bend(name: impl Into<String>, angle: f64) -> Self {
        Self::new(name, ElementKind::ThinBend { angle })
    }

    pub fn kicker(name: impl Into<String>, hkick: f64, vkick: f64) -> Self {
        Self::new(name, ElementKind::Kicker { hkick, vkick })
    }

    /// The element's main strength parameter, if it has one.
    pub fn strength(&self) -> Option<f64> {
        match self.kind {
            ElementKind::Drift { length } => Some(length),
            ElementKind::ThinQuadrupole { k1l, .. } => Some(k1l),
            ElementKind::ThinSextupole { k2l } => Some(k2l),
            ElementKind::ThinBend { angle } => Some(angle),
            ElementKind::Marker | ElementKind::Kicker { .. } => None,
        }
    }
}

impl Propagate for Element {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> f64 {
        match self.kind {
            ElementKind::Drift { length } => length,
            _ => 0.0,
        }
    }

    fn propagate<S: Coordinate>(&self, state: &mut [S]) {
        match self.kind {
            ElementKind::Marker => {}
            ElementKind::Drift { length } => {
                if length == 0.0 {
                    return;
                }
                let p = state[NDP].clone() + 1.0;
                let pz = (p.powi(2) - state[NPX].powi(2) - state[NPY].powi(2)).sqrt();
                state[X] = state[X].clone() + state[NPX].clone() / pz.clone() * length;
                state[Y] = state[Y].clone() + state[NPY].clone() / pz.clone() * length;
                state[CDT] = state[CDT].clone() + (p / pz - 1.0) * length;
            }
            ElementKind::ThinQuadrupole {
                k1l,
                x_offset,
                y_offset,
            } => {
                let dx = state[X].clone() - x_offset;
                let dy = state[Y].clone() - y_offset;
                state[NPX] = state[NPX].clone() - dx * k1l;
                state[NPY] = state[NPY].clone() + dy * k1l;
            }
            ElementKind::ThinSextupole { k2l } => {
                let x = state[X].clone();
                let y = state[Y].clone();
                let kick_x = (x.powi(2) - y.powi(2)) * (0.5 * k2l);
                let kick_y = x * y * k2l;
                state[NPX] = state[NPX].clone() - kick_x;
                state[NPY] = state[NPY].clone() + kick_y;
            }
            ElementKind::ThinBend { angle } => {
                state[NPX] = state[NPX].clone() + state[NDP].clone() * angle;
                state[CDT] = state[CDT].clone() + state[X].clone() * angle;
            }
            ElementKind::Kicker { hkick, vkick } => {
                state[NPX] = state[NPX].clone() + hkick;
                state[NPY] = state[NPY].clone() + vkick;
            }
        }
    }
}

/// An ordered, editable sequence of elements.
///
/// Every edit moves the beamline to a new generation so that optics
/// computed earlier can be recognized as stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Beamline {
    name: String,
    elements: Vec<Element>,
    #[serde(skip, default = "fresh_generation")]
    generation: u64,
}

impl Beamline {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_elements(name, Vec::new())
    }

    pub fn with_elements(name: impl Into<String>, elements: Vec<Element>) -> Self {
        Self {
            name: name.into(),
            elements,
            generation: fresh_generation(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn push(&mut self, element: Element) {
        self.elements.push(element);
        self.touch();
    }

    pub fn insert(&mut self, index: usize, element: Element) -> Result<(), BeamlineError> {
        if index > self.elements.len() {
            return Err(self.out_of_range(index));
        }
        self.elements.insert(index, element);
        self.touch();
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<Element, BeamlineError> {
        if index >= self.elements.len() {
            return Err(self.out_of_range(index));
        }
        let element = self.elements.remove(index);
        self.touch();
        Ok(element)
    }

    /// Mutable access to one element. The generation is bumped up front
    /// since the caller may change anything.
    pub fn element_mut(&mut self, index: usize) -> Option<&mut Element> {
        if index < self.elements.len() {
            self.touch();
        }
        self.elements.get_mut(index)
    }

    /// Sets the main strength of an element: drift length, `k1l`, `k2l`
    /// or bend angle.
    pub fn set_strength(&mut self, index: usize, value: f64) -> Result<(), BeamlineError> {
        let len = self.elements.len();
        let element = self
            .elements
            .get_mut(index)
            .ok_or(BeamlineError::IndexOutOfRange { index, len })?;
        match &mut element.kind {
            ElementKind::Drift { length } => *length = value,
            ElementKind::ThinQuadrupole { k1l, .. } => *k1l = value,
            ElementKind::ThinSextupole { k2l } => *k2l = value,
            ElementKind::ThinBend { angle } => *angle = value,
            ElementKind::Marker | ElementKind::Kicker { .. } => {
                return Err(BeamlineError::NoStrength {
                    name: element.name.clone(),
                })
            }
        }
        self.touch();
        Ok(())
    }

    /// Cumulative arc length at the exit of each element.
    pub fn arc_lengths(&self) -> Vec<f64> {
        self.elements
            .iter()
            .scan(0.0, |s, element| {
                *s += element.length();
                Some(*s)
            })
            .collect()
    }

    fn touch(&mut self) {
        self.generation = fresh_generation();
    }

    fn out_of_range(&self, index: usize) -> BeamlineError {
        BeamlineError::IndexOutOfRange {
            index,
            len: self.elements.len(),
        }
    }
}

impl Lattice for Beamline {
    type Element = Element;

    fn elements(&self) -> &[Element] {
        &self.elements
    }

    fn generation(&self) -> u64 {
        self.generation
    }
}

/// Thin-lens FODO cell `QF, drift, QD, drift` with focal length `f`.
#[cfg(test)]
pub(crate) fn fodo_cell(focal_length: f64, drift_length: f64) -> Beamline {
    Beamline::with_elements(
        "fodo",
        vec![
            Element::quadrupole("qf", 1.0 / focal_length),
            Element::drift("o1", drift_length),
            Element::quadrupole("qd", -1.0 / focal_length),
            Element::drift("o2", drift_length),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jet::{JetEnvironment, JetVector};
    use crate::phase_space::DIMENSION;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    #[test]
    fn drift_moves_particle_along_its_slope() {
        let drift = Element::drift("d", 2.0);
        let mut state = [0.001, -0.002, 0.0, 0.01, 0.02, 0.0];
        drift.propagate(&mut state);
        let pz = (1.0f64 - 0.01f64.powi(2) - 0.02f64.powi(2)).sqrt();
        assert_relative_eq!(state[X], 0.001 + 2.0 * 0.01 / pz);
        assert_relative_eq!(state[Y], -0.002 + 2.0 * 0.02 / pz);
        assert_relative_eq!(state[CDT], 2.0 * (1.0 / pz - 1.0));
        assert!(state[CDT] > 0.0);
    }

    #[test]
    fn quadrupole_kick_is_proportional_to_offset() {
        let quad = Element::new(
            "q",
            ElementKind::ThinQuadrupole {
                k1l: 0.5,
                x_offset: 0.001,
                y_offset: 0.0,
            },
        );
        let mut state = [0.003, 0.002, 0.0, 0.0, 0.0, 0.0];
        quad.propagate(&mut state);
        assert_relative_eq!(state[NPX], -0.5 * 0.002);
        assert_relative_eq!(state[NPY], 0.5 * 0.002);
    }

    #[test]
    fn jet_propagation_matches_particle_tracking() {
        let line = fodo_cell(1.25, 1.0);
        let start = [0.001, 0.0005, 0.0, -0.0002, 0.0001, 0.001];
        let mut particle = start;
        line.propagate(&mut particle);

        let env = JetEnvironment::new(DIMENSION, 2, start.to_vec()).unwrap();
        let mut map = JetVector::identity(&env);
        line.propagate(map.as_mut_slice());
        for (jet, &value) in map.iter().zip(&particle) {
            assert_relative_eq!(jet.standard_part(), value, epsilon = 1e-15);
        }
    }

    #[test]
    fn element_maps_are_symplectic() {
        let line = Beamline::with_elements(
            "mixed",
            vec![
                Element::sextupole("s", 3.0),
                Element::drift("d", 0.7),
                Element::bend("b", 0.1),
                Element::quadrupole("q", 0.8),
                Element::drift("d2", 0.3),
            ],
        );
        let env = JetEnvironment::new(DIMENSION, 1, vec![0.002, -0.001, 0.0, 0.01, 0.004, 0.002])
            .unwrap();
        let mut map = JetVector::identity(&env);
        line.propagate(map.as_mut_slice());
        let m = map.jacobian();

        // Conjugate pairs are (x, npx), (y, npy) and (ndp, cdt).
        let mut omega = DMatrix::<f64>::zeros(DIMENSION, DIMENSION);
        for (q, p) in [(X, NPX), (Y, NPY), (NDP, CDT)] {
            omega[(q, p)] = 1.0;
            omega[(p, q)] = -1.0;
        }
        let form = m.transpose() * &omega * &m;
        for (a, b) in form.iter().zip(omega.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn edits_bump_generation() {
        let mut line = fodo_cell(2.0, 1.0);
        let g0 = line.generation();
        line.set_strength(0, 0.6).unwrap();
        let g1 = line.generation();
        assert!(g1 > g0);
        assert_eq!(line.elements()[0].strength(), Some(0.6));

        line.push(Element::marker("end"));
        let g2 = line.generation();
        assert!(g2 > g1);
        line.insert(0, Element::marker("start")).unwrap();
        let removed = line.remove(0).unwrap();
        assert_eq!(removed.name, "start");
        assert!(line.generation() > g2);

        let g3 = line.generation();
        if let Some(element) = line.element_mut(1) {
            element.name = "drift".into();
        }
        assert!(line.generation() > g3);
    }

    #[test]
    fn invalid_edits_are_rejected() {
        let mut line = fodo_cell(2.0, 1.0);
        line.push(Element::kicker("k", 1e-4, 0.0));
        assert_eq!(
            line.set_strength(4, 1.0).unwrap_err(),
            BeamlineError::NoStrength { name: "k".into() }
        );
        assert_eq!(
            line.remove(9).unwrap_err(),
            BeamlineError::IndexOutOfRange { index: 9, len: 5 }
        );
        assert!(line.insert(6, Element::marker("m")).is_err());
        assert!(line.element_mut(5).is_none());
    }

    #[test]
    fn arc_lengths_accumulate_drifts() {
        let line = fodo_cell(2.0, 1.5);
        assert_eq!(line.arc_lengths(), vec![0.0, 1.5, 1.5, 3.0]);
        assert_relative_eq!(line.total_length(), 3.0);
    }

    #[test]
    fn beamline_round_trips_through_json() {
        let line = fodo_cell(2.0, 1.0);
        let json = serde_json::to_string(&line).unwrap();
        assert!(json.contains("\"type\":\"ThinQuadrupole\""));
        let restored: Beamline = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.elements(), line.elements());
        assert_ne!(restored.generation(), line.generation());
    }
}
