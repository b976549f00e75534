use serde::{Deserialize, Serialize};

use crate::phase_space::Plane;

/// A quantity with a horizontal and a vertical value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaneValues {
    pub hor: f64,
    pub ver: f64,
}

impl PlaneValues {
    pub fn new(hor: f64, ver: f64) -> Self {
        Self { hor, ver }
    }

    pub fn get(&self, plane: Plane) -> f64 {
        match plane {
            Plane::Horizontal => self.hor,
            Plane::Vertical => self.ver,
        }
    }
}

/// Lattice functions at the exit of one element (or at the entrance of the
/// beamline, with no element index).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatticeFunctionRecord {
    pub element_index: Option<usize>,
    pub element_name: String,
    pub arc_length: f64,
    pub dispersion: PlaneValues,
    pub dispersion_prime: PlaneValues,
    pub beta: PlaneValues,
    pub alpha: PlaneValues,
    /// Phase advance from the entrance, in radians.
    pub phase_advance: PlaneValues,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RingRecord {
    pub tune: PlaneValues,
    /// `d tune / d delta`.
    pub chromaticity: PlaneValues,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatticeFunctionTable {
    pub start: LatticeFunctionRecord,
    pub records: Vec<LatticeFunctionRecord>,
    pub ring: RingRecord,
    /// Arc length at the exit of the last element, recorded or not.
    pub total_length: f64,
    /// Lattice generation the table was computed from.
    pub generation: u64,
}

impl LatticeFunctionTable {
    pub fn record(&self, index: usize) -> Option<&LatticeFunctionRecord> {
        self.records.get(index)
    }

    /// The record taken at the exit of element `element_index`, if that
    /// element was selected.
    pub fn by_element(&self, element_index: usize) -> Option<&LatticeFunctionRecord> {
        self.records
            .iter()
            .find(|r| r.element_index == Some(element_index))
    }

    /// The last record at or before arc length `s`; the entrance record when
    /// no recorded element exit precedes `s`. `None` outside
    /// `[0, total_length]`.
    pub fn at_arc_length(&self, s: f64) -> Option<&LatticeFunctionRecord> {
        if !(self.start.arc_length..=self.total_length).contains(&s) {
            return None;
        }
        let count = self.records.partition_point(|r| r.arc_length <= s);
        match count {
            0 => Some(&self.start),
            n => self.records.get(n - 1),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LatticeFunctionRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<'a> IntoIterator for &'a LatticeFunctionTable {
    type Item = &'a LatticeFunctionRecord;
    type IntoIter = std::slice::Iter<'a, LatticeFunctionRecord>;
    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
