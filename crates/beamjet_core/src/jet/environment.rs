//! Expansion context shared by every jet of one computation.
//!
//! An environment fixes the number of variables, the truncation order and
//! the reference point. Jets hold it through an `Arc`, so it lives exactly
//! as long as the last jet built in it. Re-centering on a new reference
//! point produces a fresh environment (new generation) that shares the
//! immutable monomial tables of the old one.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::JetError;
use crate::traits::Coefficient;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Exponent vector of a monomial.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MultiIndex(Vec<u32>);

impl MultiIndex {
    pub fn new(exponents: Vec<u32>) -> Self {
        Self(exponents)
    }

    pub fn zero(dimension: usize) -> Self {
        Self(vec![0; dimension])
    }

    /// Degree-1 monomial of a single variable.
    pub fn unit(dimension: usize, variable: usize) -> Self {
        let mut exponents = vec![0; dimension];
        exponents[variable] = 1;
        Self(exponents)
    }

    pub fn exponents(&self) -> &[u32] {
        &self.0
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    /// Total degree.
    pub fn degree(&self) -> usize {
        self.0.iter().map(|&e| e as usize).sum()
    }

    /// Product of the factorials of the exponents: the factor relating a
    /// Taylor coefficient to the raw partial derivative.
    pub fn factorial_product(&self) -> f64 {
        self.0
            .iter()
            .map(|&e| (1..=e).map(f64::from).product::<f64>())
            .product()
    }
}

impl Borrow<[u32]> for MultiIndex {
    fn borrow(&self) -> &[u32] {
        &self.0
    }
}

impl From<Vec<u32>> for MultiIndex {
    fn from(exponents: Vec<u32>) -> Self {
        Self(exponents)
    }
}

impl From<&[u32]> for MultiIndex {
    fn from(exponents: &[u32]) -> Self {
        Self(exponents.to_vec())
    }
}

/// Every monomial of total degree `<= max_order`, in graded order: by
/// degree, then reverse-lexicographic within a degree. The degree-1 block
/// therefore lists `x_0, x_1, ...` at indices `1, 2, ...`.
#[derive(Debug)]
struct MonomialTable {
    dimension: usize,
    max_order: usize,
    monomials: Vec<MultiIndex>,
    degrees: Vec<usize>,
    degree_offsets: Vec<usize>,
    lookup: HashMap<MultiIndex, usize>,
}

impl MonomialTable {
    fn build(dimension: usize, max_order: usize) -> Self {
        let mut monomials = Vec::new();
        let mut degree_offsets = Vec::with_capacity(max_order + 2);
        let mut current = vec![0u32; dimension];
        for degree in 0..=max_order {
            degree_offsets.push(monomials.len());
            push_compositions(0, degree as u32, &mut current, &mut monomials);
        }
        degree_offsets.push(monomials.len());

        let degrees = monomials.iter().map(MultiIndex::degree).collect();
        let lookup = monomials
            .iter()
            .enumerate()
            .map(|(idx, m)| (m.clone(), idx))
            .collect();

        Self {
            dimension,
            max_order,
            monomials,
            degrees,
            degree_offsets,
            lookup,
        }
    }
}

fn push_compositions(pos: usize, remaining: u32, current: &mut [u32], out: &mut Vec<MultiIndex>) {
    if pos + 1 == current.len() {
        current[pos] = remaining;
        out.push(MultiIndex::from(&*current));
        current[pos] = 0;
        return;
    }
    for e in (0..=remaining).rev() {
        current[pos] = e;
        push_compositions(pos + 1, remaining - e, current, out);
    }
    current[pos] = 0;
}

/// Shared context of a batch of jet computations.
#[derive(Debug)]
pub struct JetEnvironment<T: Coefficient = f64> {
    reference: Vec<T>,
    generation: u64,
    table: Arc<MonomialTable>,
}

impl<T: Coefficient> JetEnvironment<T> {
    /// Creates an environment expanding around `reference`.
    pub fn new(
        dimension: usize,
        max_order: usize,
        reference: Vec<T>,
    ) -> Result<Arc<Self>, JetError> {
        if dimension == 0 {
            return Err(JetError::InvalidArgument(
                "environment dimension must be positive".into(),
            ));
        }
        if reference.len() != dimension {
            return Err(JetError::InvalidArgument(format!(
                "reference point has {} coordinates, expected {}",
                reference.len(),
                dimension
            )));
        }
        Ok(Arc::new(Self {
            reference,
            generation: next_generation(),
            table: Arc::new(MonomialTable::build(dimension, max_order)),
        }))
    }

    /// Environment expanding around the origin.
    pub fn origin(dimension: usize, max_order: usize) -> Result<Arc<Self>, JetError> {
        Self::new(dimension, max_order, vec![T::zero(); dimension])
    }

    /// A new environment with the same dimension and order, centered on
    /// `reference`. Jets of `self` must not be combined with jets of the
    /// result.
    pub fn recentered(&self, reference: Vec<T>) -> Result<Arc<Self>, JetError> {
        if reference.len() != self.dimension() {
            return Err(JetError::InvalidArgument(format!(
                "reference point has {} coordinates, expected {}",
                reference.len(),
                self.dimension()
            )));
        }
        Ok(Arc::new(Self {
            reference,
            generation: next_generation(),
            table: Arc::clone(&self.table),
        }))
    }

    /// Structural equality: dimension, order, reference point and
    /// generation.
    pub fn matches(a: &Arc<Self>, b: &Arc<Self>) -> bool {
        Arc::ptr_eq(a, b)
            || (a.generation == b.generation
                && a.dimension() == b.dimension()
                && a.max_order() == b.max_order()
                && a.reference == b.reference)
    }

    /// Same number of variables and truncation order; the reference point
    /// may differ.
    pub fn same_shape(&self, other: &Self) -> bool {
        self.dimension() == other.dimension() && self.max_order() == other.max_order()
    }

    pub fn dimension(&self) -> usize {
        self.table.dimension
    }

    pub fn max_order(&self) -> usize {
        self.table.max_order
    }

    pub fn reference(&self) -> &[T] {
        &self.reference
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn monomial_count(&self) -> usize {
        self.table.monomials.len()
    }

    pub fn exponents(&self, index: usize) -> &MultiIndex {
        &self.table.monomials[index]
    }

    pub fn degree_of(&self, index: usize) -> usize {
        self.table.degrees[index]
    }

    /// Indices of all monomials of exactly `degree`.
    pub fn degree_range(&self, degree: usize) -> Range<usize> {
        if degree > self.max_order() {
            let end = self.monomial_count();
            return end..end;
        }
        self.table.degree_offsets[degree]..self.table.degree_offsets[degree + 1]
    }

    pub fn index_of(&self, exponents: &[u32]) -> Option<usize> {
        self.table.lookup.get(exponents).copied()
    }

    /// Index of the degree-1 monomial of `variable`.
    pub fn unit_index(&self, variable: usize) -> Option<usize> {
        if variable < self.dimension() && self.max_order() >= 1 {
            Some(1 + variable)
        } else {
            None
        }
    }

    /// Index of the product of two monomials, if it is within the order.
    /// `scratch` must hold `dimension` entries.
    pub fn product_index(&self, i: usize, j: usize, scratch: &mut [u32]) -> Option<usize> {
        if self.degree_of(i) + self.degree_of(j) > self.max_order() {
            return None;
        }
        let a = self.table.monomials[i].exponents();
        let b = self.table.monomials[j].exponents();
        for ((s, &ea), &eb) in scratch.iter_mut().zip(a).zip(b) {
            *s = ea + eb;
        }
        self.index_of(scratch)
    }

    /// Index of the monomial divided by `variable`, if its exponent there is
    /// positive.
    pub fn lowered_index(
        &self,
        index: usize,
        variable: usize,
        scratch: &mut [u32],
    ) -> Option<usize> {
        let exponents = self.table.monomials[index].exponents();
        if exponents[variable] == 0 {
            return None;
        }
        scratch.copy_from_slice(exponents);
        scratch[variable] -= 1;
        self.index_of(scratch)
    }
}
