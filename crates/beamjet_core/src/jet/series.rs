use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::environment::{JetEnvironment, MultiIndex};
use super::vector::JetVector;
use crate::error::JetError;
use crate::traits::Coefficient;

/// Persisted form of a single jet term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JetTerm<T = f64> {
    pub exponents: Vec<u32>,
    pub coefficient: T,
}

/// Truncated multivariate Taylor series.
///
/// A jet represents `f(reference + dx)` as a polynomial in the displacement
/// `dx`, truncated at the environment's order. Terms are keyed by their
/// position in the environment's monomial table; zero coefficients are not
/// stored.
#[derive(Clone)]
pub struct Jet<T: Coefficient = f64> {
    env: Arc<JetEnvironment<T>>,
    terms: BTreeMap<usize, T>,
}

impl<T: Coefficient> Jet<T> {
    pub fn zero(env: &Arc<JetEnvironment<T>>) -> Self {
        Self {
            env: Arc::clone(env),
            terms: BTreeMap::new(),
        }
    }

    pub fn constant(env: &Arc<JetEnvironment<T>>, value: T) -> Self {
        let mut jet = Self::zero(env);
        jet.set(0, value);
        jet
    }

    /// The coordinate function `x_i`: its reference value plus a unit
    /// degree-1 term.
    pub fn variable(env: &Arc<JetEnvironment<T>>, variable: usize) -> Result<Self, JetError> {
        if variable >= env.dimension() {
            return Err(JetError::InvalidArgument(format!(
                "variable {} out of range for dimension {}",
                variable,
                env.dimension()
            )));
        }
        let mut jet = Self::constant(env, env.reference()[variable]);
        if let Some(idx) = env.unit_index(variable) {
            jet.set(idx, T::one());
        }
        Ok(jet)
    }

    /// Rebuilds a jet from its persisted terms. Repeated exponents are summed.
    pub fn from_terms(
        env: &Arc<JetEnvironment<T>>,
        terms: &[JetTerm<T>],
    ) -> Result<Self, JetError> {
        let mut jet = Self::zero(env);
        for term in terms {
            if term.exponents.len() != env.dimension() {
                return Err(JetError::InvalidArgument(format!(
                    "term has {} exponents, expected {}",
                    term.exponents.len(),
                    env.dimension()
                )));
            }
            let idx = env.index_of(&term.exponents).ok_or_else(|| {
                JetError::InvalidArgument(format!(
                    "term of degree {} exceeds order {}",
                    MultiIndex::from(term.exponents.as_slice()).degree(),
                    env.max_order()
                ))
            })?;
            jet.add_to(idx, term.coefficient);
        }
        Ok(jet)
    }

    pub fn to_terms(&self) -> Vec<JetTerm<T>> {
        self.terms
            .iter()
            .map(|(&idx, &coefficient)| JetTerm {
                exponents: self.env.exponents(idx).exponents().to_vec(),
                coefficient,
            })
            .collect()
    }

    pub fn env(&self) -> &Arc<JetEnvironment<T>> {
        &self.env
    }

    /// Value at the reference point.
    pub fn standard_part(&self) -> T {
        self.coefficient_at(0)
    }

    pub fn coefficient(&self, exponents: &[u32]) -> T {
        self.env
            .index_of(exponents)
            .map(|idx| self.coefficient_at(idx))
            .unwrap_or_else(T::zero)
    }

    pub(crate) fn coefficient_at(&self, index: usize) -> T {
        self.terms.get(&index).copied().unwrap_or_else(T::zero)
    }

    /// Partial derivative at the reference point: the Taylor coefficient
    /// times the factorials of the exponents.
    pub fn derivative(&self, exponents: &[u32]) -> T {
        let coefficient = self.coefficient(exponents);
        coefficient * T::from_real(MultiIndex::from(exponents).factorial_product())
    }

    /// Partial derivative as a jet in the same environment: each term
    /// `c x^m` becomes `c m!/(m-n)! x^(m-n)`, and terms without enough
    /// powers of a variable drop out. The top `|n|` degrees of the result
    /// are incomplete, since the terms that would feed them were truncated.
    pub fn differentiate(&self, exponents: &[u32]) -> Result<Self, JetError> {
        let dim = self.env.dimension();
        if exponents.len() != dim {
            return Err(JetError::InvalidArgument(format!(
                "derivative multi-index has {} entries, expected {}",
                exponents.len(),
                dim
            )));
        }
        let mut scratch = vec![0u32; dim];
        let mut result = Self::zero(&self.env);
        'terms: for (&idx, &c) in &self.terms {
            let mut index = idx;
            let mut factor = 1.0;
            for (variable, &count) in exponents.iter().enumerate() {
                for _ in 0..count {
                    let power = self.env.exponents(index).exponents()[variable];
                    match self.env.lowered_index(index, variable, &mut scratch) {
                        Some(lowered) => {
                            factor *= f64::from(power);
                            index = lowered;
                        }
                        None => continue 'terms,
                    }
                }
            }
            result.add_to(index, c * T::from_real(factor));
        }
        Ok(result)
    }

    /// Highest degree carrying a nonzero coefficient (0 for the zero jet).
    pub fn degree(&self) -> usize {
        self.terms
            .keys()
            .next_back()
            .map(|&idx| self.env.degree_of(idx))
            .unwrap_or(0)
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn is_zero(&self) -> bool {
        self.terms.is_empty()
    }

    /// Nonzero terms in graded order.
    pub fn terms(&self) -> impl Iterator<Item = (&MultiIndex, T)> + '_ {
        self.terms
            .iter()
            .map(move |(&idx, &c)| (self.env.exponents(idx), c))
    }

    pub(crate) fn indexed_terms(&self) -> impl Iterator<Item = (usize, T)> + '_ {
        self.terms.iter().map(|(&idx, &c)| (idx, c))
    }

    /// Evaluates the polynomial at a displacement from the reference point.
    pub fn evaluate(&self, displacement: &[T]) -> Result<T, JetError> {
        if displacement.len() != self.env.dimension() {
            return Err(JetError::InvalidArgument(format!(
                "displacement has {} coordinates, expected {}",
                displacement.len(),
                self.env.dimension()
            )));
        }
        let mut sum = T::zero();
        for (idx, c) in self.indexed_terms() {
            let mut term = c;
            for (&dx, &e) in displacement.iter().zip(self.env.exponents(idx).exponents()) {
                if e > 0 {
                    term *= dx.powi(e as i32);
                }
            }
            sum += term;
        }
        Ok(sum)
    }

    /// Keeps the terms whose degree lies in `lo..=hi`.
    pub fn filter(&self, lo: usize, hi: usize) -> Self {
        let terms = self
            .terms
            .iter()
            .filter(|(&idx, _)| {
                let d = self.env.degree_of(idx);
                d >= lo && d <= hi
            })
            .map(|(&idx, &c)| (idx, c))
            .collect();
        Self {
            env: Arc::clone(&self.env),
            terms,
        }
    }

    /// The jet minus its standard part.
    pub fn nilpotent(&self) -> Self {
        let mut jet = self.clone();
        jet.terms.remove(&0);
        jet
    }

    /// Coefficient-wise comparison within `tolerance`; jets of different
    /// environments never compare equal.
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        if !JetEnvironment::matches(&self.env, &other.env) {
            return false;
        }
        let within = |idx: usize| {
            (self.coefficient_at(idx) - other.coefficient_at(idx)).modulus() <= tolerance
        };
        self.terms.keys().all(|&idx| within(idx)) && other.terms.keys().all(|&idx| within(idx))
    }

    pub fn scale(&self, factor: T) -> Self {
        let mut jet = Self::zero(&self.env);
        if factor.is_zero() {
            return jet;
        }
        for (&idx, &c) in &self.terms {
            jet.set(idx, c * factor);
        }
        jet
    }

    pub fn add_scalar(&self, value: T) -> Self {
        let mut jet = self.clone();
        jet.add_to(0, value);
        jet
    }

    pub fn try_add(&self, other: &Self) -> Result<Self, JetError> {
        self.check_env(other)?;
        let mut jet = self.clone();
        jet.add_scaled(T::one(), other);
        Ok(jet)
    }

    pub fn try_sub(&self, other: &Self) -> Result<Self, JetError> {
        self.check_env(other)?;
        let mut jet = self.clone();
        jet.add_scaled(-T::one(), other);
        Ok(jet)
    }

    pub fn try_mul(&self, other: &Self) -> Result<Self, JetError> {
        self.check_env(other)?;
        Ok(self.mul_unchecked(other))
    }

    pub fn try_div(&self, other: &Self) -> Result<Self, JetError> {
        self.check_env(other)?;
        let inverse = other.try_recip()?;
        Ok(self.mul_unchecked(&inverse))
    }

    /// Substitutes the components of `inner` for the variables of `self`.
    /// The result lives in the environment of `inner`.
    pub fn compose(&self, inner: &JetVector<T>) -> Result<Self, JetError> {
        let mut composed = compose_all(&self.env, std::slice::from_ref(self), inner)?;
        Ok(composed.pop().unwrap_or_else(|| Jet::zero(inner.env())))
    }

    pub(crate) fn check_env(&self, other: &Self) -> Result<(), JetError> {
        if JetEnvironment::matches(&self.env, &other.env) {
            Ok(())
        } else {
            Err(JetError::EnvironmentMismatch)
        }
    }

    pub(crate) fn set(&mut self, index: usize, value: T) {
        if value.is_zero() {
            self.terms.remove(&index);
        } else {
            self.terms.insert(index, value);
        }
    }

    pub(crate) fn add_to(&mut self, index: usize, value: T) {
        let updated = self.coefficient_at(index) + value;
        self.set(index, updated);
    }

    /// `self += factor * other`; environments are assumed to match.
    pub(crate) fn add_scaled(&mut self, factor: T, other: &Self) {
        for (&idx, &c) in &other.terms {
            self.add_to(idx, factor * c);
        }
    }

    /// Truncated product; environments are assumed to match.
    pub(crate) fn mul_unchecked(&self, other: &Self) -> Self {
        let env = &self.env;
        let order = env.max_order();
        let mut scratch = vec![0u32; env.dimension()];
        let mut terms: BTreeMap<usize, T> = BTreeMap::new();
        for (&i, &a) in &self.terms {
            let di = env.degree_of(i);
            // `other.terms` is in graded order, so the first product above the
            // order ends the row.
            for (&j, &b) in &other.terms {
                if di + env.degree_of(j) > order {
                    break;
                }
                if let Some(k) = env.product_index(i, j, &mut scratch) {
                    *terms.entry(k).or_insert_with(T::zero) += a * b;
                }
            }
        }
        terms.retain(|_, c| !c.is_zero());
        Self {
            env: Arc::clone(env),
            terms,
        }
    }

    pub(crate) fn map_coefficients(&self, f: impl Fn(T) -> T) -> Self {
        let mut jet = Self::zero(&self.env);
        for (&idx, &c) in &self.terms {
            jet.set(idx, f(c));
        }
        jet
    }
}

/// Composes every jet of `outers` (all built in `outer_env`) with `inner`,
/// sharing the monomial powers of the displacements between them.
pub(crate) fn compose_all<T: Coefficient>(
    outer_env: &Arc<JetEnvironment<T>>,
    outers: &[Jet<T>],
    inner: &JetVector<T>,
) -> Result<Vec<Jet<T>>, JetError> {
    let dim = outer_env.dimension();
    if inner.len() != dim {
        return Err(JetError::InvalidArgument(format!(
            "inner map has {} components, outer series have {} variables",
            inner.len(),
            dim
        )));
    }
    let inner_env = inner.env();
    let displacements: Vec<Jet<T>> = inner
        .iter()
        .zip(outer_env.reference())
        .map(|(component, &r)| component.add_scalar(-r))
        .collect();

    let highest = outers
        .iter()
        .filter_map(|jet| jet.terms.keys().next_back().copied())
        .max();
    let Some(highest) = highest else {
        return Ok(outers.iter().map(|_| Jet::zero(inner_env)).collect());
    };

    // powers[m] = prod_i d_i^{m_i}, built from the monomial with one fewer
    // power of its first variable (always an earlier index).
    let mut scratch = vec![0u32; dim];
    let mut powers: Vec<Jet<T>> = Vec::with_capacity(highest + 1);
    powers.push(Jet::constant(inner_env, T::one()));
    for idx in 1..=highest {
        let first = outer_env
            .exponents(idx)
            .exponents()
            .iter()
            .position(|&e| e > 0);
        let power = match first.and_then(|var| {
            outer_env
                .lowered_index(idx, var, &mut scratch)
                .map(|lower| (var, lower))
        }) {
            Some((var, lower)) => powers[lower].mul_unchecked(&displacements[var]),
            None => Jet::zero(inner_env),
        };
        powers.push(power);
    }

    Ok(outers
        .iter()
        .map(|outer| {
            let mut result = Jet::zero(inner_env);
            for (idx, c) in outer.indexed_terms() {
                result.add_scaled(c, &powers[idx]);
            }
            result
        })
        .collect())
}

impl<T: Coefficient> fmt::Debug for Jet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.terms
                    .iter()
                    .map(|(&idx, c)| (self.env.exponents(idx).exponents(), c)),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use num_complex::Complex;

    fn env(dim: usize, order: usize) -> Arc<JetEnvironment<f64>> {
        JetEnvironment::origin(dim, order).expect("environment")
    }

    #[test]
    fn variable_carries_reference_and_unit_term() {
        let env = JetEnvironment::new(2, 3, vec![0.5, -1.0]).unwrap();
        let y = Jet::variable(&env, 1).unwrap();
        assert_eq!(y.standard_part(), -1.0);
        assert_eq!(y.coefficient(&[0, 1]), 1.0);
        assert_eq!(y.term_count(), 2);
        assert!(Jet::variable(&env, 2).is_err());
    }

    #[test]
    fn square_has_expected_taylor_coefficients() {
        let env = JetEnvironment::new(1, 4, vec![3.0]).unwrap();
        let x = Jet::variable(&env, 0).unwrap();
        let sq = x.try_mul(&x).unwrap();
        assert_eq!(sq.standard_part(), 9.0);
        assert_eq!(sq.coefficient(&[1]), 6.0);
        assert_eq!(sq.coefficient(&[2]), 1.0);
        assert_eq!(sq.derivative(&[2]), 2.0);
        assert_eq!(sq.degree(), 2);
    }

    #[test]
    fn differentiate_lowers_each_term() {
        // f = 3 x^2 y + 2 y^3 + x
        let env = env(2, 4);
        let x = Jet::variable(&env, 0).unwrap();
        let y = Jet::variable(&env, 1).unwrap();
        let x2y = x.try_mul(&x).unwrap().try_mul(&y).unwrap().scale(3.0);
        let y3 = y.try_mul(&y).unwrap().try_mul(&y).unwrap().scale(2.0);
        let f = x2y.try_add(&y3).unwrap().try_add(&x).unwrap();

        let fx = f.differentiate(&[1, 0]).unwrap();
        assert_eq!(fx.coefficient(&[1, 1]), 6.0);
        assert_eq!(fx.standard_part(), 1.0);
        assert_eq!(fx.term_count(), 2);

        let fxy = f.differentiate(&[1, 1]).unwrap();
        assert_eq!(fxy.coefficient(&[1, 0]), 6.0);
        assert_eq!(fxy.term_count(), 1);

        let fyy = f.differentiate(&[0, 2]).unwrap();
        assert_eq!(fyy.coefficient(&[0, 1]), 12.0);
        assert_eq!(fyy.coefficient(&[2, 0]), 0.0);
        assert_eq!(fyy.term_count(), 1);

        assert!(f.differentiate(&[3, 0]).unwrap().is_zero());
        assert_eq!(f.differentiate(&[2, 1]).unwrap().standard_part(), f.derivative(&[2, 1]));
        assert!(JetEnvironment::matches(fx.env(), &env));
        assert!(matches!(
            f.differentiate(&[1]),
            Err(JetError::InvalidArgument(_))
        ));
    }

    #[test]
    fn products_are_truncated_at_order() {
        let env = env(2, 3);
        let x = Jet::variable(&env, 0).unwrap();
        let y = Jet::variable(&env, 1).unwrap();
        let xy = x.try_mul(&y).unwrap();
        let high = xy.try_mul(&xy).unwrap();
        assert!(high.is_zero());
        let cubic = xy.try_mul(&x).unwrap();
        assert_eq!(cubic.coefficient(&[2, 1]), 1.0);
        assert_eq!(cubic.term_count(), 1);
        assert!(cubic.terms().all(|(m, _)| m.degree() <= 3));
    }

    #[test]
    fn mismatched_environments_are_rejected() {
        let a = env(2, 2);
        let b = env(2, 2);
        let x = Jet::variable(&a, 0).unwrap();
        let y = Jet::variable(&b, 0).unwrap();
        assert_eq!(x.try_add(&y).unwrap_err(), JetError::EnvironmentMismatch);
        assert_eq!(x.try_mul(&y).unwrap_err(), JetError::EnvironmentMismatch);
    }

    #[test]
    fn division_needs_nonzero_standard_part() {
        let env = env(1, 3);
        let x = Jet::variable(&env, 0).unwrap();
        let one = Jet::constant(&env, 1.0);
        assert_eq!(
            one.try_div(&x).unwrap_err(),
            JetError::DivisionByZeroStandardPart
        );
        let q = x.try_div(&one.add_scalar(1.0)).unwrap();
        assert_relative_eq!(q.coefficient(&[1]), 0.5);
    }

    #[test]
    fn evaluate_matches_polynomial() {
        let env = env(2, 3);
        let x = Jet::variable(&env, 0).unwrap();
        let y = Jet::variable(&env, 1).unwrap();
        let p = x.try_mul(&y).unwrap().try_add(&x.scale(2.0)).unwrap().add_scalar(1.0);
        let value = p.evaluate(&[0.5, 4.0]).unwrap();
        assert_relative_eq!(value, 1.0 + 1.0 + 2.0);
        assert!(p.evaluate(&[1.0]).is_err());
    }

    #[test]
    fn filter_keeps_requested_degrees() {
        let env = env(1, 4);
        let x = Jet::variable(&env, 0).unwrap().add_scalar(1.0);
        let p = x.try_mul(&x).unwrap().try_mul(&x).unwrap();
        let middle = p.filter(1, 2);
        assert_eq!(middle.standard_part(), 0.0);
        assert_eq!(middle.coefficient(&[1]), 3.0);
        assert_eq!(middle.coefficient(&[2]), 3.0);
        assert_eq!(middle.coefficient(&[3]), 0.0);
        assert_eq!(p.nilpotent().standard_part(), 0.0);
    }

    #[test]
    fn terms_round_trip_through_json() {
        let env = env(3, 2);
        let x = Jet::variable(&env, 0).unwrap();
        let z = Jet::variable(&env, 2).unwrap();
        let p = x.try_mul(&z).unwrap().add_scalar(-2.5);
        let json = serde_json::to_string(&p.to_terms()).expect("serialize");
        let terms: Vec<JetTerm> = serde_json::from_str(&json).expect("deserialize");
        let restored = Jet::from_terms(&env, &terms).unwrap();
        assert!(restored.approx_eq(&p, 0.0));
    }

    #[test]
    fn from_terms_rejects_terms_above_order() {
        let env = env(2, 2);
        let terms = vec![JetTerm {
            exponents: vec![2, 1],
            coefficient: 1.0,
        }];
        assert!(matches!(
            Jet::from_terms(&env, &terms),
            Err(JetError::InvalidArgument(_))
        ));
        let bad_arity = vec![JetTerm {
            exponents: vec![1],
            coefficient: 1.0,
        }];
        assert!(Jet::from_terms(&env, &bad_arity).is_err());
    }

    #[test]
    fn complex_coefficients_multiply() {
        let env = JetEnvironment::<Complex<f64>>::origin(1, 2).unwrap();
        let x = Jet::variable(&env, 0).unwrap();
        let i = Complex::new(0.0, 1.0);
        let p = x.add_scalar(i);
        let sq = p.try_mul(&p).unwrap();
        assert_eq!(sq.standard_part(), Complex::new(-1.0, 0.0));
        assert_eq!(sq.coefficient(&[1]), Complex::new(0.0, 2.0));
        assert_eq!(sq.coefficient(&[2]), Complex::new(1.0, 0.0));
    }
}
