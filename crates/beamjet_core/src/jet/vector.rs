use nalgebra::DMatrix;
use std::ops::{Index, IndexMut};
use std::sync::Arc;

use super::environment::JetEnvironment;
use super::series::{compose_all, Jet};
use crate::error::JetError;
use crate::traits::Coefficient;

/// Singular-value ratio below which a linear part counts as singular.
const INVERSE_CONDITION_LIMIT: f64 = 1e-14;

/// An ordered set of jets sharing one environment: a truncated map.
#[derive(Debug, Clone)]
pub struct JetVector<T: Coefficient = f64> {
    env: Arc<JetEnvironment<T>>,
    components: Vec<Jet<T>>,
}

impl<T: Coefficient> JetVector<T> {
    /// Collects components that must all belong to `env`.
    pub fn new(env: &Arc<JetEnvironment<T>>, components: Vec<Jet<T>>) -> Result<Self, JetError> {
        if components
            .iter()
            .any(|c| !JetEnvironment::matches(env, c.env()))
        {
            return Err(JetError::EnvironmentMismatch);
        }
        Ok(Self {
            env: Arc::clone(env),
            components,
        })
    }

    /// The identity map `x_i -> x_i`.
    pub fn identity(env: &Arc<JetEnvironment<T>>) -> Self {
        let components = (0..env.dimension())
            .map(|i| {
                let mut jet = Jet::constant(env, env.reference()[i]);
                if let Some(idx) = env.unit_index(i) {
                    jet.set(idx, T::one());
                }
                jet
            })
            .collect();
        Self {
            env: Arc::clone(env),
            components,
        }
    }

    pub fn constants(env: &Arc<JetEnvironment<T>>, values: &[T]) -> Self {
        Self {
            env: Arc::clone(env),
            components: values.iter().map(|&v| Jet::constant(env, v)).collect(),
        }
    }

    pub fn env(&self) -> &Arc<JetEnvironment<T>> {
        &self.env
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Jet<T>> {
        self.components.iter()
    }

    pub fn components(&self) -> &[Jet<T>] {
        &self.components
    }

    /// Mutable access for in-place propagation. Components replaced through
    /// the slice must stay in the same environment.
    pub fn as_mut_slice(&mut self) -> &mut [Jet<T>] {
        &mut self.components
    }

    pub fn into_components(self) -> Vec<Jet<T>> {
        self.components
    }

    /// Values of every component at the reference point.
    pub fn standard_part(&self) -> Vec<T> {
        self.components.iter().map(Jet::standard_part).collect()
    }

    /// First-order coefficients; rows are components, columns variables.
    pub fn jacobian(&self) -> DMatrix<T> {
        let dim = self.env.dimension();
        DMatrix::from_fn(self.len(), dim, |row, col| {
            self.env
                .unit_index(col)
                .map(|idx| self.components[row].coefficient_at(idx))
                .unwrap_or_else(T::zero)
        })
    }

    /// `self ∘ inner`, in the environment of `inner`.
    pub fn compose(&self, inner: &JetVector<T>) -> Result<JetVector<T>, JetError> {
        let components = compose_all(&self.env, &self.components, inner)?;
        Ok(JetVector {
            env: Arc::clone(inner.env()),
            components,
        })
    }

    /// Linear combination `matrix * self`.
    pub fn apply_matrix(&self, matrix: &DMatrix<T>) -> Result<JetVector<T>, JetError> {
        if matrix.ncols() != self.len() {
            return Err(JetError::InvalidArgument(format!(
                "matrix has {} columns, map has {} components",
                matrix.ncols(),
                self.len()
            )));
        }
        let components = (0..matrix.nrows())
            .map(|row| {
                let mut jet = Jet::zero(&self.env);
                for (col, component) in self.components.iter().enumerate() {
                    let factor = matrix[(row, col)];
                    if !factor.is_zero() {
                        jet.add_scaled(factor, component);
                    }
                }
                jet
            })
            .collect();
        Ok(JetVector {
            env: Arc::clone(&self.env),
            components,
        })
    }

    pub fn filter(&self, lo: usize, hi: usize) -> JetVector<T> {
        JetVector {
            env: Arc::clone(&self.env),
            components: self.components.iter().map(|c| c.filter(lo, hi)).collect(),
        }
    }

    pub fn try_sub(&self, other: &JetVector<T>) -> Result<JetVector<T>, JetError> {
        if self.len() != other.len() {
            return Err(JetError::InvalidArgument(format!(
                "maps have {} and {} components",
                self.len(),
                other.len()
            )));
        }
        let components = self
            .components
            .iter()
            .zip(&other.components)
            .map(|(a, b)| a.try_sub(b))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(JetVector {
            env: Arc::clone(&self.env),
            components,
        })
    }

    pub fn approx_eq(&self, other: &JetVector<T>, tolerance: f64) -> bool {
        self.len() == other.len()
            && self
                .components
                .iter()
                .zip(&other.components)
                .all(|(a, b)| a.approx_eq(b, tolerance))
    }

    /// Local inverse around the image point. The result lives in the same
    /// environment when the image equals the reference point, otherwise in
    /// a re-centered one with a fresh generation.
    ///
    /// A second `invert` would re-center once more, so its result never
    /// matches the original map's environment. Round trips go through
    /// `inverse.invert_into(map.env())`.
    pub fn invert(&self) -> Result<JetVector<T>, JetError> {
        let image = self.standard_part();
        if points_coincide(&image, self.env.reference()) {
            self.invert_into(&self.env)
        } else {
            let target = self.env.recentered(image)?;
            self.invert_into(&target)
        }
    }

    /// Local inverse expressed in `target`, whose reference point must be
    /// the image of this map's reference point.
    ///
    /// Starting from the linear inverse, each pass applies
    /// `z <- z - A^{-1} (self ∘ z - id)` with the fixed linear part `A`,
    /// which makes one more order exact.
    pub fn invert_into(&self, target: &Arc<JetEnvironment<T>>) -> Result<JetVector<T>, JetError> {
        let dim = self.env.dimension();
        if self.len() != dim {
            return Err(JetError::InvalidArgument(format!(
                "cannot invert a map with {} components in {} variables",
                self.len(),
                dim
            )));
        }
        if !self.env.same_shape(target) {
            return Err(JetError::InvalidArgument(
                "target environment differs in dimension or order".into(),
            ));
        }
        if !points_coincide(&self.standard_part(), target.reference()) {
            return Err(JetError::EnvironmentMismatch);
        }

        let linear = self.jacobian();
        let singular_values = linear.singular_values();
        let largest = singular_values.max();
        if !(largest > 0.0) || singular_values.min() / largest < INVERSE_CONDITION_LIMIT {
            return Err(JetError::SingularJacobian);
        }
        let linear_inverse = linear.try_inverse().ok_or(JetError::SingularJacobian)?;

        let identity = JetVector::identity(target);
        let displacement = identity.filter(1, target.max_order());
        let mut inverse = displacement.apply_matrix(&linear_inverse)?;
        for (component, &r) in inverse.components.iter_mut().zip(self.env.reference()) {
            component.add_to(0, r);
        }

        for _ in 0..target.max_order() {
            let defect = self.compose(&inverse)?.try_sub(&identity)?;
            let correction = defect.filter(1, target.max_order()).apply_matrix(&linear_inverse)?;
            inverse = inverse.try_sub(&correction)?;
        }
        Ok(inverse)
    }
}

fn points_coincide<T: Coefficient>(a: &[T], b: &[T]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(&x, &y)| (x - y).modulus() <= 1e-12 * x.modulus().max(1.0))
}

impl<T: Coefficient> Index<usize> for JetVector<T> {
    type Output = Jet<T>;
    fn index(&self, index: usize) -> &Jet<T> {
        &self.components[index]
    }
}

impl<T: Coefficient> IndexMut<usize> for JetVector<T> {
    fn index_mut(&mut self, index: usize) -> &mut Jet<T> {
        &mut self.components[index]
    }
}

impl<'a, T: Coefficient> IntoIterator for &'a JetVector<T> {
    type Item = &'a Jet<T>;
    type IntoIter = std::slice::Iter<'a, Jet<T>>;
    fn into_iter(self) -> Self::IntoIter {
        self.components.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use num_complex::Complex;
    use rand::Rng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// A random polynomial map with a well-conditioned linear part.
    fn random_map(env: &Arc<JetEnvironment<f64>>, rng: &mut ChaCha8Rng) -> JetVector<f64> {
        let dim = env.dimension();
        let order = env.max_order();
        let id = JetVector::identity(env);
        let components = (0..dim)
            .map(|i| {
                let mut jet = Jet::constant(env, rng.gen_range(-0.5..0.5));
                for j in 0..dim {
                    let diag = if i == j { 1.0 } else { 0.0 };
                    let d = id[j].add_scalar(-env.reference()[j]);
                    jet += &d.scale(diag + rng.gen_range(-0.3..0.3));
                }
                if order >= 2 {
                    let a = id[i].add_scalar(-env.reference()[i]);
                    let b = id[(i + 1) % dim].add_scalar(-env.reference()[(i + 1) % dim]);
                    jet += &(&a * &b).scale(rng.gen_range(-1.0..1.0));
                }
                jet
            })
            .collect();
        JetVector::new(env, components).unwrap()
    }

    #[test]
    fn identity_jacobian_is_identity() {
        let env = JetEnvironment::new(3, 2, vec![1.0, 2.0, 3.0]).unwrap();
        let id = JetVector::identity(&env);
        assert_eq!(id.jacobian(), DMatrix::<f64>::identity(3, 3));
        assert_eq!(id.standard_part(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn composing_with_identity_is_neutral() {
        let env = JetEnvironment::origin(3, 3).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let map = random_map(&env, &mut rng);
        let id = JetVector::identity(&env);
        assert!(map.compose(&id).unwrap().approx_eq(&map, 1e-14));

        let id_at_image = JetVector::identity(&env.recentered(map.standard_part()).unwrap());
        let left = id_at_image.compose(&map).unwrap();
        assert!(left.approx_eq(&map, 1e-14));
    }

    #[test]
    fn jacobians_obey_chain_rule() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let inner_env = JetEnvironment::new(4, 3, vec![0.1, -0.2, 0.05, 0.3]).unwrap();
        let inner = random_map(&inner_env, &mut rng);
        let outer_env = inner_env.recentered(inner.standard_part()).unwrap();
        let outer = random_map(&outer_env, &mut rng);

        let composed = outer.compose(&inner).unwrap();
        let expected = outer.jacobian() * inner.jacobian();
        let actual = composed.jacobian();
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert_relative_eq!(*a, *e, epsilon = 1e-12);
        }
    }

    #[test]
    fn compose_rejects_wrong_arity() {
        let env2 = JetEnvironment::<f64>::origin(2, 2).unwrap();
        let env3 = JetEnvironment::<f64>::origin(3, 2).unwrap();
        let outer = JetVector::identity(&env3);
        let inner = JetVector::identity(&env2);
        assert!(matches!(
            outer.compose(&inner),
            Err(JetError::InvalidArgument(_))
        ));
    }

    #[test]
    fn inverse_composes_to_identity() {
        let env = JetEnvironment::origin(3, 4).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let map = random_map(&env, &mut rng);
        let inverse = map.invert().unwrap();
        assert!(!JetEnvironment::matches(inverse.env(), &env));

        let round_trip = map.compose(&inverse).unwrap();
        assert!(round_trip.approx_eq(&JetVector::identity(inverse.env()), 1e-10));
        let other_way = inverse.compose(&map).unwrap();
        assert!(other_way.approx_eq(&JetVector::identity(&env), 1e-10));
    }

    #[test]
    fn double_inverse_recovers_map() {
        let env = JetEnvironment::new(2, 3, vec![0.2, 0.1]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let map = random_map(&env, &mut rng);
        let inverse = map.invert().unwrap();
        let back = inverse.invert_into(&env).unwrap();
        assert!(back.approx_eq(&map, 1e-10));
    }

    #[test]
    fn invert_keeps_environment_for_fixed_reference() {
        let env = JetEnvironment::<f64>::origin(2, 3).unwrap();
        let id = JetVector::identity(&env);
        let x = &id[0];
        let y = &id[1];
        let map = JetVector::new(&env, vec![x + &(y * y), y - &(x * x)]).unwrap();
        let inverse = map.invert().unwrap();
        assert!(JetEnvironment::matches(inverse.env(), &env));
        assert!(map.compose(&inverse).unwrap().approx_eq(&id, 1e-12));
    }

    #[test]
    fn singular_linear_part_is_reported() {
        let env = JetEnvironment::origin(2, 2).unwrap();
        let id = JetVector::identity(&env);
        let x = id[0].clone();
        let map = JetVector::new(&env, vec![x.clone(), x.scale(2.0)]).unwrap();
        assert_eq!(map.invert().unwrap_err(), JetError::SingularJacobian);
    }

    #[test]
    fn invert_into_requires_image_reference() {
        let env = JetEnvironment::origin(2, 2).unwrap();
        let mut map = JetVector::identity(&env);
        map[0].add_to(0, 1.0);
        assert_eq!(
            map.invert_into(&env).unwrap_err(),
            JetError::EnvironmentMismatch
        );
    }

    #[test]
    fn complex_rotation_inverts() {
        let env = JetEnvironment::<Complex<f64>>::origin(2, 2).unwrap();
        let id = JetVector::identity(&env);
        let phase = Complex::from_polar(1.0, 0.3);
        let map = JetVector::new(
            &env,
            vec![id[0].scale(phase), id[1].scale(phase.conj())],
        )
        .unwrap();
        let inverse = map.invert().unwrap();
        let m = inverse.jacobian();
        assert_relative_eq!(m[(0, 0)].re, phase.conj().re, epsilon = 1e-14);
        assert_relative_eq!(m[(0, 0)].im, phase.conj().im, epsilon = 1e-14);
    }
}
