//! Operator overloads for jets.
//!
//! Jet-jet operators panic when the operands belong to different
//! environments or when dividing by a jet with zero standard part; the
//! `try_*` methods on [`Jet`] report the same conditions as errors.

use num_complex::Complex;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};

use super::series::Jet;
use crate::error::JetError;
use crate::traits::{Coefficient, Coordinate};

fn or_panic<T: Coefficient>(result: Result<Jet<T>, JetError>) -> Jet<T> {
    match result {
        Ok(jet) => jet,
        Err(err) => panic!("jet arithmetic failed: {err}"),
    }
}

macro_rules! impl_jet_binop {
    ($trait:ident, $method:ident, $checked:ident) => {
        impl<T: Coefficient> $trait<Jet<T>> for Jet<T> {
            type Output = Jet<T>;
            fn $method(self, rhs: Jet<T>) -> Jet<T> {
                or_panic(self.$checked(&rhs))
            }
        }

        impl<T: Coefficient> $trait<&Jet<T>> for Jet<T> {
            type Output = Jet<T>;
            fn $method(self, rhs: &Jet<T>) -> Jet<T> {
                or_panic(self.$checked(rhs))
            }
        }

        impl<T: Coefficient> $trait<Jet<T>> for &Jet<T> {
            type Output = Jet<T>;
            fn $method(self, rhs: Jet<T>) -> Jet<T> {
                or_panic(self.$checked(&rhs))
            }
        }

        impl<T: Coefficient> $trait<&Jet<T>> for &Jet<T> {
            type Output = Jet<T>;
            fn $method(self, rhs: &Jet<T>) -> Jet<T> {
                or_panic(self.$checked(rhs))
            }
        }
    };
}

impl_jet_binop!(Add, add, try_add);
impl_jet_binop!(Sub, sub, try_sub);
impl_jet_binop!(Mul, mul, try_mul);
impl_jet_binop!(Div, div, try_div);

impl<T: Coefficient> Neg for Jet<T> {
    type Output = Jet<T>;
    fn neg(self) -> Jet<T> {
        self.map_coefficients(|c| -c)
    }
}

impl<T: Coefficient> Neg for &Jet<T> {
    type Output = Jet<T>;
    fn neg(self) -> Jet<T> {
        self.map_coefficients(|c| -c)
    }
}

impl<T: Coefficient> AddAssign<&Jet<T>> for Jet<T> {
    fn add_assign(&mut self, rhs: &Jet<T>) {
        if let Err(err) = self.check_env(rhs) {
            panic!("jet arithmetic failed: {err}");
        }
        self.add_scaled(T::one(), rhs);
    }
}

impl<T: Coefficient> AddAssign<Jet<T>> for Jet<T> {
    fn add_assign(&mut self, rhs: Jet<T>) {
        *self += &rhs;
    }
}

impl<T: Coefficient> SubAssign<&Jet<T>> for Jet<T> {
    fn sub_assign(&mut self, rhs: &Jet<T>) {
        if let Err(err) = self.check_env(rhs) {
            panic!("jet arithmetic failed: {err}");
        }
        self.add_scaled(-T::one(), rhs);
    }
}

impl<T: Coefficient> SubAssign<Jet<T>> for Jet<T> {
    fn sub_assign(&mut self, rhs: Jet<T>) {
        *self -= &rhs;
    }
}

impl<T: Coefficient> MulAssign<&Jet<T>> for Jet<T> {
    fn mul_assign(&mut self, rhs: &Jet<T>) {
        *self = or_panic(self.try_mul(rhs));
    }
}

// Scalar operands are implemented per concrete coefficient type; a blanket
// `impl<T> Add<T> for Jet<T>` would overlap with the jet-jet impls.
macro_rules! impl_scalar_ops {
    ($scalar:ty) => {
        impl Add<$scalar> for Jet<$scalar> {
            type Output = Jet<$scalar>;
            fn add(self, rhs: $scalar) -> Jet<$scalar> {
                self.add_scalar(rhs)
            }
        }

        impl Add<$scalar> for &Jet<$scalar> {
            type Output = Jet<$scalar>;
            fn add(self, rhs: $scalar) -> Jet<$scalar> {
                self.add_scalar(rhs)
            }
        }

        impl Sub<$scalar> for Jet<$scalar> {
            type Output = Jet<$scalar>;
            fn sub(self, rhs: $scalar) -> Jet<$scalar> {
                self.add_scalar(-rhs)
            }
        }

        impl Sub<$scalar> for &Jet<$scalar> {
            type Output = Jet<$scalar>;
            fn sub(self, rhs: $scalar) -> Jet<$scalar> {
                self.add_scalar(-rhs)
            }
        }

        impl Mul<$scalar> for Jet<$scalar> {
            type Output = Jet<$scalar>;
            fn mul(self, rhs: $scalar) -> Jet<$scalar> {
                self.scale(rhs)
            }
        }

        impl Mul<$scalar> for &Jet<$scalar> {
            type Output = Jet<$scalar>;
            fn mul(self, rhs: $scalar) -> Jet<$scalar> {
                self.scale(rhs)
            }
        }

        impl Div<$scalar> for Jet<$scalar> {
            type Output = Jet<$scalar>;
            fn div(self, rhs: $scalar) -> Jet<$scalar> {
                self.map_coefficients(|c| c / rhs)
            }
        }

        impl Div<$scalar> for &Jet<$scalar> {
            type Output = Jet<$scalar>;
            fn div(self, rhs: $scalar) -> Jet<$scalar> {
                self.map_coefficients(|c| c / rhs)
            }
        }

        impl Add<Jet<$scalar>> for $scalar {
            type Output = Jet<$scalar>;
            fn add(self, rhs: Jet<$scalar>) -> Jet<$scalar> {
                rhs.add_scalar(self)
            }
        }

        impl Sub<Jet<$scalar>> for $scalar {
            type Output = Jet<$scalar>;
            fn sub(self, rhs: Jet<$scalar>) -> Jet<$scalar> {
                (-rhs).add_scalar(self)
            }
        }

        impl Mul<Jet<$scalar>> for $scalar {
            type Output = Jet<$scalar>;
            fn mul(self, rhs: Jet<$scalar>) -> Jet<$scalar> {
                rhs.scale(self)
            }
        }

        impl Div<Jet<$scalar>> for $scalar {
            type Output = Jet<$scalar>;
            fn div(self, rhs: Jet<$scalar>) -> Jet<$scalar> {
                or_panic(rhs.try_recip()).scale(self)
            }
        }

        impl AddAssign<$scalar> for Jet<$scalar> {
            fn add_assign(&mut self, rhs: $scalar) {
                self.add_to(0, rhs);
            }
        }

        impl MulAssign<$scalar> for Jet<$scalar> {
            fn mul_assign(&mut self, rhs: $scalar) {
                *self = self.scale(rhs);
            }
        }
    };
}

impl_scalar_ops!(f64);
impl_scalar_ops!(Complex<f64>);

impl Coordinate for Jet<f64> {
    fn value(&self) -> f64 {
        self.standard_part()
    }
    fn sqrt(&self) -> Self {
        Jet::sqrt(self)
    }
    fn sin(&self) -> Self {
        Jet::sin(self)
    }
    fn cos(&self) -> Self {
        Jet::cos(self)
    }
    fn powi(&self, n: i32) -> Self {
        Jet::powi(self, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jet::JetEnvironment;
    use approx::assert_relative_eq;

    #[test]
    fn operators_follow_polynomial_arithmetic() {
        let env = JetEnvironment::origin(2, 3).unwrap();
        let x = Jet::variable(&env, 0).unwrap();
        let y = Jet::variable(&env, 1).unwrap();
        let p = (&x + &y) * (&x - &y);
        assert_eq!(p.coefficient(&[2, 0]), 1.0);
        assert_eq!(p.coefficient(&[1, 1]), 0.0);
        assert_eq!(p.coefficient(&[0, 2]), -1.0);

        let q = 2.0 * x.clone() + 1.0 - y.clone() / 4.0;
        assert_eq!(q.standard_part(), 1.0);
        assert_eq!(q.coefficient(&[1, 0]), 2.0);
        assert_eq!(q.coefficient(&[0, 1]), -0.25);

        let mut r = x.clone();
        r += &y;
        r *= 3.0;
        r -= y.clone();
        assert_eq!(r.coefficient(&[0, 1]), 2.0);
        assert_eq!((-r).coefficient(&[1, 0]), -3.0);
    }

    #[test]
    fn quotient_rule_at_nonzero_point() {
        let env = JetEnvironment::new(1, 2, vec![2.0]).unwrap();
        let x = Jet::variable(&env, 0).unwrap();
        let f = 1.0 / x.clone();
        assert_relative_eq!(f.derivative(&[1]), -0.25);
        assert_relative_eq!(f.derivative(&[2]), 0.25);
        let g = (&x * &x) / &x;
        assert!(g.approx_eq(&x, 1e-14));
    }

    #[test]
    #[should_panic(expected = "environments do not match")]
    fn mixing_environments_panics() {
        let a = JetEnvironment::<f64>::origin(1, 2).unwrap();
        let b = JetEnvironment::<f64>::origin(1, 2).unwrap();
        let _ = Jet::variable(&a, 0).unwrap() + Jet::variable(&b, 0).unwrap();
    }

    #[test]
    fn coordinate_trait_dispatches_to_jet_functions() {
        fn hypot<S: Coordinate>(a: S, b: S) -> S {
            (a.clone() * a + b.clone() * b).sqrt()
        }
        let env = JetEnvironment::new(2, 2, vec![3.0, 4.0]).unwrap();
        let x = Jet::variable(&env, 0).unwrap();
        let y = Jet::variable(&env, 1).unwrap();
        let h = hypot(x, y);
        assert_relative_eq!(h.value(), hypot(3.0, 4.0));
        assert_relative_eq!(h.derivative(&[1, 0]), 0.6);
        assert_relative_eq!(h.derivative(&[0, 1]), 0.8);
    }
}
