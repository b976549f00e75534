//! Elementary functions of jets.
//!
//! Each function is expanded as its univariate Taylor series around the
//! standard part `a` and evaluated on the nilpotent remainder `n = f - a`.
//! Since `n^(order + 1)` vanishes, the series is exact after `order` terms.


use super::series::Jet;
use crate::error::JetError;
use crate::traits::Coefficient;

impl<T: Coefficient> Jet<T> {
    /// `sum_k coefficients[k] * n^k`, evaluated by Horner's rule.
    fn taylor_series(&self, coefficients: &[T]) -> Self {
        let nilpotent = self.nilpotent();
        let mut iter = coefficients.iter().rev();
        let mut result = match iter.next() {
            Some(&c) => Jet::constant(self.env(), c),
            None => return Jet::zero(self.env()),
        };
        for &c in iter {
            result = result.mul_unchecked(&nilpotent).add_scalar(c);
        }
        result
    }

    fn series_len(&self) -> usize {
        self.env().max_order() + 1
    }

    pub fn exp(&self) -> Self {
        let mut coefficients = Vec::with_capacity(self.series_len());
        let mut c = self.standard_part().exp();
        for k in 0..self.series_len() {
            coefficients.push(c);
            c /= T::from_real((k + 1) as f64);
        }
        self.taylor_series(&coefficients)
    }

    /// Natural logarithm. Non-finite coefficients appear when the standard
    /// part is outside the domain; see [`Jet::try_ln`].
    pub fn ln(&self) -> Self {
        let a = self.standard_part();
        let inv = T::one() / a;
        let mut coefficients = Vec::with_capacity(self.series_len());
        coefficients.push(a.ln());
        let mut power = T::one();
        for k in 1..self.series_len() {
            power *= inv;
            let sign = if k % 2 == 1 { T::one() } else { -T::one() };
            coefficients.push(sign * power / T::from_real(k as f64));
        }
        self.taylor_series(&coefficients)
    }

    pub fn try_ln(&self) -> Result<Self, JetError> {
        let a = self.standard_part();
        if a.is_zero() || !a.ln().is_finite() {
            return Err(JetError::DomainError {
                function: "ln",
                value: a.real(),
            });
        }
        Ok(self.ln())
    }

    pub fn recip(&self) -> Self {
        let inv = T::one() / self.standard_part();
        let mut coefficients = Vec::with_capacity(self.series_len());
        let mut c = inv;
        for _ in 0..self.series_len() {
            coefficients.push(c);
            c = -c * inv;
        }
        self.taylor_series(&coefficients)
    }

    pub fn try_recip(&self) -> Result<Self, JetError> {
        if self.standard_part().is_zero() {
            return Err(JetError::DivisionByZeroStandardPart);
        }
        Ok(self.recip())
    }

    /// `self^p` for a real exponent, from the binomial series.
    pub fn powf(&self, p: f64) -> Self {
        let a = self.standard_part();
        self.binomial_series(a.powf(p), a, p)
    }

    pub fn sqrt(&self) -> Self {
        let a = self.standard_part();
        self.binomial_series(a.sqrt(), a, 0.5)
    }

    pub fn try_sqrt(&self) -> Result<Self, JetError> {
        let a = self.standard_part();
        let domain_error = JetError::DomainError {
            function: "sqrt",
            value: a.real(),
        };
        let root = a.try_sqrt().ok_or_else(|| domain_error.clone())?;
        if a.is_zero() && self.degree() > 0 {
            return Err(domain_error);
        }
        Ok(self.binomial_series(root, a, 0.5))
    }

    /// Coefficients `a^p * binom(p, k) / a^k`, seeded with `leading = a^p`.
    fn binomial_series(&self, leading: T, a: T, p: f64) -> Self {
        let mut coefficients = Vec::with_capacity(self.series_len());
        let mut c = leading;
        for k in 0..self.series_len() {
            coefficients.push(c);
            c = c * T::from_real(p - k as f64) / (T::from_real((k + 1) as f64) * a);
        }
        self.taylor_series(&coefficients)
    }

    /// Integer power by repeated squaring; negative exponents go through
    /// [`Jet::recip`].
    pub fn powi(&self, n: i32) -> Self {
        let base = if n < 0 { self.recip() } else { self.clone() };
        let mut exponent = n.unsigned_abs();
        let mut result = Jet::constant(self.env(), T::one());
        let mut square = base;
        while exponent > 0 {
            if exponent & 1 == 1 {
                result = result.mul_unchecked(&square);
            }
            exponent >>= 1;
            if exponent > 0 {
                square = square.mul_unchecked(&square);
            }
        }
        result
    }

    pub fn sin(&self) -> Self {
        let a = self.standard_part();
        let (s, c) = (a.sin(), a.cos());
        self.taylor_series(&self.cyclic_coefficients([s, c, -s, -c]))
    }

    pub fn cos(&self) -> Self {
        let a = self.standard_part();
        let (s, c) = (a.sin(), a.cos());
        self.taylor_series(&self.cyclic_coefficients([c, -s, -c, s]))
    }

    pub fn tan(&self) -> Self {
        self.sin().mul_unchecked(&self.cos().recip())
    }

    /// Taylor coefficients of a function whose derivatives cycle with
    /// period four.
    fn cyclic_coefficients(&self, derivatives: [T; 4]) -> Vec<T> {
        let mut factorial = 1.0;
        (0..self.series_len())
            .map(|k| {
                if k > 0 {
                    factorial *= k as f64;
                }
                derivatives[k % 4] / T::from_real(factorial)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jet::JetEnvironment;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn line(a: f64, order: usize) -> (Arc<JetEnvironment<f64>>, Jet<f64>) {
        let env = JetEnvironment::new(1, order, vec![a]).unwrap();
        let x = Jet::variable(&env, 0).unwrap();
        (env, x)
    }

    fn derivatives(jet: &Jet<f64>, order: usize) -> Vec<f64> {
        (0..=order).map(|k| jet.derivative(&[k as u32])).collect()
    }

    #[test]
    fn exp_derivatives_are_all_exp() {
        let (_, x) = line(0.3, 5);
        for d in derivatives(&x.exp(), 5) {
            assert_relative_eq!(d, 0.3f64.exp(), max_relative = 1e-12);
        }
    }

    #[test]
    fn ln_inverts_exp() {
        let (_, x) = line(0.7, 6);
        let round_trip = x.exp().ln();
        assert!(round_trip.approx_eq(&x, 1e-12));
    }

    #[test]
    fn sqrt_squares_back() {
        let (_, x) = line(2.0, 5);
        let root = x.sqrt();
        let squared = root.try_mul(&root).unwrap();
        assert!(squared.approx_eq(&x, 1e-12));
        assert_relative_eq!(root.derivative(&[1]), 0.5 / 2f64.sqrt());
    }

    #[test]
    fn sqrt_and_ln_report_domain_errors() {
        let (_, x) = line(-1.0, 3);
        assert!(matches!(
            x.try_sqrt(),
            Err(JetError::DomainError { function: "sqrt", .. })
        ));
        assert!(matches!(
            x.try_ln(),
            Err(JetError::DomainError { function: "ln", .. })
        ));
        let (_, origin) = line(0.0, 3);
        assert!(origin.try_sqrt().is_err());
        assert_eq!(
            origin.try_recip().unwrap_err(),
            JetError::DivisionByZeroStandardPart
        );
    }

    #[test]
    fn recip_times_self_is_one() {
        let (env, x) = line(1.5, 6);
        let product = x.try_mul(&x.recip()).unwrap();
        assert!(product.approx_eq(&Jet::constant(&env, 1.0), 1e-12));
    }

    #[test]
    fn powi_agrees_with_powf() {
        let (_, x) = line(1.2, 5);
        assert!(x.powi(3).approx_eq(&x.powf(3.0), 1e-12));
        assert!(x.powi(-2).approx_eq(&x.powf(-2.0), 1e-12));
        assert!(x.powi(0).approx_eq(&x.powf(0.0), 1e-12));
    }

    #[test]
    fn pythagorean_identity_holds() {
        let env = JetEnvironment::new(2, 4, vec![0.4, -0.9]).unwrap();
        let x = Jet::variable(&env, 0).unwrap();
        let y = Jet::variable(&env, 1).unwrap();
        let arg = x.try_mul(&y).unwrap().try_add(&x).unwrap();
        let s = arg.sin();
        let c = arg.cos();
        let one = s.try_mul(&s).unwrap().try_add(&c.try_mul(&c).unwrap()).unwrap();
        assert!(one.approx_eq(&Jet::constant(&env, 1.0), 1e-12));
    }

    #[test]
    fn tan_derivative_is_sec_squared() {
        let (_, x) = line(0.25, 3);
        let t = x.tan();
        let sec2 = 1.0 / 0.25f64.cos().powi(2);
        assert_relative_eq!(t.derivative(&[1]), sec2, max_relative = 1e-12);
    }
}
