//! Truncated power series ("jets") and maps built from them.

mod environment;
mod functions;
mod ops;
mod series;
mod vector;

pub use environment::{JetEnvironment, MultiIndex};
pub use series::{Jet, JetTerm};
pub use vector::JetVector;

use crate::error::JetError;
use crate::traits::Coefficient;

/// `outer ∘ inner`; see [`JetVector::compose`].
pub fn compose<T: Coefficient>(
    outer: &JetVector<T>,
    inner: &JetVector<T>,
) -> Result<JetVector<T>, JetError> {
    outer.compose(inner)
}
