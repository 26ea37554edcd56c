use std::fmt;
use std::hash::{Hash, Hasher};

use smallvec::SmallVec;

use super::Value;

/// Ordered tuple of column values used to match and group rows.
///
/// Equality and hashing are element-wise. Two nulls are equal to each other and
/// unequal to every non-null value.
#[derive(Clone, Debug, Default)]
pub struct CompoundKey {
    values: SmallVec<[Value; 4]>,
}

impl CompoundKey {
    /// Builds a key from already extracted values.
    pub fn new(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    /// Key components in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of key components.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true for the key of an empty column list (the global group).
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl PartialEq for CompoundKey {
    fn eq(&self, other: &Self) -> bool {
        self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(other.values.iter())
                .all(|(a, b)| a.key_eq(b))
    }
}

impl Eq for CompoundKey {}

impl Hash for CompoundKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.values.len().hash(state);
        for value in &self.values {
            value.hash_into(state);
        }
    }
}

impl fmt::Display for CompoundKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (idx, value) in self.values.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{value}")?;
        }
        write!(f, ")")
    }
}
