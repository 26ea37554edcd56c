//! Record model: rows, values and compound keys.

mod key;
mod value;

pub use key::CompoundKey;
pub use value::Value;

use serde::ser::{Serialize, SerializeMap, Serializer};
use smallvec::SmallVec;

static NULL: Value = Value::Null;

#[derive(Clone, Debug, PartialEq)]
struct Column {
    name: String,
    value: Value,
}

/// One structured record flowing through a pipeline.
///
/// Columns keep insertion order and are looked up case-insensitively. A column
/// may hold [`Value::Null`]; [`Row::value`] reports absent columns as null too,
/// while [`Row::get`] keeps the distinction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    columns: SmallVec<[Column; 8]>,
    empty_marker: bool,
}

impl Row {
    /// Creates an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a row from `(column, value)` pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut row = Row::new();
        for (name, value) in pairs {
            row.set(name, value);
        }
        row
    }

    /// Synthetic row standing in for the missing side of an outer join match.
    ///
    /// It carries no columns, so merging it never leaks into output.
    pub fn empty_marker() -> Self {
        Self {
            columns: SmallVec::new(),
            empty_marker: true,
        }
    }

    /// Returns true for rows built by [`Row::empty_marker`].
    pub fn is_empty_marker(&self) -> bool {
        self.empty_marker
    }

    /// Returns the column value, or `None` when the column is absent.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.position(name).map(|idx| &self.columns[idx].value)
    }

    /// Returns the column value, treating absent columns as null.
    pub fn value(&self, name: &str) -> &Value {
        self.get(name).unwrap_or(&NULL)
    }

    /// Returns true when the column exists, even if it holds null.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Sets a column, replacing an existing value in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => self.columns[idx].value = value,
            None => self.columns.push(Column { name, value }),
        }
    }

    /// Builder-style [`Row::set`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Removes a column and returns its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let idx = self.position(name)?;
        Some(self.columns.remove(idx).value)
    }

    /// Column names in insertion order.
    pub fn columns(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.iter().map(|col| col.name.as_str())
    }

    /// `(column, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.columns.iter().map(|col| (col.name.as_str(), &col.value))
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true when the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Extracts the compound key over `columns`. Absent columns contribute null.
    pub fn key<S: AsRef<str>>(&self, columns: &[S]) -> CompoundKey {
        CompoundKey::new(columns.iter().map(|col| self.value(col.as_ref()).clone()))
    }

    /// Returns a new row with this row's columns followed by `other`'s.
    ///
    /// Columns present in both take the value from `other`.
    pub fn merged_with(&self, other: &Row) -> Row {
        let mut merged = Row {
            columns: self.columns.clone(),
            empty_marker: false,
        };
        for col in &other.columns {
            merged.set(col.name.clone(), col.value.clone());
        }
        merged
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|col| names_match(&col.name, name))
    }
}

fn names_match(a: &str, b: &str) -> bool {
    if a.is_ascii() && b.is_ascii() {
        a.eq_ignore_ascii_case(b)
    } else {
        a.to_lowercase() == b.to_lowercase()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for col in &self.columns {
            map.serialize_entry(&col.name, &col.value)?;
        }
        map.end()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Row::from_pairs(iter)
    }
}
