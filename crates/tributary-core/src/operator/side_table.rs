//! # Side Tables
//!
//! Immutable lookup tables for the enriching inputs of a hash join.
//!
//! A side table maps a join key to a [`MatchValue`]: either one item, or
//! an explicitly-marked ordered sequence of items. The marker variant is
//! what distinguishes "this key has several matches" from "this key's
//! single matched item happens to be a collection" — the two must never
//! be conflated, so the distinction is structural rather than inferred
//! from the value's shape at run time.
//!
//! Tables are assembled upstream (one completed payload per enriching
//! side) and delivered whole to the join operator, which only ever reads
//! them.
//!
//! ## Example
//!
//! ```rust
//! use tributary_core::operator::side_table::{MatchValue, SideTable};
//!
//! let mut rates = SideTable::new();
//! rates.insert_single("EUR", 1.08_f64);
//! rates.insert_many("USD", vec![1.0, 0.99])?;
//!
//! assert_eq!(rates.get(&"EUR"), Some(&MatchValue::Single(1.08)));
//! assert_eq!(rates.len(), 2);
//! # Ok::<(), tributary_core::Error>(())
//! ```

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::hash::Hash;

use super::OperatorError;

/// The value slot of a side-table entry.
///
/// `Many` is the multi-value marker: only entries tagged with it are
/// expanded element-wise during join expansion. A `Single` entry whose
/// item is itself a collection stays one match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchValue<V> {
    /// The key matched exactly one item.
    Single(V),
    /// The key matched several items, in a fixed order. Must be non-empty.
    Many(Vec<V>),
}

impl<V> MatchValue<V> {
    /// Creates a multi-value entry from an ordered sequence of items.
    ///
    /// # Errors
    ///
    /// Returns `OperatorError::ConfigError` if `values` is empty.
    pub fn many(values: Vec<V>) -> Result<Self, OperatorError> {
        if values.is_empty() {
            return Err(OperatorError::ConfigError(
                "multi-value entry must hold at least one item".into(),
            ));
        }
        Ok(Self::Many(values))
    }

    /// Number of matched items this entry contributes to a join.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Many(values) => values.len(),
        }
    }

    /// Returns true if this entry contributes no items.
    ///
    /// Only possible for a `Many` built without [`MatchValue::many`],
    /// bypassing its non-empty check.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A completed key → match-value mapping for one enriching side.
///
/// Delivered to the join operator as a single payload; read-only for the
/// lifetime of the operator instance (or until a state restore replaces
/// it wholesale).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize, V: Serialize",
    deserialize = "K: Deserialize<'de> + Eq + Hash, V: Deserialize<'de>"
))]
pub struct SideTable<K, V> {
    entries: FxHashMap<K, MatchValue<V>>,
}

impl<K, V> Default for SideTable<K, V> {
    fn default() -> Self {
        Self {
            entries: FxHashMap::default(),
        }
    }
}

impl<K, V> SideTable<K, V> {
    /// Creates an empty side table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct keys in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all entries in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &MatchValue<V>)> {
        self.entries.iter()
    }
}

impl<K: Eq + Hash, V> SideTable<K, V> {
    /// Looks up the match value for a join key.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&MatchValue<V>> {
        self.entries.get(key)
    }

    /// Inserts a single-item entry, returning the previous entry for the
    /// key if there was one.
    pub fn insert_single(&mut self, key: K, value: V) -> Option<MatchValue<V>> {
        self.entries.insert(key, MatchValue::Single(value))
    }

    /// Inserts a multi-value entry, returning the previous entry for the
    /// key if there was one.
    ///
    /// # Errors
    ///
    /// Returns `OperatorError::ConfigError` if `values` is empty.
    pub fn insert_many(
        &mut self,
        key: K,
        values: Vec<V>,
    ) -> Result<Option<MatchValue<V>>, OperatorError> {
        let value = MatchValue::many(values)?;
        Ok(self.entries.insert(key, value))
    }
}

impl<K: Eq + Hash, V: PartialEq> PartialEq for SideTable<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<K: Eq + Hash, V> FromIterator<(K, V)> for SideTable<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k, MatchValue::Single(v)))
                .collect(),
        }
    }
}

impl<K: Eq + Hash, V> FromIterator<(K, MatchValue<V>)> for SideTable<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, MatchValue<V>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
