//! # Tags
//!
//! Side labels for the generalized (tag-indexed) output mode of the hash
//! join, and the per-combination result mapping they index into.
//!
//! Positional output shapes only scale to two enriching sides; beyond
//! that, each side is given an opaque [`Tag`] at configuration time and
//! every cartesian combination is delivered to the combiner as a
//! [`TagMap`] — one slot per configured tag, holding either the matched
//! item or the explicit absent marker (`None`).
//!
//! ## Example
//!
//! ```rust
//! use tributary_core::operator::tags::Tag;
//!
//! let (t0, t1) = (Tag::new(0), Tag::new(1));
//! assert_ne!(t0, t1);
//! assert_eq!(t0.index(), 0);
//! assert_eq!(format!("{t0}"), "tag0");
//! ```

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Opaque label identifying one enriching side in tag-indexed mode.
///
/// Tags are plain identifiers: the join never interprets them beyond
/// equality, and their numeric value carries no ordering meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag(u32);

impl Tag {
    /// Creates a tag with the given identifier.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The tag's raw identifier.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tag{}", self.0)
    }
}

/// The tag-indexed result mapping for one cartesian combination.
///
/// Built fresh per combination and passed by reference to the combiner.
/// Every configured tag is present; a slot holds `None` when that side
/// had no match for the item's key. Items with their own notion of null
/// represent it inside the value type — a present-but-null match is
/// still `Some`.
#[derive(Debug, Clone)]
pub struct TagMap<'a, V> {
    entries: SmallVec<[(Tag, Option<&'a V>); 4]>,
}

impl<'a, V> TagMap<'a, V> {
    /// Looks up the matched item for a tag.
    ///
    /// Returns `None` both for an absent match and for a tag that was
    /// never configured; use [`TagMap::contains_tag`] to distinguish.
    #[must_use]
    pub fn get(&self, tag: Tag) -> Option<&'a V> {
        self.entries
            .iter()
            .find(|(t, _)| *t == tag)
            .and_then(|(_, v)| *v)
    }

    /// Returns true if `tag` is one of the configured side labels.
    #[must_use]
    pub fn contains_tag(&self, tag: Tag) -> bool {
        self.entries.iter().any(|(t, _)| *t == tag)
    }

    /// Number of configured tags (one per enriching side).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no tags are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(tag, match)` slots in side order.
    pub fn iter(&self) -> impl Iterator<Item = (Tag, Option<&'a V>)> + '_ {
        self.entries.iter().copied()
    }
}

impl<'a, V> FromIterator<(Tag, Option<&'a V>)> for TagMap<'a, V> {
    fn from_iter<I: IntoIterator<Item = (Tag, Option<&'a V>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
