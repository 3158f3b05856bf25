//! # Hash-Join Operator
//!
//! Joins a driving stream of items against up to N enriching side inputs
//! using equality join keys, producing the cartesian expansion of matches
//! per item with left-outer semantics by default.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      HashJoinOperator                        │
//! │                                                              │
//! │  side 0..N payloads ──▶ ┌──────────────┐                     │
//! │  side 0..N closes   ──▶ │ Intake Guard │ Collecting▶Draining │
//! │                         └──────┬───────┘                     │
//! │                                │ all sides closed            │
//! │                                ▼                             │
//! │  ┌─────────┐   ┌─────────────┐   ┌───────────┐   ┌────────┐  │
//! │  │ Primary │──▶│ Extract Key │──▶│ Cartesian │──▶│ Project│  │
//! │  │ Stream  │   │  (per side) │   │ Expansion │   │ & Emit │  │
//! │  └─────────┘   └─────────────┘   └───────────┘   └────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Input Protocol
//!
//! Every enriching side delivers exactly one completed [`SideTable`]
//! payload ([`HashJoinOperator::process_table`]) followed by a close
//! signal ([`HashJoinOperator::close_table`]). Primary items that arrive
//! before the last side closes are buffered in arrival order and replayed
//! when it does, before any newly-arriving item. There is no timeout: the
//! operator waits as long as needed and never probes an incomplete table.
//!
//! ## Output Shapes
//!
//! - **Positional** (one or two sides): the combiner receives the item
//!   plus one `Option<&V>` per side.
//! - **Tag-indexed** (any side count): each side is labelled with a
//!   [`Tag`] and the combiner receives the item plus a [`TagMap`].
//!
//! A combiner returning `Ok(None)` suppresses that combination, which is
//! how inner-join or arbitrary filtering semantics are expressed on top
//! of the left-outer expansion.
//!
//! ## Example
//!
//! ```rust
//! use tributary_core::operator::hash_join::HashJoinOperator;
//! use tributary_core::operator::side_table::SideTable;
//! use tributary_core::operator::OutputVec;
//!
//! let mut join: HashJoinOperator<
//!     i64,
//!     i64,
//!     &'static str,
//!     (i64, Option<&'static str>, Option<&'static str>),
//! > = HashJoinOperator::builder()
//!     .key_fn(|order: &i64| Ok(*order))
//!     .key_fn(|order: &i64| Ok(*order))
//!     .combine_two(|order, customer, payment| {
//!         Ok(Some((*order, customer.copied(), payment.copied())))
//!     })
//!     .build()?;
//!
//! let customers: SideTable<i64, &'static str> =
//!     [(1, "alice"), (3, "carol")].into_iter().collect();
//! let payments: SideTable<i64, &'static str> =
//!     [(1, "card"), (2, "wire")].into_iter().collect();
//!
//! let mut out = OutputVec::new();
//! join.process_table(0, customers)?;
//! join.close_table(0, &mut out)?;
//! join.process_table(1, payments)?;
//! join.close_table(1, &mut out)?;
//!
//! for order in [1, 2, 3] {
//!     join.process_stream(order, &mut out)?;
//! }
//!
//! assert_eq!(
//!     out.into_vec(),
//!     vec![
//!         (1, Some("alice"), Some("card")),
//!         (2, None, Some("wire")),
//!         (3, Some("carol"), None),
//!     ],
//! );
//! # Ok::<(), tributary_core::Error>(())
//! ```
//!
//! ## Determinism
//!
//! Combinations are enumerated in row-major order: side 0 varies slowest,
//! the last side fastest, multi-value matches in their stored order. For
//! a fixed set of side tables and a fixed item sequence the emitted
//! records are identical across runs, which downstream consumers may rely
//! on.

use super::side_table::{MatchValue, SideTable};
use super::tags::{Tag, TagMap};
use super::{OperatorError, OutputVec};
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// Key-extraction function for one enriching side.
pub type KeyFn<T, K> = Box<dyn Fn(&T) -> Result<K, OperatorError> + Send>;

/// Positional combiner for a join with one enriching side.
pub type CombineOneFn<T, V, R> =
    Box<dyn Fn(&T, Option<&V>) -> Result<Option<R>, OperatorError> + Send>;

/// Positional combiner for a join with two enriching sides.
pub type CombineTwoFn<T, V, R> =
    Box<dyn Fn(&T, Option<&V>, Option<&V>) -> Result<Option<R>, OperatorError> + Send>;

/// Tag-indexed combiner for the generalized N-way form.
pub type CombineTaggedFn<T, V, R> =
    Box<dyn for<'a> Fn(&T, &TagMap<'a, V>) -> Result<Option<R>, OperatorError> + Send>;

/// Static counter for generating unique operator IDs.
static HASH_JOIN_OPERATOR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// The configured output shape, selected at construction.
enum Projector<T, V, R> {
    One(CombineOneFn<T, V, R>),
    Two(CombineTwoFn<T, V, R>),
    Tagged {
        tags: Vec<Tag>,
        combine: CombineTaggedFn<T, V, R>,
    },
}

/// Intake state of the ordering guard.
///
/// `Collecting` buffers primary items until every side has closed;
/// `Draining` probes them against the completed tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntakePhase {
    Collecting,
    Draining,
}

/// One enriching side's intake slot: the delivered payload plus whether
/// the side has signalled completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize, V: Serialize",
    deserialize = "K: Deserialize<'de> + Eq + Hash, V: Deserialize<'de>"
))]
struct SideSlot<K, V> {
    table: Option<SideTable<K, V>>,
    closed: bool,
}

/// The per-side match set probed for one primary item.
enum MatchSet<'a, V> {
    Absent,
    One(&'a V),
    Many(&'a [V]),
}

impl<'a, V> MatchSet<'a, V> {
    fn from_entry(entry: Option<&'a MatchValue<V>>) -> Self {
        match entry {
            None => Self::Absent,
            Some(MatchValue::Single(value)) => Self::One(value),
            // An empty marker cannot be built through the public API;
            // treat one as a plain miss.
            Some(MatchValue::Many(values)) if values.is_empty() => Self::Absent,
            Some(MatchValue::Many(values)) => Self::Many(values),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Absent | Self::One(_) => 1,
            Self::Many(values) => values.len(),
        }
    }

    fn get(&self, index: usize) -> Option<&'a V> {
        match self {
            Self::Absent => None,
            Self::One(value) => Some(value),
            Self::Many(values) => Some(&values[index]),
        }
    }
}

/// Advances the odometer over the match sets, last side fastest.
///
/// Returns false once every combination has been enumerated.
fn advance<V>(cursors: &mut [usize], sets: &[MatchSet<'_, V>]) -> bool {
    for side in (0..cursors.len()).rev() {
        cursors[side] += 1;
        if cursors[side] < sets[side].len() {
            return true;
        }
        cursors[side] = 0;
    }
    false
}

/// Metrics for tracking hash-join activity.
#[derive(Debug, Clone, Default)]
pub struct HashJoinMetrics {
    /// Number of side-table payloads stored.
    pub tables_received: u64,
    /// Number of primary items probed against the tables.
    pub items_processed: u64,
    /// Number of primary items buffered while sides were still open.
    pub items_buffered: u64,
    /// Number of buffered items replayed after the last side closed.
    pub items_replayed: u64,
    /// Number of items whose key extraction or combination failed.
    pub items_failed: u64,
    /// Number of cartesian combinations enumerated.
    pub combinations_expanded: u64,
    /// Number of combinations the combiner suppressed.
    pub combinations_filtered: u64,
    /// Number of output records emitted.
    pub records_emitted: u64,
}

impl HashJoinMetrics {
    /// Creates new metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets all counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Exported intake state: accumulated side tables plus buffered items.
///
/// Produced by [`HashJoinOperator::snapshot`] and consumed by
/// [`HashJoinOperator::restore`]. Serializable so the surrounding engine
/// can persist it in whatever checkpoint format it owns; restoring into
/// a fresh, identically-configured operator resumes processing exactly
/// where the original left off, without re-running the upstream
/// table-building stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "T: Serialize, K: Serialize, V: Serialize",
    deserialize = "T: Deserialize<'de>, K: Deserialize<'de> + Eq + Hash, V: Deserialize<'de>"
))]
pub struct JoinSnapshot<T, K, V> {
    sides: Vec<SideSlot<K, V>>,
    pending: VecDeque<T>,
}

impl<T, K, V> JoinSnapshot<T, K, V> {
    /// Number of enriching sides captured in this snapshot.
    #[must_use]
    pub fn side_count(&self) -> usize {
        self.sides.len()
    }

    /// Number of buffered-but-unprocessed primary items captured.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if every side had closed when the snapshot was taken.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.sides.iter().all(|slot| slot.closed)
    }
}

/// Builder for [`HashJoinOperator`].
///
/// Collects one key function per enriching side, exactly one combiner
/// matching the desired output shape, optional side tags, and an optional
/// operator ID. All arity validation happens in
/// [`HashJoinBuilder::build`].
pub struct HashJoinBuilder<T, K, V, R> {
    key_fns: Vec<KeyFn<T, K>>,
    one: Option<CombineOneFn<T, V, R>>,
    two: Option<CombineTwoFn<T, V, R>>,
    tagged: Option<CombineTaggedFn<T, V, R>>,
    tags: Option<Vec<Tag>>,
    operator_id: Option<String>,
}

impl<T, K, V, R> Default for HashJoinBuilder<T, K, V, R> {
    fn default() -> Self {
        Self {
            key_fns: Vec::new(),
            one: None,
            two: None,
            tagged: None,
            tags: None,
            operator_id: None,
        }
    }
}

impl<T, K, V, R> HashJoinBuilder<T, K, V, R> {
    /// Adds the key-extraction function for the next enriching side.
    ///
    /// Call order defines side order: the first call is side 0. Sides may
    /// extract different derived attributes of the same item.
    #[must_use]
    pub fn key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&T) -> Result<K, OperatorError> + Send + 'static,
    {
        self.key_fns.push(Box::new(key_fn));
        self
    }

    /// Sets the positional combiner for a single-side join.
    #[must_use]
    pub fn combine_one<F>(mut self, combine: F) -> Self
    where
        F: Fn(&T, Option<&V>) -> Result<Option<R>, OperatorError> + Send + 'static,
    {
        self.one = Some(Box::new(combine));
        self
    }

    /// Sets the positional combiner for a two-side join.
    #[must_use]
    pub fn combine_two<F>(mut self, combine: F) -> Self
    where
        F: Fn(&T, Option<&V>, Option<&V>) -> Result<Option<R>, OperatorError> + Send + 'static,
    {
        self.two = Some(Box::new(combine));
        self
    }

    /// Sets the tag-indexed combiner for the generalized N-way form.
    ///
    /// Requires [`HashJoinBuilder::tags`] with one tag per side.
    #[must_use]
    pub fn combine_tagged<F>(mut self, combine: F) -> Self
    where
        F: for<'a> Fn(&T, &TagMap<'a, V>) -> Result<Option<R>, OperatorError> + Send + 'static,
    {
        self.tagged = Some(Box::new(combine));
        self
    }

    /// Sets the side tags for tag-indexed mode, in side order.
    #[must_use]
    pub fn tags<I>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = Tag>,
    {
        self.tags = Some(tags.into_iter().collect());
        self
    }

    /// Sets a custom operator ID.
    #[must_use]
    pub fn operator_id(mut self, id: String) -> Self {
        self.operator_id = Some(id);
        self
    }

    /// Builds the operator.
    ///
    /// # Errors
    ///
    /// Returns `OperatorError::ConfigError` if no key function was
    /// supplied, if the number of combiners is not exactly one, if a
    /// positional combiner's arity does not match the side count, or if
    /// tags are missing, duplicated, or their count differs from the
    /// side count.
    pub fn build(self) -> Result<HashJoinOperator<T, K, V, R>, OperatorError> {
        let side_count = self.key_fns.len();
        if side_count == 0 {
            return Err(OperatorError::ConfigError(
                "at least one enriching side (key function) is required".into(),
            ));
        }

        let projector = match (self.one, self.two, self.tagged) {
            (Some(combine), None, None) => {
                if self.tags.is_some() {
                    return Err(OperatorError::ConfigError(
                        "tags require the tag-indexed combiner".into(),
                    ));
                }
                if side_count != 1 {
                    return Err(OperatorError::ConfigError(format!(
                        "single-side combiner supplied for {side_count} sides"
                    )));
                }
                Projector::One(combine)
            }
            (None, Some(combine), None) => {
                if self.tags.is_some() {
                    return Err(OperatorError::ConfigError(
                        "tags require the tag-indexed combiner".into(),
                    ));
                }
                if side_count != 2 {
                    return Err(OperatorError::ConfigError(format!(
                        "two-side combiner supplied for {side_count} sides"
                    )));
                }
                Projector::Two(combine)
            }
            (None, None, Some(combine)) => {
                let tags = self.tags.ok_or_else(|| {
                    OperatorError::ConfigError(
                        "tag-indexed combiner requires one tag per side".into(),
                    )
                })?;
                if tags.len() != side_count {
                    return Err(OperatorError::ConfigError(format!(
                        "{} tags supplied for {side_count} sides",
                        tags.len()
                    )));
                }
                for (index, tag) in tags.iter().enumerate() {
                    if tags[..index].contains(tag) {
                        return Err(OperatorError::ConfigError(format!(
                            "duplicate side tag {tag}"
                        )));
                    }
                }
                Projector::Tagged { tags, combine }
            }
            _ => {
                return Err(OperatorError::ConfigError(
                    "exactly one combiner must be supplied".into(),
                ));
            }
        };

        let operator_id = self.operator_id.unwrap_or_else(|| {
            let num = HASH_JOIN_OPERATOR_COUNTER.fetch_add(1, Ordering::Relaxed);
            format!("hash_join_{num}")
        });

        Ok(HashJoinOperator {
            operator_id,
            key_fns: self.key_fns,
            projector,
            sides: (0..side_count)
                .map(|_| SideSlot {
                    table: None,
                    closed: false,
                })
                .collect(),
            pending: VecDeque::new(),
            phase: IntakePhase::Collecting,
            metrics: HashJoinMetrics::new(),
        })
    }
}

/// Streaming multi-way hash-join operator.
///
/// Driven synchronously by an external scheduler: side-table payloads and
/// close signals arrive through [`HashJoinOperator::process_table`] /
/// [`HashJoinOperator::close_table`], primary items through
/// [`HashJoinOperator::process_stream`]. Output records are pushed into
/// the caller's [`OutputVec`] in deterministic order. The operator holds
/// no locks and performs no I/O; side tables are written once during
/// intake and read-only afterwards.
pub struct HashJoinOperator<T, K, V, R> {
    /// Operator ID.
    operator_id: String,
    /// One key-extraction function per enriching side, in side order.
    key_fns: Vec<KeyFn<T, K>>,
    /// Output shape and its combiner.
    projector: Projector<T, V, R>,
    /// Intake slots, one per side.
    sides: Vec<SideSlot<K, V>>,
    /// Primary items received before all sides closed, in arrival order.
    pending: VecDeque<T>,
    /// Intake guard phase.
    phase: IntakePhase,
    /// Metrics.
    metrics: HashJoinMetrics,
}

impl<T, K, V, R> std::fmt::Debug for HashJoinOperator<T, K, V, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashJoinOperator")
            .field("operator_id", &self.operator_id)
            .field("side_count", &self.sides.len())
            .field("pending", &self.pending.len())
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl<T, K, V, R> HashJoinOperator<T, K, V, R> {
    /// Creates a new builder for a hash-join operator.
    #[must_use]
    pub fn builder() -> HashJoinBuilder<T, K, V, R> {
        HashJoinBuilder::default()
    }

    /// Returns the operator ID.
    #[must_use]
    pub fn operator_id(&self) -> &str {
        &self.operator_id
    }

    /// Number of enriching sides.
    #[must_use]
    pub fn side_count(&self) -> usize {
        self.sides.len()
    }

    /// The configured side tags, if running in tag-indexed mode.
    #[must_use]
    pub fn tags(&self) -> Option<&[Tag]> {
        match &self.projector {
            Projector::Tagged { tags, .. } => Some(tags),
            _ => None,
        }
    }

    /// Returns the metrics.
    #[must_use]
    pub fn metrics(&self) -> &HashJoinMetrics {
        &self.metrics
    }

    /// Resets the metrics.
    pub fn reset_metrics(&mut self) {
        self.metrics.reset();
    }

    /// Returns true once every side has delivered its table and closed.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.phase == IntakePhase::Draining
    }

    /// Returns true once all sides are closed and no buffered item
    /// remains unprocessed.
    ///
    /// The scheduler polls this after the primary input's completion
    /// signal to decide whether the stage is done.
    #[must_use]
    pub fn completed(&self) -> bool {
        self.ready() && self.pending.is_empty()
    }

    /// Number of primary items currently buffered by the intake guard.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Stores one enriching side's completed table payload.
    ///
    /// # Errors
    ///
    /// Returns `OperatorError::ProtocolViolation` if `side` is out of
    /// range, if the side already delivered a payload, or if the side has
    /// already closed.
    pub fn process_table(
        &mut self,
        side: usize,
        table: SideTable<K, V>,
    ) -> Result<(), OperatorError> {
        let side_count = self.sides.len();
        let slot = self.sides.get_mut(side).ok_or_else(|| {
            OperatorError::ProtocolViolation(format!(
                "side {side} is out of range for {side_count} configured sides"
            ))
        })?;
        if slot.closed {
            return Err(OperatorError::ProtocolViolation(format!(
                "side {side} delivered a table after closing"
            )));
        }
        if slot.table.is_some() {
            return Err(OperatorError::ProtocolViolation(format!(
                "side {side} delivered more than one table"
            )));
        }
        slot.table = Some(table);
        self.metrics.tables_received += 1;
        tracing::trace!("{}: stored table for side {side}", self.operator_id);
        Ok(())
    }

    /// Exports the operator's intake state: every delivered side table
    /// and the buffered primary items, in order.
    #[must_use]
    pub fn snapshot(&self) -> JoinSnapshot<T, K, V>
    where
        T: Clone,
        K: Clone,
        V: Clone,
    {
        JoinSnapshot {
            sides: self.sides.clone(),
            pending: self.pending.clone(),
        }
    }

    /// Replaces the operator's intake state with a previously exported
    /// snapshot.
    ///
    /// The snapshot is validated before anything is touched, so a failed
    /// restore leaves the operator unchanged. A partially-populated
    /// snapshot resumes in the collecting phase and keeps waiting for the
    /// remaining sides.
    ///
    /// # Errors
    ///
    /// Returns `OperatorError::ConfigError` if the snapshot's side count
    /// differs from the configured side count, or if a snapshot side is
    /// marked closed without holding a table.
    pub fn restore(&mut self, snapshot: JoinSnapshot<T, K, V>) -> Result<(), OperatorError> {
        if snapshot.sides.len() != self.sides.len() {
            return Err(OperatorError::ConfigError(format!(
                "snapshot holds {} sides, operator is configured with {}",
                snapshot.sides.len(),
                self.sides.len()
            )));
        }
        for (side, slot) in snapshot.sides.iter().enumerate() {
            if slot.closed && slot.table.is_none() {
                return Err(OperatorError::ConfigError(format!(
                    "snapshot side {side} is closed but holds no table"
                )));
            }
        }

        self.phase = if snapshot.sides.iter().all(|slot| slot.closed) {
            IntakePhase::Draining
        } else {
            IntakePhase::Collecting
        };
        self.sides = snapshot.sides;
        self.pending = snapshot.pending;
        tracing::debug!(
            "{}: restored state, {} buffered items",
            self.operator_id,
            self.pending.len()
        );
        Ok(())
    }
}

impl<T, K, V, R> HashJoinOperator<T, K, V, R>
where
    K: Eq + Hash,
{
    /// Marks one enriching side as closed.
    ///
    /// When the final side closes, primary items buffered by the intake
    /// guard are replayed in arrival order and their output records are
    /// pushed into `out`.
    ///
    /// # Errors
    ///
    /// Returns `OperatorError::ProtocolViolation` if `side` is out of
    /// range, closed twice, or closed without having delivered its table;
    /// `OperatorError::ProcessingFailed` if a replayed item fails key
    /// extraction or combination (that item emits nothing and is dropped,
    /// later buffered items stay queued for the next call).
    pub fn close_table(
        &mut self,
        side: usize,
        out: &mut OutputVec<R>,
    ) -> Result<(), OperatorError> {
        let side_count = self.sides.len();
        let slot = self.sides.get_mut(side).ok_or_else(|| {
            OperatorError::ProtocolViolation(format!(
                "side {side} is out of range for {side_count} configured sides"
            ))
        })?;
        if slot.closed {
            return Err(OperatorError::ProtocolViolation(format!(
                "side {side} closed more than once"
            )));
        }
        if slot.table.is_none() {
            return Err(OperatorError::ProtocolViolation(format!(
                "side {side} closed without delivering its table"
            )));
        }
        slot.closed = true;

        if self.sides.iter().all(|slot| slot.closed) {
            self.phase = IntakePhase::Draining;
            tracing::debug!(
                "{}: all side tables closed, replaying {} buffered items",
                self.operator_id,
                self.pending.len()
            );
            self.drain_pending(out)?;
        }
        Ok(())
    }

    /// Processes one primary item.
    ///
    /// While any side remains open the item is buffered and nothing is
    /// emitted. Once all sides are closed, any still-buffered items are
    /// replayed first (preserving arrival order), then the new item is
    /// joined and its records pushed into `out`.
    ///
    /// # Errors
    ///
    /// Returns `OperatorError::ProcessingFailed` if key extraction or
    /// combination fails. The failing item emits nothing; side tables and
    /// records already pushed for earlier items are unaffected. If the
    /// failure hits a replayed item, the new item is re-queued behind the
    /// remaining buffer so overall order is preserved.
    pub fn process_stream(&mut self, item: T, out: &mut OutputVec<R>) -> Result<(), OperatorError> {
        match self.phase {
            IntakePhase::Collecting => {
                self.pending.push_back(item);
                self.metrics.items_buffered += 1;
                Ok(())
            }
            IntakePhase::Draining => {
                if !self.pending.is_empty() {
                    if let Err(err) = self.drain_pending(out) {
                        self.pending.push_back(item);
                        return Err(err);
                    }
                }
                self.process_ready(&item, out)
            }
        }
    }

    /// Handles the primary input's completion signal.
    ///
    /// Drains any still-buffered items (possible after a replay failure)
    /// and reports whether the stage is fully done. While sides remain
    /// open this returns `Ok(false)` and the scheduler is expected to
    /// call again after the remaining sides close.
    ///
    /// # Errors
    ///
    /// Returns `OperatorError::ProcessingFailed` if a drained item fails
    /// key extraction or combination.
    pub fn complete_stream(&mut self, out: &mut OutputVec<R>) -> Result<bool, OperatorError> {
        if self.phase == IntakePhase::Draining && !self.pending.is_empty() {
            self.drain_pending(out)?;
        }
        Ok(self.completed())
    }

    /// Replays buffered items in arrival order.
    fn drain_pending(&mut self, out: &mut OutputVec<R>) -> Result<(), OperatorError> {
        while let Some(item) = self.pending.pop_front() {
            self.metrics.items_replayed += 1;
            self.process_ready(&item, out)?;
        }
        Ok(())
    }

    fn process_ready(&mut self, item: &T, out: &mut OutputVec<R>) -> Result<(), OperatorError> {
        self.metrics.items_processed += 1;
        match self.join_item(item, out) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.metrics.items_failed += 1;
                Err(err)
            }
        }
    }

    /// Expands and projects one primary item against the side tables.
    ///
    /// All per-side keys are extracted up front and projected records are
    /// staged locally, so a failure anywhere leaves `out` untouched: an
    /// item either contributes all of its combinations or none.
    fn join_item(&mut self, item: &T, out: &mut OutputVec<R>) -> Result<(), OperatorError> {
        let mut staged: OutputVec<R> = OutputVec::new();
        let mut expanded = 0_u64;
        let mut filtered = 0_u64;
        let mut emitted = 0_u64;

        {
            let keys: SmallVec<[K; 4]> = self
                .key_fns
                .iter()
                .map(|key_fn| key_fn(item))
                .collect::<Result<_, _>>()?;

            let match_sets: SmallVec<[MatchSet<'_, V>; 4]> = keys
                .iter()
                .zip(self.sides.iter())
                .map(|(key, slot)| {
                    MatchSet::from_entry(slot.table.as_ref().and_then(|table| table.get(key)))
                })
                .collect();

            let mut cursors: SmallVec<[usize; 4]> = smallvec![0; match_sets.len()];
            loop {
                expanded += 1;
                let pick = |side: usize| match_sets[side].get(cursors[side]);
                let projected = match &self.projector {
                    Projector::One(combine) => combine(item, pick(0)),
                    Projector::Two(combine) => combine(item, pick(0), pick(1)),
                    Projector::Tagged { tags, combine } => {
                        let row: TagMap<'_, V> = tags
                            .iter()
                            .enumerate()
                            .map(|(side, tag)| (*tag, pick(side)))
                            .collect();
                        combine(item, &row)
                    }
                }?;

                match projected {
                    Some(record) => {
                        emitted += 1;
                        staged.push(record);
                    }
                    None => filtered += 1,
                }

                if !advance(&mut cursors, &match_sets) {
                    break;
                }
            }
        }

        self.metrics.combinations_expanded += expanded;
        self.metrics.combinations_filtered += filtered;
        self.metrics.records_emitted += emitted;
        out.append(&mut staged);
        Ok(())
    }
}
