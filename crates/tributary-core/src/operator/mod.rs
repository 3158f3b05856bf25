//! # Operator Module
//!
//! The hash-join pipeline stage and its supporting data model.
//!
//! ## Components
//!
//! - [`hash_join`]: the N-way hash-join operator (intake guard, cartesian
//!   expansion, output projection, state export)
//! - [`side_table`]: immutable per-side lookup tables with single- and
//!   multi-valued entries
//! - [`tags`]: side labels and the tag-indexed result mapping used by the
//!   generalized output mode
//!
//! Operators are synchronous, cooperative steps driven by an external
//! scheduler: each call takes one input (a side-table payload, a close
//! signal, or a primary item) and pushes any resulting records into the
//! caller's [`OutputVec`] before returning.

use smallvec::SmallVec;

pub mod hash_join;
pub mod side_table;
pub mod tags;

pub use hash_join::{HashJoinBuilder, HashJoinMetrics, HashJoinOperator, JoinSnapshot};
pub use side_table::{MatchValue, SideTable};
pub use tags::{Tag, TagMap};

/// Output records produced while processing a single input.
///
/// Uses `SmallVec` so the common cases (no match, one match, a small
/// cartesian fan-out) stay off the heap.
pub type OutputVec<R> = SmallVec<[R; 4]>;

/// Errors that can occur in operators
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    /// Invalid operator configuration, rejected at construction or restore
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// An input arrived outside the side-input delivery protocol
    #[error("Input protocol violation: {0}")]
    ProtocolViolation(String),

    /// Key extraction or output combination failed for one primary item
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}
