//! # Tributary Core
//!
//! The streaming join core for Tributary, implementing the hash-join
//! pipeline stage that enriches a driving stream against fully-built
//! side tables.
//!
//! This crate provides:
//! - **Hash-Join Operator**: N-way stream enrichment with cartesian
//!   expansion of multi-valued matches
//! - **Side Tables**: immutable key → match-value lookup tables, one per
//!   enriching input
//! - **Intake Guard**: ordering protocol that holds primary items back
//!   until every side table has been delivered and closed
//! - **State Export**: typed snapshots of accumulated tables and buffered
//!   items for fault-tolerant resume
//!
//! ## Design Principles
//!
//! 1. **Single logical thread** - no locks, no internal I/O, no spawning
//! 2. **Deterministic output** - fixed tables plus a fixed item sequence
//!    always produce the same records in the same order
//! 3. **Opaque items** - primary items, join keys, and side values are
//!    type parameters supplied by the surrounding engine
//!
//! ## Example
//!
//! ```rust
//! use tributary_core::operator::hash_join::HashJoinOperator;
//! use tributary_core::operator::side_table::SideTable;
//! use tributary_core::operator::OutputVec;
//!
//! let mut join: HashJoinOperator<i64, i64, String, (i64, Option<String>)> =
//!     HashJoinOperator::builder()
//!         .key_fn(|order: &i64| Ok(*order))
//!         .combine_one(|order, customer| Ok(Some((*order, customer.cloned()))))
//!         .build()?;
//!
//! let mut customers = SideTable::new();
//! customers.insert_single(1, "alice".to_string());
//!
//! let mut out = OutputVec::new();
//! join.process_table(0, customers)?;
//! join.close_table(0, &mut out)?;
//! join.process_stream(1, &mut out)?;
//!
//! assert_eq!(out.into_vec(), vec![(1, Some("alice".to_string()))]);
//! # Ok::<(), tributary_core::Error>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod operator;

// Re-export key types
pub use operator::hash_join::{HashJoinBuilder, HashJoinOperator, JoinSnapshot};
pub use operator::side_table::{MatchValue, SideTable};
pub use operator::tags::{Tag, TagMap};
pub use operator::OperatorError as Error;

/// Result type for tributary-core operations
pub type Result<T> = std::result::Result<T, Error>;
