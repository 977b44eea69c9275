#![warn(clippy::todo)]
#![deny(
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    rustdoc::private_intra_doc_links,
    rust_2018_idioms,
    missing_docs,
    clippy::needless_borrow,
    clippy::redundant_clone,
    missing_debug_implementations
)]

//! # Granary
//!
//! `Granary` is the accumulator engine of a vectorized, partitioned hash aggregation.
//!
//! For each measure of the aggregation (`SUM`, `COUNT`, `MIN`, ...), an
//! [`Accumulator`](accumulator::Accumulator) keeps the per-group workspace in a list of
//! fixed capacity batches. The group address resolver, which lives outside of this
//! crate, tells the accumulators where each input record lands with an addressing
//! buffer. Accumulators of the same operator form an
//! [`AccumulatorSet`](accumulator::set::AccumulatorSet):
//!
//! - the [`ResizeCoordinator`](resize::ResizeCoordinator) grows all of them by one
//!   batch atomically, reverting every member if any of them fails
//!
//! - the [`SpillManager`](spill::SpillManager) writes cold partitions to an
//!   [`ObjectStore`](spill::store::ObjectStore) under memory pressure and restores them
//!   when they are referenced again

pub mod accumulator;
pub mod common;
pub mod error;
pub mod memory;
pub mod metric;
pub mod resize;
pub mod spill;

/// The default vector size used by the granary, it is also the default batch capacity
pub const STANDARD_VECTOR_SIZE: usize = 1024;
