//! # Granary vector
//!
//! Columnar building blocks used by the `granary` accumulator engine. It is a small
//! subset of the [`Arrow`] format that only contains what the aggregation workspace
//! needs:
//!
//! - [`AlignedVec`](aligned_vec::AlignedVec): cache line aligned buffer, the raw
//!   storage of every workspace batch
//!
//! - [`Bitmap`](bitmap::Bitmap): validity of the vectors and the workspace batches
//!
//! - [`Vector`](vector::Vector): typed column that feeds the accumulators and carries
//!   their results to the downstream operators
//!
//! [`Arrow`]: https://github.com/apache/arrow-rs

pub mod aligned_vec;
pub mod bitmap;
pub mod block;
mod macros;
pub mod types;
pub mod utils;
pub mod vector;

mod private {
    /// Sealed trait protect against downstream implementations
    pub trait Sealed {}
}
