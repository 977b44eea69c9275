//! Common type alias

/// Identifier of the partition. Partitions group the batches for spill/restore, they
/// do not affect the hashing
pub type PartitionId = u32;

/// Index of the batch in the accumulator
pub type BatchIndex = usize;

/// Position of the measure in the aggregation, it is also the index of the
/// accumulator in the accumulator set
pub type MeasurePosition = usize;
