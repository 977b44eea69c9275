//! Accumulators of the hash aggregation
//!
//! An [`Accumulator`] owns the workspace of one measure: a dense list of [`Batch`]es,
//! each of them holds the state of `batch_capacity` groups. The group address
//! resolver tells the accumulator which slot each input record is aggregated into with
//! an [`Addressing`] buffer.
//!
//! The batch list only grows through the resize protocol driven by the
//! [`ResizeCoordinator`](crate::resize::ResizeCoordinator): the coordinator appends a
//! tentative batch to every accumulator of the set, then commits or reverts all of
//! them.

pub mod addressing;
pub mod batch;
pub mod measure;
pub mod set;

use std::mem::size_of;
use std::sync::Arc;

use granary_vector::types::LogicalType;
use granary_vector::vector::{Vector, VectorError};
use snafu::{OptionExt, Snafu, ensure};

use self::addressing::Addressing;
use self::batch::{Batch, BatchBuffer, BufferSpec};
use self::measure::{MeasureKind, MeasureSpec};
use crate::common::config::ConfigError;
use crate::common::types::{BatchIndex, MeasurePosition, PartitionId};
use crate::error::{Classify, ErrorClass};
use crate::spill::store::BlobHandle;

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AccumulatorError {
    #[snafu(display("`{kind}` does not support the input `{input:?}`"))]
    UnsupportedInput {
        kind: MeasureKind,
        input: Option<LogicalType>,
    },
    #[snafu(display("Input of the `{kind}` accumulator is not bound"))]
    InputNotBound { kind: MeasureKind },
    #[snafu(display("Input of the measure has logical type `{actual}`, expect `{expect}`"))]
    InputTypeMismatch {
        expect: LogicalType,
        actual: LogicalType,
    },
    #[snafu(display(
        "Batch `{batch_index}` is out of range, the accumulator only has `{num_batches}` batches"
    ))]
    BatchOutOfRange {
        batch_index: BatchIndex,
        num_batches: usize,
    },
    #[snafu(display("Slot `{slot}` is out of range, the batch capacity is `{capacity}`"))]
    SlotOutOfRange { slot: usize, capacity: usize },
    #[snafu(display("Record `{record}` is out of range, the input only has `{input_len}` records"))]
    RecordOutOfRange { record: usize, input_len: usize },
    #[snafu(display(
        "Addressing record targets batch `{batch_index}` with partition `{actual}`, but the batch belongs to partition `{expect}`"
    ))]
    PartitionMismatch {
        batch_index: BatchIndex,
        expect: PartitionId,
        actual: PartitionId,
    },
    #[snafu(display(
        "Batch `{batch_index}` of partition `{partition}` is spilled, restore the partition before accumulating into it"
    ))]
    StaleBatch {
        batch_index: BatchIndex,
        partition: PartitionId,
    },
    #[snafu(display("Batch `{batch_index}` is spilled, it can not be read"))]
    SpilledBatch { batch_index: BatchIndex },
    #[snafu(display(
        "Batch `{batch_index}` is spilled while accumulating without spill awareness"
    ))]
    UnexpectedSpilledBatch { batch_index: BatchIndex },
    #[snafu(display(
        "Accumulator has `{actual}` batches, but the accumulator set expect `{expect}` batches"
    ))]
    BatchCountMismatch { expect: usize, actual: usize },
    #[snafu(display("Accumulator does not have a pending resize"))]
    NoPendingResize,
    #[snafu(display("Accumulator already has a pending resize"))]
    ResizeInProgress,
    #[snafu(display("Buffer `{actual:?}` does not match the buffer spec `{expect:?}` of the accumulator"))]
    BufferMismatch {
        expect: BufferSpec,
        actual: BufferSpec,
    },
    #[snafu(display("Measure `{measure}` is out of range, the set only has `{num_measures}` measures"))]
    MeasureOutOfRange {
        measure: MeasurePosition,
        num_measures: usize,
    },
    #[snafu(display("Accumulator set requires at least one measure"))]
    EmptySet,
    #[snafu(display("Invalid configuration for the accumulator set"))]
    InvalidConfig { source: ConfigError },
    #[snafu(display("Failed to build the output"))]
    Vector { source: VectorError },
}

/// Result type of the accumulator
pub type Result<T> = std::result::Result<T, AccumulatorError>;

impl Classify for AccumulatorError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::StaleBatch { .. } | Self::SpilledBatch { .. } => ErrorClass::Stale,
            Self::UnexpectedSpilledBatch { .. }
            | Self::BatchCountMismatch { .. }
            | Self::NoPendingResize
            | Self::ResizeInProgress
            | Self::Vector { .. } => ErrorClass::Fatal,
            Self::UnsupportedInput { .. }
            | Self::InputNotBound { .. }
            | Self::InputTypeMismatch { .. }
            | Self::BatchOutOfRange { .. }
            | Self::SlotOutOfRange { .. }
            | Self::RecordOutOfRange { .. }
            | Self::PartitionMismatch { .. }
            | Self::BufferMismatch { .. }
            | Self::MeasureOutOfRange { .. }
            | Self::EmptySet
            | Self::InvalidConfig { .. } => ErrorClass::Invalid,
        }
    }
}

/// Accumulator of a single measure
#[derive(Debug)]
pub struct Accumulator {
    spec: MeasureSpec,
    buffer_spec: BufferSpec,
    batches: Vec<Batch>,
    /// Shared with the upstream, replaced before each accumulate
    input: Option<Arc<Vector>>,
    /// The last batch is tentative
    pending_resize: bool,
}

impl Accumulator {
    /// Create an accumulator without batch. The batches are added by the resize
    /// coordinator
    pub fn new(spec: MeasureSpec, batch_capacity: usize) -> Self {
        Self {
            spec,
            buffer_spec: spec.buffer_spec(batch_capacity),
            batches: Vec::new(),
            input: None,
            pending_resize: false,
        }
    }

    /// Spec of the measure
    #[inline]
    pub fn spec(&self) -> &MeasureSpec {
        &self.spec
    }

    /// Spec of the buffer each batch should have
    #[inline]
    pub fn buffer_spec(&self) -> &BufferSpec {
        &self.buffer_spec
    }

    /// Number of groups a batch can hold
    #[inline]
    pub fn batch_capacity(&self) -> usize {
        self.buffer_spec.capacity
    }

    /// Number of batches, including the tentative one
    #[inline]
    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }

    /// Get the batches
    #[inline]
    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    /// Returns true if the last batch is tentative
    #[inline]
    pub fn has_pending_resize(&self) -> bool {
        self.pending_resize
    }

    /// Bind the input vector
    #[inline]
    pub fn set_input(&mut self, input: Arc<Vector>) {
        self.input = Some(input);
    }

    /// Get the bound input
    #[inline]
    pub fn input(&self) -> Option<&Arc<Vector>> {
        self.input.as_ref()
    }

    /// Release the binding of the input
    #[inline]
    pub fn clear_input(&mut self) {
        self.input = None;
    }

    /// Aggregate the bound input into the addressed groups. If any record targets a
    /// spilled batch, [`AccumulatorError::StaleBatch`] is returned before any group is
    /// modified, caller should restore the partition and retry
    pub fn accumulate(&mut self, addressing: Addressing<'_>) -> Result<()> {
        self.validate(addressing, true)?;
        self.apply(addressing)
    }

    /// Same as [`Self::accumulate`], but partition and residency of the batches are
    /// not checked. Used when spill is disabled
    pub fn accumulate_no_spill(&mut self, addressing: Addressing<'_>) -> Result<()> {
        self.validate(addressing, false)?;
        self.apply(addressing)
    }

    /// Check every record of the addressing against the accumulator
    pub(crate) fn validate(&self, addressing: Addressing<'_>, spill_aware: bool) -> Result<()> {
        let input_len = match self.spec.input_type() {
            None => None,
            Some(expect) => {
                let input = self
                    .input
                    .as_ref()
                    .context(InputNotBoundSnafu {
                        kind: self.spec.kind(),
                    })?;
                ensure!(
                    input.logical_type() == expect,
                    InputTypeMismatchSnafu {
                        expect,
                        actual: input.logical_type()
                    }
                );
                Some(input.len())
            }
        };

        let capacity = self.batch_capacity();
        let num_batches = self.batches.len();
        for record in addressing.records() {
            let batch_index = record.batch_index as usize;
            let batch = self.batches.get(batch_index).context(BatchOutOfRangeSnafu {
                batch_index,
                num_batches,
            })?;
            ensure!(
                (record.slot as usize) < capacity,
                SlotOutOfRangeSnafu {
                    slot: record.slot as usize,
                    capacity
                }
            );
            if let Some(input_len) = input_len {
                ensure!(
                    (record.record as usize) < input_len,
                    RecordOutOfRangeSnafu {
                        record: record.record as usize,
                        input_len
                    }
                );
            }
            if spill_aware {
                ensure!(
                    !batch.is_spilled(),
                    StaleBatchSnafu {
                        batch_index,
                        partition: batch.partition()
                    }
                );
                ensure!(
                    batch.partition() == record.partition,
                    PartitionMismatchSnafu {
                        batch_index,
                        expect: batch.partition(),
                        actual: record.partition
                    }
                );
            }
        }

        Ok(())
    }

    /// Update the groups, the addressing is validated
    #[inline]
    pub(crate) fn apply(&mut self, addressing: Addressing<'_>) -> Result<()> {
        self.spec.update(
            self.input.as_deref(),
            &mut self.batches,
            addressing.records(),
        )
    }

    /// Materialize the batch. The batch is not modified, calling it repeatedly yields
    /// identical vectors
    pub fn output(&self, batch_index: BatchIndex) -> Result<Vector> {
        let batch = self.batches.get(batch_index).context(BatchOutOfRangeSnafu {
            batch_index,
            num_batches: self.batches.len(),
        })?;
        let buffer = batch.buffer().context(SpilledBatchSnafu { batch_index })?;
        self.spec.output(buffer)
    }

    /// Memory used by the accumulator: the workspace, the accumulator itself and the
    /// binding of the input
    pub fn size_in_bytes(&self) -> usize {
        size_of::<Self>() + self.batches.capacity() * size_of::<Batch>() + self.total_buffer_size()
    }

    /// Bytes allocated by the buffers of the resident batches
    pub fn total_buffer_size(&self) -> usize {
        self.batches.iter().map(Batch::buffer_size).sum()
    }

    /// Append a tentative batch backed by the buffer. It becomes permanent after
    /// [`Self::commit_resize`]
    pub fn add_batch(&mut self, buffer: BatchBuffer) -> Result<()> {
        ensure!(!self.pending_resize, ResizeInProgressSnafu);
        ensure!(
            *buffer.spec() == self.buffer_spec,
            BufferMismatchSnafu {
                expect: self.buffer_spec,
                actual: *buffer.spec()
            }
        );
        self.batches.push(Batch::new(buffer));
        self.pending_resize = true;
        Ok(())
    }

    /// Drop the tentative batch and release its buffer
    pub fn revert_resize(&mut self) -> Result<()> {
        ensure!(self.pending_resize, NoPendingResizeSnafu);
        self.batches.pop();
        self.pending_resize = false;
        Ok(())
    }

    /// Make the tentative batch permanent
    pub fn commit_resize(&mut self) -> Result<()> {
        ensure!(self.pending_resize, NoPendingResizeSnafu);
        self.pending_resize = false;
        Ok(())
    }

    /// Check the number of batches
    pub fn verify_batch_count(&self, expect: usize) -> Result<()> {
        ensure!(
            self.batches.len() == expect,
            BatchCountMismatchSnafu {
                expect,
                actual: self.batches.len()
            }
        );
        Ok(())
    }

    /// Check the accumulator can be reset: no pending resize and no spilled batch
    pub(crate) fn check_resettable(&self) -> Result<()> {
        ensure!(!self.pending_resize, ResizeInProgressSnafu);
        if let Some(batch_index) = self.batches.iter().position(Batch::is_spilled) {
            return SpilledBatchSnafu { batch_index }.fail();
        }
        Ok(())
    }

    /// Release all of the batches except the first one and reset the groups in the
    /// first batch
    pub fn reset_to_minimum_size(&mut self) -> Result<()> {
        self.check_resettable()?;
        self.batches.truncate(1);
        if let Some(buffer) = self.batches.first_mut().and_then(Batch::buffer_mut) {
            buffer.zero();
        }
        Ok(())
    }

    /// Replace the buffer of the batch with the handle of the blob. Returns the
    /// released buffer, `None` if the batch does not exist or is spilled already
    pub(crate) fn mark_spilled(
        &mut self,
        batch_index: BatchIndex,
        handle: BlobHandle,
    ) -> Option<BatchBuffer> {
        let batch = self.batches.get_mut(batch_index)?;
        if batch.is_spilled() {
            return None;
        }
        match batch.replace_residency(batch::Residency::Spilled(handle)) {
            batch::Residency::Resident(buffer) => Some(buffer),
            batch::Residency::Spilled(_) => None,
        }
    }

    /// Put the restored buffer back. Returns the handle of the blob it was spilled to
    pub(crate) fn restore_batch(
        &mut self,
        batch_index: BatchIndex,
        buffer: BatchBuffer,
    ) -> Option<BlobHandle> {
        let batch = self.batches.get_mut(batch_index)?;
        if !batch.is_spilled() {
            return None;
        }
        match batch.replace_residency(batch::Residency::Resident(buffer)) {
            batch::Residency::Spilled(handle) => Some(handle),
            batch::Residency::Resident(_) => None,
        }
    }
}
