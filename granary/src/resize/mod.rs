//! Resize transaction coordinator
//!
//! Growing the workspace is a two phase transaction across all of the accumulators of
//! a set:
//!
//! - Propose: allocate a buffer for every accumulator and append it as a tentative
//!   batch, in ascending measure order
//!
//! - Commit: verify all of the accumulators have one more batch, then make the
//!   tentative batches permanent
//!
//! If any allocation fails or the verification disagrees, the tentative batches are
//! dropped from every accumulator that holds one, the set has exactly the shape it had
//! before the transaction. Allocation failure is recoverable: the caller can spill
//! and retry. Failing to revert is fatal.

use std::sync::Arc;

use granary_procedural_macro::MetricsSetBuilder;
use snafu::{ResultExt, Snafu, ensure};
use tracing::{debug, error, warn};

use crate::accumulator::AccumulatorError;
use crate::accumulator::batch::BatchBuffer;
use crate::accumulator::set::AccumulatorSet;
use crate::common::profiler::timed;
use crate::common::types::{BatchIndex, MeasurePosition, PartitionId};
use crate::error::{Classify, ErrorClass};
use crate::memory::{MemoryError, MemoryPool};
use crate::metric::{Count, Time};

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
pub enum ResizeError {
    #[snafu(display("Accumulator set is inconsistent before the resize"))]
    Inconsistent { source: AccumulatorError },
    #[snafu(display(
        "Partition `{partition}` is spilled, restore it before adding batches to it"
    ))]
    SpilledPartition { partition: PartitionId },
    #[snafu(display(
        "Failed to allocate the batch of partition `{partition}` for measure `{measure}`"
    ))]
    Allocate {
        measure: MeasurePosition,
        partition: PartitionId,
        source: MemoryError,
    },
    #[snafu(display("Failed to add the batch to the accumulator of measure `{measure}`"))]
    AddBatch {
        measure: MeasurePosition,
        source: AccumulatorError,
    },
    #[snafu(display("Batch count verification failed, the resize is reverted"))]
    Verify { source: AccumulatorError },
    #[snafu(display("Failed to revert the resize of measure `{measure}`"))]
    Revert {
        measure: MeasurePosition,
        source: AccumulatorError,
    },
    #[snafu(display("Failed to commit the resize of measure `{measure}`"))]
    Commit {
        measure: MeasurePosition,
        source: AccumulatorError,
    },
}

/// Result type of the resize
pub type Result<T> = std::result::Result<T, ResizeError>;

impl Classify for ResizeError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Allocate { .. } => ErrorClass::Retryable,
            Self::SpilledPartition { .. } => ErrorClass::Stale,
            Self::AddBatch { source, .. } => source.class(),
            Self::Inconsistent { .. }
            | Self::Verify { .. }
            | Self::Revert { .. }
            | Self::Commit { .. } => ErrorClass::Fatal,
        }
    }
}

/// Metrics of the resize coordinator
#[derive(Debug, Default, MetricsSetBuilder)]
pub struct ResizeMetrics {
    /// Number of committed transactions
    pub committed: Count,
    /// Number of reverted transactions
    pub reverted: Count,
    /// Time spent in allocating and committing
    pub resize_time: Time,
}

/// State of the resize transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Tentative batches are appended
    Proposed,
    /// Tentative batches are permanent
    Committed,
    /// Tentative batches are dropped
    Reverted,
}

/// Drives the resize transactions of the accumulator sets. Buffers are reserved from
/// the memory pool
#[derive(Debug)]
pub struct ResizeCoordinator {
    pool: Arc<MemoryPool>,
    metrics: ResizeMetrics,
}

impl ResizeCoordinator {
    /// Create a new coordinator
    pub fn new(pool: Arc<MemoryPool>) -> Self {
        Self {
            pool,
            metrics: ResizeMetrics::default(),
        }
    }

    /// Metrics of the coordinator
    #[inline]
    pub fn metrics(&self) -> &ResizeMetrics {
        &self.metrics
    }

    /// Memory pool the buffers are reserved from
    #[inline]
    pub fn pool(&self) -> &Arc<MemoryPool> {
        &self.pool
    }

    /// Grow every accumulator of the set by one batch of the partition. Returns the
    /// index of the new batch
    pub fn resize(&self, set: &mut AccumulatorSet, partition: PartitionId) -> Result<BatchIndex> {
        self.begin(set, partition)?.commit()
    }

    /// Propose a resize: every accumulator gets a tentative batch. If any of them
    /// fails, the proposal is reverted and the error is returned. A spilled partition
    /// is refused with [`ResizeError::SpilledPartition`], restore it first
    #[tracing::instrument(skip_all, fields(operator_id = %set.operator_id(), partition = partition))]
    pub fn begin<'a>(
        &'a self,
        set: &'a mut AccumulatorSet,
        partition: PartitionId,
    ) -> Result<ResizeTransaction<'a>> {
        set.verify_consistency().context(InconsistentSnafu)?;
        ensure!(
            !set
                .partition_stats(partition)
                .is_some_and(|stats| stats.spilled),
            SpilledPartitionSnafu { partition }
        );

        timed(&self.metrics.resize_time, move || {
            let batch_count = set.batch_count();
            let mut transaction = ResizeTransaction {
                set,
                coordinator: self,
                partition,
                batch_count,
                state: TransactionState::Proposed,
            };

            match transaction.propose() {
                Ok(()) => Ok(transaction),
                Err(e) => {
                    warn!(
                        "Resize of partition `{}` failed: `{}`. Revert the tentative batches",
                        partition, e
                    );
                    transaction.revert_members().and(Err(e))
                }
            }
        })
    }
}

/// A proposed resize. Dropping it without calling [`ResizeTransaction::commit`] or
/// [`ResizeTransaction::revert`] reverts it
#[derive(Debug)]
pub struct ResizeTransaction<'a> {
    set: &'a mut AccumulatorSet,
    coordinator: &'a ResizeCoordinator,
    partition: PartitionId,
    /// Number of batches before the transaction
    batch_count: usize,
    state: TransactionState,
}

impl ResizeTransaction<'_> {
    /// State of the transaction
    #[inline]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Partition of the tentative batch
    #[inline]
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    fn propose(&mut self) -> Result<()> {
        let pool = &self.coordinator.pool;
        for (measure, accumulator) in self.set.accumulators_mut().iter_mut().enumerate() {
            let buffer = BatchBuffer::try_allocate(*accumulator.buffer_spec(), self.partition, pool)
                .context(AllocateSnafu {
                    measure,
                    partition: self.partition,
                })?;
            accumulator
                .add_batch(buffer)
                .context(AddBatchSnafu { measure })?;
        }
        Ok(())
    }

    /// Make the tentative batches permanent. Returns the index of the new batch
    pub fn commit(mut self) -> Result<BatchIndex> {
        let coordinator = self.coordinator;
        timed(&coordinator.metrics.resize_time, || self.commit_members())
    }

    fn commit_members(&mut self) -> Result<BatchIndex> {
        if let Err(e) = self.set.verify_batch_count(self.batch_count + 1) {
            error!(
                "Batch count verification of the resize failed: `{}`. Revert the tentative batches",
                e
            );
            self.revert_members()?;
            return Err(e).context(VerifySnafu);
        }

        for (measure, accumulator) in self.set.accumulators_mut().iter_mut().enumerate() {
            accumulator
                .commit_resize()
                .context(CommitSnafu { measure })?;
        }
        self.set.on_batch_committed(self.partition);
        self.state = TransactionState::Committed;
        self.coordinator.metrics.committed.add(1);
        debug!(
            "Committed batch `{}` of partition `{}`",
            self.batch_count, self.partition
        );
        Ok(self.batch_count)
    }

    /// Drop the tentative batches
    pub fn revert(mut self) -> Result<()> {
        self.revert_members()
    }

    /// Revert the members that hold a tentative batch
    fn revert_members(&mut self) -> Result<()> {
        for (measure, accumulator) in self.set.accumulators_mut().iter_mut().enumerate() {
            if accumulator.has_pending_resize() {
                accumulator
                    .revert_resize()
                    .context(RevertSnafu { measure })?;
            }
        }
        self.state = TransactionState::Reverted;
        self.coordinator.metrics.reverted.add(1);
        Ok(())
    }
}

impl Drop for ResizeTransaction<'_> {
    fn drop(&mut self) {
        if self.state == TransactionState::Proposed {
            error!(
                "Resize transaction of partition `{}` is dropped without commit. Revert it",
                self.partition
            );
            if let Err(e) = self.revert_members() {
                error!("Failed to revert the dropped resize transaction: `{}`", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use granary_vector::types::LogicalType;

    use super::*;
    use crate::accumulator::measure::{MeasureKind, MeasureSpec};
    use crate::common::config::AggregateConfig;
    use crate::common::uuid::OperatorId;

    fn new_set() -> AccumulatorSet {
        let config = AggregateConfig {
            batch_capacity: 4,
            ..Default::default()
        };
        AccumulatorSet::try_new(
            OperatorId::from_u128(11),
            &config,
            [
                MeasureSpec::try_new(MeasureKind::Sum, Some(LogicalType::BigInt)).unwrap(),
                MeasureSpec::try_new(MeasureKind::Min, Some(LogicalType::BigInt)).unwrap(),
                MeasureSpec::count_star(),
            ],
        )
        .unwrap()
    }

    /// Every batch of the set above allocates 128 bytes per measure
    const BATCH_BYTES: usize = 128;

    #[test]
    fn test_resize_commits_every_member() {
        let coordinator = ResizeCoordinator::new(MemoryPool::unbounded());
        let mut set = new_set();
        assert_eq!(coordinator.resize(&mut set, 0).unwrap(), 0);
        assert_eq!(coordinator.resize(&mut set, 3).unwrap(), 1);
        set.verify_batch_count(2).unwrap();
        assert!(
            set.accumulators()
                .iter()
                .all(|accumulator| !accumulator.has_pending_resize())
        );
        assert_eq!(set.partition_stats(3).unwrap().num_batches, 1);
        assert_eq!(coordinator.pool().reserved(), 2 * 3 * BATCH_BYTES);

        let metrics = coordinator.metrics().metrics_set();
        let expect = expect_test::expect!["ResizeMetrics{ committed: 2, reverted: 0 }"];
        expect.assert_eq(&metrics.display_counts());
    }

    #[test]
    fn test_failed_add_reverts_every_member() {
        // Room for two batches and the first two measures of the third batch
        let pool = MemoryPool::new(2 * 3 * BATCH_BYTES + 2 * BATCH_BYTES);
        let coordinator = ResizeCoordinator::new(Arc::clone(&pool));
        let mut set = new_set();
        coordinator.resize(&mut set, 0).unwrap();
        coordinator.resize(&mut set, 0).unwrap();
        let footprint = set.total_buffer_size();

        let err = coordinator.resize(&mut set, 1).unwrap_err();
        assert!(matches!(err, ResizeError::Allocate { measure: 2, .. }));
        assert!(err.is_retryable());

        assert_eq!(set.batch_count(), 2);
        set.verify_batch_count(2).unwrap();
        for accumulator in set.accumulators() {
            accumulator.verify_batch_count(2).unwrap();
            assert!(!accumulator.has_pending_resize());
        }
        assert_eq!(set.total_buffer_size(), footprint);
        assert_eq!(pool.reserved(), footprint);
        assert!(set.partition_stats(1).is_none());
        assert_eq!(coordinator.metrics().reverted.value(), 1);
    }

    #[test]
    fn test_second_member_fails() {
        // Room for two batches and the first measure of the third batch
        let pool = MemoryPool::new(2 * 3 * BATCH_BYTES + BATCH_BYTES);
        let coordinator = ResizeCoordinator::new(Arc::clone(&pool));
        let mut set = new_set();
        coordinator.resize(&mut set, 0).unwrap();
        coordinator.resize(&mut set, 0).unwrap();
        let elapsed = coordinator.metrics().resize_time.nanoseconds();

        let err = coordinator.resize(&mut set, 0).unwrap_err();
        assert!(matches!(err, ResizeError::Allocate { measure: 1, .. }));
        for accumulator in set.accumulators() {
            accumulator.verify_batch_count(2).unwrap();
            assert!(!accumulator.has_pending_resize());
        }
        set.verify_batch_count(2).unwrap();
        assert_eq!(pool.reserved(), 2 * 3 * BATCH_BYTES);
        assert_eq!(set.partition_stats(0).unwrap().num_batches, 2);
        // Failed proposals are timed as well
        assert!(coordinator.metrics().resize_time.nanoseconds() > elapsed);
    }

    #[test]
    fn test_spilled_partition_is_refused() {
        let coordinator = ResizeCoordinator::new(MemoryPool::unbounded());
        let mut set = new_set();
        coordinator.resize(&mut set, 0).unwrap();
        coordinator.resize(&mut set, 1).unwrap();
        set.set_partition_spilled(1, true);

        let err = coordinator.resize(&mut set, 1).unwrap_err();
        let expect = expect_test::expect![
            "Partition `1` is spilled, restore it before adding batches to it"
        ];
        expect.assert_eq(&err.to_string());
        assert_eq!(err.class(), ErrorClass::Stale);
        set.verify_batch_count(2).unwrap();
        assert_eq!(coordinator.pool().reserved(), 2 * 3 * BATCH_BYTES);

        assert_eq!(coordinator.resize(&mut set, 0).unwrap(), 2);
    }

    #[test]
    fn test_dropped_transaction_reverts() {
        let coordinator = ResizeCoordinator::new(MemoryPool::unbounded());
        let mut set = new_set();
        coordinator.resize(&mut set, 0).unwrap();

        {
            let transaction = coordinator.begin(&mut set, 0).unwrap();
            assert_eq!(transaction.state(), TransactionState::Proposed);
        }
        set.verify_batch_count(1).unwrap();
        assert_eq!(coordinator.pool().reserved(), 3 * BATCH_BYTES);

        let transaction = coordinator.begin(&mut set, 0).unwrap();
        transaction.revert().unwrap();
        set.verify_batch_count(1).unwrap();
        assert_eq!(coordinator.metrics().reverted.value(), 2);

        let transaction = coordinator.begin(&mut set, 0).unwrap();
        assert_eq!(transaction.commit().unwrap(), 1);
        set.verify_batch_count(2).unwrap();
    }

    #[test]
    fn test_monotonic_footprint() {
        let coordinator = ResizeCoordinator::new(MemoryPool::unbounded());
        let mut set = new_set();
        let mut last = set.total_buffer_size();
        for partition in 0..8 {
            coordinator.resize(&mut set, partition % 3).unwrap();
            let footprint = set.total_buffer_size();
            assert!(footprint > last);
            last = footprint;
        }
    }
}
