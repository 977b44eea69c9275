//! Spill the cold partitions of the accumulator set to the object store
//!
//! When the buffers of a set exceed the memory budget, or the memory governor raised
//! the [`ReduceMemorySignal`], the [`SpillManager`] picks the victim partitions with
//! the configured [`VictimPolicy`](policy::VictimPolicy), writes every batch of them
//! to the [`ObjectStore`](store::ObjectStore) and releases the buffers. Accumulating on
//! a spilled batch fails with stale error, the operator restores the partition and
//! retries.
//!
//! Both directions are two phase. Spill writes all of the blobs before any buffer is
//! released, restore reads and decodes all of the blobs before any buffer is swapped
//! in. A failure in the first phase leaves the set untouched.

pub mod codec;
pub mod policy;
pub mod store;

use std::sync::Arc;

use granary_procedural_macro::MetricsSetBuilder;
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::{debug, error, info, warn};

use self::codec::CodecError;
use self::policy::{PartitionCandidate, VictimPolicy, victim_policy};
use self::store::{BlobHandle, ObjectStore, StoreError, StoreState};
use crate::accumulator::batch::{BatchBuffer, BufferSpec, Residency};
use crate::accumulator::set::AccumulatorSet;
use crate::common::config::{AggregateConfig, ConfigError, SpillConfig};
use crate::common::profiler::timed;
use crate::common::types::{BatchIndex, MeasurePosition, PartitionId};
use crate::common::uuid::OperatorId;
use crate::error::{Classify, ErrorClass};
use crate::memory::{MemoryError, MemoryPool, ReduceMemorySignal};
use crate::metric::{Count, Time};

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
pub enum SpillError {
    #[snafu(display("Spilling is not enabled in the config"))]
    SpillDisabled,
    #[snafu(display("Invalid spill config"))]
    Config { source: ConfigError },
    #[snafu(display("Partition `{partition}` does not exist in the accumulator set"))]
    UnknownPartition { partition: PartitionId },
    #[snafu(display("Partition `{partition}` is spilled already"))]
    AlreadySpilled { partition: PartitionId },
    #[snafu(display("Partition `{partition}` is not spilled"))]
    NotSpilled { partition: PartitionId },
    #[snafu(display("Object store can not accept the spill: {reason}"))]
    StoreUnavailable { reason: String },
    #[snafu(display("Failed to write the spilled batch `{key}`"))]
    Write { key: String, source: StoreError },
    #[snafu(display("Failed to read the spilled batch `{key}`"))]
    Read { key: String, source: StoreError },
    #[snafu(display("Failed to decode the spilled batch `{key}`"))]
    Decode { key: String, source: CodecError },
    #[snafu(display("Failed to allocate the buffer to restore partition `{partition}`"))]
    Allocate {
        partition: PartitionId,
        source: MemoryError,
    },
}

/// Result type of the spill
pub type Result<T> = std::result::Result<T, SpillError>;

impl Classify for SpillError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::SpillDisabled
            | Self::Config { .. }
            | Self::UnknownPartition { .. }
            | Self::AlreadySpilled { .. }
            | Self::NotSpilled { .. } => ErrorClass::Invalid,
            Self::StoreUnavailable { .. } | Self::Allocate { .. } => ErrorClass::Retryable,
            Self::Write { source, .. } | Self::Read { source, .. } => source.class(),
            Self::Decode { .. } => ErrorClass::Fatal,
        }
    }
}

/// Metrics of the spill manager
#[derive(Debug, Default, MetricsSetBuilder)]
pub struct SpillMetrics {
    /// Number of spilled partitions
    pub spilled_partitions: Count,
    /// Number of restored partitions
    pub restored_partitions: Count,
    /// Bytes written to the store
    pub spilled_bytes: Count,
    /// Bytes read from the store
    pub restored_bytes: Count,
    /// Number of retried store operations
    pub io_retries: Count,
    /// Time spent in spilling
    pub spill_time: Time,
    /// Time spent in restoring
    pub restore_time: Time,
}

/// Key of the blob that stores the batch of the measure
fn blob_key(
    operator_id: OperatorId,
    partition: PartitionId,
    measure: MeasurePosition,
    batch_index: BatchIndex,
) -> String {
    format!("{operator_id}/p{partition}/m{measure}/b{batch_index}")
}

/// Spill and restore the partitions of the accumulator sets
#[derive(Debug)]
pub struct SpillManager {
    store: Arc<dyn ObjectStore>,
    config: SpillConfig,
    /// Bytes the buffers of a set may occupy
    budget: usize,
    policy: Box<dyn VictimPolicy>,
    /// Restored buffers are reserved from it
    pool: Arc<MemoryPool>,
    metrics: SpillMetrics,
}

impl SpillManager {
    /// Create a new manager. Spilling should be enabled in the config
    pub fn try_new(
        config: &AggregateConfig,
        store: Arc<dyn ObjectStore>,
        pool: Arc<MemoryPool>,
    ) -> Result<Self> {
        config.validate().context(ConfigSnafu)?;
        let spill = config.spill.clone().context(SpillDisabledSnafu)?;
        let budget = config.memory_budget.context(SpillDisabledSnafu)?;
        let policy = victim_policy(spill.victim_policy);
        debug!(
            "Create spill manager with budget `{}` bytes and `{}` policy",
            budget,
            policy.name()
        );

        Ok(Self {
            store,
            config: spill,
            budget,
            policy,
            pool,
            metrics: SpillMetrics::default(),
        })
    }

    /// Metrics of the manager
    #[inline]
    pub fn metrics(&self) -> &SpillMetrics {
        &self.metrics
    }

    /// Memory budget of a set
    #[inline]
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Spill the partitions until the buffers of the set fit in the budget. If the
    /// signal is raised, at least one partition is spilled and the signal is consumed.
    /// The signal stays raised if nothing can be spilled. Returns the spilled
    /// partitions in spill order
    #[tracing::instrument(skip_all, fields(operator_id = %set.operator_id()))]
    pub fn maybe_spill(
        &self,
        set: &mut AccumulatorSet,
        signal: Option<&ReduceMemorySignal>,
    ) -> Result<Vec<PartitionId>> {
        let mut forced = signal.is_some_and(ReduceMemorySignal::is_raised);
        if !forced && set.total_buffer_size() <= self.budget {
            return Ok(Vec::new());
        }

        let mut candidates = set
            .partitions()
            .filter(|(_, stats)| !stats.spilled)
            .map(|(partition, stats)| PartitionCandidate {
                partition,
                hits: stats.hits,
                footprint: set.partition_footprint(partition),
            })
            .filter(|candidate| candidate.footprint > 0)
            .collect::<Vec<_>>();
        self.policy.rank(&mut candidates);

        let mut spilled = Vec::new();
        for candidate in candidates {
            if !forced && set.total_buffer_size() <= self.budget {
                break;
            }
            self.spill_partition(set, candidate.partition)?;
            spilled.push(candidate.partition);
            if forced {
                // The signal is consumed only after the memory is released
                if let Some(signal) = signal {
                    signal.take();
                }
                forced = false;
            }
        }
        if forced {
            debug!("Reduce memory signal is raised, but no partition can be spilled");
        }

        if set.total_buffer_size() > self.budget {
            warn!(
                "Buffers of the set still occupy `{}` bytes after spilling `{:?}`, budget is `{}` bytes",
                set.total_buffer_size(),
                spilled,
                self.budget
            );
        }
        set.reset_hits();
        Ok(spilled)
    }

    /// Write every batch of the partition to the store and release the buffers.
    /// Returns the number of bytes written
    #[tracing::instrument(skip_all, fields(operator_id = %set.operator_id(), partition = partition))]
    pub fn spill_partition(
        &self,
        set: &mut AccumulatorSet,
        partition: PartitionId,
    ) -> Result<usize> {
        let stats = set
            .partition_stats(partition)
            .context(UnknownPartitionSnafu { partition })?;
        ensure!(!stats.spilled, AlreadySpilledSnafu { partition });
        match self.store.state() {
            StoreState::Good => {}
            StoreState::Degraded(reason) => {
                warn!("Spill partition `{}` to degraded store: {}", partition, reason);
            }
            StoreState::Bad(reason) => return StoreUnavailableSnafu { reason }.fail(),
        }

        let written = timed(&self.metrics.spill_time, || self.spill_batches(set, partition))?;

        self.metrics.spilled_partitions.add(1);
        self.metrics.spilled_bytes.add(written as u64);
        info!(
            "Spilled partition `{}` of operator `{}`: `{}` bytes",
            partition,
            set.operator_id(),
            written
        );
        Ok(written)
    }

    /// Read the batches of the spilled partition back and delete the blobs. Returns the
    /// number of bytes read
    #[tracing::instrument(skip_all, fields(operator_id = %set.operator_id(), partition = partition))]
    pub fn restore_partition(
        &self,
        set: &mut AccumulatorSet,
        partition: PartitionId,
    ) -> Result<usize> {
        let stats = set
            .partition_stats(partition)
            .context(UnknownPartitionSnafu { partition })?;
        ensure!(stats.spilled, NotSpilledSnafu { partition });

        let (read, handles) =
            timed(&self.metrics.restore_time, || self.restore_batches(set, partition))?;

        self.delete_blobs(handles);
        self.metrics.restored_partitions.add(1);
        self.metrics.restored_bytes.add(read as u64);
        info!(
            "Restored partition `{}` of operator `{}`: `{}` bytes",
            partition,
            set.operator_id(),
            read
        );
        Ok(read)
    }

    /// Two phase spill of the resident batches of the partition
    fn spill_batches(&self, set: &mut AccumulatorSet, partition: PartitionId) -> Result<usize> {
        let batch_indexes = set.batch_indexes_of(partition);

        // Phase 1: write all of the blobs
        let mut handles = Vec::with_capacity(set.num_measures() * batch_indexes.len());
        for (measure, accumulator) in set.accumulators().iter().enumerate() {
            for &batch_index in &batch_indexes {
                let Some(buffer) = accumulator.batches()[batch_index].buffer() else {
                    continue;
                };
                let key = blob_key(set.operator_id(), partition, measure, batch_index);
                let bytes = codec::encode(buffer);
                match self.with_retry(&key, || self.store.write(&key, &bytes)) {
                    Ok(handle) => handles.push((measure, batch_index, handle)),
                    Err(e) => {
                        error!(
                            "Failed to write `{}`: {}. Partition `{}` stays in memory",
                            key, e, partition
                        );
                        self.delete_blobs(handles.into_iter().map(|(_, _, handle)| handle));
                        return Err(e).context(WriteSnafu { key });
                    }
                }
            }
        }

        // Phase 2: release the buffers
        let written = handles
            .iter()
            .map(|(_, _, handle)| handle.size())
            .sum::<usize>();
        let accumulators = set.accumulators_mut();
        for (measure, batch_index, handle) in handles {
            drop(accumulators[measure].mark_spilled(batch_index, handle));
        }
        set.set_partition_spilled(partition, true);
        Ok(written)
    }

    /// Two phase restore of the spilled batches of the partition. Returns the bytes
    /// read and the handles of the blobs
    fn restore_batches(
        &self,
        set: &mut AccumulatorSet,
        partition: PartitionId,
    ) -> Result<(usize, Vec<BlobHandle>)> {
        let batch_indexes = set.batch_indexes_of(partition);

        // Phase 1: read, allocate and decode all of the batches
        let mut restored = Vec::with_capacity(set.num_measures() * batch_indexes.len());
        let mut read = 0;
        for (measure, accumulator) in set.accumulators().iter().enumerate() {
            for &batch_index in &batch_indexes {
                let Residency::Spilled(handle) = accumulator.batches()[batch_index].residency()
                else {
                    continue;
                };
                let buffer = self.restore_buffer(handle, *accumulator.buffer_spec(), partition)?;
                read += handle.size();
                restored.push((measure, batch_index, buffer));
            }
        }

        // Phase 2: swap the buffers in
        let accumulators = set.accumulators_mut();
        let handles = restored
            .into_iter()
            .filter_map(|(measure, batch_index, buffer)| {
                accumulators[measure].restore_batch(batch_index, buffer)
            })
            .collect::<Vec<_>>();
        set.set_partition_spilled(partition, false);
        Ok((read, handles))
    }

    fn restore_buffer(
        &self,
        handle: &BlobHandle,
        spec: BufferSpec,
        partition: PartitionId,
    ) -> Result<BatchBuffer> {
        let bytes = self
            .with_retry(handle.key(), || self.store.read(handle))
            .context(ReadSnafu { key: handle.key() })?;
        let mut buffer = BatchBuffer::try_allocate(spec, partition, &self.pool)
            .context(AllocateSnafu { partition })?;
        codec::decode_into(&bytes, &mut buffer).context(DecodeSnafu { key: handle.key() })?;
        Ok(buffer)
    }

    /// Run the store operation, retryable errors are retried until the attempts are
    /// exhausted
    fn with_retry<T>(
        &self,
        key: &str,
        mut op: impl FnMut() -> store::Result<T>,
    ) -> store::Result<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < self.config.max_io_attempts => {
                    warn!(
                        "Attempt `{}` on `{}` failed: {}. Retry after `{:?}`",
                        attempt, key, e, self.config.retry_backoff
                    );
                    self.metrics.io_retries.add(1);
                    attempt += 1;
                    if !self.config.retry_backoff.is_zero() {
                        std::thread::sleep(self.config.retry_backoff);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Best effort, failures only leak the blob
    fn delete_blobs(&self, handles: impl IntoIterator<Item = BlobHandle>) {
        for handle in handles {
            if let Err(e) = self.store.delete(&handle) {
                warn!("Failed to delete spilled batch `{}`: {}", handle.key(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use granary_vector::types::LogicalType;
    use granary_vector::vector::{Int64Vector, Vector};

    use super::store::InMemoryObjectStore;
    use super::*;
    use crate::accumulator::AccumulatorError;
    use crate::accumulator::addressing::{Addressing, BatchLayout};
    use crate::accumulator::measure::{MeasureKind, MeasureSpec};
    use crate::common::config::VictimPolicyKind;
    use crate::resize::ResizeCoordinator;

    const CAPACITY: usize = 4;
    /// Every batch of the set below allocates 128 bytes for SUM and 192 bytes for AVG
    const PARTITION_BYTES: usize = 128 + 192;

    fn config(memory_budget: usize, victim_policy: VictimPolicyKind) -> AggregateConfig {
        AggregateConfig {
            batch_capacity: CAPACITY,
            memory_budget: Some(memory_budget),
            spill: Some(SpillConfig {
                max_io_attempts: 3,
                retry_backoff: Duration::ZERO,
                victim_policy,
            }),
        }
    }

    struct Fixture {
        store: Arc<InMemoryObjectStore>,
        pool: Arc<MemoryPool>,
        manager: SpillManager,
        set: AccumulatorSet,
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Set with three partitions, partition `p` owns batch `p`
    fn fixture(memory_budget: usize, victim_policy: VictimPolicyKind) -> Fixture {
        init_tracing();
        let config = config(memory_budget, victim_policy);
        let store = Arc::new(InMemoryObjectStore::new());
        let pool = MemoryPool::unbounded();
        let manager = SpillManager::try_new(
            &config,
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            Arc::clone(&pool),
        )
        .unwrap();
        let mut set = AccumulatorSet::try_new(
            OperatorId::from_u128(3),
            &config,
            [
                MeasureSpec::try_new(MeasureKind::Sum, Some(LogicalType::BigInt)).unwrap(),
                MeasureSpec::try_new(MeasureKind::Avg, Some(LogicalType::BigInt)).unwrap(),
            ],
        )
        .unwrap();
        let coordinator = ResizeCoordinator::new(Arc::clone(&pool));
        for partition in 0..3 {
            coordinator.resize(&mut set, partition).unwrap();
        }
        Fixture {
            store,
            pool,
            manager,
            set,
        }
    }

    fn bind_input(set: &mut AccumulatorSet) {
        let input = Arc::new(Vector::from(Int64Vector::from_iter([
            Some(10),
            Some(-4),
            None,
            Some(7),
        ])));
        set.set_input(0, Arc::clone(&input)).unwrap();
        set.set_input(1, input).unwrap();
    }

    /// Each record `i` goes to the partition `partitions[i]`
    fn accumulate(
        set: &mut AccumulatorSet,
        partitions: [PartitionId; 4],
    ) -> std::result::Result<(), AccumulatorError> {
        let layout = BatchLayout::try_new(CAPACITY).unwrap();
        let records = partitions
            .iter()
            .enumerate()
            .map(|(record, &partition)| {
                let group = (partition as usize * CAPACITY + record % 2) as u64;
                layout.record(partition, group, record as u32)
            })
            .collect::<Vec<_>>();
        set.accumulate(Addressing::new(&records, records.len()).unwrap())
    }

    fn outputs(set: &AccumulatorSet) -> Vec<String> {
        (0..set.batch_count())
            .map(|batch_index| set.output(batch_index).unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_spill_disabled() {
        let config = AggregateConfig::default();
        let err = SpillManager::try_new(
            &config,
            Arc::new(InMemoryObjectStore::new()),
            MemoryPool::unbounded(),
        )
        .unwrap_err();
        assert!(matches!(err, SpillError::SpillDisabled));
        assert_eq!(err.class(), ErrorClass::Invalid);
    }

    #[test]
    fn test_spill_and_restore_keep_values() {
        let Fixture {
            store,
            pool,
            manager,
            mut set,
        } = fixture(1 << 20, VictimPolicyKind::FewestHits);
        bind_input(&mut set);
        accumulate(&mut set, [0, 1, 1, 2]).unwrap();
        let before = outputs(&set);
        let reserved = pool.reserved();

        let written = manager.spill_partition(&mut set, 1).unwrap();
        assert_eq!(store.num_blobs(), 2);
        assert!(store.contains("00000000000000000000000000000003/p1/m0/b1"));
        assert!(set.partition_stats(1).unwrap().spilled);
        assert!(set.accumulators().iter().all(|a| a.batches()[1].is_spilled()));
        assert_eq!(pool.reserved(), reserved - PARTITION_BYTES);
        assert_eq!(set.total_buffer_size(), 2 * PARTITION_BYTES);

        let err = manager.spill_partition(&mut set, 1).unwrap_err();
        assert!(matches!(err, SpillError::AlreadySpilled { partition: 1 }));

        let read = manager.restore_partition(&mut set, 1).unwrap();
        assert_eq!(read, written);
        assert_eq!(store.num_blobs(), 0);
        assert!(!set.partition_stats(1).unwrap().spilled);
        assert_eq!(pool.reserved(), reserved);
        assert_eq!(outputs(&set), before);

        let metrics = manager.metrics().metrics_set();
        let expect = expect_test::expect![[r#"SpillMetrics{ io_retries: 0, restored_bytes: 200, restored_partitions: 1, spilled_bytes: 200, spilled_partitions: 1 }"#]];
        expect.assert_eq(&metrics.display_counts());
    }

    #[test]
    fn test_accumulate_on_spilled_partition_is_stale() {
        let Fixture {
            manager, mut set, ..
        } = fixture(1 << 20, VictimPolicyKind::FewestHits);
        bind_input(&mut set);
        accumulate(&mut set, [0, 0, 2, 2]).unwrap();
        manager.spill_partition(&mut set, 2).unwrap();
        let before = outputs_of_resident(&set);

        let err = accumulate(&mut set, [0, 0, 2, 2]).unwrap_err();
        assert!(matches!(
            err,
            AccumulatorError::StaleBatch {
                batch_index: 2,
                partition: 2
            }
        ));
        assert_eq!(err.class(), ErrorClass::Stale);
        // Nothing is accumulated into the resident partition either
        assert_eq!(outputs_of_resident(&set), before);

        manager.restore_partition(&mut set, 2).unwrap();
        accumulate(&mut set, [0, 0, 2, 2]).unwrap();
        let block = set.output(2).unwrap();
        // SUM of records 2 and 3 in group 0 and 1 of batch 2
        assert_eq!(block.get_vector(0).unwrap().format_element(1).as_deref(), Some("14"));
        assert_eq!(block.get_vector(0).unwrap().format_element(0), None);
    }

    fn outputs_of_resident(set: &AccumulatorSet) -> Vec<String> {
        (0..2)
            .map(|batch_index| set.output(batch_index).unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_write_failures_are_retried() {
        let Fixture {
            store,
            manager,
            mut set,
            ..
        } = fixture(1 << 20, VictimPolicyKind::FewestHits);
        store.fail_next_writes(2);
        manager.spill_partition(&mut set, 0).unwrap();
        assert_eq!(manager.metrics().io_retries.value(), 2);
        assert_eq!(store.num_blobs(), 2);
    }

    #[test]
    fn test_exhausted_retries_keep_partition_resident() {
        let Fixture {
            store,
            pool,
            manager,
            mut set,
        } = fixture(1 << 20, VictimPolicyKind::FewestHits);
        let reserved = pool.reserved();
        // Blob of the first measure is written, the second one fails on every attempt
        store.fail_next_writes_after(1, 3);
        let err = manager.spill_partition(&mut set, 0).unwrap_err();
        assert!(matches!(err, SpillError::Write { .. }));
        assert!(err.is_retryable());
        // Failed spills are timed as well
        assert!(manager.metrics().spill_time.nanoseconds() > 0);
        assert_eq!(manager.metrics().io_retries.value(), 2);
        assert_eq!(store.num_blobs(), 0);
        assert!(!set.partition_stats(0).unwrap().spilled);
        assert!(set.accumulators().iter().all(|a| !a.batches()[0].is_spilled()));
        assert_eq!(pool.reserved(), reserved);
    }

    #[test]
    fn test_bad_store_refuses_spill() {
        let Fixture {
            store,
            manager,
            mut set,
            ..
        } = fixture(1 << 20, VictimPolicyKind::FewestHits);
        store.set_state(StoreState::Bad("disk is full".to_string()));
        let err = manager.spill_partition(&mut set, 0).unwrap_err();
        let expect = expect_test::expect!["Object store can not accept the spill: disk is full"];
        expect.assert_eq(&err.to_string());
        assert!(err.is_retryable());

        store.set_state(StoreState::Degraded("slow".to_string()));
        manager.spill_partition(&mut set, 0).unwrap();
    }

    #[test]
    fn test_corrupted_blob_fails_restore() {
        let Fixture {
            store,
            manager,
            mut set,
            ..
        } = fixture(1 << 20, VictimPolicyKind::FewestHits);
        manager.spill_partition(&mut set, 1).unwrap();
        store.corrupt("00000000000000000000000000000003/p1/m1/b1", |bytes| {
            bytes[0] = b'X'
        });

        let err = manager.restore_partition(&mut set, 1).unwrap_err();
        assert!(matches!(err, SpillError::Decode { .. }));
        assert!(err.is_fatal());
        // Nothing is swapped in
        assert!(set.partition_stats(1).unwrap().spilled);
        assert!(set.accumulators().iter().all(|a| a.batches()[1].is_spilled()));

        let err = manager.restore_partition(&mut set, 0).unwrap_err();
        assert!(matches!(err, SpillError::NotSpilled { partition: 0 }));
        let err = manager.restore_partition(&mut set, 9).unwrap_err();
        assert!(matches!(err, SpillError::UnknownPartition { partition: 9 }));
    }

    #[test]
    fn test_maybe_spill_with_fewest_hits() {
        let Fixture {
            manager, mut set, ..
        } = fixture(2 * PARTITION_BYTES, VictimPolicyKind::FewestHits);
        bind_input(&mut set);
        accumulate(&mut set, [0, 0, 0, 2]).unwrap();

        // Partition 1 has no hits
        assert_eq!(manager.maybe_spill(&mut set, None).unwrap(), [1]);
        assert!(set.partitions().all(|(_, stats)| stats.hits == 0));
        // Under the budget
        assert!(manager.maybe_spill(&mut set, None).unwrap().is_empty());
    }

    #[test]
    fn test_maybe_spill_with_signal() {
        let Fixture {
            manager, mut set, ..
        } = fixture(1 << 20, VictimPolicyKind::LargestFootprint);
        let signal = ReduceMemorySignal::new();
        assert!(manager.maybe_spill(&mut set, Some(&signal)).unwrap().is_empty());

        signal.raise();
        // Footprints are equal, the lowest partition id goes first
        assert_eq!(manager.maybe_spill(&mut set, Some(&signal)).unwrap(), [0]);
        assert!(!signal.is_raised());
        assert_eq!(manager.maybe_spill(&mut set, Some(&signal)).unwrap().len(), 0);

        let budget_manager = SpillManager::try_new(
            &config(PARTITION_BYTES / 2, VictimPolicyKind::LargestFootprint),
            Arc::new(InMemoryObjectStore::new()),
            MemoryPool::unbounded(),
        )
        .unwrap();
        // Several partitions are spilled in one round
        assert_eq!(budget_manager.maybe_spill(&mut set, None).unwrap(), [1, 2]);
        assert_eq!(set.total_buffer_size(), 0);

        // Nothing left to spill, the signal is kept for the next round
        signal.raise();
        assert!(manager.maybe_spill(&mut set, Some(&signal)).unwrap().is_empty());
        assert!(signal.is_raised());
    }

    #[test]
    fn test_resize_spilled_partition_after_restore() {
        let Fixture {
            pool,
            manager,
            mut set,
            ..
        } = fixture(1 << 20, VictimPolicyKind::FewestHits);
        let coordinator = ResizeCoordinator::new(Arc::clone(&pool));
        manager.spill_partition(&mut set, 1).unwrap();
        let reserved = pool.reserved();

        let err = coordinator.resize(&mut set, 1).unwrap_err();
        assert!(matches!(
            err,
            crate::resize::ResizeError::SpilledPartition { partition: 1 }
        ));
        assert_eq!(err.class(), ErrorClass::Stale);
        set.verify_batch_count(3).unwrap();
        assert_eq!(pool.reserved(), reserved);
        assert_eq!(set.partition_stats(1).unwrap().num_batches, 1);

        manager.restore_partition(&mut set, 1).unwrap();
        assert_eq!(coordinator.resize(&mut set, 1).unwrap(), 3);
        let stats = set.partition_stats(1).unwrap();
        assert_eq!((stats.num_batches, stats.spilled), (2, false));

        // Both batches of the partition go to the store together
        manager.spill_partition(&mut set, 1).unwrap();
        assert!(set.batch_indexes_of(1).iter().all(|&batch_index| {
            set.accumulators()
                .iter()
                .all(|a| a.batches()[batch_index].is_spilled())
        }));
        assert_eq!(set.total_buffer_size(), 2 * PARTITION_BYTES);
    }
}
