//! [`AccumulatorSet`] holds the accumulators of all of the measures of an operator
//!
//! All of the members agree on the batch capacity and the number of batches, the
//! set only hands out mutable access to the resize coordinator and the spill manager
//! that keep it this way.

use std::sync::Arc;

use granary_vector::block::VectorBlock;
use granary_vector::vector::Vector;
use snafu::{OptionExt, ResultExt, ensure};
use tracing::debug;

use super::addressing::Addressing;
use super::batch::Batch;
use super::measure::MeasureSpec;
use super::{
    Accumulator, BatchCountMismatchSnafu, EmptySetSnafu, InvalidConfigSnafu,
    MeasureOutOfRangeSnafu, Result, VectorSnafu,
};
use crate::common::config::AggregateConfig;
use crate::common::types::{BatchIndex, MeasurePosition, PartitionId};
use crate::common::utils::hash::{HashMap, new_hash_map};
use crate::common::uuid::OperatorId;

/// Statistic of a partition
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PartitionStats {
    /// Number of addressing records that targeted the partition since the last spill
    /// decision
    pub hits: u64,
    /// Number of batches that belong to the partition
    pub num_batches: usize,
    /// Whether the batches of the partition are spilled
    pub spilled: bool,
}

/// Accumulators of one hash aggregation operator, indexed by the position of the
/// measure
#[derive(Debug)]
pub struct AccumulatorSet {
    operator_id: OperatorId,
    batch_capacity: usize,
    accumulators: Vec<Accumulator>,
    partitions: HashMap<PartitionId, PartitionStats>,
}

impl AccumulatorSet {
    /// Create a set without batch, the config is validated
    pub fn try_new(
        operator_id: OperatorId,
        config: &AggregateConfig,
        measures: impl IntoIterator<Item = MeasureSpec>,
    ) -> Result<Self> {
        config.validate().context(InvalidConfigSnafu)?;
        let accumulators = measures
            .into_iter()
            .map(|spec| Accumulator::new(spec, config.batch_capacity))
            .collect::<Vec<_>>();
        ensure!(!accumulators.is_empty(), EmptySetSnafu);

        debug!(
            "Create accumulator set for operator `{}` with `{}` measures, batch capacity: `{}`",
            operator_id,
            accumulators.len(),
            config.batch_capacity
        );

        Ok(Self {
            operator_id,
            batch_capacity: config.batch_capacity,
            accumulators,
            partitions: new_hash_map(),
        })
    }

    /// Id of the operator that owns the set
    #[inline]
    pub fn operator_id(&self) -> OperatorId {
        self.operator_id
    }

    /// Number of groups each batch can hold
    #[inline]
    pub fn batch_capacity(&self) -> usize {
        self.batch_capacity
    }

    /// Number of measures
    #[inline]
    pub fn num_measures(&self) -> usize {
        self.accumulators.len()
    }

    /// Get the accumulators
    #[inline]
    pub fn accumulators(&self) -> &[Accumulator] {
        &self.accumulators
    }

    /// Get the accumulator of the measure
    #[inline]
    pub fn accumulator(&self, measure: MeasurePosition) -> Option<&Accumulator> {
        self.accumulators.get(measure)
    }

    #[inline]
    pub(crate) fn accumulators_mut(&mut self) -> &mut [Accumulator] {
        &mut self.accumulators
    }

    /// Bind the input of the measure
    pub fn set_input(&mut self, measure: MeasurePosition, input: Arc<Vector>) -> Result<()> {
        let num_measures = self.accumulators.len();
        self.accumulators
            .get_mut(measure)
            .context(MeasureOutOfRangeSnafu {
                measure,
                num_measures,
            })?
            .set_input(input);
        Ok(())
    }

    /// Accumulate the bound inputs into every member. Every member validates the
    /// addressing before any of them is updated, a stale batch leaves the whole set
    /// untouched
    pub fn accumulate(&mut self, addressing: Addressing<'_>) -> Result<()> {
        self.accumulate_impl(addressing, true)
    }

    /// Spill unaware version of [`Self::accumulate`]
    pub fn accumulate_no_spill(&mut self, addressing: Addressing<'_>) -> Result<()> {
        self.accumulate_impl(addressing, false)
    }

    fn accumulate_impl(&mut self, addressing: Addressing<'_>, spill_aware: bool) -> Result<()> {
        self.accumulators
            .iter()
            .try_for_each(|accumulator| accumulator.validate(addressing, spill_aware))?;
        self.accumulators
            .iter_mut()
            .try_for_each(|accumulator| accumulator.apply(addressing))?;
        self.record_hits(addressing);
        Ok(())
    }

    /// Records of the same partition are usually adjacent, count them in runs
    fn record_hits(&mut self, addressing: Addressing<'_>) {
        let mut records = addressing.records().iter().peekable();
        while let Some(first) = records.next() {
            let mut hits = 1;
            while records.next_if(|record| record.partition == first.partition).is_some() {
                hits += 1;
            }
            if let Some(stats) = self.partitions.get_mut(&first.partition) {
                stats.hits += hits;
            }
        }
    }

    /// Materialize the batch of all of the measures
    pub fn output(&self, batch_index: BatchIndex) -> Result<VectorBlock> {
        let vectors = self
            .accumulators
            .iter()
            .map(|accumulator| accumulator.output(batch_index))
            .collect::<Result<Vec<_>>>()?;
        VectorBlock::try_new(vectors).context(VectorSnafu)
    }

    /// Memory used by the set
    pub fn size_in_bytes(&self) -> usize {
        std::mem::size_of::<Self>()
            + self
                .accumulators
                .iter()
                .map(Accumulator::size_in_bytes)
                .sum::<usize>()
            + self.partitions.capacity() * std::mem::size_of::<(PartitionId, PartitionStats)>()
    }

    /// Bytes allocated by the buffers of the resident batches of all of the members
    pub fn total_buffer_size(&self) -> usize {
        self.accumulators
            .iter()
            .map(Accumulator::total_buffer_size)
            .sum()
    }

    /// Number of batches of each member
    #[inline]
    pub fn batch_count(&self) -> usize {
        self.accumulators
            .first()
            .map_or(0, Accumulator::num_batches)
    }

    /// Check all of the members have `expect` batches
    pub fn verify_batch_count(&self, expect: usize) -> Result<()> {
        self.accumulators
            .iter()
            .try_for_each(|accumulator| accumulator.verify_batch_count(expect))
    }

    /// Check all of the members have the same number of batches
    pub(crate) fn verify_consistency(&self) -> Result<()> {
        let expect = self.batch_count();
        match self
            .accumulators
            .iter()
            .find(|accumulator| accumulator.num_batches() != expect)
        {
            Some(accumulator) => BatchCountMismatchSnafu {
                expect,
                actual: accumulator.num_batches(),
            }
            .fail(),
            None => Ok(()),
        }
    }

    /// Release all of the batches except the first one in every member. Nothing is
    /// changed if any member can not be reset
    pub fn reset_to_minimum_size(&mut self) -> Result<()> {
        self.accumulators
            .iter()
            .try_for_each(Accumulator::check_resettable)?;
        self.accumulators
            .iter_mut()
            .try_for_each(Accumulator::reset_to_minimum_size)?;

        let first_partition = self.partition_of(0);
        self.partitions.clear();
        if let Some(partition) = first_partition {
            self.partitions.insert(
                partition,
                PartitionStats {
                    num_batches: 1,
                    ..Default::default()
                },
            );
        }
        debug!("Reset accumulator set of operator `{}`", self.operator_id);
        Ok(())
    }

    /// Get the statistic of the partition
    #[inline]
    pub fn partition_stats(&self, partition: PartitionId) -> Option<PartitionStats> {
        self.partitions.get(&partition).copied()
    }

    /// Iterate the partitions and their statistics
    pub fn partitions(&self) -> impl Iterator<Item = (PartitionId, PartitionStats)> + '_ {
        self.partitions
            .iter()
            .map(|(&partition, &stats)| (partition, stats))
    }

    /// Partition of the batch
    #[inline]
    pub fn partition_of(&self, batch_index: BatchIndex) -> Option<PartitionId> {
        self.accumulators
            .first()?
            .batches()
            .get(batch_index)
            .map(Batch::partition)
    }

    /// Indexes of the batches that belong to the partition
    pub fn batch_indexes_of(&self, partition: PartitionId) -> Vec<BatchIndex> {
        self.accumulators
            .first()
            .map(|accumulator| {
                accumulator
                    .batches()
                    .iter()
                    .enumerate()
                    .filter(|(_, batch)| batch.partition() == partition)
                    .map(|(batch_index, _)| batch_index)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Bytes held in memory by the partition across all of the members
    pub fn partition_footprint(&self, partition: PartitionId) -> usize {
        self.accumulators
            .iter()
            .flat_map(|accumulator| accumulator.batches())
            .filter(|batch| batch.partition() == partition)
            .map(Batch::buffer_size)
            .sum()
    }

    /// Called by the resize coordinator after a batch of the partition is committed
    pub(crate) fn on_batch_committed(&mut self, partition: PartitionId) {
        self.partitions.entry(partition).or_default().num_batches += 1;
    }

    pub(crate) fn set_partition_spilled(&mut self, partition: PartitionId, spilled: bool) {
        if let Some(stats) = self.partitions.get_mut(&partition) {
            stats.spilled = spilled;
        }
    }

    /// Forget the hits, called after each spill decision
    pub(crate) fn reset_hits(&mut self) {
        self.partitions
            .values_mut()
            .for_each(|stats| stats.hits = 0);
    }
}

#[cfg(test)]
mod tests {
    use granary_vector::types::LogicalType;
    use granary_vector::vector::{Float64Vector, Int64Vector};

    use super::super::addressing::{AddressingRecord, BatchLayout};
    use super::super::measure::MeasureKind;
    use super::*;
    use crate::error::{Classify, ErrorClass};
    use crate::memory::MemoryPool;
    use crate::resize::ResizeCoordinator;

    fn measures() -> Vec<MeasureSpec> {
        vec![
            MeasureSpec::try_new(MeasureKind::Sum, Some(LogicalType::BigInt)).unwrap(),
            MeasureSpec::try_new(MeasureKind::Count, Some(LogicalType::BigInt)).unwrap(),
            MeasureSpec::try_new(MeasureKind::Max, Some(LogicalType::Double)).unwrap(),
        ]
    }

    fn new_set(batch_capacity: usize) -> AccumulatorSet {
        let config = AggregateConfig {
            batch_capacity,
            ..Default::default()
        };
        AccumulatorSet::try_new(OperatorId::from_u128(7), &config, measures()).unwrap()
    }

    fn bind_inputs(set: &mut AccumulatorSet) {
        let ints = Arc::new(Vector::from(Int64Vector::from_iter([
            Some(1),
            None,
            Some(3),
            Some(4),
        ])));
        set.set_input(0, Arc::clone(&ints)).unwrap();
        set.set_input(1, ints).unwrap();
        set.set_input(
            2,
            Arc::new(Float64Vector::from_values_iter([0.5, 7.5, -1.0, 2.0]).into()),
        )
        .unwrap();
    }

    #[test]
    fn test_try_new() {
        let set = new_set(4);
        assert_eq!(set.num_measures(), 3);
        assert_eq!(set.batch_count(), 0);
        assert_eq!(set.total_buffer_size(), 0);

        let err = AccumulatorSet::try_new(
            OperatorId::from_u128(7),
            &AggregateConfig::default(),
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, super::super::AccumulatorError::EmptySet));

        let config = AggregateConfig {
            batch_capacity: 0,
            ..Default::default()
        };
        let err = AccumulatorSet::try_new(OperatorId::from_u128(7), &config, measures())
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Invalid);
    }

    #[test]
    fn test_accumulate_and_output() {
        let pool = MemoryPool::unbounded();
        let coordinator = ResizeCoordinator::new(pool);
        let mut set = new_set(4);
        coordinator.resize(&mut set, 0).unwrap();
        coordinator.resize(&mut set, 1).unwrap();
        bind_inputs(&mut set);

        let layout = BatchLayout::try_new(4).unwrap();
        let records = [
            layout.record(0, 1, 0),
            layout.record(0, 1, 1),
            layout.record(1, 6, 2),
            layout.record(1, 6, 3),
        ];
        set.accumulate(Addressing::new(&records, records.len()).unwrap())
            .unwrap();

        let expect = expect_test::expect![[r#"
            ┌────────┬────────────────┬────────┐
            │ BigInt │ UnsignedBigInt │ Double │
            ├────────┼────────────────┼────────┤
            │ Null   │ 0              │ Null   │
            ├────────┼────────────────┼────────┤
            │ 1      │ 1              │ 7.5    │
            ├────────┼────────────────┼────────┤
            │ Null   │ 0              │ Null   │
            ├────────┼────────────────┼────────┤
            │ Null   │ 0              │ Null   │
            └────────┴────────────────┴────────┘"#]];
        expect.assert_eq(&set.output(0).unwrap().to_string());

        let block = set.output(1).unwrap();
        assert_eq!(block.get_vector(0).unwrap().format_element(2).as_deref(), Some("7"));
        assert_eq!(block.get_vector(1).unwrap().format_element(2).as_deref(), Some("2"));
        assert_eq!(block.get_vector(2).unwrap().format_element(2).as_deref(), Some("2"));

        assert_eq!(set.partition_stats(0).unwrap().hits, 2);
        assert_eq!(set.partition_stats(1).unwrap().hits, 2);
        assert_eq!(set.batch_indexes_of(1), vec![1]);
        assert_eq!(set.partition_of(1), Some(1));
    }

    #[test]
    fn test_set_input_out_of_range() {
        let mut set = new_set(4);
        let err = set
            .set_input(3, Arc::new(Int64Vector::from_values_iter([1]).into()))
            .unwrap_err();
        let expect = expect_test::expect![
            "Measure `3` is out of range, the set only has `3` measures"
        ];
        expect.assert_eq(&err.to_string());
    }

    #[test]
    fn test_invalid_member_leaves_set_untouched() {
        let pool = MemoryPool::unbounded();
        let coordinator = ResizeCoordinator::new(pool);
        let mut set = new_set(4);
        coordinator.resize(&mut set, 0).unwrap();
        bind_inputs(&mut set);
        // Max expects Double input
        set.set_input(2, Arc::new(Int64Vector::from_values_iter([1, 2, 3, 4]).into()))
            .unwrap();
        let before = set.output(0).unwrap();

        let records = [AddressingRecord::new(0, 0, 0, 0)];
        let err = set
            .accumulate(Addressing::new(&records, 1).unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            super::super::AccumulatorError::InputTypeMismatch { .. }
        ));
        assert_eq!(set.output(0).unwrap(), before);
        assert_eq!(set.partition_stats(0).unwrap().hits, 0);
    }

    #[test]
    fn test_reset_to_minimum_size() {
        let pool = MemoryPool::unbounded();
        let coordinator = ResizeCoordinator::new(Arc::clone(&pool));
        let mut set = new_set(4);
        for partition in 0..3 {
            coordinator.resize(&mut set, partition).unwrap();
        }
        assert_eq!(set.batch_count(), 3);
        let footprint = set.total_buffer_size();

        set.reset_to_minimum_size().unwrap();
        set.verify_batch_count(1).unwrap();
        assert_eq!(set.total_buffer_size(), footprint / 3);
        assert_eq!(pool.reserved(), footprint / 3);
        assert_eq!(set.partitions().count(), 1);
        assert_eq!(set.partition_stats(0).unwrap().num_batches, 1);
        assert!(set.size_in_bytes() > set.total_buffer_size());
    }
}
