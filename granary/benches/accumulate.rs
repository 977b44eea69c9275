use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use granary::STANDARD_VECTOR_SIZE;
use granary::accumulator::addressing::{Addressing, AddressingRecord, BatchLayout};
use granary::accumulator::measure::{MeasureKind, MeasureSpec};
use granary::accumulator::set::AccumulatorSet;
use granary::common::config::{AggregateConfig, SpillConfig};
use granary::common::uuid::OperatorId;
use granary::memory::MemoryPool;
use granary::resize::ResizeCoordinator;
use granary::spill::SpillManager;
use granary::spill::store::InMemoryObjectStore;
use granary_vector::types::LogicalType;
use granary_vector::vector::{Int64Vector, Vector};
use rand::{Rng, SeedableRng};

const NUM_PARTITIONS: u32 = 16;

fn new_set(config: &AggregateConfig, pool: &Arc<MemoryPool>) -> AccumulatorSet {
    let mut set = AccumulatorSet::try_new(
        OperatorId::from_u128(1),
        config,
        [
            MeasureSpec::try_new(MeasureKind::Sum, Some(LogicalType::BigInt)).unwrap(),
            MeasureSpec::try_new(MeasureKind::Count, Some(LogicalType::BigInt)).unwrap(),
            MeasureSpec::try_new(MeasureKind::Min, Some(LogicalType::BigInt)).unwrap(),
            MeasureSpec::try_new(MeasureKind::Avg, Some(LogicalType::BigInt)).unwrap(),
        ],
    )
    .unwrap();
    let coordinator = ResizeCoordinator::new(Arc::clone(pool));
    for partition in 0..NUM_PARTITIONS {
        coordinator.resize(&mut set, partition).unwrap();
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let input = Arc::new(Vector::from(Int64Vector::from_iter(
        (0..STANDARD_VECTOR_SIZE).map(|_| rng.gen_bool(0.9).then(|| rng.gen_range(-1000..1000))),
    )));
    for measure in 0..set.num_measures() {
        set.set_input(measure, Arc::clone(&input)).unwrap();
    }
    set
}

/// Partition `p` owns batch `p`, groups are uniformly distributed
fn random_records(num_groups_per_partition: u64) -> Vec<AddressingRecord> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(9);
    let layout = BatchLayout::try_new(STANDARD_VECTOR_SIZE).unwrap();
    (0..STANDARD_VECTOR_SIZE as u32)
        .map(|record| {
            let partition = rng.gen_range(0..NUM_PARTITIONS);
            let group = partition as u64 * STANDARD_VECTOR_SIZE as u64
                + rng.gen_range(0..num_groups_per_partition);
            layout.record(partition, group, record)
        })
        .collect()
}

fn bench_accumulate(c: &mut Criterion) {
    let pool = MemoryPool::unbounded();
    let config = AggregateConfig::default();
    let mut set = new_set(&config, &pool);

    let mut group = c.benchmark_group("accumulate");
    for num_groups in [16, 1024] {
        let records = random_records(num_groups);
        group.bench_with_input(
            BenchmarkId::new("spill_aware", num_groups),
            &records,
            |b, records| {
                b.iter(|| {
                    set.accumulate(black_box(Addressing::new(records, records.len()).unwrap()))
                        .unwrap()
                })
            },
        );
        group.bench_with_input(
            BenchmarkId::new("no_spill", num_groups),
            &records,
            |b, records| {
                b.iter(|| {
                    set.accumulate_no_spill(black_box(
                        Addressing::new(records, records.len()).unwrap(),
                    ))
                    .unwrap()
                })
            },
        );
    }
    group.finish();
}

fn bench_spill(c: &mut Criterion) {
    let pool = MemoryPool::unbounded();
    let config = AggregateConfig {
        memory_budget: Some(1 << 30),
        spill: Some(SpillConfig::default()),
        ..Default::default()
    };
    let mut set = new_set(&config, &pool);
    let manager =
        SpillManager::try_new(&config, Arc::new(InMemoryObjectStore::new()), pool).unwrap();

    c.bench_function("spill_and_restore_partition", |b| {
        b.iter(|| {
            manager.spill_partition(&mut set, black_box(3)).unwrap();
            manager.restore_partition(&mut set, black_box(3)).unwrap();
        })
    });
}

criterion_group!(benches, bench_accumulate, bench_spill);
criterion_main!(benches);
