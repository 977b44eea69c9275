//! Count the records

use granary_vector::aligned_vec::AlignedVec;
use granary_vector::bitmap::Bitmap;
use granary_vector::vector::{UInt64Vector, Vector};
use snafu::ResultExt;

use super::for_each_target;
use crate::accumulator::addressing::AddressingRecord;
use crate::accumulator::batch::{Batch, BatchBuffer};
use crate::accumulator::{Result, VectorSnafu};

/// `COUNT(col)`, null is skipped
pub(super) fn update(
    input: &Vector,
    batches: &mut [Batch],
    records: &[AddressingRecord],
) -> Result<()> {
    for_each_target(batches, records, |buffer, slot, record| {
        if input.is_valid(record) {
            let (_, data, _) = buffer.parts_mut();
            data.view_mut::<u64>()[slot] += 1;
        }
    })
}

/// `COUNT(*)`, every record is counted
pub(super) fn update_star(batches: &mut [Batch], records: &[AddressingRecord]) -> Result<()> {
    for_each_target(batches, records, |buffer, slot, _| {
        let (_, data, _) = buffer.parts_mut();
        data.view_mut::<u64>()[slot] += 1;
    })
}

/// Count is never null, untouched group is 0
pub(super) fn output(buffer: &BatchBuffer) -> Result<Vector> {
    let counts = &buffer.data().view::<u64>()[..buffer.spec().capacity];
    UInt64Vector::try_from_parts(AlignedVec::from_slice(counts), Bitmap::new())
        .map(Vector::from)
        .context(VectorSnafu)
}
