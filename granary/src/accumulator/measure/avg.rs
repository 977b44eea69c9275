//! Average of the numeric input
//!
//! The data buffer holds the running sum as `f64`, the auxiliary buffer holds the
//! number of values

use granary_vector::aligned_vec::AlignedVec;
use granary_vector::bitmap::Bitmap;
use granary_vector::vector::{Float64Vector, PrimitiveType, PrimitiveVector, Vector};
use num_traits::AsPrimitive;
use snafu::ResultExt;

use super::for_each_target;
use crate::accumulator::addressing::AddressingRecord;
use crate::accumulator::batch::{Batch, BatchBuffer};
use crate::accumulator::{Result, VectorSnafu};

pub(super) fn update<T: PrimitiveType + AsPrimitive<f64>>(
    input: &PrimitiveVector<T>,
    batches: &mut [Batch],
    records: &[AddressingRecord],
) -> Result<()> {
    for_each_target(batches, records, |buffer, slot, record| {
        let Some(value) = input.get(record) else {
            return;
        };
        // Aux buffer is checked against the buffer spec when the batch is added
        let (validity, data, Some(aux)) = buffer.parts_mut() else {
            return;
        };
        data.view_mut::<f64>()[slot] += value.as_();
        aux.view_mut::<u64>()[slot] += 1;
        validity.set(slot, true);
    })
}

pub(super) fn output(buffer: &BatchBuffer) -> Result<Vector> {
    let capacity = buffer.spec().capacity;
    let sums = &buffer.data().view::<f64>()[..capacity];
    let counts = buffer
        .aux()
        .map_or(&[][..], |aux| aux.view::<u64>());

    let averages = (0..capacity)
        .map(|slot| match counts.get(slot) {
            Some(&count) if count > 0 => sums[slot] / count as f64,
            _ => 0.0,
        })
        .collect::<AlignedVec<f64>>();
    let validity = (0..capacity)
        .map(|slot| counts.get(slot).is_some_and(|&count| count > 0))
        .collect::<Bitmap>();

    Float64Vector::try_from_parts(averages, validity)
        .map(Vector::from)
        .context(VectorSnafu)
}
