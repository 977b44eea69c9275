//! Min/Max of the input

use granary_vector::vector::{PrimitiveType, PrimitiveVector};

use super::for_each_target;
use crate::accumulator::Result;
use crate::accumulator::addressing::AddressingRecord;
use crate::accumulator::batch::Batch;

/// The validity bit tells whether the slot has seen a value
pub(super) fn update<const IS_MIN: bool, T: PrimitiveType>(
    input: &PrimitiveVector<T>,
    batches: &mut [Batch],
    records: &[AddressingRecord],
) -> Result<()> {
    for_each_target(batches, records, |buffer, slot, record| {
        let Some(value) = input.get(record) else {
            return;
        };
        let (validity, data, _) = buffer.parts_mut();
        let current = &mut data.view_mut::<T>()[slot];
        if !validity.get(slot) {
            *current = value;
            validity.set(slot, true);
        } else if IS_MIN {
            if value < *current {
                *current = value;
            }
        } else if value > *current {
            *current = value;
        }
    })
}
