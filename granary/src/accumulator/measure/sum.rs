//! Sum the numeric input

use granary_vector::vector::{PrimitiveType, PrimitiveVector};

use super::for_each_target;
use crate::accumulator::Result;
use crate::accumulator::addressing::AddressingRecord;
use crate::accumulator::batch::Batch;

/// Trait for all of the types that can be result of sum
pub trait SumType: PrimitiveType {
    /// Add `rhs` to self. Integers wrap around on overflow
    fn add_wrapping(self, rhs: Self) -> Self;
}

macro_rules! impl_wrapping_sum_type {
    ($($ty:ty),+) => {
        $(
            impl SumType for $ty {
                #[inline]
                fn add_wrapping(self, rhs: Self) -> Self {
                    self.wrapping_add(rhs)
                }
            }
        )+
    };
}

impl_wrapping_sum_type!(i64, u64);

impl SumType for f64 {
    #[inline]
    fn add_wrapping(self, rhs: Self) -> Self {
        self + rhs
    }
}

/// Trait for casting payload type to sum type
pub trait PayloadCast: PrimitiveType {
    /// SumType
    type SumType: SumType;
    /// Cast
    fn cast(self) -> Self::SumType;
}

macro_rules! impl_payload_cast {
    ($sum_ty:ty, {$($payload_ty:ty),+}) => {
        $(
            impl PayloadCast for $payload_ty {
                type SumType = $sum_ty;

                #[inline]
                fn cast(self) -> Self::SumType {
                    self as _
                }
            }
        )+
    };
}

impl_payload_cast!(i64, {i32, i64});
impl_payload_cast!(u64, {u64});
impl_payload_cast!(f64, {f64});

/// Slots are zeroed on allocation, therefore the first value can be added directly
pub(super) fn update<T: PayloadCast>(
    input: &PrimitiveVector<T>,
    batches: &mut [Batch],
    records: &[AddressingRecord],
) -> Result<()> {
    for_each_target(batches, records, |buffer, slot, record| {
        if let Some(value) = input.get(record) {
            let (validity, data, _) = buffer.parts_mut();
            let sums = data.view_mut::<T::SumType>();
            sums[slot] = sums[slot].add_wrapping(value.cast());
            validity.set(slot, true);
        }
    })
}
