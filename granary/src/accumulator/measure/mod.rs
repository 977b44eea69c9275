//! Measures computed by the accumulators
//!
//! The set of measures is closed: [`MeasureKind`] enumerates all of them and
//! [`MeasureSpec`] dispatches the update and the output to the kernels in the
//! submodules. Kernels are generic over the payload type, the dispatch happens once
//! per accumulate call.

mod avg;
mod count;
mod min_max;
mod sum;

pub use self::sum::{PayloadCast, SumType};

use std::fmt::Display;

use granary_vector::aligned_vec::AlignedVec;
use granary_vector::types::LogicalType;
use granary_vector::vector::{PrimitiveType, PrimitiveVector, Vector};
use snafu::{OptionExt, ResultExt};

use super::addressing::AddressingRecord;
use super::batch::{Batch, BatchBuffer, BufferSpec};
use super::{
    InputNotBoundSnafu, InputTypeMismatchSnafu, Result, UnexpectedSpilledBatchSnafu,
    UnsupportedInputSnafu, VectorSnafu,
};

/// Kind of the measure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasureKind {
    /// Sum of the non-null values. Integers wrap around on overflow
    Sum,
    /// Number of non-null values
    Count,
    /// Number of records, the input is not required
    CountStar,
    /// Minimum of the non-null values
    Min,
    /// Maximum of the non-null values
    Max,
    /// Average of the non-null values
    Avg,
}

impl Display for MeasureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Sum => "SUM",
            Self::Count => "COUNT",
            Self::CountStar => "COUNT(*)",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Avg => "AVG",
        };
        f.write_str(name)
    }
}

/// Invoke `$body` with `$T` aliased to the primitive type of `$logical_type`
macro_rules! with_payload_type {
    ($logical_type:expr, $T:ident, $body:expr) => {
        match $logical_type {
            LogicalType::Integer => {
                type $T = i32;
                $body
            }
            LogicalType::BigInt => {
                type $T = i64;
                $body
            }
            LogicalType::UnsignedBigInt => {
                type $T = u64;
                $body
            }
            LogicalType::Double => {
                type $T = f64;
                $body
            }
        }
    };
}

/// A measure: the kind and the logical type of its input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasureSpec {
    kind: MeasureKind,
    input: Option<LogicalType>,
}

impl MeasureSpec {
    /// Create a new spec. `COUNT(*)` does not take input, all of the other measures
    /// require it
    pub fn try_new(kind: MeasureKind, input: Option<LogicalType>) -> Result<Self> {
        match (kind, input) {
            (MeasureKind::CountStar, None)
            | (
                MeasureKind::Sum
                | MeasureKind::Count
                | MeasureKind::Min
                | MeasureKind::Max
                | MeasureKind::Avg,
                Some(_),
            ) => Ok(Self { kind, input }),
            _ => UnsupportedInputSnafu { kind, input }.fail(),
        }
    }

    /// `COUNT(*)`
    #[inline]
    pub fn count_star() -> Self {
        Self {
            kind: MeasureKind::CountStar,
            input: None,
        }
    }

    /// Kind of the measure
    #[inline]
    pub fn kind(&self) -> MeasureKind {
        self.kind
    }

    /// Logical type of the input, `None` for `COUNT(*)`
    #[inline]
    pub fn input_type(&self) -> Option<LogicalType> {
        self.input
    }

    /// Logical type of the output
    pub fn output_type(&self) -> LogicalType {
        match (self.kind, self.input) {
            (MeasureKind::Count | MeasureKind::CountStar, _) => LogicalType::UnsignedBigInt,
            (MeasureKind::Avg, _) => LogicalType::Double,
            (MeasureKind::Sum, Some(input)) => {
                with_payload_type!(input, T, <<T as PayloadCast>::SumType as PrimitiveType>::LOGICAL_TYPE)
            }
            (MeasureKind::Min | MeasureKind::Max, Some(input)) => input,
            // Guarded by the constructor
            (MeasureKind::Sum | MeasureKind::Min | MeasureKind::Max, None) => {
                LogicalType::UnsignedBigInt
            }
        }
    }

    /// Buffers of a batch with `capacity` groups
    pub fn buffer_spec(&self, capacity: usize) -> BufferSpec {
        let (data_width, aux_width) = match self.kind {
            MeasureKind::Sum | MeasureKind::Count | MeasureKind::CountStar => (8, None),
            MeasureKind::Min | MeasureKind::Max => (
                self.input.map_or(8, |input| input.physical_type().size()),
                None,
            ),
            MeasureKind::Avg => (8, Some(8)),
        };
        BufferSpec {
            capacity,
            data_width,
            aux_width,
        }
    }

    /// Update the addressed groups with the bound input
    pub(super) fn update(
        &self,
        input: Option<&Vector>,
        batches: &mut [Batch],
        records: &[AddressingRecord],
    ) -> Result<()> {
        if self.kind == MeasureKind::CountStar {
            return count::update_star(batches, records);
        }

        let input = input.context(InputNotBoundSnafu { kind: self.kind })?;
        let Some(input_type) = self.input else {
            return UnsupportedInputSnafu {
                kind: self.kind,
                input: self.input,
            }
            .fail();
        };
        match self.kind {
            MeasureKind::Count => count::update(input, batches, records),
            MeasureKind::Sum => with_payload_type!(
                input_type,
                T,
                sum::update::<T>(downcast(input, input_type)?, batches, records)
            ),
            MeasureKind::Min => with_payload_type!(
                input_type,
                T,
                min_max::update::<true, T>(downcast(input, input_type)?, batches, records)
            ),
            MeasureKind::Max => with_payload_type!(
                input_type,
                T,
                min_max::update::<false, T>(downcast(input, input_type)?, batches, records)
            ),
            MeasureKind::Avg => with_payload_type!(
                input_type,
                T,
                avg::update::<T>(downcast(input, input_type)?, batches, records)
            ),
            MeasureKind::CountStar => count::update_star(batches, records),
        }
    }

    /// Materialize the groups in the buffer
    pub(super) fn output(&self, buffer: &BatchBuffer) -> Result<Vector> {
        match (self.kind, self.input) {
            (MeasureKind::Count | MeasureKind::CountStar, _) => count::output(buffer),
            (MeasureKind::Avg, _) => avg::output(buffer),
            (MeasureKind::Sum, Some(input)) => {
                with_payload_type!(input, T, primitive_output::<<T as PayloadCast>::SumType>(buffer))
            }
            (MeasureKind::Min | MeasureKind::Max, Some(input)) => {
                with_payload_type!(input, T, primitive_output::<T>(buffer))
            }
            (MeasureKind::Sum | MeasureKind::Min | MeasureKind::Max, None) => {
                UnsupportedInputSnafu {
                    kind: self.kind,
                    input: self.input,
                }
                .fail()
            }
        }
    }
}

#[inline]
fn downcast<T: PrimitiveType>(input: &Vector, expect: LogicalType) -> Result<&PrimitiveVector<T>> {
    T::downcast(input).context(InputTypeMismatchSnafu {
        expect,
        actual: input.logical_type(),
    })
}

/// Visit the buffer and the slot that each record is aggregated into. `f` is called
/// with `(buffer, slot, record)`
#[inline]
fn for_each_target<F>(batches: &mut [Batch], records: &[AddressingRecord], mut f: F) -> Result<()>
where
    F: FnMut(&mut BatchBuffer, usize, usize),
{
    for record in records {
        let batch_index = record.batch_index as usize;
        let buffer = batches[batch_index]
            .buffer_mut()
            .context(UnexpectedSpilledBatchSnafu { batch_index })?;
        f(buffer, record.slot as usize, record.record as usize);
    }
    Ok(())
}

/// Copy the data and validity of the buffer into a vector of `S`
fn primitive_output<S: PrimitiveType>(buffer: &BatchBuffer) -> Result<Vector> {
    let capacity = buffer.spec().capacity;
    let values = &buffer.data().view::<S>()[..capacity];
    PrimitiveVector::try_from_parts(AlignedVec::from_slice(values), buffer.validity().clone())
        .map(S::upcast)
        .context(VectorSnafu)
}
