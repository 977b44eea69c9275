//! Addressing buffer produced by the group address resolver
//!
//! For each input record, the resolver looks up the hash table and finds the group slot
//! it belongs to. The result is a flat buffer of fixed-width [`AddressingRecord`]s, the
//! accumulators only read it.

use std::mem::{align_of, size_of};

use snafu::{Snafu, ensure};
use strength_reduce::StrengthReducedU64;

use crate::common::types::{BatchIndex, PartitionId};
use crate::error::{Classify, ErrorClass};

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
pub enum AddressingError {
    #[snafu(display(
        "Addressing buffer contains `{len}` records, but the record count is `{count}`"
    ))]
    CountOutOfRange { count: usize, len: usize },
    #[snafu(display(
        "Addressing buffer with `{actual}` bytes can not hold `{count}` records, `{required}` bytes are required"
    ))]
    BufferTooShort {
        count: usize,
        required: usize,
        actual: usize,
    },
    #[snafu(display(
        "Addressing buffer at address `{address:#x}` is not aligned to `{align}` bytes"
    ))]
    Misaligned { address: usize, align: usize },
    #[snafu(display("Batch capacity of the layout must be positive"))]
    ZeroCapacity,
}

type Result<T> = std::result::Result<T, AddressingError>;

impl Classify for AddressingError {
    #[inline]
    fn class(&self) -> ErrorClass {
        ErrorClass::Invalid
    }
}

/// Location of the group slot that an input record is aggregated into
///
/// The fields are stored in native byte order, the record is 16 bytes and 4 bytes
/// aligned
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AddressingRecord {
    /// Partition of the group. It must be identical to the partition of the batch
    pub partition: u32,
    /// Index of the batch in the accumulator
    pub batch_index: u32,
    /// Slot of the group in the batch
    pub slot: u32,
    /// Index of the source record in the bound input vector
    pub record: u32,
}

impl AddressingRecord {
    /// Size of the encoded record in bytes
    pub const SIZE: usize = size_of::<Self>();

    /// Create a new record
    #[inline]
    pub fn new(partition: PartitionId, batch_index: u32, slot: u32, record: u32) -> Self {
        Self {
            partition,
            batch_index,
            slot,
            record,
        }
    }
}

/// Borrowed addressing buffer, the first `count` records of the externally allocated
/// buffer
#[derive(Debug, Clone, Copy)]
pub struct Addressing<'a> {
    records: &'a [AddressingRecord],
}

impl<'a> Addressing<'a> {
    /// Create the addressing from the first `count` records
    pub fn new(records: &'a [AddressingRecord], count: usize) -> Result<Self> {
        ensure!(
            count <= records.len(),
            CountOutOfRangeSnafu {
                count,
                len: records.len()
            }
        );
        Ok(Self {
            records: &records[..count],
        })
    }

    /// View the raw bytes written by the resolver as `count` records without copying
    pub fn try_from_bytes(bytes: &'a [u8], count: usize) -> Result<Self> {
        let required = count
            .checked_mul(AddressingRecord::SIZE)
            .unwrap_or(usize::MAX);
        ensure!(
            bytes.len() >= required,
            BufferTooShortSnafu {
                count,
                required,
                actual: bytes.len()
            }
        );
        let address = bytes.as_ptr() as usize;
        ensure!(
            count == 0 || address % align_of::<AddressingRecord>() == 0,
            MisalignedSnafu {
                address,
                align: align_of::<AddressingRecord>()
            }
        );
        if count == 0 {
            return Ok(Self { records: &[] });
        }

        // SAFETY: the pointer is aligned and the buffer has `required` bytes. The record
        // only contains u32 fields, every bit pattern is valid
        let records = unsafe {
            std::slice::from_raw_parts(bytes.as_ptr() as *const AddressingRecord, count)
        };
        Ok(Self { records })
    }

    /// Number of records
    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if there is no record
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get the records
    #[inline]
    pub fn records(&self) -> &'a [AddressingRecord] {
        self.records
    }
}

/// Maps the dense ordinal of the group to its `(batch_index, slot)`. The hash table
/// hands out ordinals in insertion order, the layout tells which batch holds them
#[derive(Debug, Clone, Copy)]
pub struct BatchLayout {
    capacity: StrengthReducedU64,
}

impl BatchLayout {
    /// Create a layout for batches with the given capacity
    pub fn try_new(batch_capacity: usize) -> Result<Self> {
        ensure!(batch_capacity > 0, ZeroCapacitySnafu);
        Ok(Self {
            capacity: StrengthReducedU64::new(batch_capacity as u64),
        })
    }

    /// Capacity of the batch
    #[inline]
    pub fn batch_capacity(&self) -> usize {
        self.capacity.get() as usize
    }

    /// Locate the group
    #[inline]
    pub fn locate(&self, group: u64) -> (BatchIndex, u32) {
        let (batch_index, slot) = StrengthReducedU64::div_rem(group, self.capacity);
        (batch_index as BatchIndex, slot as u32)
    }

    /// Number of batches required to hold `num_groups` groups
    #[inline]
    pub fn batches_for(&self, num_groups: u64) -> usize {
        num_groups.div_ceil(self.capacity.get()) as usize
    }

    /// Build the addressing record of the group
    #[inline]
    pub fn record(&self, partition: PartitionId, group: u64, record: u32) -> AddressingRecord {
        let (batch_index, slot) = self.locate(group);
        AddressingRecord::new(partition, batch_index as u32, slot, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_size() {
        assert_eq!(AddressingRecord::SIZE, 16);
        assert_eq!(align_of::<AddressingRecord>(), 4);
    }

    #[test]
    fn test_addressing_count() {
        let records = [
            AddressingRecord::new(0, 0, 2, 0),
            AddressingRecord::new(0, 0, 3, 1),
        ];
        let addressing = Addressing::new(&records, 1).unwrap();
        assert_eq!(addressing.len(), 1);
        assert_eq!(addressing.records()[0].slot, 2);

        let err = Addressing::new(&records, 3).unwrap_err();
        let expect = expect_test::expect![
            "Addressing buffer contains `2` records, but the record count is `3`"
        ];
        expect.assert_eq(&err.to_string());
    }

    #[test]
    fn test_addressing_from_bytes() {
        let records = [
            AddressingRecord::new(1, 0, 2, 0),
            AddressingRecord::new(1, 3, 0, 7),
        ];
        let bytes = records
            .iter()
            .flat_map(|record| {
                [record.partition, record.batch_index, record.slot, record.record]
                    .into_iter()
                    .flat_map(u32::to_ne_bytes)
            })
            .collect::<Vec<_>>();
        // Copy into a u32 buffer to guarantee the alignment
        let words = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect::<Vec<_>>();
        // SAFETY: u32 can be viewed as bytes
        let aligned = unsafe {
            std::slice::from_raw_parts(words.as_ptr() as *const u8, words.len() * 4)
        };

        let addressing = Addressing::try_from_bytes(aligned, 2).unwrap();
        assert_eq!(addressing.records(), &records);

        let err = Addressing::try_from_bytes(&aligned[..20], 2).unwrap_err();
        assert!(matches!(
            err,
            AddressingError::BufferTooShort {
                required: 32,
                actual: 20,
                ..
            }
        ));

        let err = Addressing::try_from_bytes(&aligned[1..], 1).unwrap_err();
        assert!(matches!(err, AddressingError::Misaligned { align: 4, .. }));
        assert!(Addressing::try_from_bytes(&[], 0).unwrap().is_empty());
    }

    #[test]
    fn test_batch_layout() {
        let layout = BatchLayout::try_new(4).unwrap();
        assert_eq!(layout.locate(0), (0, 0));
        assert_eq!(layout.locate(6), (1, 2));
        assert_eq!(layout.batches_for(0), 0);
        assert_eq!(layout.batches_for(9), 3);
        assert_eq!(layout.record(3, 5, 11), AddressingRecord::new(3, 1, 1, 11));
        assert!(matches!(
            BatchLayout::try_new(0),
            Err(AddressingError::ZeroCapacity)
        ));
    }
}
