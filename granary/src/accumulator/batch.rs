//! Workspace batch of the accumulator
//!
//! A [`Batch`] stores the state of `batch_capacity` groups: a validity bit per group,
//! fixed-width data and an optional fixed-width auxiliary buffer. Buffers are allocated
//! by the resize coordinator and handed to the accumulator, which owns them until the
//! batch is released, reset or spilled.

use std::fmt::Debug;
use std::sync::Arc;

use granary_vector::aligned_vec::AlignedVec;
use granary_vector::bitmap::{BitStore, Bitmap, elts};
use snafu::ResultExt;

use crate::common::types::PartitionId;
use crate::memory::{AllocSnafu, MemoryPool, MemoryReservation, Result};
use crate::spill::store::BlobHandle;

/// Describes the buffers of a batch for one measure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferSpec {
    /// Number of groups in the batch
    pub capacity: usize,
    /// Width of the data of a single group in bytes
    pub data_width: usize,
    /// Width of the auxiliary data of a single group in bytes
    pub aux_width: Option<usize>,
}

impl BufferSpec {
    /// Number of [`BitStore`]s in the validity
    #[inline]
    pub fn validity_words(&self) -> usize {
        elts(self.capacity)
    }

    /// Length of the data buffer in bytes
    #[inline]
    pub fn data_len(&self) -> usize {
        self.capacity * self.data_width
    }

    /// Length of the auxiliary buffer in bytes
    #[inline]
    pub fn aux_len(&self) -> Option<usize> {
        self.aux_width.map(|width| self.capacity * width)
    }

    /// Number of bytes allocated for a batch with this spec. It is the number reserved
    /// from the memory pool
    pub fn allocation_size(&self) -> usize {
        AlignedVec::<BitStore>::capacity_in_bytes_for(self.validity_words())
            + AlignedVec::<u8>::capacity_in_bytes_for(self.data_len())
            + self
                .aux_len()
                .map_or(0, AlignedVec::<u8>::capacity_in_bytes_for)
    }
}

/// Buffers of a resident batch
pub struct BatchBuffer {
    partition: PartitionId,
    validity: Bitmap,
    data: AlignedVec<u8>,
    aux: Option<AlignedVec<u8>>,
    spec: BufferSpec,
    _reservation: MemoryReservation,
}

impl BatchBuffer {
    /// Reserve the memory from the pool and allocate zeroed buffers described by `spec`
    pub fn try_allocate(
        spec: BufferSpec,
        partition: PartitionId,
        pool: &Arc<MemoryPool>,
    ) -> Result<Self> {
        let reservation = pool.try_reserve(spec.allocation_size())?;
        let validity = Bitmap::try_zeroed(spec.capacity).context(AllocSnafu)?;
        let data = AlignedVec::try_zeroed(spec.data_len()).context(AllocSnafu)?;
        let aux = spec
            .aux_len()
            .map(AlignedVec::try_zeroed)
            .transpose()
            .context(AllocSnafu)?;

        Ok(Self {
            partition,
            validity,
            data,
            aux,
            spec,
            _reservation: reservation,
        })
    }

    /// Partition the buffer is allocated for
    #[inline]
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Spec of the buffer
    #[inline]
    pub fn spec(&self) -> &BufferSpec {
        &self.spec
    }

    /// Validity of the groups
    #[inline]
    pub fn validity(&self) -> &Bitmap {
        &self.validity
    }

    /// Data of the groups
    #[inline]
    pub fn data(&self) -> &AlignedVec<u8> {
        &self.data
    }

    /// Auxiliary data of the groups
    #[inline]
    pub fn aux(&self) -> Option<&AlignedVec<u8>> {
        self.aux.as_ref()
    }

    /// Split the buffer into mutable validity, data and aux
    #[inline]
    pub fn parts_mut(&mut self) -> (&mut Bitmap, &mut AlignedVec<u8>, Option<&mut AlignedVec<u8>>) {
        (&mut self.validity, &mut self.data, self.aux.as_mut())
    }

    /// Bytes allocated by the validity, data and aux buffers
    #[inline]
    pub fn size_in_bytes(&self) -> usize {
        self.validity.capacity_in_bytes()
            + self.data.capacity_in_bytes()
            + self.aux.as_ref().map_or(0, AlignedVec::capacity_in_bytes)
    }

    /// Reset all of the groups to the initial state
    pub fn zero(&mut self) {
        self.validity.clear_all();
        self.data.fill_default();
        if let Some(aux) = &mut self.aux {
            aux.fill_default();
        }
    }
}

impl Debug for BatchBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchBuffer")
            .field("partition", &self.partition)
            .field("spec", &self.spec)
            .field("size_in_bytes", &self.size_in_bytes())
            .finish()
    }
}

/// Where the buffers of the batch live
#[derive(Debug)]
pub enum Residency {
    /// Buffers are in memory
    Resident(BatchBuffer),
    /// Buffers are written to the object store and released
    Spilled(BlobHandle),
}

/// Fixed capacity unit of the workspace of an accumulator
#[derive(Debug)]
pub struct Batch {
    partition: PartitionId,
    residency: Residency,
}

impl Batch {
    /// Create a resident batch backed by the buffer
    #[inline]
    pub fn new(buffer: BatchBuffer) -> Self {
        Self {
            partition: buffer.partition(),
            residency: Residency::Resident(buffer),
        }
    }

    /// Partition of the batch
    #[inline]
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Residency of the batch
    #[inline]
    pub fn residency(&self) -> &Residency {
        &self.residency
    }

    /// Returns true if the batch is spilled
    #[inline]
    pub fn is_spilled(&self) -> bool {
        matches!(self.residency, Residency::Spilled(_))
    }

    /// Get the buffer if the batch is resident
    #[inline]
    pub fn buffer(&self) -> Option<&BatchBuffer> {
        match &self.residency {
            Residency::Resident(buffer) => Some(buffer),
            Residency::Spilled(_) => None,
        }
    }

    /// Get the mutable buffer if the batch is resident
    #[inline]
    pub fn buffer_mut(&mut self) -> Option<&mut BatchBuffer> {
        match &mut self.residency {
            Residency::Resident(buffer) => Some(buffer),
            Residency::Spilled(_) => None,
        }
    }

    /// Bytes held by the batch in memory, spilled batch holds nothing
    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer().map_or(0, BatchBuffer::size_in_bytes)
    }

    /// Replace the residency of the batch, return the previous one
    #[inline]
    pub(crate) fn replace_residency(&mut self, residency: Residency) -> Residency {
        std::mem::replace(&mut self.residency, residency)
    }
}
