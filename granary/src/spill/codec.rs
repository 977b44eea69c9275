//! Serialization of the batch buffer
//!
//! Layout of the blob:
//!
//! ```text
//! +-------+---------+-----------+----------+----------------+----------+---------+
//! | magic | version | partition | capacity | validity words | data len | aux len |
//! +-------+---------+-----------+----------+----------------+----------+---------+
//! | validity words (little endian u64) | data bytes | aux bytes                   |
//! +--------------------------------------------------------------------------------+
//! ```
//!
//! Magic, version and partition are little endian `u32`, the lengths are little endian
//! `u64`. Aux len is `u64::MAX` if the batch does not have the aux buffer. Data and aux
//! bytes are copied as they are in memory, blobs are only read back by the process that
//! wrote them.

use snafu::{Snafu, ensure};

use crate::accumulator::batch::{BatchBuffer, BufferSpec};
use crate::common::types::PartitionId;
use crate::error::{Classify, ErrorClass};

const MAGIC: [u8; 4] = *b"GRNB";
const VERSION: u32 = 1;
const NO_AUX: u64 = u64::MAX;
/// Size of the header in bytes
pub const HEADER_SIZE: usize = 3 * 4 + 4 * 8;

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
pub enum CodecError {
    #[snafu(display("Blob has `{len}` bytes, it is too short to contain the header"))]
    TooShort { len: usize },
    #[snafu(display("Blob does not start with the magic of the spilled batch"))]
    BadMagic,
    #[snafu(display("Unsupported version `{version}` of the spilled batch"))]
    UnsupportedVersion { version: u32 },
    #[snafu(display("Spilled batch is corrupted: {reason}"))]
    Corrupted { reason: String },
}

impl Classify for CodecError {
    #[inline]
    fn class(&self) -> ErrorClass {
        ErrorClass::Fatal
    }
}

/// Result type of the codec
pub type Result<T> = std::result::Result<T, CodecError>;

#[derive(Debug, PartialEq, Eq)]
struct Header {
    partition: PartitionId,
    capacity: u64,
    validity_words: u64,
    data_len: u64,
    aux_len: u64,
}

impl Header {
    fn new(partition: PartitionId, spec: &BufferSpec) -> Self {
        Self {
            partition,
            capacity: spec.capacity as u64,
            validity_words: spec.validity_words() as u64,
            data_len: spec.data_len() as u64,
            aux_len: spec.aux_len().map_or(NO_AUX, |len| len as u64),
        }
    }

    fn of(buffer: &BatchBuffer) -> Self {
        Self::new(buffer.partition(), buffer.spec())
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&self.partition.to_le_bytes());
        for field in [
            self.capacity,
            self.validity_words,
            self.data_len,
            self.aux_len,
        ] {
            out.extend_from_slice(&field.to_le_bytes());
        }
    }

    fn read(bytes: &[u8]) -> Result<Self> {
        ensure!(bytes.len() >= HEADER_SIZE, TooShortSnafu { len: bytes.len() });
        ensure!(bytes[..4] == MAGIC, BadMagicSnafu);
        let u32_at = |start: usize| {
            let mut le = [0; 4];
            le.copy_from_slice(&bytes[start..start + 4]);
            u32::from_le_bytes(le)
        };
        let u64_at = |index: usize| {
            let start = 12 + index * 8;
            let mut le = [0; 8];
            le.copy_from_slice(&bytes[start..start + 8]);
            u64::from_le_bytes(le)
        };
        let version = u32_at(4);
        ensure!(version == VERSION, UnsupportedVersionSnafu { version });
        Ok(Self {
            partition: u32_at(8),
            capacity: u64_at(0),
            validity_words: u64_at(1),
            data_len: u64_at(2),
            aux_len: u64_at(3),
        })
    }

    /// Saturates on the lengths that can not be produced by [`encode`]
    fn body_len(&self) -> u64 {
        let aux_len = if self.aux_len == NO_AUX {
            0
        } else {
            self.aux_len
        };
        self.validity_words
            .saturating_mul(8)
            .saturating_add(self.data_len)
            .saturating_add(aux_len)
    }
}

/// Encode the buffer into bytes
pub fn encode(buffer: &BatchBuffer) -> Vec<u8> {
    let header = Header::of(buffer);
    let mut out = Vec::with_capacity(HEADER_SIZE + header.body_len() as usize);
    header.write(&mut out);
    for word in buffer.validity().as_raw_slice() {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out.extend_from_slice(buffer.data().as_slice());
    if let Some(aux) = buffer.aux() {
        out.extend_from_slice(aux.as_slice());
    }
    out
}

/// Decode the bytes into the buffer. The buffer should be allocated with the buffer spec and
/// the partition the bytes are encoded from
pub fn decode_into(bytes: &[u8], buffer: &mut BatchBuffer) -> Result<()> {
    let header = Header::read(bytes)?;
    let expect = Header::of(buffer);
    ensure!(
        header == expect,
        CorruptedSnafu {
            reason: format!("header {header:?} does not match the buffer {expect:?}")
        }
    );
    let body = &bytes[HEADER_SIZE..];
    ensure!(
        body.len() as u64 == header.body_len(),
        CorruptedSnafu {
            reason: format!(
                "body has `{}` bytes, header describes `{}` bytes",
                body.len(),
                header.body_len()
            )
        }
    );

    let (validity, data, aux) = buffer.parts_mut();
    let (validity_bytes, rest) = body.split_at(header.validity_words as usize * 8);
    validity
        .as_raw_mut_slice()
        .iter_mut()
        .zip(validity_bytes.chunks_exact(8))
        .for_each(|(word, chunk)| {
            let mut le = [0; 8];
            le.copy_from_slice(chunk);
            *word = u64::from_le_bytes(le);
        });
    let (data_bytes, aux_bytes) = rest.split_at(header.data_len as usize);
    data.as_mut_slice().copy_from_slice(data_bytes);
    if let Some(aux) = aux {
        aux.as_mut_slice().copy_from_slice(aux_bytes);
    }
    Ok(())
}
