//! Logical and physical types of the [`Vector`](crate::vector::Vector)

use std::fmt::Display;

/// Physical type describes how the elements are laid out in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysicalType {
    /// 32 bits signed integer
    Int32,
    /// 64 bits signed integer
    Int64,
    /// 64 bits unsigned integer
    UInt64,
    /// 64 bits float
    Float64,
}

impl PhysicalType {
    /// Size of a single element in bytes
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Self::Int32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }
}

impl Display for PhysicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Logical type is the type the query engine sees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    /// i32
    Integer,
    /// i64
    BigInt,
    /// u64
    UnsignedBigInt,
    /// f64
    Double,
}

impl LogicalType {
    /// Get the physical type of the logical type
    #[inline]
    pub const fn physical_type(self) -> PhysicalType {
        match self {
            Self::Integer => PhysicalType::Int32,
            Self::BigInt => PhysicalType::Int64,
            Self::UnsignedBigInt => PhysicalType::UInt64,
            Self::Double => PhysicalType::Float64,
        }
    }
}

impl Display for LogicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
