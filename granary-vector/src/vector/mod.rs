//! Vectors are the columns that flow between the operators

pub mod primitive;

pub use self::primitive::{
    Float64Vector, Int32Vector, Int64Vector, PrimitiveType, PrimitiveVector, UInt64Vector,
};

use snafu::Snafu;

use crate::macros::for_all_primitive_types;
use crate::types::LogicalType;

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum VectorError {
    #[snafu(display("Vector has `{data_len}` elements but its validity has `{validity_len}` bits"))]
    ValidityLengthMismatch {
        data_len: usize,
        validity_len: usize,
    },
    #[snafu(display("Vectors have different length: `{lengths:?}`"))]
    InconsistentLength { lengths: Vec<usize> },
}

/// Result type of the vector module
pub type Result<T> = std::result::Result<T, VectorError>;

macro_rules! define_vector {
    ($({$variant:ident, $ty:ty, $alias:ident, $lt:ident}),*) => {
        /// A type-erased column. Accumulators read their input from it and materialize
        /// their results into it
        #[derive(Debug, Clone, PartialEq)]
        pub enum Vector {
            $(
                #[doc = concat!("Vector of [`", stringify!($ty), "`]")]
                $variant($alias),
            )*
        }

        impl Vector {
            /// Get the logical type of the vector
            #[inline]
            pub fn logical_type(&self) -> LogicalType {
                match self {
                    $(Self::$variant(_) => LogicalType::$lt,)*
                }
            }

            /// Number of elements in the vector
            #[inline]
            pub fn len(&self) -> usize {
                match self {
                    $(Self::$variant(vector) => vector.len(),)*
                }
            }

            /// Returns true if the element with given index is valid. Out of range
            /// index is treated as invalid
            #[inline]
            pub fn is_valid(&self, index: usize) -> bool {
                match self {
                    $(Self::$variant(vector) => index < vector.len() && vector.is_valid(index),)*
                }
            }

            /// Format the element with given index, returns `None` if it is null
            #[inline]
            pub fn format_element(&self, index: usize) -> Option<String> {
                match self {
                    $(Self::$variant(vector) => vector.get(index).map(|element| element.to_string()),)*
                }
            }
        }

        $(
            impl From<$alias> for Vector {
                #[inline]
                fn from(vector: $alias) -> Self {
                    Self::$variant(vector)
                }
            }
        )*
    };
}

for_all_primitive_types!(define_vector);

impl Vector {
    /// Returns true if the vector does not contain any element
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
