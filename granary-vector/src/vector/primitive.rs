//! [`PrimitiveVector`] that stores fixed byte-width data

use std::fmt::{Debug, Display};

use snafu::ensure;

use super::{Result, ValidityLengthMismatchSnafu, Vector};
use crate::aligned_vec::{AlignedVec, AllocType};
use crate::bitmap::Bitmap;
use crate::macros::for_all_primitive_types;
use crate::types::{LogicalType, PhysicalType};

/// Trait for types that can be placed on the [`PrimitiveVector`]
pub trait PrimitiveType: AllocType + PartialOrd + Display {
    /// Physical type of this primitive type
    const PHYSICAL_TYPE: PhysicalType;
    /// Default logical type of this primitive type
    const LOGICAL_TYPE: LogicalType;

    /// Erase the type of the vector
    fn upcast(vector: PrimitiveVector<Self>) -> Vector;

    /// Downcast the type-erased vector, returns `None` if the vector does not store
    /// `Self`
    fn downcast(vector: &Vector) -> Option<&PrimitiveVector<Self>>;
}

macro_rules! impl_primitive_type {
    ($({$variant:ident, $ty:ty, $alias:ident, $lt:ident}),*) => {
        $(
            impl PrimitiveType for $ty {
                const PHYSICAL_TYPE: PhysicalType = PhysicalType::$variant;
                const LOGICAL_TYPE: LogicalType = LogicalType::$lt;

                #[inline]
                fn upcast(vector: PrimitiveVector<Self>) -> Vector {
                    Vector::$variant(vector)
                }

                #[inline]
                fn downcast(vector: &Vector) -> Option<&PrimitiveVector<Self>> {
                    match vector {
                        Vector::$variant(vector) => Some(vector),
                        _ => None,
                    }
                }
            }

            #[doc = concat!("A [`PrimitiveVector`] of [`", stringify!($ty), "`]")]
            pub type $alias = PrimitiveVector<$ty>;
        )*
    };
}

for_all_primitive_types!(impl_primitive_type);

/// [`PrimitiveVector`] that stores fixed byte-width data, such as `i32` or `f64`
#[derive(Clone, PartialEq)]
pub struct PrimitiveVector<T: PrimitiveType> {
    data: AlignedVec<T>,
    /// Empty validity means all of the elements are valid
    validity: Bitmap,
}

impl<T: PrimitiveType> PrimitiveVector<T> {
    /// Create a new empty [`PrimitiveVector`]
    #[inline]
    pub fn new() -> Self {
        Self {
            data: AlignedVec::new(),
            validity: Bitmap::new(),
        }
    }

    /// Create the vector from its parts. An empty `validity` means all of the elements
    /// are valid
    pub fn try_from_parts(data: AlignedVec<T>, validity: Bitmap) -> Result<Self> {
        ensure!(
            validity.is_empty() || validity.len() == data.len(),
            ValidityLengthMismatchSnafu {
                data_len: data.len(),
                validity_len: validity.len()
            }
        );
        Ok(Self { data, validity })
    }

    /// Construct [`Self`] from iterator of values, all of them are valid
    pub fn from_values_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            data: iter.into_iter().collect(),
            validity: Bitmap::new(),
        }
    }

    /// Number of elements in the vector
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the vector does not contain any element
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the values of the vector, value of the null element is undefined
    #[inline]
    pub fn values(&self) -> &[T] {
        self.data.as_slice()
    }

    /// Get the validity of the vector
    #[inline]
    pub fn validity(&self) -> &Bitmap {
        &self.validity
    }

    /// Returns true if the element with given index is not null
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`
    #[inline]
    pub fn is_valid(&self, index: usize) -> bool {
        assert!(index < self.len());
        self.validity.is_empty() || self.validity.get(index)
    }

    /// Get the element with given index, returns `None` if the element is null or the
    /// index is out of range
    #[inline]
    pub fn get(&self, index: usize) -> Option<T> {
        if index >= self.len() || !self.is_valid(index) {
            None
        } else {
            Some(self.data.as_slice()[index])
        }
    }

    /// Iterate the elements of the vector
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = Option<T>> + '_ {
        (0..self.len()).map(|index| self.get(index))
    }
}

impl<T: PrimitiveType> Default for PrimitiveVector<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PrimitiveType> Debug for PrimitiveVector<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}Vector", T::PHYSICAL_TYPE)?;
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T: PrimitiveType> FromIterator<Option<T>> for PrimitiveVector<T> {
    fn from_iter<I: IntoIterator<Item = Option<T>>>(iter: I) -> Self {
        let mut data = AlignedVec::new();
        let mut all_valid = true;
        let validity = iter
            .into_iter()
            .map(|element| {
                data.push(element.unwrap_or_default());
                all_valid &= element.is_some();
                element.is_some()
            })
            .collect::<Bitmap>();

        Self {
            data,
            validity: if all_valid { Bitmap::new() } else { validity },
        }
    }
}
