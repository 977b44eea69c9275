//! [`VectorBlock`] is a collection of [`Vector`]s that have same length

use std::fmt::Display;

use snafu::ensure;
use tabled::builder::Builder as TableBuilder;

use crate::vector::{InconsistentLengthSnafu, Result, Vector};

/// [`VectorBlock`] is a collection of [`Vector`]s that have same length, for example
/// the results of all of the measures for one workspace batch
#[derive(Debug, Clone, PartialEq)]
pub struct VectorBlock {
    vectors: Vec<Vector>,
    /// Number of element in the block. All of the vectors should have same length
    length: usize,
}

impl VectorBlock {
    /// Create a new [`VectorBlock`], all of the vectors should have same length
    pub fn try_new(vectors: Vec<Vector>) -> Result<Self> {
        let Some(length) = vectors.first().map(Vector::len) else {
            return Ok(Self { vectors, length: 0 });
        };

        ensure!(
            vectors.iter().all(|vector| vector.len() == length),
            InconsistentLengthSnafu {
                lengths: vectors.iter().map(Vector::len).collect::<Vec<_>>()
            }
        );

        Ok(Self { vectors, length })
    }

    /// Get number of elements in the block
    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns true if the length is 0
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Get number of vectors in the block
    #[inline]
    pub fn num_vectors(&self) -> usize {
        self.vectors.len()
    }

    /// Get a reference to the vector with given index
    #[inline]
    pub fn get_vector(&self, index: usize) -> Option<&Vector> {
        self.vectors.get(index)
    }

    /// Get vectors
    #[inline]
    pub fn vectors(&self) -> &[Vector] {
        &self.vectors
    }

    /// Consume the block, return its vectors
    #[inline]
    pub fn into_vectors(self) -> Vec<Vector> {
        self.vectors
    }

    /// Format the block with given table builder
    pub fn fmt_table(&self, table_builder: &mut TableBuilder, with_logical_type: bool) {
        if with_logical_type {
            table_builder.push_record(
                self.vectors
                    .iter()
                    .map(|vector| vector.logical_type().to_string()),
            );
        }

        (0..self.length).for_each(|index| {
            table_builder.push_record(self.vectors.iter().map(|vector| {
                vector
                    .format_element(index)
                    .unwrap_or_else(|| "Null".to_string())
            }));
        });
    }
}

impl Display for VectorBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut table_builder = TableBuilder::default();
        self.fmt_table(&mut table_builder, true);
        write!(
            f,
            "{}",
            table_builder
                .build()
                .with(tabled::settings::style::Style::modern())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{Float64Vector, Int64Vector, UInt64Vector};

    #[test]
    fn test_display_vector_block() {
        let block = VectorBlock::try_new(vec![
            Int64Vector::from_iter([Some(10), None, Some(-1)]).into(),
            Float64Vector::from_iter([None, Some(-1.5), Some(9.9)]).into(),
        ])
        .unwrap();

        let expect = expect_test::expect![[r#"
            ┌────────┬────────┐
            │ BigInt │ Double │
            ├────────┼────────┤
            │ 10     │ Null   │
            ├────────┼────────┤
            │ Null   │ -1.5   │
            ├────────┼────────┤
            │ -1     │ 9.9    │
            └────────┴────────┘"#]];
        expect.assert_eq(&block.to_string());
    }

    #[test]
    fn test_inconsistent_length() {
        let err = VectorBlock::try_new(vec![
            Int64Vector::from_values_iter([1, 2]).into(),
            UInt64Vector::from_values_iter([1]).into(),
        ])
        .unwrap_err();
        let expect = expect_test::expect!["Vectors have different length: `[2, 1]`"];
        expect.assert_eq(&err.to_string());
    }
}
