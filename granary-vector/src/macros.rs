//! Macros shared by the vector modules

/// Invoke `$macro` with all of the primitive types the vectors support. Each entry is
/// `{variant, primitive type, vector alias, default logical type}`
macro_rules! for_all_primitive_types {
    ($macro:ident) => {
        $macro! {
            {Int32, i32, Int32Vector, Integer},
            {Int64, i64, Int64Vector, BigInt},
            {UInt64, u64, UInt64Vector, UnsignedBigInt},
            {Float64, f64, Float64Vector, Double}
        }
    };
}

pub(crate) use for_all_primitive_types;
