//! Utils for hash

/// Default hash builder
pub type BuildHasherDefault = ahash::RandomState;

/// Hash map used inside the crate. The keys are small integers chosen by the engine,
/// therefore a fixed seeded hasher is fine
pub type HashMap<K, V> = hashbrown::HashMap<K, V, BuildHasherDefault>;

/// Constant build hasher default
pub const BUILD_HASHER_DEFAULT: BuildHasherDefault = BuildHasherDefault::with_seeds(9, 7, 9, 8);

/// Create an empty [`HashMap`] with the [`BUILD_HASHER_DEFAULT`]
#[inline]
pub fn new_hash_map<K, V>() -> HashMap<K, V> {
    HashMap::with_hasher(BUILD_HASHER_DEFAULT)
}
