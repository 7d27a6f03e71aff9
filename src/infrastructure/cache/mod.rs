pub mod persistent_cache;

pub use persistent_cache::PersistentCache;
