//! Stores included in `tessera_storage`.

mod memory_store;

pub use memory_store::MemoryStore;
