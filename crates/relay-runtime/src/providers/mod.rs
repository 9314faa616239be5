//! Bundled queue provider implementations.

mod memory;

pub use memory::InMemoryProvider;
