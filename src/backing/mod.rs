//! Remote data surfaces the resolver reads from.

pub mod memory;
pub mod traits;

pub use memory::InMemoryBackingStore;
pub use traits::{BackingError, BackingStore, Row};
