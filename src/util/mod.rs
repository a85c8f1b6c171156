//! Small helpers shared across the stack.

pub mod lru;

pub use lru::LruCache;
