//! Response caching.
//!
//! The manager consults a [`ResponseCache`] when a task enters `Running`
//! (the cache-hit fast path) and stores loader-reported successes back into
//! it. Keys are [`RequestKey`]s, so lookups honor the loader's
//! cache-equivalence predicate rather than structural request equality.
//!
//! The default implementation is [`MemoryCache`], a size-bounded in-memory
//! cache; callers with their own storage plug in by implementing the trait.

mod memory;

pub use memory::{MemoryCache, DEFAULT_MEMORY_CACHE_CAPACITY_BYTES};

use crate::request::RequestKey;
use crate::response::ImageResponse;

/// Get/set storage for responses, keyed by cache equivalence.
///
/// Implementations must be safe to call concurrently; the manager invokes
/// `get` from inside its critical section, so implementations should be
/// non-blocking bookkeeping, never I/O.
pub trait ResponseCache: Send + Sync + 'static {
    /// Returns the cached response for a cache-equivalent request, if any.
    fn get(&self, key: &RequestKey) -> Option<ImageResponse>;

    /// Stores a response under the given key, replacing any equivalent
    /// entry.
    fn set(&self, key: RequestKey, response: ImageResponse);

    /// Drops every cached response.
    fn remove_all(&self);
}
