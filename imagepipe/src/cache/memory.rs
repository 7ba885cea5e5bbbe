//! In-memory response cache with size-based eviction using moka.
//!
//! Entries are weighed by an estimate of their decoded size (RGBA bytes),
//! so the configured capacity bounds actual memory use rather than entry
//! count. Moka's sync cache is lock-free for the common read path, which
//! matters because the manager consults the cache from inside its critical
//! section.

use image::GenericImageView;
use moka::sync::Cache;

use super::ResponseCache;
use crate::request::RequestKey;
use crate::response::ImageResponse;

/// Default capacity: 256 MB of decoded image data.
pub const DEFAULT_MEMORY_CACHE_CAPACITY_BYTES: u64 = 256 * 1024 * 1024;

/// Nominal weight for entries without an image payload.
const FAILURE_ENTRY_COST: u32 = 64;

/// Size-bounded in-memory response cache.
///
/// This is the cache a manager uses when none is supplied. Eviction is
/// LRU-flavored and driven by the byte weigher; storage details beyond the
/// [`ResponseCache`] interface are moka's concern.
pub struct MemoryCache {
    cache: Cache<RequestKey, ImageResponse>,
}

impl MemoryCache {
    /// Creates a cache bounded to roughly `capacity_bytes` of decoded
    /// image data.
    pub fn new(capacity_bytes: u64) -> Self {
        let cache = Cache::builder()
            .weigher(|_key: &RequestKey, response: &ImageResponse| entry_cost(response))
            .max_capacity(capacity_bytes)
            .build();
        Self { cache }
    }

    /// Creates a cache with [`DEFAULT_MEMORY_CACHE_CAPACITY_BYTES`].
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_MEMORY_CACHE_CAPACITY_BYTES)
    }

    /// Number of cached entries (approximate, per moka semantics).
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl ResponseCache for MemoryCache {
    fn get(&self, key: &RequestKey) -> Option<ImageResponse> {
        self.cache.get(key)
    }

    fn set(&self, key: RequestKey, response: ImageResponse) {
        self.cache.insert(key, response);
    }

    fn remove_all(&self) {
        self.cache.invalidate_all();
    }
}

/// Estimated cost of an entry in bytes, as RGBA pixels.
fn entry_cost(response: &ImageResponse) -> u32 {
    match response.image() {
        Some(image) => {
            let (width, height) = image.dimensions();
            let bytes = (width as u64) * (height as u64) * 4;
            // moka weighs with u32; clamp oversized entries.
            bytes.min(u32::MAX as u64) as u32
        }
        None => FAILURE_ENTRY_COST,
    }
}
