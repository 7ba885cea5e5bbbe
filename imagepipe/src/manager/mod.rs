//! The image manager: task registry, state machine and preheat scheduling.
//!
//! An [`ImageManager`] turns requests into tasks, deduplicates work through
//! its memory cache, serializes every state transition under one lock, and
//! fans completions out on a single delivery context. Low-priority warm-up
//! work goes through the preheat scheduler, which is debounced and bounded
//! so it never competes unfairly with explicit foreground requests.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use imagepipe::{ImageManager, ImageRequest, ManagerConfig};
//!
//! let manager = ImageManager::new(ManagerConfig::new(Arc::new(my_loader)));
//!
//! let task = manager.create_task(ImageRequest::new("https://example.com/hero.png"));
//! task.on_completion(|response| {
//!     if let Some(image) = response.image() {
//!         println!("loaded {}x{}", image.width(), image.height());
//!     }
//! });
//! task.resume();
//!
//! // Warm the cache for images the user is likely to scroll to.
//! manager.start_preheating(&[
//!     ImageRequest::new("https://example.com/next-1.png"),
//!     ImageRequest::new("https://example.com/next-2.png"),
//! ]);
//! ```

pub(crate) mod core;
mod registry;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use self::core::ManagerCore;
use crate::cache::{MemoryCache, ResponseCache};
use crate::loader::Loader;
use crate::request::ImageRequest;
use crate::response::ImageResponse;
use crate::task::ImageTask;

// =============================================================================
// Configuration
// =============================================================================

/// Default ceiling on concurrently executing preheat promotions per pass.
pub const DEFAULT_MAX_CONCURRENT_PREHEATS: usize = 2;

/// Debounce applied before a scheduled preheat pass runs.
pub const PREHEAT_PASS_DELAY: Duration = Duration::from_millis(150);

/// Construction configuration for an [`ImageManager`].
pub struct ManagerConfig {
    /// The loading capability. Required.
    pub loader: Arc<dyn Loader>,
    /// Response cache; `None` disables memory caching entirely.
    pub cache: Option<Arc<dyn ResponseCache>>,
    /// Ceiling used by the preheat pass.
    pub max_concurrent_preheats: usize,
    /// Runtime for the delivery worker and timers; defaults to the ambient
    /// tokio runtime.
    pub runtime: Option<Handle>,
}

impl ManagerConfig {
    /// Configuration with the default in-memory cache and preheat ceiling.
    pub fn new(loader: Arc<dyn Loader>) -> Self {
        Self {
            loader,
            cache: Some(Arc::new(MemoryCache::with_default_capacity())),
            max_concurrent_preheats: DEFAULT_MAX_CONCURRENT_PREHEATS,
            runtime: None,
        }
    }
}

// =============================================================================
// Manager
// =============================================================================

/// Coordinates image-loading tasks over a loader and a memory cache.
///
/// Cheap to clone; clones share the same underlying manager. All mutation
/// entry points are serialized under one internal lock and become no-ops
/// after [`invalidate_and_cancel`](Self::invalidate_and_cancel).
#[derive(Clone)]
pub struct ImageManager {
    core: Arc<ManagerCore>,
}

impl ImageManager {
    /// Creates a manager and attaches its event sink to the loader.
    ///
    /// # Panics
    ///
    /// Panics when `config.runtime` is `None` and no tokio runtime is
    /// ambient, since the delivery worker has nowhere to run.
    pub fn new(config: ManagerConfig) -> Self {
        let runtime = config.runtime.unwrap_or_else(Handle::current);
        let core = ManagerCore::start(
            config.loader,
            config.cache,
            config.max_concurrent_preheats,
            runtime,
        );
        Self { core }
    }

    /// Creates a manager over the given loader with default configuration.
    pub fn with_loader(loader: Arc<dyn Loader>) -> Self {
        Self::new(ManagerConfig::new(loader))
    }

    // -------------------------------------------------------------------------
    // Tasks
    // -------------------------------------------------------------------------

    /// Allocates a suspended task for the request.
    ///
    /// `&str`/`String` locators convert directly:
    /// `manager.create_task("https://example.com/a.png")`.
    pub fn create_task(&self, request: impl Into<ImageRequest>) -> ImageTask {
        self.core.register_task(request.into(), None)
    }

    /// Allocates a suspended task with an initial completion callback.
    pub fn create_task_with<F>(&self, request: impl Into<ImageRequest>, completion: F) -> ImageTask
    where
        F: FnOnce(&ImageResponse) + Send + 'static,
    {
        self.core
            .register_task(request.into(), Some(Box::new(completion)))
    }

    // -------------------------------------------------------------------------
    // Preheating
    // -------------------------------------------------------------------------

    /// Queues low-priority warm-up tasks, one per equivalence key.
    ///
    /// Requests already tracked for preheating are ignored. A debounced
    /// pass promotes queued tasks oldest-first, bounded by the configured
    /// concurrency ceiling.
    pub fn start_preheating(&self, requests: &[ImageRequest]) {
        self.core.start_preheating(requests);
    }

    /// Cancels the tracked preheat tasks matching the given requests.
    pub fn stop_preheating(&self, requests: &[ImageRequest]) {
        self.core.stop_preheating(requests);
    }

    /// Cancels every tracked preheat task.
    pub fn stop_all_preheating(&self) {
        self.core.stop_all_preheating();
    }

    // -------------------------------------------------------------------------
    // Manager-wide operations
    // -------------------------------------------------------------------------

    /// Irreversibly shuts the manager down: cancels every executing task
    /// (their callbacks still fire, with cancellation failures), drops all
    /// preheat tracking, detaches and invalidates the loader. Idempotent;
    /// all subsequent guarded operations become no-ops.
    pub fn invalidate_and_cancel(&self) {
        self.core.invalidate_and_cancel();
    }

    /// Clears the memory cache and any loader-owned caches. In-flight
    /// tasks are unaffected.
    pub fn remove_all_cached_images(&self) {
        self.core.remove_all_cached_images();
    }

    /// Returns the cached response for a cache-equivalent request, if any.
    pub fn cached_response(&self, request: &ImageRequest) -> Option<ImageResponse> {
        self.core.cached_response(request)
    }

    /// Stores a response under the request's equivalence key.
    pub fn store_response(&self, response: ImageResponse, request: &ImageRequest) {
        self.core.store_response(response, request);
    }

    /// True once [`invalidate_and_cancel`](Self::invalidate_and_cancel)
    /// has run.
    pub fn is_invalidated(&self) -> bool {
        self.core.is_invalidated()
    }
}

impl fmt::Debug for ImageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageManager")
            .field("executing", &self.core.executing_count())
            .field("preheating", &self.core.preheating_count())
            .field("invalidated", &self.core.is_invalidated())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
