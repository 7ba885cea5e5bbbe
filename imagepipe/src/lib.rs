//! Imagepipe - task management for UI image loading.
//!
//! This library coordinates the lifecycle of image-loading work for a
//! UI-facing client: requests become tasks, tasks deduplicate through a
//! memory cache, cancellation is first-class, and low-priority preheating
//! warms the cache without starving foreground loads. The actual fetching
//! and decoding is pluggable — implement [`Loader`] over your transport and
//! decode pipeline and hand it to an [`ImageManager`].
//!
//! Completion callbacks fire exactly once per registration, in
//! registration order, on a single serial delivery context, so callers
//! observe responses in a UI-consistent order no matter which thread
//! produced them.

pub mod cache;
mod delivery;
pub mod error;
pub mod loader;
pub mod manager;
pub mod request;
pub mod response;
pub mod shared;
pub mod task;

pub use cache::{MemoryCache, ResponseCache, DEFAULT_MEMORY_CACHE_CAPACITY_BYTES};
pub use error::{
    ImageError, LoadFailure, ERROR_CODE_CANCELLED, ERROR_CODE_UNKNOWN, ERROR_DOMAIN,
};
pub use loader::{Loader, LoaderEvents};
pub use manager::{
    ImageManager, ManagerConfig, DEFAULT_MAX_CONCURRENT_PREHEATS, PREHEAT_PASS_DELAY,
};
pub use request::{ContentMode, ImageRequest, RequestKey};
pub use response::{ImageResponse, LoadedImage, ResponseInfo, UserInfo};
pub use shared::{set_shared, shared, take_shared};
pub use task::{ImageTask, TaskId, TaskProgress, TaskState};
