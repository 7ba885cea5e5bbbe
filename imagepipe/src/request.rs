//! Image request types and cache-equivalence keys.
//!
//! An [`ImageRequest`] bundles a source locator with the processing options
//! the loader should apply. Two requests can be *cache-equivalent* without
//! being identical (for example when an option does not affect the decoded
//! result); equivalence is decided by the loader, not by structural
//! equality, and [`RequestKey`] captures that by delegating `Eq` to the
//! owning loader's predicate.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::loader::Loader;

// =============================================================================
// Content Mode
// =============================================================================

/// How a loaded image should be fitted into a requested target size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContentMode {
    /// Scale to fill the target size, cropping overflow.
    #[default]
    AspectFill,
    /// Scale to fit entirely within the target size.
    AspectFit,
}

// =============================================================================
// Image Request
// =============================================================================

/// Request for a decoded image.
///
/// Carries the source locator plus the processing options a loader
/// interprets. The manager itself never decodes or resizes; the options
/// travel with the request so the loader and the cache-equivalence
/// predicate can see them.
///
/// # Example
///
/// ```
/// use imagepipe::{ContentMode, ImageRequest};
///
/// let request = ImageRequest::new("https://example.com/hero.png")
///     .with_target_size(320, 240)
///     .with_content_mode(ContentMode::AspectFit);
/// assert_eq!(request.url(), "https://example.com/hero.png");
/// assert_eq!(request.target_size(), Some((320, 240)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    url: String,
    target_size: Option<(u32, u32)>,
    content_mode: ContentMode,
    cache_lookup_allowed: bool,
    cache_storage_allowed: bool,
}

impl ImageRequest {
    /// Creates a request for the given source locator with default options.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            target_size: None,
            content_mode: ContentMode::default(),
            cache_lookup_allowed: true,
            cache_storage_allowed: true,
        }
    }

    /// Sets the size the loader should decode/resize for.
    pub fn with_target_size(mut self, width: u32, height: u32) -> Self {
        self.target_size = Some((width, height));
        self
    }

    /// Sets the content mode used together with the target size.
    pub fn with_content_mode(mut self, mode: ContentMode) -> Self {
        self.content_mode = mode;
        self
    }

    /// Skip the memory-cache lookup when this request starts running,
    /// forcing a reload even if an equivalent response is cached.
    pub fn skip_cache_lookup(mut self) -> Self {
        self.cache_lookup_allowed = false;
        self
    }

    /// Do not store this request's response in the memory cache.
    pub fn skip_cache_storage(mut self) -> Self {
        self.cache_storage_allowed = false;
        self
    }

    /// The source locator.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The requested target size, if any.
    pub fn target_size(&self) -> Option<(u32, u32)> {
        self.target_size
    }

    /// The requested content mode.
    pub fn content_mode(&self) -> ContentMode {
        self.content_mode
    }

    /// Whether entering `Running` may be satisfied from the memory cache.
    pub fn allows_cache_lookup(&self) -> bool {
        self.cache_lookup_allowed
    }

    /// Whether a successful load may be stored in the memory cache.
    pub fn allows_cache_storage(&self) -> bool {
        self.cache_storage_allowed
    }
}

impl From<&str> for ImageRequest {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for ImageRequest {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}

// =============================================================================
// Request Key
// =============================================================================

/// Cache/deduplication key for a request.
///
/// Wraps a request together with the owner that supplies the equivalence
/// predicate. Two keys compare equal iff the owner's
/// [`Loader::is_cache_equivalent`] says their requests are
/// cache-equivalent, so equality is context-dependent rather than
/// structural.
///
/// Hashing covers only the source locator. For use in hashed maps the
/// owner's predicate must therefore never equate requests with different
/// locators; it may only refine equality *within* one locator (for
/// example, treating differing target sizes as equivalent).
#[derive(Clone)]
pub struct RequestKey {
    request: ImageRequest,
    owner: Arc<dyn Loader>,
}

impl RequestKey {
    pub(crate) fn new(request: ImageRequest, owner: Arc<dyn Loader>) -> Self {
        Self { request, owner }
    }

    /// The wrapped request.
    pub fn request(&self) -> &ImageRequest {
        &self.request
    }
}

impl PartialEq for RequestKey {
    fn eq(&self, other: &Self) -> bool {
        self.owner.is_cache_equivalent(&self.request, &other.request)
    }
}

impl Eq for RequestKey {}

impl Hash for RequestKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.request.url.hash(state);
    }
}

impl fmt::Debug for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestKey")
            .field("url", &self.request.url)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
