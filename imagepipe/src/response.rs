//! Task responses: the decoded image payload or a failure.
//!
//! Every task eventually yields exactly one [`ImageResponse`] to every
//! registered completion callback. Successes carry the decoded image plus
//! metadata (whether the response was served from the memory cache, and an
//! opaque [`UserInfo`] map the loader may populate); failures carry an
//! [`ImageError`].

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use image::GenericImageView;

use crate::error::ImageError;

/// Decoded image payload.
///
/// The manager never decodes or resizes; it only transports the decoded
/// image produced by the loader. Shared ownership keeps responses cheap to
/// clone into the cache and out to every callback.
pub type LoadedImage = Arc<image::DynamicImage>;

// =============================================================================
// User Info
// =============================================================================

/// Opaque metadata attached to a response by the loader.
///
/// Stored as a map of string keys to type-erased values. Values are shared,
/// so cloning the map (and any response holding it) is cheap.
///
/// # Example
///
/// ```
/// use imagepipe::UserInfo;
///
/// let mut info = UserInfo::new();
/// info.set("mime-type", "image/png".to_string());
/// assert_eq!(info.get::<String>("mime-type").map(String::as_str), Some("image/png"));
/// assert_eq!(info.get::<u32>("mime-type"), None); // wrong type
/// ```
#[derive(Default, Clone)]
pub struct UserInfo {
    data: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl UserInfo {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value under the given key.
    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.data.insert(key.into(), Arc::new(value));
    }

    /// Retrieves a value if it exists under the key with the requested type.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.data.get(key).and_then(|value| value.downcast_ref())
    }

    /// Returns true if a value exists under the key.
    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if no values are stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for UserInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserInfo")
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

// =============================================================================
// Response
// =============================================================================

/// Metadata accompanying a successful response.
#[derive(Debug, Clone, Default)]
pub struct ResponseInfo {
    /// True when the response was served from the memory cache rather than
    /// produced by a load.
    pub is_from_cache: bool,
    /// Opaque loader-supplied metadata.
    pub user_info: UserInfo,
}

/// Outcome of a task: a decoded image or a failure.
///
/// Exactly one response is ever set per task, exactly once; the enum makes
/// the success/failure exclusivity structural.
#[derive(Clone)]
pub enum ImageResponse {
    /// The load (or cache lookup) produced a decoded image.
    Success {
        /// The decoded image.
        image: LoadedImage,
        /// Response metadata.
        info: ResponseInfo,
    },
    /// The task failed or was cancelled.
    Failure(ImageError),
}

impl ImageResponse {
    /// Creates a success response produced by a load.
    pub fn success(image: LoadedImage, user_info: UserInfo) -> Self {
        Self::Success {
            image,
            info: ResponseInfo {
                is_from_cache: false,
                user_info,
            },
        }
    }

    /// Creates a failure response.
    pub fn failure(error: ImageError) -> Self {
        Self::Failure(error)
    }

    /// Re-tags a cached success as served-from-cache. Failures pass
    /// through unchanged.
    pub(crate) fn into_from_cache(self) -> Self {
        match self {
            Self::Success { image, mut info } => {
                info.is_from_cache = true;
                Self::Success { image, info }
            }
            failure => failure,
        }
    }

    /// Returns true for successes.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Returns true for failures.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// The decoded image, for successes.
    pub fn image(&self) -> Option<&LoadedImage> {
        match self {
            Self::Success { image, .. } => Some(image),
            Self::Failure(_) => None,
        }
    }

    /// The response metadata, for successes.
    pub fn info(&self) -> Option<&ResponseInfo> {
        match self {
            Self::Success { info, .. } => Some(info),
            Self::Failure(_) => None,
        }
    }

    /// The failure, for failures.
    pub fn error(&self) -> Option<&ImageError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure(error) => Some(error),
        }
    }

    /// True when this success was served from the memory cache.
    pub fn is_from_cache(&self) -> bool {
        self.info().map(|info| info.is_from_cache).unwrap_or(false)
    }
}

impl fmt::Debug for ImageResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { image, info } => {
                let (width, height) = image.dimensions();
                f.debug_struct("ImageResponse::Success")
                    .field("width", &width)
                    .field("height", &height)
                    .field("is_from_cache", &info.is_from_cache)
                    .finish()
            }
            Self::Failure(error) => f.debug_tuple("ImageResponse::Failure").field(error).finish(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
