//! Process-wide default manager.
//!
//! A convenience slot for applications that want one manager everywhere
//! without threading it through every call site. The slot is guarded by its
//! own lock, independent of any manager's internal lock, and lives for the
//! process lifetime unless explicitly replaced or torn down.
//!
//! Construction requires a loader capability, so the slot cannot populate
//! itself: install the instance once at startup (`set_shared`) and read it
//! with `shared()` afterwards. Prefer passing managers explicitly where
//! practical; this module exists for the cases where that is not.

use parking_lot::RwLock;

use crate::manager::ImageManager;

static SHARED: RwLock<Option<ImageManager>> = RwLock::new(None);

/// Returns the installed process-wide manager, if any.
pub fn shared() -> Option<ImageManager> {
    SHARED.read().clone()
}

/// Installs (or replaces) the process-wide manager, returning the previous
/// one. The previous instance is not invalidated; do that explicitly if its
/// tasks should stop.
pub fn set_shared(manager: ImageManager) -> Option<ImageManager> {
    SHARED.write().replace(manager)
}

/// Removes and returns the process-wide manager.
pub fn take_shared() -> Option<ImageManager> {
    SHARED.write().take()
}
