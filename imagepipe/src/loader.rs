//! Loader capability boundary.
//!
//! The manager does not fetch or decode anything itself; it depends on a
//! [`Loader`] for the actual work. The loader reports back through a
//! [`LoaderEvents`] sink the manager registers at construction — an
//! explicit callback interface rather than an ambient delegate, so there is
//! exactly one funnel through which progress and completion re-enter the
//! manager's critical section.
//!
//! # Contract
//!
//! - `start_loading` may be called at most once per task; `stop_loading`
//!   at most once after it, and only for tasks whose load is in flight.
//! - Events may be emitted from any thread. Progress mutations are
//!   marshaled onto the manager's delivery context; completion re-enters
//!   the manager directly.
//! - Events for tasks the manager no longer tracks are dropped.
//!
//! # Implementors
//!
//! Production loaders wrap a transport and a decode pipeline. Tests use
//! scripted fakes that record `start`/`stop` calls and complete tasks on
//! demand.

use std::fmt;
use std::sync::Weak;

use crate::error::LoadFailure;
use crate::manager::core::ManagerCore;
use crate::request::ImageRequest;
use crate::response::{LoadedImage, UserInfo};
use crate::task::TaskId;

/// Performs the fetch+decode work for tasks.
pub trait Loader: Send + Sync + 'static {
    /// Registers the event sink. Called once, when the manager owning this
    /// loader is constructed.
    fn attach(&self, events: LoaderEvents);

    /// Detaches the event sink. Called when the manager is invalidated;
    /// events emitted afterwards are ignored by the manager anyway.
    fn detach(&self);

    /// Starts the load for a task. Completion and progress are reported
    /// through the attached [`LoaderEvents`] sink with the same `id`.
    fn start_loading(&self, id: TaskId, request: &ImageRequest);

    /// Stops the in-flight load for a task, if any. Best-effort: a
    /// completion event that races this call is dropped by the manager.
    fn stop_loading(&self, id: TaskId);

    /// Decides whether two requests are cache-equivalent.
    ///
    /// This predicate defines [`RequestKey`](crate::request::RequestKey)
    /// equality and must only equate requests with identical source
    /// locators.
    fn is_cache_equivalent(&self, lhs: &ImageRequest, rhs: &ImageRequest) -> bool;

    /// Irreversibly shuts the loader down.
    fn invalidate(&self);

    /// Clears any caches the loader owns (e.g. a decode or data cache).
    fn remove_all_cached_images(&self);
}

/// Event sink through which a loader reports back to its manager.
///
/// Cloneable and thread-safe; holds only a weak reference, so a loader
/// outliving its manager emits into the void.
#[derive(Clone)]
pub struct LoaderEvents {
    pub(crate) core: Weak<ManagerCore>,
}

impl LoaderEvents {
    /// Reports progress for a task.
    ///
    /// The counter mutation is marshaled onto the manager's delivery
    /// context before it touches task state, so loaders may call this from
    /// any thread at any rate.
    pub fn progress(&self, id: TaskId, completed: i64, total: i64) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let weak = self.core.clone();
        core.delivery().execute(Box::new(move || {
            if let Some(core) = weak.upgrade() {
                core.update_progress(id, completed, total);
            }
        }));
    }

    /// Reports the outcome of a load.
    ///
    /// `Some(image)` completes the task successfully; `None` fails it with
    /// the given error, or with an unknown-failure error when the loader
    /// has no error value to report. Ignored unless the task is still
    /// running.
    pub fn completed(
        &self,
        id: TaskId,
        image: Option<LoadedImage>,
        error: Option<LoadFailure>,
        user_info: UserInfo,
    ) {
        if let Some(core) = self.core.upgrade() {
            core.complete_load(id, image, error, user_info);
        }
    }
}

impl fmt::Debug for LoaderEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderEvents")
            .field("attached", &(self.core.strong_count() > 0))
            .finish()
    }
}
