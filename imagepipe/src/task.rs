//! Task identity, lifecycle states and the caller-held task handle.
//!
//! A task represents one unit of image-loading work. The authoritative
//! record for every task lives inside the manager's registry; callers hold
//! an [`ImageTask`] handle that dereferences through the registry under the
//! manager's lock. Handles are cheap to clone and may be moved freely
//! between threads.
//!
//! # Lifecycle
//!
//! ```text
//! Suspended ──resume──► Running ──load / cache hit──► Completed
//!     │                    │
//!     └──────cancel────────┴──────────cancel────────► Cancelled
//! ```
//!
//! `Completed` and `Cancelled` are terminal. Any other transition request
//! is dropped without side effects; redundant resume/cancel calls are
//! expected and harmless.

use std::fmt;
use std::sync::Weak;

use crate::manager::core::ManagerCore;
use crate::request::ImageRequest;
use crate::response::ImageResponse;

// =============================================================================
// Task Identity
// =============================================================================

/// Unique identifier for a task.
///
/// Identifiers increase monotonically in creation order within one manager,
/// which makes them usable as a FIFO tie-break: the preheat scheduler
/// promotes queued tasks in ascending identifier order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    /// Returns the raw numeric value.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Task State
// =============================================================================

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Initial state; the task has been created but not resumed.
    Suspended,
    /// The task is loading (or about to be served from cache).
    Running,
    /// Terminal: the task finished with a success or failure response.
    Completed,
    /// Terminal: the task was cancelled before it could complete.
    Cancelled,
}

impl TaskState {
    /// Returns true for `Completed` and `Cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Cancelled)
    }

    /// Legality table for state transitions.
    ///
    /// Everything not listed here is illegal and must be dropped by the
    /// caller as a no-op, including self-transitions and any transition
    /// out of a terminal state.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Suspended, TaskState::Running)
                | (TaskState::Suspended, TaskState::Cancelled)
                | (TaskState::Running, TaskState::Completed)
                | (TaskState::Running, TaskState::Cancelled)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Suspended => "Suspended",
            TaskState::Running => "Running",
            TaskState::Completed => "Completed",
            TaskState::Cancelled => "Cancelled",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Progress
// =============================================================================

/// Work-unit counters reported by the loader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskProgress {
    /// Completed work units.
    pub completed: i64,
    /// Total work units, if known.
    pub total: i64,
}

impl TaskProgress {
    /// Creates progress counters.
    pub fn new(completed: i64, total: i64) -> Self {
        Self { completed, total }
    }

    /// Completed fraction in `0.0..=1.0`, or `None` while the total is
    /// unknown or zero.
    pub fn fraction(&self) -> Option<f64> {
        if self.total > 0 {
            Some((self.completed as f64 / self.total as f64).clamp(0.0, 1.0))
        } else {
            None
        }
    }
}

// =============================================================================
// Task Handle
// =============================================================================

/// Caller-held handle to a task owned by an [`ImageManager`].
///
/// The handle does not own the task's lifecycle; it requests transitions
/// (`resume`, `cancel`) and registers completion callbacks through the
/// manager, which serializes everything under its internal lock. Dropping
/// every handle to a task that is not running releases its registry entry;
/// a running task keeps loading and still delivers its registered
/// callbacks.
///
/// [`ImageManager`]: crate::manager::ImageManager
pub struct ImageTask {
    pub(crate) id: TaskId,
    pub(crate) request: ImageRequest,
    pub(crate) core: Weak<ManagerCore>,
}

impl ImageTask {
    /// Returns the task identifier.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the request this task was created for.
    pub fn request(&self) -> &ImageRequest {
        &self.request
    }

    /// Requests the `Suspended → Running` transition.
    ///
    /// Entering `Running` first consults the memory cache; on a hit the
    /// task completes without touching the loader. No-op if the task is
    /// not suspended or the manager has been invalidated.
    pub fn resume(&self) {
        if let Some(core) = self.core.upgrade() {
            core.resume(self.id);
        }
    }

    /// Requests a transition to `Cancelled`.
    ///
    /// Cancelling a running task instructs the loader to stop its in-flight
    /// operation; registered callbacks still fire, with a cancellation
    /// failure. No-op on an already-terminal task or after invalidation.
    pub fn cancel(&self) {
        if let Some(core) = self.core.upgrade() {
            core.cancel(self.id);
        }
    }

    /// Registers a completion callback.
    ///
    /// Callbacks fire exactly once, in registration order, on the manager's
    /// delivery context, after the task reaches a terminal state. If the
    /// task is already terminal the callback is dispatched immediately with
    /// the existing response.
    pub fn on_completion<F>(&self, callback: F)
    where
        F: FnOnce(&ImageResponse) + Send + 'static,
    {
        if let Some(core) = self.core.upgrade() {
            core.add_completion(self.id, Box::new(callback));
        }
    }

    /// Snapshot of the task state.
    pub fn state(&self) -> TaskState {
        match self.core.upgrade() {
            Some(core) => core.task_state(self.id),
            // The manager is gone; nothing can ever complete this task.
            None => TaskState::Cancelled,
        }
    }

    /// Snapshot of the loader-reported progress counters.
    pub fn progress(&self) -> TaskProgress {
        self.core
            .upgrade()
            .map(|core| core.task_progress(self.id))
            .unwrap_or_default()
    }

    /// The response, once the task is terminal.
    pub fn response(&self) -> Option<ImageResponse> {
        self.core.upgrade().and_then(|core| core.task_response(self.id))
    }
}

impl Clone for ImageTask {
    fn clone(&self) -> Self {
        if let Some(core) = self.core.upgrade() {
            core.retain_handle(self.id);
        }
        Self {
            id: self.id,
            request: self.request.clone(),
            core: self.core.clone(),
        }
    }
}

impl Drop for ImageTask {
    fn drop(&mut self) {
        if let Some(core) = self.core.upgrade() {
            core.release_handle(self.id);
        }
    }
}

impl fmt::Debug for ImageTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageTask")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
