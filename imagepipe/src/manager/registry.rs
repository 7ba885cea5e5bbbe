//! Registry bookkeeping types for the manager's critical section.
//!
//! Everything in here is mutated only while holding the manager's lock.
//! The registry also carries two queues that replace lock reentrancy:
//! transitions requested while draining are appended and processed in the
//! same critical section, and outward side effects (loader calls, delivery
//! dispatch, deferred scheduling) are queued and applied by a single
//! drainer after the bookkeeping is done, in the order the state machine
//! decided them.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::request::{ImageRequest, RequestKey};
use crate::response::ImageResponse;
use crate::task::{TaskId, TaskProgress, TaskState};

/// Completion callback registered on a task.
pub(crate) type Completion = Box<dyn FnOnce(&ImageResponse) + Send + 'static>;

/// Outward side effect queued by the state machine.
pub(crate) enum Effect {
    /// Ask the loader to start loading for a task.
    StartLoading(TaskId, ImageRequest),
    /// Ask the loader to stop the in-flight load for a task.
    StopLoading(TaskId),
    /// Dispatch a task's callbacks on the delivery context.
    Deliver {
        response: ImageResponse,
        callbacks: Vec<Completion>,
    },
    /// Schedule the debounced preheat pass.
    SchedulePreheatPass,
    /// Detach the loader's event sink.
    DetachLoader,
    /// Shut the loader down.
    InvalidateLoader,
    /// Clear loader-owned caches.
    ClearLoaderCaches,
}

/// Authoritative record for one task.
pub(crate) struct TaskEntry {
    pub(crate) request: ImageRequest,
    pub(crate) state: TaskState,
    pub(crate) response: Option<ImageResponse>,
    pub(crate) completions: Vec<Completion>,
    pub(crate) progress: TaskProgress,
    /// Live caller handles. Preheat tasks have none; their entries are
    /// reclaimed through the terminal transition alone.
    pub(crate) handles: usize,
}

impl TaskEntry {
    pub(crate) fn new(request: ImageRequest) -> Self {
        Self {
            request,
            state: TaskState::Suspended,
            response: None,
            completions: Vec::new(),
            progress: TaskProgress::default(),
            handles: 0,
        }
    }
}

/// Shared mutable state guarded by the manager's lock.
#[derive(Default)]
pub(crate) struct Registry {
    /// Arena of task records keyed by identifier.
    pub(crate) tasks: HashMap<TaskId, TaskEntry>,
    /// Tasks currently in `Running` with a load in flight.
    pub(crate) executing: HashSet<TaskId>,
    /// Tracked preheat tasks, at most one per equivalence key.
    pub(crate) preheating: HashMap<RequestKey, TaskId>,
    /// Transition requests awaiting processing in this critical section.
    pub(crate) pending: VecDeque<(TaskId, TaskState)>,
    /// Side effects awaiting application outside the lock.
    pub(crate) effects: VecDeque<Effect>,
    /// True while some thread is draining `effects`.
    pub(crate) applying_effects: bool,
    /// True once a preheat pass has been scheduled and not yet run.
    pub(crate) needs_preheat_pass: bool,
}

impl Registry {
    /// Queues a state-transition request for this critical section.
    pub(crate) fn request_transition(&mut self, id: TaskId, to: TaskState) {
        self.pending.push_back((id, to));
    }

    /// Queues an outward side effect.
    pub(crate) fn push_effect(&mut self, effect: Effect) {
        self.effects.push_back(effect);
    }
}
