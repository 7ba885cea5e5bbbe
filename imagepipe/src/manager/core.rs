//! State machine and orchestration core.
//!
//! One `ManagerCore` per manager owns the registry lock and drives every
//! task transition. The concurrency discipline, in one place:
//!
//! - All registry mutation happens inside [`ManagerCore::perform`], which
//!   holds the single mutex, runs the requested mutation, drains the
//!   transition queue to a fixed point, then applies queued side effects
//!   outside the lock.
//! - Transitions requested by enter actions (the cache-hit fast path goes
//!   `Running → Completed` from within `Running`'s enter action) land on
//!   the same queue and drain in the same critical section, which preserves
//!   the recursive behavior without a reentrant lock.
//! - Side effects apply in the order the state machine decided them; a
//!   single drainer at a time pops them, so a loader that re-enters
//!   synchronously from `start_loading` queues behind the current batch
//!   instead of deadlocking.
//! - The invalidation token is the manager's one-way off switch: `perform`
//!   checks it under the lock, so once `invalidate_and_cancel` has run, all
//!   guarded operations are no-ops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::registry::{Completion, Effect, Registry, TaskEntry};
use super::PREHEAT_PASS_DELAY;
use crate::cache::ResponseCache;
use crate::delivery::DeliveryQueue;
use crate::error::{ImageError, LoadFailure};
use crate::loader::{Loader, LoaderEvents};
use crate::request::{ImageRequest, RequestKey};
use crate::response::{ImageResponse, LoadedImage, UserInfo};
use crate::task::{ImageTask, TaskId, TaskProgress, TaskState};

pub(crate) struct ManagerCore {
    loader: Arc<dyn Loader>,
    cache: Option<Arc<dyn ResponseCache>>,
    delivery: DeliveryQueue,
    invalidation: CancellationToken,
    max_concurrent_preheats: usize,
    next_task_id: AtomicU64,
    registry: Mutex<Registry>,
    weak_self: Weak<ManagerCore>,
}

impl ManagerCore {
    /// Builds the core, spawns its delivery worker and attaches the event
    /// sink to the loader.
    pub(crate) fn start(
        loader: Arc<dyn Loader>,
        cache: Option<Arc<dyn ResponseCache>>,
        max_concurrent_preheats: usize,
        runtime: Handle,
    ) -> Arc<Self> {
        let invalidation = CancellationToken::new();
        let delivery = DeliveryQueue::start(runtime, invalidation.clone());
        let core = Arc::new_cyclic(|weak| Self {
            loader,
            cache,
            delivery,
            invalidation,
            max_concurrent_preheats,
            next_task_id: AtomicU64::new(0),
            registry: Mutex::new(Registry::default()),
            weak_self: weak.clone(),
        });
        core.loader.attach(LoaderEvents {
            core: Arc::downgrade(&core),
        });
        core
    }

    pub(crate) fn delivery(&self) -> &DeliveryQueue {
        &self.delivery
    }

    pub(crate) fn is_invalidated(&self) -> bool {
        self.invalidation.is_cancelled()
    }

    fn allocate_task_id(&self) -> TaskId {
        TaskId(self.next_task_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    // =========================================================================
    // Critical section plumbing
    // =========================================================================

    /// Runs a guarded mutation: lock, check the invalidation gate, mutate,
    /// drain transitions to a fixed point, then apply side effects outside
    /// the lock.
    fn perform(&self, f: impl FnOnce(&mut Registry)) {
        let mut reg = self.registry.lock();
        if self.invalidation.is_cancelled() {
            return;
        }
        f(&mut reg);
        self.drain_transitions(&mut reg);
        self.flush_effects(reg);
    }

    fn drain_transitions(&self, reg: &mut Registry) {
        while let Some((id, to)) = reg.pending.pop_front() {
            self.apply_transition(reg, id, to);
        }
    }

    /// Applies queued effects in order, releasing the lock around each one.
    /// Only one thread drains at a time; re-entrant calls queue their
    /// effects and leave them to the active drainer.
    fn flush_effects<'a>(&'a self, mut reg: MutexGuard<'a, Registry>) {
        if reg.applying_effects {
            return;
        }
        reg.applying_effects = true;
        loop {
            let Some(effect) = reg.effects.pop_front() else {
                break;
            };
            drop(reg);
            self.apply_effect(effect);
            reg = self.registry.lock();
        }
        reg.applying_effects = false;
    }

    fn apply_effect(&self, effect: Effect) {
        match effect {
            Effect::StartLoading(id, request) => {
                debug!(task_id = %id, url = %request.url(), "starting load");
                self.loader.start_loading(id, &request);
            }
            Effect::StopLoading(id) => {
                debug!(task_id = %id, "stopping load");
                self.loader.stop_loading(id);
            }
            Effect::Deliver {
                response,
                callbacks,
            } => {
                self.delivery.execute(Box::new(move || {
                    for callback in callbacks {
                        callback(&response);
                    }
                }));
            }
            Effect::SchedulePreheatPass => {
                let weak = self.weak_self.clone();
                self.delivery.execute_after(
                    PREHEAT_PASS_DELAY,
                    Box::new(move || {
                        if let Some(core) = weak.upgrade() {
                            core.run_preheat_pass();
                        }
                    }),
                );
            }
            Effect::DetachLoader => self.loader.detach(),
            Effect::InvalidateLoader => self.loader.invalidate(),
            Effect::ClearLoaderCaches => self.loader.remove_all_cached_images(),
        }
    }

    // =========================================================================
    // State machine
    // =========================================================================

    fn apply_transition(&self, reg: &mut Registry, id: TaskId, to: TaskState) {
        let from = match reg.tasks.get(&id) {
            Some(entry) => entry.state,
            None => {
                trace!(task_id = %id, to = %to, "transition for untracked task dropped");
                return;
            }
        };
        if !from.can_transition_to(to) {
            trace!(task_id = %id, from = %from, to = %to, "illegal transition dropped");
            return;
        }

        // Exit action: a running task being cancelled takes its in-flight
        // load down with it.
        if from == TaskState::Running && to == TaskState::Cancelled {
            reg.push_effect(Effect::StopLoading(id));
        }

        if let Some(entry) = reg.tasks.get_mut(&id) {
            entry.state = to;
        }

        match to {
            TaskState::Running => self.enter_running(reg, id),
            TaskState::Cancelled => {
                if let Some(entry) = reg.tasks.get_mut(&id) {
                    entry.response = Some(ImageResponse::failure(ImageError::Cancelled));
                }
                self.enter_completed(reg, id);
            }
            TaskState::Completed => self.enter_completed(reg, id),
            TaskState::Suspended => {}
        }
    }

    /// Enter action for `Running`: cache lookup first; on a hit the task
    /// completes in the same critical section, on a miss the load starts.
    fn enter_running(&self, reg: &mut Registry, id: TaskId) {
        let (request, lookup_allowed) = match reg.tasks.get(&id) {
            Some(entry) => (entry.request.clone(), entry.request.allows_cache_lookup()),
            None => return,
        };
        let cached = if lookup_allowed {
            self.lookup_cached(&request)
        } else {
            None
        };
        match cached {
            Some(response) => {
                debug!(task_id = %id, url = %request.url(), "memory cache hit");
                if let Some(entry) = reg.tasks.get_mut(&id) {
                    entry.response = Some(response.into_from_cache());
                }
                reg.request_transition(id, TaskState::Completed);
            }
            None => {
                reg.executing.insert(id);
                reg.push_effect(Effect::StartLoading(id, request));
            }
        }
    }

    /// Shared tail for both terminal states: drop the task from the
    /// executing set, wake the preheat scheduler, and dispatch callbacks.
    fn enter_completed(&self, reg: &mut Registry, id: TaskId) {
        reg.executing.remove(&id);
        self.mark_needs_preheat_pass(reg);

        let Some(entry) = reg.tasks.get_mut(&id) else {
            return;
        };
        let response = entry
            .response
            .clone()
            .expect("task reached a terminal state without a response");
        let callbacks = std::mem::take(&mut entry.completions);
        let unreferenced = entry.handles == 0;
        if unreferenced {
            reg.tasks.remove(&id);
        }
        if !callbacks.is_empty() {
            reg.push_effect(Effect::Deliver {
                response,
                callbacks,
            });
        }
    }

    fn lookup_cached(&self, request: &ImageRequest) -> Option<ImageResponse> {
        let cache = self.cache.as_ref()?;
        cache.get(&RequestKey::new(request.clone(), Arc::clone(&self.loader)))
    }

    // =========================================================================
    // Task operations
    // =========================================================================

    pub(crate) fn register_task(
        &self,
        request: ImageRequest,
        completion: Option<Completion>,
    ) -> ImageTask {
        let id = self.allocate_task_id();
        let mut entry = TaskEntry::new(request.clone());
        entry.handles = 1;
        if let Some(callback) = completion {
            if !self.invalidation.is_cancelled() {
                entry.completions.push(callback);
            }
        }
        self.registry.lock().tasks.insert(id, entry);
        trace!(task_id = %id, url = %request.url(), "created task");
        ImageTask {
            id,
            request,
            core: self.weak_self.clone(),
        }
    }

    pub(crate) fn resume(&self, id: TaskId) {
        self.perform(|reg| reg.request_transition(id, TaskState::Running));
    }

    pub(crate) fn cancel(&self, id: TaskId) {
        self.perform(|reg| reg.request_transition(id, TaskState::Cancelled));
    }

    /// Registers a callback, or dispatches it immediately when the task is
    /// already terminal. Shares the critical section with transitions, so
    /// a registration can never race a concurrent completion into firing
    /// zero or two times.
    pub(crate) fn add_completion(&self, id: TaskId, callback: Completion) {
        self.perform(move |reg| {
            let response = {
                let Some(entry) = reg.tasks.get_mut(&id) else {
                    return;
                };
                if entry.state.is_terminal() {
                    entry
                        .response
                        .clone()
                        .expect("terminal task must carry a response")
                } else {
                    entry.completions.push(callback);
                    return;
                }
            };
            reg.push_effect(Effect::Deliver {
                response,
                callbacks: vec![callback],
            });
        });
    }

    // =========================================================================
    // Loader events
    // =========================================================================

    /// Progress mutation, already marshaled onto the delivery context by
    /// [`LoaderEvents::progress`].
    pub(crate) fn update_progress(&self, id: TaskId, completed: i64, total: i64) {
        self.perform(|reg| {
            if let Some(entry) = reg.tasks.get_mut(&id) {
                if entry.state == TaskState::Running {
                    entry.progress = TaskProgress::new(completed, total);
                    trace!(task_id = %id, completed, total, "progress updated");
                }
            }
        });
    }

    /// Loader-reported outcome; re-enters the critical section directly
    /// from whatever thread the loader used.
    pub(crate) fn complete_load(
        &self,
        id: TaskId,
        image: Option<LoadedImage>,
        error: Option<LoadFailure>,
        user_info: UserInfo,
    ) {
        self.perform(move |reg| {
            let response = match image {
                Some(image) => ImageResponse::success(image, user_info),
                None => {
                    let error = error.map(ImageError::load).unwrap_or(ImageError::Unknown);
                    ImageResponse::failure(error)
                }
            };

            let Some(entry) = reg.tasks.get_mut(&id) else {
                debug!(task_id = %id, "completion event for untracked task dropped");
                return;
            };
            if entry.state != TaskState::Running {
                trace!(task_id = %id, state = %entry.state, "late completion event ignored");
                return;
            }

            if response.is_success() && entry.request.allows_cache_storage() {
                if let Some(cache) = &self.cache {
                    let key = RequestKey::new(entry.request.clone(), Arc::clone(&self.loader));
                    cache.set(key, response.clone());
                }
            }

            entry.response = Some(response);
            reg.request_transition(id, TaskState::Completed);
        });
    }

    // =========================================================================
    // Preheating
    // =========================================================================

    pub(crate) fn start_preheating(&self, requests: &[ImageRequest]) {
        self.perform(|reg| {
            for request in requests {
                let key = RequestKey::new(request.clone(), Arc::clone(&self.loader));
                if reg.preheating.contains_key(&key) {
                    continue;
                }
                let id = self.allocate_task_id();
                let mut entry = TaskEntry::new(request.clone());

                // The preheat map entry cleans itself up on terminal
                // transition; this callback is the only observer a preheat
                // task ever has.
                let weak = self.weak_self.clone();
                let cleanup_key = key.clone();
                entry.completions.push(Box::new(move |_response| {
                    if let Some(core) = weak.upgrade() {
                        core.forget_preheat(&cleanup_key, id);
                    }
                }));

                trace!(task_id = %id, url = %request.url(), "tracking preheat task");
                reg.tasks.insert(id, entry);
                reg.preheating.insert(key, id);
            }
            self.mark_needs_preheat_pass(reg);
        });
    }

    pub(crate) fn stop_preheating(&self, requests: &[ImageRequest]) {
        self.perform(|reg| {
            for request in requests {
                let key = RequestKey::new(request.clone(), Arc::clone(&self.loader));
                if let Some(id) = reg.preheating.get(&key).copied() {
                    reg.request_transition(id, TaskState::Cancelled);
                }
            }
        });
    }

    pub(crate) fn stop_all_preheating(&self) {
        self.perform(|reg| {
            let ids: Vec<TaskId> = reg.preheating.values().copied().collect();
            for id in ids {
                reg.request_transition(id, TaskState::Cancelled);
            }
        });
    }

    fn mark_needs_preheat_pass(&self, reg: &mut Registry) {
        if reg.needs_preheat_pass || self.invalidation.is_cancelled() {
            return;
        }
        reg.needs_preheat_pass = true;
        reg.push_effect(Effect::SchedulePreheatPass);
    }

    /// The debounced pass: promote suspended preheat tasks oldest-first
    /// while capacity remains.
    ///
    /// The executing count is read once at pass start and tracked with a
    /// local counter as promotions happen; tasks completing mid-pass are
    /// deliberately not observed, so the bound is loose in that direction.
    pub(crate) fn run_preheat_pass(&self) {
        self.perform(|reg| {
            reg.needs_preheat_pass = false;
            let mut executing = reg.executing.len();
            let mut queued: Vec<TaskId> = reg.preheating.values().copied().collect();
            queued.sort_unstable();
            let mut promoted = 0usize;
            for id in queued {
                if executing >= self.max_concurrent_preheats {
                    break;
                }
                let suspended = reg
                    .tasks
                    .get(&id)
                    .map(|entry| entry.state == TaskState::Suspended)
                    .unwrap_or(false);
                if suspended {
                    reg.request_transition(id, TaskState::Running);
                    executing += 1;
                    promoted += 1;
                }
            }
            if promoted > 0 {
                debug!(promoted, executing, "preheat pass promoted tasks");
            }
        });
    }

    /// Self-cleanup path for preheat map entries; runs from the tracked
    /// task's own completion callback on the delivery context.
    pub(crate) fn forget_preheat(&self, key: &RequestKey, id: TaskId) {
        let mut reg = self.registry.lock();
        if reg.preheating.get(key) == Some(&id) {
            reg.preheating.remove(key);
        }
    }

    // =========================================================================
    // Manager-wide operations
    // =========================================================================

    pub(crate) fn invalidate_and_cancel(&self) {
        self.perform(|reg| {
            info!("invalidating image manager");
            self.invalidation.cancel();
            reg.push_effect(Effect::DetachLoader);

            // Suspended preheat tasks are dropped outright; running ones
            // are cancelled with the rest of the executing set below.
            let preheat_ids: Vec<TaskId> = reg.preheating.values().copied().collect();
            reg.preheating.clear();
            for id in preheat_ids {
                let suspended = reg
                    .tasks
                    .get(&id)
                    .map(|entry| entry.state == TaskState::Suspended)
                    .unwrap_or(false);
                if suspended {
                    reg.tasks.remove(&id);
                }
            }

            let executing: Vec<TaskId> = reg.executing.iter().copied().collect();
            for id in executing {
                reg.request_transition(id, TaskState::Cancelled);
            }
            // Drain now so the loader sees every stop before invalidate.
            self.drain_transitions(reg);
            reg.push_effect(Effect::InvalidateLoader);
        });
    }

    pub(crate) fn remove_all_cached_images(&self) {
        if let Some(cache) = &self.cache {
            cache.remove_all();
        }
        self.loader.remove_all_cached_images();
    }

    pub(crate) fn cached_response(&self, request: &ImageRequest) -> Option<ImageResponse> {
        self.lookup_cached(request)
    }

    pub(crate) fn store_response(&self, response: ImageResponse, request: &ImageRequest) {
        if let Some(cache) = &self.cache {
            let key = RequestKey::new(request.clone(), Arc::clone(&self.loader));
            cache.set(key, response);
        }
    }

    // =========================================================================
    // Handle support
    // =========================================================================

    pub(crate) fn retain_handle(&self, id: TaskId) {
        let mut reg = self.registry.lock();
        if let Some(entry) = reg.tasks.get_mut(&id) {
            entry.handles += 1;
        }
    }

    /// Drops a caller handle. The entry is reclaimed once no handles
    /// remain, unless the task is running: a running task still owes its
    /// callbacks a completion.
    pub(crate) fn release_handle(&self, id: TaskId) {
        let mut reg = self.registry.lock();
        let remove = match reg.tasks.get_mut(&id) {
            Some(entry) => {
                entry.handles = entry.handles.saturating_sub(1);
                entry.handles == 0 && entry.state != TaskState::Running
            }
            None => false,
        };
        if remove {
            reg.tasks.remove(&id);
        }
    }

    pub(crate) fn task_state(&self, id: TaskId) -> TaskState {
        self.registry
            .lock()
            .tasks
            .get(&id)
            .map(|entry| entry.state)
            .unwrap_or(TaskState::Cancelled)
    }

    pub(crate) fn task_progress(&self, id: TaskId) -> TaskProgress {
        self.registry
            .lock()
            .tasks
            .get(&id)
            .map(|entry| entry.progress)
            .unwrap_or_default()
    }

    pub(crate) fn task_response(&self, id: TaskId) -> Option<ImageResponse> {
        self.registry
            .lock()
            .tasks
            .get(&id)
            .and_then(|entry| entry.response.clone())
    }

    pub(crate) fn executing_count(&self) -> usize {
        self.registry.lock().executing.len()
    }

    pub(crate) fn preheating_count(&self) -> usize {
        self.registry.lock().preheating.len()
    }
}
