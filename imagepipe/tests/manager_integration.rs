//! Integration tests for the image manager.
//!
//! These tests drive the full public surface with a scripted loader:
//! - task lifecycle with delayed success and cancellation
//! - completion fan-out guarantees (exactly once, in order, late joiners)
//! - the memory-cache fast path
//! - preheat dedup, FIFO promotion and the concurrency ceiling
//! - invalidation semantics
//!
//! Run with: `cargo test --test manager_integration`

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::GenericImageView;
use parking_lot::Mutex;

use imagepipe::{
    ImageManager, ImageRequest, ImageResponse, LoadFailure, Loader, LoaderEvents, LoadedImage,
    TaskId, TaskState, UserInfo,
};

// ============================================================================
// Scripted Loader
// ============================================================================

/// Loader that records every call and completes tasks only when told to.
#[derive(Default)]
struct MockLoader {
    events: Mutex<Option<LoaderEvents>>,
    started: Mutex<Vec<TaskId>>,
    stopped: Mutex<Vec<TaskId>>,
    detached: AtomicBool,
    invalidated: AtomicBool,
    caches_cleared: AtomicBool,
}

impl MockLoader {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn started(&self) -> Vec<TaskId> {
        self.started.lock().clone()
    }

    fn stopped(&self) -> Vec<TaskId> {
        self.stopped.lock().clone()
    }

    fn events(&self) -> Option<LoaderEvents> {
        self.events.lock().clone()
    }

    /// Reports a successful load of a `width` x `height` image.
    fn complete_success(&self, id: TaskId, width: u32, height: u32) {
        let image: LoadedImage = Arc::new(image::DynamicImage::new_rgba8(width, height));
        if let Some(events) = self.events() {
            events.completed(id, Some(image), None, UserInfo::new());
        }
    }

    /// Reports a failed load, with or without an error value.
    fn complete_failure(&self, id: TaskId, error: Option<io::Error>) {
        if let Some(events) = self.events() {
            let failure = error.map(|e| Arc::new(e) as LoadFailure);
            events.completed(id, None, failure, UserInfo::new());
        }
    }

    fn report_progress(&self, id: TaskId, completed: i64, total: i64) {
        if let Some(events) = self.events() {
            events.progress(id, completed, total);
        }
    }
}

impl Loader for MockLoader {
    fn attach(&self, events: LoaderEvents) {
        *self.events.lock() = Some(events);
    }

    fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
        *self.events.lock() = None;
    }

    fn start_loading(&self, id: TaskId, _request: &ImageRequest) {
        self.started.lock().push(id);
    }

    fn stop_loading(&self, id: TaskId) {
        self.stopped.lock().push(id);
    }

    fn is_cache_equivalent(&self, lhs: &ImageRequest, rhs: &ImageRequest) -> bool {
        lhs.url() == rhs.url()
    }

    fn invalidate(&self) {
        self.invalidated.store(true, Ordering::SeqCst);
    }

    fn remove_all_cached_images(&self) {
        self.caches_cleared.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn manager() -> (ImageManager, Arc<MockLoader>) {
    let loader = MockLoader::new();
    let manager = ImageManager::with_loader(loader.clone());
    (manager, loader)
}

fn url(n: usize) -> String {
    format!("https://example.com/image-{n}.png")
}

/// Polls a condition while letting the delivery worker and timers run.
/// Under paused tokio time each sleep advances the clock instantly.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("timed out waiting for condition");
}

/// Counts callback invocations and remembers the last observed response.
#[derive(Clone, Default)]
struct CompletionProbe {
    count: Arc<AtomicUsize>,
    last: Arc<Mutex<Option<ImageResponse>>>,
}

impl CompletionProbe {
    fn new() -> Self {
        Self::default()
    }

    fn hook(&self) -> impl FnOnce(&ImageResponse) + Send + 'static {
        let probe = self.clone();
        move |response| {
            probe.count.fetch_add(1, Ordering::SeqCst);
            *probe.last.lock() = Some(response.clone());
        }
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    fn last(&self) -> Option<ImageResponse> {
        self.last.lock().clone()
    }
}

// ============================================================================
// Lifecycle Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_delayed_success_delivers_exactly_one_completion() {
    let (manager, loader) = manager();
    let probe = CompletionProbe::new();

    let task = manager.create_task(url(1));
    task.on_completion(probe.hook());
    task.resume();
    assert_eq!(task.state(), TaskState::Running);

    // Nothing fires before the loader reports back.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(probe.count(), 0);

    loader.complete_success(task.id(), 32, 16);
    wait_until(|| probe.count() > 0).await;

    assert_eq!(probe.count(), 1);
    assert_eq!(task.state(), TaskState::Completed);
    let response = probe.last().expect("response");
    assert!(response.is_success());
    assert!(!response.is_from_cache());
    let image = response.image().expect("image");
    assert_eq!(image.width(), 32);
    assert_eq!(image.height(), 16);

    // Extra waiting never produces a second delivery.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(probe.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_callbacks_fire_in_registration_order() {
    let (manager, loader) = manager();
    let order = Arc::new(Mutex::new(Vec::new()));

    let task = manager.create_task(url(1));
    for i in 0..3 {
        let order = Arc::clone(&order);
        task.on_completion(move |_| order.lock().push(i));
    }
    task.resume();
    loader.complete_success(task.id(), 4, 4);

    wait_until(|| order.lock().len() == 3).await;
    assert_eq!(*order.lock(), vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_late_registration_fires_immediately_with_existing_response() {
    let (manager, loader) = manager();
    let task = manager.create_task(url(1));
    task.resume();
    loader.complete_success(task.id(), 8, 8);
    wait_until(|| task.state() == TaskState::Completed).await;

    let probe = CompletionProbe::new();
    task.on_completion(probe.hook());
    wait_until(|| probe.count() > 0).await;

    assert_eq!(probe.count(), 1);
    assert!(probe.last().expect("response").is_success());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_loader_reports() {
    let (manager, loader) = manager();
    let probe = CompletionProbe::new();

    let task = manager.create_task(url(1));
    task.on_completion(probe.hook());
    task.resume();
    task.cancel();

    wait_until(|| probe.count() > 0).await;
    assert_eq!(probe.count(), 1);
    assert_eq!(task.state(), TaskState::Cancelled);
    assert_eq!(loader.stopped(), vec![task.id()]);

    let response = probe.last().expect("response");
    let error = response.error().expect("failure");
    assert!(error.is_cancellation());
    assert_eq!(error.code(), Some(imagepipe::ERROR_CODE_CANCELLED));

    // A completion event racing the cancellation is dropped.
    loader.complete_success(task.id(), 4, 4);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(probe.count(), 1);
    assert_eq!(task.state(), TaskState::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_failure_when_loader_reports_no_error() {
    let (manager, loader) = manager();
    let probe = CompletionProbe::new();

    let task = manager.create_task_with(url(1), probe.hook());
    task.resume();
    loader.complete_failure(task.id(), None);

    wait_until(|| probe.count() > 0).await;
    let response = probe.last().expect("response");
    let error = response.error().expect("failure");
    assert_eq!(error.code(), Some(imagepipe::ERROR_CODE_UNKNOWN));
}

#[tokio::test(start_paused = true)]
async fn test_underlying_error_passes_through_with_cause() {
    let (manager, loader) = manager();
    let probe = CompletionProbe::new();

    let task = manager.create_task_with(url(1), probe.hook());
    task.resume();
    loader.complete_failure(
        task.id(),
        Some(io::Error::new(io::ErrorKind::TimedOut, "socket timed out")),
    );

    wait_until(|| probe.count() > 0).await;
    let response = probe.last().expect("response");
    let error = response.error().expect("failure");
    assert_eq!(error.code(), None);
    let cause = error.cause().expect("underlying cause");
    assert!(cause.to_string().contains("socket timed out"));
}

#[tokio::test(start_paused = true)]
async fn test_progress_is_marshaled_to_task_counters() {
    let (manager, loader) = manager();
    let task = manager.create_task(url(1));
    task.resume();

    loader.report_progress(task.id(), 5, 10);
    wait_until(|| task.progress().completed == 5).await;
    assert_eq!(task.progress().total, 10);
    assert_eq!(task.progress().fraction(), Some(0.5));
}

// ============================================================================
// Cache Fast Path
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_successful_load_populates_cache_for_equivalent_requests() {
    let (manager, loader) = manager();

    let first = manager.create_task(url(1));
    first.resume();
    loader.complete_success(first.id(), 16, 16);
    wait_until(|| first.state() == TaskState::Completed).await;

    // Equivalent request: served from cache, loader untouched.
    let probe = CompletionProbe::new();
    let second = manager.create_task_with(url(1), probe.hook());
    second.resume();
    assert_eq!(second.state(), TaskState::Completed);
    assert_eq!(loader.started().len(), 1);

    wait_until(|| probe.count() > 0).await;
    let response = probe.last().expect("response");
    assert!(response.is_from_cache());
}

#[tokio::test(start_paused = true)]
async fn test_skip_cache_storage_keeps_response_out_of_cache() {
    let (manager, loader) = manager();
    let request = ImageRequest::new(url(1)).skip_cache_storage();

    let task = manager.create_task(request.clone());
    task.resume();
    loader.complete_success(task.id(), 16, 16);
    wait_until(|| task.state() == TaskState::Completed).await;

    assert!(manager.cached_response(&ImageRequest::new(url(1))).is_none());
}

// ============================================================================
// Preheating
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_preheat_starts_after_debounce() {
    let (manager, loader) = manager();
    manager.start_preheating(&[ImageRequest::new(url(1))]);

    // Before the debounce elapses nothing runs.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(loader.started().is_empty());

    wait_until(|| loader.started().len() == 1).await;
}

#[tokio::test(start_paused = true)]
async fn test_preheat_deduplicates_equivalent_requests() {
    let (manager, loader) = manager();
    // Same locator, different options: one tracked task.
    manager.start_preheating(&[
        ImageRequest::new(url(1)).with_target_size(10, 10),
        ImageRequest::new(url(1)).with_target_size(20, 20),
    ]);
    manager.start_preheating(&[ImageRequest::new(url(1))]);

    wait_until(|| !loader.started().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(loader.started().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_preheat_promotion_is_bounded_and_fifo() {
    let (manager, loader) = manager();
    let requests: Vec<ImageRequest> = (1..=5).map(|n| ImageRequest::new(url(n))).collect();
    manager.start_preheating(&requests);

    // Default ceiling is 2: the first pass promotes the two oldest.
    wait_until(|| loader.started().len() == 2).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let first_wave = loader.started();
    assert_eq!(first_wave.len(), 2);
    assert!(first_wave[0] < first_wave[1]);

    // Completing them frees capacity; the rescheduled pass promotes the
    // next two, still in creation order.
    loader.complete_success(first_wave[0], 4, 4);
    loader.complete_success(first_wave[1], 4, 4);
    wait_until(|| loader.started().len() == 4).await;
    let second_wave = loader.started();
    assert!(second_wave[2] < second_wave[3]);
    assert!(second_wave[1] < second_wave[2]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_preheating_before_pass_prevents_loading() {
    let (manager, loader) = manager();
    let request = ImageRequest::new(url(1));
    manager.start_preheating(&[request.clone()]);
    manager.stop_preheating(&[request]);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(loader.started().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_all_preheating_cancels_running_preheats() {
    let (manager, loader) = manager();
    manager.start_preheating(&[ImageRequest::new(url(1)), ImageRequest::new(url(2))]);
    wait_until(|| loader.started().len() == 2).await;

    manager.stop_all_preheating();
    let started = loader.started();
    wait_until(|| loader.stopped().len() == 2).await;
    let mut stopped = loader.stopped();
    stopped.sort_unstable();
    let mut expected = started;
    expected.sort_unstable();
    assert_eq!(stopped, expected);
}

#[tokio::test(start_paused = true)]
async fn test_restarting_preheat_after_completion_tracks_again() {
    let (manager, loader) = manager();
    let request = ImageRequest::new(url(1)).skip_cache_storage();
    manager.start_preheating(&[request.clone()]);
    wait_until(|| loader.started().len() == 1).await;

    loader.complete_success(loader.started()[0], 4, 4);
    // The tracked entry cleans itself up via its completion callback.
    wait_until(|| {
        manager.start_preheating(std::slice::from_ref(&request));
        loader.started().len() > 1
    })
    .await;
}

// ============================================================================
// Invalidation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_invalidate_and_cancel_tears_everything_down() {
    let (manager, loader) = manager();
    let first_probe = CompletionProbe::new();
    let second_probe = CompletionProbe::new();

    let first = manager.create_task_with(url(1), first_probe.hook());
    let second = manager.create_task_with(url(2), second_probe.hook());
    first.resume();
    second.resume();
    manager.start_preheating(&[ImageRequest::new(url(3))]);

    manager.invalidate_and_cancel();

    // Executing tasks reach Cancelled and their callbacks still fire.
    wait_until(|| first_probe.count() > 0 && second_probe.count() > 0).await;
    assert_eq!(first.state(), TaskState::Cancelled);
    assert_eq!(second.state(), TaskState::Cancelled);
    assert!(first_probe
        .last()
        .and_then(|r| r.error().map(|e| e.is_cancellation()))
        .unwrap_or(false));

    let mut stopped = loader.stopped();
    stopped.sort_unstable();
    let mut expected = vec![first.id(), second.id()];
    expected.sort_unstable();
    assert_eq!(stopped, expected);

    assert!(loader.detached.load(Ordering::SeqCst));
    assert!(loader.invalidated.load(Ordering::SeqCst));

    // The queued preheat never starts, and new work is a no-op.
    let started_before = loader.started().len();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let late = manager.create_task(url(4));
    late.resume();
    manager.start_preheating(&[ImageRequest::new(url(5))]);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(loader.started().len(), started_before);
    assert_eq!(late.state(), TaskState::Suspended);
}

#[tokio::test(start_paused = true)]
async fn test_remove_all_cached_images_reaches_the_loader() {
    let (manager, loader) = manager();
    let request = ImageRequest::new(url(1));

    let task = manager.create_task(request.clone());
    task.resume();
    loader.complete_success(task.id(), 4, 4);
    wait_until(|| task.state() == TaskState::Completed).await;
    assert!(manager.cached_response(&request).is_some());

    manager.remove_all_cached_images();
    assert!(manager.cached_response(&request).is_none());
    assert!(loader.caches_cleared.load(Ordering::SeqCst));

    // A fresh equivalent task must load again.
    let again = manager.create_task(request);
    again.resume();
    assert_eq!(loader.started().len(), 2);
}
