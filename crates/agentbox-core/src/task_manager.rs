//! Generation Task Registry
//!
//! One entry per conversation thread, holding the task's abort handle and a
//! cooperative stop token.
//!
//! ## Usage
//!
//! ```ignore
//! let tasks = TaskManager::new();
//!
//! // Request handler: runs the generation, registered for its whole life
//! let outcome = tasks
//!     .run_generation("thread-1", |stop| async move {
//!         while let Some(chunk) = stream.next().await {
//!             if stop.is_cancelled() {
//!                 break;
//!             }
//!             send(chunk).await;
//!         }
//!     })
//!     .await;
//!
//! // Stop handler, from another request
//! tasks.stop("thread-1", Duration::from_secs(2)).await;
//! ```
//!
//! Registering a thread that already has an entry replaces it: the old
//! task is stopped and aborted so it is never left running unreachable.
//! [`TaskManager::register_exclusive`] rejects instead.

use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Poll interval while waiting for a stopped task to wind down
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct TaskEntry {
    registration: u64,
    abort: AbortHandle,
    stop: CancellationToken,
}

impl TaskEntry {
    fn kill(&self) {
        self.stop.cancel();
        self.abort.abort();
    }
}

/// Receipt for a registration
#[derive(Debug, Clone)]
pub struct Registration {
    /// Identifies this registration among all registrations of the thread
    pub id: u64,
    /// Cooperative stop flag for the registered task
    pub token: CancellationToken,
    /// Whether a previous entry for the thread was displaced
    pub replaced: bool,
}

/// How a generation run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome<T> {
    /// Ran to completion without a stop request
    Completed(T),
    /// Returned after a cooperative stop request; holds whatever partial
    /// result the task chose to return
    Stopped(T),
    /// Aborted at a suspension point; no result
    Cancelled,
    /// Panicked or never started
    Failed(String),
}

impl<T> GenerationOutcome<T> {
    /// Whether the generation was interrupted by a stop or cancel
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Stopped(_) | Self::Cancelled)
    }
}

/// Result of [`TaskManager::stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// Nothing was registered for the thread
    NotRunning,
    /// The task honoured the stop request within the grace period
    Stopped,
    /// The task had to be aborted
    Cancelled,
}

/// Process-wide registry of in-flight generation tasks
///
/// Construct once at startup and share the `Arc`. Every map access happens
/// under a single mutex that is never held across an await.
pub struct TaskManager {
    tasks: Mutex<HashMap<String, TaskEntry>>,
    next_registration: AtomicU64,
}

impl TaskManager {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(HashMap::new()),
            next_registration: AtomicU64::new(1),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TaskEntry>> {
        // The map stays consistent even if a holder panicked
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_entry(&self, abort: AbortHandle) -> TaskEntry {
        TaskEntry {
            registration: self.next_registration.fetch_add(1, Ordering::Relaxed),
            abort,
            stop: CancellationToken::new(),
        }
    }

    /// Associate `abort` with `thread_id`
    ///
    /// An existing entry is replaced atomically; its task is stopped and
    /// aborted.
    pub fn register(&self, thread_id: impl Into<String>, abort: AbortHandle) -> Registration {
        let thread_id = thread_id.into();
        let entry = self.new_entry(abort);
        let registration = Registration {
            id: entry.registration,
            token: entry.stop.clone(),
            replaced: false,
        };

        let displaced = self.lock().insert(thread_id.clone(), entry);
        match displaced {
            Some(old) => {
                old.kill();
                warn!(
                    thread_id = %thread_id,
                    displaced = old.registration,
                    registration = registration.id,
                    "Replaced a still-registered task"
                );
                Registration {
                    replaced: true,
                    ..registration
                }
            }
            None => {
                debug!(thread_id = %thread_id, registration = registration.id, "Task registered");
                registration
            }
        }
    }

    /// Like [`Self::register`] but refuses to displace a live entry
    pub fn register_exclusive(
        &self,
        thread_id: impl Into<String>,
        abort: AbortHandle,
    ) -> Result<Registration> {
        let thread_id = thread_id.into();
        let mut tasks = self.lock();
        if tasks.contains_key(&thread_id) {
            return Err(Error::AlreadyRegistered(thread_id));
        }

        let entry = self.new_entry(abort);
        let registration = Registration {
            id: entry.registration,
            token: entry.stop.clone(),
            replaced: false,
        };
        tasks.insert(thread_id.clone(), entry);
        debug!(thread_id = %thread_id, registration = registration.id, "Task registered");
        Ok(registration)
    }

    /// Remove the entry for `thread_id`, whoever registered it
    ///
    /// Returns whether an entry existed.
    pub fn unregister(&self, thread_id: &str) -> bool {
        let removed = self.lock().remove(thread_id).is_some();
        if removed {
            debug!(thread_id = %thread_id, "Task unregistered");
        }
        removed
    }

    /// Remove the entry only if it still belongs to `registration`
    pub fn unregister_registration(&self, thread_id: &str, registration: u64) -> bool {
        let mut tasks = self.lock();
        let owned = tasks
            .get(thread_id)
            .is_some_and(|entry| entry.registration == registration);
        if owned {
            tasks.remove(thread_id);
            debug!(thread_id = %thread_id, registration, "Task unregistered");
        }
        owned
    }

    /// Set the cooperative stop flag; returns whether an entry existed
    pub fn request_stop(&self, thread_id: &str) -> bool {
        match self.lock().get(thread_id) {
            Some(entry) => {
                entry.stop.cancel();
                info!(thread_id = %thread_id, "Stop requested");
                true
            }
            None => false,
        }
    }

    /// Whether a stop was requested; `false` when nothing is registered
    #[must_use]
    pub fn is_stopped(&self, thread_id: &str) -> bool {
        self.lock()
            .get(thread_id)
            .is_some_and(|entry| entry.stop.is_cancelled())
    }

    /// Abort the task at its current suspension point
    ///
    /// The entry stays until the task's owner unregisters it. Returns
    /// whether a task existed and cancellation was attempted.
    pub fn cancel(&self, thread_id: &str) -> bool {
        match self.lock().get(thread_id) {
            Some(entry) => {
                entry.kill();
                info!(thread_id = %thread_id, "Task cancelled");
                true
            }
            None => false,
        }
    }

    /// Stop token of the current entry
    pub fn stop_token(&self, thread_id: &str) -> Result<CancellationToken> {
        self.lock()
            .get(thread_id)
            .map(|entry| entry.stop.clone())
            .ok_or_else(|| Error::NotFound(thread_id.to_string()))
    }

    /// Whether `thread_id` has an entry
    #[must_use]
    pub fn contains(&self, thread_id: &str) -> bool {
        self.lock().contains_key(thread_id)
    }

    /// Number of registered tasks
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    fn registration_of(&self, thread_id: &str) -> Option<u64> {
        self.lock().get(thread_id).map(|entry| entry.registration)
    }

    /// Ask the task to stop, then abort it if it is still registered after
    /// `grace`
    ///
    /// A zero grace escalates immediately, which also covers tasks blocked
    /// in a single call that never reaches a checkpoint.
    pub async fn stop(&self, thread_id: &str, grace: Duration) -> StopOutcome {
        let Some(registration) = self.registration_of(thread_id) else {
            return StopOutcome::NotRunning;
        };
        if !self.request_stop(thread_id) {
            return StopOutcome::NotRunning;
        }

        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if self.registration_of(thread_id) != Some(registration) {
                return StopOutcome::Stopped;
            }
            tokio::time::sleep(STOP_POLL_INTERVAL.min(grace)).await;
        }
        if self.registration_of(thread_id) != Some(registration) {
            return StopOutcome::Stopped;
        }

        if self.cancel(thread_id) {
            StopOutcome::Cancelled
        } else {
            StopOutcome::Stopped
        }
    }

    /// Run a generation as a registered task
    ///
    /// `make` receives the stop token and builds the future. Registration
    /// completes before the future is first polled, and the entry is
    /// removed on every exit path, including when this call itself is
    /// dropped (which also aborts the task).
    pub async fn run_generation<F, Fut, T>(
        self: &Arc<Self>,
        thread_id: impl Into<String>,
        make: F,
    ) -> GenerationOutcome<T>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let thread_id = thread_id.into();
        let (ready_tx, ready_rx) = oneshot::channel::<CancellationToken>();

        let handle = tokio::spawn(async move {
            let token = ready_rx.await.ok()?;
            Some(make(token).await)
        });

        let registration = self.register(thread_id.clone(), handle.abort_handle());
        let token = registration.token.clone();
        let _guard = TaskGuard::new(Arc::clone(self), thread_id.clone(), &registration)
            .with_abort(handle.abort_handle());
        // Fails only if the task was already aborted by a racing register
        let _ = ready_tx.send(registration.token);

        let outcome = match handle.await {
            Ok(Some(value)) if token.is_cancelled() => GenerationOutcome::Stopped(value),
            Ok(Some(value)) => GenerationOutcome::Completed(value),
            Ok(None) => GenerationOutcome::Cancelled,
            Err(e) if e.is_cancelled() => GenerationOutcome::Cancelled,
            Err(e) => GenerationOutcome::Failed(e.to_string()),
        };

        match &outcome {
            GenerationOutcome::Completed(_) => debug!(thread_id = %thread_id, "Generation completed"),
            GenerationOutcome::Stopped(_) => info!(thread_id = %thread_id, "Generation stopped"),
            GenerationOutcome::Cancelled => info!(thread_id = %thread_id, "Generation cancelled"),
            GenerationOutcome::Failed(error) => {
                warn!(thread_id = %thread_id, error = %error, "Generation failed")
            }
        }
        outcome
    }
}

/// Guard for a registration
///
/// Automatically unregisters when dropped, but only if the entry still
/// belongs to this registration, so a task that was displaced cannot remove
/// its successor.
pub struct TaskGuard {
    manager: Arc<TaskManager>,
    thread_id: String,
    registration: u64,
    abort: Option<AbortHandle>,
}

impl TaskGuard {
    /// Guard `registration` of `thread_id`
    #[must_use]
    pub fn new(
        manager: Arc<TaskManager>,
        thread_id: impl Into<String>,
        registration: &Registration,
    ) -> Self {
        Self {
            manager,
            thread_id: thread_id.into(),
            registration: registration.id,
            abort: None,
        }
    }

    /// Also abort this task when the guard drops
    #[must_use]
    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = Some(abort);
        self
    }

    /// Thread this guard belongs to
    #[must_use]
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if let Some(abort) = &self.abort {
            abort.abort();
        }
        self.manager
            .unregister_registration(&self.thread_id, self.registration);
    }
}

#[cfg(test)]
mod tests;
