//! FIFO queue of async waiters in front of an [`OperationLock`].
//!
//! Requests register at call time, so the order in which `lock_async` is
//! called is the order in which waiters are granted the lock. Only the waiter
//! at the front of the queue tries to acquire; it is woken when the lock is
//! released through the queue and otherwise re-checks on a bounded interval,
//! which covers releases made by other processes.

use std::collections::VecDeque;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

use super::{DEFAULT_POLL_INTERVAL, LockError, OperationLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Uninitialized,
    Running,
    Terminated,
}

struct Waiter {
    ticket: u64,
    wake: Arc<Notify>,
}

#[derive(Default)]
struct QueueState {
    phase: Phase,
    next_ticket: u64,
    waiters: VecDeque<Waiter>,
}

impl QueueState {
    fn wake_front(&self) {
        if let Some(front) = self.waiters.front() {
            front.wake.notify_one();
        }
    }
}

struct Shared<L> {
    lock: L,
    poll_interval: Duration,
    state: Mutex<QueueState>,
}

impl<L: OperationLock> Shared<L> {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, ticket: u64) {
        let mut state = self.state();
        let was_front = state.waiters.front().is_some_and(|w| w.ticket == ticket);
        state.waiters.retain(|w| w.ticket != ticket);
        if was_front {
            state.wake_front();
        }
    }

    /// Try to grant the lock to `ticket`; only the front waiter may acquire.
    fn poll_turn(&self, ticket: u64, operation: &str) -> Result<bool, LockError> {
        let mut state = self.state();
        if state.phase == Phase::Terminated {
            state.waiters.retain(|w| w.ticket != ticket);
            return Err(LockError::Terminated);
        }

        let at_front = state.waiters.front().is_some_and(|w| w.ticket == ticket);
        if !at_front {
            return Ok(false);
        }

        match self.lock.try_lock(operation) {
            Ok(true) => {
                state.waiters.pop_front();
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(err) => {
                state.waiters.pop_front();
                state.wake_front();
                Err(err)
            }
        }
    }

    fn release(&self) -> Result<(), LockError> {
        self.lock.release()?;
        self.state().wake_front();
        Ok(())
    }
}

/// Awaitable, FIFO-fair acquisition over any [`OperationLock`].
///
/// The queue is process-local: call [`initialize_async_locks`] once at
/// startup and [`terminate_async_locks`] at shutdown.
///
/// [`initialize_async_locks`]: AsyncLockQueue::initialize_async_locks
/// [`terminate_async_locks`]: AsyncLockQueue::terminate_async_locks
pub struct AsyncLockQueue<L: OperationLock + 'static> {
    shared: Arc<Shared<L>>,
}

impl<L: OperationLock + 'static> Clone for AsyncLockQueue<L> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<L: OperationLock + 'static> std::fmt::Debug for AsyncLockQueue<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state();
        f.debug_struct("AsyncLockQueue")
            .field("phase", &state.phase)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

impl<L: OperationLock + 'static> AsyncLockQueue<L> {
    pub fn new(lock: L) -> Self {
        Self::with_poll_interval(lock, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(lock: L, poll_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                lock,
                poll_interval,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// The wrapped lock.
    pub fn inner(&self) -> &L {
        &self.shared.lock
    }

    /// Enable async acquisition. Has no effect once terminated.
    pub fn initialize_async_locks(&self) {
        let mut state = self.shared.state();
        match state.phase {
            Phase::Uninitialized => state.phase = Phase::Running,
            Phase::Running => {}
            Phase::Terminated => {
                tracing::warn!("ignoring initialize_async_locks after termination");
            }
        }
    }

    /// Permanently disable async acquisition and fail every queued waiter.
    pub fn terminate_async_locks(&self) {
        let mut state = self.shared.state();
        state.phase = Phase::Terminated;
        for waiter in &state.waiters {
            waiter.wake.notify_one();
        }
        tracing::debug!(waiters = state.waiters.len(), "async locks terminated");
    }

    /// Number of callers currently waiting.
    pub fn queue_len(&self) -> usize {
        self.shared.state().waiters.len()
    }

    /// Request the lock. Registration happens now; await the request to wait
    /// for the grant. The caller must [`release`](OperationLock::release).
    pub fn lock_async(&self, operation: &str) -> LockRequest<L> {
        let mut state = self.shared.state();
        let ready = |result| LockRequest {
            shared: Arc::clone(&self.shared),
            operation: operation.to_string(),
            state: RequestState::Ready(result),
        };

        match state.phase {
            Phase::Uninitialized => return ready(Err(LockError::NotInitialized)),
            Phase::Terminated => return ready(Err(LockError::Terminated)),
            Phase::Running => {}
        }

        if state.waiters.is_empty() {
            match self.shared.lock.try_lock(operation) {
                Ok(true) => return ready(Ok(())),
                Ok(false) => {}
                Err(err) => return ready(Err(err)),
            }
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        let wake = Arc::new(Notify::new());
        state.waiters.push_back(Waiter {
            ticket,
            wake: Arc::clone(&wake),
        });
        tracing::debug!(operation, ticket, queued = state.waiters.len(), "waiting for lock");

        LockRequest {
            shared: Arc::clone(&self.shared),
            operation: operation.to_string(),
            state: RequestState::Queued { ticket, wake },
        }
    }

    /// Wait up to `timeout` for the lock; the registration is withdrawn on timeout.
    pub async fn lock_async_timeout(
        &self,
        operation: &str,
        timeout: Duration,
    ) -> Result<(), LockError> {
        match tokio::time::timeout(timeout, self.lock_async(operation).into_future()).await {
            Ok(result) => result,
            Err(_) => Err(LockError::Timeout { timeout }),
        }
    }

    /// Non-blocking acquisition returning a guard.
    pub fn try_acquire(&self, operation: &str) -> Result<Option<HeldLock<L>>, LockError> {
        if self.try_lock(operation)? {
            Ok(Some(HeldLock::new(Arc::clone(&self.shared))))
        } else {
            Ok(None)
        }
    }

    /// Wait up to `timeout` for the lock and return a guard that releases it.
    pub async fn acquire(
        &self,
        operation: &str,
        timeout: Duration,
    ) -> Result<HeldLock<L>, LockError> {
        self.lock_async_timeout(operation, timeout).await?;
        Ok(HeldLock::new(Arc::clone(&self.shared)))
    }

    /// Run `action` under the lock, or `Ok(None)` if not acquired within `timeout`.
    pub async fn try_lock_operation_async<T, F, Fut>(
        &self,
        operation: &str,
        timeout: Duration,
        action: F,
    ) -> Result<Option<T>, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let held = match self.acquire(operation, timeout).await {
            Ok(held) => held,
            Err(LockError::Timeout { .. }) => return Ok(None),
            Err(err) => return Err(err),
        };
        let value = action().await;
        held.release()?;
        Ok(Some(value))
    }

    /// Run `action` under the lock, failing with [`LockError::Contended`] on timeout.
    pub async fn lock_operation_async<T, F, Fut>(
        &self,
        operation: &str,
        timeout: Duration,
        action: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.try_lock_operation_async(operation, timeout, action)
            .await?
            .ok_or_else(|| LockError::Contended {
                operation: operation.to_string(),
            })
    }
}

impl<L: OperationLock + 'static> OperationLock for AsyncLockQueue<L> {
    fn is_held(&self) -> bool {
        self.shared.lock.is_held()
    }

    /// Never jumps ahead of queued waiters.
    fn try_lock(&self, operation: &str) -> Result<bool, LockError> {
        let state = self.shared.state();
        if !state.waiters.is_empty() {
            return Ok(false);
        }
        self.shared.lock.try_lock(operation)
    }

    fn release(&self) -> Result<(), LockError> {
        self.shared.release()
    }
}

enum RequestState {
    Ready(Result<(), LockError>),
    Queued { ticket: u64, wake: Arc<Notify> },
    Finished,
}

/// A pending [`AsyncLockQueue::lock_async`] call.
///
/// Dropping the request before it resolves withdraws it from the queue.
#[must_use = "a lock request must be awaited or dropped to leave the queue"]
pub struct LockRequest<L: OperationLock + 'static> {
    shared: Arc<Shared<L>>,
    operation: String,
    state: RequestState,
}

impl<L: OperationLock + 'static> LockRequest<L> {
    /// Whether the request had to wait behind the current holder.
    pub fn is_queued(&self) -> bool {
        matches!(self.state, RequestState::Queued { .. })
    }

    /// Fail now if registration was rejected (not initialized or terminated).
    pub fn registered(mut self) -> Result<Self, LockError> {
        if matches!(self.state, RequestState::Ready(Err(_))) {
            if let RequestState::Ready(Err(err)) =
                std::mem::replace(&mut self.state, RequestState::Finished)
            {
                return Err(err);
            }
        }
        Ok(self)
    }

    /// Wait for the grant and wrap it in a releasing guard.
    pub async fn held(self) -> Result<HeldLock<L>, LockError> {
        let shared = Arc::clone(&self.shared);
        self.await?;
        Ok(HeldLock::new(shared))
    }

    async fn wait(mut self) -> Result<(), LockError> {
        let (ticket, wake) = match std::mem::replace(&mut self.state, RequestState::Finished) {
            RequestState::Ready(result) => return result,
            RequestState::Finished => return Ok(()),
            RequestState::Queued { ticket, wake } => {
                self.state = RequestState::Queued {
                    ticket,
                    wake: Arc::clone(&wake),
                };
                (ticket, wake)
            }
        };

        loop {
            match self.shared.poll_turn(ticket, &self.operation) {
                Ok(true) => {
                    self.state = RequestState::Finished;
                    tracing::debug!(operation = %self.operation, ticket, "lock granted");
                    return Ok(());
                }
                Ok(false) => {}
                Err(err) => {
                    self.state = RequestState::Finished;
                    return Err(err);
                }
            }
            let _ = tokio::time::timeout(self.shared.poll_interval, wake.notified()).await;
        }
    }
}

impl<L: OperationLock + 'static> IntoFuture for LockRequest<L> {
    type Output = Result<(), LockError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Result<(), LockError>> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl<L: OperationLock + 'static> Drop for LockRequest<L> {
    fn drop(&mut self) {
        match self.state {
            RequestState::Queued { ticket, .. } => self.shared.remove(ticket),
            // Granted at registration but never collected.
            RequestState::Ready(Ok(())) => {
                if let Err(err) = self.shared.release() {
                    tracing::error!(operation = %self.operation, error = %err, "failed to release unclaimed lock");
                }
            }
            RequestState::Ready(Err(_)) | RequestState::Finished => {}
        }
    }
}

/// Ownership of a queue's lock; released on drop.
#[must_use = "dropping a HeldLock releases the lock immediately"]
pub struct HeldLock<L: OperationLock + 'static> {
    shared: Arc<Shared<L>>,
    released: bool,
}

impl<L: OperationLock + 'static> HeldLock<L> {
    fn new(shared: Arc<Shared<L>>) -> Self {
        Self {
            shared,
            released: false,
        }
    }

    /// Release now, surfacing any error.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        self.shared.release()
    }
}

impl<L: OperationLock + 'static> Drop for HeldLock<L> {
    fn drop(&mut self) {
        if !self.released
            && let Err(err) = self.shared.release()
        {
            tracing::error!(error = %err, "failed to release held lock");
        }
    }
}
