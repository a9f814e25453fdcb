use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;
type Computation<V, E> = Box<dyn Fn(CancellationToken) -> BoxFuture<Result<V, E>> + Send + Sync>;

/// Result of a memoized computation as observed by every caller.
pub type Outcome<V, E> = Result<Arc<V>, HandleError<E>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandleError<E> {
    /// The caller stopped waiting before a value was published.
    #[error("computation cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(E),
    #[error("computation panicked: {0}")]
    Panicked(Arc<str>),
}

impl<E> HandleError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, HandleError::Cancelled)
    }

    /// Maps the computation error, keeping cancellation and panics as they are.
    pub fn map_failed<F>(self, f: impl FnOnce(E) -> F) -> HandleError<F> {
        match self {
            HandleError::Cancelled => HandleError::Cancelled,
            HandleError::Failed(err) => HandleError::Failed(f(err)),
            HandleError::Panicked(message) => HandleError::Panicked(message),
        }
    }
}

/// A memoized, at-most-once-running computation.
///
/// State machine: `Idle -> Running -> Done`. The first `get` starts the computation on the
/// tokio runtime; later callers join the same run. The published outcome (success or
/// failure) is kept for the lifetime of the handle.
///
/// Every caller of `get` is a waiter of the current run. When the last waiter goes away
/// (cancelled or dropped) before the run publishes, the run is cancelled, its eventual
/// result is discarded and the handle goes back to `Idle`. While at least one waiter
/// remains the run continues and its outcome is cached.
pub struct Handle<K, V, E> {
    key: K,
    compute: Computation<V, E>,
    state: Mutex<State<V, E>>,
    next_run: AtomicU64,
}

enum State<V, E> {
    Idle,
    Running(Run<V, E>),
    Done(Outcome<V, E>),
}

struct Run<V, E> {
    id: u64,
    waiters: usize,
    token: CancellationToken,
    rx: watch::Receiver<Option<Outcome<V, E>>>,
}

impl<K, V, E> Handle<K, V, E>
where
    K: fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(key: K, compute: F) -> Arc<Self>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        Arc::new(Self {
            key,
            compute: Box::new(move |token| Box::pin(compute(token))),
            state: Mutex::new(State::Idle),
            next_run: AtomicU64::new(0),
        })
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// Returns the memoized outcome, computing it or joining the in-flight run as needed.
    ///
    /// Cancelling `cancel` stops this caller from waiting. It only cancels the computation
    /// itself when no other caller is waiting on it.
    pub async fn get(self: &Arc<Self>, cancel: &CancellationToken) -> Outcome<V, E> {
        let (run_id, mut rx) = {
            let mut state = self.state.lock();
            let joined = match &mut *state {
                State::Done(outcome) => return outcome.clone(),
                State::Running(run) => {
                    run.waiters += 1;
                    Some((run.id, run.rx.clone()))
                }
                State::Idle => None,
            };
            match joined {
                Some(joined) => joined,
                None if cancel.is_cancelled() => return Err(HandleError::Cancelled),
                None => self.start(&mut state),
            }
        };

        let _waiter = Waiter {
            handle: self,
            run_id,
        };
        loop {
            let published = rx.borrow_and_update().clone();
            if let Some(outcome) = published {
                return outcome;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(HandleError::Cancelled),
                changed = rx.changed() => {
                    if changed.is_err() {
                        // The run was torn down without publishing.
                        return Err(HandleError::Cancelled);
                    }
                }
            }
        }
    }

    /// Returns the published outcome without starting a computation.
    pub fn cached(&self) -> Option<Outcome<V, E>> {
        match &*self.state.lock() {
            State::Done(outcome) => Some(outcome.clone()),
            State::Idle | State::Running(_) => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(&*self.state.lock(), State::Running(_))
    }

    /// Number of callers currently waiting on the in-flight run.
    pub fn waiters(&self) -> usize {
        match &*self.state.lock() {
            State::Running(run) => run.waiters,
            State::Idle | State::Done(_) => 0,
        }
    }

    /// Forgets a cached failure so the next `get` runs the computation again.
    ///
    /// Returns `false` (and does nothing) unless the handle holds a failure.
    pub fn force_retry(&self) -> bool {
        let mut state = self.state.lock();
        if matches!(&*state, State::Done(Err(_))) {
            tracing::debug!(
                target: "strata.memoize",
                key = ?self.key,
                "retrying failed computation"
            );
            *state = State::Idle;
            return true;
        }
        false
    }

    fn start(
        self: &Arc<Self>,
        state: &mut State<V, E>,
    ) -> (u64, watch::Receiver<Option<Outcome<V, E>>>) {
        let id = self.next_run.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let (tx, rx) = watch::channel(None);
        *state = State::Running(Run {
            id,
            waiters: 1,
            token: token.clone(),
            rx: rx.clone(),
        });

        tracing::debug!(
            target: "strata.memoize",
            key = ?self.key,
            run = id,
            "starting computation"
        );
        let fut = (self.compute)(token.child_token());
        tokio::spawn(drive(Arc::downgrade(self), id, token, tx, fut));
        (id, rx)
    }

    fn publish(
        &self,
        run_id: u64,
        outcome: Outcome<V, E>,
        tx: watch::Sender<Option<Outcome<V, E>>>,
    ) {
        {
            let mut state = self.state.lock();
            if !matches!(&*state, State::Running(run) if run.id == run_id) {
                tracing::debug!(
                    target: "strata.memoize",
                    key = ?self.key,
                    run = run_id,
                    "discarding result of abandoned computation"
                );
                return;
            }
            *state = State::Done(outcome.clone());
        }
        tracing::debug!(
            target: "strata.memoize",
            key = ?self.key,
            run = run_id,
            ok = outcome.is_ok(),
            "computation finished"
        );
        tx.send_replace(Some(outcome));
    }

    fn release(&self, run_id: u64) {
        let mut state = self.state.lock();
        let State::Running(run) = &mut *state else {
            return;
        };
        if run.id != run_id {
            return;
        }
        run.waiters -= 1;
        if run.waiters == 0 {
            tracing::debug!(
                target: "strata.memoize",
                key = ?self.key,
                run = run_id,
                "all waiters left; cancelling computation"
            );
            run.token.cancel();
            *state = State::Idle;
        }
    }
}

async fn drive<K, V, E>(
    handle: Weak<Handle<K, V, E>>,
    run_id: u64,
    token: CancellationToken,
    tx: watch::Sender<Option<Outcome<V, E>>>,
    fut: BoxFuture<Result<V, E>>,
) where
    K: fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let mut task = tokio::spawn(fut);
    let joined = tokio::select! {
        biased;
        _ = token.cancelled() => {
            task.abort();
            return;
        }
        joined = &mut task => joined,
    };

    let outcome = match joined {
        Ok(Ok(value)) => Ok(Arc::new(value)),
        Ok(Err(err)) => Err(HandleError::Failed(err)),
        Err(err) if err.is_cancelled() => return,
        Err(err) => Err(HandleError::Panicked(panic_message(err.into_panic()))),
    };

    let Some(handle) = handle.upgrade() else {
        return;
    };
    handle.publish(run_id, outcome, tx);
}

/// Decrements the waiter count of a run when a caller stops waiting, for any reason.
struct Waiter<'a, K, V, E>
where
    K: fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    handle: &'a Handle<K, V, E>,
    run_id: u64,
}

impl<K, V, E> Drop for Waiter<'_, K, V, E>
where
    K: fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.handle.release(self.run_id);
    }
}

impl<K, V, E> Drop for Handle<K, V, E> {
    fn drop(&mut self) {
        if let State::Running(run) = &*self.state.get_mut() {
            run.token.cancel();
        }
    }
}

impl<K: fmt::Debug, V, E> fmt::Debug for Handle<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.lock() {
            State::Idle => "idle",
            State::Running(_) => "running",
            State::Done(Ok(_)) => "done",
            State::Done(Err(_)) => "failed",
        };
        f.debug_struct("Handle")
            .field("key", &self.key)
            .field("state", &state)
            .finish()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> Arc<str> {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        return Arc::from(*message);
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return Arc::from(message.as_str());
    }
    Arc::from("non-string panic payload")
}
