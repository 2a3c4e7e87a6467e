//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is handed to every runner when a job starts. Blocking
//! primitives register a wake-up hook with the token so that cancelling it
//! releases every waiter at once instead of relying on thread termination.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

trait Hook: Send + Sync {
    fn fire(&self);

    /// False once the hook can no longer do anything.
    fn is_live(&self) -> bool {
        true
    }
}

struct FnHook<F>(F);

impl<F: Fn() + Send + Sync> Hook for FnHook<F> {
    fn fire(&self) {
        (self.0)()
    }
}

/// Hook bound to an object it does not keep alive.
struct WeakHook<T, F> {
    target: Weak<T>,
    hook: F,
}

impl<T: Send + Sync, F: Fn(&T) + Send + Sync> Hook for WeakHook<T, F> {
    fn fire(&self) {
        if let Some(target) = self.target.upgrade() {
            (self.hook)(&target);
        }
    }

    fn is_live(&self) -> bool {
        self.target.strong_count() > 0
    }
}

struct Inner {
    cancelled: AtomicBool,
    hooks: Mutex<Vec<Box<dyn Hook>>>,
    lock: Mutex<()>,
    cond: Condvar,
}

/// Shared, clonable cancel signal. Cancelling is idempotent and irreversible.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Inner {
    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let _guard = self.lock.lock();
            self.cond.notify_all();
        }
        let hooks = std::mem::take(&mut *self.hooks.lock());
        for hook in hooks {
            hook.fire();
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                hooks: Mutex::new(Vec::new()),
                lock: Mutex::new(()),
                cond: Condvar::new(),
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Cancel the token, running every registered hook exactly once.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Register a hook to run on cancellation.
    ///
    /// If the token is already cancelled the hook runs immediately on the
    /// calling thread.
    pub fn on_cancel(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.register(Box::new(FnHook(hook)));
    }

    /// Register a hook on `target` without keeping it alive.
    ///
    /// The hook is skipped once `target` is dropped. Dead hooks are pruned on
    /// the next registration.
    pub fn on_cancel_weak<T: Send + Sync + 'static>(
        &self,
        target: &Arc<T>,
        hook: impl Fn(&T) + Send + Sync + 'static,
    ) {
        self.register(Box::new(WeakHook {
            target: Arc::downgrade(target),
            hook,
        }));
    }

    fn register(&self, hook: Box<dyn Hook>) {
        {
            let mut hooks = self.inner.hooks.lock();
            if !self.is_cancelled() {
                hooks.retain(|h| h.is_live());
                hooks.push(hook);
                return;
            }
        }
        hook.fire();
    }

    /// A token that is cancelled when this one is, but can also be cancelled
    /// on its own without affecting the parent.
    pub fn child_token(&self) -> CancellationToken {
        let child = CancellationToken::new();
        self.on_cancel_weak(&child.inner, |inner| inner.cancel());
        child
    }

    #[cfg(test)]
    fn hook_count(&self) -> usize {
        self.inner.hooks.lock().len()
    }

    /// Sleep for `timeout` unless cancelled first.
    ///
    /// Returns `true` if the token was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock();
        while !self.is_cancelled() {
            if self.inner.cond.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_cancelled()
    }
}
