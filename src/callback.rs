//! Deferred calls and the completion list that implements absorption.
//!
//! No lock is held while a callback runs, so callbacks may freely call back
//! into the pact or group that fired them.
use std::any::Any;
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A stored call. Arguments are whatever the closure captured.
pub(crate) type Callback = Box<dyn FnMut() + Send + 'static>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) type Panic = Box<dyn Any + Send + 'static>;

/// Runs `f`, handing back its panic payload instead of unwinding.
pub(crate) fn catch<R>(f: impl FnOnce() -> R) -> Result<R, Panic> {
    panic::catch_unwind(AssertUnwindSafe(f))
}

/// Runs every callback even if some panic. Returns the first panic.
fn run_all<'a>(callbacks: impl IntoIterator<Item = &'a mut Callback>) -> Option<Panic> {
    let mut first = None;
    for callback in callbacks {
        if let Err(payload) = catch(|| callback()) {
            if first.is_none() {
                first = Some(payload);
            }
        }
    }
    first
}

/// Runs every callback of a list that keeps firing (`during`, `on_timeout`)
/// in registration order. The list is taken out of `slot` while it runs and
/// put back in front of anything registered meanwhile, also when a callback
/// panics; the first panic is resumed afterwards.
pub(crate) fn run_retained<T>(
    state: &Mutex<T>,
    slot: impl Fn(&mut T) -> &mut Vec<Callback>,
) {
    let mut callbacks = std::mem::take(slot(&mut *lock(state)));
    if callbacks.is_empty() {
        return;
    }
    let panicked = run_all(callbacks.iter_mut());
    {
        let mut state = lock(state);
        let added = slot(&mut *state);
        callbacks.append(added);
        *added = callbacks;
    }
    if let Some(payload) = panicked {
        panic::resume_unwind(payload);
    }
}

/// The `then` callbacks of a pact or group: fired once, in order, when the
/// owner finishes.
///
/// Absorbing an owner into a group forwards this list to the group's own
/// sink. From then on the owner's completion fires nothing, and callbacks
/// registered on the owner land in the group's list.
#[derive(Clone, Default)]
pub struct ThenSink {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    callbacks: Vec<Callback>,
    fired: bool,
    forward: Option<ThenSink>,
}

impl ThenSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Stores `callback`, or runs it right away if the owner already fired.
    pub(crate) fn push(&self, mut callback: Callback) {
        let mut inner = lock(&self.inner);
        if let Some(forward) = inner.forward.clone() {
            drop(inner);
            return forward.push(callback);
        }
        if inner.fired {
            drop(inner);
            callback();
        } else {
            inner.callbacks.push(callback);
        }
    }

    /// Marks the owner finished and runs everything stored. Callbacks pushed
    /// while these run are invoked immediately by `push`. A panicking
    /// callback does not stop the rest; the first panic is resumed at the end.
    pub(crate) fn fire(&self) {
        let mut callbacks = {
            let mut inner = lock(&self.inner);
            if inner.forward.is_some() {
                return;
            }
            inner.fired = true;
            std::mem::take(&mut inner.callbacks)
        };
        if let Some(payload) = run_all(callbacks.iter_mut()) {
            panic::resume_unwind(payload);
        }
    }

    /// The owner is unfinished again; callbacks registered from now on wait
    /// for its next completion.
    pub(crate) fn rearm(&self) {
        lock(&self.inner).fired = false;
    }

    pub(crate) fn forward_to(&self, target: &ThenSink) {
        let callbacks = {
            let mut inner = lock(&self.inner);
            inner.forward = Some(target.clone());
            std::mem::take(&mut inner.callbacks)
        };
        for callback in callbacks {
            target.push(callback);
        }
    }
}

impl Debug for ThenSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("ThenSink")
            .field("callbacks", &inner.callbacks.len())
            .field("fired", &inner.fired)
            .field("forwarded", &inner.forward.is_some())
            .finish()
    }
}
