//! Futures for operations whose completion can only be discovered by asking.
//!
//! A [`Pact`] wraps a completion predicate. Nothing wakes it up: every state
//! change is observed by re-evaluating the predicate, either once through
//! [`Pollable::poll`] or in a loop through [`Pollable::wait`]. Pacts (and
//! other groups) compose into a [`PactGroup`] which polls its members lazily
//! or eagerly and reports the slow ones when a wait times out.
//!
//! # Examples
//!
//! ```
//! use pact::{Pact, PactGroup, Pollable};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let polls = Arc::new(AtomicUsize::new(0));
//! let counter = polls.clone();
//! let copy = Pact::new("copy");
//! copy.until(move || counter.fetch_add(1, Ordering::SeqCst) >= 2)
//!     .then(|| println!("copied"));
//!
//! let delete = Pact::new("delete");
//! delete.until(|| true);
//!
//! let group = copy + delete;
//! group.wait(Some(Duration::from_secs(5))).unwrap();
//! assert!(group.is_finished());
//! ```
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

mod callback;
mod group;
mod pact;
mod wait;

pub use callback::ThenSink;
pub use group::{PactGroup, Strategy};
pub use pact::Pact;

/// Interval slept between two polls of a waiting loop unless configured
/// otherwise with `set_poll_interval`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Error type produced by fallible predicates and custom timeout errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Builds the error a timed-out wait returns, see `set_timeout_error`.
pub(crate) type TimeoutError = Arc<dyn Fn(TimeoutExpired) -> BoxError + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The pact was polled before a predicate was bound with `until`.
    #[error("{pact} has no completion predicate, bind one with until() before polling")]
    Configuration { pact: String },
    #[error(transparent)]
    Timeout(#[from] TimeoutExpired),
    /// A wait expired on an object configured with `set_timeout_error`.
    #[error("{0}")]
    CustomTimeout(#[source] BoxError),
    #[error("completion predicate of {pact} failed")]
    Predicate {
        pact: String,
        #[source]
        source: BoxError,
    },
}

/// A wait ran out of time before everything it was waiting for finished.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Timeout of {secs} seconds expired waiting for {waiting_for}", secs = .timeout.as_secs_f64())]
pub struct TimeoutExpired {
    pub timeout: Duration,
    /// Rendering of the pact or group at expiry.
    pub waiting_for: String,
    /// The pacts still unfinished when the wait gave up.
    pub pending: Vec<String>,
}

/// The capability surface shared by [`Pact`] and [`PactGroup`], and what a
/// group needs from its members.
///
/// Implementors are handles: cloning one observes the same state. Each
/// object is meant to be driven by one caller at a time.
pub trait Pollable: Display + Send + Sync {
    /// Checks for completion once, without blocking. Returns whether the
    /// object is finished after this check.
    fn poll(&self) -> Result<bool, Error>;

    /// Cached completion state. Never evaluates a predicate and never fires
    /// callbacks.
    fn is_finished(&self) -> bool;

    /// Timeout a wait falls back to when none is given. `None` is unbounded.
    fn default_timeout(&self) -> Option<Duration>;

    /// Sleep between two polls of a wait.
    fn poll_interval(&self) -> Duration;

    /// Renderings of the pacts that have not finished yet.
    fn pending(&self) -> Vec<String>;

    /// Fires the timeout callbacks of everything still unfinished.
    fn notify_timeout(&self);

    /// Routes the completion callbacks, present and future, to `sink`
    /// instead of firing them on this object's own completion.
    #[doc(hidden)]
    fn absorb_into(&self, sink: &ThenSink);

    /// The error a wait on this object returns when it expires. Plain
    /// [`Error::Timeout`] unless a custom error was configured.
    fn timeout_error(&self, expired: TimeoutExpired) -> Error {
        expired.into()
    }

    /// Polls every [`poll_interval`](Pollable::poll_interval) until finished.
    ///
    /// `timeout` falls back to the [default
    /// timeout](Pollable::default_timeout); when both are `None` the wait is
    /// unbounded. On expiry the timeout callbacks fire before
    /// [`timeout_error`](Pollable::timeout_error) is returned. Waiting again later starts a fresh
    /// window.
    fn wait(&self, timeout: Option<Duration>) -> Result<(), Error> {
        wait::wait_until(self, timeout)
    }
}
