use std::fmt::{self, Debug, Display};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::callback::{catch, lock, run_retained, Callback, ThenSink};
use crate::{BoxError, Error, Pollable, TimeoutError, TimeoutExpired, DEFAULT_POLL_INTERVAL};

type Predicate = Box<dyn FnMut() -> Result<bool, BoxError> + Send + 'static>;

/// A single polled future.
///
/// The pact starts pending and finishes the first time its predicate returns
/// `true`; it never goes back. `Pact` is a handle, clones share one state, so
/// a pact can be handed to a [`PactGroup`](crate::PactGroup) and still be
/// waited on directly.
///
/// # Examples
///
/// ```
/// use pact::{Pact, Pollable};
/// use std::sync::mpsc::channel;
/// use std::thread;
/// use std::time::Duration;
///
/// let (tx, rx) = channel::<u32>();
/// let job = Pact::new("job");
/// job.until(move || rx.try_recv().is_ok())
///     .then(|| println!("job done"));
///
/// thread::spawn(move || {
///     thread::sleep(Duration::from_millis(20));
///     tx.send(7).unwrap();
/// });
/// job.wait(Some(Duration::from_secs(5))).unwrap();
/// ```
#[derive(Clone)]
pub struct Pact {
    name: Arc<str>,
    inner: Arc<Mutex<Inner>>,
    then: ThenSink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    Finished,
}

struct Inner {
    state: State,
    predicate: Option<Predicate>,
    /// The predicate is out of `predicate` because a poll is running it.
    evaluating: bool,
    during: Vec<Callback>,
    on_timeout: Vec<Callback>,
    default_timeout: Option<Duration>,
    poll_interval: Duration,
    timeout_error: Option<TimeoutError>,
}

impl Pact {
    pub fn new(name: impl Into<String>) -> Self {
        let pact = Self {
            name: Arc::from(name.into()),
            inner: Arc::new(Mutex::new(Inner {
                state: State::Pending,
                predicate: None,
                evaluating: false,
                during: vec![],
                on_timeout: vec![],
                default_timeout: None,
                poll_interval: DEFAULT_POLL_INTERVAL,
                timeout_error: None,
            })),
            then: ThenSink::new(),
        };
        debug!(pact = %pact, "created");
        pact
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Binds the completion predicate, replacing any earlier one. Whatever
    /// the predicate needs is captured by the closure.
    pub fn until<F>(&self, mut predicate: F) -> &Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.bind(Box::new(move || Ok(predicate())))
    }

    /// Like [`until`](Pact::until), for predicates that can fail. An error
    /// leaves the pact pending and is returned from `poll`/`wait` as
    /// [`Error::Predicate`].
    pub fn try_until<F, E>(&self, mut predicate: F) -> &Self
    where
        F: FnMut() -> Result<bool, E> + Send + 'static,
        E: Into<BoxError>,
    {
        self.bind(Box::new(move || predicate().map_err(Into::into)))
    }

    fn bind(&self, predicate: Predicate) -> &Self {
        lock(&self.inner).predicate = Some(predicate);
        self
    }

    /// Calls `callback` once when the pact finishes, or right now if it
    /// already has.
    pub fn then<F>(&self, callback: F) -> &Self
    where
        F: FnMut() + Send + 'static,
    {
        self.then.push(Box::new(callback));
        self
    }

    /// Calls `callback` on every poll that finds the pact still pending.
    pub fn during<F>(&self, callback: F) -> &Self
    where
        F: FnMut() + Send + 'static,
    {
        lock(&self.inner).during.push(Box::new(callback));
        self
    }

    /// Calls `callback` every time a wait on this pact, or on a group it is
    /// pending in, runs out of time.
    pub fn on_timeout<F>(&self, callback: F) -> &Self
    where
        F: FnMut() + Send + 'static,
    {
        lock(&self.inner).on_timeout.push(Box::new(callback));
        self
    }

    /// Timeout used by `wait(None)`. `None` waits forever.
    pub fn set_default_timeout(&self, timeout: impl Into<Option<Duration>>) {
        lock(&self.inner).default_timeout = timeout.into();
    }

    pub fn set_poll_interval(&self, interval: Duration) {
        lock(&self.inner).poll_interval = interval;
    }

    /// Replaces the [`Error::Timeout`] a wait on this pact returns with the
    /// error built by `map`, which receives the expiry details.
    pub fn set_timeout_error<F, E>(&self, map: F)
    where
        F: Fn(TimeoutExpired) -> E + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let map: TimeoutError = Arc::new(move |expired| map(expired).into());
        lock(&self.inner).timeout_error = Some(map);
    }

    /// Runs the predicate once. `None` means another poll is running it
    /// right now, so there is nothing new to observe.
    fn evaluate(&self) -> Result<Option<bool>, Error> {
        let mut predicate = {
            let mut inner = lock(&self.inner);
            match inner.predicate.take() {
                Some(predicate) => {
                    inner.evaluating = true;
                    predicate
                }
                None if inner.evaluating => return Ok(None),
                None => {
                    return Err(Error::Configuration {
                        pact: self.to_string(),
                    })
                }
            }
        };
        let outcome = catch(|| predicate());
        {
            let mut inner = lock(&self.inner);
            inner.evaluating = false;
            // until() may have rebound the predicate while it ran
            if inner.predicate.is_none() {
                inner.predicate = Some(predicate);
            }
        }
        match outcome {
            Ok(result) => result.map(Some).map_err(|source| Error::Predicate {
                pact: self.to_string(),
                source,
            }),
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }
}

impl Pollable for Pact {
    fn poll(&self) -> Result<bool, Error> {
        if self.is_finished() {
            return Ok(true);
        }
        match self.evaluate()? {
            Some(true) => {
                lock(&self.inner).state = State::Finished;
                debug!(pact = %self, "finished");
                self.then.fire();
                Ok(true)
            }
            Some(false) => {
                run_retained(&self.inner, |inner| &mut inner.during);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn is_finished(&self) -> bool {
        lock(&self.inner).state == State::Finished
    }

    fn default_timeout(&self) -> Option<Duration> {
        lock(&self.inner).default_timeout
    }

    fn poll_interval(&self) -> Duration {
        lock(&self.inner).poll_interval
    }

    fn pending(&self) -> Vec<String> {
        if self.is_finished() {
            vec![]
        } else {
            vec![self.to_string()]
        }
    }

    fn notify_timeout(&self) {
        run_retained(&self.inner, |inner| &mut inner.on_timeout);
    }

    fn absorb_into(&self, sink: &ThenSink) {
        self.then.forward_to(sink);
    }

    fn timeout_error(&self, expired: TimeoutExpired) -> Error {
        let map = lock(&self.inner).timeout_error.clone();
        match map {
            Some(map) => Error::CustomTimeout(map(expired)),
            None => expired.into(),
        }
    }
}

impl Display for Pact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Pact: {}>", self.name)
    }
}

impl Debug for Pact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("Pact")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("has_predicate", &inner.predicate.is_some())
            .field("during", &inner.during.len())
            .field("on_timeout", &inner.on_timeout.len())
            .field("then", &self.then)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Pact;
    use crate::{Error, Pollable};
    use futures::channel::oneshot;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_pact_resolved_from_another_thread() {
        let (tx, mut rx) = oneshot::channel::<String>();
        let received = Arc::new(std::sync::Mutex::new(None));
        let slot = received.clone();
        let pact = Pact::new("download");
        pact.set_poll_interval(Duration::from_millis(5));
        pact.try_until(move || {
            rx.try_recv().map(|value| match value {
                Some(value) => {
                    *slot.lock().unwrap() = Some(value);
                    true
                }
                None => false,
            })
        });

        let task = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            tx.send(String::from("🍓")).unwrap();
        });
        pact.wait(Some(Duration::from_secs(5))).unwrap();
        task.join().expect("The sender thread has panicked");
        assert_eq!(received.lock().unwrap().as_deref(), Some("🍓"));
    }

    #[test]
    fn test_pact_predicate_error_propagates() {
        let (tx, mut rx) = oneshot::channel::<u8>();
        drop(tx);
        let pact = Pact::new("orphan");
        pact.try_until(move || rx.try_recv().map(|value| value.is_some()));

        let err = pact.poll().unwrap_err();
        assert!(matches!(err, Error::Predicate { ref pact, .. } if pact == "<Pact: orphan>"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(!pact.is_finished());
    }

    #[test]
    fn test_pact_without_predicate_is_misconfigured() {
        let pact = Pact::new("unbound");
        assert!(matches!(pact.poll(), Err(Error::Configuration { .. })));
        assert!(matches!(
            pact.wait(Some(Duration::from_millis(10))),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_until_twice_last_write_wins() {
        let pact = Pact::new("rebound");
        pact.until(|| false);
        pact.until(|| true);
        assert!(pact.poll().unwrap());
    }

    #[test]
    fn test_predicate_can_rebind_itself() {
        let pact = Pact::new("self-rebinding");
        let handle = pact.clone();
        pact.until(move || {
            handle.until(|| true);
            false
        });
        assert!(!pact.poll().unwrap());
        assert!(pact.poll().unwrap());
    }

    #[test]
    fn test_callbacks_may_reenter_the_pact() {
        let seen = Arc::new(AtomicUsize::new(0));
        let pact = Pact::new("reentrant");
        let (handle, counter) = (pact.clone(), seen.clone());
        pact.until(|| true).then(move || {
            if handle.is_finished() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        pact.poll().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_display_and_debug() {
        let pact = Pact::new("copy");
        assert_eq!(pact.to_string(), "<Pact: copy>");
        assert_eq!(pact.name(), "copy");
        assert!(format!("{pact:?}").contains("Pending"));
    }
}
