//! Groups of pacts polled and waited on as one.
use std::fmt::{self, Debug, Display};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::trace;

use crate::callback::{lock, run_retained, Callback, ThenSink};
use crate::{BoxError, Error, Pact, Pollable, TimeoutError, TimeoutExpired, DEFAULT_POLL_INTERVAL};

/// How [`PactGroup::poll`] advances its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Poll only the earliest unfinished member. Later members see no poll,
    /// and fire no `during` callbacks, until everything before them is done.
    #[default]
    Lazy,
    /// Poll every unfinished member on every call.
    Eager,
}

/// An ordered collection of pacts and nested groups.
///
/// The group is finished exactly when all of its members are. Nested groups
/// are opaque members: they are polled through their own `poll` and keep
/// their own strategy.
///
/// Members added with `absorb` hand their `then` callbacks, current and
/// future, over to the group: those fire when the whole group finishes and
/// never from the member's own `poll` or `wait`.
///
/// # Examples
///
/// ```
/// use pact::{Pact, PactGroup, Pollable, Strategy};
///
/// let first = Pact::new("first");
/// first.until(|| true);
/// let second = Pact::new("second");
/// second.until(|| true).then(|| println!("batch done"));
///
/// let group = PactGroup::with_strategy(Strategy::Eager);
/// group.add(first, false);
/// group.add(second, true);
/// assert!(group.poll().unwrap());
/// ```
#[derive(Clone)]
pub struct PactGroup {
    inner: Arc<Mutex<Inner>>,
    then: ThenSink,
}

#[derive(Clone)]
struct Member {
    pact: Arc<dyn Pollable>,
    absorb: bool,
}

struct Inner {
    strategy: Strategy,
    members: Vec<Member>,
    during: Vec<Callback>,
    on_timeout: Vec<Callback>,
    default_timeout: Option<Duration>,
    poll_interval: Duration,
    timeout_error: Option<TimeoutError>,
}

impl PactGroup {
    /// An empty lazy group.
    pub fn new() -> Self {
        Self::with_strategy(Strategy::Lazy)
    }

    pub fn with_strategy(strategy: Strategy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                strategy,
                members: vec![],
                during: vec![],
                on_timeout: vec![],
                default_timeout: None,
                poll_interval: DEFAULT_POLL_INTERVAL,
                timeout_error: None,
            })),
            then: ThenSink::new(),
        }
    }

    pub fn strategy(&self) -> Strategy {
        lock(&self.inner).strategy
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).members.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).members.is_empty()
    }

    /// Appends `pact`. With `absorb`, its `then` callbacks move to this
    /// group's completion.
    pub fn add<P>(&self, pact: P, absorb: bool) -> &Self
    where
        P: Pollable + 'static,
    {
        self.push(Member {
            pact: Arc::new(pact),
            absorb,
        });
        self
    }

    fn push(&self, member: Member) {
        // re-arm first, so absorbed callbacks are held rather than run
        if !member.pact.is_finished() {
            self.then.rearm();
        }
        if member.absorb {
            member.pact.absorb_into(&self.then);
        }
        lock(&self.inner).members.push(member);
    }

    /// Appends the members of `other` in order, keeping their absorb flags.
    /// Callbacks registered on `other` move to this group: its `then`
    /// callbacks, absorbed ones included, fire on this group's completion.
    pub fn extend(&self, other: &PactGroup) {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return;
        }
        let (members, mut during, mut on_timeout) = {
            let mut other = lock(&other.inner);
            (
                other.members.clone(),
                std::mem::take(&mut other.during),
                std::mem::take(&mut other.on_timeout),
            )
        };
        if members.iter().any(|member| !member.pact.is_finished()) {
            self.then.rearm();
        }
        other.then.forward_to(&self.then);
        let mut inner = lock(&self.inner);
        inner.members.extend(members);
        inner.during.append(&mut during);
        inner.on_timeout.append(&mut on_timeout);
    }

    /// Calls `callback` once when every member has finished.
    pub fn then<F>(&self, callback: F) -> &Self
    where
        F: FnMut() + Send + 'static,
    {
        self.then.push(Box::new(callback));
        if self.is_finished() {
            self.then.fire();
        }
        self
    }

    /// Calls `callback` on every group poll that leaves a member unfinished.
    pub fn during<F>(&self, callback: F) -> &Self
    where
        F: FnMut() + Send + 'static,
    {
        lock(&self.inner).during.push(Box::new(callback));
        self
    }

    /// Calls `callback` when a wait on this group times out, after the
    /// timeout callbacks of the unfinished members.
    pub fn on_timeout<F>(&self, callback: F) -> &Self
    where
        F: FnMut() + Send + 'static,
    {
        lock(&self.inner).on_timeout.push(Box::new(callback));
        self
    }

    pub fn set_default_timeout(&self, timeout: impl Into<Option<Duration>>) {
        lock(&self.inner).default_timeout = timeout.into();
    }

    pub fn set_poll_interval(&self, interval: Duration) {
        lock(&self.inner).poll_interval = interval;
    }

    /// Replaces the [`Error::Timeout`] a wait on this group returns with the
    /// error built by `map`.
    pub fn set_timeout_error<F, E>(&self, map: F)
    where
        F: Fn(TimeoutExpired) -> E + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let map: TimeoutError = Arc::new(move |expired| map(expired).into());
        lock(&self.inner).timeout_error = Some(map);
    }

    fn members(&self) -> Vec<Member> {
        lock(&self.inner).members.clone()
    }
}

impl Default for PactGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl Pollable for PactGroup {
    fn poll(&self) -> Result<bool, Error> {
        let strategy = self.strategy();
        for (index, member) in self.members().iter().enumerate() {
            if member.pact.is_finished() {
                // no-op for a pact, lets a nested group fire its callbacks
                member.pact.poll()?;
                continue;
            }
            trace!(member = %member.pact, index, ?strategy, "advancing");
            member.pact.poll()?;
            if strategy == Strategy::Lazy {
                break;
            }
        }

        if self.is_finished() {
            self.then.fire();
            Ok(true)
        } else {
            run_retained(&self.inner, |inner| &mut inner.during);
            Ok(false)
        }
    }

    fn is_finished(&self) -> bool {
        self.members().iter().all(|member| member.pact.is_finished())
    }

    fn default_timeout(&self) -> Option<Duration> {
        lock(&self.inner).default_timeout
    }

    fn poll_interval(&self) -> Duration {
        lock(&self.inner).poll_interval
    }

    fn pending(&self) -> Vec<String> {
        self.members()
            .iter()
            .flat_map(|member| member.pact.pending())
            .collect()
    }

    fn notify_timeout(&self) {
        for member in self.members() {
            if !member.pact.is_finished() {
                member.pact.notify_timeout();
            }
        }
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

/// Renders the unfinished members, `[<Pact: a>, <Pact: b>]`.
impl Display for PactGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        let pending = self
            .members()
            .into_iter()
            .filter(|member| !member.pact.is_finished());
        for (index, member) in pending.enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", member.pact)?;
        }
        f.write_str("]")
    }
}

impl Debug for PactGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        let members: Vec<String> = inner
            .members
            .iter()
            .map(|member| format!("{} absorb={}", member.pact, member.absorb))
            .collect();
        f.debug_struct("PactGroup")
            .field("strategy", &inner.strategy)
            .field("members", &members)
            .field("then", &self.then)
            .finish()
    }
}

impl<P: Pollable + 'static> FromIterator<P> for PactGroup {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        let group = PactGroup::new();
        for pact in iter {
            PactGroup::add(&group, pact, false);
        }
        group
    }
}

/// `a + b` is a new lazy group `[a, b]`.
impl std::ops::Add for Pact {
    type Output = PactGroup;

    fn add(self, rhs: Pact) -> PactGroup {
        let group = PactGroup::new();
        PactGroup::add(&group, self, false).add(rhs, false);
        group
    }
}

/// `a + group` is a new lazy group starting with `a` followed by the
/// members of `group`.
impl std::ops::Add<PactGroup> for Pact {
    type Output = PactGroup;

    fn add(self, rhs: PactGroup) -> PactGroup {
        let group = PactGroup::new();
        PactGroup::add(&group, self, false);
        group.extend(&rhs);
        group
    }
}

/// Appends to the left group, which keeps its strategy.
impl std::ops::Add<Pact> for PactGroup {
    type Output = PactGroup;

    fn add(self, rhs: Pact) -> PactGroup {
        PactGroup::add(&self, rhs, false);
        self
    }
}

impl std::ops::Add for PactGroup {
    type Output = PactGroup;

    fn add(self, rhs: PactGroup) -> PactGroup {
        self.extend(&rhs);
        self
    }
}
