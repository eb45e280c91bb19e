#![allow(dead_code)]
use pact::Pact;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// A callback that bumps this counter.
    pub fn hook(&self) -> impl FnMut() + Send + 'static {
        let counter = self.clone();
        move || {
            counter.bump();
        }
    }
}

/// Records callback firings in order.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn hook(&self, entry: &str) -> impl FnMut() + Send + 'static {
        let journal = self.clone();
        let entry = entry.to_owned();
        move || journal.0.lock().unwrap().push(entry.clone())
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// A pact whose predicate turns true on its `polls`-th evaluation. The
/// returned counter tracks how often the predicate ran.
pub fn finishes_after(name: &str, polls: usize) -> (Pact, Counter) {
    let evaluations = Counter::default();
    let counter = evaluations.clone();
    let pact = Pact::new(name);
    pact.set_poll_interval(Duration::from_millis(1));
    pact.until(move || counter.bump() >= polls);
    (pact, evaluations)
}

pub fn never(name: &str) -> Pact {
    let pact = Pact::new(name);
    pact.set_poll_interval(Duration::from_millis(5));
    pact.until(|| false);
    pact
}
