//! Host threads as execution contexts.
//!
//! Each context owns a baton. `switch(a, b)` posts to `b`'s baton and parks
//! on `a`'s, so only the most recently resumed context ever executes.

use super::lock;
use crate::context::{ContextEntry, ContextId, ContextSwitch};
use crate::{HalError, HalResult, VirtAddr};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

enum Signal {
    Parked,
    Resume(ContextId),
    Retire,
    Abort,
}

/// Unwind payload that ends the host thread of a released context
struct Retired;

struct Baton {
    signal: Mutex<Signal>,
    wake: Condvar,
}

impl Baton {
    fn new() -> Self {
        Self {
            signal: Mutex::new(Signal::Parked),
            wake: Condvar::new(),
        }
    }

    fn post(&self, signal: Signal) {
        *lock(&self.signal) = signal;
        self.wake.notify_one();
    }

    fn wait(&self) -> Signal {
        let mut slot = lock(&self.signal);
        loop {
            match core::mem::replace(&mut *slot, Signal::Parked) {
                Signal::Parked => {
                    slot = self.wake.wait(slot).unwrap_or_else(std::sync::PoisonError::into_inner);
                }
                signal => return signal,
            }
        }
    }
}

#[derive(Default)]
struct Shared {
    batons: Mutex<BTreeMap<ContextId, Arc<Baton>>>,
    aborted: AtomicBool,
}

impl Shared {
    fn baton(&self, id: ContextId) -> Arc<Baton> {
        match lock(&self.batons).get(&id) {
            Some(baton) => baton.clone(),
            None => panic!("host: unknown context {}", id),
        }
    }

    /// A context panicked: wake everybody so the failure surfaces instead of
    /// leaving the rest parked forever.
    fn abort_all(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        for baton in lock(&self.batons).values() {
            baton.post(Signal::Abort);
        }
    }
}

/// Baton-passing context switcher
#[derive(Default)]
pub struct HostContexts {
    shared: Arc<Shared>,
}

impl HostContexts {
    /// Create an empty switcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of contexts that have not been released
    pub fn live(&self) -> usize {
        lock(&self.shared.batons).len()
    }

    fn resume_point(&self, signal: Signal) -> ContextId {
        match signal {
            Signal::Resume(prev) => prev,
            Signal::Retire => panic::resume_unwind(Box::new(Retired)),
            Signal::Abort | Signal::Parked => panic!("host: another execution context panicked"),
        }
    }
}

impl ContextSwitch for HostContexts {
    fn adopt_current(&self, id: ContextId) {
        lock(&self.shared.batons).insert(id, Arc::new(Baton::new()));
    }

    fn prepare(&self, id: ContextId, _stack_top: VirtAddr, entry: ContextEntry) -> HalResult<()> {
        let baton = Arc::new(Baton::new());
        {
            let mut batons = lock(&self.shared.batons);
            if batons.contains_key(&id) {
                return Err(HalError::AlreadyExists);
            }
            batons.insert(id, baton.clone());
        }

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(format!("context-{}", id))
            .spawn(move || {
                let prev = match baton.wait() {
                    Signal::Resume(prev) => prev,
                    _ => return,
                };
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| entry(prev))) {
                    if !payload.is::<Retired>() {
                        shared.abort_all();
                    }
                }
            });

        match spawned {
            Ok(_) => Ok(()),
            Err(_) => {
                lock(&self.shared.batons).remove(&id);
                Err(HalError::OutOfMemory)
            }
        }
    }

    fn switch(&self, from: ContextId, to: ContextId) -> ContextId {
        if self.shared.aborted.load(Ordering::SeqCst) {
            panic!("host: another execution context panicked");
        }
        log::trace!("host: switch {} -> {}", from, to);
        let parked = self.shared.baton(from);
        self.shared.baton(to).post(Signal::Resume(from));
        let signal = parked.wait();
        self.resume_point(signal)
    }

    fn release(&self, id: ContextId) {
        if let Some(baton) = lock(&self.shared.batons).remove(&id) {
            baton.post(Signal::Retire);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_switch_runs_entry_and_returns_prev() {
        let contexts = Arc::new(HostContexts::new());
        contexts.adopt_current(1);
        let (tx, rx) = mpsc::channel();
        let inner = contexts.clone();
        contexts
            .prepare(
                2,
                VirtAddr::new(0),
                Box::new(move |prev| {
                    tx.send(prev).unwrap();
                    let back = inner.switch(2, 1);
                    tx.send(back).unwrap();
                }),
            )
            .unwrap();

        let prev = contexts.switch(1, 2);
        assert_eq!(prev, 2);
        assert_eq!(rx.recv().unwrap(), 1);
        contexts.release(2);
        assert_eq!(contexts.live(), 1);
    }

    #[test]
    fn test_duplicate_prepare_rejected() {
        let contexts = HostContexts::new();
        contexts.adopt_current(1);
        let err = contexts.prepare(1, VirtAddr::new(0), Box::new(|_| {}));
        assert_eq!(err, Err(HalError::AlreadyExists));
    }
}
