use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::request::HttpResponse;

/// A settled call. Failures are cached just like successes.
pub type CachedResult = Result<HttpResponse, HttpResponse>;

/// (url, encoded params)
type CacheKey = (String, String);

#[derive(Debug)]
enum Slot {
    /// The call is on the wire. Identical calls wait for its result.
    InFlight(Vec<oneshot::Sender<CachedResult>>),

    Settled {
        result: CachedResult,
        generation: u64,
    },
}

#[derive(Debug, Default)]
struct Entries {
    entries: HashMap<CacheKey, Slot>,
    next_generation: u64,
}

/// What to do about a call, see [`ResponseDeduper::begin`].
#[derive(Debug)]
pub enum Lookup {
    /// An identical call settled within the window.
    Hit(CachedResult),

    /// An identical call is on the wire. Resolves with its result, or with an error if that
    /// call was abandoned.
    Wait(oneshot::Receiver<CachedResult>),

    /// Nobody is making this call. Make it and hand the result to [`Flight::settle`].
    Lead(Flight),
}

/// The right and duty to make a call others may be waiting for.
///
/// Dropping an unsettled flight releases its waiters and forgets the call.
#[derive(Debug)]
pub struct Flight {
    deduper: ResponseDeduper,
    key: CacheKey,
    settled: bool,
}

impl Flight {
    pub fn settle(mut self, result: CachedResult) {
        self.settled = true;
        let key = std::mem::take(&mut self.key);
        self.deduper.settle(key, result);
    }
}

impl Drop for Flight {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut entries = self.deduper.entries.borrow_mut();
        if matches!(entries.entries.get(&self.key), Some(Slot::InFlight(_))) {
            tracing::debug!(url = self.key.0.as_str(), "Abandoned call before it settled.");
            // Dropping the senders wakes every waiter.
            entries.entries.remove(&self.key);
        }
    }
}

/// Collapses identical lightweight calls into one.
///
/// Calls issued while an identical one is on the wire wait for its result. Calls issued within
/// the window after it settled get the settled result replayed. Every settled entry is evicted
/// by its own timer. Reads never evict, so every read inside the window observes the original
/// result. Timers are spawned with `tokio::task::spawn_local`, this must therefore be used from
/// within a `LocalSet`.
///
/// # Internal Use
/// This is an internal component exposed via the `internals` feature flag for advanced
/// use cases like testing or debugging.
#[derive(Debug, Clone)]
pub struct ResponseDeduper {
    entries: Rc<RefCell<Entries>>,
    ttl: Duration,
}

impl ResponseDeduper {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Rc::new(RefCell::new(Entries::default())),
            ttl,
        }
    }

    /// Decide whether a call has to go to the network. Registers the caller as the one making
    /// the call when nobody else does.
    pub fn begin(&self, url: &str, params_key: &str) -> Lookup {
        let key = (url.to_owned(), params_key.to_owned());
        let mut entries = self.entries.borrow_mut();
        match entries.entries.get_mut(&key) {
            Some(Slot::Settled { result, .. }) => {
                tracing::trace!(url, "Serving deduplicated response.");
                Lookup::Hit(result.clone())
            }
            Some(Slot::InFlight(waiters)) => {
                tracing::trace!(url, "Joining identical call in flight.");
                let (sender, receiver) = oneshot::channel();
                waiters.push(sender);
                Lookup::Wait(receiver)
            }
            None => {
                entries
                    .entries
                    .insert(key.clone(), Slot::InFlight(Vec::new()));
                Lookup::Lead(Flight {
                    deduper: self.clone(),
                    key,
                    settled: false,
                })
            }
        }
    }

    /// The settled result for this call, if any.
    pub fn lookup(&self, url: &str, params_key: &str) -> Option<CachedResult> {
        let entries = self.entries.borrow();
        match entries.entries.get(&(url.to_owned(), params_key.to_owned())) {
            Some(Slot::Settled { result, .. }) => Some(result.clone()),
            Some(Slot::InFlight(_)) | None => None,
        }
    }

    /// Remember `result` for the configured TTL. Storing the same key again restarts its window.
    pub fn store(&self, url: &str, params_key: &str, result: CachedResult) {
        self.settle((url.to_owned(), params_key.to_owned()), result);
    }

    fn settle(&self, key: CacheKey, result: CachedResult) {
        let (generation, waiters) = {
            let mut entries = self.entries.borrow_mut();
            let generation = entries.next_generation;
            entries.next_generation += 1;
            let previous = entries.entries.insert(
                key.clone(),
                Slot::Settled {
                    result: result.clone(),
                    generation,
                },
            );
            let waiters = match previous {
                Some(Slot::InFlight(waiters)) => waiters,
                Some(Slot::Settled { .. }) | None => Vec::new(),
            };
            (generation, waiters)
        };

        for waiter in waiters {
            // A waiter which went away does not care.
            let _ = waiter.send(result.clone());
        }

        let weak: Weak<RefCell<Entries>> = Rc::downgrade(&self.entries);
        let ttl = self.ttl;
        tokio::task::spawn_local(async move {
            tokio::time::sleep(ttl).await;
            let Some(entries) = weak.upgrade() else {
                return;
            };
            let mut entries = entries.borrow_mut();
            // An older timer must not evict a newer entry.
            let current = matches!(
                entries.entries.get(&key),
                Some(Slot::Settled { generation: it, .. }) if *it == generation
            );
            if current {
                entries.entries.remove(&key);
            }
        });
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
