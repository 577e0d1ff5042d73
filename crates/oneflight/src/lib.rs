// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Collapses concurrent async calls that share a key onto a single execution.
//!
//! This crate provides [`Flight`], a duplicate-suppression primitive for async
//! work. When several tasks request the same computation (identified by a key),
//! only the first caller's closure runs; every other caller waits on the shared
//! completion barrier and receives a clone of the one result.
//!
//! # When to Use
//!
//! Use `Flight` for expensive operations that may be requested concurrently
//! with the same parameters:
//!
//! - **Cache fills**: collapse a thundering herd of misses into one load
//! - **Remote fetches**: deduplicate concurrent requests for the same resource
//! - **Database queries**: coalesce identical queries issued simultaneously
//!
//! # Example
//!
//! ```
//! use oneflight::Flight;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let flight: Flight<String, String> = Flight::new();
//!
//! // Concurrent calls with the same key share a single execution.
//! let value = flight
//!     .work("user:123".to_string(), || async { "expensive".to_string() })
//!     .await;
//! assert_eq!(value, "expensive");
//! # }
//! ```
//!
//! # Cancellation
//!
//! The work future is executed on a detached task, so dropping any caller's
//! future — including the one that started the execution — never aborts the
//! shared computation. Late joiners and survivors of a cancellation storm all
//! observe the eventual result. Errors are ordinary values here: instantiate
//! `T` as a `Clone` `Result` and every waiter receives the same failure.
//!
//! # Panic Safety
//!
//! If the work future panics, the panic resurfaces in the caller that spawned
//! it, and one waiting caller is promoted to execute its own closure in place
//! of the dead one.

use std::{
    collections::HashMap,
    hash::Hash,
    sync::{
        Arc, OnceLock, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use event_listener::Event;
use parking_lot::Mutex;

type SharedCalls<K, T> = Arc<Mutex<HashMap<K, CallEntry<T>>>>;

/// Represents a class of work in which units of work keyed by `K` execute
/// with duplicate suppression.
pub struct Flight<K, T> {
    calls: SharedCalls<K, T>,
}

impl<K, T> Default for Flight<K, T> {
    fn default() -> Self {
        Self { calls: Arc::default() }
    }
}

impl<K, T> Clone for Flight<K, T> {
    fn clone(&self) -> Self {
        Self {
            calls: Arc::clone(&self.calls),
        }
    }
}

impl<K, T> std::fmt::Debug for Flight<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flight").finish_non_exhaustive()
    }
}

/// State shared between every caller of one in-flight execution.
struct Shared<T> {
    /// Written once by the execution that completes; lock-free reads after.
    result: OnceLock<T>,
    /// Wakes waiters when the result lands or the execution dies.
    ready: Event,
    /// Whether an execution currently holds the (single) leadership slot.
    leading: AtomicBool,
}

/// Map entry for an in-flight call. Holds a `Weak` so abandoned calls do not
/// keep their state alive; callers and the detached task hold the strong refs.
struct CallEntry<T> {
    shared: Weak<Shared<T>>,
}

/// Clears leadership when an execution dies without storing a result.
///
/// Dropped during unwind on panic, or on task cancellation at runtime
/// shutdown. If no waiter is left to promote, the dead call is removed from
/// the map so the next caller starts fresh.
struct ExecutionGuard<K, T>
where
    K: Eq + Hash,
{
    shared: Option<Arc<Shared<T>>>,
    calls: SharedCalls<K, T>,
    key: K,
}

impl<K, T> ExecutionGuard<K, T>
where
    K: Eq + Hash,
{
    fn disarm(&mut self) -> Arc<Shared<T>> {
        self.shared.take().expect("guard already disarmed")
    }
}

impl<K, T> Drop for ExecutionGuard<K, T>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        let Some(shared) = self.shared.take() else { return };
        let mut calls = self.calls.lock();
        if Arc::strong_count(&shared) == 1 {
            // No waiter holds this call anymore; upgrades are serialized by
            // the map lock, so it is safe to discard the dead entry.
            remove_call(&mut calls, &self.key, &shared);
            return;
        }
        drop(calls);
        shared.leading.store(false, Ordering::Release);
        shared.ready.notify(1);
    }
}

/// Removes the map entry for `key` only if it still refers to `shared`.
/// A newer call for the same key must not be clobbered.
fn remove_call<K, T>(calls: &mut HashMap<K, CallEntry<T>>, key: &K, shared: &Arc<Shared<T>>)
where
    K: Eq + Hash,
{
    if let Some(entry) = calls.get(key) {
        if Weak::as_ptr(&entry.shared) == Arc::as_ptr(shared) {
            calls.remove(key);
        }
    }
}

impl<K, T> Flight<K, T>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Creates a new, empty `Flight`.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Executes `func` for `key`, making sure that only one execution per key
    /// is in flight at a given moment. Duplicate callers wait until the
    /// running execution completes and receive a clone of its value.
    ///
    /// The caller is registered against the in-flight call synchronously, so
    /// a future obtained while an execution is running observes that
    /// execution's result even when awaited much later. The work future runs
    /// on a detached task: dropping the returned future does not abort an
    /// execution that other callers may be waiting on. The map entry for
    /// `key` is removed before waiters are released, so a call that arrives
    /// after completion starts a fresh execution.
    ///
    /// # Panics
    ///
    /// If the work future panics, the panic is resurfaced in the caller whose
    /// closure was executing; other callers are unaffected and one of them
    /// takes over with its own closure.
    pub fn work<F, Fut>(&self, key: K, func: F) -> impl Future<Output = T> + use<K, T, F, Fut>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = T> + Send + 'static,
    {
        let shared = {
            let mut calls = self.calls.lock();
            match calls.get(&key).and_then(|entry| entry.shared.upgrade()) {
                Some(shared) => shared,
                None => {
                    let shared = Arc::new(Shared {
                        result: OnceLock::new(),
                        ready: Event::new(),
                        leading: AtomicBool::new(false),
                    });
                    calls.insert(
                        key.clone(),
                        CallEntry {
                            shared: Arc::downgrade(&shared),
                        },
                    );
                    shared
                }
            }
        };

        let flight = self.clone();
        async move { flight.wait(key, shared, func).await }
    }

    /// Waits on `shared`, executing `func` if this caller wins (or inherits)
    /// the execution slot.
    async fn wait<F, Fut>(&self, key: K, shared: Arc<Shared<T>>, func: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut func = Some(func);
        loop {
            if let Some(result) = shared.result.get() {
                return result.clone();
            }

            // Claim the execution slot if it is free and this caller still
            // has a closure to run.
            if func.is_some()
                && shared
                    .leading
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                if let Some(result) = shared.result.get() {
                    return result.clone();
                }
                let fut = func.take().expect("closure checked above")();
                return self.execute(key, Arc::clone(&shared), fut).await;
            }

            // Register before re-checking to avoid a missed notification.
            let listener = shared.ready.listen();
            if let Some(result) = shared.result.get() {
                return result.clone();
            }
            if func.is_some() && !shared.leading.load(Ordering::Acquire) {
                // The execution died between the claim attempt and the
                // registration; go around and claim it.
                continue;
            }
            listener.await;
        }
    }

    /// Runs `fut` on a detached task and waits for its value.
    async fn execute<Fut>(&self, key: K, shared: Arc<Shared<T>>, fut: Fut) -> T
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut guard = ExecutionGuard {
            shared: Some(Arc::clone(&shared)),
            calls: Arc::clone(&self.calls),
            key,
        };
        let handle = tokio::spawn(async move {
            let value = fut.await;
            let shared = guard.disarm();
            if shared.result.set(value).is_ok() {
                remove_call(&mut guard.calls.lock(), &guard.key, &shared);
            }
            shared.ready.notify(usize::MAX);
            drop(guard);
        });

        match handle.await {
            Ok(()) => shared
                .result
                .get()
                .expect("detached execution stored a result")
                .clone(),
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => {
                // Cancelled at runtime shutdown; nothing sensible to return.
                panic!("oneflight execution task was cancelled before completing");
            }
        }
    }
}
