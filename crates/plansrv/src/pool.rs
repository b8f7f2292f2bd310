//! Bounded pool of exclusively held objects.
//!
//! Objects are created lazily up to the pool capacity. An object handed out
//! by [`Pool::acquire`] is owned by the returned guard until it's released,
//! so no two holders ever share one.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::errors::{PlanServerError, Result};
use crate::factory::{CompilerFactory, ObjectFactory};

/// What to do when every object is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitPolicy {
    /// Wait until an object is returned.
    #[default]
    Block,
    /// Wait up to the given duration.
    Timeout(Duration),
    /// Error immediately.
    FailFast,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub idle: usize,
    pub in_use: usize,
    pub created: u64,
    pub destroyed: u64,
    pub acquired: u64,
    pub released: u64,
}

struct PoolState<T> {
    idle: Vec<T>,
    /// Objects alive, idle or handed out.
    live: usize,
    /// Slots reserved for objects being created.
    creating: usize,
    in_use: usize,
    closed: bool,
    created: u64,
    destroyed: u64,
    acquired: u64,
    released: u64,
}

pub struct Pool<F: ObjectFactory> {
    capacity: usize,
    policy: WaitPolicy,
    factory: F,
    state: Mutex<PoolState<F::Object>>,
    available: Condvar,
}

pub type CompilerPool = Pool<CompilerFactory>;
pub type PooledCompiler = Pooled<CompilerFactory>;

impl<F: ObjectFactory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<F: ObjectFactory> Pool<F> {
    pub fn new(factory: F, capacity: usize, policy: WaitPolicy) -> Arc<Self> {
        Arc::new(Pool {
            capacity: capacity.max(1),
            policy,
            factory,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                live: 0,
                creating: 0,
                in_use: 0,
                closed: false,
                created: 0,
                destroyed: 0,
                acquired: 0,
                released: 0,
            }),
            available: Condvar::new(),
        })
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Borrow an object, creating one if under capacity.
    ///
    /// Waits according to the pool's wait policy when every object is in use.
    pub fn acquire(self: &Arc<Self>) -> Result<Pooled<F>> {
        let deadline = match self.policy {
            WaitPolicy::Timeout(limit) => Some(Instant::now() + limit),
            _ => None,
        };

        loop {
            let mut state = self.state.lock();
            if state.closed {
                return Err(PlanServerError::PoolClosed);
            }

            if let Some(mut object) = state.idle.pop() {
                state.in_use += 1;
                drop(state);
                match self.factory.activate(&mut object) {
                    Ok(()) => return Ok(self.hand_out(object)),
                    Err(e) => {
                        warn!(%e, "failed to activate pooled object, destroying");
                        self.destroy_in_use(object);
                        continue;
                    }
                }
            }

            if state.live + state.creating < self.capacity {
                state.creating += 1;
                drop(state);
                return self.create_and_hand_out();
            }

            match (self.policy, deadline) {
                (WaitPolicy::FailFast, _) => {
                    return Err(PlanServerError::PoolExhausted(format!(
                        "all {} instances are in use",
                        self.capacity
                    )));
                }
                (_, Some(deadline)) => {
                    if self.available.wait_until(&mut state, deadline).timed_out()
                        && state.idle.is_empty()
                        && state.live + state.creating >= self.capacity
                    {
                        return Err(PlanServerError::PoolExhausted(format!(
                            "timed out waiting for one of {} instances",
                            self.capacity
                        )));
                    }
                }
                (_, None) => self.available.wait(&mut state),
            }
        }
    }

    fn create_and_hand_out(self: &Arc<Self>) -> Result<Pooled<F>> {
        let created = self.factory.create().and_then(|mut object| {
            self.factory.activate(&mut object)?;
            Ok(object)
        });

        let mut state = self.state.lock();
        state.creating -= 1;
        match created {
            Ok(object) => {
                state.live += 1;
                state.created += 1;
                state.in_use += 1;
                drop(state);
                debug!("created pooled object");
                Ok(self.hand_out(object))
            }
            Err(e) => {
                drop(state);
                self.available.notify_one();
                Err(PlanServerError::FactoryFailure(e.to_string()))
            }
        }
    }

    fn hand_out(self: &Arc<Self>, object: F::Object) -> Pooled<F> {
        self.state.lock().acquired += 1;
        Pooled {
            pool: Arc::clone(self),
            object: Some(object),
        }
    }

    /// Return an object. Passivation failures and failed validation destroy
    /// the object, only the former is reported.
    fn return_object(&self, mut object: F::Object) -> Result<()> {
        let passivated = self.factory.passivate(&mut object);
        let valid = passivated.is_ok() && self.factory.validate(&object);

        let mut state = self.state.lock();
        state.in_use -= 1;
        state.released += 1;
        let discarded = if valid && !state.closed {
            state.idle.push(object);
            None
        } else {
            state.live -= 1;
            state.destroyed += 1;
            Some(object)
        };
        drop(state);
        self.available.notify_one();

        if discarded.is_some() {
            debug!(valid, "destroyed returned object");
        }
        drop(discarded);

        passivated.map_err(|e| PlanServerError::Release(e.to_string()))
    }

    /// Destroy an object that was counted as in use but never handed out.
    fn destroy_in_use(&self, object: F::Object) {
        let mut state = self.state.lock();
        state.in_use -= 1;
        state.live -= 1;
        state.destroyed += 1;
        drop(state);
        self.available.notify_one();
        drop(object);
    }

    /// Destroy an object handed out by the pool without validating it.
    fn discard(&self, object: F::Object) {
        {
            let mut state = self.state.lock();
            state.released += 1;
        }
        self.destroy_in_use(object);
    }

    /// Destroy idle objects and fail all further acquires. Objects returned
    /// after closing are destroyed.
    pub fn close(&self) {
        let idle = {
            let mut state = self.state.lock();
            state.closed = true;
            let idle = std::mem::take(&mut state.idle);
            state.live -= idle.len();
            state.destroyed += idle.len() as u64;
            idle
        };
        debug!(destroyed = idle.len(), "closed pool");
        drop(idle);
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            capacity: self.capacity,
            idle: state.idle.len(),
            in_use: state.in_use,
            created: state.created,
            destroyed: state.destroyed,
            acquired: state.acquired,
            released: state.released,
        }
    }
}

/// An object borrowed from a pool.
///
/// Return it with [`Pooled::release`]. Dropping the guard without releasing
/// returns the object too, logging any failure.
pub struct Pooled<F: ObjectFactory> {
    pool: Arc<Pool<F>>,
    object: Option<F::Object>,
}

impl<F: ObjectFactory> fmt::Debug for Pooled<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("held", &self.object.is_some())
            .finish_non_exhaustive()
    }
}

impl<F: ObjectFactory> Pooled<F> {
    pub fn release(mut self) -> Result<()> {
        match self.object.take() {
            Some(object) => self.pool.return_object(object),
            None => Ok(()),
        }
    }

    /// Destroy the object instead of returning it.
    pub fn discard(mut self) {
        if let Some(object) = self.object.take() {
            self.pool.discard(object);
        }
    }
}

impl<F: ObjectFactory> Deref for Pooled<F> {
    type Target = F::Object;

    fn deref(&self) -> &Self::Target {
        // Only taken by release, discard and drop, all of which consume the
        // guard.
        match &self.object {
            Some(object) => object,
            None => unreachable!("pooled object already released"),
        }
    }
}

impl<F: ObjectFactory> DerefMut for Pooled<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.object {
            Some(object) => object,
            None => unreachable!("pooled object already released"),
        }
    }
}

impl<F: ObjectFactory> Drop for Pooled<F> {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            if std::thread::panicking() {
                warn!("returning pooled object while unwinding");
            }
            if let Err(e) = self.pool.return_object(object) {
                error!(%e, "failed to return pooled object");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    use super::*;
    use crate::errors::internal;

    #[derive(Debug, Default)]
    struct TestFactory {
        next: AtomicUsize,
        fail_create: AtomicBool,
        fail_passivate: AtomicBool,
    }

    #[derive(Debug)]
    struct TestObject {
        id: usize,
        broken: bool,
        activations: usize,
    }

    impl ObjectFactory for TestFactory {
        type Object = TestObject;

        fn create(&self) -> Result<TestObject> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(internal!("no more objects"));
            }
            Ok(TestObject {
                id: self.next.fetch_add(1, Ordering::SeqCst),
                broken: false,
                activations: 0,
            })
        }

        fn activate(&self, object: &mut TestObject) -> Result<()> {
            object.activations += 1;
            Ok(())
        }

        fn validate(&self, object: &TestObject) -> bool {
            !object.broken
        }

        fn passivate(&self, _object: &mut TestObject) -> Result<()> {
            if self.fail_passivate.load(Ordering::SeqCst) {
                return Err(internal!("passivate failed"));
            }
            Ok(())
        }
    }

    fn pool(capacity: usize, policy: WaitPolicy) -> Arc<Pool<TestFactory>> {
        Pool::new(TestFactory::default(), capacity, policy)
    }

    #[test]
    fn reuses_objects() {
        let pool = pool(2, WaitPolicy::FailFast);
        let first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(2, pool.stats().in_use);

        let first_id = first.id;
        first.release().unwrap();
        assert_eq!(1, pool.stats().idle);

        let again = pool.acquire().unwrap();
        assert_eq!(first_id, again.id);
        assert_eq!(2, again.activations);
        drop(again);
        second.release().unwrap();

        let stats = pool.stats();
        assert_eq!(2, stats.created);
        assert_eq!(stats.acquired, stats.released);
        assert_eq!(0, stats.in_use);
        assert_eq!(2, stats.idle);
    }

    #[test]
    fn fail_fast_when_exhausted() {
        let pool = pool(1, WaitPolicy::FailFast);
        let _held = pool.acquire().unwrap();
        let err = pool.acquire().unwrap_err();
        assert!(matches!(err, PlanServerError::PoolExhausted(_)));
        assert_eq!(-1, err.code());
    }

    #[test]
    fn timeout_when_exhausted() {
        let pool = pool(1, WaitPolicy::Timeout(Duration::from_millis(20)));
        let _held = pool.acquire().unwrap();
        let started = Instant::now();
        let err = pool.acquire().unwrap_err();
        assert!(matches!(err, PlanServerError::PoolExhausted(_)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn blocked_acquire_wakes_on_release() {
        let pool = pool(1, WaitPolicy::Block);
        let held = pool.acquire().unwrap();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire().map(|obj| obj.id))
        };
        thread::sleep(Duration::from_millis(20));
        held.release().unwrap();

        assert_eq!(0, waiter.join().unwrap().unwrap());
        assert_eq!(1, pool.stats().created);
    }

    #[test]
    fn invalid_objects_are_discarded_and_replaced() {
        let pool = pool(1, WaitPolicy::FailFast);
        let mut obj = pool.acquire().unwrap();
        obj.broken = true;
        obj.release().unwrap();

        let stats = pool.stats();
        assert_eq!(0, stats.idle);
        assert_eq!(1, stats.destroyed);

        let replacement = pool.acquire().unwrap();
        assert_eq!(1, replacement.id);
    }

    #[test]
    fn passivate_failure_is_release_error() {
        let pool = pool(1, WaitPolicy::FailFast);
        let obj = pool.acquire().unwrap();
        pool.factory().fail_passivate.store(true, Ordering::SeqCst);

        let err = obj.release().unwrap_err();
        assert!(matches!(err, PlanServerError::Release(_)));
        assert_eq!(-4, err.code());

        let stats = pool.stats();
        assert_eq!(1, stats.destroyed);
        assert_eq!(stats.acquired, stats.released);
    }

    #[test]
    fn create_failure_frees_capacity() {
        let pool = pool(1, WaitPolicy::FailFast);
        pool.factory().fail_create.store(true, Ordering::SeqCst);
        let err = pool.acquire().unwrap_err();
        assert!(matches!(err, PlanServerError::FactoryFailure(_)));

        pool.factory().fail_create.store(false, Ordering::SeqCst);
        pool.acquire().unwrap().release().unwrap();
    }

    #[test]
    fn drop_while_panicking_returns_object() {
        let pool = pool(1, WaitPolicy::FailFast);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _obj = pool.acquire().unwrap();
            panic!("compile blew up");
        }));
        assert!(result.is_err());

        let stats = pool.stats();
        assert_eq!(1, stats.acquired);
        assert_eq!(1, stats.released);
        assert_eq!(1, stats.idle);
    }

    #[test]
    fn pooled_guard_debug() {
        let pool = pool(1, WaitPolicy::FailFast);
        let obj = pool.acquire().unwrap();
        assert!(format!("{obj:?}").starts_with("Pooled { held: true"));
    }

    #[test]
    fn discard_allows_recreate() {
        let pool = pool(1, WaitPolicy::FailFast);
        pool.acquire().unwrap().discard();
        assert!(pool.acquire().is_ok());
        assert_eq!(2, pool.stats().created);
    }

    #[test]
    fn closed_pool_rejects_acquire() {
        let pool = pool(2, WaitPolicy::Block);
        let held = pool.acquire().unwrap();
        pool.acquire().unwrap().release().unwrap();
        pool.close();

        assert!(matches!(pool.acquire(), Err(PlanServerError::PoolClosed)));
        held.release().unwrap();

        let stats = pool.stats();
        assert_eq!(0, stats.idle);
        assert_eq!(2, stats.destroyed);
    }
}
