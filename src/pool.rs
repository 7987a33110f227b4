use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::errors::{Result, TileSegError};
use crate::traits::Predictor;

/// Fixed-capacity pool of warm predictor handles.
///
/// Bounds concurrent calls into the model runtime: excess demand blocks in
/// [`acquire`](PredictorPool::acquire) instead of spawning further predictors,
/// capping memory and device usage regardless of tile count. Each handle is
/// held by exactly one worker at a time via an RAII guard.
pub struct PredictorPool {
    state: Arc<PoolState>,
}

struct PoolState {
    inner: Mutex<PoolInner>,
    available: Condvar,
}

struct PoolInner {
    idle: Vec<Box<dyn Predictor>>,
    /// Handles constructed and not yet dropped (idle + borrowed).
    live: usize,
    closed: bool,
}

impl PredictorPool {
    /// Build `capacity` handles up front. A factory failure is fatal to the
    /// whole run and aborts construction.
    pub fn new(
        capacity: usize,
        factory: impl Fn() -> Result<Box<dyn Predictor>>,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(TileSegError::Validation {
                field: "capacity".to_string(),
                reason: "predictor pool needs at least one handle".to_string(),
            });
        }
        let mut idle = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            idle.push(factory()?);
        }
        Ok(Self {
            state: Arc::new(PoolState {
                inner: Mutex::new(PoolInner {
                    live: idle.len(),
                    idle,
                    closed: false,
                }),
                available: Condvar::new(),
            }),
        })
    }

    /// Handles currently alive (idle or borrowed).
    pub fn capacity(&self) -> usize {
        self.state.inner.lock().live
    }

    /// Borrow a handle, blocking until one is idle. Fails once the pool is
    /// closed or every handle has been discarded.
    pub fn acquire(&self) -> Result<PredictorGuard> {
        let mut inner = self.state.inner.lock();
        loop {
            if inner.closed {
                return Err(TileSegError::Pool {
                    operation: "acquire".to_string(),
                    reason: "pool is closed".to_string(),
                });
            }
            if inner.live == 0 {
                return Err(TileSegError::Pool {
                    operation: "acquire".to_string(),
                    reason: "all predictor handles were discarded".to_string(),
                });
            }
            if let Some(handle) = inner.idle.pop() {
                return Ok(PredictorGuard {
                    state: Arc::clone(&self.state),
                    handle: Some(handle),
                });
            }
            self.state.available.wait(&mut inner);
        }
    }

    /// Deterministic drain: no new acquisitions succeed, borrowed handles are
    /// waited for until their guards return them, then every handle is
    /// dropped, releasing the underlying runtime resources. Idempotent.
    pub fn close_all(&self) {
        let mut inner = self.state.inner.lock();
        inner.closed = true;
        self.state.available.notify_all();
        while inner.idle.len() < inner.live {
            self.state.available.wait(&mut inner);
        }
        inner.idle.clear();
        inner.live = 0;
    }
}

/// Backstop so no exit path (including panics unwinding through the
/// orchestrator) leaks handles; the orchestrator still closes explicitly.
impl Drop for PredictorPool {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Exclusive borrow of one predictor handle. Returns the handle to the pool
/// on drop.
pub struct PredictorGuard {
    state: Arc<PoolState>,
    handle: Option<Box<dyn Predictor>>,
}

impl PredictorGuard {
    /// Drop the handle instead of returning it, shrinking the pool. For
    /// handles left in an unusable state by a failed inference call.
    pub fn discard(mut self) {
        if let Some(handle) = self.handle.take() {
            let mut inner = self.state.inner.lock();
            drop(handle);
            inner.live -= 1;
            self.state.available.notify_all();
        }
    }
}

impl std::ops::Deref for PredictorGuard {
    type Target = dyn Predictor;

    fn deref(&self) -> &Self::Target {
        self.handle.as_deref().expect("guard holds handle until drop")
    }
}

impl std::ops::DerefMut for PredictorGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.handle
            .as_deref_mut()
            .expect("guard holds handle until drop")
    }
}

impl Drop for PredictorGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let mut inner = self.state.inner.lock();
            inner.idle.push(handle);
            self.state.available.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, ArrayView3};
    use std::thread;
    use std::time::{Duration, Instant};

    struct NoopPredictor;

    impl Predictor for NoopPredictor {
        fn infer(&mut self, input: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
            Ok(input.to_owned())
        }
    }

    fn noop_pool(capacity: usize) -> PredictorPool {
        PredictorPool::new(capacity, || Ok(Box::new(NoopPredictor))).unwrap()
    }

    #[test]
    fn factory_failure_aborts_construction() {
        let result = PredictorPool::new(2, || {
            Err(TileSegError::Configuration {
                message: "model failed to load".to_string(),
            })
        });
        assert!(result.is_err());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(PredictorPool::new(0, || Ok(Box::new(NoopPredictor) as _)).is_err());
    }

    #[test]
    fn capacity_one_serializes_holders() {
        let pool = Arc::new(noop_pool(1));
        let intervals = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let intervals = Arc::clone(&intervals);
                thread::spawn(move || {
                    let guard = pool.acquire().unwrap();
                    let start = Instant::now();
                    thread::sleep(Duration::from_millis(10));
                    let end = Instant::now();
                    drop(guard);
                    intervals.lock().push((start, end));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut intervals = intervals.lock().clone();
        intervals.sort_by_key(|&(start, _)| start);
        for pair in intervals.windows(2) {
            assert!(
                pair[0].1 <= pair[1].0,
                "two workers held the single handle at the same time"
            );
        }
    }

    #[test]
    fn close_all_waits_for_borrowed_handles() {
        let pool = Arc::new(noop_pool(1));
        let worker = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let guard = pool.acquire().unwrap();
                thread::sleep(Duration::from_millis(50));
                drop(guard);
            })
        };
        // Give the worker time to grab the handle before draining.
        thread::sleep(Duration::from_millis(10));
        let start = Instant::now();
        pool.close_all();
        assert!(start.elapsed() >= Duration::from_millis(30));
        worker.join().unwrap();
    }

    #[test]
    fn acquire_after_close_fails() {
        let pool = noop_pool(2);
        pool.close_all();
        assert!(pool.acquire().is_err());
        // close_all is idempotent.
        pool.close_all();
    }

    #[test]
    fn discard_shrinks_the_pool() {
        let pool = noop_pool(2);
        pool.acquire().unwrap().discard();
        assert_eq!(pool.capacity(), 1);
        pool.acquire().unwrap().discard();
        assert!(pool.acquire().is_err());
    }
}
