//! # Engine Lifecycle
//!
//! Owns the single engine instance of a worker and brings it up exactly once.
//!
//! ```text
//! Uninitialized --initialize()--> Initializing --ok--> Ready
//!       ^                              |
//!       +------------ err -------------+
//! ```
//!
//! Bootstrap is single-flight: callers arriving while an attempt is running
//! await that same attempt instead of starting another. A failed attempt is
//! reported to every caller that was awaiting it and leaves the lifecycle
//! `Uninitialized`, so a later call retries.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::Shared;
use tracing::info;
use tracing::warn;

use crate::engine::Bootstrap;
use crate::engine::ForeignError;

#[derive(Debug, Clone)]
pub enum Error {
    /// The engine has not finished initializing.
    NotInitialized,
    /// Bootstrap failed. Shared by every caller that awaited the attempt.
    Bootstrap(Arc<ForeignError>),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "engine is not initialized"),
            Self::Bootstrap(e) => write!(f, "engine bootstrap failed: {}", e),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Uninitialized,
    Initializing,
    Ready,
}

type Attempt<E> = Shared<BoxFuture<'static, std::result::Result<Arc<E>, Arc<ForeignError>>>>;

enum State<E> {
    Uninitialized,
    Initializing { attempt: u64, future: Attempt<E> },
    Ready(Arc<E>),
}

pub struct Lifecycle<B: Bootstrap> {
    bootstrap: Arc<B>,
    state: Mutex<State<B::Engine>>,
    attempts: AtomicU64,
}

impl<B: Bootstrap> Lifecycle<B> {
    pub fn new(bootstrap: B) -> Self {
        Self {
            bootstrap: Arc::new(bootstrap),
            state: Mutex::new(State::Uninitialized),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn status(&self) -> Status {
        match &*self.lock() {
            State::Uninitialized => Status::Uninitialized,
            State::Initializing { .. } => Status::Initializing,
            State::Ready(_) => Status::Ready,
        }
    }

    /// Returns the engine if bootstrap has completed.
    pub fn engine(&self) -> Result<Arc<B::Engine>> {
        match &*self.lock() {
            State::Ready(engine) => Ok(engine.clone()),
            _ => Err(Error::NotInitialized),
        }
    }

    /// Brings the engine up, or joins the attempt already in progress.
    ///
    /// Returns immediately once the engine is ready.
    pub async fn initialize(&self) -> Result<Arc<B::Engine>> {
        let (attempt, future) = {
            let mut state = self.lock();
            let joined = match &*state {
                State::Ready(engine) => return Ok(engine.clone()),
                State::Initializing { attempt, future } => Some((*attempt, future.clone())),
                State::Uninitialized => None,
            };
            match joined {
                Some(joined) => joined,
                None => {
                    let attempt = self.attempts.fetch_add(1, Ordering::Relaxed);
                    let future = self.start(attempt);
                    *state = State::Initializing { attempt, future: future.clone() };
                    (attempt, future)
                }
            }
        };

        let outcome = future.await;

        // Whichever awaiting caller gets here first settles the state; the
        // attempt number keeps a stale caller from clobbering a newer attempt.
        let mut state = self.lock();
        let settles = matches!(&*state, State::Initializing { attempt: current, .. } if *current == attempt);
        if settles {
            *state = match &outcome {
                Ok(engine) => State::Ready(engine.clone()),
                Err(_) => State::Uninitialized,
            };
        }
        drop(state);

        outcome.map_err(Error::Bootstrap)
    }

    fn start(&self, attempt: u64) -> Attempt<B::Engine> {
        let bootstrap = self.bootstrap.clone();
        async move {
            info!(attempt, "engine bootstrap started");
            match bootstrap.bootstrap().await {
                Ok(engine) => {
                    info!(attempt, "engine bootstrap complete");
                    Ok(Arc::new(engine))
                }
                Err(e) => {
                    warn!(attempt, error = %e, "engine bootstrap failed");
                    Err(Arc::new(e))
                }
            }
        }
        .boxed()
        .shared()
    }

    fn lock(&self) -> MutexGuard<'_, State<B::Engine>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::future::join_all;

    use super::*;
    use crate::mock::MockBootstrap;

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let bootstrap = MockBootstrap::new();
        let lifecycle = Lifecycle::new(bootstrap.clone());
        assert_eq!(lifecycle.status(), Status::Uninitialized);
        assert!(matches!(lifecycle.engine(), Err(Error::NotInitialized)));

        lifecycle.initialize().await.unwrap();
        lifecycle.initialize().await.unwrap();

        assert_eq!(lifecycle.status(), Status::Ready);
        assert_eq!(bootstrap.bootstrap_count(), 1);
        assert!(lifecycle.engine().is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_initialize_is_single_flight() {
        let bootstrap = MockBootstrap::new().with_delay(Duration::from_millis(20));
        let lifecycle = Lifecycle::new(bootstrap.clone());

        let results = join_all((0..16).map(|_| lifecycle.initialize())).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(bootstrap.bootstrap_count(), 1);
        assert_eq!(lifecycle.status(), Status::Ready);

        // everyone got the same engine
        let first = results[0].as_ref().unwrap();
        assert!(results.iter().all(|r| Arc::ptr_eq(r.as_ref().unwrap(), first)));
    }

    #[tokio::test]
    async fn test_concurrent_initialize_across_tasks() {
        let bootstrap = MockBootstrap::new().with_delay(Duration::from_millis(20));
        let lifecycle = Arc::new(Lifecycle::new(bootstrap.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let lifecycle = lifecycle.clone();
                tokio::spawn(async move { lifecycle.initialize().await.map(|_| ()) })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(bootstrap.bootstrap_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_bootstrap_reaches_every_waiter_and_is_retryable() {
        let bootstrap = MockBootstrap::new()
            .with_delay(Duration::from_millis(20))
            .failing(1);
        let lifecycle = Lifecycle::new(bootstrap.clone());

        let results = join_all((0..4).map(|_| lifecycle.initialize())).await;
        for result in &results {
            match result {
                Err(Error::Bootstrap(e)) => assert_eq!(e.name, "PackageInstallError"),
                other => panic!("Expected Bootstrap error, got {:?}", other.as_ref().map(|_| ())),
            }
        }
        assert_eq!(bootstrap.bootstrap_count(), 1);
        assert_eq!(lifecycle.status(), Status::Uninitialized);

        lifecycle.initialize().await.unwrap();
        assert_eq!(bootstrap.bootstrap_count(), 2);
        assert_eq!(lifecycle.status(), Status::Ready);
    }
}
