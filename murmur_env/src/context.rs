//! Core environment context trait for Murmur nodes.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// The central interface for environment interaction.
///
/// This trait abstracts the "real world" so that the Murmur engine can run
/// in both production and simulation environments.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`
/// - **Simulation**: `SimContext` (in `murmur_sim`) - a virtual clock
///   advanced explicitly by the scenario runner
///
/// # Determinism
///
/// The scheduler derives all jitter from `seed()`. A production context
/// may return 0 (unseeded); a simulation context must return its master
/// seed so that a run can be reproduced from the seed alone.
#[async_trait]
pub trait NodeContext: Send + Sync + 'static {
    /// Returns the current time since context creation.
    ///
    /// This is the scheduler's clock. In simulation, it is the virtual
    /// clock time.
    fn now(&self) -> Duration;

    /// Returns `now()` in whole milliseconds.
    ///
    /// Schedules, periods and jitter are all expressed in milliseconds.
    fn now_ms(&self) -> u64 {
        self.now().as_millis() as u64
    }

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`.
    /// In simulation: advances the virtual clock.
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Returns the context's seed (for logging and deterministic replay).
    ///
    /// In production, returns 0 (not seeded).
    /// In simulation, returns the master seed.
    fn seed(&self) -> u64;
}
