//! Simulation context implementing NodeContext for deterministic testing.

use async_trait::async_trait;
use murmur_env::NodeContext;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Node context backed by a virtual clock.
///
/// Time advances only when the simulation runner says so; `sleep`
/// advances it directly instead of waiting, which keeps single-threaded
/// scenario runs deterministic given their seed.
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (milliseconds since simulation start)
    virtual_time_ms: Arc<Mutex<u64>>,
}

impl SimContext {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ms: Arc::new(Mutex::new(0)),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        let mut time = self.virtual_time_ms.lock().unwrap();
        *time += duration.as_millis() as u64;
    }

    /// Sets the virtual time to a specific value.
    pub fn set_time(&self, time_ms: u64) {
        let mut time = self.virtual_time_ms.lock().unwrap();
        *time = time_ms;
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ms: Arc::clone(&self.virtual_time_ms),
        }
    }
}

#[async_trait]
impl NodeContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_millis(*self.virtual_time_ms.lock().unwrap())
    }

    async fn sleep(&self, duration: Duration) {
        // In simulation, sleeping is advancing the clock.
        self.advance_time(duration);
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let _name = name.to_string();
        tokio::spawn(async move {
            future.await;
        });
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_context_time() {
        let ctx = SimContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.advance_time(Duration::from_secs(1));
        assert_eq!(ctx.now(), Duration::from_secs(1));

        ctx.advance_time(Duration::from_millis(500));
        assert_eq!(ctx.now(), Duration::from_millis(1500));
        assert_eq!(ctx.now_ms(), 1500);
    }

    #[test]
    fn test_sim_context_clone_shares_time() {
        let ctx1 = SimContext::new(42);
        let ctx2 = ctx1.clone();

        ctx1.advance_time(Duration::from_secs(5));
        assert_eq!(ctx1.now(), ctx2.now());
    }

    #[test]
    fn test_sim_context_seed() {
        let ctx = SimContext::new(12345);
        assert_eq!(ctx.seed(), 12345);
    }
}
