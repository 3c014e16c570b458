//! Murmur deterministic simulation harness.
//!
//! Runs whole ensembles of nodes in a controlled world where every
//! source of non-determinism is intercepted:
//! - **Time**: a virtual clock the runner advances tick by tick
//! - **Network**: an in-memory broadcast medium with configurable
//!   latency, loss and partitions
//! - **Randomness**: all entropy derived from a single 64-bit seed
//!
//! A scenario builds a set of [`SimNode`]s (each a complete node:
//! knowledge registry, scheduler, binder, dissemination stack) on one
//! [`SimNetwork`], drives virtual time, and asserts convergence
//! properties at the end. The same seed always reproduces the same run.
//!
//! # Usage
//!
//! ```ignore
//! use murmur_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42, 6).run(ScenarioId::Convoy);
//! assert!(result.passed);
//! ```

mod context;
mod network;
mod node;
mod runner;
pub mod scenarios;

pub use context::SimContext;
pub use network::{Delivery, SimDevice, SimNetwork, SimNetworkController};
pub use node::SimNode;
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
