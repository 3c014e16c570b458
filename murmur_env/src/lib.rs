//! Murmur Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the Murmur
//! coordination engine to run in both **Production** (tokio, wall clock,
//! real link devices) and **Simulation** (virtual clock, routed in-memory
//! links) environments.
//!
//! # Core Concept
//!
//! The engine never touches the OS directly. All sources of
//! non-determinism are behind traits:
//! - Time (`now()`, `sleep()`)
//! - Link transmission (`Device::send()`)
//! - Randomness (an explicit 64-bit seed, never a hidden default)
//!
//! By deriving all scheduling jitter and gossip decisions from a seed, any
//! dissemination bug becomes reproducible via its seed number.
//!
//! # Example
//!
//! ```ignore
//! use murmur_env::{NodeContext, Device, Address};
//!
//! async fn publisher_loop<Ctx: NodeContext>(ctx: &Ctx, dev: &dyn Device) {
//!     loop {
//!         ctx.sleep(std::time::Duration::from_millis(500)).await;
//!         dev.send(snapshot_frame(), Address::Broadcast).ok();
//!     }
//! }
//! ```

mod context;
mod device;
mod types;
mod error;
mod tokio_impl;

pub use context::NodeContext;
pub use device::{Device, ReceivedInfo};
pub use types::{Address, NodeId};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
