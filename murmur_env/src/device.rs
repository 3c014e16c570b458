//! Link-layer device abstraction.

use crate::error::EnvError;
use crate::types::Address;

/// A network device attached to a node.
///
/// Devices model lossy, bandwidth-limited, broadcast-style links: a frame
/// handed to `send` is delivered best-effort, possibly to nobody. The
/// fragmentation layer sizes its fragments against `mtu()`.
///
/// # Implementations
///
/// - **Production**: UDP broadcast sockets or radio bindings
/// - **Simulation**: `SimDevice` (in `murmur_sim`), routed in-memory with
///   configurable loss, latency and partitions
pub trait Device: Send + Sync {
    /// Human-readable device name (for logging).
    fn name(&self) -> &str;

    /// Whether this device is capable of transmitting to the address.
    fn can_send(&self, address: &Address) -> bool;

    /// Maximum transmission unit in bytes.
    ///
    /// Frames larger than this are rejected with `EnvError::FrameTooLarge`.
    fn mtu(&self) -> usize;

    /// Transmits a frame towards the address.
    ///
    /// Success means the frame left the device, not that anyone received
    /// it. Transient failures are the caller's problem to absorb; the
    /// dissemination layer drops and lets the next publish supersede.
    fn send(&self, frame: Vec<u8>, address: Address) -> Result<(), EnvError>;
}

/// Receipt metadata attached to an incoming frame by the device.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReceivedInfo {
    /// Signal strength indication, if the device reports one.
    pub signal_strength: Option<f64>,
}

impl ReceivedInfo {
    /// Merges receipt metadata from several fragments of one payload.
    ///
    /// Keeps the weakest reported signal, which is what matters when
    /// deciding whether a neighbor is worth gossiping towards.
    pub fn merge(self, other: ReceivedInfo) -> ReceivedInfo {
        let signal_strength = match (self.signal_strength, other.signal_strength) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        ReceivedInfo { signal_strength }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_received_info_merge_keeps_weakest() {
        let a = ReceivedInfo { signal_strength: Some(-40.0) };
        let b = ReceivedInfo { signal_strength: Some(-70.0) };

        assert_eq!(a.merge(b).signal_strength, Some(-70.0));
        assert_eq!(a.merge(ReceivedInfo::default()).signal_strength, Some(-40.0));
    }
}
