//! L1: fragmentation and reassembly.
//!
//! Payloads larger than a device's MTU budget are split into fragments,
//! each carrying a 16-byte header. Incoming fragments accumulate in
//! per-`(data id, source)` collectors until the byte coverage is
//! complete; collectors that stall are evicted after a TTL so that lost
//! fragments cannot pin memory forever.

use super::NetError;
use murmur_env::{Address, Device, NodeId, ReceivedInfo};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};

/// Fragment header: total size, source node, data id, start offset,
/// each a big-endian u32.
pub const L1_HEADER_LEN: usize = 16;

/// How long an incomplete collector survives without a new fragment.
pub const DEFAULT_COLLECTOR_TTL_MS: u64 = 30_000;

/// A fully reassembled payload handed up to L2.
pub struct ReassembledData {
    pub payload: Vec<u8>,
    pub source: NodeId,
    pub data_id: u32,
    pub info: ReceivedInfo,
}

/// Reassembly state for one `(data id, source)` pair.
struct Collector {
    data: Vec<u8>,
    /// Sorted, disjoint byte ranges already copied in. Completeness is
    /// byte coverage, not a fragment count: fragments from different
    /// senders may overlap (a rebroadcaster can re-chunk under its own
    /// MTU), so overlapping bytes must never count twice.
    received: Vec<(usize, usize)>,
    info: ReceivedInfo,
    last_update_ms: u64,
}

impl Collector {
    fn new(total: usize, now_ms: u64) -> Self {
        Self {
            data: vec![0; total],
            received: Vec::new(),
            info: ReceivedInfo::default(),
            last_update_ms: now_ms,
        }
    }

    /// Copies one fragment in. Duplicate bytes refresh the TTL and merge
    /// the link-quality info but do not extend coverage.
    fn absorb(&mut self, start: u32, chunk: &[u8], info: &ReceivedInfo, now_ms: u64) -> Result<(), NetError> {
        self.last_update_ms = now_ms;
        self.info = self.info.merge(*info);
        let start = start as usize;
        let end = start
            .checked_add(chunk.len())
            .ok_or_else(|| NetError::MalformedFrame("fragment offset overflow".to_string()))?;
        if end > self.data.len() {
            return Err(NetError::MalformedFrame(format!(
                "fragment [{}, {}) exceeds total size {}",
                start,
                end,
                self.data.len()
            )));
        }
        self.data[start..end].copy_from_slice(chunk);
        self.cover(start, end);
        Ok(())
    }

    /// Merges `[start, end)` into the sorted disjoint coverage list.
    fn cover(&mut self, start: usize, end: usize) {
        let mut merged = Vec::with_capacity(self.received.len() + 1);
        let mut new = (start, end);
        let mut placed = false;
        for &(s, e) in &self.received {
            if e < new.0 {
                merged.push((s, e));
            } else if s > new.1 {
                if !placed {
                    merged.push(new);
                    placed = true;
                }
                merged.push((s, e));
            } else {
                new.0 = new.0.min(s);
                new.1 = new.1.max(e);
            }
        }
        if !placed {
            merged.push(new);
        }
        self.received = merged;
    }

    fn covered_bytes(&self) -> usize {
        self.received.iter().map(|(s, e)| e - s).sum()
    }

    fn is_complete(&self) -> bool {
        self.received.first() == Some(&(0, self.data.len()))
    }
}

/// The fragmentation layer over one or more devices.
pub struct Layer1 {
    node: NodeId,
    devices: Mutex<Vec<Arc<dyn Device>>>,
    next_data_id: AtomicU32,
    collectors: Mutex<HashMap<(u32, u32), Collector>>,
    collector_ttl_ms: u64,
}

impl Layer1 {
    pub fn new(node: NodeId) -> Self {
        Self::with_ttl(node, DEFAULT_COLLECTOR_TTL_MS)
    }

    pub fn with_ttl(node: NodeId, collector_ttl_ms: u64) -> Self {
        Self {
            node,
            devices: Mutex::new(Vec::new()),
            next_data_id: AtomicU32::new(1),
            collectors: Mutex::new(HashMap::new()),
            collector_ttl_ms,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn register_device(&self, device: Arc<dyn Device>) {
        debug!(node = %self.node, device = device.name(), "registering device");
        self.devices.lock().unwrap().push(device);
    }

    /// Sends a payload originated by this node. Assigns a fresh data id.
    pub fn send(&self, payload: &[u8], address: Address) -> Result<(), NetError> {
        let data_id = self.next_data_id.fetch_add(1, Ordering::SeqCst);
        self.send_as(self.node, data_id, payload, address)
    }

    /// Sends a payload preserving its original source and data id.
    /// Used by rebroadcast so that duplicate suppression and reassembly
    /// keys survive multi-hop forwarding.
    pub fn send_as(
        &self,
        source: NodeId,
        data_id: u32,
        payload: &[u8],
        address: Address,
    ) -> Result<(), NetError> {
        let devices = self.devices.lock().unwrap().clone();
        for device in devices {
            if !device.can_send(&address) {
                continue;
            }
            let mtu = device.mtu();
            // The fragment payload budget leaves room for the size word
            // the L0 frame prepends to each fragment.
            if mtu <= 4 {
                return Err(NetError::MtuTooSmall { mtu });
            }
            let chunk_len = mtu - 4;
            for (index, chunk) in payload.chunks(chunk_len).enumerate() {
                let start = (index * chunk_len) as u32;
                let fragment = encode_fragment(payload.len() as u32, source, data_id, start, chunk);
                let frame = encode_frame(&[fragment]);
                device.send(frame, address)?;
            }
            trace!(
                node = %self.node,
                %source,
                data_id,
                bytes = payload.len(),
                device = device.name(),
                "payload fragmented and sent"
            );
        }
        Ok(())
    }

    /// Feeds one received L0 frame in, returning any payloads it
    /// completed. `now_ms` drives collector TTL eviction.
    pub fn process_frame(
        &self,
        frame: &[u8],
        info: &ReceivedInfo,
        now_ms: u64,
    ) -> Result<Vec<ReassembledData>, NetError> {
        let mut collectors = self.collectors.lock().unwrap();
        collectors.retain(|key, collector| {
            let alive = now_ms.saturating_sub(collector.last_update_ms) < self.collector_ttl_ms;
            if !alive {
                debug!(
                    data_id = key.0,
                    source = key.1,
                    received = collector.covered_bytes(),
                    total = collector.data.len(),
                    "evicting stalled collector"
                );
            }
            alive
        });

        let mut completed = Vec::new();
        for fragment in decode_frame(frame)? {
            let (total, source, data_id, start, chunk) = decode_fragment(fragment)?;
            if source == self.node {
                // Our own broadcast echoed back by the medium.
                continue;
            }
            let key = (data_id, source.as_u32());
            let collector = collectors
                .entry(key)
                .or_insert_with(|| Collector::new(total as usize, now_ms));
            if collector.data.len() != total as usize {
                warn!(data_id, %source, "fragment disagrees on total size, dropping");
                continue;
            }
            collector.absorb(start, chunk, info, now_ms)?;
            if collector.is_complete() {
                let collector = collectors.remove(&key).unwrap();
                completed.push(ReassembledData {
                    payload: collector.data,
                    source,
                    data_id,
                    info: collector.info,
                });
            }
        }
        Ok(completed)
    }

    /// Number of incomplete collectors, for diagnostics.
    pub fn pending_collectors(&self) -> usize {
        self.collectors.lock().unwrap().len()
    }
}

fn encode_fragment(total: u32, source: NodeId, data_id: u32, start: u32, chunk: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(L1_HEADER_LEN + chunk.len());
    buf.extend_from_slice(&total.to_be_bytes());
    buf.extend_from_slice(&source.as_u32().to_be_bytes());
    buf.extend_from_slice(&data_id.to_be_bytes());
    buf.extend_from_slice(&start.to_be_bytes());
    buf.extend_from_slice(chunk);
    buf
}

fn decode_fragment(fragment: &[u8]) -> Result<(u32, NodeId, u32, u32, &[u8]), NetError> {
    if fragment.len() < L1_HEADER_LEN {
        return Err(NetError::MalformedFrame(format!(
            "fragment of {} bytes is shorter than the header",
            fragment.len()
        )));
    }
    let word = |i: usize| {
        u32::from_be_bytes([fragment[i], fragment[i + 1], fragment[i + 2], fragment[i + 3]])
    };
    Ok((
        word(0),
        NodeId::new(word(4)),
        word(8),
        word(12),
        &fragment[L1_HEADER_LEN..],
    ))
}

fn encode_frame(fragments: &[Vec<u8>]) -> Vec<u8> {
    let body: usize = fragments.iter().map(|f| 4 + f.len()).sum();
    let mut buf = Vec::with_capacity(4 + body);
    buf.extend_from_slice(&(fragments.len() as u32).to_be_bytes());
    for fragment in fragments {
        buf.extend_from_slice(&(fragment.len() as u32).to_be_bytes());
        buf.extend_from_slice(fragment);
    }
    buf
}

fn decode_frame(frame: &[u8]) -> Result<Vec<&[u8]>, NetError> {
    if frame.len() < 4 {
        return Err(NetError::MalformedFrame("frame shorter than count word".to_string()));
    }
    let count = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    // The count word is untrusted; never pre-allocate from it.
    let mut fragments = Vec::new();
    let mut at = 4;
    for _ in 0..count {
        if frame.len() < at + 4 {
            return Err(NetError::MalformedFrame("truncated fragment size".to_string()));
        }
        let len =
            u32::from_be_bytes([frame[at], frame[at + 1], frame[at + 2], frame[at + 3]]) as usize;
        at += 4;
        if frame.len() < at + len {
            return Err(NetError::MalformedFrame("truncated fragment body".to_string()));
        }
        fragments.push(&frame[at..at + len]);
        at += len;
    }
    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_env::EnvError;
    use proptest::prelude::*;

    struct CaptureDevice {
        mtu: usize,
        sent: Mutex<Vec<(Vec<u8>, Address)>>,
    }

    impl CaptureDevice {
        fn new(mtu: usize) -> Arc<Self> {
            Arc::new(Self {
                mtu,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn frames(&self) -> Vec<Vec<u8>> {
            self.sent.lock().unwrap().iter().map(|(f, _)| f.clone()).collect()
        }
    }

    impl Device for CaptureDevice {
        fn name(&self) -> &str {
            "capture"
        }

        fn can_send(&self, _address: &Address) -> bool {
            true
        }

        fn mtu(&self) -> usize {
            self.mtu
        }

        fn send(&self, frame: Vec<u8>, address: Address) -> Result<(), EnvError> {
            self.sent.lock().unwrap().push((frame, address));
            Ok(())
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_fragment_count_at_mtu_boundary() {
        let device = CaptureDevice::new(104);
        let l1 = Layer1::new(NodeId::new(1));
        l1.register_device(device.clone());

        // 1000 bytes at a 104-byte MTU: 100-byte chunks, 10 fragments.
        l1.send(&payload(1000), Address::Broadcast).unwrap();
        assert_eq!(device.frames().len(), 10);
    }

    #[test]
    fn test_reassembly_completes_on_final_fragment() {
        let sender_device = CaptureDevice::new(104);
        let sender = Layer1::new(NodeId::new(1));
        sender.register_device(sender_device.clone());
        let data = payload(1000);
        sender.send(&data, Address::Broadcast).unwrap();

        let receiver = Layer1::new(NodeId::new(2));
        let frames = sender_device.frames();
        let info = ReceivedInfo::default();

        for frame in &frames[..9] {
            let completed = receiver.process_frame(frame, &info, 0).unwrap();
            assert!(completed.is_empty());
        }
        assert_eq!(receiver.pending_collectors(), 1);

        let completed = receiver.process_frame(&frames[9], &info, 0).unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].payload, data);
        assert_eq!(completed[0].source, NodeId::new(1));
        assert_eq!(receiver.pending_collectors(), 0);
    }

    #[test]
    fn test_duplicates_and_any_order() {
        let sender_device = CaptureDevice::new(20);
        let sender = Layer1::new(NodeId::new(1));
        sender.register_device(sender_device.clone());
        let data = payload(100);
        sender.send(&data, Address::Broadcast).unwrap();

        let receiver = Layer1::new(NodeId::new(2));
        let mut frames = sender_device.frames();
        frames.reverse();
        // Duplicate every frame.
        let doubled: Vec<Vec<u8>> = frames.iter().flat_map(|f| [f.clone(), f.clone()]).collect();

        let info = ReceivedInfo::default();
        let mut completed = Vec::new();
        for frame in &doubled {
            completed.extend(receiver.process_frame(frame, &info, 0).unwrap());
        }
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].payload, data);
    }

    #[test]
    fn test_overlapping_fragments_do_not_fake_completion() {
        // A rebroadcaster with a different MTU re-chunks the same
        // (source, data id), so overlapping offsets are legitimate input.
        let receiver = Layer1::new(NodeId::new(2));
        let data = payload(100);
        let info = ReceivedInfo::default();
        let frag = |start: usize, end: usize| {
            encode_frame(&[encode_fragment(
                data.len() as u32,
                NodeId::new(1),
                1,
                start as u32,
                &data[start..end],
            )])
        };

        // [0, 60) and [10, 70) overlap by 50 bytes; [70, 100) is still
        // missing and must keep the collector incomplete.
        assert!(receiver.process_frame(&frag(0, 60), &info, 0).unwrap().is_empty());
        assert!(receiver.process_frame(&frag(10, 70), &info, 0).unwrap().is_empty());
        assert_eq!(receiver.pending_collectors(), 1);

        let completed = receiver.process_frame(&frag(60, 100), &info, 0).unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].payload, data);
    }

    #[test]
    fn test_ttl_evicts_stalled_collectors() {
        let sender_device = CaptureDevice::new(20);
        let sender = Layer1::new(NodeId::new(1));
        sender.register_device(sender_device.clone());
        sender.send(&payload(100), Address::Broadcast).unwrap();

        let receiver = Layer1::with_ttl(NodeId::new(2), 1_000);
        let frames = sender_device.frames();
        let info = ReceivedInfo::default();

        receiver.process_frame(&frames[0], &info, 0).unwrap();
        assert_eq!(receiver.pending_collectors(), 1);

        // A later unrelated frame triggers eviction of the stalled one.
        let other_device = CaptureDevice::new(20);
        let other = Layer1::new(NodeId::new(3));
        other.register_device(other_device.clone());
        other.send(&payload(8), Address::Broadcast).unwrap();
        receiver
            .process_frame(&other_device.frames()[0], &info, 5_000)
            .unwrap();
        assert_eq!(receiver.pending_collectors(), 0);

        // The late remainder of the first payload starts over.
        let completed = receiver.process_frame(&frames[1], &info, 5_001).unwrap();
        assert!(completed.is_empty());
    }

    #[test]
    fn test_own_echo_ignored() {
        let device = CaptureDevice::new(104);
        let l1 = Layer1::new(NodeId::new(1));
        l1.register_device(device.clone());
        l1.send(&payload(50), Address::Broadcast).unwrap();

        let info = ReceivedInfo::default();
        let completed = l1.process_frame(&device.frames()[0], &info, 0).unwrap();
        assert!(completed.is_empty());
        assert_eq!(l1.pending_collectors(), 0);
    }

    #[test]
    fn test_malformed_frames_rejected() {
        let receiver = Layer1::new(NodeId::new(2));
        let info = ReceivedInfo::default();
        assert!(receiver.process_frame(&[0, 0], &info, 0).is_err());
        // Count promises a fragment the frame does not carry.
        assert!(receiver.process_frame(&[0, 0, 0, 1], &info, 0).is_err());
        // Fragment shorter than the header.
        let frame = encode_frame(&[vec![1, 2, 3]]);
        assert!(receiver.process_frame(&frame, &info, 0).is_err());
    }

    proptest! {
        #[test]
        fn prop_reassembles_under_any_arrival_order(
            len in 1usize..600,
            mtu in 21usize..120,
            order in proptest::collection::vec(any::<usize>(), 0..40),
        ) {
            let device = CaptureDevice::new(mtu);
            let sender = Layer1::new(NodeId::new(1));
            sender.register_device(device.clone());
            let data = payload(len);
            sender.send(&data, Address::Broadcast).unwrap();

            let mut frames = device.frames();
            // Deterministic shuffle driven by the generated order.
            for (i, pick) in order.iter().enumerate() {
                if frames.len() > 1 {
                    let len = frames.len();
                    let j = pick % len;
                    frames.swap(i % len, j);
                }
            }

            let receiver = Layer1::new(NodeId::new(2));
            let info = ReceivedInfo::default();
            let mut completed = Vec::new();
            for frame in &frames {
                completed.extend(receiver.process_frame(frame, &info, 0).unwrap());
            }
            prop_assert_eq!(completed.len(), 1);
            prop_assert_eq!(&completed[0].payload, &data);
        }
    }
}
