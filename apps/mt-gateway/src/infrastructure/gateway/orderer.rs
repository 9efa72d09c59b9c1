//! Packet Orderer (C1).
//!
//! Restores per-account monotone `sequenceNumber` ordering across a
//! transport with at-least-once, possibly-reordered delivery (§4.1).

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use crate::domain::SynchronizationPacket;

struct AccountQueue {
    expected: Option<u64>,
    buffer: BTreeMap<u64, SynchronizationPacket>,
    last_receive: Instant,
}

impl AccountQueue {
    fn new(now: Instant) -> Self {
        Self {
            expected: None,
            buffer: BTreeMap::new(),
            last_receive: now,
        }
    }
}

/// Result of feeding one packet through the orderer.
pub struct IngestResult {
    /// Packets newly ready for dispatch, in ascending sequence order.
    pub ready: Vec<SynchronizationPacket>,
}

/// Result of a periodic timeout sweep (§4.1 rule 6).
pub struct OutOfOrderEvent {
    /// The account whose gap timed out.
    pub account_id: String,
    /// Buffered packets flushed in sequence order, after giving up on
    /// the missing gap.
    pub flushed: Vec<SynchronizationPacket>,
}

/// Per-account sequence-number reassembly buffer.
pub struct PacketOrderer {
    timeout: Duration,
    accounts: HashMap<String, AccountQueue>,
}

impl PacketOrderer {
    /// Create an orderer that gives up on a gap after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            accounts: HashMap::new(),
        }
    }

    /// Feed one packet through the orderer (§4.1 rules 1-3, 5, 7).
    pub fn ingest(&mut self, packet: SynchronizationPacket, now: Instant) -> IngestResult {
        let Some(seq) = packet.sequence_number() else {
            return IngestResult {
                ready: vec![packet],
            };
        };

        let account_id = packet.account_id().to_string();
        let queue = self
            .accounts
            .entry(account_id)
            .or_insert_with(|| AccountQueue::new(now));
        queue.last_receive = now;

        if matches!(packet, SynchronizationPacket::SynchronizationStarted { .. }) {
            queue.buffer.retain(|&buffered_seq, _| buffered_seq > seq);
            queue.expected = Some(seq + 1);
            let mut ready = vec![packet];
            ready.extend(Self::drain_contiguous(queue));
            return IngestResult { ready };
        }

        let expected = *queue.expected.get_or_insert(seq);

        match seq.cmp(&expected) {
            std::cmp::Ordering::Less => IngestResult { ready: vec![] },
            std::cmp::Ordering::Equal => {
                let mut ready = vec![packet];
                queue.expected = Some(seq + 1);
                ready.extend(Self::drain_contiguous(queue));
                IngestResult { ready }
            }
            std::cmp::Ordering::Greater => {
                queue.buffer.insert(seq, packet);
                IngestResult { ready: vec![] }
            }
        }
    }

    /// Drain the contiguous run starting at `queue.expected`.
    fn drain_contiguous(queue: &mut AccountQueue) -> Vec<SynchronizationPacket> {
        let mut drained = Vec::new();
        while let Some(expected) = queue.expected {
            let Some(packet) = queue.buffer.remove(&expected) else {
                break;
            };
            queue.expected = Some(expected + 1);
            drained.push(packet);
        }
        drained
    }

    /// Sweep every account for a stalled gap and, for any that have
    /// exceeded `packetOrderingTimeout` since their last packet,
    /// flush the buffer and reset (§4.1 rule 6).
    pub fn check_timeouts(&mut self, now: Instant) -> Vec<OutOfOrderEvent> {
        let mut events = Vec::new();
        for (account_id, queue) in &mut self.accounts {
            if queue.buffer.is_empty() {
                continue;
            }
            if now.duration_since(queue.last_receive) < self.timeout {
                continue;
            }
            let flushed: Vec<SynchronizationPacket> =
                queue.buffer.iter().map(|(_, p)| p.clone()).collect();
            queue.buffer.clear();
            queue.expected = flushed
                .last()
                .and_then(SynchronizationPacket::sequence_number)
                .map(|seq| seq + 1);
            queue.last_receive = now;
            events.push(OutOfOrderEvent {
                account_id: account_id.clone(),
                flushed,
            });
        }
        events
    }

    /// Drop all state for an account, e.g. on explicit removal.
    pub fn remove_account(&mut self, account_id: &str) {
        self.accounts.remove(account_id);
    }
}
