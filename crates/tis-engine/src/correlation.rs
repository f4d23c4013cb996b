//! Request/reply correlation.
//!
//! The protocol has no sequence numbers. A reply is recognised only by its
//! opcode (from a fixed request→reply table) and, optionally, by its source
//! address. Two requests of the same opcode to the same device are therefore
//! indistinguishable: the oldest pending request takes the first reply. False
//! matches are possible when another controller on the bus issues the same
//! request at the same time.
//!
//! Each pending entry moves `Sent → Matched` when [`CorrelationTracker::try_match`]
//! pairs it with a frame, or `Sent → TimedOut` when its owner calls
//! [`CorrelationTracker::expire`] (or the sweep drops it).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::trace;

use tis_packet::{opcodes, Address, Frame};

use crate::config::AddressPolicy;

/// Identifier of a pending request.
pub type RequestId = u64;

/// Request→reply opcode pairs known to the engine.
pub const STANDARD_REPLY_PAIRS: &[(u16, u16)] = &[
    (opcodes::DEVICE_NAME_REQUEST, opcodes::DEVICE_NAME_RESPONSE),
    (opcodes::DISCOVERY_REQUEST, opcodes::DISCOVERY_RESPONSE),
    (opcodes::SYSTEM_STATUS, opcodes::SYSTEM_STATUS_RESPONSE),
    (opcodes::SCENE_CONTROL, opcodes::SCENE_RESPONSE),
    (opcodes::CHANNEL_CONTROL, opcodes::CHANNEL_FEEDBACK),
    (opcodes::CHANNEL_STATUS_REQUEST, opcodes::CHANNEL_STATUS_RESPONSE),
    (opcodes::CURTAIN_CONTROL, opcodes::CURTAIN_RESPONSE),
    (opcodes::CURTAIN_STATUS_REQUEST, opcodes::CURTAIN_STATUS_RESPONSE),
];

// ============================================================================
// Reply table
// ============================================================================

/// Maps a request opcode to the opcode of its reply.
#[derive(Debug, Clone)]
pub struct ReplyTable {
    pairs: HashMap<u16, u16>,
    adjacent_fallback: bool,
}

impl ReplyTable {
    /// Table holding [`STANDARD_REPLY_PAIRS`], with the adjacent fallback on.
    pub fn standard() -> Self {
        ReplyTable {
            pairs: STANDARD_REPLY_PAIRS.iter().copied().collect(),
            adjacent_fallback: true,
        }
    }

    /// Table with no pairs and no fallback: nothing ever matches.
    pub fn empty() -> Self {
        ReplyTable {
            pairs: HashMap::new(),
            adjacent_fallback: false,
        }
    }

    /// Add or replace a pair.
    pub fn with_pair(mut self, request: u16, reply: u16) -> Self {
        self.pairs.insert(request, reply);
        self
    }

    /// Accept `request + 1` as the reply for requests missing from the table.
    ///
    /// Most of the protocol follows this convention, but not all of it.
    pub fn with_adjacent_fallback(mut self, enabled: bool) -> Self {
        self.adjacent_fallback = enabled;
        self
    }

    /// Expected reply opcode for `request`.
    pub fn reply_for(&self, request: u16) -> Option<u16> {
        match self.pairs.get(&request) {
            Some(&reply) => Some(reply),
            None if self.adjacent_fallback => request.checked_add(1),
            None => None,
        }
    }

    /// True if `reply` answers `request`.
    pub fn is_reply(&self, request: u16, reply: u16) -> bool {
        self.reply_for(request) == Some(reply)
    }
}

impl Default for ReplyTable {
    fn default() -> Self {
        Self::standard()
    }
}

// ============================================================================
// Pending requests
// ============================================================================

/// Which sources may answer a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMatch {
    /// Only the request target.
    Exact,
    /// Any source.
    Any,
}

impl AddressMatch {
    /// Scope for a request to `target` under `policy`. Broadcast requests
    /// accept any source.
    pub fn for_target(target: Address, policy: AddressPolicy) -> Self {
        if target.is_broadcast() {
            return AddressMatch::Any;
        }
        match policy {
            AddressPolicy::Strict => AddressMatch::Exact,
            AddressPolicy::Any => AddressMatch::Any,
        }
    }
}

/// A request awaiting its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Tracker-assigned identifier.
    pub id: RequestId,
    /// Request opcode.
    pub opcode: u16,
    /// Request target.
    pub target: Address,
    /// Accepted reply sources.
    pub scope: AddressMatch,
    /// First send.
    pub sent_at: Instant,
    /// Most recent send.
    pub last_sent_at: Instant,
    /// Sends so far.
    pub attempts: u32,
}

impl PendingRequest {
    fn accepts(&self, frame: &Frame, replies: &ReplyTable) -> bool {
        if !replies.is_reply(self.opcode, frame.opcode) {
            return false;
        }
        match self.scope {
            AddressMatch::Any => true,
            AddressMatch::Exact => frame.source == self.target,
        }
    }
}

/// A request paired with its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedReply {
    /// Identifier of the request.
    pub id: RequestId,
    /// Request opcode.
    pub request_opcode: u16,
    /// Request target.
    pub target: Address,
    /// The reply.
    pub frame: Frame,
    /// Time from the first send to the reply.
    pub latency: Duration,
    /// Sends made before the reply arrived.
    pub attempts: u32,
}

struct Entry {
    request: PendingRequest,
    waiter: Option<oneshot::Sender<MatchedReply>>,
}

impl Entry {
    fn has_live_waiter(&self) -> bool {
        self.waiter
            .as_ref()
            .is_some_and(|waiter| !waiter.is_closed())
    }
}

// ============================================================================
// Tracker
// ============================================================================

/// The set of pending requests.
///
/// Shared by the receive loop (matching) and senders (registering,
/// expiring); every operation takes the lock for a single insert, lookup or
/// removal.
pub struct CorrelationTracker {
    replies: ReplyTable,
    next_id: AtomicU64,
    pending: Mutex<BTreeMap<RequestId, Entry>>,
}

impl CorrelationTracker {
    /// Create a tracker using `replies`.
    pub fn new(replies: ReplyTable) -> Self {
        CorrelationTracker {
            replies,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    /// The reply table in use.
    pub fn replies(&self) -> &ReplyTable {
        &self.replies
    }

    /// Record a sent request.
    pub fn register(&self, opcode: u16, target: Address, scope: AddressMatch) -> RequestId {
        self.insert(opcode, target, scope, None)
    }

    /// Record a sent request and get a receiver that fires when it matches.
    ///
    /// The receiver errors if the entry is expired without a match.
    pub fn register_waiter(
        &self,
        opcode: u16,
        target: Address,
        scope: AddressMatch,
    ) -> (RequestId, oneshot::Receiver<MatchedReply>) {
        let (tx, rx) = oneshot::channel();
        let id = self.insert(opcode, target, scope, Some(tx));
        (id, rx)
    }

    fn insert(
        &self,
        opcode: u16,
        target: Address,
        scope: AddressMatch,
        waiter: Option<oneshot::Sender<MatchedReply>>,
    ) -> RequestId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let request = PendingRequest {
            id,
            opcode,
            target,
            scope,
            sent_at: now,
            last_sent_at: now,
            attempts: 1,
        };
        self.pending.lock().insert(id, Entry { request, waiter });
        trace!("pending #{} 0x{:04X} -> {}", id, opcode, target);
        id
    }

    /// Note a re-send of request `id`. Returns the new attempt count, or
    /// `None` if the request is no longer pending.
    pub fn record_retry(&self, id: RequestId) -> Option<u32> {
        let mut pending = self.pending.lock();
        let entry = pending.get_mut(&id)?;
        entry.request.attempts += 1;
        entry.request.last_sent_at = Instant::now();
        Some(entry.request.attempts)
    }

    /// Pair `frame` with the oldest pending request it answers.
    ///
    /// The matched entry is removed and its waiter, if any, notified.
    pub fn try_match(&self, frame: &Frame) -> Option<MatchedReply> {
        let mut pending = self.pending.lock();
        let id = pending
            .values()
            .find(|entry| entry.request.accepts(frame, &self.replies))
            .map(|entry| entry.request.id)?;
        let entry = pending.remove(&id)?;
        drop(pending);

        let request = entry.request;
        let reply = MatchedReply {
            id,
            request_opcode: request.opcode,
            target: request.target,
            frame: frame.clone(),
            latency: Instant::now().saturating_duration_since(request.sent_at),
            attempts: request.attempts,
        };
        if let Some(waiter) = entry.waiter {
            // The caller may have given up already.
            let _ = waiter.send(reply.clone());
        }
        Some(reply)
    }

    /// Drop request `id` without a match.
    pub fn expire(&self, id: RequestId) -> Option<PendingRequest> {
        self.pending.lock().remove(&id).map(|entry| entry.request)
    }

    /// Drop every request whose last send is older than `max_age`.
    ///
    /// Requests with a caller still waiting on them are kept; the caller
    /// owns their deadline and expires them itself.
    pub fn expire_older_than(&self, max_age: Duration) -> Vec<PendingRequest> {
        let now = Instant::now();
        let mut pending = self.pending.lock();
        let stale: Vec<RequestId> = pending
            .values()
            .filter(|entry| !entry.has_live_waiter())
            .filter(|entry| now.saturating_duration_since(entry.request.last_sent_at) > max_age)
            .map(|entry| entry.request.id)
            .collect();
        stale
            .into_iter()
            .filter_map(|id| pending.remove(&id))
            .map(|entry| entry.request)
            .collect()
    }

    /// Number of pending requests.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Snapshot of the pending requests, oldest first.
    pub fn pending(&self) -> Vec<PendingRequest> {
        self.pending
            .lock()
            .values()
            .map(|entry| entry.request.clone())
            .collect()
    }
}

impl Default for CorrelationTracker {
    fn default() -> Self {
        Self::new(ReplyTable::standard())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tis_packet::{decode_frame, Identity};

    const LIGHT: Address = Address::new(1, 10);

    fn reply(source: Address, opcode: u16) -> Frame {
        let msg = Identity::new(source, 0x0258).raw(Address::new(1, 254), opcode, vec![1, 0xF8, 100]);
        decode_frame(&msg.encode().unwrap()).unwrap()
    }

    #[test]
    fn test_reply_table() {
        let table = ReplyTable::standard();
        assert!(table.is_reply(0x0031, 0x0032));
        assert!(table.is_reply(0xF003, 0xF004));
        assert!(table.is_reply(0x0033, 0x0034));
        assert!(table.is_reply(0xDA44, 0xDA45));
        // Echo of the request is not a reply.
        assert!(!table.is_reply(0x0031, 0x0031));
        // Adjacent fallback for unlisted codes.
        assert!(table.is_reply(0x2010, 0x2011));
        assert_eq!(table.reply_for(0xFFFF), None);

        let strict = ReplyTable::standard().with_adjacent_fallback(false);
        assert!(!strict.is_reply(0x2010, 0x2011));
        assert!(strict.is_reply(0x0031, 0x0032));

        let custom = ReplyTable::empty().with_pair(0x1234, 0x9999);
        assert!(custom.is_reply(0x1234, 0x9999));
        assert!(!custom.is_reply(0x0031, 0x0032));
    }

    #[test]
    fn test_scope_for_target() {
        assert_eq!(
            AddressMatch::for_target(Address::BROADCAST, AddressPolicy::Strict),
            AddressMatch::Any
        );
        assert_eq!(
            AddressMatch::for_target(LIGHT, AddressPolicy::Strict),
            AddressMatch::Exact
        );
        assert_eq!(
            AddressMatch::for_target(LIGHT, AddressPolicy::Any),
            AddressMatch::Any
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_records_latency() {
        let tracker = CorrelationTracker::default();
        let id = tracker.register(0x0031, LIGHT, AddressMatch::Exact);
        assert_eq!(tracker.pending_count(), 1);

        tokio::time::advance(Duration::from_millis(250)).await;
        let matched = tracker.try_match(&reply(LIGHT, 0x0032)).unwrap();
        assert_eq!(matched.id, id);
        assert_eq!(matched.request_opcode, 0x0031);
        assert_eq!(matched.latency, Duration::from_millis(250));
        assert_eq!(matched.attempts, 1);
        assert_eq!(tracker.pending_count(), 0);

        // A second identical reply is unsolicited.
        assert!(tracker.try_match(&reply(LIGHT, 0x0032)).is_none());
    }

    #[test]
    fn test_exact_scope_rejects_other_sources() {
        let tracker = CorrelationTracker::default();
        tracker.register(0x0031, LIGHT, AddressMatch::Exact);
        assert!(tracker.try_match(&reply(Address::new(1, 11), 0x0032)).is_none());
        assert!(tracker.try_match(&reply(LIGHT, 0x0034)).is_none());
        assert_eq!(tracker.pending_count(), 1);
    }

    #[test]
    fn test_broadcast_accepts_any_source() {
        let tracker = CorrelationTracker::default();
        tracker.register(0xF003, Address::BROADCAST, AddressMatch::Any);
        let matched = tracker.try_match(&reply(Address::new(3, 7), 0xF004)).unwrap();
        assert_eq!(matched.frame.source, Address::new(3, 7));
    }

    #[test]
    fn test_oldest_pending_wins() {
        let tracker = CorrelationTracker::default();
        let first = tracker.register(0x0031, LIGHT, AddressMatch::Exact);
        let second = tracker.register(0x0031, LIGHT, AddressMatch::Exact);

        assert_eq!(tracker.try_match(&reply(LIGHT, 0x0032)).unwrap().id, first);
        assert_eq!(tracker.try_match(&reply(LIGHT, 0x0032)).unwrap().id, second);
    }

    #[tokio::test]
    async fn test_waiter_notified_on_match() {
        let tracker = CorrelationTracker::default();
        let (id, rx) = tracker.register_waiter(0x000E, LIGHT, AddressMatch::Exact);
        tracker.try_match(&reply(LIGHT, 0x000F));
        let matched = rx.await.unwrap();
        assert_eq!(matched.id, id);
    }

    #[tokio::test]
    async fn test_expired_waiter_errors() {
        let tracker = CorrelationTracker::default();
        let (id, rx) = tracker.register_waiter(0x000E, LIGHT, AddressMatch::Exact);
        let expired = tracker.expire(id).unwrap();
        assert_eq!(expired.opcode, 0x000E);
        assert!(rx.await.is_err());
        assert!(tracker.expire(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_and_sweep() {
        let tracker = CorrelationTracker::default();
        let old = tracker.register(0x0031, LIGHT, AddressMatch::Exact);
        let fresh = tracker.register(0x0033, LIGHT, AddressMatch::Exact);

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(tracker.record_retry(fresh), Some(2));
        tokio::time::advance(Duration::from_secs(15)).await;

        let swept = tracker.expire_older_than(Duration::from_secs(30));
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].id, old);

        let remaining = tracker.pending();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, fresh);
        assert_eq!(remaining[0].attempts, 2);
        assert_eq!(tracker.record_retry(old), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_awaited_requests() {
        let tracker = CorrelationTracker::default();
        let (awaited, _rx) = tracker.register_waiter(0x0033, LIGHT, AddressMatch::Exact);
        let (abandoned, rx) = tracker.register_waiter(0x000E, LIGHT, AddressMatch::Exact);
        drop(rx);

        tokio::time::advance(Duration::from_secs(60)).await;
        let swept = tracker.expire_older_than(Duration::from_secs(30));
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].id, abandoned);
        assert_eq!(tracker.pending()[0].id, awaited);
    }
}
