//! `SafeStream` (C7, spec §4.7): the end-to-end reliable, ordered datagram
//! protocol between two UIDs, layered above whatever unreliable,
//! duplicate-prone path the cloud's mailbox provides.
//!
//! This crate is the pure, sans-IO half of the protocol (spec §9 "Action
//! processor", §5 "Scheduling model"): [`SafeStream`] never touches a
//! socket. Callers feed it inbound [`aether_proto::SafeFrame`]s and poll it
//! with `update(now)`; it hands back outbound frames to send, completed
//! writes, and reassembled messages to deliver. `aether-client` is the one
//! driving it from a live `CloudConnections`.

mod seq;

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;
use thiserror::Error;

use aether_proto::{SafeFrame, SafeStreamConfig};

/// Identifies one `write()` call so its eventual completion can be matched
/// back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(u64);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SafeStreamError {
    #[error("local back-pressure: send buffer is full")]
    BufferFull,
    #[error("peer unreachable: retransmits exhausted")]
    PeerUnreachable,
    #[error("write was cancelled")]
    Cancelled,
}

/// Terminal status of one `write()` (spec §7: "a write returns a handle
/// whose terminal status is one of Sent | Failed{kind} | Stopped").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Sent,
    Failed(SafeStreamError),
    Stopped,
}

/// `StreamInfo` (spec §3): link-independent parts only — `link_state` is
/// derived from the underlying `CloudConnections` by the caller and fed in
/// via [`SafeStream::set_link_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Linked,
    Unlinked,
    LinkError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub link_state: LinkState,
    pub is_writable: bool,
    pub is_reliable: bool,
    pub max_element_size: usize,
    pub rec_element_size: usize,
}

struct UnackedFragment {
    message_id: u64,
    offset: u16,
    total: u16,
    bytes: Bytes,
    deadline: Instant,
    repeats: u8,
}

struct BufferedFragment {
    message_id: u64,
    offset: u16,
    total: u16,
    bytes: Bytes,
}

struct PendingMessage {
    remaining_fragments: u16,
    failed: bool,
}

/// Sender-side: next sequence to assign, the in-flight window, and
/// fragments waiting for window space (spec §4.7 "Sender state").
#[derive(Default)]
struct SenderState {
    next_seq: u16,
    unacked: BTreeMap<u16, UnackedFragment>,
    buffered: VecDeque<BufferedFragment>,
    pending_messages: BTreeMap<u64, PendingMessage>,
    next_message_id: u64,
}

/// Receiver-side: next contiguous sequence expected, stored out-of-order
/// fragments within the window, and the in-progress reassembly (spec §4.7
/// "Receiver state").
struct ReceiverState {
    expected_seq: u16,
    stored: BTreeMap<u16, (u16, u16, Bytes)>,
    reassembling: Option<Vec<u8>>,
    last_ack_sent: Option<(u16, u16)>,
    ack_dirty: bool,
    next_ack_deadline: Option<Instant>,
}

impl Default for ReceiverState {
    fn default() -> Self {
        ReceiverState {
            expected_seq: 0,
            stored: BTreeMap::new(),
            reassembling: None,
            last_ack_sent: None,
            ack_dirty: false,
            next_ack_deadline: None,
        }
    }
}

/// The reliable ordered datagram protocol for one (local UID, peer UID)
/// pair, in one direction pair combined (spec §4.7): writes go out as
/// `SafeFrame::Data`, acks/nacks flow back, duplicates are suppressed and
/// partial messages never surface.
pub struct SafeStream {
    config: SafeStreamConfig,
    sender: SenderState,
    receiver: ReceiverState,
    outgoing: VecDeque<SafeFrame>,
    completions: VecDeque<(MessageId, WriteOutcome)>,
    delivered: VecDeque<Bytes>,
    link_state: LinkState,
    stopped: bool,
}

impl SafeStream {
    pub fn new(config: SafeStreamConfig) -> Result<Self, &'static str> {
        config.validate()?;
        Ok(SafeStream {
            config,
            sender: SenderState::default(),
            receiver: ReceiverState::default(),
            outgoing: VecDeque::new(),
            completions: VecDeque::new(),
            delivered: VecDeque::new(),
            link_state: LinkState::Unlinked,
            stopped: false,
        })
    }

    pub fn set_link_state(&mut self, state: LinkState) {
        self.link_state = state;
    }

    pub fn info(&self) -> StreamInfo {
        StreamInfo {
            link_state: self.link_state,
            is_writable: !self.send_buffer_full(),
            is_reliable: true,
            max_element_size: self.config.max_payload as usize * self.config.window_size as usize,
            rec_element_size: self.config.max_payload as usize,
        }
    }

    fn send_buffer_full(&self) -> bool {
        self.sender.unacked.len() + self.sender.buffered.len() >= self.config.buffer_capacity as usize
    }

    /// Fragments `bytes` per `max_payload` and admits it into the sliding
    /// window (or the overflow buffer), returning synchronously on
    /// back-pressure (spec §4.7 steps 1-3, §7 "BufferFull ... returned
    /// synchronously at the write call").
    pub fn write(&mut self, bytes: Bytes, now: Instant) -> Result<MessageId, SafeStreamError> {
        let fragments = fragment(&bytes, self.config.max_payload as usize);
        let total = fragments.len() as u16;

        if self.sender.unacked.len() + self.sender.buffered.len() + fragments.len()
            > self.config.buffer_capacity as usize
        {
            return Err(SafeStreamError::BufferFull);
        }

        let message_id = self.sender.next_message_id;
        self.sender.next_message_id += 1;

        for (offset, chunk) in fragments.into_iter().enumerate() {
            let offset = offset as u16;
            if self.sender.unacked.len() < self.config.window_size as usize {
                self.send_fragment(message_id, offset, total, chunk, now);
            } else {
                self.sender.buffered.push_back(BufferedFragment { message_id, offset, total, bytes: chunk });
            }
        }
        self.sender
            .pending_messages
            .insert(message_id, PendingMessage { remaining_fragments: total, failed: false });
        Ok(MessageId(message_id))
    }

    fn send_fragment(&mut self, message_id: u64, offset: u16, total: u16, bytes: Bytes, now: Instant) {
        let seq = self.sender.next_seq;
        self.sender.next_seq = self.sender.next_seq.wrapping_add(1);
        let deadline = now + Duration::from_millis(self.config.send_repeat_timeout_ms);
        self.outgoing.push_back(SafeFrame::Data { seq, offset, total, bytes: bytes.clone() });
        self.sender
            .unacked
            .insert(seq, UnackedFragment { message_id, offset, total, bytes, deadline, repeats: 0 });
    }

    fn pull_buffered_into_window(&mut self, now: Instant) {
        while self.sender.unacked.len() < self.config.window_size as usize {
            let Some(frag) = self.sender.buffered.pop_front() else { break };
            self.send_fragment(frag.message_id, frag.offset, frag.total, frag.bytes, now);
        }
    }

    fn ack_fragment(&mut self, seq: u16) {
        if let Some(frag) = self.sender.unacked.remove(&seq) {
            self.complete_fragment(frag.message_id);
        }
    }

    fn complete_fragment(&mut self, message_id: u64) {
        let done = if let Some(pending) = self.sender.pending_messages.get_mut(&message_id) {
            pending.remaining_fragments = pending.remaining_fragments.saturating_sub(1);
            !pending.failed && pending.remaining_fragments == 0
        } else {
            false
        };
        if done {
            self.sender.pending_messages.remove(&message_id);
            self.completions.push_back((MessageId(message_id), WriteOutcome::Sent));
        }
    }

    fn fail_message(&mut self, message_id: u64) {
        if let Some(pending) = self.sender.pending_messages.get(&message_id) {
            if pending.failed {
                return;
            }
        } else {
            return;
        }
        self.sender.pending_messages.remove(&message_id);
        self.sender.unacked.retain(|_, frag| frag.message_id != message_id);
        self.sender.buffered.retain(|frag| frag.message_id != message_id);
        self.completions
            .push_back((MessageId(message_id), WriteOutcome::Failed(SafeStreamError::PeerUnreachable)));
    }

    /// Feeds one inbound `SafeFrame` (already decoded from the peer's
    /// `send_message_event` payload).
    pub fn on_frame(&mut self, frame: SafeFrame, now: Instant) {
        match frame {
            SafeFrame::Data { seq, offset, total, bytes } => self.on_data(seq, offset, total, bytes, now),
            SafeFrame::Ack { seq_first, seq_last } => self.on_ack(seq_first, seq_last, now),
            SafeFrame::Nack { seq } => self.on_nack(seq, now),
            SafeFrame::Init { initial_seq } => self.on_init(initial_seq),
        }
    }

    fn on_data(&mut self, seq: u16, offset: u16, total: u16, bytes: Bytes, now: Instant) {
        let window = self.config.window_size;
        if !seq::in_window(seq, self.receiver.expected_seq, window) {
            // Either a duplicate already delivered or beyond the window;
            // either way re-announce the last contiguous range (spec §4.7
            // receiver step 1/2: "drop, send ACK of last contiguous
            // accepted range").
            self.mark_ack_dirty(now);
            return;
        }
        if self.receiver.stored.contains_key(&seq) {
            self.mark_ack_dirty(now);
            return;
        }
        self.receiver.stored.insert(seq, (offset, total, bytes));
        if seq == self.receiver.expected_seq {
            self.advance_and_deliver();
        }
        self.mark_ack_dirty(now);
    }

    fn advance_and_deliver(&mut self) {
        while let Some((offset, total, bytes)) = self.receiver.stored.remove(&self.receiver.expected_seq) {
            if offset == 0 {
                self.receiver.reassembling = Some(Vec::new());
            }
            if let Some(buf) = self.receiver.reassembling.as_mut() {
                buf.extend_from_slice(&bytes);
            }
            if offset + 1 == total {
                if let Some(buf) = self.receiver.reassembling.take() {
                    self.delivered.push_back(Bytes::from(buf));
                }
            }
            self.receiver.expected_seq = self.receiver.expected_seq.wrapping_add(1);
        }
    }

    fn on_ack(&mut self, seq_first: u16, seq_last: u16, now: Instant) {
        let mut seq = seq_first;
        loop {
            self.ack_fragment(seq);
            if seq == seq_last {
                break;
            }
            seq = seq.wrapping_add(1);
        }
        self.pull_buffered_into_window(now);
    }

    fn on_nack(&mut self, seq: u16, now: Instant) {
        if let Some(frag) = self.sender.unacked.get_mut(&seq) {
            frag.deadline = now + Duration::from_millis(self.config.send_repeat_timeout_ms);
            frag.repeats += 1;
            self.outgoing.push_back(SafeFrame::Data {
                seq,
                offset: frag.offset,
                total: frag.total,
                bytes: frag.bytes.clone(),
            });
        }
    }

    fn on_init(&mut self, initial_seq: u16) {
        self.receiver.expected_seq = initial_seq;
        self.receiver.stored.clear();
        self.receiver.reassembling = None;
        self.receiver.last_ack_sent = None;
    }

    fn mark_ack_dirty(&mut self, now: Instant) {
        self.receiver.ack_dirty = true;
        if self.config.send_confirm_delay_ms == 0 {
            self.flush_ack();
        } else if self.receiver.next_ack_deadline.is_none() {
            self.receiver.next_ack_deadline = Some(now + Duration::from_millis(self.config.send_confirm_delay_ms));
        }
    }

    fn flush_ack(&mut self) {
        if !self.receiver.ack_dirty {
            return;
        }
        // last contiguous accepted seq is expected_seq - 1; announce
        // everything from the previous ack's tail (or expected_seq itself
        // if nothing has ever been acked) through there.
        let seq_last = self.receiver.expected_seq.wrapping_sub(1);
        let seq_first = match self.receiver.last_ack_sent {
            Some((_, prev_last)) => prev_last.wrapping_add(1),
            None => self.receiver.expected_seq.wrapping_sub(1),
        };
        if self.receiver.expected_seq == 0 && self.receiver.last_ack_sent.is_none() {
            // nothing contiguous has ever been accepted
            self.receiver.ack_dirty = false;
            self.receiver.next_ack_deadline = None;
            return;
        }
        self.outgoing.push_back(SafeFrame::Ack { seq_first, seq_last });
        self.receiver.last_ack_sent = Some((seq_first, seq_last));
        self.receiver.ack_dirty = false;
        self.receiver.next_ack_deadline = None;
    }

    /// Advances retransmit timers and flushes any coalesced ack whose
    /// timer elapsed (spec §4.7 "periodic tick").
    pub fn update(&mut self, now: Instant) {
        if self.stopped {
            return;
        }
        let mut timed_out = Vec::new();
        for (seq, frag) in self.sender.unacked.iter_mut() {
            if frag.deadline <= now {
                if frag.repeats >= self.config.max_repeat_count {
                    timed_out.push((*seq, frag.message_id));
                } else {
                    frag.repeats += 1;
                    frag.deadline = now + Duration::from_millis(self.config.send_repeat_timeout_ms);
                    self.outgoing.push_back(SafeFrame::Data {
                        seq: *seq,
                        offset: frag.offset,
                        total: frag.total,
                        bytes: frag.bytes.clone(),
                    });
                }
            }
        }
        for (seq, message_id) in timed_out {
            self.sender.unacked.remove(&seq);
            self.fail_message(message_id);
        }
        self.pull_buffered_into_window(now);

        if let Some(deadline) = self.receiver.next_ack_deadline {
            if deadline <= now {
                self.flush_ack();
            }
        }
    }

    /// Cooperative cancellation (spec §5): outstanding writes complete
    /// `Stopped` rather than `Sent`/`Failed`.
    pub fn stop(&mut self) {
        self.stopped = true;
        for (_, pending) in self.sender.pending_messages.iter() {
            let _ = pending;
        }
        let ids: Vec<u64> = self.sender.pending_messages.keys().copied().collect();
        for id in ids {
            self.completions.push_back((MessageId(id), WriteOutcome::Stopped));
        }
        self.sender.pending_messages.clear();
        self.sender.unacked.clear();
        self.sender.buffered.clear();
    }

    pub fn drain_outgoing(&mut self) -> Vec<SafeFrame> {
        self.outgoing.drain(..).collect()
    }

    pub fn drain_completions(&mut self) -> Vec<(MessageId, WriteOutcome)> {
        self.completions.drain(..).collect()
    }

    pub fn drain_delivered(&mut self) -> Vec<Bytes> {
        self.delivered.drain(..).collect()
    }
}

/// Splits `bytes` into `ceil(len / max_payload)` chunks, at least one
/// (possibly empty) chunk so a zero-length message still has a fragment to
/// carry `total=1` (spec §4.7, §8 boundary behaviors).
fn fragment(bytes: &Bytes, max_payload: usize) -> Vec<Bytes> {
    if bytes.is_empty() {
        return vec![Bytes::new()];
    }
    let mut out = Vec::with_capacity(bytes.len().div_ceil(max_payload));
    let mut offset = 0;
    while offset < bytes.len() {
        let end = (offset + max_payload).min(bytes.len());
        out.push(bytes.slice(offset..end));
        offset = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_payload: u16, window_size: u16, buffer_capacity: u16) -> SafeStreamConfig {
        SafeStreamConfig {
            buffer_capacity,
            window_size,
            max_payload,
            max_repeat_count: 3,
            wait_confirm_timeout_ms: 20_000,
            send_confirm_delay_ms: 0,
            send_repeat_timeout_ms: 100,
        }
    }

    #[test]
    fn exact_max_payload_write_produces_one_fragment() {
        let mut s = SafeStream::new(config(5, 8, 32)).unwrap();
        let now = Instant::now();
        s.write(Bytes::from_static(b"hello"), now).unwrap();
        let out = s.drain_outgoing();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], SafeFrame::Data { seq: 0, offset: 0, total: 1, bytes: Bytes::from_static(b"hello") });
    }

    #[test]
    fn one_byte_over_max_payload_produces_two_fragments_sharing_message() {
        let mut s = SafeStream::new(config(4, 8, 32)).unwrap();
        let now = Instant::now();
        s.write(Bytes::from_static(b"ABCDEFG"), now).unwrap();
        let out = s.drain_outgoing();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], SafeFrame::Data { seq: 0, offset: 0, total: 2, bytes: Bytes::from_static(b"ABCD") });
        assert_eq!(out[1], SafeFrame::Data { seq: 1, offset: 1, total: 2, bytes: Bytes::from_static(b"EFG") });
    }

    #[test]
    fn scenario_a_single_message_round_trip() {
        let mut sender = SafeStream::new(config(1024, 64, 4096)).unwrap();
        let mut receiver = SafeStream::new(config(1024, 64, 4096)).unwrap();
        let now = Instant::now();

        sender.write(Bytes::from_static(b"hello"), now).unwrap();
        let frames = sender.drain_outgoing();
        assert_eq!(frames.len(), 1);

        for f in frames {
            receiver.on_frame(f, now);
        }
        assert_eq!(receiver.drain_delivered(), vec![Bytes::from_static(b"hello")]);

        let acks = receiver.drain_outgoing();
        assert_eq!(acks, vec![SafeFrame::Ack { seq_first: 0, seq_last: 0 }]);
        for a in acks {
            sender.on_frame(a, now);
        }
        let completions = sender.drain_completions();
        assert_eq!(completions, vec![(MessageId(0), WriteOutcome::Sent)]);
    }

    #[test]
    fn scenario_b_fragmented_message_reassembles_atomically() {
        let mut sender = SafeStream::new(config(4, 64, 4096)).unwrap();
        let mut receiver = SafeStream::new(config(4, 64, 4096)).unwrap();
        let now = Instant::now();

        sender.write(Bytes::from_static(b"ABCDEFG"), now).unwrap();
        let frames = sender.drain_outgoing();
        for f in frames {
            receiver.on_frame(f, now);
        }
        assert_eq!(receiver.drain_delivered(), vec![Bytes::from_static(b"ABCDEFG")]);
        assert_eq!(receiver.drain_outgoing(), vec![SafeFrame::Ack { seq_first: 0, seq_last: 1 }]);
    }

    #[test]
    fn scenario_c_out_of_order_delivery_buffers_until_contiguous() {
        let mut receiver = SafeStream::new(config(4, 64, 4096)).unwrap();
        let now = Instant::now();

        receiver.on_frame(SafeFrame::Data { seq: 1, offset: 1, total: 2, bytes: Bytes::from_static(b"EFG") }, now);
        assert!(receiver.drain_delivered().is_empty());

        receiver.on_frame(SafeFrame::Data { seq: 0, offset: 0, total: 2, bytes: Bytes::from_static(b"ABCD") }, now);
        assert_eq!(receiver.drain_delivered(), vec![Bytes::from_static(b"ABCDEFG")]);
    }

    #[test]
    fn scenario_d_retransmit_then_peer_unreachable() {
        let cfg = SafeStreamConfig {
            send_repeat_timeout_ms: 100,
            max_repeat_count: 3,
            ..config(1024, 64, 4096)
        };
        let mut sender = SafeStream::new(cfg).unwrap();
        let mut now = Instant::now();
        sender.write(Bytes::from_static(b"hi"), now).unwrap();
        assert_eq!(sender.drain_outgoing().len(), 1);

        // 3 retransmits happen, each consuming the fragment's outgoing slot.
        for _ in 0..3 {
            now += Duration::from_millis(100);
            sender.update(now);
            assert_eq!(sender.drain_outgoing().len(), 1);
            assert!(sender.drain_completions().is_empty());
        }
        // the 4th timeout (repeats already at max) fails the write.
        now += Duration::from_millis(100);
        sender.update(now);
        assert!(sender.drain_outgoing().is_empty());
        assert_eq!(
            sender.drain_completions(),
            vec![(MessageId(0), WriteOutcome::Failed(SafeStreamError::PeerUnreachable))]
        );
    }

    #[test]
    fn duplicate_data_is_delivered_once_and_acked_once() {
        let mut receiver = SafeStream::new(config(1024, 64, 4096)).unwrap();
        let now = Instant::now();
        let frame = SafeFrame::Data { seq: 0, offset: 0, total: 1, bytes: Bytes::from_static(b"x") };
        receiver.on_frame(frame.clone(), now);
        receiver.drain_delivered();
        receiver.drain_outgoing();

        receiver.on_frame(frame, now);
        assert!(receiver.drain_delivered().is_empty());
        assert_eq!(receiver.drain_outgoing(), vec![SafeFrame::Ack { seq_first: 0, seq_last: 0 }]);
    }

    #[test]
    fn window_full_buffers_then_buffer_capacity_rejects() {
        let mut sender = SafeStream::new(config(1, 2, 3)).unwrap();
        let now = Instant::now();
        sender.write(Bytes::from_static(b"a"), now).unwrap();
        sender.write(Bytes::from_static(b"b"), now).unwrap();
        // both fit in the window (2 fragments of 1 byte each)
        assert_eq!(sender.drain_outgoing().len(), 2);
        // third fits in the buffer (1 slot left out of capacity 3)
        sender.write(Bytes::from_static(b"c"), now).unwrap();
        assert!(sender.drain_outgoing().is_empty());
        // fourth overflows buffer_capacity
        assert_eq!(sender.write(Bytes::from_static(b"d"), now), Err(SafeStreamError::BufferFull));
    }

    #[test]
    fn replica_ack_slides_window_and_releases_buffered_fragment() {
        let mut sender = SafeStream::new(config(1, 1, 4)).unwrap();
        let now = Instant::now();
        sender.write(Bytes::from_static(b"a"), now).unwrap();
        sender.write(Bytes::from_static(b"b"), now).unwrap();
        assert_eq!(sender.drain_outgoing().len(), 1); // only "a" fit the window

        sender.on_frame(SafeFrame::Ack { seq_first: 0, seq_last: 0 }, now);
        assert_eq!(sender.drain_completions(), vec![(MessageId(0), WriteOutcome::Sent)]);
        let out = sender.drain_outgoing();
        assert_eq!(out, vec![SafeFrame::Data { seq: 1, offset: 0, total: 1, bytes: Bytes::from_static(b"b") }]);
    }
}
