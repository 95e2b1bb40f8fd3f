//! Server-side sender engine: pipelined send, retransmit-on-timeout, and the
//! terminal linger handshake. Pure state machine — no socket I/O. Callers
//! drain encoded packets via [`Sender::drain_output`] and feed back ACKs /
//! RESEND requests / timer ticks as they observe them.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use bytes::Bytes;
use quanta::Instant;

use crate::segment::Segmenter;
use crate::stats::SenderStats;
use crate::wire::{self, Header};
use crate::Error;

pub const RETRANSMIT_TIMEOUT: Duration = Duration::from_millis(500);
pub const MAX_RETRIES: u32 = 10;
pub const LINGER_WINDOW: Duration = Duration::from_secs(5);
pub const INITIAL_BURST: usize = 64;

#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub retransmit_timeout: Duration,
    pub max_retries: u32,
    pub linger_window: Duration,
    pub initial_burst: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            retransmit_timeout: RETRANSMIT_TIMEOUT,
            max_retries: MAX_RETRIES,
            linger_window: LINGER_WINDOW,
            initial_burst: INITIAL_BURST,
        }
    }
}

#[derive(Debug)]
struct UnackedSegment {
    last_sent: Instant,
    retries: u32,
}

/// The sender's view of how a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderOutcome {
    Delivered,
}

pub struct Sender {
    config: SenderConfig,
    segmenter: Segmenter,
    next_unsent: u32,
    unacked: BTreeMap<u32, UnackedSegment>,
    output_queue: VecDeque<Bytes>,
    stats: SenderStats,
    linger_deadline: Option<Instant>,
    finished: Option<Result<SenderOutcome, Error>>,
}

impl Sender {
    pub fn new(config: SenderConfig, data: Bytes, now: Instant) -> Self {
        let mut sender = Sender {
            config,
            segmenter: Segmenter::new(data),
            next_unsent: 0,
            unacked: BTreeMap::new(),
            output_queue: VecDeque::new(),
            stats: SenderStats::default(),
            linger_deadline: None,
            finished: None,
        };
        sender.pump(now);
        sender
    }

    pub fn total_segs(&self) -> u32 {
        self.segmenter.total_segs()
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    pub fn take_result(&mut self) -> Option<Result<SenderOutcome, Error>> {
        self.finished.take()
    }

    pub fn in_flight(&self) -> usize {
        self.unacked.len()
    }

    /// Drains encoded packets ready to go out on the wire, in enqueue order.
    pub fn drain_output(&mut self) -> impl Iterator<Item = Bytes> + '_ {
        self.output_queue.drain(..)
    }

    pub fn on_ack(&mut self, seq: u32, _now: Instant) {
        if self.unacked.remove(&seq).is_some() {
            self.stats.packets_acked += 1;
        }
        self.maybe_complete();
    }

    /// Out-of-range seqs are silently filtered per the protocol's stated
    /// open-question resolution; a partially valid batch is still honoured.
    pub fn on_resend(&mut self, seqs: &[u32], now: Instant) {
        self.stats.resends_served += 1;
        for &seq in seqs {
            if seq < self.segmenter.total_segs() {
                self.retransmit(seq, now);
            }
        }
    }

    /// Advances initial-burst pacing and the retransmit/linger timers.
    pub fn tick(&mut self, now: Instant) {
        if self.finished.is_some() {
            return;
        }
        self.pump(now);

        if let Some(deadline) = self.linger_deadline {
            if self.unacked.is_empty() {
                self.finished = Some(Ok(SenderOutcome::Delivered));
                return;
            }
            if now >= deadline {
                self.finished = Some(Err(Error::IncompleteDelivery(self.unacked.len())));
                return;
            }
        }

        let timeout = self.config.retransmit_timeout;
        let due: Vec<u32> = self
            .unacked
            .iter()
            .filter(|(_, state)| now.duration_since(state.last_sent) >= timeout)
            .map(|(&seq, _)| seq)
            .collect();

        for seq in due {
            let retries = self.unacked.get(&seq).map(|s| s.retries).unwrap_or(0);
            if retries >= self.config.max_retries {
                self.finished = Some(Err(Error::PeerUnreachable(retries)));
                return;
            }
            self.retransmit(seq, now);
        }
    }

    fn maybe_complete(&mut self) {
        if self.linger_deadline.is_some() && self.unacked.is_empty() {
            self.finished = Some(Ok(SenderOutcome::Delivered));
        }
    }

    /// Enqueues up to `initial_burst` not-yet-sent segments when there's
    /// nothing left in flight from the previous batch.
    fn pump(&mut self, now: Instant) {
        let total_segs = self.segmenter.total_segs();
        if !self.output_queue.is_empty() || self.next_unsent >= total_segs {
            return;
        }
        let end = (self.next_unsent + self.config.initial_burst as u32).min(total_segs);
        for seq in self.next_unsent..end {
            self.transmit_new(seq, now);
        }
        self.next_unsent = end;
    }

    fn transmit_new(&mut self, seq: u32, now: Instant) {
        self.enqueue(seq, now);
        self.unacked.insert(seq, UnackedSegment { last_sent: now, retries: 0 });
        if self.segmenter.is_last(seq) {
            self.linger_deadline = Some(now + self.config.linger_window);
        }
    }

    fn retransmit(&mut self, seq: u32, now: Instant) {
        self.enqueue(seq, now);
        self.stats.packets_retransmitted += 1;
        let entry = self.unacked.entry(seq).or_insert(UnackedSegment { last_sent: now, retries: 0 });
        entry.last_sent = now;
        entry.retries += 1;
        if self.segmenter.is_last(seq) && self.linger_deadline.is_none() {
            self.linger_deadline = Some(now + self.config.linger_window);
        }
    }

    fn enqueue(&mut self, seq: u32, now: Instant) {
        let _ = now;
        let payload = self.segmenter.segment(seq).expect("enqueue called with in-range seq");
        let last = self.segmenter.is_last(seq);
        let header = Header::data(seq, self.segmenter.total_segs(), payload.len() as u16, last);
        let packet = wire::encode(&header, &payload);
        self.output_queue.push_back(packet);
        self.stats.packets_sent += 1;
    }
}
