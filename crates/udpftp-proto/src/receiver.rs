//! Client-side receiver engine: decodes inbound packets, reassembles the
//! byte stream, drives gap detection and RESEND requests, and detects
//! stalled transfers. Pure state machine — no socket I/O.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use quanta::Instant;
use rand::Rng;

use crate::segment::Reassembler;
use crate::stats::ReceiverStats;
use crate::wire::{self, Header, PacketType};
use crate::Error;

pub const GAP_SCAN_INTERVAL: Duration = Duration::from_millis(500);
pub const MAX_RESEND_BATCH: usize = 64;
pub const CLIENT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub gap_scan_interval: Duration,
    pub max_resend_batch: usize,
    pub client_idle_timeout: Duration,
    /// Artificial loss injection, integer percent in `[0, 100]`.
    pub loss_pct: u8,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            gap_scan_interval: GAP_SCAN_INTERVAL,
            max_resend_batch: MAX_RESEND_BATCH,
            client_idle_timeout: CLIENT_IDLE_TIMEOUT,
            loss_pct: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    AwaitingFirst,
    Receiving,
    Complete,
}

pub struct Receiver {
    config: ReceiverConfig,
    state: ReceiverState,
    reassembler: Reassembler,
    last_activity: Instant,
    last_resend_scan: Option<Instant>,
    output_queue: VecDeque<Bytes>,
    stats: ReceiverStats,
    finished: Option<Result<Vec<u8>, Error>>,
}

impl Receiver {
    pub fn new(config: ReceiverConfig, now: Instant) -> Self {
        Receiver {
            config,
            state: ReceiverState::AwaitingFirst,
            reassembler: Reassembler::new(),
            last_activity: now,
            last_resend_scan: None,
            output_queue: VecDeque::new(),
            stats: ReceiverStats::default(),
            finished: None,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    pub fn take_result(&mut self) -> Option<Result<Vec<u8>, Error>> {
        self.finished.take()
    }

    pub fn drain_output(&mut self) -> impl Iterator<Item = Bytes> + '_ {
        self.output_queue.drain(..)
    }

    /// Feeds one inbound datagram to the state machine. Invalid packets are
    /// dropped silently (only a diagnostic counter moves); loss injection,
    /// when enabled, discards an otherwise-valid packet before any further
    /// processing, simulating a lossy link at the receive boundary.
    pub fn on_packet(&mut self, bytes: &[u8], now: Instant) {
        if self.finished.is_some() {
            return;
        }
        let (header, payload) = match wire::decode(bytes) {
            Ok(decoded) => decoded,
            Err(_) => {
                self.stats.dropped_invalid += 1;
                return;
            }
        };

        if self.config.loss_pct > 0 && rand::rng().random_range(0..100u8) < self.config.loss_pct {
            self.stats.dropped_invalid += 1;
            return;
        }

        match header.packet_type {
            PacketType::Err => {
                let message = String::from_utf8_lossy(&payload).into_owned();
                self.finished = Some(Err(Error::UnknownFile(message)));
            }
            PacketType::Data => self.handle_data(header, payload, now),
            PacketType::Req | PacketType::Ack => {
                self.stats.dropped_invalid += 1;
            }
        }
    }

    fn handle_data(&mut self, header: Header, payload: Bytes, now: Instant) {
        self.stats.packets_received += 1;
        self.reassembler.set_total_segs(header.total_segs);

        let total_segs = self.reassembler.total_segs().unwrap_or(header.total_segs);
        if header.seq_num >= total_segs {
            self.stats.dropped_invalid += 1;
            return;
        }

        match self.reassembler.insert(header.seq_num, payload) {
            Ok(true) => {
                self.last_activity = now;
                if self.state == ReceiverState::AwaitingFirst {
                    self.state = ReceiverState::Receiving;
                }
                self.emit_ack(header.seq_num);
                if self.reassembler.is_complete() {
                    self.complete();
                }
            }
            Ok(false) => {
                self.stats.duplicates += 1;
                self.emit_ack(header.seq_num);
            }
            Err(err) => {
                self.finished = Some(Err(err));
            }
        }
    }

    fn complete(&mut self) {
        self.state = ReceiverState::Complete;
        self.stats.segments_delivered = self.reassembler.total_segs().unwrap_or(0) as u64;
        self.finished = Some(Ok(self.reassembler.assemble()));
    }

    fn emit_ack(&mut self, seq: u32) {
        let header = Header::ack(seq);
        self.output_queue.push_back(wire::encode(&header, &[]));
    }

    /// Called periodically by the driver. Detects idle stalls and, once the
    /// total segment count is known, issues rate-limited RESEND requests for
    /// the current missing set.
    pub fn progress_tick(&mut self, now: Instant) {
        if self.finished.is_some() {
            return;
        }

        if now.duration_since(self.last_activity) >= self.config.client_idle_timeout {
            self.finished = Some(Err(Error::TransferStalled(self.config.client_idle_timeout)));
            return;
        }

        if self.state != ReceiverState::Receiving {
            return;
        }

        let due = match self.last_resend_scan {
            None => true,
            Some(last) => now.duration_since(last) >= self.config.gap_scan_interval,
        };
        if !due {
            return;
        }
        self.last_resend_scan = Some(now);

        let missing = self.reassembler.missing_batch(self.config.max_resend_batch);
        if missing.is_empty() {
            return;
        }
        self.stats.gaps_observed += 1;
        self.stats.resends_sent += 1;

        let seqs: Vec<String> = missing.iter().map(u32::to_string).collect();
        let payload = format!("RESEND {}", seqs.join(","));
        let header = Header::req(payload.len() as u16);
        self.output_queue.push_back(wire::encode(&header, payload.as_bytes()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::{Sender, SenderConfig};
    use quanta::Clock;

    fn fixture_clock() -> (Clock, Instant) {
        let clock = Clock::new();
        let now = clock.now();
        (clock, now)
    }

    #[test]
    fn zero_byte_transfer_completes_immediately() {
        let (_clock, now) = fixture_clock();
        let mut sender = Sender::new(SenderConfig::default(), Bytes::new(), now);
        let packet = sender.drain_output().next().unwrap();

        let mut receiver = Receiver::new(ReceiverConfig::default(), now);
        receiver.on_packet(&packet, now);
        assert_eq!(receiver.state(), ReceiverState::Complete);
        assert_eq!(receiver.take_result().unwrap().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn duplicate_data_is_re_acked_not_stored_twice() {
        let (_clock, now) = fixture_clock();
        let data = Bytes::from(vec![9u8; 10]);
        let mut sender = Sender::new(SenderConfig::default(), data, now);
        let packet = sender.drain_output().next().unwrap();

        let mut receiver = Receiver::new(ReceiverConfig::default(), now);
        receiver.on_packet(&packet, now);
        let _ = receiver.drain_output().count();
        receiver.on_packet(&packet, now);
        assert_eq!(receiver.stats().duplicates, 1);
        assert_eq!(receiver.drain_output().count(), 1, "duplicate still gets ACKed");
    }

    #[test]
    fn out_of_range_seq_num_is_dropped_not_stored() {
        let (_clock, now) = fixture_clock();
        // Single-segment transfer: total_segs == 1, so seq_num 1 is out of range.
        let data = Bytes::from(vec![1u8; 10]);
        let mut sender = Sender::new(SenderConfig::default(), data, now);
        let packet = sender.drain_output().next().unwrap();
        let (header, payload) = wire::decode(&packet).unwrap();

        let mut receiver = Receiver::new(ReceiverConfig::default(), now);
        let bogus_header = Header::data(header.total_segs, header.total_segs, payload.len() as u16, true);
        let bogus_packet = wire::encode(&bogus_header, &payload);

        receiver.on_packet(&bogus_packet, now);
        assert_eq!(receiver.stats().dropped_invalid, 1);
        assert!(!receiver.is_finished(), "out-of-range seq must not trigger completion");
        assert_eq!(receiver.drain_output().count(), 0, "no ACK for a rejected packet");
    }

    #[test]
    fn invalid_packet_increments_counter_and_is_dropped() {
        let (_clock, now) = fixture_clock();
        let mut receiver = Receiver::new(ReceiverConfig::default(), now);
        receiver.on_packet(&[0u8; 4], now);
        assert_eq!(receiver.stats().dropped_invalid, 1);
        assert!(!receiver.is_finished());
    }

    #[test]
    fn gap_scan_emits_resend_for_missing_segments() {
        let (_clock, now) = fixture_clock();
        let data = Bytes::from(vec![1u8; crate::wire::MAX_PAYLOAD * 3]);
        let mut sender = Sender::new(SenderConfig::default(), data, now);
        let packets: Vec<_> = sender.drain_output().collect();

        let mut receiver = Receiver::new(ReceiverConfig::default(), now);
        receiver.on_packet(&packets[0], now);
        // segment 1 lost
        receiver.on_packet(&packets[2], now);
        receiver.drain_output().for_each(drop);

        let later = now + GAP_SCAN_INTERVAL + Duration::from_millis(1);
        receiver.progress_tick(later);
        let resend: Vec<_> = receiver.drain_output().collect();
        assert_eq!(resend.len(), 1);
        let (header, payload) = wire::decode(&resend[0]).unwrap();
        assert_eq!(header.packet_type, PacketType::Req);
        assert_eq!(&payload[..], b"RESEND 1");
    }

    #[test]
    fn idle_timeout_raises_transfer_stalled() {
        let (_clock, now) = fixture_clock();
        let mut receiver = Receiver::new(ReceiverConfig::default(), now);
        let later = now + CLIENT_IDLE_TIMEOUT + Duration::from_millis(1);
        receiver.progress_tick(later);
        assert!(matches!(receiver.take_result(), Some(Err(Error::TransferStalled(_)))));
    }

    #[test]
    fn err_packet_surfaces_unknown_file() {
        let (_clock, now) = fixture_clock();
        let mut receiver = Receiver::new(ReceiverConfig::default(), now);
        let header = Header::err(9);
        let packet = wire::encode(&header, b"not found");
        receiver.on_packet(&packet, now);
        match receiver.take_result() {
            Some(Err(Error::UnknownFile(msg))) => assert_eq!(msg, "not found"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
