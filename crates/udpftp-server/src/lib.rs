//! Server dispatcher: one UDP socket, demultiplexed to one worker thread per
//! in-flight client session. Mirrors the worker-per-unit-of-work,
//! crossbeam-channel-inbox concurrency shape the rest of this workspace uses
//! for its own runtime, just keyed by remote address instead of by link.

use std::collections::HashMap;
use std::fs;
use std::net::{SocketAddr, UdpSocket};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use quanta::Clock;
use udpftp_proto::sender::{self as sender_engine, SenderConfig};
use udpftp_proto::wire::{self, Header, PacketType};
use udpftp_proto::{parse_get_request, parse_resend_request};

/// How often a session worker wakes up to service timers even with no
/// inbound traffic.
const WORKER_TICK: Duration = Duration::from_millis(50);

enum SessionMessage {
    Ack(u32),
    Resend(Vec<u32>),
}

type SessionTable = Arc<Mutex<HashMap<SocketAddr, Sender<SessionMessage>>>>;

pub struct Dispatcher {
    socket: Arc<UdpSocket>,
    root: PathBuf,
    sessions: SessionTable,
    /// Monotonically increasing per-accept counter, surfaced only in log
    /// lines. Not part of the session routing key — sessions are routed by
    /// remote address alone.
    next_nonce: AtomicU64,
}

impl Dispatcher {
    pub fn new(socket: UdpSocket, root: impl Into<PathBuf>) -> Self {
        Dispatcher {
            socket: Arc::new(socket),
            root: root.into(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_nonce: AtomicU64::new(0),
        }
    }

    /// Services inbound datagrams until `running` reports false. The socket
    /// must have a read timeout set so this loop can observe the flag.
    pub fn run(&self, running: &std::sync::atomic::AtomicBool) -> anyhow::Result<()> {
        use std::sync::atomic::Ordering;

        // 18-byte header + the largest payload_len a u16 can express.
        let mut buf = [0u8; 18 + u16::MAX as usize];
        while running.load(Ordering::Relaxed) {
            let (len, addr) = match self.socket.recv_from(&mut buf) {
                Ok(pair) => pair,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            self.handle_datagram(&buf[..len], addr);
        }
        Ok(())
    }

    fn handle_datagram(&self, data: &[u8], addr: SocketAddr) {
        let (header, payload) = match wire::decode(data) {
            Ok(decoded) => decoded,
            Err(_) => return,
        };

        match header.packet_type {
            PacketType::Req => self.handle_req(&payload, addr),
            PacketType::Ack => {
                self.forward(addr, SessionMessage::Ack(header.seq_num));
            }
            PacketType::Data | PacketType::Err => {}
        }
    }

    fn handle_req(&self, payload: &[u8], addr: SocketAddr) {
        if let Some(seqs) = parse_resend_request(payload) {
            self.forward(addr, SessionMessage::Resend(seqs));
            return;
        }

        let Some(name) = parse_get_request(payload) else {
            self.send_err(addr, "malformed request");
            return;
        };

        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if sessions.contains_key(&addr) {
            tracing::info!(%addr, name, "duplicate GET for in-flight session, ignoring");
            return;
        }

        match self.load_file(name) {
            Ok(data) => {
                let nonce = self.next_nonce.fetch_add(1, AtomicOrdering::Relaxed);
                let (tx, rx) = crossbeam_channel::unbounded();
                sessions.insert(addr, tx);
                drop(sessions);
                tracing::info!(%addr, name, nonce, "accepted GET");
                self.spawn_worker(addr, name.to_string(), data, rx);
            }
            Err(reason) => {
                tracing::info!(%addr, name, %reason, "rejecting GET");
                self.send_err(addr, &reason);
            }
        }
    }

    /// Resolves `name` under the serving root, rejecting anything that
    /// escapes it, and reads the whole file into memory.
    fn load_file(&self, name: &str) -> Result<Bytes, String> {
        let candidate: PathBuf = self.root.join(name);
        if !is_within(&self.root, &candidate) {
            return Err("forbidden path".to_string());
        }
        fs::read(&candidate)
            .map(Bytes::from)
            .map_err(|_| "unknown file".to_string())
    }

    fn spawn_worker(&self, addr: SocketAddr, name: String, data: Bytes, rx: Receiver<SessionMessage>) {
        let socket = self.socket.clone();
        let sessions = self.sessions.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("session-{addr}"))
            .spawn(move || {
                session_worker(socket, addr, &name, data, rx);
                sessions.lock().unwrap_or_else(|e| e.into_inner()).remove(&addr);
            });

        if let Err(e) = spawned {
            tracing::error!(%addr, error = %e, "failed to spawn session worker");
            self.sessions.lock().unwrap_or_else(|e| e.into_inner()).remove(&addr);
        }
    }

    fn forward(&self, addr: SocketAddr, message: SessionMessage) {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(inbox) = sessions.get(&addr) {
            let _ = inbox.send(message);
        }
    }

    fn send_err(&self, addr: SocketAddr, reason: &str) {
        let header = Header::err(reason.len() as u16);
        let packet = wire::encode(&header, reason.as_bytes());
        let _ = self.socket.send_to(&packet, addr);
    }
}

fn is_within(root: &Path, candidate: &Path) -> bool {
    // `parse_get_request` already rejects `..` segments and a leading `/`,
    // so a plain prefix check on the joined path is sufficient here; this is
    // a second line of defense against a root misconfigured with its own
    // `..` components.
    match (root.canonicalize(), candidate.parent().and_then(|p| p.canonicalize().ok())) {
        (Ok(root), Some(parent)) => parent.starts_with(&root) || parent == root,
        _ => candidate.starts_with(root),
    }
}

fn session_worker(socket: Arc<UdpSocket>, addr: SocketAddr, name: &str, data: Bytes, rx: Receiver<SessionMessage>) {
    let clock = Clock::new();
    let now = clock.now();
    let mut sender = sender_engine::Sender::new(SenderConfig::default(), data, now);

    tracing::info!(%addr, name, total_segs = sender.total_segs(), "session started");

    loop {
        for packet in sender.drain_output() {
            let _ = socket.send_to(&packet, addr);
        }

        match rx.recv_timeout(WORKER_TICK) {
            Ok(SessionMessage::Ack(seq)) => sender.on_ack(seq, clock.now()),
            Ok(SessionMessage::Resend(seqs)) => sender.on_resend(&seqs, clock.now()),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        sender.tick(clock.now());

        if sender.is_finished() {
            break;
        }
    }

    match sender.take_result() {
        Some(Ok(outcome)) => tracing::info!(%addr, name, ?outcome, stats = ?sender.stats(), "session complete"),
        Some(Err(err)) => tracing::warn!(%addr, name, error = %err, stats = ?sender.stats(), "session aborted"),
        None => {}
    }
}
