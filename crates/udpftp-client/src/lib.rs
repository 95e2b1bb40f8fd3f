//! Client driver: issues a `GET`, runs the receiver engine against a single
//! blocking socket until the transfer completes or fails, and hands back the
//! reassembled bytes.

use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use quanta::Clock;
use udpftp_proto::receiver::{Receiver, ReceiverConfig};
use udpftp_proto::wire::{self, Header};
use udpftp_proto::Error;

/// How long a single `recv_from` call blocks before the driver re-checks its
/// timers. Short enough that `progress_tick` runs close to its configured
/// `gap_scan_interval`.
const RECV_POLL: Duration = Duration::from_millis(100);

pub struct GetOutcome {
    pub data: Vec<u8>,
    pub stats: udpftp_proto::ReceiverStats,
}

/// Requests `name` from `server_addr` and blocks until the transfer
/// completes, fails, or stalls. `loss_pct` enables artificial loss injection
/// on the receive path for testing against a lossy link.
pub fn get(server_addr: SocketAddr, name: &str, loss_pct: u8) -> Result<GetOutcome, Error> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_read_timeout(Some(RECV_POLL))?;
    socket.connect(server_addr)?;

    let request = format!("GET /{name}");
    let header = Header::req(request.len() as u16);
    socket.send(&wire::encode(&header, request.as_bytes()))?;

    let clock = Clock::new();
    let config = ReceiverConfig { loss_pct, ..ReceiverConfig::default() };
    let mut receiver = Receiver::new(config, clock.now());

    let mut buf = [0u8; 18 + u16::MAX as usize];
    loop {
        match socket.recv(&mut buf) {
            Ok(len) => receiver.on_packet(&buf[..len], clock.now()),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => return Err(e.into()),
        }

        receiver.progress_tick(clock.now());
        for packet in receiver.drain_output() {
            socket.send(&packet)?;
        }

        if let Some(result) = receiver.take_result() {
            return result.map(|data| GetOutcome { data, stats: receiver.stats().clone() });
        }
    }
}
