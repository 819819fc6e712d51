//! Shared ICMP echo subsystem.
//!
//! Unlike the other probes, ICMP cannot be modeled as "one future per
//! probe": a single pair of raw sockets (one per address family) serves the
//! whole process, since opening a raw socket needs elevated privileges and
//! the OS delivers replies keyed only by `(identifier, sequence)`, not by
//! which probe sent the request. `spec.md` §4.2 calls for a process-wide
//! 16-bit sequence counter and a lookup table from sequence number back to
//! the probe that is waiting on it; this mirrors that directly with a
//! shared `Mutex`-guarded table and two background listener tasks.
//!
//! Grounded on the teacher's use of `tokio::io::unix::AsyncFd` nowhere
//! directly (the teacher has no raw sockets), but on the general
//! readiness-driven async I/O idiom it follows throughout `core/network` —
//! wrap a non-blocking fd, await `readable()`, `try_io` the syscall.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

use super::AddressFamily;

const TABLE_SIZE: usize = crate::config::defaults::ICMP_SEQUENCE_TABLE_SIZE;
const ICMP_ECHO_REQUEST_V4: u8 = 8;
const ICMP_ECHO_REPLY_V4: u8 = 0;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;

/// Fixed filler string appended after the timestamp, matching
/// `examples/original_source/src/healthcheck_ping.cpp:337`'s
/// `memcpy(echo_request.data, ICMP_FILL_DATA, ...)`.
const ICMP_FILL_DATA: &[u8] = b"lbhealthd-icmp-probe-data-0123456789abcdef";

fn process_start() -> Instant {
    static PROCESS_START: OnceLock<Instant> = OnceLock::new();
    *PROCESS_START.get_or_init(Instant::now)
}

/// Identifies the probe a pending echo request belongs to, addressed by
/// position rather than by name so the scheduler can apply a completion
/// without a string lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeKey {
    pub pool_index: usize,
    pub node_index: usize,
    pub probe_index: usize,
}

#[derive(Debug, Clone, Copy)]
struct SeqEntry {
    key: ProbeKey,
    family: AddressFamily,
    sent_at: Instant,
}

/// A reply the scheduler has not yet applied back to its probe.
#[derive(Debug, Clone, Copy)]
pub struct IcmpCompletion {
    pub key: ProbeKey,
    pub rtt: Duration,
}

struct Table {
    slots: Vec<Option<SeqEntry>>,
    next: u16,
}

impl Table {
    fn new() -> Self {
        Self {
            slots: vec![None; TABLE_SIZE],
            next: 0,
        }
    }

    fn allocate(&mut self, key: ProbeKey, family: AddressFamily, sent_at: Instant) -> u16 {
        let seq = self.next;
        self.next = self.next.wrapping_add(1);
        self.slots[seq as usize] = Some(SeqEntry { key, family, sent_at });
        seq
    }

    fn take(&mut self, seq: u16, family: AddressFamily) -> Option<SeqEntry> {
        let slot = self.slots.get_mut(seq as usize)?;
        match slot {
            Some(entry) if entry.family == family => slot.take(),
            _ => None,
        }
    }

    /// Drop an entry unconditionally, used when the scheduler times a probe
    /// out itself so a late reply cannot resurrect it.
    fn clear(&mut self, seq: u16) {
        if let Some(slot) = self.slots.get_mut(seq as usize) {
            *slot = None;
        }
    }
}

/// Process-wide ICMP echo subsystem: owns the two raw sockets, the shared
/// sequence table, and the channel the listener tasks use to hand
/// completed round trips back to the scheduler.
pub struct IcmpSubsystem {
    table: Arc<Mutex<Table>>,
    socket_v4: Arc<Socket>,
    socket_v6: Option<Arc<Socket>>,
    identifier: u16,
    completions_rx: mpsc::UnboundedReceiver<IcmpCompletion>,
}

impl IcmpSubsystem {
    /// Opens both raw sockets and spawns their listener tasks. IPv6 support
    /// is best-effort: a platform or permission failure there does not stop
    /// IPv4 ICMP probing, since most deployments only need one family.
    pub fn start() -> io::Result<Self> {
        let identifier = std::process::id() as u16;
        let table = Arc::new(Mutex::new(Table::new()));
        let (tx, rx) = mpsc::unbounded_channel();

        let socket_v4 = Arc::new(open_raw_socket(Domain::IPV4, Protocol::ICMPV4)?);
        spawn_listener(socket_v4.clone(), table.clone(), tx.clone(), identifier, AddressFamily::V4)?;

        let socket_v6 = match open_raw_socket(Domain::IPV6, Protocol::ICMPV6) {
            Ok(sock) => {
                let sock = Arc::new(sock);
                spawn_listener(sock.clone(), table.clone(), tx.clone(), identifier, AddressFamily::V6)?;
                Some(sock)
            }
            Err(_) => None,
        };

        Ok(Self {
            table,
            socket_v4,
            socket_v6,
            identifier,
            completions_rx: rx,
        })
    }

    /// Send an echo request and register the sequence in the shared table.
    /// Returns the allocated sequence number so the caller can clear it on
    /// a self-timed-out probe.
    pub fn send_echo(&self, key: ProbeKey, address: IpAddr, family: AddressFamily) -> io::Result<u16> {
        let sent_at = Instant::now();
        let seq = self.table.lock().unwrap().allocate(key, family, sent_at);
        let packet = match family {
            AddressFamily::V4 => build_echo_v4(self.identifier, seq, sent_at),
            AddressFamily::V6 => build_echo_v6(self.identifier, seq, sent_at),
        };
        let socket = match family {
            AddressFamily::V4 => &self.socket_v4,
            AddressFamily::V6 => self
                .socket_v6
                .as_ref()
                .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "ipv6 icmp socket unavailable"))?,
        };
        let dest: SocketAddr = SocketAddr::new(address, 0);
        socket.send_to(&packet, &dest.into())?;
        Ok(seq)
    }

    pub fn abandon(&self, seq: u16) {
        self.table.lock().unwrap().clear(seq);
    }

    /// Drain every completion delivered since the last call without
    /// blocking; called once per scheduler tick.
    pub fn drain_completions(&mut self, out: &mut Vec<IcmpCompletion>) {
        while let Ok(completion) = self.completions_rx.try_recv() {
            out.push(completion);
        }
    }
}

fn open_raw_socket(domain: Domain, protocol: Protocol) -> io::Result<Socket> {
    let socket = Socket::new(domain, Type::RAW, Some(protocol))?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

fn spawn_listener(
    socket: Arc<Socket>,
    table: Arc<Mutex<Table>>,
    tx: mpsc::UnboundedSender<IcmpCompletion>,
    identifier: u16,
    family: AddressFamily,
) -> io::Result<()> {
    let async_fd = AsyncFd::new(socket)?;
    tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        loop {
            let mut guard = match async_fd.readable().await {
                Ok(g) => g,
                Err(_) => return,
            };
            let received = guard.try_io(|inner| {
                let slice = unsafe {
                    std::slice::from_raw_parts_mut(buf.as_mut_ptr().cast(), buf.len())
                };
                inner.get_ref().recv(slice)
            });
            let n = match received {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    if e.kind() == io::ErrorKind::WouldBlock {
                        continue;
                    }
                    return;
                }
                Err(_would_block) => continue,
            };
            if let Some((seq, rtt_origin)) = parse_reply(&buf[..n], identifier, family) {
                let entry = table.lock().unwrap().take(seq, family);
                if let Some(entry) = entry {
                    let rtt = rtt_origin.unwrap_or_else(|| entry.sent_at.elapsed());
                    let _ = tx.send(IcmpCompletion { key: entry.key, rtt });
                }
            }
        }
    });
    Ok(())
}

/// Returns `(sequence, rtt_override)` for a reply matching our identifier.
/// IPv4 replies arrive as a full IP packet (raw sockets see the IP header);
/// IPv6 raw ICMP sockets deliver only the ICMP payload.
fn parse_reply(packet: &[u8], identifier: u16, family: AddressFamily) -> Option<(u16, Option<Duration>)> {
    match family {
        AddressFamily::V4 => {
            let ihl = (*packet.first()? & 0x0f) as usize * 4;
            let icmp = packet.get(ihl..)?;
            if *icmp.first()? != ICMP_ECHO_REPLY_V4 {
                return None;
            }
            let id = u16::from_be_bytes([*icmp.get(4)?, *icmp.get(5)?]);
            if id != identifier {
                return None;
            }
            let seq = u16::from_be_bytes([*icmp.get(6)?, *icmp.get(7)?]);
            Some((seq, None))
        }
        AddressFamily::V6 => {
            if *packet.first()? != ICMPV6_ECHO_REPLY {
                return None;
            }
            let id = u16::from_be_bytes([*packet.get(4)?, *packet.get(5)?]);
            if id != identifier {
                return None;
            }
            let seq = u16::from_be_bytes([*packet.get(6)?, *packet.get(7)?]);
            Some((seq, None))
        }
    }
}

/// Builds the echo payload shared by both address families: the monotonic
/// nanoseconds elapsed since process start, then the fixed filler string.
/// `spec.md` §4.2: "Request payload carries the monotonic-clock timestamp
/// of send, plus a fixed filler string." `Instant` has no portable byte
/// representation, so the timestamp is relative to process start rather
/// than an absolute clock reading — reply-side RTT is computed from the
/// sequence table's own `sent_at`, not by reading this field back.
fn echo_payload(sent_at: Instant) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8 + ICMP_FILL_DATA.len());
    let nanos = (sent_at - process_start()).as_nanos() as u64;
    payload.extend_from_slice(&nanos.to_be_bytes());
    payload.extend_from_slice(ICMP_FILL_DATA);
    payload
}

fn build_echo_v4(identifier: u16, sequence: u16, sent_at: Instant) -> Vec<u8> {
    let mut packet = vec![0u8; 8];
    packet[0] = ICMP_ECHO_REQUEST_V4;
    packet[1] = 0; // code
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    packet.extend_from_slice(&echo_payload(sent_at));
    let checksum = internet_checksum(&packet);
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    packet
}

/// IPv6 raw ICMP sockets typically have the kernel fill the checksum via
/// the `IPV6_CHECKSUM` socket option (it needs the pseudo-header, which
/// only the kernel can see), so the payload is sent with a zeroed
/// checksum field.
fn build_echo_v6(identifier: u16, sequence: u16, sent_at: Instant) -> Vec<u8> {
    let mut packet = vec![0u8; 8];
    packet[0] = ICMPV6_ECHO_REQUEST;
    packet[1] = 0;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    packet.extend_from_slice(&echo_payload(sent_at));
    packet
}

fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut iter = data.chunks_exact(2);
    for chunk in &mut iter {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = iter.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_zero_packet_is_all_ones_complement() {
        let packet = build_echo_v4(0x1234, 1, Instant::now());
        // Validate the packet is internally consistent: recomputing the
        // checksum over the packet with its checksum field zeroed again
        // should reproduce the same checksum.
        let mut zeroed = packet.clone();
        zeroed[2] = 0;
        zeroed[3] = 0;
        let recomputed = internet_checksum(&zeroed);
        let stored = u16::from_be_bytes([packet[2], packet[3]]);
        assert_eq!(recomputed, stored);
    }

    #[test]
    fn table_round_trip() {
        let mut table = Table::new();
        let key = ProbeKey {
            pool_index: 0,
            node_index: 1,
            probe_index: 2,
        };
        let seq = table.allocate(key, AddressFamily::V4, Instant::now());
        let entry = table.take(seq, AddressFamily::V4).unwrap();
        assert_eq!(entry.key, key);
        assert!(table.take(seq, AddressFamily::V4).is_none());
    }

    #[test]
    fn table_rejects_family_mismatch() {
        let mut table = Table::new();
        let key = ProbeKey {
            pool_index: 0,
            node_index: 0,
            probe_index: 0,
        };
        let seq = table.allocate(key, AddressFamily::V4, Instant::now());
        assert!(table.take(seq, AddressFamily::V6).is_none());
    }
}
