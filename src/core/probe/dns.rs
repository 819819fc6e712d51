//! DNS probe: hand-rolled RFC 1035 query encoding over raw UDP.
//!
//! `spec.md` §4.2 fixes the exact wire shape (transaction ID, single
//! question, A/AAAA per address family, `ANCOUNT >= 1` in the reply as the
//! pass criterion) so this does not reach for `hickory-resolver` — a full
//! resolver is the wrong tool for "does this authoritative nameserver answer
//! a query", and would hide the transaction-ID match this probe depends on.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use tokio::net::UdpSocket;

use super::{Outcome, ProbeSpec};

const QTYPE_A: u16 = 1;
const QCLASS_IN: u16 = 1;

/// Process-wide monotonically incrementing transaction ID, per `spec.md`
/// §4.2/§9 ("Transaction counters (DNS, ICMP) as process-wide monotonic
/// values... single-writer contract"), mirroring `icmp::Table::next`.
/// Grounded on `examples/original_source/src/healthcheck_dns.cpp:88`'s
/// `htons(my_transaction_id = ++Healthcheck_dns::global_transaction_id)`.
/// Wraparound is benign, same as the ICMP sequence counter.
static NEXT_TRANSACTION_ID: AtomicU16 = AtomicU16::new(0);

fn next_transaction_id() -> u16 {
    NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed)
}

pub async fn run(spec: &ProbeSpec, domain: &str) -> Outcome {
    // Always queries QTYPE=A (`spec.md` §4.2) regardless of which address
    // family the probe itself is dialing over — the original only ever
    // asks for A records, even for the AAAA-addressed transport.
    let qtype = QTYPE_A;
    let transaction_id = next_transaction_id();
    let query = encode_query(transaction_id, domain, qtype);

    let local_addr = match spec.address {
        std::net::IpAddr::V4(_) => "0.0.0.0:0",
        std::net::IpAddr::V6(_) => "[::]:0",
    };
    let socket = match UdpSocket::bind(local_addr).await {
        Ok(s) => s,
        Err(e) => return Outcome::Fail(format!("bind failed: {e}")),
    };
    // `spec.md` §4.2: "UDP socket, connected to (address, port 53
    // default)" — connecting makes the kernel filter out any datagram not
    // from the probed peer, rather than accepting whatever lands on this
    // ephemeral port first (`examples/original_source/src/healthcheck_dns.cpp:131-136`).
    let dest = SocketAddr::new(spec.address, spec.port);
    if let Err(e) = socket.connect(dest).await {
        return Outcome::Fail(format!("connect failed: {e}"));
    }
    if let Err(e) = socket.send(&query).await {
        return Outcome::Fail(format!("send failed: {e}"));
    }

    let mut buf = [0u8; 512];
    let n = match socket.recv(&mut buf).await {
        Ok(n) => n,
        Err(e) => return Outcome::Fail(format!("recv failed: {e}")),
    };

    match decode_answer_count(&buf[..n], transaction_id) {
        Ok(ancount) if ancount >= 1 => Outcome::Pass,
        Ok(_) => Outcome::Fail("response carried zero answers".to_string()),
        Err(msg) => Outcome::Fail(msg),
    }
}

/// Encode a minimal single-question query: header + QNAME + QTYPE + QCLASS.
fn encode_query(transaction_id: u16, domain: &str, qtype: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    buf.extend_from_slice(&transaction_id.to_be_bytes());
    buf.extend_from_slice(&0x0100u16.to_be_bytes()); // flags: recursion desired
    buf.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    buf.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT
    buf.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    buf.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT

    for label in domain.trim_end_matches('.').split('.') {
        if label.is_empty() {
            continue;
        }
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0); // root label

    buf.extend_from_slice(&qtype.to_be_bytes());
    buf.extend_from_slice(&QCLASS_IN.to_be_bytes());
    buf
}

/// Parse just enough of the header to recover ANCOUNT and confirm the
/// transaction ID matches; the question/answer bodies are not inspected
/// since a non-zero answer count is the whole pass criterion. Checked in
/// size, ancount, transaction-id order, matching the original probe — there
/// is no response-code check, since a non-zero ANCOUNT is sufficient proof
/// of life regardless of what RCODE the server set.
fn decode_answer_count(response: &[u8], expected_id: u16) -> Result<u16, String> {
    if response.len() < 12 {
        return Err("response shorter than a DNS header".to_string());
    }
    let ancount = u16::from_be_bytes([response[6], response[7]]);
    if ancount == 0 {
        return Ok(0);
    }
    let id = u16::from_be_bytes([response[0], response[1]]);
    if id != expected_id {
        return Err(format!("transaction id mismatch: got {id}, expected {expected_id}"));
    }
    Ok(ancount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_simple_query() {
        let query = encode_query(0x1234, "example.com", QTYPE_A);
        assert_eq!(&query[0..2], &[0x12, 0x34]);
        assert_eq!(&query[4..6], &[0x00, 0x01]); // QDCOUNT == 1
        // label "example" (7) + "com" (3) + root terminator
        assert!(query.windows(8).any(|w| w == b"\x07example"));
    }

    #[test]
    fn rejects_mismatched_transaction_id() {
        let mut response = vec![0u8; 12];
        response[0..2].copy_from_slice(&0xAAAAu16.to_be_bytes());
        assert!(decode_answer_count(&response, 0x1234).is_err());
    }

    #[test]
    fn accepts_matching_answer() {
        let mut response = vec![0u8; 12];
        response[0..2].copy_from_slice(&0x1234u16.to_be_bytes());
        response[6..8].copy_from_slice(&1u16.to_be_bytes());
        assert_eq!(decode_answer_count(&response, 0x1234).unwrap(), 1);
    }
}
