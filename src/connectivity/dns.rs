//! Wildcard DNS for the captive hotspot: every A query resolves to the node.
#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::net::Ipv4Addr;

/// UDP port the responder listens on.
pub const DNS_PORT: u16 = 53;
/// Largest query or answer handled (classic UDP DNS).
pub const MAX_DNS_PACKET: usize = 512;

const HEADER_LEN: usize = 12;
const ANSWER_LEN: usize = 16;
const TYPE_A: u16 = 1;
const CLASS_IN: u16 = 1;
const ANSWER_TTL_SECS: u32 = 60;

const FLAG_RESPONSE: u16 = 0x8000;
const FLAG_AUTHORITATIVE: u16 = 0x0400;
const FLAG_RECURSION_DESIRED: u16 = 0x0100;
const FLAG_RECURSION_AVAILABLE: u16 = 0x0080;
const OPCODE_MASK: u16 = 0x7800;

/// Build the answer to `query` into `out`, pointing any A question at `address`.
///
/// Only the first question is answered. Non-A questions get a no-error reply
/// with no records. Returns the answer length, or `None` for responses,
/// non-standard opcodes, malformed packets, and an `out` that is too small.
#[must_use]
pub fn answer_query(query: &[u8], address: Ipv4Addr, out: &mut [u8]) -> Option<usize> {
    let flags = read_u16(query, 2)?;
    if flags & FLAG_RESPONSE != 0 || flags & OPCODE_MASK != 0 {
        return None;
    }
    if read_u16(query, 4)? == 0 {
        return None;
    }

    let mut position = HEADER_LEN;
    loop {
        let label_len = usize::from(*query.get(position)?);
        position = position.checked_add(1)?;
        if label_len == 0 {
            break;
        }
        // Compression pointers never appear in a first question.
        if label_len & 0xC0 != 0 {
            return None;
        }
        position = position.checked_add(label_len)?;
    }
    let question_type = read_u16(query, position)?;
    let question_class = read_u16(query, position.checked_add(2)?)?;
    let question = query.get(HEADER_LEN..position.checked_add(4)?)?;
    let answers = u16::from(question_type == TYPE_A && question_class == CLASS_IN);

    let answer_len = if answers == 1 { ANSWER_LEN } else { 0 };
    let total = HEADER_LEN
        .checked_add(question.len())?
        .checked_add(answer_len)?;
    let out = out.get_mut(..total)?;

    let reply_flags = FLAG_RESPONSE
        | FLAG_AUTHORITATIVE
        | (flags & FLAG_RECURSION_DESIRED)
        | FLAG_RECURSION_AVAILABLE;
    let (header, rest) = out.split_at_mut(HEADER_LEN);
    header.copy_from_slice(&[0; HEADER_LEN]);
    header.get_mut(0..2)?.copy_from_slice(query.get(0..2)?);
    header.get_mut(2..4)?.copy_from_slice(&reply_flags.to_be_bytes());
    header.get_mut(4..6)?.copy_from_slice(&1u16.to_be_bytes());
    header.get_mut(6..8)?.copy_from_slice(&answers.to_be_bytes());

    let (question_out, answer_out) = rest.split_at_mut(question.len());
    question_out.copy_from_slice(question);
    if answers == 1 {
        // Name is a pointer back to the question at offset 12.
        answer_out.get_mut(0..2)?.copy_from_slice(&[0xC0, 0x0C]);
        answer_out.get_mut(2..4)?.copy_from_slice(&TYPE_A.to_be_bytes());
        answer_out.get_mut(4..6)?.copy_from_slice(&CLASS_IN.to_be_bytes());
        answer_out
            .get_mut(6..10)?
            .copy_from_slice(&ANSWER_TTL_SECS.to_be_bytes());
        answer_out.get_mut(10..12)?.copy_from_slice(&4u16.to_be_bytes());
        answer_out.get_mut(12..16)?.copy_from_slice(&address.octets());
    }

    Some(total)
}

fn read_u16(bytes: &[u8], at: usize) -> Option<u16> {
    let pair = bytes.get(at..)?.get(..2)?;
    Some(u16::from_be_bytes([*pair.first()?, *pair.get(1)?]))
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
mod server {
    use core::net::Ipv4Addr;

    use embassy_net::Stack;
    use embassy_net::udp::{PacketMetadata, UdpSocket};

    use super::{DNS_PORT, MAX_DNS_PACKET, answer_query};
    use crate::{Error, Result};

    /// Answer DNS queries on the hotspot until the device restarts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if port 53 cannot be bound.
    pub async fn serve(stack: Stack<'static>, address: Ipv4Addr) -> Result<core::convert::Infallible> {
        let mut rx_meta = [PacketMetadata::EMPTY; 4];
        let mut rx_buffer = [0u8; 1024];
        let mut tx_meta = [PacketMetadata::EMPTY; 4];
        let mut tx_buffer = [0u8; 1024];
        let mut socket = UdpSocket::new(
            stack,
            &mut rx_meta,
            &mut rx_buffer,
            &mut tx_meta,
            &mut tx_buffer,
        );
        socket.bind(DNS_PORT).map_err(|_| {
            error!("DNS: cannot bind port {}", DNS_PORT);
            Error::Network
        })?;
        info!("DNS: answering every name with the hotspot address");

        let mut query = [0u8; MAX_DNS_PACKET];
        let mut answer = [0u8; MAX_DNS_PACKET];
        loop {
            let Ok((len, meta)) = socket.recv_from(&mut query).await else {
                continue;
            };
            let Some(query) = query.get(..len) else {
                continue;
            };
            if let Some(answer_len) = answer_query(query, address, &mut answer) {
                if let Some(answer) = answer.get(..answer_len) {
                    if socket.send_to(answer, meta.endpoint).await.is_err() {
                        debug!("DNS: reply send failed");
                    }
                }
            }
        }
    }
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
pub use server::serve;
