//! Art-Net packet codec: the three opcodes the node acts on, and the poll
//! reply that advertises it to controllers.
//!
//! Every Art-Net packet starts with the 8-byte id `Art-Net\0` followed by a
//! little-endian opcode. Multi-byte fields after that are big-endian unless
//! noted otherwise.

use core::net::Ipv4Addr;

use derive_more::Display;

/// UDP port for all Art-Net traffic.
pub const ARTNET_PORT: u16 = 0x1936;
/// Largest packet the node reads: an `ArtDmx` header plus 512 channels.
pub const MAX_PACKET_LEN: usize = DMX_HEADER_LEN + MAX_DMX_CHANNELS;
/// Length of an `ArtPollReply`.
pub const POLL_REPLY_LEN: usize = 239;
/// Channels carried by a full universe.
pub const MAX_DMX_CHANNELS: usize = 512;

/// `ArtPoll`
pub const OP_POLL: u16 = 0x2000;
/// `ArtPollReply`
pub const OP_POLL_REPLY: u16 = 0x2100;
/// `ArtDmx`
pub const OP_DMX: u16 = 0x5000;
/// `ArtSync`
pub const OP_SYNC: u16 = 0x5200;

const ID: &[u8; 8] = b"Art-Net\0";
const PROTOCOL_VERSION: u16 = 14;
const OPCODE_HEADER_LEN: usize = 10;
// id, opcode, protocol version
const VERSIONED_HEADER_LEN: usize = 12;
const DMX_HEADER_LEN: usize = 18;
const SHORT_NAME_LEN: usize = 18;
const LONG_NAME_LEN: usize = 64;

/// One universe of channel data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DmxFrame<'a> {
    /// 15-bit port address: net, sub-net, universe.
    pub universe: u16,
    /// Sequence number, `0` when the sender does not sequence.
    pub sequence: u8,
    /// Physical input port at the sender.
    pub physical: u8,
    /// Channel bytes.
    pub data: &'a [u8],
}

/// A decoded packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtPacket<'a> {
    /// `ArtDmx`
    Dmx(DmxFrame<'a>),
    /// `ArtSync`: every universe of the cycle has been sent.
    Sync,
    /// `ArtPoll`: a controller looking for nodes.
    Poll,
    /// Any other opcode.
    Other(u16),
}

/// Why a datagram was not decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    /// Shorter than the header its opcode requires.
    #[display("packet too short")]
    TooShort,
    /// Does not start with the Art-Net id.
    #[display("not an Art-Net packet")]
    NotArtNet,
    /// The `ArtDmx` length field disagrees with the datagram.
    #[display("DMX length field does not match the packet")]
    LengthMismatch,
}

impl core::error::Error for ParseError {}

/// Decode one datagram.
///
/// # Errors
///
/// Returns a [`ParseError`] for foreign or truncated packets.
pub fn parse(packet: &[u8]) -> Result<ArtPacket<'_>, ParseError> {
    let header = packet
        .get(..OPCODE_HEADER_LEN)
        .ok_or(ParseError::TooShort)?;
    if header.get(..ID.len()) != Some(ID.as_slice()) {
        return Err(ParseError::NotArtNet);
    }
    let opcode = u16::from_le_bytes([byte(packet, 8)?, byte(packet, 9)?]);

    match opcode {
        OP_DMX => parse_dmx(packet).map(ArtPacket::Dmx),
        OP_SYNC | OP_POLL if packet.len() < VERSIONED_HEADER_LEN => Err(ParseError::TooShort),
        OP_SYNC => Ok(ArtPacket::Sync),
        OP_POLL => Ok(ArtPacket::Poll),
        other => Ok(ArtPacket::Other(other)),
    }
}

fn parse_dmx(packet: &[u8]) -> Result<DmxFrame<'_>, ParseError> {
    if packet.len() < DMX_HEADER_LEN {
        return Err(ParseError::TooShort);
    }
    let sequence = byte(packet, 12)?;
    let physical = byte(packet, 13)?;
    let sub_uni = byte(packet, 14)?;
    let net = byte(packet, 15)?;
    let length = usize::from(u16::from_be_bytes([byte(packet, 16)?, byte(packet, 17)?]));
    if length > MAX_DMX_CHANNELS {
        return Err(ParseError::LengthMismatch);
    }
    let data = packet
        .get(DMX_HEADER_LEN..)
        .and_then(|payload| payload.get(..length))
        .ok_or(ParseError::TooShort)?;

    Ok(DmxFrame {
        universe: u16::from_be_bytes([net & 0x7F, sub_uni]),
        sequence,
        physical,
        data,
    })
}

fn byte(packet: &[u8], at: usize) -> Result<u8, ParseError> {
    packet.get(at).copied().ok_or(ParseError::TooShort)
}

/// What the node says about itself in an `ArtPollReply`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollReply<'a> {
    /// The node's address.
    pub address: Ipv4Addr,
    /// Name shown by controllers. Truncated to 17 bytes for the short name
    /// and 63 for the long name.
    pub name: &'a str,
    /// Port address of the node's single output.
    pub universe: u16,
}

/// Write the `ArtPollReply` for `reply` into `out`.
pub fn write_poll_reply(reply: &PollReply<'_>, out: &mut [u8; POLL_REPLY_LEN]) {
    out.fill(0);
    let mut writer = FieldWriter { out, position: 0 };
    writer.put(ID);
    writer.put(&OP_POLL_REPLY.to_le_bytes());
    writer.put(&reply.address.octets());
    // The port is the one little-endian field in the reply.
    writer.put(&ARTNET_PORT.to_le_bytes());
    writer.put(&PROTOCOL_VERSION.to_be_bytes());
    let [net, sub_uni] = reply.universe.to_be_bytes();
    writer.put(&[net & 0x7F, sub_uni.checked_shr(4).unwrap_or(0)]);
    writer.skip(6); // oem, ubea, status1, esta
    writer.put_name(reply.name, SHORT_NAME_LEN);
    writer.put_name(reply.name, LONG_NAME_LEN);
    writer.put_name("#0001 [0000] ok", LONG_NAME_LEN);
    writer.put(&1u16.to_be_bytes()); // one output port
    writer.put(&[0x80, 0, 0, 0]); // port types: DMX output
    writer.skip(4); // good input
    writer.put(&[0x80, 0, 0, 0]); // good output: data transmitting
    writer.skip(4); // sw in
    writer.put(&[sub_uni & 0x0F, 0, 0, 0]);
    writer.skip(6); // sw video, macro, remote; spare
    writer.skip(7); // style (node), mac
    writer.put(&reply.address.octets()); // bind ip
    writer.put(&[1]); // bind index
    writer.put(&[0x08]); // status2: 15-bit port addresses
}

struct FieldWriter<'a> {
    out: &'a mut [u8],
    position: usize,
}

impl FieldWriter<'_> {
    fn put(&mut self, bytes: &[u8]) {
        let end = self.position.saturating_add(bytes.len());
        if let Some(field) = self.out.get_mut(self.position..end) {
            field.copy_from_slice(bytes);
        }
        self.position = end;
    }

    fn skip(&mut self, len: usize) {
        self.position = self.position.saturating_add(len);
    }

    // Null-terminated, zero-padded.
    fn put_name(&mut self, name: &str, field_len: usize) {
        let bytes = name.as_bytes();
        let len = bytes.len().min(field_len.saturating_sub(1));
        if let (Some(field), Some(name)) = (
            self.out
                .get_mut(self.position..)
                .and_then(|field| field.get_mut(..len)),
            bytes.get(..len),
        ) {
            field.copy_from_slice(name);
        }
        self.position = self.position.saturating_add(field_len);
    }
}

/// Directed broadcast address of the subnet `address/prefix_len`.
#[must_use]
pub fn broadcast_address(address: Ipv4Addr, prefix_len: u8) -> Ipv4Addr {
    let host_mask = u32::MAX.checked_shr(u32::from(prefix_len)).unwrap_or(0);
    Ipv4Addr::from_bits(address.to_bits() | host_mask)
}
