//! A minimal DHCP server for the captive hotspot.
//!
//! Clients get an address from a small fixed pool next to the node, and the
//! node itself as router and DNS server so the captive DNS sees their lookups.
#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::net::Ipv4Addr;

/// Port the server listens on.
pub const SERVER_PORT: u16 = 67;
/// Port clients listen on.
pub const CLIENT_PORT: u16 = 68;
/// Addresses in the pool.
pub const POOL_SIZE: usize = 16;
/// Host number of the first pooled address (`x.x.x.100`).
pub const POOL_FIRST_HOST: u8 = 100;
/// Lease length handed to clients.
pub const LEASE_SECS: u32 = 3600;
/// Buffer size that fits any request and reply handled here.
pub const MAX_DHCP_PACKET: usize = 576;

const OP_REQUEST: u8 = 1;
const OP_REPLY: u8 = 2;
const HTYPE_ETHERNET: u8 = 1;
const HLEN_ETHERNET: u8 = 6;
const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];
const OPTIONS_OFFSET: usize = 240;
const MIN_REPLY_LEN: usize = 300;

const OPTION_PAD: u8 = 0;
const OPTION_SUBNET_MASK: u8 = 1;
const OPTION_ROUTER: u8 = 3;
const OPTION_DNS: u8 = 6;
const OPTION_REQUESTED_ADDRESS: u8 = 50;
const OPTION_LEASE_TIME: u8 = 51;
const OPTION_MESSAGE_TYPE: u8 = 53;
const OPTION_SERVER_ID: u8 = 54;
const OPTION_END: u8 = 255;

/// DHCP message types handled by the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageType {
    /// Client looking for a server.
    Discover,
    /// Server proposing an address.
    Offer,
    /// Client asking for an address.
    Request,
    /// Client refusing an address.
    Decline,
    /// Server confirming a lease.
    Ack,
    /// Server refusing a request.
    Nak,
    /// Client giving an address back.
    Release,
    /// Any other type.
    Other(u8),
}

impl MessageType {
    const fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::Discover,
            2 => Self::Offer,
            3 => Self::Request,
            4 => Self::Decline,
            5 => Self::Ack,
            6 => Self::Nak,
            7 => Self::Release,
            other => Self::Other(other),
        }
    }

    const fn to_byte(self) -> u8 {
        match self {
            Self::Discover => 1,
            Self::Offer => 2,
            Self::Request => 3,
            Self::Decline => 4,
            Self::Ack => 5,
            Self::Nak => 6,
            Self::Release => 7,
            Self::Other(other) => other,
        }
    }
}

/// The parts of a client message the server acts on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientMessage {
    /// Transaction id, echoed in the reply.
    pub xid: [u8; 4],
    /// BOOTP flags, echoed in the reply.
    pub flags: [u8; 2],
    /// Client hardware address.
    pub client_mac: [u8; 6],
    /// Address the client already holds (renewals).
    pub client_address: Ipv4Addr,
    /// Message type option.
    pub message_type: MessageType,
    /// Requested address option.
    pub requested_address: Option<Ipv4Addr>,
    /// Server identifier option.
    pub server_id: Option<Ipv4Addr>,
}

/// Decode a client message. Returns `None` for replies, non-Ethernet clients,
/// and packets without the DHCP cookie or a message type.
#[must_use]
pub fn parse_client_message(packet: &[u8]) -> Option<ClientMessage> {
    let (&op, _) = packet.split_first()?;
    if op != OP_REQUEST
        || *packet.get(1)? != HTYPE_ETHERNET
        || *packet.get(2)? != HLEN_ETHERNET
        || packet.get(236..240)? != MAGIC_COOKIE
    {
        return None;
    }

    let mut message_type = None;
    let mut requested_address = None;
    let mut server_id = None;
    let mut options = packet.get(OPTIONS_OFFSET..)?;
    while let Some((&code, rest)) = options.split_first() {
        match code {
            OPTION_END => break,
            OPTION_PAD => {
                options = rest;
                continue;
            }
            _ => {}
        }
        let (&len, rest) = rest.split_first()?;
        let (value, rest) = rest.split_at_checked(usize::from(len))?;
        match code {
            OPTION_MESSAGE_TYPE => message_type = value.first().copied().map(MessageType::from_byte),
            OPTION_REQUESTED_ADDRESS => requested_address = read_address(value),
            OPTION_SERVER_ID => server_id = read_address(value),
            _ => {}
        }
        options = rest;
    }

    Some(ClientMessage {
        xid: packet.get(4..8)?.try_into().ok()?,
        flags: packet.get(10..12)?.try_into().ok()?,
        client_mac: packet.get(28..34)?.try_into().ok()?,
        client_address: read_address(packet.get(12..16)?)?,
        message_type: message_type?,
        requested_address,
        server_id,
    })
}

fn read_address(bytes: &[u8]) -> Option<Ipv4Addr> {
    let octets: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(Ipv4Addr::from(octets))
}

/// Addresses handed out on the hotspot, keyed by client hardware address.
pub struct LeasePool {
    server: Ipv4Addr,
    netmask: Ipv4Addr,
    leases: [Option<[u8; 6]>; POOL_SIZE],
}

impl LeasePool {
    /// An empty pool on the network of `server`.
    #[must_use]
    pub fn new(server: Ipv4Addr, prefix_len: u8) -> Self {
        let host_bits = 32u32.saturating_sub(u32::from(prefix_len));
        let mask = u32::MAX.checked_shl(host_bits).unwrap_or(0);
        Self {
            server,
            netmask: Ipv4Addr::from_bits(mask),
            leases: [None; POOL_SIZE],
        }
    }

    /// The server's own address.
    #[must_use]
    pub const fn server(&self) -> Ipv4Addr {
        self.server
    }

    /// Address held by `mac`, if any.
    #[must_use]
    pub fn lease_of(&self, mac: [u8; 6]) -> Option<Ipv4Addr> {
        self.leases
            .iter()
            .position(|lease| *lease == Some(mac))
            .map(|slot| self.address_of(slot))
    }

    /// Propose an address for `mac`: its current lease, else the first free one.
    pub fn offer(&mut self, mac: [u8; 6]) -> Option<Ipv4Addr> {
        if let Some(address) = self.lease_of(mac) {
            return Some(address);
        }
        let slot = self.leases.iter().position(Option::is_none)?;
        if let Some(lease) = self.leases.get_mut(slot) {
            *lease = Some(mac);
        }
        Some(self.address_of(slot))
    }

    /// Confirm `address` for `mac`, or refuse it if it is outside the pool or taken.
    pub fn confirm(&mut self, mac: [u8; 6], address: Ipv4Addr) -> Option<Ipv4Addr> {
        let slot = self.slot_of(address)?;
        if self.leases.get(slot)?.is_some_and(|holder| holder != mac) {
            return None;
        }
        // A client moving addresses keeps only the newest one.
        if let Some(previous) = self.lease_of(mac).filter(|previous| *previous != address) {
            self.release_address(previous);
        }
        *self.leases.get_mut(slot)? = Some(mac);
        Some(address)
    }

    /// Free whatever `mac` holds.
    pub fn release(&mut self, mac: [u8; 6]) {
        for lease in &mut self.leases {
            if *lease == Some(mac) {
                *lease = None;
            }
        }
    }

    fn release_address(&mut self, address: Ipv4Addr) {
        if let Some(lease) = self.slot_of(address).and_then(|slot| self.leases.get_mut(slot)) {
            *lease = None;
        }
    }

    fn address_of(&self, slot: usize) -> Ipv4Addr {
        let [a, b, c, _] = self.server.octets();
        let host = u8::try_from(slot).map_or(u8::MAX, |slot| POOL_FIRST_HOST.saturating_add(slot));
        Ipv4Addr::new(a, b, c, host)
    }

    fn slot_of(&self, address: Ipv4Addr) -> Option<usize> {
        let [a, b, c, host] = address.octets();
        let [server_a, server_b, server_c, _] = self.server.octets();
        if [a, b, c] != [server_a, server_b, server_c] {
            return None;
        }
        let slot = usize::from(host.checked_sub(POOL_FIRST_HOST)?);
        (slot < POOL_SIZE).then_some(slot)
    }
}

/// Answer one client packet into `out`, updating `pool`.
///
/// DISCOVER gets an OFFER, REQUEST an ACK or NAK, RELEASE and DECLINE free
/// the client's lease with no reply. Requests naming another server are
/// ignored. Returns the reply length.
#[must_use]
pub fn respond(packet: &[u8], pool: &mut LeasePool, out: &mut [u8]) -> Option<usize> {
    let message = parse_client_message(packet)?;
    match message.message_type {
        MessageType::Discover => {
            let offered = pool.offer(message.client_mac)?;
            debug!("DHCP: offering .{}", offered.octets()[3]);
            write_reply(&message, MessageType::Offer, offered, pool, out)
        }
        MessageType::Request => {
            if message.server_id.is_some_and(|server| server != pool.server()) {
                return None;
            }
            let wanted = message
                .requested_address
                .or_else(|| Some(message.client_address).filter(|address| !address.is_unspecified()))?;
            match pool.confirm(message.client_mac, wanted) {
                Some(address) => {
                    info!("DHCP: leased .{}", address.octets()[3]);
                    write_reply(&message, MessageType::Ack, address, pool, out)
                }
                None => write_reply(&message, MessageType::Nak, Ipv4Addr::UNSPECIFIED, pool, out),
            }
        }
        MessageType::Release | MessageType::Decline => {
            pool.release(message.client_mac);
            None
        }
        _ => None,
    }
}

fn write_reply(
    message: &ClientMessage,
    reply_type: MessageType,
    your_address: Ipv4Addr,
    pool: &LeasePool,
    out: &mut [u8],
) -> Option<usize> {
    let out = out.get_mut(..MIN_REPLY_LEN)?;
    out.fill(0);
    out.get_mut(0..4)?
        .copy_from_slice(&[OP_REPLY, HTYPE_ETHERNET, HLEN_ETHERNET, 0]);
    out.get_mut(4..8)?.copy_from_slice(&message.xid);
    out.get_mut(10..12)?.copy_from_slice(&message.flags);
    out.get_mut(16..20)?.copy_from_slice(&your_address.octets());
    out.get_mut(20..24)?.copy_from_slice(&pool.server().octets());
    out.get_mut(28..34)?.copy_from_slice(&message.client_mac);
    out.get_mut(236..240)?.copy_from_slice(&MAGIC_COOKIE);

    let server = pool.server().octets();
    let mut options = OptionWriter {
        out: out.get_mut(OPTIONS_OFFSET..)?,
        len: 0,
    };
    options.put(OPTION_MESSAGE_TYPE, &[reply_type.to_byte()])?;
    options.put(OPTION_SERVER_ID, &server)?;
    if reply_type != MessageType::Nak {
        options.put(OPTION_LEASE_TIME, &LEASE_SECS.to_be_bytes())?;
        options.put(OPTION_SUBNET_MASK, &pool.netmask.octets())?;
        options.put(OPTION_ROUTER, &server)?;
        options.put(OPTION_DNS, &server)?;
    }
    options.end()?;

    Some(MIN_REPLY_LEN)
}

struct OptionWriter<'a> {
    out: &'a mut [u8],
    len: usize,
}

impl OptionWriter<'_> {
    fn put(&mut self, code: u8, value: &[u8]) -> Option<()> {
        let value_len = u8::try_from(value.len()).ok()?;
        let end = self.len.checked_add(2)?.checked_add(value.len())?;
        let slot = self.out.get_mut(self.len..end)?;
        let (head, body) = slot.split_at_mut(2);
        head.copy_from_slice(&[code, value_len]);
        body.copy_from_slice(value);
        self.len = end;
        Some(())
    }

    fn end(&mut self) -> Option<()> {
        *self.out.get_mut(self.len)? = OPTION_END;
        self.len = self.len.checked_add(1)?;
        Some(())
    }
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
mod server {
    use core::net::Ipv4Addr;

    use embassy_net::Stack;
    use embassy_net::udp::{PacketMetadata, UdpSocket};

    use super::{CLIENT_PORT, LeasePool, MAX_DHCP_PACKET, SERVER_PORT, respond};
    use crate::connectivity::HOTSPOT_PREFIX_LEN;

    /// Serve leases on the hotspot until the device restarts.
    #[embassy_executor::task]
    pub async fn dhcp_server_task(stack: Stack<'static>, server: Ipv4Addr) -> ! {
        let mut rx_meta = [PacketMetadata::EMPTY; 4];
        let mut rx_buffer = [0u8; 1536];
        let mut tx_meta = [PacketMetadata::EMPTY; 4];
        let mut tx_buffer = [0u8; 1536];
        let mut socket = UdpSocket::new(
            stack,
            &mut rx_meta,
            &mut rx_buffer,
            &mut tx_meta,
            &mut tx_buffer,
        );
        if socket.bind(SERVER_PORT).is_err() {
            error!("DHCP: cannot bind port {}", SERVER_PORT);
            let never = core::future::pending::<core::convert::Infallible>().await;
            match never {}
        }
        info!("DHCP: serving leases on the hotspot");

        let mut pool = LeasePool::new(server, HOTSPOT_PREFIX_LEN);
        let mut request = [0u8; MAX_DHCP_PACKET];
        let mut reply = [0u8; MAX_DHCP_PACKET];
        loop {
            let Ok((len, _meta)) = socket.recv_from(&mut request).await else {
                continue;
            };
            let Some(request) = request.get(..len) else {
                continue;
            };
            let Some(reply_len) = respond(request, &mut pool, &mut reply) else {
                continue;
            };
            let Some(reply) = reply.get(..reply_len) else {
                continue;
            };
            // Clients have no address yet, so replies are broadcast.
            if socket
                .send_to(reply, (Ipv4Addr::BROADCAST, CLIENT_PORT))
                .await
                .is_err()
            {
                debug!("DHCP: reply send failed");
            }
        }
    }
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
pub use server::dhcp_server_task;
