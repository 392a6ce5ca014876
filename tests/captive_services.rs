#![allow(missing_docs)]
//! Host-level tests for the hotspot's DNS and DHCP responders.

use core::net::Ipv4Addr;

use artnet_pixel_node::connectivity::dhcp::{self, LeasePool, MAX_DHCP_PACKET, MessageType};
use artnet_pixel_node::connectivity::dns::{self, MAX_DNS_PACKET};
use artnet_pixel_node::connectivity::{HOTSPOT_ADDRESS, HOTSPOT_PREFIX_LEN};

// DNS

fn dns_query(name: &str, qtype: u16, flags: u16) -> Vec<u8> {
    let mut query = vec![0xBE, 0xEF];
    query.extend_from_slice(&flags.to_be_bytes());
    query.extend_from_slice(&[0, 1, 0, 0, 0, 0, 0, 0]);
    for label in name.split('.') {
        query.push(label.len() as u8);
        query.extend_from_slice(label.as_bytes());
    }
    query.push(0);
    query.extend_from_slice(&qtype.to_be_bytes());
    query.extend_from_slice(&1u16.to_be_bytes());
    query
}

#[test]
fn every_a_query_resolves_to_hotspot() {
    let query = dns_query("connectivitycheck.gstatic.com", 1, 0x0100);
    let mut answer = [0u8; MAX_DNS_PACKET];

    let len = dns::answer_query(&query, HOTSPOT_ADDRESS, &mut answer).unwrap();

    assert_eq!(len, query.len() + 16);
    assert_eq!(&answer[0..2], &[0xBE, 0xEF]);
    // Response, authoritative, recursion desired and available.
    assert_eq!(&answer[2..4], &[0x85, 0x80]);
    assert_eq!(&answer[4..8], &[0, 1, 0, 1]);
    assert_eq!(&answer[12..query.len()], &query[12..]);
    let record = &answer[query.len()..len];
    assert_eq!(&record[0..2], &[0xC0, 0x0C]);
    assert_eq!(&record[2..6], &[0, 1, 0, 1]);
    assert_eq!(&record[6..10], &60u32.to_be_bytes());
    assert_eq!(&record[10..12], &[0, 4]);
    assert_eq!(&record[12..16], &[192, 168, 1, 1]);
}

#[test]
fn non_a_query_gets_empty_answer() {
    let query = dns_query("example.com", 28, 0x0100);
    let mut answer = [0u8; MAX_DNS_PACKET];

    let len = dns::answer_query(&query, HOTSPOT_ADDRESS, &mut answer).unwrap();

    assert_eq!(len, query.len());
    assert_eq!(&answer[6..8], &[0, 0]);
}

#[test]
fn responses_and_garbage_are_ignored() {
    let mut answer = [0u8; MAX_DNS_PACKET];

    let response = dns_query("example.com", 1, 0x8180);
    assert_eq!(dns::answer_query(&response, HOTSPOT_ADDRESS, &mut answer), None);
    // Opcode 2 (status).
    let status = dns_query("example.com", 1, 0x1000);
    assert_eq!(dns::answer_query(&status, HOTSPOT_ADDRESS, &mut answer), None);
    let mut truncated = dns_query("example.com", 1, 0x0100);
    truncated.truncate(truncated.len() - 3);
    assert_eq!(dns::answer_query(&truncated, HOTSPOT_ADDRESS, &mut answer), None);
    assert_eq!(dns::answer_query(&[0; 5], HOTSPOT_ADDRESS, &mut answer), None);
}

#[test]
fn answer_that_does_not_fit_is_dropped() {
    let query = dns_query("example.com", 1, 0x0100);
    let mut answer = [0u8; 20];

    assert_eq!(dns::answer_query(&query, HOTSPOT_ADDRESS, &mut answer), None);
}

// DHCP

const MAC_A: [u8; 6] = [0x02, 0, 0, 0, 0, 0xAA];
const MAC_B: [u8; 6] = [0x02, 0, 0, 0, 0, 0xBB];

fn dhcp_message(mac: [u8; 6], message_type: u8, options: &[(u8, &[u8])]) -> Vec<u8> {
    let mut packet = vec![0u8; 240];
    packet[0..3].copy_from_slice(&[1, 1, 6]);
    packet[4..8].copy_from_slice(&[0x12, 0x34, 0x56, 0x78]);
    packet[10..12].copy_from_slice(&[0x80, 0x00]);
    packet[28..34].copy_from_slice(&mac);
    packet[236..240].copy_from_slice(&[99, 130, 83, 99]);
    packet.extend_from_slice(&[53, 1, message_type]);
    for (code, value) in options {
        packet.push(*code);
        packet.push(value.len() as u8);
        packet.extend_from_slice(value);
    }
    packet.push(255);
    packet
}

fn pool() -> LeasePool {
    LeasePool::new(HOTSPOT_ADDRESS, HOTSPOT_PREFIX_LEN)
}

/// Option values by code from a reply.
fn reply_option(reply: &[u8], code: u8) -> Option<Vec<u8>> {
    let mut options = &reply[240..];
    while let [option, rest @ ..] = options {
        match *option {
            255 => return None,
            0 => options = rest,
            _ => {
                let len = usize::from(rest[0]);
                if *option == code {
                    return Some(rest[1..=len].to_vec());
                }
                options = &rest[1 + len..];
            }
        }
    }
    None
}

#[test]
fn parse_reads_client_fields() {
    let packet = dhcp_message(MAC_A, 3, &[(50, &[192, 168, 1, 100]), (54, &[192, 168, 1, 1])]);

    let message = dhcp::parse_client_message(&packet).unwrap();

    assert_eq!(message.xid, [0x12, 0x34, 0x56, 0x78]);
    assert_eq!(message.client_mac, MAC_A);
    assert_eq!(message.message_type, MessageType::Request);
    assert_eq!(message.requested_address, Some(Ipv4Addr::new(192, 168, 1, 100)));
    assert_eq!(message.server_id, Some(HOTSPOT_ADDRESS));
}

#[test]
fn discover_gets_offer_with_router_and_dns() {
    let mut pool = pool();
    let mut reply = [0u8; MAX_DHCP_PACKET];

    let len = dhcp::respond(&dhcp_message(MAC_A, 1, &[]), &mut pool, &mut reply).unwrap();
    let reply = &reply[..len];

    assert_eq!(reply[0], 2);
    assert_eq!(&reply[4..8], &[0x12, 0x34, 0x56, 0x78]);
    assert_eq!(&reply[16..20], &[192, 168, 1, 100]);
    assert_eq!(&reply[28..34], &MAC_A);
    assert_eq!(reply_option(reply, 53), Some(vec![2]));
    assert_eq!(reply_option(reply, 54), Some(vec![192, 168, 1, 1]));
    assert_eq!(reply_option(reply, 51), Some(3600u32.to_be_bytes().to_vec()));
    assert_eq!(reply_option(reply, 1), Some(vec![255, 255, 255, 0]));
    assert_eq!(reply_option(reply, 3), Some(vec![192, 168, 1, 1]));
    assert_eq!(reply_option(reply, 6), Some(vec![192, 168, 1, 1]));
}

#[test]
fn request_for_offered_address_is_acked() {
    let mut pool = pool();
    let mut reply = [0u8; MAX_DHCP_PACKET];
    dhcp::respond(&dhcp_message(MAC_A, 1, &[]), &mut pool, &mut reply).unwrap();

    let request = dhcp_message(MAC_A, 3, &[(50, &[192, 168, 1, 100]), (54, &[192, 168, 1, 1])]);
    let len = dhcp::respond(&request, &mut pool, &mut reply).unwrap();

    assert_eq!(reply_option(&reply[..len], 53), Some(vec![5]));
    assert_eq!(&reply[16..20], &[192, 168, 1, 100]);
    assert_eq!(pool.lease_of(MAC_A), Some(Ipv4Addr::new(192, 168, 1, 100)));
}

#[test]
fn clients_get_distinct_addresses() {
    let mut pool = pool();

    assert_eq!(pool.offer(MAC_A), Some(Ipv4Addr::new(192, 168, 1, 100)));
    assert_eq!(pool.offer(MAC_B), Some(Ipv4Addr::new(192, 168, 1, 101)));
    // A repeated discover keeps the same address.
    assert_eq!(pool.offer(MAC_A), Some(Ipv4Addr::new(192, 168, 1, 100)));
}

#[test]
fn taken_or_foreign_address_is_naked() {
    let mut pool = pool();
    let mut reply = [0u8; MAX_DHCP_PACKET];
    pool.offer(MAC_A);

    let taken = dhcp_message(MAC_B, 3, &[(50, &[192, 168, 1, 100])]);
    let len = dhcp::respond(&taken, &mut pool, &mut reply).unwrap();
    assert_eq!(reply_option(&reply[..len], 53), Some(vec![6]));
    assert_eq!(reply_option(&reply[..len], 51), None);

    let foreign = dhcp_message(MAC_B, 3, &[(50, &[10, 0, 0, 7])]);
    let len = dhcp::respond(&foreign, &mut pool, &mut reply).unwrap();
    assert_eq!(reply_option(&reply[..len], 53), Some(vec![6]));
}

#[test]
fn request_for_another_server_is_ignored() {
    let mut pool = pool();
    let mut reply = [0u8; MAX_DHCP_PACKET];

    let request = dhcp_message(MAC_A, 3, &[(50, &[192, 168, 1, 100]), (54, &[192, 168, 1, 254])]);

    assert_eq!(dhcp::respond(&request, &mut pool, &mut reply), None);
    assert_eq!(pool.lease_of(MAC_A), None);
}

#[test]
fn release_frees_the_lease() {
    let mut pool = pool();
    let mut reply = [0u8; MAX_DHCP_PACKET];
    pool.offer(MAC_A);

    assert_eq!(dhcp::respond(&dhcp_message(MAC_A, 7, &[]), &mut pool, &mut reply), None);
    assert_eq!(pool.lease_of(MAC_A), None);
    assert_eq!(pool.offer(MAC_B), Some(Ipv4Addr::new(192, 168, 1, 100)));
}

#[test]
fn exhausted_pool_makes_no_offer() {
    let mut pool = pool();
    for host in 0..16u8 {
        assert!(pool.offer([0x02, 0, 0, 0, 1, host]).is_some());
    }
    let mut reply = [0u8; MAX_DHCP_PACKET];

    assert_eq!(dhcp::respond(&dhcp_message(MAC_A, 1, &[]), &mut pool, &mut reply), None);
}

#[test]
fn server_replies_are_not_client_messages() {
    let mut packet = dhcp_message(MAC_A, 2, &[]);
    packet[0] = 2;

    assert_eq!(dhcp::parse_client_message(&packet), None);
}
