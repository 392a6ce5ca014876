#![allow(missing_docs)]
//! Host-level tests for settings storage and the portal's write path.

use artnet_pixel_node::Error;
use artnet_pixel_node::config::DeviceConfig;
use artnet_pixel_node::connectivity::portal::{self, Action, Status};
use artnet_pixel_node::storage::{
    self, BLOCK_SIZE, SettingsStore, decode_block, encode_block,
};
use heapless::String;

/// One erase block in RAM, encoded exactly as flash would hold it.
struct BlockStore {
    block: Box<[u8; BLOCK_SIZE]>,
}

impl BlockStore {
    fn erased() -> Self {
        Self {
            block: Box::new([0xFF; BLOCK_SIZE]),
        }
    }
}

impl SettingsStore for BlockStore {
    fn load(&mut self) -> artnet_pixel_node::Result<Option<DeviceConfig>> {
        decode_block(&self.block)
    }

    fn save(&mut self, config: &DeviceConfig) -> artnet_pixel_node::Result<()> {
        encode_block(config, &mut self.block).map(|_| ())
    }
}

fn http(method: &str, path: &str, body: &str) -> Vec<u8> {
    format!(
        "{method} {path} HTTP/1.1\r\nHost: 192.168.1.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

const UPDATE: &str = r#"{"ssid":"venue","password":"hunter22","nodeName":"stage-left","pixelSize":3,"pixelCount":150,"startUniverse":2}"#;

#[test]
fn erased_flash_loads_defaults() {
    let mut store = BlockStore::erased();

    assert_eq!(store.load().unwrap(), None);
    let config = storage::load_or_default(&mut store);
    assert_eq!(config, DeviceConfig::default());
    assert_eq!(config.device_name.as_str(), "wifi-node");
    assert_eq!(config.channels_per_pixel, 4);
    assert_eq!(config.pixel_count, 60);
    assert_eq!(config.start_universe, 0);
    assert_eq!(config.network_name(), None);
    assert_eq!(config.network_secret(), None);
}

#[test]
fn update_then_restart_then_read_returns_same_fields() {
    let mut store = BlockStore::erased();
    let running = DeviceConfig::default();

    // POST /update
    let request_bytes = http("POST", "/update", UPDATE);
    let request = portal::parse_request(&request_bytes).unwrap();
    let reply = portal::route(&request, &running);
    assert_eq!(reply.status, Status::Created);
    assert_eq!(reply.body.as_bytes(), br#"{"status":"ok"}"#);
    let Action::PersistAndRestart(update) = reply.action else {
        panic!("update did not request a restart");
    };
    store.save(&update).unwrap();

    // Restart: settings come back from the block.
    let restarted = storage::load_or_default(&mut store);
    assert_eq!(restarted, update);

    // GET /settings
    let request_bytes = http("GET", "/settings", "");
    let request = portal::parse_request(&request_bytes).unwrap();
    let reply = portal::route(&request, &restarted);
    assert_eq!(reply.status, Status::Ok);
    let read_back = DeviceConfig::from_json(reply.body.as_bytes()).unwrap();
    assert_eq!(read_back, DeviceConfig::from_json(UPDATE.as_bytes()).unwrap());
    assert_eq!(read_back.network_name(), Some("venue"));
    assert_eq!(read_back.network_secret(), Some("hunter22"));
    assert_eq!(read_back.pixel_count, 150);
    assert_eq!(read_back.start_universe, 2);
}

#[test]
fn crc_mismatch_is_reported_and_defaults_apply() {
    let mut store = BlockStore::erased();
    store.save(&DeviceConfig::default()).unwrap();
    // Flip a payload byte.
    store.block[12] ^= 0x01;

    assert!(matches!(store.load(), Err(Error::StorageCorrupted)));
    assert_eq!(storage::load_or_default(&mut store), DeviceConfig::default());
}

#[test]
fn oversized_length_is_corruption() {
    let mut store = BlockStore::erased();
    store.save(&DeviceConfig::default()).unwrap();
    store.block[8..10].copy_from_slice(&u16::MAX.to_le_bytes());

    assert!(matches!(store.load(), Err(Error::StorageCorrupted)));
}

#[test]
fn block_written_for_another_type_reads_as_empty() {
    let mut block = [0xFF; BLOCK_SIZE];
    encode_block(&0xC0FF_EEu32, &mut block).unwrap();

    assert_eq!(decode_block::<DeviceConfig>(&block).unwrap(), None);
    assert_eq!(decode_block::<u32>(&block).unwrap(), Some(0xC0FF_EE));
}

#[test]
fn unused_block_bytes_stay_erased() {
    let mut block = [0u8; BLOCK_SIZE];
    let payload_len = encode_block(&DeviceConfig::default(), &mut block).unwrap();

    assert_eq!(&block[0..4], &0x424C_4B53u32.to_le_bytes());
    assert!(block[10 + payload_len + 4..].iter().all(|byte| *byte == 0xFF));
}

#[test]
fn stored_out_of_range_values_are_normalized() {
    let mut store = BlockStore::erased();
    store
        .save(&DeviceConfig {
            channels_per_pixel: 5,
            pixel_count: 4000,
            ..DeviceConfig::default()
        })
        .unwrap();

    let config = storage::load_or_default(&mut store);
    assert_eq!(config.channels_per_pixel, 3);
    assert_eq!(config.pixel_count, 1024);
    assert_eq!(config.total_channels(), 3 * 1024);
}

#[test]
fn update_with_missing_keys_takes_defaults() {
    let update = DeviceConfig::from_json(br#"{"ssid":"venue","sync":true}"#).unwrap();

    assert_eq!(
        update,
        DeviceConfig {
            network_name: String::try_from("venue").unwrap(),
            ..DeviceConfig::default()
        }
    );
}

#[test]
fn escaped_strings_survive_json_round_trip() {
    let config = DeviceConfig {
        network_name: String::try_from(r"Bob's \ net").unwrap(),
        network_secret: String::try_from(r#"pa"ss\w"#).unwrap(),
        device_name: String::try_from("rig \"A\"").unwrap(),
        ..DeviceConfig::default()
    };

    let json = config.to_json().unwrap();
    assert!(json.contains(r#""password":"pa\"ss\\w""#));
    let parsed = DeviceConfig::from_json(json.as_bytes()).unwrap();

    assert_eq!(parsed, config);
    // A second trip through the page does not double the escapes.
    let again = DeviceConfig::from_json(parsed.to_json().unwrap().as_bytes()).unwrap();
    assert_eq!(again, config);
}

#[test]
fn escaped_update_is_stored_verbatim() {
    let mut store = BlockStore::erased();
    let body = r#"{"ssid":"venue \"5G\"","password":"a\\b\"c","nodeName":"left\\right"}"#;

    let request_bytes = http("POST", "/update", body);
    let request = portal::parse_request(&request_bytes).unwrap();
    let reply = portal::route(&request, &DeviceConfig::default());
    let Action::PersistAndRestart(update) = reply.action else {
        panic!("update did not request a restart");
    };
    store.save(&update).unwrap();
    let restarted = storage::load_or_default(&mut store);

    assert_eq!(restarted.network_name(), Some("venue \"5G\""));
    assert_eq!(restarted.network_secret(), Some(r#"a\b"c"#));
    assert_eq!(restarted.device_name.as_str(), r"left\right");
}
