//! Persistent settings in one internal flash erase block.
//!
//! Block layout, little-endian:
//!
//! | Offset | Size | Field                           |
//! |--------|------|---------------------------------|
//! | 0      | 4    | magic `'BLKS'`                  |
//! | 4      | 4    | FNV-1a hash of the type name    |
//! | 8      | 2    | payload length                  |
//! | 10     | n    | `postcard` payload              |
//! | 10 + n | 4    | CRC-32 of everything before it  |
//!
//! A block without the magic, or written under a different type, reads as
//! empty. A block whose length or CRC does not check out reads as
//! [`Error::StorageCorrupted`].

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::config::DeviceConfig;
use crate::{Error, Result};

/// One flash erase block.
pub const BLOCK_SIZE: usize = 4096;

const MAGIC: u32 = 0x424C_4B53; // 'BLKS'
const HEADER_SIZE: usize = 4 + 4 + 2; // Magic + TypeHash + PayloadLen
const CRC_SIZE: usize = 4;
const MAX_PAYLOAD_SIZE: usize = BLOCK_SIZE - HEADER_SIZE - CRC_SIZE;

/// Somewhere a [`DeviceConfig`] survives a restart.
pub trait SettingsStore {
    /// Read the stored settings. `Ok(None)` when nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium fails or the stored bytes are corrupted.
    fn load(&mut self) -> Result<Option<DeviceConfig>>;

    /// Replace the stored settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings cannot be encoded or written.
    fn save(&mut self, config: &DeviceConfig) -> Result<()>;
}

/// The stored settings, or the defaults if there are none or they are unreadable.
pub fn load_or_default(store: &mut impl SettingsStore) -> DeviceConfig {
    let config = match store.load() {
        Ok(Some(config)) => config,
        Ok(None) => {
            info!("Flash: no stored settings, using defaults");
            DeviceConfig::default()
        }
        Err(err) => {
            error!("Flash: {}, using defaults", err);
            DeviceConfig::default()
        }
    };
    config.normalized()
}

/// Encode `value` into a full erase block image. Unused bytes stay erased (`0xFF`).
///
/// Returns the payload length.
///
/// # Errors
///
/// Returns [`Error::FormatError`] if the value does not fit one block.
pub fn encode_block<T>(value: &T, block: &mut [u8; BLOCK_SIZE]) -> Result<usize>
where
    T: Serialize,
{
    block.fill(0xFF);
    let (header, rest) = block.split_at_mut(HEADER_SIZE);
    let payload_len = postcard::to_slice(value, rest.get_mut(..MAX_PAYLOAD_SIZE).ok_or(Error::FormatError)?)
        .map_err(|_| {
            error!(
                "Flash: Serialization failed or data too large (max {} bytes)",
                MAX_PAYLOAD_SIZE
            );
            Error::FormatError
        })?
        .len();
    let stored_len = u16::try_from(payload_len).map_err(|_| Error::FormatError)?;

    header
        .get_mut(0..4)
        .ok_or(Error::IndexOutOfBounds)?
        .copy_from_slice(&MAGIC.to_le_bytes());
    header
        .get_mut(4..8)
        .ok_or(Error::IndexOutOfBounds)?
        .copy_from_slice(&compute_type_hash::<T>().to_le_bytes());
    header
        .get_mut(8..10)
        .ok_or(Error::IndexOutOfBounds)?
        .copy_from_slice(&stored_len.to_le_bytes());

    let crc_offset = HEADER_SIZE.saturating_add(payload_len);
    let crc = compute_crc(block.get(..crc_offset).ok_or(Error::IndexOutOfBounds)?);
    block
        .get_mut(crc_offset..)
        .and_then(|tail| tail.get_mut(..CRC_SIZE))
        .ok_or(Error::IndexOutOfBounds)?
        .copy_from_slice(&crc.to_le_bytes());
    Ok(payload_len)
}

/// Decode a block image written by [`encode_block`] for the same type.
///
/// # Errors
///
/// Returns [`Error::StorageCorrupted`] on a bad length, CRC, or payload.
pub fn decode_block<T>(block: &[u8; BLOCK_SIZE]) -> Result<Option<T>>
where
    T: for<'de> Deserialize<'de>,
{
    if read_u32(block, 0)? != MAGIC {
        info!("Flash: No data in block");
        return Ok(None);
    }

    let stored_type_hash = read_u32(block, 4)?;
    let expected_type_hash = compute_type_hash::<T>();
    if stored_type_hash != expected_type_hash {
        info!(
            "Flash: Type mismatch (expected hash {}, found {})",
            expected_type_hash, stored_type_hash
        );
        return Ok(None);
    }

    let payload_len = usize::from(u16::from_le_bytes(read_array(block, 8)?));
    if payload_len > MAX_PAYLOAD_SIZE {
        error!("Flash: Invalid payload length {}", payload_len);
        return Err(Error::StorageCorrupted);
    }

    let crc_offset = HEADER_SIZE.saturating_add(payload_len);
    let stored_crc = read_u32(block, crc_offset)?;
    let computed_crc = compute_crc(block.get(..crc_offset).ok_or(Error::StorageCorrupted)?);
    if stored_crc != computed_crc {
        error!(
            "Flash: CRC mismatch (expected {}, found {})",
            computed_crc, stored_crc
        );
        return Err(Error::StorageCorrupted);
    }

    let payload = block
        .get(HEADER_SIZE..crc_offset)
        .ok_or(Error::StorageCorrupted)?;
    let value: T = postcard::from_bytes(payload).map_err(|_| {
        error!("Flash: Deserialization failed");
        Error::StorageCorrupted
    })?;
    Ok(Some(value))
}

fn read_array<const N: usize>(block: &[u8], at: usize) -> Result<[u8; N]> {
    block
        .get(at..)
        .and_then(|tail| tail.get(..N))
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(Error::StorageCorrupted)
}

fn read_u32(block: &[u8], at: usize) -> Result<u32> {
    read_array(block, at).map(u32::from_le_bytes)
}

/// Compute FNV-1a hash of the type name for type safety.
fn compute_type_hash<T>() -> u32 {
    const FNV_PRIME: u32 = 16_777_619;
    const FNV_OFFSET: u32 = 2_166_136_261;

    core::any::type_name::<T>()
        .bytes()
        .fold(FNV_OFFSET, |hash, byte| {
            (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
        })
}

fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[cfg(not(feature = "host"))]
mod flash {
    use embassy_rp::Peri;
    use embassy_rp::flash::{Blocking, ERASE_SIZE, Flash as EmbassyFlash};
    use embassy_rp::peripherals::FLASH;

    use super::{BLOCK_SIZE, SettingsStore, decode_block, encode_block};
    use crate::config::DeviceConfig;
    use crate::{Error, Result};

    // Internal flash size for Raspberry Pi Pico 2 (4 MB).
    #[cfg(feature = "pico2")]
    const INTERNAL_FLASH_SIZE: usize = 4 * 1024 * 1024;

    // Internal flash size for Raspberry Pi Pico 1 W (2 MB).
    #[cfg(not(feature = "pico2"))]
    const INTERNAL_FLASH_SIZE: usize = 2 * 1024 * 1024;

    // The settings block is the last erase block of flash.
    #[expect(clippy::cast_possible_truncation, reason = "flash is far below 4 GiB")]
    const SETTINGS_OFFSET: u32 = (INTERNAL_FLASH_SIZE - ERASE_SIZE) as u32;
    #[expect(clippy::cast_possible_truncation, reason = "flash is far below 4 GiB")]
    const SETTINGS_END: u32 = INTERNAL_FLASH_SIZE as u32;

    const _: () = assert!(BLOCK_SIZE == ERASE_SIZE);

    /// Settings kept in the last erase block of internal flash.
    pub struct SettingsFlash {
        flash: EmbassyFlash<'static, FLASH, Blocking, INTERNAL_FLASH_SIZE>,
    }

    impl SettingsFlash {
        /// Take the flash peripheral.
        #[must_use]
        pub fn new(peripheral: Peri<'static, FLASH>) -> Self {
            Self {
                flash: EmbassyFlash::new_blocking(peripheral),
            }
        }
    }

    impl SettingsStore for SettingsFlash {
        fn load(&mut self) -> Result<Option<DeviceConfig>> {
            let mut block = [0u8; BLOCK_SIZE];
            self.flash
                .blocking_read(SETTINGS_OFFSET, &mut block)
                .map_err(Error::Flash)?;
            let config = decode_block(&block)?;
            if config.is_some() {
                info!("Flash: Loaded settings");
            }
            Ok(config)
        }

        fn save(&mut self, config: &DeviceConfig) -> Result<()> {
            let mut block = [0xFFu8; BLOCK_SIZE];
            let payload_len = encode_block(config, &mut block)?;
            self.flash
                .blocking_erase(SETTINGS_OFFSET, SETTINGS_END)
                .map_err(Error::Flash)?;
            self.flash
                .blocking_write(SETTINGS_OFFSET, &block)
                .map_err(Error::Flash)?;
            info!("Flash: Saved {} bytes of settings", payload_len);
            Ok(())
        }
    }
}

#[cfg(not(feature = "host"))]
pub use flash::SettingsFlash;
