//! Persisted device settings.
//!
//! Settings are loaded once at boot. The only write path is the settings
//! portal, and every write is followed by a restart, so nothing here is ever
//! reconfigured in place.

use heapless::String;
use serde::{Deserialize, Serialize};

use crate::pixel_buffer::{MAX_PIXELS, PixelLayout};
use crate::{Error, Result};

/// Longest network name (the 802.11 SSID limit).
pub const NETWORK_NAME_CAPACITY: usize = 32;
/// Longest network passphrase.
pub const NETWORK_SECRET_CAPACITY: usize = 64;
/// Longest device name. Also used as the hotspot SSID.
pub const DEVICE_NAME_CAPACITY: usize = 32;
/// Upper bound on the JSON form of a [`DeviceConfig`].
pub const SETTINGS_JSON_CAPACITY: usize = 384;

/// Device name used until one is configured.
pub const DEFAULT_DEVICE_NAME: &str = "wifi-node";
const DEFAULT_CHANNELS_PER_PIXEL: u8 = 4;
// Scratch space for decoding one escaped string: the largest string field.
const UNESCAPE_CAPACITY: usize = NETWORK_SECRET_CAPACITY;
const DEFAULT_PIXEL_COUNT: u16 = 60;
const DEFAULT_START_UNIVERSE: u16 = 0;

/// Settings that decide how the node joins a network and drives its strip.
///
/// The serialized keys match the settings portal's JSON:
/// `ssid, password, nodeName, pixelSize, pixelCount, startUniverse`.
/// Keys missing from an update keep their defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Network to join in station mode. Empty means unconfigured.
    #[serde(rename = "ssid")]
    pub network_name: String<NETWORK_NAME_CAPACITY>,
    /// Passphrase for the network. Empty means an open network. Stored in plaintext.
    #[serde(rename = "password")]
    pub network_secret: String<NETWORK_SECRET_CAPACITY>,
    /// Name advertised over Art-Net and used as the hotspot SSID.
    #[serde(rename = "nodeName")]
    pub device_name: String<DEVICE_NAME_CAPACITY>,
    /// 3 for RGB strips, 4 for RGBW strips.
    #[serde(rename = "pixelSize")]
    pub channels_per_pixel: u8,
    /// Number of pixels on the strip.
    #[serde(rename = "pixelCount")]
    pub pixel_count: u16,
    /// Universe that maps to pixel 0.
    #[serde(rename = "startUniverse")]
    pub start_universe: u16,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            network_name: String::new(),
            network_secret: String::new(),
            device_name: String::try_from(DEFAULT_DEVICE_NAME).unwrap_or_default(),
            channels_per_pixel: DEFAULT_CHANNELS_PER_PIXEL,
            pixel_count: DEFAULT_PIXEL_COUNT,
            start_universe: DEFAULT_START_UNIVERSE,
        }
    }
}

impl DeviceConfig {
    /// The configured network, or `None` when the node has never been set up.
    #[must_use]
    pub fn network_name(&self) -> Option<&str> {
        Some(self.network_name.as_str()).filter(|name| !name.is_empty())
    }

    /// The network passphrase, or `None` for an open network.
    #[must_use]
    pub fn network_secret(&self) -> Option<&str> {
        Some(self.network_secret.as_str()).filter(|secret| !secret.is_empty())
    }

    /// Pixel layout. Only `4` selects RGBW.
    #[must_use]
    pub const fn layout(&self) -> PixelLayout {
        if self.channels_per_pixel == 4 {
            PixelLayout::Rgbw
        } else {
            PixelLayout::Rgb
        }
    }

    /// Pixel count as a buffer length, clamped to [`MAX_PIXELS`].
    #[must_use]
    pub fn pixel_len(&self) -> usize {
        usize::from(self.pixel_count).min(MAX_PIXELS)
    }

    /// Channels consumed by the whole strip.
    #[must_use]
    pub fn total_channels(&self) -> usize {
        self.layout().channels() * self.pixel_len()
    }

    /// Coerce stored values into the ranges the node can drive.
    ///
    /// A channel count other than 3 or 4 becomes 3, and the pixel count is
    /// clamped to [`MAX_PIXELS`].
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if !matches!(self.channels_per_pixel, 3 | 4) {
            warn!(
                "Config: pixelSize {} unsupported, using 3",
                self.channels_per_pixel
            );
            self.channels_per_pixel = 3;
        }
        if usize::from(self.pixel_count) > MAX_PIXELS {
            warn!(
                "Config: pixelCount {} exceeds {}, clamping",
                self.pixel_count, MAX_PIXELS
            );
            self.pixel_count = u16::try_from(MAX_PIXELS).unwrap_or(u16::MAX);
        }
        self
    }

    /// Serialize as the portal's flat JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FormatError`] if the JSON does not fit
    /// [`SETTINGS_JSON_CAPACITY`].
    pub fn to_json(&self) -> Result<String<SETTINGS_JSON_CAPACITY>> {
        serde_json_core::to_string(self).map_err(|_| Error::FormatError)
    }

    /// Parse the portal's flat JSON object. Unknown keys are ignored.
    ///
    /// String escapes are decoded, so a passphrase containing `"` or `\` is
    /// stored exactly as typed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSettings`] if the body is not JSON, or a value
    /// has the wrong type or does not fit its field.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let mut unescaped = [0u8; UNESCAPE_CAPACITY];
        serde_json_core::from_slice_escaped::<Self>(body, &mut unescaped)
            .map(|(config, _)| config)
            .map_err(|_| Error::InvalidSettings)
    }
}
