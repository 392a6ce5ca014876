//! Crate-wide error type.

use derive_more::Display;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors raised outside the frame-ingestion hot path.
///
/// Frame ingestion never returns one of these. Malformed packets and
/// out-of-range pixels are dropped where they are found.
#[derive(Debug, Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Internal flash read, write, or erase failed.
    #[cfg(not(feature = "host"))]
    #[display("flash error: {_0:?}")]
    Flash(embassy_rp::flash::Error),

    /// An embassy task could not be spawned.
    #[cfg(not(feature = "host"))]
    #[display("task spawn failed: {_0:?}")]
    TaskSpawn(embassy_executor::SpawnError),

    /// A socket operation failed.
    #[cfg(not(feature = "host"))]
    #[display("network error")]
    Network,

    /// A value could not be serialized into its fixed-size buffer.
    #[display("value does not fit its serialization buffer")]
    FormatError,

    /// Stored bytes failed the length, CRC, or decode checks.
    #[display("stored data is corrupted")]
    StorageCorrupted,

    /// An index fell outside a fixed-capacity container.
    #[display("index out of bounds")]
    IndexOutOfBounds,

    /// A settings body could not be coerced into a device configuration.
    #[display("settings body is not a valid configuration")]
    InvalidSettings,

    /// An HTTP request could not be parsed.
    #[display("malformed HTTP request")]
    MalformedRequest,
}

impl core::error::Error for Error {}

#[cfg(not(feature = "host"))]
impl From<embassy_executor::SpawnError> for Error {
    fn from(err: embassy_executor::SpawnError) -> Self {
        Self::TaskSpawn(err)
    }
}
