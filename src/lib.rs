//! Art-Net to addressable LED strip bridge for the Pico W and Pico 2 W.
//!
//! At boot the node either joins the configured network or, failing that,
//! hosts its own access point with a captive settings portal. When joined,
//! Art-Net universes are mapped into a pixel buffer on core 0 and pushed to
//! the strip from a render context on core 1, one frame per `ArtSync`.
//!
//! # Glossary
//!
//! - **Universe:** an addressable group of up to 512 channels, identified by a 15-bit id.
//! - **Frame:** one `ArtDmx` payload for a single universe, tagged with a sequence number.
//! - **Sync:** an `ArtSync` packet, sent once every universe of a display cycle is out.
//! - **Single-flight:** at most one strip push runs at a time; extra requests are dropped.
#![cfg_attr(not(feature = "host"), no_std)]
#![cfg_attr(not(feature = "host"), no_main)]
#![allow(async_fn_in_trait, reason = "single-threaded embedded")]

// Compile-time checks: exactly one board must be selected (unless testing with host feature)
#[cfg(all(not(any(feature = "pico1", feature = "pico2")), not(feature = "host")))]
compile_error!("Must enable exactly one board feature: 'pico1' or 'pico2'");

#[cfg(all(feature = "pico1", feature = "pico2"))]
compile_error!("Cannot enable both 'pico1' and 'pico2' features simultaneously");

#[cfg(all(not(feature = "arm"), not(feature = "host")))]
compile_error!("The 'arm' feature is required for device builds");

#[macro_use]
mod fmt;

pub mod artnet;
#[cfg(all(feature = "wifi", not(feature = "host")))]
pub mod boot;
pub mod config;
pub mod connectivity;
mod error;
pub mod frame_mapper;
pub mod node;
#[cfg(not(feature = "host"))]
#[doc(hidden)]
pub mod pio_irqs;
pub mod pixel_buffer;
pub mod render;
pub mod storage;

// Re-export error types and result (used throughout)
pub use crate::error::{Error, Result};
