//! Decides, once per boot, whether the node joins a network or hosts its own.
//!
//! [`ConnectivityManager::bootstrap`] tries the configured network up to
//! [`MAX_JOIN_ATTEMPTS`] times. If no network is configured, or every attempt
//! fails, the radio switches to access-point mode at [`HOTSPOT_ADDRESS`] and
//! the caller starts the captive services ([`dns`], [`dhcp`], [`portal`]).
//! There is no way back to station mode without a restart.
#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::net::Ipv4Addr;

use derive_more::Display;
use embassy_time::{Duration, Timer};

use crate::config::DeviceConfig;

pub mod dhcp;
pub mod dns;
pub mod portal;
#[cfg(all(feature = "wifi", not(feature = "host")))]
pub mod radio;

/// Join attempts before falling back to the hotspot.
pub const MAX_JOIN_ATTEMPTS: u8 = 20;
/// Pause after every radio mode change. The radio firmware needs it.
pub const MODE_SETTLE_TIME: Duration = Duration::from_secs(2);
/// The node's own address while hosting the hotspot.
pub const HOTSPOT_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
/// Prefix length of the hotspot network (a /24).
pub const HOTSPOT_PREFIX_LEN: u8 = 24;

/// The two radio roles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioMode {
    /// Joining an existing network.
    #[display("station")]
    Station,
    /// Hosting the node's own network.
    #[display("access point")]
    AccessPoint,
}

/// The radio operations the bootstrap needs.
pub trait Radio {
    /// Switch roles, dropping any association or hosted network.
    async fn set_mode(&mut self, mode: RadioMode);
    /// Ask to join `network_name`. A `None` secret joins an open network.
    async fn join(&mut self, network_name: &str, secret: Option<&str>);
    /// True once the last join holds a usable connection.
    async fn is_connected(&mut self) -> bool;
    /// Start hosting an open network named `name`.
    async fn start_access_point(&mut self, name: &str);
    /// Give the node a fixed address on the hosted network.
    async fn configure_address(&mut self, address: Ipv4Addr, prefix_len: u8);
}

/// Where the bootstrap is. States only move forward within one boot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectivityState {
    /// Bootstrap has not started.
    Unconfigured,
    /// Join attempts are in progress.
    Connecting,
    /// Joined the configured network.
    Connected,
    /// Hosting the captive hotspot.
    HotspotFallback,
}

impl ConnectivityState {
    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unconfigured, Self::Connecting | Self::HotspotFallback)
                | (Self::Connecting, Self::Connected | Self::HotspotFallback)
        )
    }

    /// True for the two outcomes of a bootstrap.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Connected | Self::HotspotFallback)
    }
}

/// Runs the join-or-hotspot decision against a [`Radio`].
pub struct ConnectivityManager<'a> {
    config: &'a DeviceConfig,
    state: ConnectivityState,
    attempts: u8,
    settle_time: Duration,
}

impl<'a> ConnectivityManager<'a> {
    /// A manager that has not touched the radio yet.
    #[must_use]
    pub const fn new(config: &'a DeviceConfig) -> Self {
        Self {
            config,
            state: ConnectivityState::Unconfigured,
            attempts: 0,
            settle_time: MODE_SETTLE_TIME,
        }
    }

    /// Override the pause after each mode change.
    #[must_use]
    pub const fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectivityState {
        self.state
    }

    /// Join attempts made so far.
    #[must_use]
    pub const fn attempts(&self) -> u8 {
        self.attempts
    }

    /// Join the configured network or fall back to the hotspot.
    ///
    /// Returns [`ConnectivityState::Connected`] or
    /// [`ConnectivityState::HotspotFallback`]. Failed attempts are logged and
    /// never returned as errors. Calling again after a result just returns it.
    pub async fn bootstrap(&mut self, radio: &mut impl Radio) -> ConnectivityState {
        if self.state.is_settled() {
            return self.state;
        }

        let Some(network_name) = self.config.network_name() else {
            info!("Connectivity: no network configured");
            return self.fall_back(radio).await;
        };
        let secret = self.config.network_secret();

        self.advance(ConnectivityState::Connecting);
        while self.attempts < MAX_JOIN_ATTEMPTS {
            self.attempts = self.attempts.saturating_add(1);
            info!(
                "Connectivity: join attempt {}/{} to {}",
                self.attempts, MAX_JOIN_ATTEMPTS, network_name
            );
            radio.set_mode(RadioMode::Station).await;
            Timer::after(self.settle_time).await;
            radio.join(network_name, secret).await;
            if radio.is_connected().await {
                self.advance(ConnectivityState::Connected);
                return self.state;
            }
            warn!("Connectivity: join attempt {} failed", self.attempts);
        }

        warn!(
            "Connectivity: giving up after {} attempts",
            MAX_JOIN_ATTEMPTS
        );
        self.fall_back(radio).await
    }

    async fn fall_back(&mut self, radio: &mut impl Radio) -> ConnectivityState {
        radio.set_mode(RadioMode::AccessPoint).await;
        Timer::after(self.settle_time).await;
        radio
            .start_access_point(self.config.device_name.as_str())
            .await;
        Timer::after(self.settle_time).await;
        radio
            .configure_address(HOTSPOT_ADDRESS, HOTSPOT_PREFIX_LEN)
            .await;
        info!(
            "Connectivity: hotspot {} up",
            self.config.device_name.as_str()
        );
        self.advance(ConnectivityState::HotspotFallback);
        self.state
    }

    fn advance(&mut self, next: ConnectivityState) {
        debug_assert!(self.state.can_advance_to(next));
        info!("Connectivity: {} -> {}", self.state, next);
        self.state = next;
    }
}
