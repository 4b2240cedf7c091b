//! Platform capabilities consumed by the coordinator.
//!
//! A [`DiscoverySource`] reports advertising BLE peripherals and the radio's
//! power state. A [`ProximitySource`] ranges beacons of a given family and
//! owns the location-style authorization that beacon ranging requires.
//!
//! Both report asynchronously through an [`EventSink`] handed to them by the
//! coordinator on every session start. The sink feeds the coordinator's
//! single message channel, so events from both sources are applied in the
//! order they were sent.

use std::collections::HashSet;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;
use uuid::Uuid;

use crate::coordinator::Message;
use crate::types::{AdvertisementData, BeaconIds, DeviceHandle};

/// Power state of the Bluetooth radio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PowerState {
    /// State not yet reported by the platform.
    #[default]
    Unknown,
    /// Radio is off.
    PoweredOff,
    /// Radio is on and usable.
    PoweredOn,
    /// The application may not use Bluetooth.
    Unauthorized,
    /// No usable Bluetooth hardware.
    Unsupported,
}

/// Authorization state for location-based beacon ranging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthorizationState {
    /// The user has not been asked yet.
    NotDetermined,
    /// Access is blocked by policy and cannot be granted by the user.
    Restricted,
    /// The user declined access.
    Denied,
    /// Access granted while the application is in use.
    AuthorizedLimited,
    /// Access granted at all times.
    AuthorizedFull,
}

impl AuthorizationState {
    /// Whether ranging may proceed.
    #[must_use]
    pub const fn is_authorized(self) -> bool {
        matches!(self, Self::AuthorizedLimited | Self::AuthorizedFull)
    }
}

/// One advertisement report from a [`DiscoverySource`].
#[derive(Debug, Clone, PartialEq)]
pub struct PeripheralEvent {
    /// The advertising peripheral.
    pub device: DeviceHandle,
    /// Signal strength in dBm.
    pub signal_strength: i32,
    /// Decoded advertisement payload.
    pub advertisement: AdvertisementData,
}

/// One beacon seen during a ranging pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconSighting {
    /// Beacon family.
    pub uuid: Uuid,
    /// Major/minor identifiers.
    pub ids: BeaconIds,
    /// Signal strength in dBm.
    pub signal_strength: i32,
}

/// A ranging pass for one beacon family constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangingUpdate {
    /// Beacons currently in range, in no particular order.
    pub beacons: Vec<BeaconSighting>,
    /// The family the pass was ranging for.
    pub constraint: Uuid,
}

/// Typed events a source reports to the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// A peripheral advertised.
    PeripheralDiscovered(PeripheralEvent),
    /// A ranging pass completed.
    BeaconsRanged(RangingUpdate),
    /// The radio changed power state.
    PowerStateChanged(PowerState),
    /// Ranging authorization changed.
    AuthorizationChanged(AuthorizationState),
}

/// Handle sources use to report events.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: UnboundedSender<Message>,
}

impl EventSink {
    pub(crate) const fn new(tx: UnboundedSender<Message>) -> Self {
        Self { tx }
    }

    /// Report an event. Returns `false` once the coordinator has shut down.
    pub fn send(&self, event: SourceEvent) -> bool {
        if self.tx.send(Message::Source(event)).is_err() {
            debug!("Dropping source event: coordinator has shut down");
            return false;
        }
        true
    }

    /// Report an advertising peripheral.
    pub fn peripheral_discovered(&self, event: PeripheralEvent) -> bool {
        self.send(SourceEvent::PeripheralDiscovered(event))
    }

    /// Report a completed ranging pass.
    pub fn beacons_ranged(&self, update: RangingUpdate) -> bool {
        self.send(SourceEvent::BeaconsRanged(update))
    }

    /// Report a radio power transition.
    pub fn power_state_changed(&self, state: PowerState) -> bool {
        self.send(SourceEvent::PowerStateChanged(state))
    }

    /// Report an authorization transition.
    pub fn authorization_changed(&self, state: AuthorizationState) -> bool {
        self.send(SourceEvent::AuthorizationChanged(state))
    }
}

/// Platform capability reporting advertising BLE peripherals.
///
/// Implementations must tolerate `begin_scanning` while already scanning and
/// `stop_scanning` while idle.
pub trait DiscoverySource: Send + 'static {
    /// Acquire the platform handle and route its events to `sink`.
    ///
    /// Called on every session start; replaces any previous sink.
    fn configure(&mut self, sink: EventSink);

    /// Begin reporting advertisements. With `allow_duplicate_reports` the
    /// same peripheral is reported on every advertisement it sends.
    fn begin_scanning(&mut self, allow_duplicate_reports: bool);

    /// Stop reporting advertisements.
    fn stop_scanning(&mut self);

    /// Current radio power state.
    fn power_state(&self) -> PowerState;
}

/// Platform capability ranging proximity beacons.
///
/// Implementations must tolerate `begin_ranging` for a family that is
/// already being ranged.
pub trait ProximitySource: Send + 'static {
    /// Acquire the platform handle and route its events to `sink`.
    fn configure(&mut self, sink: EventSink);

    /// Ask for ranging authorization. The answer arrives later as an
    /// [`SourceEvent::AuthorizationChanged`].
    fn request_authorization(&mut self);

    /// Begin ranging beacons of `family`.
    fn begin_ranging(&mut self, family: Uuid);

    /// Stop ranging beacons of `family`.
    fn stop_ranging(&mut self, family: Uuid);

    /// Current authorization state.
    fn authorization_state(&self) -> AuthorizationState;

    /// Families currently being ranged.
    fn active_ranging_constraints(&self) -> HashSet<Uuid>;
}

/// Errors raised inside source backends.
///
/// Sources never return these to the coordinator; backends log them and
/// report the resulting state through the [`EventSink`].
#[derive(Debug, Error)]
pub enum BluetoothError {
    /// No Bluetooth adapter is present.
    #[error("No Bluetooth adapter found")]
    AdapterNotFound,

    /// The adapter is present but powered off.
    #[error("Bluetooth adapter is powered off")]
    AdapterPoweredOff,

    /// The platform Bluetooth session could not be opened.
    #[error("Failed to open Bluetooth session: {message}")]
    SessionInitFailed {
        /// Platform error text.
        message: String,
    },

    /// Starting or running discovery failed.
    #[error("Bluetooth discovery failed: {message}")]
    DiscoveryFailed {
        /// Platform error text.
        message: String,
    },
}

/// Result type for source backends.
pub type BluetoothResult<T> = std::result::Result<T, BluetoothError>;
