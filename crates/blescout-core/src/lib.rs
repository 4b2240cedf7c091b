//! # blescout-core
//!
//! Core logic for discovering nearby BLE peripherals and proximity beacons.
//!
//! This crate provides:
//! - A scan coordinator merging peripheral discovery and beacon ranging into
//!   one result stream for a single subscriber
//! - Nearest-beacon enrichment of peripheral advertisements
//! - Pluggable platform sources, with a BlueZ backend on Linux
//! - A device list presenter keyed by device identity
//! - Configuration management
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`coordinator`] - Scan session lifecycle and event merging
//! - [`source`] - Discovery and proximity source traits and their events
//! - [`dispatch`] - Execution contexts for subscriber callbacks
//! - [`presenter`] - Deduplicated device list bound to a scan session
//! - [`ibeacon`] - iBeacon advertisement frame decoding
//! - [`config`] - Application configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Scan result types
//! - `bluetooth` - BlueZ sources (feature `bluetooth`)
//! - `mock` - Scriptable in-memory sources

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

#[cfg(feature = "bluetooth")]
pub mod bluetooth;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod ibeacon;
#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub mod mock;
pub mod presenter;
pub mod source;
pub mod types;

// Re-export primary types for convenience
#[cfg(feature = "bluetooth")]
pub use bluetooth::{BluezBeacons, BluezDiscovery};
pub use config::{
    default_config_path, default_log_dir, Config, ConfigError, ConfigResult, LogFormat,
    LoggingConfig, ScannerConfig,
};
pub use coordinator::{
    CoordinatorBuilder, CoordinatorSnapshot, ScanCallback, ScanCoordinator, ScanNotice,
};
pub use dispatch::{DeliveryQueue, Dispatcher, InlineDispatcher, QueueDispatcher};
pub use error::{BlescoutError, Result};
#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use mock::{MockDiscovery, MockDiscoveryHandle, MockProximity, MockProximityHandle};
pub use presenter::{DeviceList, DeviceListPresenter, ListKey};
pub use source::{
    AuthorizationState, BeaconSighting, BluetoothError, DiscoverySource, EventSink,
    PowerState, ProximitySource, SourceEvent,
};
pub use types::{
    AdvertisementData, BeaconIds, DeviceHandle, DeviceId, ScanResult, UNKNOWN_BEACON_ID,
};
