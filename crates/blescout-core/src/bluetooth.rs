//! BlueZ-backed sources (Linux, via `bluer`).
//!
//! - [`BluezDiscovery`] tracks the default adapter's power state and reports
//!   LE advertisements.
//! - [`BluezBeacons`] decodes iBeacon frames from advertisements and emits a
//!   ranging pass per beacon family on a fixed interval.
//!
//! Each source runs its platform work on spawned tokio tasks; aborting a task
//! drops its discovery stream, which ends the BlueZ discovery session.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bluer::{
    Adapter, AdapterEvent, AdapterProperty, Address, DiscoveryFilter, DiscoveryTransport, Session,
};
use futures::{pin_mut, StreamExt};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::BlescoutError;
use crate::ibeacon::{IBeaconFrame, APPLE_COMPANY_ID};
use crate::source::{
    AuthorizationState, BeaconSighting, BluetoothError, BluetoothResult, DiscoverySource,
    EventSink, PeripheralEvent, PowerState, ProximitySource, RangingUpdate,
};
use crate::types::{AdvertisementData, BeaconIds, DeviceHandle};

async fn open_adapter() -> BluetoothResult<(Session, Adapter)> {
    let session = Session::new()
        .await
        .map_err(|e| BluetoothError::SessionInitFailed {
            message: e.to_string(),
        })?;
    let adapter = session
        .default_adapter()
        .await
        .map_err(|_| BluetoothError::AdapterNotFound)?;
    Ok((session, adapter))
}

fn discovery_error(err: bluer::Error) -> BluetoothError {
    BluetoothError::DiscoveryFailed {
        message: err.to_string(),
    }
}

fn le_filter(duplicate_data: bool) -> DiscoveryFilter {
    DiscoveryFilter {
        transport: DiscoveryTransport::Le,
        duplicate_data,
        ..Default::default()
    }
}

async fn require_powered(adapter: &Adapter) -> BluetoothResult<()> {
    if adapter.is_powered().await.map_err(discovery_error)? {
        Ok(())
    } else {
        Err(BluetoothError::AdapterPoweredOff)
    }
}

fn report(err: BluetoothError, message: &str) {
    let err = BlescoutError::from(err);
    warn!(
        code = err.error_code(),
        recoverable = err.is_recoverable(),
        error = %err,
        "{message}"
    );
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn abort(task: Option<JoinHandle<()>>) {
    if let Some(task) = task {
        task.abort();
    }
}

// =============================================================================
// DISCOVERY
// =============================================================================

/// [`DiscoverySource`] over the default BlueZ adapter.
#[derive(Debug, Default)]
pub struct BluezDiscovery {
    power: Arc<Mutex<PowerState>>,
    sink: Option<EventSink>,
    monitor: Option<JoinHandle<()>>,
    scan: Option<JoinHandle<()>>,
}

impl BluezDiscovery {
    /// Create a source. Nothing touches the adapter until `configure`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiscoverySource for BluezDiscovery {
    fn configure(&mut self, sink: EventSink) {
        abort(self.monitor.take());
        self.monitor = Some(tokio::spawn(monitor_power(
            Arc::clone(&self.power),
            sink.clone(),
        )));
        self.sink = Some(sink);
    }

    fn begin_scanning(&mut self, allow_duplicate_reports: bool) {
        if self.scan.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let Some(sink) = self.sink.clone() else {
            warn!("BLE scan requested before the source was configured");
            return;
        };
        self.scan = Some(tokio::spawn(async move {
            if let Err(err) = discover(sink, allow_duplicate_reports).await {
                report(err, "BLE discovery ended");
            }
        }));
    }

    fn stop_scanning(&mut self) {
        abort(self.scan.take());
    }

    fn power_state(&self) -> PowerState {
        *lock(&self.power)
    }
}

impl Drop for BluezDiscovery {
    fn drop(&mut self) {
        abort(self.scan.take());
        abort(self.monitor.take());
    }
}

fn lock(power: &Mutex<PowerState>) -> MutexGuard<'_, PowerState> {
    power.lock().unwrap_or_else(PoisonError::into_inner)
}

fn set_power(power: &Mutex<PowerState>, sink: &EventSink, state: PowerState) {
    let changed = {
        let mut current = lock(power);
        let changed = *current != state;
        *current = state;
        changed
    };
    if changed {
        sink.power_state_changed(state);
    }
}

const fn powered_state(powered: bool) -> PowerState {
    if powered {
        PowerState::PoweredOn
    } else {
        PowerState::PoweredOff
    }
}

async fn monitor_power(power: Arc<Mutex<PowerState>>, sink: EventSink) {
    if let Err(err) = watch_power(&power, &sink).await {
        report(err, "Bluetooth adapter unavailable");
        set_power(&power, &sink, PowerState::Unsupported);
    }
}

async fn watch_power(power: &Mutex<PowerState>, sink: &EventSink) -> BluetoothResult<()> {
    let (_session, adapter) = open_adapter().await?;
    let powered = adapter.is_powered().await.map_err(discovery_error)?;
    set_power(power, sink, powered_state(powered));

    let events = adapter.events().await.map_err(discovery_error)?;
    pin_mut!(events);
    while let Some(event) = events.next().await {
        if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event {
            set_power(power, sink, powered_state(powered));
        }
    }
    Ok(())
}

async fn discover(sink: EventSink, allow_duplicate_reports: bool) -> BluetoothResult<()> {
    let (_session, adapter) = open_adapter().await?;
    require_powered(&adapter).await?;
    adapter
        .set_discovery_filter(le_filter(allow_duplicate_reports))
        .await
        .map_err(discovery_error)?;
    let events = adapter
        .discover_devices_with_changes()
        .await
        .map_err(discovery_error)?;
    pin_mut!(events);
    info!(adapter = adapter.name(), "BLE discovery running");

    while let Some(event) = events.next().await {
        let AdapterEvent::DeviceAdded(address) = event else {
            continue;
        };
        match read_peripheral(&adapter, address).await {
            Ok(Some(peripheral)) => {
                if !sink.peripheral_discovered(peripheral) {
                    break;
                }
            }
            Ok(None) => {}
            Err(err) => debug!(%address, error = %err, "Failed to read device properties"),
        }
    }
    Ok(())
}

async fn read_peripheral(
    adapter: &Adapter,
    address: Address,
) -> bluer::Result<Option<PeripheralEvent>> {
    let device = adapter.device(address)?;
    // Cached devices that are not currently advertising have no RSSI.
    let Some(rssi) = device.rssi().await? else {
        return Ok(None);
    };

    let name = device.name().await?;
    let mut advertisement = AdvertisementData::new();
    if let Some(name) = &name {
        advertisement.insert("local_name".into(), json!(name));
    }
    if let Some(data) = device.manufacturer_data().await? {
        let data: serde_json::Map<_, _> = data
            .iter()
            .map(|(company, bytes)| (format!("{company:04x}"), json!(hex(bytes))))
            .collect();
        advertisement.insert("manufacturer_data".into(), serde_json::Value::Object(data));
    }
    if let Some(data) = device.service_data().await? {
        let data: serde_json::Map<_, _> = data
            .iter()
            .map(|(uuid, bytes)| (uuid.to_string(), json!(hex(bytes))))
            .collect();
        advertisement.insert("service_data".into(), serde_json::Value::Object(data));
    }
    if let Some(uuids) = device.uuids().await? {
        let mut uuids: Vec<String> = uuids.iter().map(Uuid::to_string).collect();
        uuids.sort();
        advertisement.insert("service_uuids".into(), json!(uuids));
    }
    if let Some(tx_power) = device.tx_power().await? {
        advertisement.insert("tx_power_level".into(), json!(tx_power));
    }

    let mut handle = DeviceHandle::new(address.to_string());
    if let Some(name) = name {
        handle = handle.with_name(name);
    }
    Ok(Some(PeripheralEvent {
        device: handle,
        signal_strength: i32::from(rssi),
        advertisement,
    }))
}

// =============================================================================
// BEACON RANGING
// =============================================================================

/// [`ProximitySource`] ranging iBeacons seen by the default BlueZ adapter.
///
/// Linux has no location permission, so authorization is always
/// [`AuthorizationState::AuthorizedFull`].
#[derive(Debug)]
pub struct BluezBeacons {
    interval: Duration,
    timeout: Duration,
    sink: Option<EventSink>,
    ranging: HashMap<Uuid, JoinHandle<()>>,
}

impl BluezBeacons {
    /// Create a source emitting a ranging pass every `interval`, keeping a
    /// beacon in range for `timeout` after its last advertisement.
    #[must_use]
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            sink: None,
            ranging: HashMap::new(),
        }
    }
}

impl ProximitySource for BluezBeacons {
    fn configure(&mut self, sink: EventSink) {
        self.sink = Some(sink);
    }

    fn request_authorization(&mut self) {
        if let Some(sink) = &self.sink {
            sink.authorization_changed(AuthorizationState::AuthorizedFull);
        }
    }

    fn begin_ranging(&mut self, family: Uuid) {
        if self
            .ranging
            .get(&family)
            .is_some_and(|task| !task.is_finished())
        {
            return;
        }
        let Some(sink) = self.sink.clone() else {
            warn!(%family, "Beacon ranging requested before the source was configured");
            return;
        };
        let (interval, timeout) = (self.interval, self.timeout);
        let task = tokio::spawn(async move {
            if let Err(err) = range_family(family, sink, interval, timeout).await {
                report(err, &format!("Beacon ranging ended for {family}"));
            }
        });
        self.ranging.insert(family, task);
    }

    fn stop_ranging(&mut self, family: Uuid) {
        abort(self.ranging.remove(&family));
    }

    fn authorization_state(&self) -> AuthorizationState {
        AuthorizationState::AuthorizedFull
    }

    fn active_ranging_constraints(&self) -> HashSet<Uuid> {
        self.ranging
            .iter()
            .filter(|(_, task)| !task.is_finished())
            .map(|(family, _)| *family)
            .collect()
    }
}

impl Drop for BluezBeacons {
    fn drop(&mut self) {
        for (_, task) in self.ranging.drain() {
            task.abort();
        }
    }
}

async fn range_family(
    family: Uuid,
    sink: EventSink,
    interval: Duration,
    timeout: Duration,
) -> BluetoothResult<()> {
    let (_session, adapter) = open_adapter().await?;
    require_powered(&adapter).await?;
    adapter
        .set_discovery_filter(le_filter(true))
        .await
        .map_err(discovery_error)?;
    let events = adapter
        .discover_devices_with_changes()
        .await
        .map_err(discovery_error)?;
    pin_mut!(events);
    info!(%family, "Beacon ranging running");

    let mut seen: HashMap<BeaconIds, (i32, Instant)> = HashMap::new();
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(AdapterEvent::DeviceAdded(address)) => {
                    match read_beacon(&adapter, address, family).await {
                        Ok(Some((ids, rssi))) => {
                            seen.insert(ids, (rssi, Instant::now()));
                        }
                        Ok(None) => {}
                        Err(err) => debug!(%address, error = %err, "Failed to read beacon"),
                    }
                }
                Some(_) => {}
                None => break,
            },
            _ = ticker.tick() => {
                let now = Instant::now();
                seen.retain(|_, (_, at)| now.duration_since(*at) <= timeout);
                let beacons = seen
                    .iter()
                    .map(|(ids, (rssi, _))| BeaconSighting {
                        uuid: family,
                        ids: *ids,
                        signal_strength: *rssi,
                    })
                    .collect();
                if !sink.beacons_ranged(RangingUpdate { beacons, constraint: family }) {
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn read_beacon(
    adapter: &Adapter,
    address: Address,
    family: Uuid,
) -> bluer::Result<Option<(BeaconIds, i32)>> {
    let device = adapter.device(address)?;
    let Some(data) = device.manufacturer_data().await? else {
        return Ok(None);
    };
    let Some(frame) = data
        .get(&APPLE_COMPANY_ID)
        .and_then(|bytes| IBeaconFrame::parse(bytes))
    else {
        return Ok(None);
    };
    if frame.uuid != family {
        return Ok(None);
    }
    Ok(device
        .rssi()
        .await?
        .map(|rssi| (frame.ids, i32::from(rssi))))
}
