//! Scan session coordination.
//!
//! [`ScanCoordinator`] is a cloneable handle to a single coordinator task.
//! The task owns every piece of session state: the scanning flag, the
//! subscriber callback, the beacon target and the beacon ranking. Commands
//! from handles and events from both sources arrive on one channel and are
//! applied in order, so a peripheral event always sees a consistent
//! nearest-beacon pair.
//!
//! ```no_run
//! use blescout_core::coordinator::ScanCoordinator;
//! use blescout_core::mock::{MockDiscovery, MockProximity};
//! use blescout_core::source::{AuthorizationState, PowerState};
//!
//! # async fn run() -> blescout_core::Result<()> {
//! let (discovery, _) = MockDiscovery::new(PowerState::PoweredOn);
//! let (proximity, _) = MockProximity::new(AuthorizationState::AuthorizedFull);
//! let coordinator = ScanCoordinator::builder(discovery, proximity).spawn();
//!
//! coordinator.start(|result| println!("{} dBm", result.signal_strength)).await?;
//! coordinator.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::dispatch::{Dispatcher, InlineDispatcher};
use crate::error::{BlescoutError, Result};
use crate::source::{
    AuthorizationState, BeaconSighting, DiscoverySource, EventSink, PeripheralEvent, PowerState,
    ProximitySource, RangingUpdate, SourceEvent,
};
use crate::types::{BeaconIds, ScanResult, UNKNOWN_BEACON_ID};

/// Subscriber callback receiving every result of a session.
pub type ScanCallback = Arc<dyn Fn(ScanResult) + Send + Sync>;

/// Handler for user-facing notices raised by the coordinator.
pub type NoticeHandler = Arc<dyn Fn(ScanNotice) + Send + Sync>;

/// Session id published while idle.
const IDLE: u64 = 0;

/// A condition the presentation layer should surface to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanNotice {
    /// Location access is blocked by policy.
    LocationRestricted,
    /// The user declined location access.
    LocationPermissionNeeded,
}

impl ScanNotice {
    /// Short title for an alert.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::LocationRestricted => "Location Restricted",
            Self::LocationPermissionNeeded => "Location Permission Needed",
        }
    }

    /// Body text for an alert.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::LocationRestricted => "Access to location services is restricted.",
            Self::LocationPermissionNeeded => {
                "Location permission is required for beacon scanning."
            }
        }
    }
}

/// Point-in-time view of the coordinator state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSnapshot {
    /// Whether a session is active.
    pub is_scanning: bool,
    /// Configured beacon family.
    pub beacon_target: Option<Uuid>,
    /// Beacons from the latest non-empty ranging pass, strongest first.
    pub ranked_beacons: Vec<BeaconSighting>,
    /// Major of the nearest beacon, or [`UNKNOWN_BEACON_ID`].
    pub nearest_major: i32,
    /// Minor of the nearest beacon, or [`UNKNOWN_BEACON_ID`].
    pub nearest_minor: i32,
}

/// Messages consumed by the coordinator task.
pub(crate) enum Message {
    Command(Command),
    Source(SourceEvent),
    Shutdown,
}

pub(crate) enum Command {
    ConfigureBeaconTarget {
        target: Option<Uuid>,
        reply: oneshot::Sender<()>,
    },
    Start {
        callback: ScanCallback,
        reply: oneshot::Sender<()>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    HasRequiredPermissions {
        reply: oneshot::Sender<bool>,
    },
    BeaconScanningInProgress {
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<CoordinatorSnapshot>,
    },
}

/// Configures and spawns a coordinator task.
pub struct CoordinatorBuilder {
    discovery: Box<dyn DiscoverySource>,
    proximity: Box<dyn ProximitySource>,
    dispatcher: Arc<dyn Dispatcher>,
    notice_handler: Option<NoticeHandler>,
    allow_duplicate_reports: bool,
}

impl CoordinatorBuilder {
    /// Deliver callbacks through `dispatcher` instead of inline on the
    /// coordinator task.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: impl Dispatcher) -> Self {
        self.dispatcher = Arc::new(dispatcher);
        self
    }

    /// Receive permission notices. Delivered through the dispatcher.
    #[must_use]
    pub fn on_notice<F>(mut self, handler: F) -> Self
    where
        F: Fn(ScanNotice) + Send + Sync + 'static,
    {
        self.notice_handler = Some(Arc::new(handler));
        self
    }

    /// Whether the discovery source should report every advertisement of
    /// a peripheral rather than only the first. Defaults to `true`.
    #[must_use]
    pub const fn allow_duplicate_reports(mut self, allow: bool) -> Self {
        self.allow_duplicate_reports = allow;
        self
    }

    /// Spawn the coordinator task on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn spawn(self) -> ScanCoordinator {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator {
            discovery: self.discovery,
            proximity: self.proximity,
            sink: EventSink::new(tx.clone()),
            dispatcher: self.dispatcher,
            notice_handler: self.notice_handler,
            allow_duplicate_reports: self.allow_duplicate_reports,
            active_session: Arc::new(AtomicU64::new(IDLE)),
            sessions_started: 0,
            callback: None,
            target: None,
            ranked: Vec::new(),
            nearest: None,
        };
        tokio::spawn(coordinator.run(rx));

        ScanCoordinator {
            inner: Arc::new(Handle { tx }),
        }
    }
}

/// Handle to the coordinator task.
///
/// Cloning is cheap. The task shuts down, stopping any active session, when
/// the last handle is dropped.
#[derive(Clone)]
pub struct ScanCoordinator {
    inner: Arc<Handle>,
}

struct Handle {
    tx: UnboundedSender<Message>,
}

impl Drop for Handle {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Shutdown);
    }
}

impl ScanCoordinator {
    /// Start configuring a coordinator over the given sources.
    pub fn builder(
        discovery: impl DiscoverySource,
        proximity: impl ProximitySource,
    ) -> CoordinatorBuilder {
        CoordinatorBuilder {
            discovery: Box::new(discovery),
            proximity: Box::new(proximity),
            dispatcher: Arc::new(InlineDispatcher),
            notice_handler: None,
            allow_duplicate_reports: true,
        }
    }

    /// Set the beacon family to range. `None` disables ranging.
    ///
    /// Takes effect on the next [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`BlescoutError::CoordinatorClosed`] if the task has stopped.
    pub async fn configure_beacon_target(&self, target: Option<Uuid>) -> Result<()> {
        self.request(|reply| Command::ConfigureBeaconTarget { target, reply })
            .await
    }

    /// Start a session delivering results to `callback`.
    ///
    /// A no-op while a session is already active; the existing session keeps
    /// its callback. Returns without waiting for permissions: scanning begins
    /// as soon as the radio is powered on and ranging is authorized.
    ///
    /// # Errors
    ///
    /// Returns [`BlescoutError::CoordinatorClosed`] if the task has stopped.
    pub async fn start<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(ScanResult) + Send + Sync + 'static,
    {
        let callback: ScanCallback = Arc::new(callback);
        self.request(|reply| Command::Start { callback, reply }).await
    }

    /// Stop the active session. A no-op while idle.
    ///
    /// # Errors
    ///
    /// Returns [`BlescoutError::CoordinatorClosed`] if the task has stopped.
    pub async fn stop(&self) -> Result<()> {
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Whether the radio is powered on and ranging is authorized.
    ///
    /// # Errors
    ///
    /// Returns [`BlescoutError::CoordinatorClosed`] if the task has stopped.
    pub async fn has_required_permissions(&self) -> Result<bool> {
        self.request(|reply| Command::HasRequiredPermissions { reply })
            .await
    }

    /// Whether the proximity source is ranging any beacon family.
    ///
    /// # Errors
    ///
    /// Returns [`BlescoutError::CoordinatorClosed`] if the task has stopped.
    pub async fn is_beacon_scanning_in_progress(&self) -> Result<bool> {
        self.request(|reply| Command::BeaconScanningInProgress { reply })
            .await
    }

    /// Current session state.
    ///
    /// # Errors
    ///
    /// Returns [`BlescoutError::CoordinatorClosed`] if the task has stopped.
    pub async fn snapshot(&self) -> Result<CoordinatorSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.inner
            .tx
            .send(Message::Command(command(reply)))
            .map_err(|_| BlescoutError::CoordinatorClosed)?;
        response.await.map_err(|_| BlescoutError::CoordinatorClosed)
    }
}

struct Coordinator {
    discovery: Box<dyn DiscoverySource>,
    proximity: Box<dyn ProximitySource>,
    sink: EventSink,
    dispatcher: Arc<dyn Dispatcher>,
    notice_handler: Option<NoticeHandler>,
    allow_duplicate_reports: bool,
    /// Id of the running session, [`IDLE`] otherwise. Shared with queued
    /// beacon deliveries so they can drop themselves after a stop.
    active_session: Arc<AtomicU64>,
    sessions_started: u64,
    callback: Option<ScanCallback>,
    target: Option<Uuid>,
    ranked: Vec<BeaconSighting>,
    /// Always `ranked[0].ids` when `ranked` is non-empty.
    nearest: Option<BeaconIds>,
}

impl Coordinator {
    async fn run(mut self, mut rx: UnboundedReceiver<Message>) {
        debug!("Scan coordinator running");
        while let Some(message) = rx.recv().await {
            match message {
                Message::Command(command) => self.handle_command(command),
                Message::Source(event) => self.handle_source_event(event),
                Message::Shutdown => break,
            }
        }
        self.stop();
        debug!("Scan coordinator shut down");
    }

    fn handle_command(&mut self, command: Command) {
        // A dropped reply receiver only means the caller stopped waiting.
        match command {
            Command::ConfigureBeaconTarget { target, reply } => {
                debug!(?target, "Beacon target configured");
                self.target = target;
                let _ = reply.send(());
            }
            Command::Start { callback, reply } => {
                self.start(callback);
                let _ = reply.send(());
            }
            Command::Stop { reply } => {
                self.stop();
                let _ = reply.send(());
            }
            Command::HasRequiredPermissions { reply } => {
                let _ = reply.send(self.has_required_permissions());
            }
            Command::BeaconScanningInProgress { reply } => {
                let _ = reply.send(self.is_beacon_scanning_in_progress());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn handle_source_event(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::PeripheralDiscovered(event) => self.on_peripheral(event),
            SourceEvent::BeaconsRanged(update) => self.on_beacons_ranged(update),
            SourceEvent::PowerStateChanged(state) => self.on_power_state(state),
            SourceEvent::AuthorizationChanged(state) => self.on_authorization(state),
        }
    }

    fn is_scanning(&self) -> bool {
        self.active_session.load(Ordering::Acquire) != IDLE
    }

    fn start(&mut self, callback: ScanCallback) {
        if self.is_scanning() {
            debug!("BLE scanning is already in progress");
            return;
        }

        self.callback = Some(callback);
        self.clear_beacons();
        self.sessions_started += 1;
        self.active_session
            .store(self.sessions_started, Ordering::Release);

        self.discovery.configure(self.sink.clone());
        self.proximity.configure(self.sink.clone());
        self.proximity.request_authorization();

        info!(
            session = self.sessions_started,
            target = ?self.target,
            "Scan session started"
        );
        self.begin_if_permitted();
    }

    fn stop(&mut self) {
        if !self.is_scanning() {
            return;
        }

        self.active_session.store(IDLE, Ordering::Release);
        self.discovery.stop_scanning();
        if let Some(target) = self.target {
            self.proximity.stop_ranging(target);
        }
        self.clear_beacons();
        info!("Scan session stopped");
    }

    fn clear_beacons(&mut self) {
        self.ranked.clear();
        self.nearest = None;
    }

    fn has_required_permissions(&self) -> bool {
        self.discovery.power_state() == PowerState::PoweredOn
            && self.proximity.authorization_state().is_authorized()
    }

    fn is_beacon_scanning_in_progress(&self) -> bool {
        !self.proximity.active_ranging_constraints().is_empty()
    }

    /// Begin both scans when the session is active and permissions allow.
    /// Sources tolerate repeated begins, so this runs on every transition
    /// that might newly satisfy the precondition.
    fn begin_if_permitted(&mut self) {
        if !self.is_scanning() {
            return;
        }
        if !self.has_required_permissions() {
            debug!(
                power = ?self.discovery.power_state(),
                authorization = ?self.proximity.authorization_state(),
                "Waiting for Bluetooth and location permissions"
            );
            return;
        }

        info!("Starting BLE scan");
        self.discovery.begin_scanning(self.allow_duplicate_reports);
        if let Some(target) = self.target {
            info!(%target, "Starting beacon ranging");
            self.proximity.begin_ranging(target);
        }
    }

    fn on_peripheral(&self, event: PeripheralEvent) {
        if !self.is_scanning() {
            trace!(device = %event.device.id, "Discarding advertisement while idle");
            return;
        }

        let ranging = self.target.is_some() && self.is_beacon_scanning_in_progress();
        let nearest = if ranging { self.nearest } else { None };
        let result = ScanResult::peripheral(
            event.signal_strength,
            event.device,
            event.advertisement,
            self.target,
            nearest,
        );

        if let Some(callback) = self.callback.clone() {
            self.dispatcher.dispatch(Box::new(move || callback(result)));
        }
    }

    fn on_beacons_ranged(&mut self, update: RangingUpdate) {
        if update.beacons.is_empty() {
            trace!(constraint = %update.constraint, "Ignoring empty ranging update");
            return;
        }
        if !self.is_scanning() {
            trace!(constraint = %update.constraint, "Discarding ranging update while idle");
            return;
        }

        let mut ranked = update.beacons;
        ranked.sort_by(|a, b| b.signal_strength.cmp(&a.signal_strength));
        self.nearest = ranked.first().map(|beacon| beacon.ids);
        debug!(
            constraint = %update.constraint,
            count = ranked.len(),
            nearest = ?self.nearest,
            "Beacons ranged"
        );

        if let Some(callback) = &self.callback {
            let session = self.active_session.load(Ordering::Acquire);
            for beacon in &ranked {
                let result = ScanResult::beacon(beacon.signal_strength, beacon.uuid, beacon.ids);
                let callback = Arc::clone(callback);
                let active_session = Arc::clone(&self.active_session);
                self.dispatcher.dispatch(Box::new(move || {
                    if session != IDLE && active_session.load(Ordering::Acquire) == session {
                        callback(result);
                    }
                }));
            }
        }

        self.ranked = ranked;
    }

    fn on_power_state(&mut self, state: PowerState) {
        match state {
            PowerState::PoweredOn => {
                info!("Bluetooth is now powered on");
                self.begin_if_permitted();
            }
            PowerState::PoweredOff => info!("Bluetooth is turned off"),
            PowerState::Unauthorized => warn!("Bluetooth permission is not granted"),
            PowerState::Unsupported => warn!("This device does not support Bluetooth"),
            PowerState::Unknown => debug!("Bluetooth state is unknown"),
        }
    }

    fn on_authorization(&mut self, state: AuthorizationState) {
        match state {
            AuthorizationState::NotDetermined => info!("Location permission not determined"),
            AuthorizationState::Restricted => {
                warn!("Location access is restricted");
                self.notify(ScanNotice::LocationRestricted);
            }
            AuthorizationState::Denied => {
                warn!("Location permission denied");
                self.notify(ScanNotice::LocationPermissionNeeded);
            }
            AuthorizationState::AuthorizedLimited | AuthorizationState::AuthorizedFull => {
                debug!(?state, "Location permission granted");
                self.begin_if_permitted();
            }
        }
    }

    fn notify(&self, notice: ScanNotice) {
        if let Some(handler) = self.notice_handler.clone() {
            self.dispatcher.dispatch(Box::new(move || handler(notice)));
        }
    }

    fn snapshot(&self) -> CoordinatorSnapshot {
        let (nearest_major, nearest_minor) = self
            .nearest
            .map_or((UNKNOWN_BEACON_ID, UNKNOWN_BEACON_ID), |ids| {
                (i32::from(ids.major), i32::from(ids.minor))
            });
        CoordinatorSnapshot {
            is_scanning: self.is_scanning(),
            beacon_target: self.target,
            ranked_beacons: self.ranked.clone(),
            nearest_major,
            nearest_minor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use tokio_test::assert_ok;

    use crate::dispatch::QueueDispatcher;
    use crate::mock::{MockDiscovery, MockDiscoveryHandle, MockProximity, MockProximityHandle};
    use crate::types::{AdvertisementData, DeviceHandle};

    const FAMILY: Uuid = Uuid::from_u128(0xE2C5_6DB5_DFFB_48D2_B060_D0F5_A710_96E0);
    const OTHER_FAMILY: Uuid = Uuid::from_u128(0xF782_6DA6_4FA2_4E98_8024_BC5B_71E0_893E);

    struct Harness {
        coordinator: ScanCoordinator,
        discovery: MockDiscoveryHandle,
        proximity: MockProximityHandle,
    }

    fn harness(power: PowerState, authorization: AuthorizationState) -> Harness {
        let (discovery, discovery_handle) = MockDiscovery::new(power);
        let (proximity, proximity_handle) = MockProximity::new(authorization);
        Harness {
            coordinator: ScanCoordinator::builder(discovery, proximity).spawn(),
            discovery: discovery_handle,
            proximity: proximity_handle,
        }
    }

    fn ready() -> Harness {
        harness(PowerState::PoweredOn, AuthorizationState::AuthorizedFull)
    }

    type Collected = Arc<Mutex<Vec<ScanResult>>>;

    fn collector() -> (Collected, impl Fn(ScanResult) + Send + Sync + 'static) {
        let results: Collected = Arc::default();
        let sink = Arc::clone(&results);
        (results, move |result| sink.lock().unwrap().push(result))
    }

    fn sighting(major: u16, minor: u16, signal_strength: i32) -> BeaconSighting {
        BeaconSighting {
            uuid: FAMILY,
            ids: BeaconIds { major, minor },
            signal_strength,
        }
    }

    fn advertise(discovery: &MockDiscoveryHandle, id: &str, signal_strength: i32) {
        discovery.advertise(DeviceHandle::new(id), signal_strength, AdvertisementData::new());
    }

    #[tokio::test]
    async fn test_start_while_scanning_is_noop() {
        let h = ready();
        h.coordinator
            .configure_beacon_target(Some(FAMILY))
            .await
            .unwrap();
        let (first, callback) = collector();
        h.coordinator.start(callback).await.unwrap();
        h.proximity.range(FAMILY, vec![sighting(1, 1, -60)]);
        let before = h.coordinator.snapshot().await.unwrap();

        let (second, callback) = collector();
        h.coordinator.start(callback).await.unwrap();
        let after = h.coordinator.snapshot().await.unwrap();

        assert_eq!(before, after);
        assert_eq!(h.discovery.configure_calls(), 1);
        assert_eq!(h.proximity.configure_calls(), 1);
        assert_eq!(h.proximity.authorization_requests(), 1);

        advertise(&h.discovery, "AA:AA:AA:AA:AA:AA", -40);
        h.coordinator.snapshot().await.unwrap();
        assert_eq!(first.lock().unwrap().len(), 2);
        assert!(second.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let h = ready();
        h.coordinator
            .configure_beacon_target(Some(FAMILY))
            .await
            .unwrap();
        let (_, callback) = collector();
        h.coordinator.start(callback).await.unwrap();

        assert_ok!(h.coordinator.stop().await);
        assert_ok!(h.coordinator.stop().await);

        assert_eq!(h.discovery.stop_calls(), 1);
        assert_eq!(h.proximity.stop_ranging_calls(), 1);
        assert!(!h.coordinator.snapshot().await.unwrap().is_scanning);
    }

    #[tokio::test]
    async fn test_stop_while_idle_touches_nothing() {
        let h = ready();
        h.coordinator.stop().await.unwrap();
        assert_eq!(h.discovery.stop_calls(), 0);
        assert_eq!(h.proximity.stop_ranging_calls(), 0);
    }

    #[tokio::test]
    async fn test_ranging_sorts_by_signal_strength() {
        let h = ready();
        h.coordinator
            .configure_beacon_target(Some(FAMILY))
            .await
            .unwrap();
        let (results, callback) = collector();
        h.coordinator.start(callback).await.unwrap();

        h.proximity.range(
            FAMILY,
            vec![sighting(1, 10, -70), sighting(2, 20, -50), sighting(3, 30, -90)],
        );
        let ranked = h.coordinator.snapshot().await.unwrap();
        let other_family = BeaconSighting {
            uuid: OTHER_FAMILY,
            ..sighting(9, 9, -80)
        };
        // Sightings keep their own family even when it differs from the target.
        h.proximity.range(FAMILY, vec![other_family]);
        let snapshot = h.coordinator.snapshot().await.unwrap();

        let order: Vec<i32> = ranked
            .ranked_beacons
            .iter()
            .map(|b| b.signal_strength)
            .collect();
        assert_eq!(order, vec![-50, -70, -90]);
        assert_eq!((ranked.nearest_major, ranked.nearest_minor), (2, 20));
        assert_eq!((snapshot.nearest_major, snapshot.nearest_minor), (9, 9));

        let results = results.lock().unwrap();
        let delivered: Vec<(i32, i32, i32)> = results
            .iter()
            .map(|r| (r.signal_strength, r.major, r.minor))
            .collect();
        assert_eq!(
            delivered,
            vec![(-50, 2, 20), (-70, 1, 10), (-90, 3, 30), (-80, 9, 9)]
        );
        assert!(results.iter().all(ScanResult::is_beacon_only));
        assert!(results[..3].iter().all(|r| r.beacon_uuid == Some(FAMILY)));
        assert_eq!(results[3].beacon_uuid, Some(OTHER_FAMILY));
    }

    #[tokio::test]
    async fn test_peripheral_before_ranging_has_no_beacon() {
        let h = ready();
        h.coordinator
            .configure_beacon_target(Some(FAMILY))
            .await
            .unwrap();
        let (results, callback) = collector();
        h.coordinator.start(callback).await.unwrap();

        advertise(&h.discovery, "AA:BB:CC:DD:EE:FF", -61);
        h.coordinator.snapshot().await.unwrap();

        let results = results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!((results[0].major, results[0].minor), (-1, -1));
        assert_eq!(results[0].beacon_uuid, Some(FAMILY));
        assert!(results[0].device.is_some());
        assert!(results[0].advertisement.is_some());
    }

    #[tokio::test]
    async fn test_peripheral_after_ranging_carries_nearest_beacon() {
        let h = ready();
        h.coordinator
            .configure_beacon_target(Some(FAMILY))
            .await
            .unwrap();
        let (results, callback) = collector();
        h.coordinator.start(callback).await.unwrap();
        assert!(h.coordinator.is_beacon_scanning_in_progress().await.unwrap());

        h.proximity.range(
            FAMILY,
            vec![sighting(1, 10, -70), sighting(2, 20, -50), sighting(3, 30, -90)],
        );
        let ranked = h.coordinator.snapshot().await.unwrap();
        let other_family = BeaconSighting {
            uuid: OTHER_FAMILY,
            ..sighting(9, 9, -80)
        };
        advertise(&h.discovery, "AA:BB:CC:DD:EE:FF", -45);
        h.coordinator.snapshot().await.unwrap();

        let results = results.lock().unwrap();
        let peripheral = results.last().unwrap();
        assert!(peripheral.device.is_some());
        assert_eq!((peripheral.major, peripheral.minor), (2, 20));
    }

    #[tokio::test]
    async fn test_peripheral_without_target_ignores_ranking() {
        let h = ready();
        let (results, callback) = collector();
        h.coordinator.start(callback).await.unwrap();
        assert!(!h.coordinator.is_beacon_scanning_in_progress().await.unwrap());

        h.proximity.range(FAMILY, vec![sighting(5, 5, -40)]);
        advertise(&h.discovery, "AA:BB:CC:DD:EE:FF", -45);
        h.coordinator.snapshot().await.unwrap();

        let results = results.lock().unwrap();
        let peripheral = results.last().unwrap();
        assert_eq!((peripheral.major, peripheral.minor), (-1, -1));
        assert_eq!(peripheral.beacon_uuid, None);
    }

    #[tokio::test]
    async fn test_empty_ranging_update_keeps_state() {
        let h = ready();
        h.coordinator
            .configure_beacon_target(Some(FAMILY))
            .await
            .unwrap();
        let (results, callback) = collector();
        h.coordinator.start(callback).await.unwrap();

        h.proximity.range(FAMILY, vec![sighting(2, 20, -50), sighting(1, 10, -70)]);
        let before = h.coordinator.snapshot().await.unwrap();
        h.proximity.range(FAMILY, Vec::new());
        let after = h.coordinator.snapshot().await.unwrap();

        assert_eq!(before, after);
        assert_eq!((after.nearest_major, after.nearest_minor), (2, 20));
        assert_eq!(results.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stop_resets_nearest_beacon() {
        let h = ready();
        h.coordinator
            .configure_beacon_target(Some(FAMILY))
            .await
            .unwrap();
        let (results, callback) = collector();
        h.coordinator.start(callback).await.unwrap();
        h.proximity.range(FAMILY, vec![sighting(2, 20, -50)]);
        h.coordinator.stop().await.unwrap();

        let snapshot = h.coordinator.snapshot().await.unwrap();
        assert!(snapshot.ranked_beacons.is_empty());
        assert_eq!((snapshot.nearest_major, snapshot.nearest_minor), (-1, -1));
        assert_eq!(snapshot.beacon_target, Some(FAMILY));

        let (_, callback) = collector();
        h.coordinator.start(callback).await.unwrap();
        advertise(&h.discovery, "AA:BB:CC:DD:EE:FF", -45);
        h.coordinator.snapshot().await.unwrap();

        // The first session's callback was replaced by the second start.
        assert_eq!(results.lock().unwrap().len(), 1);
        assert_eq!(h.discovery.configure_calls(), 2);
    }

    #[tokio::test]
    async fn test_ranging_update_after_stop_leaves_state_cleared() {
        let h = ready();
        h.coordinator
            .configure_beacon_target(Some(FAMILY))
            .await
            .unwrap();
        let (results, callback) = collector();
        h.coordinator.start(callback).await.unwrap();
        h.coordinator.stop().await.unwrap();

        h.proximity.range(FAMILY, vec![sighting(3, 4, -50)]);
        let snapshot = h.coordinator.snapshot().await.unwrap();

        assert!(!snapshot.is_scanning);
        assert!(snapshot.ranked_beacons.is_empty());
        assert_eq!((snapshot.nearest_major, snapshot.nearest_minor), (-1, -1));
        assert!(results.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restarted_session_reports_unknown_beacon() {
        let h = ready();
        h.coordinator
            .configure_beacon_target(Some(FAMILY))
            .await
            .unwrap();
        let (_, callback) = collector();
        h.coordinator.start(callback).await.unwrap();
        h.proximity.range(FAMILY, vec![sighting(2, 20, -50)]);
        h.coordinator.stop().await.unwrap();

        let (results, callback) = collector();
        h.coordinator.start(callback).await.unwrap();
        advertise(&h.discovery, "AA:BB:CC:DD:EE:FF", -45);
        h.coordinator.snapshot().await.unwrap();

        let results = results.lock().unwrap();
        assert_eq!((results[0].major, results[0].minor), (-1, -1));
    }

    #[tokio::test]
    async fn test_advertisement_while_idle_is_discarded() {
        let h = ready();
        let (results, callback) = collector();
        h.coordinator.start(callback).await.unwrap();
        h.coordinator.stop().await.unwrap();

        advertise(&h.discovery, "AA:BB:CC:DD:EE:FF", -45);
        h.coordinator.snapshot().await.unwrap();
        assert!(results.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_waits_for_power_on() {
        let h = harness(PowerState::PoweredOff, AuthorizationState::AuthorizedFull);
        h.coordinator
            .configure_beacon_target(Some(FAMILY))
            .await
            .unwrap();
        let (_, callback) = collector();
        h.coordinator.start(callback).await.unwrap();

        assert!(!h.coordinator.has_required_permissions().await.unwrap());
        assert_eq!(h.discovery.begin_calls(), 0);
        assert!(h.proximity.ranging().is_empty());

        h.discovery.set_power_state(PowerState::PoweredOn);
        assert!(h.coordinator.has_required_permissions().await.unwrap());
        assert_eq!(h.discovery.begin_calls(), 1);
        assert_eq!(h.discovery.last_allow_duplicates(), Some(true));
        assert!(h.proximity.ranging().contains(&FAMILY));
    }

    #[tokio::test]
    async fn test_scan_begins_once_authorization_is_granted() {
        let h = harness(PowerState::PoweredOn, AuthorizationState::NotDetermined);
        let (_, callback) = collector();
        h.coordinator.start(callback).await.unwrap();

        assert_eq!(h.proximity.authorization_requests(), 1);
        assert_eq!(h.discovery.begin_calls(), 0);

        h.proximity
            .set_authorization(AuthorizationState::AuthorizedLimited);
        assert!(h.coordinator.has_required_permissions().await.unwrap());
        assert_eq!(h.discovery.begin_calls(), 1);
    }

    #[tokio::test]
    async fn test_power_on_while_idle_does_not_scan() {
        let h = harness(PowerState::PoweredOff, AuthorizationState::AuthorizedFull);
        h.discovery.set_power_state(PowerState::PoweredOn);
        h.coordinator.snapshot().await.unwrap();
        assert_eq!(h.discovery.begin_calls(), 0);
    }

    #[tokio::test]
    async fn test_denied_and_restricted_raise_notices() {
        let (discovery, discovery_handle) = MockDiscovery::new(PowerState::PoweredOn);
        let (proximity, proximity_handle) = MockProximity::new(AuthorizationState::NotDetermined);
        let notices = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&notices);
        let coordinator = ScanCoordinator::builder(discovery, proximity)
            .on_notice(move |notice| seen.lock().unwrap().push(notice))
            .spawn();

        let (_, callback) = collector();
        coordinator.start(callback).await.unwrap();
        proximity_handle.set_authorization(AuthorizationState::Denied);
        proximity_handle.set_authorization(AuthorizationState::Restricted);
        coordinator.snapshot().await.unwrap();

        assert_eq!(
            *notices.lock().unwrap(),
            vec![
                ScanNotice::LocationPermissionNeeded,
                ScanNotice::LocationRestricted
            ]
        );
        assert_eq!(discovery_handle.begin_calls(), 0);
        assert!(coordinator.snapshot().await.unwrap().is_scanning);
    }

    #[tokio::test]
    async fn test_queued_beacon_deliveries_dropped_after_stop() {
        let (discovery, discovery_handle) = MockDiscovery::new(PowerState::PoweredOn);
        let (proximity, proximity_handle) = MockProximity::new(AuthorizationState::AuthorizedFull);
        let (dispatcher, mut queue) = QueueDispatcher::new();
        let coordinator = ScanCoordinator::builder(discovery, proximity)
            .dispatcher(dispatcher)
            .spawn();
        coordinator
            .configure_beacon_target(Some(FAMILY))
            .await
            .unwrap();
        let (results, callback) = collector();
        coordinator.start(callback).await.unwrap();

        proximity_handle.range(FAMILY, vec![sighting(1, 1, -60), sighting(2, 2, -50)]);
        discovery_handle.advertise(DeviceHandle::new("AA"), -40, AdvertisementData::new());
        coordinator.snapshot().await.unwrap();
        assert!(results.lock().unwrap().is_empty());
        assert_eq!(queue.drain(), 3);
        assert_eq!(results.lock().unwrap().len(), 3);

        proximity_handle.range(FAMILY, vec![sighting(1, 1, -60), sighting(2, 2, -50)]);
        coordinator.snapshot().await.unwrap();
        coordinator.stop().await.unwrap();
        assert_eq!(queue.drain(), 2);
        assert_eq!(results.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_dropping_last_handle_stops_session() {
        let h = ready();
        let (_, callback) = collector();
        h.coordinator.start(callback).await.unwrap();
        let clone = h.coordinator.clone();
        drop(h.coordinator);
        assert!(clone.snapshot().await.unwrap().is_scanning);
        drop(clone);

        for _ in 0..100 {
            if h.discovery.stop_calls() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(h.discovery.stop_calls(), 1);
    }

    #[test]
    fn test_notice_text() {
        assert_eq!(ScanNotice::LocationRestricted.title(), "Location Restricted");
        assert!(ScanNotice::LocationPermissionNeeded
            .message()
            .contains("beacon scanning"));
    }
}
