//! Scriptable in-memory sources.
//!
//! Each mock comes with a cloneable handle that outlives the source once it
//! is moved into a coordinator. Handles emit events through whatever sink the
//! coordinator configured and expose call counters for assertions.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::source::{
    AuthorizationState, BeaconSighting, DiscoverySource, EventSink, PeripheralEvent, PowerState,
    ProximitySource, RangingUpdate,
};
use crate::types::{AdvertisementData, DeviceHandle};

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct DiscoveryState {
    sink: Option<EventSink>,
    power: PowerState,
    scanning: bool,
    configure_calls: usize,
    begin_calls: usize,
    stop_calls: usize,
    last_allow_duplicates: Option<bool>,
}

/// In-memory [`DiscoverySource`].
#[derive(Debug)]
pub struct MockDiscovery {
    state: Arc<Mutex<DiscoveryState>>,
}

/// Controls a [`MockDiscovery`] after it has been handed to a coordinator.
#[derive(Debug, Clone)]
pub struct MockDiscoveryHandle {
    state: Arc<Mutex<DiscoveryState>>,
}

impl MockDiscovery {
    /// Create a source whose radio starts in `power`.
    #[must_use]
    pub fn new(power: PowerState) -> (Self, MockDiscoveryHandle) {
        let state = Arc::new(Mutex::new(DiscoveryState {
            sink: None,
            power,
            scanning: false,
            configure_calls: 0,
            begin_calls: 0,
            stop_calls: 0,
            last_allow_duplicates: None,
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockDiscoveryHandle { state },
        )
    }
}

impl DiscoverySource for MockDiscovery {
    fn configure(&mut self, sink: EventSink) {
        let mut state = lock(&self.state);
        state.sink = Some(sink);
        state.configure_calls += 1;
    }

    fn begin_scanning(&mut self, allow_duplicate_reports: bool) {
        let mut state = lock(&self.state);
        state.scanning = true;
        state.begin_calls += 1;
        state.last_allow_duplicates = Some(allow_duplicate_reports);
    }

    fn stop_scanning(&mut self) {
        let mut state = lock(&self.state);
        state.scanning = false;
        state.stop_calls += 1;
    }

    fn power_state(&self) -> PowerState {
        lock(&self.state).power
    }
}

impl MockDiscoveryHandle {
    /// Change the radio power state and report the transition.
    pub fn set_power_state(&self, power: PowerState) -> bool {
        let sink = {
            let mut state = lock(&self.state);
            state.power = power;
            state.sink.clone()
        };
        sink.is_some_and(|sink| sink.power_state_changed(power))
    }

    /// Report an advertisement. Returns `false` if no coordinator is
    /// listening.
    pub fn advertise(
        &self,
        device: DeviceHandle,
        signal_strength: i32,
        advertisement: AdvertisementData,
    ) -> bool {
        let sink = lock(&self.state).sink.clone();
        sink.is_some_and(|sink| {
            sink.peripheral_discovered(PeripheralEvent {
                device,
                signal_strength,
                advertisement,
            })
        })
    }

    /// Number of `configure` calls.
    #[must_use]
    pub fn configure_calls(&self) -> usize {
        lock(&self.state).configure_calls
    }

    /// Number of `begin_scanning` calls.
    #[must_use]
    pub fn begin_calls(&self) -> usize {
        lock(&self.state).begin_calls
    }

    /// Number of `stop_scanning` calls.
    #[must_use]
    pub fn stop_calls(&self) -> usize {
        lock(&self.state).stop_calls
    }

    /// Duplicate-report flag of the latest `begin_scanning`.
    #[must_use]
    pub fn last_allow_duplicates(&self) -> Option<bool> {
        lock(&self.state).last_allow_duplicates
    }

    /// Whether the source is currently scanning.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        lock(&self.state).scanning
    }
}

#[derive(Debug)]
struct ProximityState {
    sink: Option<EventSink>,
    authorization: AuthorizationState,
    ranging: HashSet<Uuid>,
    configure_calls: usize,
    authorization_requests: usize,
    stop_ranging_calls: usize,
}

/// In-memory [`ProximitySource`].
#[derive(Debug)]
pub struct MockProximity {
    state: Arc<Mutex<ProximityState>>,
}

/// Controls a [`MockProximity`] after it has been handed to a coordinator.
#[derive(Debug, Clone)]
pub struct MockProximityHandle {
    state: Arc<Mutex<ProximityState>>,
}

impl MockProximity {
    /// Create a source starting in `authorization`.
    #[must_use]
    pub fn new(authorization: AuthorizationState) -> (Self, MockProximityHandle) {
        let state = Arc::new(Mutex::new(ProximityState {
            sink: None,
            authorization,
            ranging: HashSet::new(),
            configure_calls: 0,
            authorization_requests: 0,
            stop_ranging_calls: 0,
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockProximityHandle { state },
        )
    }
}

impl ProximitySource for MockProximity {
    fn configure(&mut self, sink: EventSink) {
        let mut state = lock(&self.state);
        state.sink = Some(sink);
        state.configure_calls += 1;
    }

    fn request_authorization(&mut self) {
        lock(&self.state).authorization_requests += 1;
    }

    fn begin_ranging(&mut self, family: Uuid) {
        lock(&self.state).ranging.insert(family);
    }

    fn stop_ranging(&mut self, family: Uuid) {
        let mut state = lock(&self.state);
        state.ranging.remove(&family);
        state.stop_ranging_calls += 1;
    }

    fn authorization_state(&self) -> AuthorizationState {
        lock(&self.state).authorization
    }

    fn active_ranging_constraints(&self) -> HashSet<Uuid> {
        lock(&self.state).ranging.clone()
    }
}

impl MockProximityHandle {
    /// Change the authorization state and report the transition, as if the
    /// user answered a prompt.
    pub fn set_authorization(&self, authorization: AuthorizationState) -> bool {
        let sink = {
            let mut state = lock(&self.state);
            state.authorization = authorization;
            state.sink.clone()
        };
        sink.is_some_and(|sink| sink.authorization_changed(authorization))
    }

    /// Report a ranging pass for `constraint`.
    pub fn range(&self, constraint: Uuid, beacons: Vec<BeaconSighting>) -> bool {
        let sink = lock(&self.state).sink.clone();
        sink.is_some_and(|sink| sink.beacons_ranged(RangingUpdate {
            beacons,
            constraint,
        }))
    }

    /// Families currently being ranged.
    #[must_use]
    pub fn ranging(&self) -> HashSet<Uuid> {
        lock(&self.state).ranging.clone()
    }

    /// Number of `configure` calls.
    #[must_use]
    pub fn configure_calls(&self) -> usize {
        lock(&self.state).configure_calls
    }

    /// Number of `request_authorization` calls.
    #[must_use]
    pub fn authorization_requests(&self) -> usize {
        lock(&self.state).authorization_requests
    }

    /// Number of `stop_ranging` calls.
    #[must_use]
    pub fn stop_ranging_calls(&self) -> usize {
        lock(&self.state).stop_ranging_calls
    }
}
