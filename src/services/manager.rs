//! Device discovery, synchronization and command dispatch.
//!
//! The manager owns the per-device status cache. Each cached device moves
//! through `Discovered -> Synced <-> Unreachable`; a device with no entry is
//! unknown. Entries are never removed by a sync, so a device that drops out
//! of one listing keeps its unit and comes back on the next.

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, BTreeSet};

use crate::client::{HeatzyClient, HeatzyClientError};
use crate::http::Transport;
use crate::models::heatzy::{AuthToken, CommandOutcome, DeviceId, HeatMode, HeatzyDevice, UnitId};
use crate::sink::HostSink;

pub const DEFAULT_STALE_AFTER_SECS: i64 = 300;

#[derive(Debug)]
pub enum ValidationError {
    InvalidLevel(i64),
    UnknownUnit(UnitId),
}

impl core::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ValidationError::InvalidLevel(l) => write!(f, "level {} is not one of 0, 10, 20, 30", l),
            ValidationError::UnknownUnit(u) => write!(f, "no Heatzy device is mapped to unit {}", u),
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug)]
pub enum ManagerError {
    Client(HeatzyClientError),
    Validation(ValidationError),
}

impl core::fmt::Display for ManagerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ManagerError::Client(e) => write!(f, "{}", e),
            ManagerError::Validation(e) => write!(f, "validation error: {}", e),
        }
    }
}

impl std::error::Error for ManagerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ManagerError::Client(e) => Some(e),
            ManagerError::Validation(e) => Some(e),
        }
    }
}

impl From<HeatzyClientError> for ManagerError {
    fn from(value: HeatzyClientError) -> Self {
        ManagerError::Client(value)
    }
}

impl From<ValidationError> for ManagerError {
    fn from(value: ValidationError) -> Self {
        ManagerError::Validation(value)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeviceState {
    Discovered,
    Synced,
    Unreachable,
}

/// Cache entry for one discovered device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub device_id: DeviceId,
    pub unit_id: UnitId,
    pub name: String,
    pub last_known_mode: HeatMode,
    pub is_online: bool,
    pub state: DeviceState,
    /// Last poll that included this device.
    pub last_sync_time: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceStatus {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.updated_at
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) > max_age
    }
}

/// A unit created on the host during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub unit_id: UnitId,
    pub device_id: DeviceId,
    pub name: String,
    pub initial_mode: HeatMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSync {
    pub device_id: DeviceId,
    pub unit_id: UnitId,
    pub changed: bool,
    pub mode: HeatMode,
    pub is_online: bool,
    pub state: DeviceState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub device_id: Option<DeviceId>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub updates: Vec<DeviceSync>,
    pub failures: Vec<SyncFailure>,
    /// Listed by the cloud but never discovered; picked up by the next `discover`.
    pub undiscovered: Vec<DeviceId>,
}

impl SyncReport {
    pub fn changed_count(&self) -> usize {
        self.updates.iter().filter(|u| u.changed).count()
    }

    pub fn update_for(&self, device_id: &DeviceId) -> Option<&DeviceSync> {
        self.updates.iter().find(|u| &u.device_id == device_id)
    }
}

pub struct DeviceManager<T: Transport, S: HostSink> {
    client: HeatzyClient<T>,
    sink: S,
    statuses: BTreeMap<DeviceId, DeviceStatus>,
    units: BTreeMap<UnitId, DeviceId>,
    /// Units the host persisted before this process started; loaded on first discovery.
    host_units: Option<BTreeMap<DeviceId, UnitId>>,
}

impl<T: Transport, S: HostSink> DeviceManager<T, S> {
    pub fn new(client: HeatzyClient<T>, sink: S) -> Self {
        DeviceManager {
            client,
            sink,
            statuses: BTreeMap::new(),
            units: BTreeMap::new(),
            host_units: None,
        }
    }

    pub fn client(&self) -> &HeatzyClient<T> {
        &self.client
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn authenticate(&self, username: &str, password: &str) -> Result<AuthToken, ManagerError> {
        Ok(self.client.authenticate(username, password)?)
    }

    pub fn device_count(&self) -> usize {
        self.statuses.len()
    }

    pub fn cached_status(&self, device_id: &DeviceId) -> Option<&DeviceStatus> {
        self.statuses.get(device_id)
    }

    pub fn status_for_unit(&self, unit_id: UnitId) -> Option<&DeviceStatus> {
        self.units.get(&unit_id).and_then(|id| self.statuses.get(id))
    }

    pub fn statuses(&self) -> impl Iterator<Item = &DeviceStatus> {
        self.statuses.values()
    }

    fn adopt_host_units(&mut self) {
        if self.host_units.is_some() {
            return;
        }
        let persisted: BTreeMap<DeviceId, UnitId> = self
            .sink
            .existing_units()
            .into_iter()
            .map(|(unit, id)| (id, unit))
            .collect();
        if !persisted.is_empty() {
            info!("Host already holds {} Heatzy unit(s)", persisted.len());
        }
        self.host_units = Some(persisted);
    }

    fn next_free_unit(&self) -> UnitId {
        let reserved: BTreeSet<u32> = self
            .units
            .keys()
            .map(|u| u.0)
            .chain(self.host_units.iter().flat_map(|m| m.values().map(|u| u.0)))
            .collect();
        let mut unit = 1;
        while reserved.contains(&unit) {
            unit += 1;
        }
        UnitId(unit)
    }

    /// Register every listed device not seen before, creating host units as needed.
    pub fn discover(&mut self) -> Result<Vec<DeviceDescriptor>, ManagerError> {
        info!("Starting Heatzy device discovery");
        self.adopt_host_units();

        let entries = self.client.list_device_entries()?;
        if entries.is_empty() {
            warn!("No Heatzy devices found on this account");
        }

        let now = Utc::now();
        let mut created = Vec::new();
        for entry in entries {
            let device = match entry {
                Ok(device) => device,
                Err(bad) => {
                    warn!("Discovery skipped {}", bad);
                    continue;
                }
            };
            if self.statuses.contains_key(&device.device_id) {
                continue;
            }

            let existing = self
                .host_units
                .as_ref()
                .and_then(|m| m.get(&device.device_id).copied());
            let unit_id = match existing {
                Some(unit) => {
                    info!("Heatzy device {} already on unit {}", device.device_id, unit);
                    // The host still shows whatever it persisted last run.
                    self.sink
                        .update_device_state(unit, device.current_mode, device.is_online);
                    unit
                }
                None => {
                    let unit = self.next_free_unit();
                    let name = device.safe_name();
                    self.sink.create_device(unit, &name, device.current_mode);
                    if !device.is_online {
                        self.sink.update_device_state(unit, device.current_mode, false);
                    }
                    info!("Created unit {} for Heatzy device {} ({})", unit, device.device_id, name);
                    created.push(DeviceDescriptor {
                        unit_id: unit,
                        device_id: device.device_id.clone(),
                        name,
                        initial_mode: device.current_mode,
                    });
                    unit
                }
            };

            self.units.insert(unit_id, device.device_id.clone());
            self.statuses.insert(device.device_id.clone(), discovered_status(&device, unit_id, now));
        }

        info!(
            "Discovery complete: {} new unit(s), {} device(s) tracked",
            created.len(),
            self.statuses.len()
        );
        Ok(created)
    }

    /// Poll the cloud once and reconcile every cached device with it.
    pub fn sync_all(&mut self) -> Result<SyncReport, ManagerError> {
        let entries = self.client.list_device_entries()?;
        let now = Utc::now();
        let mut report = SyncReport::default();
        let mut seen = BTreeSet::new();

        for entry in entries {
            match entry {
                Ok(device) => {
                    seen.insert(device.device_id.clone());
                    match self.apply_snapshot(&device, now) {
                        Some(sync) => report.updates.push(sync),
                        None => {
                            debug!("Heatzy device {} is not discovered yet", device.device_id);
                            report.undiscovered.push(device.device_id);
                        }
                    }
                }
                Err(bad) => {
                    warn!("Sync skipped {}", bad);
                    if let Some(id) = &bad.device_id {
                        seen.insert(id.clone());
                    }
                    report.failures.push(SyncFailure {
                        device_id: bad.device_id,
                        reason: bad.reason,
                    });
                }
            }
        }

        let missing: Vec<DeviceId> = self
            .statuses
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for device_id in missing {
            if let Some(sync) = self.mark_unreachable(&device_id, now, "missing from the device listing") {
                report.updates.push(sync);
            }
        }

        debug!(
            "Sync complete: {} device(s), {} changed, {} failure(s)",
            report.updates.len(),
            report.changed_count(),
            report.failures.len()
        );
        Ok(report)
    }

    fn apply_snapshot(&mut self, device: &HeatzyDevice, now: DateTime<Utc>) -> Option<DeviceSync> {
        let status = self.statuses.get_mut(&device.device_id)?;
        let changed = status.last_known_mode != device.current_mode || status.is_online != device.is_online;
        let state = if device.is_online {
            DeviceState::Synced
        } else {
            DeviceState::Unreachable
        };
        if state == DeviceState::Unreachable && status.state != DeviceState::Unreachable {
            warn!("Heatzy device {} (unit {}) reports offline", device.device_id, status.unit_id);
        }

        status.name = device.name.clone();
        status.last_known_mode = device.current_mode;
        status.is_online = device.is_online;
        status.state = state;
        status.last_sync_time = Some(now);
        status.updated_at = now;

        if changed {
            self.sink
                .update_device_state(status.unit_id, device.current_mode, device.is_online);
            debug!(
                "Heatzy device {} (unit {}) now {}{}",
                device.device_id,
                status.unit_id,
                device.current_mode.display_name(),
                if device.is_online { "" } else { ", offline" }
            );
        }
        Some(sync_of(status, changed))
    }

    fn mark_unreachable(&mut self, device_id: &DeviceId, now: DateTime<Utc>, why: &str) -> Option<DeviceSync> {
        let status = self.statuses.get_mut(device_id)?;
        let changed = status.is_online;
        if status.state != DeviceState::Unreachable {
            warn!("Heatzy device {} (unit {}) unreachable: {}", device_id, status.unit_id, why);
        }
        status.is_online = false;
        status.state = DeviceState::Unreachable;
        status.updated_at = now;
        if changed {
            self.sink
                .update_device_state(status.unit_id, status.last_known_mode, false);
        }
        Some(sync_of(status, changed))
    }

    /// Switch the heater behind `unit_id` to the mode for `level`.
    pub fn handle_command(&mut self, unit_id: UnitId, level: i64) -> Result<CommandOutcome, ManagerError> {
        let mode = HeatMode::from_level(level).ok_or(ValidationError::InvalidLevel(level))?;
        let device_id = self
            .units
            .get(&unit_id)
            .cloned()
            .ok_or(ValidationError::UnknownUnit(unit_id))?;

        let outcome = self.client.send_command(&device_id, mode)?;
        match &outcome {
            CommandOutcome::Accepted => {
                if let Some(status) = self.statuses.get_mut(&device_id) {
                    status.last_known_mode = mode;
                    status.updated_at = Utc::now();
                    self.sink.update_device_state(unit_id, mode, status.is_online);
                }
                info!(
                    "Heatzy device {} (unit {}) set to {}",
                    device_id,
                    unit_id,
                    mode.display_name()
                );
            }
            CommandOutcome::Rejected { reason } => {
                error!(
                    "Heatzy device {} (unit {}) rejected {}: {}",
                    device_id,
                    unit_id,
                    mode.display_name(),
                    reason
                );
            }
        }
        Ok(outcome)
    }

    /// Poll a single unit; a device the cloud no longer knows becomes unreachable.
    pub fn refresh_unit(&mut self, unit_id: UnitId) -> Result<DeviceSync, ManagerError> {
        let device_id = self
            .units
            .get(&unit_id)
            .cloned()
            .ok_or(ValidationError::UnknownUnit(unit_id))?;
        let now = Utc::now();

        match self.client.get_device_status(&device_id) {
            Ok(report) => {
                let status = self
                    .statuses
                    .get_mut(&device_id)
                    .ok_or(ValidationError::UnknownUnit(unit_id))?;
                let changed = status.last_known_mode != report.mode || !status.is_online;
                status.last_known_mode = report.mode;
                status.is_online = true;
                status.state = DeviceState::Synced;
                status.last_sync_time = Some(now);
                status.updated_at = now;
                if changed {
                    self.sink.update_device_state(unit_id, report.mode, true);
                }
                Ok(sync_of(status, changed))
            }
            Err(e) if e.is_not_found() => self
                .mark_unreachable(&device_id, now, "not found by the API")
                .ok_or(ManagerError::Validation(ValidationError::UnknownUnit(unit_id))),
            Err(e) => Err(e.into()),
        }
    }
}

fn discovered_status(device: &HeatzyDevice, unit_id: UnitId, now: DateTime<Utc>) -> DeviceStatus {
    DeviceStatus {
        device_id: device.device_id.clone(),
        unit_id,
        name: device.name.clone(),
        last_known_mode: device.current_mode,
        is_online: device.is_online,
        state: DeviceState::Discovered,
        last_sync_time: None,
        updated_at: now,
    }
}

fn sync_of(status: &DeviceStatus, changed: bool) -> DeviceSync {
    DeviceSync {
        device_id: status.device_id.clone(),
        unit_id: status.unit_id,
        changed,
        mode: status.last_known_mode,
        is_online: status.is_online,
        state: status.state,
    }
}
