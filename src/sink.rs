//! The host device registry, seen from the synchronization engine.

use log::info;

use crate::models::heatzy::{DeviceId, HeatMode, UnitId};

pub trait HostSink {
    /// Materialize a new selector unit for a discovered heater.
    fn create_device(&mut self, unit_id: UnitId, name: &str, initial_mode: HeatMode);

    fn update_device_state(&mut self, unit_id: UnitId, mode: HeatMode, is_online: bool);

    /// Units the host already persisted from an earlier run.
    fn existing_units(&self) -> Vec<(UnitId, DeviceId)> {
        Vec::new()
    }
}

/// Host stand-in for the standalone binary: device changes go to the log.
#[derive(Debug, Default)]
pub struct LogSink {
    created: usize,
    updates: usize,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.created
    }

    pub fn updates(&self) -> usize {
        self.updates
    }
}

impl HostSink for LogSink {
    fn create_device(&mut self, unit_id: UnitId, name: &str, initial_mode: HeatMode) {
        self.created += 1;
        info!(
            "Unit {}: created \"{}\" at level {} ({})",
            unit_id,
            name,
            initial_mode.level(),
            initial_mode.display_name()
        );
    }

    fn update_device_state(&mut self, unit_id: UnitId, mode: HeatMode, is_online: bool) {
        self.updates += 1;
        info!(
            "Unit {}: level {} ({}){}",
            unit_id,
            mode.level(),
            mode.display_name(),
            if is_online { "" } else { ", timed out" }
        );
    }
}
