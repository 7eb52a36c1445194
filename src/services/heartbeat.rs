//! Host heartbeat cadence: a full sync every N heartbeats.

use log::{debug, error, info};
use std::thread;
use std::time::{Duration, Instant};

use crate::http::Transport;
use crate::services::manager::{DeviceManager, SyncReport};
use crate::sink::HostSink;

pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_HEARTBEATS_PER_SYNC: u32 = 3;

#[derive(Debug, Clone)]
pub struct Heartbeat {
    every: u32,
    countdown: u32,
    ticks: u64,
}

impl Heartbeat {
    /// `every` of zero is treated as one.
    pub fn new(every: u32) -> Self {
        Heartbeat {
            every: every.max(1),
            countdown: 0,
            ticks: 0,
        }
    }

    /// Count one heartbeat; true when a sync is due.
    pub fn tick(&mut self) -> bool {
        self.ticks += 1;
        if self.countdown == 0 {
            self.countdown = self.every - 1;
            true
        } else {
            self.countdown -= 1;
            false
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Heartbeat::new(DEFAULT_HEARTBEATS_PER_SYNC)
    }
}

/// Run one heartbeat. Failures are logged and swallowed; the next due
/// heartbeat simply tries again.
pub fn on_heartbeat<T: Transport, S: HostSink>(
    manager: &mut DeviceManager<T, S>,
    heartbeat: &mut Heartbeat,
) -> Option<SyncReport> {
    if !heartbeat.tick() {
        return None;
    }

    let report = match manager.sync_all() {
        Ok(report) => report,
        Err(e) => {
            error!("Heatzy sync failed: {}", e);
            return None;
        }
    };
    if report.changed_count() > 0 {
        info!("Heatzy sync: {} device(s) changed", report.changed_count());
    } else {
        debug!("Heatzy sync: no changes");
    }
    for failure in &report.failures {
        error!(
            "Heatzy device {} could not be synced: {}",
            failure
                .device_id
                .as_ref()
                .map(|d| d.to_string())
                .unwrap_or_else(|| "?".to_string()),
            failure.reason
        );
    }

    if !report.undiscovered.is_empty() {
        info!("{} new Heatzy device(s) listed; running discovery", report.undiscovered.len());
        if let Err(e) = manager.discover() {
            error!("Heatzy discovery failed: {}", e);
        }
    }
    Some(report)
}

/// Drive heartbeats at a steady cadence; `max_ticks` of `None` runs forever.
pub fn run_loop<T: Transport, S: HostSink>(
    manager: &mut DeviceManager<T, S>,
    heartbeat: &mut Heartbeat,
    interval: Duration,
    max_ticks: Option<u64>,
) {
    loop {
        if max_ticks.is_some_and(|max| heartbeat.ticks() >= max) {
            return;
        }
        let tick_start = Instant::now();

        on_heartbeat(manager, heartbeat);

        // Maintain steady cadence
        let elapsed = tick_start.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::heatzy::{DeviceId, HeatMode, UnitId};
    use crate::test_support::{RecordingSink, ScriptedTransport, login_body, test_client};
    use serde_json::json;

    fn manager() -> DeviceManager<ScriptedTransport, RecordingSink> {
        let m = DeviceManager::new(test_client(), RecordingSink::default());
        m.client().transport().push(200, login_body("tok-hb", 3600));
        m.authenticate("jane", "pw").unwrap();
        m
    }

    fn listing(mode: &str) -> serde_json::Value {
        json!({"devices": [
            {"did": "bH2bQcQv3VrqVpD4PmYLsN", "dev_alias": "Salon", "is_online": true, "attr": {"mode": mode}}
        ]})
    }

    #[test]
    fn syncs_on_first_tick_then_every_n() {
        let mut hb = Heartbeat::new(3);
        let due: Vec<bool> = (0..7).map(|_| hb.tick()).collect();
        assert_eq!(due, vec![true, false, false, true, false, false, true]);
        assert_eq!(hb.ticks(), 7);
    }

    #[test]
    fn zero_interval_syncs_every_tick() {
        let mut hb = Heartbeat::new(0);
        assert!(hb.tick());
        assert!(hb.tick());
    }

    #[test]
    fn heartbeat_applies_sync_changes() {
        let mut m = manager();
        m.client().transport().push(200, listing("eco"));
        m.discover().unwrap();

        let mut hb = Heartbeat::new(2);
        m.client().transport().push(200, listing("cft"));
        let report = on_heartbeat(&mut m, &mut hb).unwrap();
        assert_eq!(report.changed_count(), 1);
        assert!(on_heartbeat(&mut m, &mut hb).is_none());
        assert_eq!(m.sink().updates, vec![(UnitId(1), HeatMode::Comfort, true)]);
    }

    #[test]
    fn sync_failure_is_swallowed() {
        let mut m = manager();
        m.client().transport().push(200, listing("eco"));
        m.discover().unwrap();

        let mut hb = Heartbeat::new(1);
        m.client().transport().push(500, json!({"error_message": "oops"}));
        assert!(on_heartbeat(&mut m, &mut hb).is_none());
        assert_eq!(
            m.cached_status(&DeviceId("bH2bQcQv3VrqVpD4PmYLsN".to_string()))
                .unwrap()
                .last_known_mode,
            HeatMode::Eco
        );
    }

    #[test]
    fn new_devices_trigger_discovery() {
        let mut m = manager();
        let mut hb = Heartbeat::new(1);
        m.client().transport().push(200, listing("fro"));
        m.client().transport().push(200, listing("fro"));

        let report = on_heartbeat(&mut m, &mut hb).unwrap();
        assert_eq!(report.undiscovered.len(), 1);
        assert_eq!(m.device_count(), 1);
        assert_eq!(m.sink().created, vec![(UnitId(1), "Salon".to_string(), HeatMode::FrostProtection)]);
    }

    #[test]
    fn bounded_loop_stops_after_max_ticks() {
        let mut m = manager();
        for _ in 0..3 {
            m.client().transport().push(200, listing("eco"));
        }
        let mut hb = Heartbeat::new(3);

        run_loop(&mut m, &mut hb, Duration::ZERO, Some(4));
        assert_eq!(hb.ticks(), 4);
        // login + sync on tick 1 + discovery + sync on tick 4
        assert_eq!(m.client().transport().request_count(), 4);
        assert_eq!(m.client().transport().pending(), 0);
    }
}
