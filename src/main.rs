pub mod models {
    pub mod heatzy;
}

pub mod client;
pub mod config;
pub mod http;
pub mod redact;
pub mod sink;
pub mod services {
    pub mod heartbeat;
    pub mod manager;
}
#[cfg(test)]
mod test_support;

use crate::client::{ClientSettings, HeatzyClient};
use crate::config::{Config, env_file_arg, load_env};
use crate::http::HttpClient;
use crate::services::heartbeat::{self, Heartbeat};
use crate::services::manager::DeviceManager;
use crate::sink::LogSink;
use log::{error, info};

pub fn run(cfg: Config) -> Result<(), String> {
    info!(
        "Config loaded (user={}, api={}, heartbeat={}s, heartbeats_per_sync={}, debug_level={})",
        cfg.username,
        cfg.api_url,
        cfg.heartbeat_interval.as_secs(),
        cfg.heartbeats_per_sync,
        cfg.debug_level.value()
    );

    // 1) Init Heatzy client
    let transport = HttpClient::new(cfg.api_url.as_str(), cfg.http_timeout);
    let client = HeatzyClient::with_settings(
        transport,
        ClientSettings {
            application_id: cfg.application_id.clone(),
            ..ClientSettings::default()
        },
    );
    let mut manager = DeviceManager::new(client, LogSink::new());
    info!(
        "Heatzy client ready (application={}, token renewal margin={}s)",
        manager.client().settings().application_id,
        manager.client().settings().token_safety_margin.num_seconds()
    );

    // 2) Authenticate
    manager
        .authenticate(&cfg.username, &cfg.password)
        .map_err(|e| format!("Heatzy authentication failed: {}", e))?;

    // 3) Discover devices
    manager
        .discover()
        .map_err(|e| format!("Heatzy discovery failed: {}", e))?;
    for status in manager.statuses() {
        info!(
            "Unit {}: {} ({}) {}{}",
            status.unit_id,
            status.name,
            status.device_id,
            status.last_known_mode.display_name(),
            if status.is_online { "" } else { ", offline" }
        );
    }
    info!(
        "Tracking {} Heatzy device(s): {} unit(s) created, {} state update(s) pushed",
        manager.device_count(),
        manager.sink().created(),
        manager.sink().updates()
    );

    // 4) Heartbeat loop (steady cadence)
    info!(
        "Starting heartbeat loop: interval={}s, sync every {} heartbeat(s)",
        cfg.heartbeat_interval.as_secs(),
        cfg.heartbeats_per_sync
    );
    let mut hb = Heartbeat::new(cfg.heartbeats_per_sync);
    heartbeat::run_loop(&mut manager, &mut hb, cfg.heartbeat_interval, None);
    Ok(())
}

fn main() {
    let loaded_env = match env_file_arg(std::env::args_os().skip(1)).and_then(load_env) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Config before logging so the debug level can pick the default filter.
    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    let default_filter = env_logger::Env::default().default_filter_or(cfg.debug_level.log_filter());
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!(
            "Environment loaded from {} .env file: {} ({} variable(s) applied)",
            origin,
            info.path.display(),
            info.applied
        );
    }

    info!(
        "heatzy-sync {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(cfg) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
