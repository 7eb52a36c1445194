//! Heatzy Pilote domain types and the Gizwits cloud wire models.
//!
//! Notes
//! - `HeatMode` is a closed set; adding a mode is a code change, not configuration.
//! - Wire structs mirror the JSON bodies of `/app/login`, `/app/bindings`,
//!   `/app/devdata/{did}/latest` and the Gizwits error envelope.
//! - Timestamps use `chrono` (`DateTime<Utc>`); the API sends unix seconds.

use chrono::{DateTime, Duration, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

// =====================
// Scalar ID newtype wrappers
// =====================

/// Gizwits device identifier (`did`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl core::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Host-side unit number a device is materialized under.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub u32);

impl core::fmt::Display for UnitId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =====================
// Heat modes
// =====================

/// Selector labels in host level order (0, 10, 20, 30).
pub const SELECTOR_LEVEL_NAMES: &str = "Arrêt|Hors gel|Eco|Confort";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HeatMode {
    Off,
    FrostProtection,
    Eco,
    Comfort,
}

impl HeatMode {
    pub const ALL: [HeatMode; 4] = [
        HeatMode::Off,
        HeatMode::FrostProtection,
        HeatMode::Eco,
        HeatMode::Comfort,
    ];

    /// Host selector level.
    pub const fn level(self) -> i64 {
        match self {
            HeatMode::Off => 0,
            HeatMode::FrostProtection => 10,
            HeatMode::Eco => 20,
            HeatMode::Comfort => 30,
        }
    }

    /// Vendor mode code as reported by the cloud.
    pub const fn code(self) -> &'static str {
        match self {
            HeatMode::Off => "off",
            HeatMode::FrostProtection => "fro",
            HeatMode::Eco => "eco",
            HeatMode::Comfort => "cft",
        }
    }

    /// Numeric mode used by older Pilote firmware (`{"attrs": {"mode": N}}`).
    pub const fn api_index(self) -> i64 {
        match self {
            HeatMode::Comfort => 0,
            HeatMode::Eco => 1,
            HeatMode::FrostProtection => 2,
            HeatMode::Off => 3,
        }
    }

    /// On/off projection for a binary comfort switch: only Comfort is "on".
    pub const fn comfort_switch(self) -> bool {
        matches!(self, HeatMode::Comfort)
    }

    /// Host nValue: the heater is doing something unless it is Off.
    pub const fn is_active(self) -> bool {
        !matches!(self, HeatMode::Off)
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            HeatMode::Off => "Arrêt",
            HeatMode::FrostProtection => "Hors gel",
            HeatMode::Eco => "Eco",
            HeatMode::Comfort => "Confort",
        }
    }

    pub fn from_level(level: i64) -> Option<HeatMode> {
        match level {
            0 => Some(HeatMode::Off),
            10 => Some(HeatMode::FrostProtection),
            20 => Some(HeatMode::Eco),
            30 => Some(HeatMode::Comfort),
            _ => None,
        }
    }

    pub fn from_code(code: &str) -> Option<HeatMode> {
        match code {
            "off" => Some(HeatMode::Off),
            "fro" => Some(HeatMode::FrostProtection),
            "eco" => Some(HeatMode::Eco),
            "cft" => Some(HeatMode::Comfort),
            _ => None,
        }
    }

    pub fn from_api_index(index: i64) -> Option<HeatMode> {
        match index {
            0 => Some(HeatMode::Comfort),
            1 => Some(HeatMode::Eco),
            2 => Some(HeatMode::FrostProtection),
            3 => Some(HeatMode::Off),
            _ => None,
        }
    }

    /// Lenient decoding of a reported code; unsupported firmware modes read as Off.
    pub fn from_vendor_code(code: &str) -> HeatMode {
        HeatMode::from_code(code).unwrap_or_else(|| {
            warn!("Unknown Heatzy mode code {:?}; treating as {}", code, HeatMode::Off.code());
            HeatMode::Off
        })
    }

    pub fn from_vendor_index(index: i64) -> HeatMode {
        HeatMode::from_api_index(index).unwrap_or_else(|| {
            warn!("Unknown Heatzy mode index {}; treating as {}", index, HeatMode::Off.code());
            HeatMode::Off
        })
    }
}

impl core::fmt::Display for HeatMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

// =====================
// Auth token
// =====================

/// Token lifetime assumed when the login response carries no `expire_at`.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AuthToken {
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        AuthToken {
            value: value.into(),
            expires_at,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Usable at `now` when it still has more than `safety_margin` left.
    pub fn is_valid_at(&self, now: DateTime<Utc>, safety_margin: Duration) -> bool {
        now < self.expires_at - safety_margin
    }

    pub fn expires_in(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

impl core::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthToken")
            .field("value", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// =====================
// Device snapshot
// =====================

pub const MIN_DEVICE_ID_LEN: usize = 10;

/// One device as reported by a single poll. Never mutated; the next poll
/// produces a new snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeatzyDevice {
    pub device_id: DeviceId,
    pub name: String,
    pub product_key: Option<String>,
    pub current_mode: HeatMode,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

impl HeatzyDevice {
    /// Name usable as a host device label.
    pub fn safe_name(&self) -> String {
        safe_device_name(&self.name, &self.device_id)
    }
}

pub fn safe_device_name(alias: &str, device_id: &DeviceId) -> String {
    let cleaned: String = alias
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        let prefix: String = device_id.0.chars().take(8).collect();
        format!("Device_{}", prefix)
    } else {
        trimmed.to_string()
    }
}

/// A listed entry that could not be turned into a `HeatzyDevice`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedDevice {
    /// Present when the entry at least carried a string `did`.
    pub device_id: Option<DeviceId>,
    pub reason: String,
}

impl core::fmt::Display for MalformedDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.device_id {
            Some(id) => write!(f, "device {}: {}", id, self.reason),
            None => write!(f, "unidentified device: {}", self.reason),
        }
    }
}

pub type DeviceEntry = Result<HeatzyDevice, MalformedDevice>;

/// Mode of a single device read from `devdata/latest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceReport {
    pub device_id: DeviceId,
    pub mode: HeatMode,
    pub updated_at: DateTime<Utc>,
}

/// Result of a command the API answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Accepted,
    Rejected { reason: String },
}

impl CommandOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, CommandOutcome::Accepted)
    }
}

// =====================
// Wire models
// =====================

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub lang: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub uid: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub expire_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBinding {
    pub did: String,
    pub dev_alias: String,
    #[serde(default)]
    pub product_key: Option<String>,
    #[serde(default = "default_online")]
    pub is_online: bool,
    #[serde(default)]
    pub attr: Option<RawAttr>,
}

fn default_online() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAttr {
    #[serde(default)]
    pub mode: Option<RawMode>,
}

/// Newer firmware reports a code ("eco"), older firmware an index (1).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawMode {
    Code(String),
    Index(i64),
}

impl RawMode {
    pub fn to_heat_mode(&self) -> HeatMode {
        match self {
            RawMode::Code(code) => HeatMode::from_vendor_code(code),
            RawMode::Index(index) => HeatMode::from_vendor_index(*index),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDevData {
    #[serde(default)]
    pub did: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub updated_at: Option<i64>,
    pub attr: RawAttr,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlRequest {
    pub attrs: ControlAttrs,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlAttrs {
    pub mode: &'static str,
}

impl ControlRequest {
    pub fn for_mode(mode: HeatMode) -> Self {
        ControlRequest {
            attrs: ControlAttrs { mode: mode.code() },
        }
    }
}

/// Gizwits error envelope, e.g. `{"error_code": 9020, "error_message": "..."}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub detail_message: Option<String>,
}

impl ErrorBody {
    pub fn message(&self) -> Option<String> {
        match (&self.error_message, &self.detail_message) {
            (Some(m), Some(d)) if !d.is_empty() && d != m => Some(format!("{} ({})", m, d)),
            (Some(m), _) => Some(m.clone()),
            (None, Some(d)) => Some(d.clone()),
            (None, None) => None,
        }
    }
}
