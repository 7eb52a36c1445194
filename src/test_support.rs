//! In-memory doubles for the cloud and the host, shared by unit tests.

use chrono::{Duration, Utc};
use http::StatusCode;
use serde_json::{Value, json};
use std::cell::RefCell;
use std::collections::VecDeque;

use crate::client::{ClientSettings, HeatzyClient};
use crate::http::{ApiRequest, ApiResponse, Transport, TransportError};
use crate::models::heatzy::{DeviceId, HeatMode, UnitId};
use crate::sink::HostSink;

/// Replays queued responses in order and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: RefCell<VecDeque<Result<ApiResponse, TransportError>>>,
    requests: RefCell<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, status: u16, body: Value) {
        let status = StatusCode::from_u16(status).expect("valid status code");
        self.responses
            .borrow_mut()
            .push_back(Ok(ApiResponse::new(status, body)));
    }

    pub fn push_err(&self, err: TransportError) {
        self.responses.borrow_mut().push_back(Err(err));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.borrow().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn count_path(&self, path: &str) -> usize {
        self.requests.borrow().iter().filter(|r| r.path == path).count()
    }

    pub fn pending(&self) -> usize {
        self.responses.borrow().len()
    }
}

impl Transport for ScriptedTransport {
    fn request(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        self.requests.borrow_mut().push(request.clone());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Connection(format!("no scripted response for {}", request.path))))
    }
}

pub fn test_client() -> HeatzyClient<ScriptedTransport> {
    HeatzyClient::with_settings(
        ScriptedTransport::new(),
        ClientSettings {
            retry_delay: std::time::Duration::ZERO,
            ..ClientSettings::default()
        },
    )
}

/// Login body whose token expires `ttl_secs` from now.
pub fn login_body(token: &str, ttl_secs: i64) -> Value {
    json!({
        "token": token,
        "uid": "6f1e0c5b9a2d4e7f",
        "expire_at": (Utc::now() + Duration::seconds(ttl_secs)).timestamp(),
    })
}

pub fn fixture(name: &str) -> Value {
    let json = std::fs::read_to_string(format!("tests/data/{}", name)).expect("fixture present");
    serde_json::from_str(&json).expect("fixture is valid JSON")
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    pub created: Vec<(UnitId, String, HeatMode)>,
    pub updates: Vec<(UnitId, HeatMode, bool)>,
    pub persisted: Vec<(UnitId, DeviceId)>,
}

impl HostSink for RecordingSink {
    fn create_device(&mut self, unit_id: UnitId, name: &str, initial_mode: HeatMode) {
        self.created.push((unit_id, name.to_string(), initial_mode));
    }

    fn update_device_state(&mut self, unit_id: UnitId, mode: HeatMode, is_online: bool) {
        self.updates.push((unit_id, mode, is_online));
    }

    fn existing_units(&self) -> Vec<(UnitId, DeviceId)> {
        self.persisted.clone()
    }
}
