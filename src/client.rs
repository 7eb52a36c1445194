//! HTTP client for the Heatzy (Gizwits) cloud API.
//!
//! - Blocking; generic over `Transport` so tests can script the cloud.
//! - Covers login, device bindings, latest device data and device control.
//!
//! Authentication
//! - Password login against `/app/login`; the token is cached on the client
//!   instance and renewed transparently before it expires.
//! - A token the API rejects is dropped and renewed once per call.
//! - Credentials the API rejects are not replayed until `authenticate` is
//!   called again.

use chrono::{DateTime, Duration, Utc};
use http::StatusCode;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::cell::RefCell;
use std::thread;

use crate::http::{ApiRequest, ApiResponse, HttpClient, Transport, TransportError};
use crate::models::heatzy::*;

pub const DEFAULT_BASE_URL: &str = "https://euapi.gizwits.com";
pub const HEATZY_APPLICATION_ID: &str = "c70a66ff039d41b4a220e198b0fcc8b3";
pub const DEFAULT_TOKEN_SAFETY_MARGIN_SECS: i64 = 60;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

const LOGIN_PATH: &str = "/app/login";
const BINDINGS_PATH: &str = "/app/bindings";
const APPLICATION_ID_HEADER: &str = "X-Gizwits-Application-Id";
const USER_TOKEN_HEADER: &str = "X-Gizwits-User-token";
const LOGIN_LANG: &str = "en";
/// Gizwits `error_code` for an invalid or expired user token.
const TOKEN_INVALID_CODE: i64 = 9004;

#[derive(Debug)]
pub enum HeatzyClientError {
    Transport(TransportError),
    Authentication(String),
    Api {
        status: u16,
        code: Option<i64>,
        message: String,
    },
}

impl HeatzyClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, HeatzyClientError::Api { status: 404, .. })
    }
}

impl core::fmt::Display for HeatzyClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HeatzyClientError::Transport(e) => write!(f, "transport error: {}", e),
            HeatzyClientError::Authentication(s) => write!(f, "authentication error: {}", s),
            HeatzyClientError::Api { status, code, message } => match code {
                Some(c) => write!(f, "api error: http {} (code {}): {}", status, c, message),
                None => write!(f, "api error: http {}: {}", status, message),
            },
        }
    }
}

impl std::error::Error for HeatzyClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HeatzyClientError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for HeatzyClientError {
    fn from(value: TransportError) -> Self {
        HeatzyClientError::Transport(value)
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub application_id: String,
    /// A token this close to expiry is renewed before use.
    pub token_safety_margin: Duration,
    /// Pause before the single transport retry on read and login paths.
    pub retry_delay: std::time::Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        ClientSettings {
            application_id: HEATZY_APPLICATION_ID.to_string(),
            token_safety_margin: Duration::seconds(DEFAULT_TOKEN_SAFETY_MARGIN_SECS),
            retry_delay: std::time::Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

#[derive(Clone)]
struct Credentials {
    username: String,
    password: String,
}

impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Default)]
struct AuthState {
    token: Option<AuthToken>,
    credentials: Option<Credentials>,
    /// Set when the API explicitly refused `credentials`.
    rejected: bool,
}

pub struct HeatzyClient<T: Transport = HttpClient> {
    transport: T,
    settings: ClientSettings,
    auth: RefCell<AuthState>,
}

impl<T: Transport> HeatzyClient<T> {
    pub fn new(transport: T) -> Self {
        Self::with_settings(transport, ClientSettings::default())
    }

    pub fn with_settings(transport: T, settings: ClientSettings) -> Self {
        HeatzyClient {
            transport,
            settings,
            auth: RefCell::new(AuthState::default()),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    fn base_request(&self, request: ApiRequest) -> ApiRequest {
        request
            .header("Accept", "application/json")
            .header(APPLICATION_ID_HEADER, self.settings.application_id.as_str())
    }

    fn authed_request(&self, token: &AuthToken, request: ApiRequest) -> ApiRequest {
        self.base_request(request).header(USER_TOKEN_HEADER, token.value())
    }

    fn send_with_retry(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        match self.transport.request(request) {
            Ok(response) => Ok(response),
            Err(first) => {
                warn!(
                    "{} {} failed ({}); retrying once in {} ms",
                    request.method,
                    request.path,
                    first,
                    self.settings.retry_delay.as_millis()
                );
                if !self.settings.retry_delay.is_zero() {
                    thread::sleep(self.settings.retry_delay);
                }
                self.transport.request(request)
            }
        }
    }

    fn dispatch(&self, request: &ApiRequest, retry_transport: bool) -> Result<ApiResponse, TransportError> {
        if retry_transport {
            self.send_with_retry(request)
        } else {
            self.transport.request(request)
        }
    }

    /// Authenticate and cache the token, replacing any previous one.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<AuthToken, HeatzyClientError> {
        if username.is_empty() || password.is_empty() {
            return Err(HeatzyClientError::Authentication(
                "username and password are required".to_string(),
            ));
        }
        {
            let mut s = self.auth.borrow_mut();
            s.credentials = Some(Credentials {
                username: username.to_string(),
                password: password.to_string(),
            });
            s.rejected = false;
            s.token = None;
        }
        info!("Authenticating Heatzy user {}", username);
        self.login()
    }

    fn login(&self) -> Result<AuthToken, HeatzyClientError> {
        let credentials = self.auth.borrow().credentials.clone().ok_or_else(|| {
            HeatzyClientError::Authentication("not authenticated: no credentials supplied".to_string())
        })?;

        let body = serde_json::to_value(LoginRequest {
            username: &credentials.username,
            password: &credentials.password,
            lang: LOGIN_LANG,
        })
        .map_err(|e| TransportError::MalformedBody(format!("login request: {}", e)))?;
        let request = self.base_request(ApiRequest::post(LOGIN_PATH, body));
        let response = self.send_with_retry(&request)?;

        if matches!(response.status.as_u16(), 400 | 401 | 403) {
            {
                let mut s = self.auth.borrow_mut();
                s.rejected = true;
                s.token = None;
            }
            let reason = failure_reason(&response);
            error!("Heatzy login rejected for {}: {}", credentials.username, reason);
            return Err(HeatzyClientError::Authentication(format!(
                "credentials rejected (http {}): {}",
                response.status.as_u16(),
                reason
            )));
        }
        if !response.is_success() {
            return Err(api_error(&response));
        }

        let parsed: LoginResponse = serde_path_to_error::deserialize(response.body)
            .map_err(|e| HeatzyClientError::Authentication(format!("malformed login response: {}", e)))?;
        if parsed.token.is_empty() {
            return Err(HeatzyClientError::Authentication(
                "login response carried an empty token".to_string(),
            ));
        }

        let now = Utc::now();
        let expires_at = parsed
            .expire_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(|| now + Duration::seconds(DEFAULT_TOKEN_TTL_SECS));
        let token = AuthToken::new(parsed.token, expires_at);
        self.auth.borrow_mut().token = Some(token.clone());
        info!(
            "Heatzy authentication successful (token valid for {} min)",
            token.expires_in(now).num_minutes()
        );
        Ok(token)
    }

    /// Cached token when still valid, otherwise a fresh login with the stored credentials.
    pub fn get_valid_token(&self) -> Result<AuthToken, HeatzyClientError> {
        {
            let s = self.auth.borrow();
            if let Some(token) = &s.token
                && token.is_valid_at(Utc::now(), self.settings.token_safety_margin)
            {
                return Ok(token.clone());
            }
            if s.credentials.is_none() {
                return Err(HeatzyClientError::Authentication("not authenticated".to_string()));
            }
            if s.rejected {
                return Err(HeatzyClientError::Authentication(
                    "stored credentials were rejected; authenticate again".to_string(),
                ));
            }
        }
        debug!("Heatzy token missing or close to expiry; renewing");
        self.invalidate_token();
        self.login()
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth
            .borrow()
            .token
            .as_ref()
            .is_some_and(|t| t.is_valid_at(Utc::now(), self.settings.token_safety_margin))
    }

    pub fn invalidate_token(&self) {
        self.auth.borrow_mut().token = None;
    }

    /// Run an authenticated request; a rejected token is renewed and the
    /// request resent exactly once.
    fn authorized<F>(&self, build: F, retry_transport: bool) -> Result<ApiResponse, HeatzyClientError>
    where
        F: Fn(&AuthToken) -> ApiRequest,
    {
        let token = self.get_valid_token()?;
        let response = self.dispatch(&build(&token), retry_transport)?;
        if !is_token_rejection(&response) {
            return Ok(response);
        }

        warn!("Heatzy token rejected by the API; re-authenticating once");
        self.invalidate_token();
        let token = self.get_valid_token()?;
        let response = self.dispatch(&build(&token), retry_transport)?;
        if is_token_rejection(&response) {
            self.invalidate_token();
            return Err(HeatzyClientError::Authentication(
                "token rejected again right after renewal".to_string(),
            ));
        }
        Ok(response)
    }

    /// Every binding of the account, with malformed entries kept as errors.
    pub fn list_device_entries(&self) -> Result<Vec<DeviceEntry>, HeatzyClientError> {
        let response = self.authorized(|t| self.authed_request(t, ApiRequest::get(BINDINGS_PATH)), true)?;
        if !response.is_success() {
            return Err(api_error(&response));
        }

        let devices = response
            .body
            .get("devices")
            .and_then(Value::as_array)
            .ok_or_else(|| TransportError::MalformedBody("bindings response has no devices array".to_string()))?;

        let now = Utc::now();
        let entries: Vec<DeviceEntry> = devices.iter().map(|raw| parse_binding(raw, now)).collect();
        debug!(
            "Listed {} Heatzy device(s), {} malformed",
            entries.len(),
            entries.iter().filter(|e| e.is_err()).count()
        );
        Ok(entries)
    }

    pub fn list_devices(&self) -> Result<Vec<HeatzyDevice>, HeatzyClientError> {
        let devices = self
            .list_device_entries()?
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(device) => Some(device),
                Err(bad) => {
                    warn!("Skipping malformed Heatzy binding: {}", bad);
                    None
                }
            })
            .collect();
        Ok(devices)
    }

    pub fn get_device_status(&self, device_id: &DeviceId) -> Result<DeviceReport, HeatzyClientError> {
        let path = format!("/app/devdata/{}/latest", device_id.0);
        let response = self.authorized(|t| self.authed_request(t, ApiRequest::get(path.as_str())), true)?;
        if !response.is_success() {
            return Err(api_error(&response));
        }

        let raw: RawDevData = serde_path_to_error::deserialize(response.body)
            .map_err(|e| TransportError::MalformedBody(format!("devdata for {}: {}", device_id, e)))?;
        let mode = raw
            .attr
            .mode
            .as_ref()
            .map(RawMode::to_heat_mode)
            .ok_or_else(|| TransportError::MalformedBody(format!("devdata for {} has no mode", device_id)))?;
        let updated_at = raw
            .updated_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(Utc::now);
        debug!("Heatzy device {} reports {}", device_id, mode.display_name());
        Ok(DeviceReport {
            device_id: device_id.clone(),
            mode,
            updated_at,
        })
    }

    /// Ask the cloud to switch a device. A refusal is an `Ok(Rejected)`;
    /// transport failures are never resent.
    pub fn send_command(&self, device_id: &DeviceId, mode: HeatMode) -> Result<CommandOutcome, HeatzyClientError> {
        let body = serde_json::to_value(ControlRequest::for_mode(mode))
            .map_err(|e| TransportError::MalformedBody(format!("control request: {}", e)))?;
        let path = format!("/app/control/{}", device_id.0);

        info!("Setting Heatzy device {} to {}", device_id, mode.display_name());
        let response = self.authorized(
            |t| self.authed_request(t, ApiRequest::post(path.as_str(), body.clone())),
            false,
        )?;

        if response.is_success() {
            Ok(CommandOutcome::Accepted)
        } else {
            Ok(CommandOutcome::Rejected {
                reason: failure_reason(&response),
            })
        }
    }
}

fn is_token_rejection(response: &ApiResponse) -> bool {
    response.status == StatusCode::UNAUTHORIZED
        || response.body.get("error_code").and_then(Value::as_i64) == Some(TOKEN_INVALID_CODE)
}

fn error_body(response: &ApiResponse) -> ErrorBody {
    serde_json::from_value(response.body.clone()).unwrap_or_default()
}

fn failure_reason(response: &ApiResponse) -> String {
    error_body(response).message().unwrap_or_else(|| {
        format!(
            "http {} {}",
            response.status.as_u16(),
            response.status.canonical_reason().unwrap_or("")
        )
        .trim_end()
        .to_string()
    })
}

fn api_error(response: &ApiResponse) -> HeatzyClientError {
    HeatzyClientError::Api {
        status: response.status.as_u16(),
        code: error_body(response).error_code,
        message: failure_reason(response),
    }
}

/// Turn one raw binding into a snapshot, or explain why it can't be.
pub fn parse_binding(raw: &Value, now: DateTime<Utc>) -> DeviceEntry {
    let device_id = raw
        .get("did")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(|s| DeviceId(s.to_string()));
    let malformed = |reason: String| MalformedDevice {
        device_id: device_id.clone(),
        reason,
    };

    let binding: RawBinding = serde_path_to_error::deserialize(raw.clone()).map_err(|e| malformed(e.to_string()))?;
    if binding.did.chars().count() < MIN_DEVICE_ID_LEN {
        return Err(malformed(format!("did {:?} is too short", binding.did)));
    }
    if binding.dev_alias.trim().is_empty() {
        return Err(malformed("dev_alias is empty".to_string()));
    }
    let mode = binding
        .attr
        .as_ref()
        .and_then(|a| a.mode.as_ref())
        .ok_or_else(|| malformed("attr.mode is missing".to_string()))?
        .to_heat_mode();

    Ok(HeatzyDevice {
        device_id: DeviceId(binding.did),
        name: binding.dev_alias,
        product_key: binding.product_key.filter(|k| !k.is_empty()),
        current_mode: mode,
        is_online: binding.is_online,
        last_seen: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fixture, login_body, test_client};
    use serde_json::json;

    const D1: &str = "bH2bQcQv3VrqVpD4PmYLsN";

    #[test]
    fn authenticate_caches_token_and_sends_app_headers() {
        let client = test_client();
        client.transport().push(200, login_body("tok-0000-aaaa", 12 * 3600));

        let token = client.authenticate("jane@example.com", "pw-secret").unwrap();
        assert_eq!(token.value(), "tok-0000-aaaa");
        assert!(client.is_authenticated());

        let requests = client.transport().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/app/login");
        assert_eq!(requests[0].header_value(APPLICATION_ID_HEADER), Some(HEATZY_APPLICATION_ID));
        let body = requests[0].body.as_ref().unwrap();
        assert_eq!(body["username"], "jane@example.com");
        assert_eq!(body["lang"], "en");
    }

    #[test]
    fn valid_token_is_served_from_cache() {
        let client = test_client();
        client.transport().push(200, login_body("tok-1", 12 * 3600));
        client.authenticate("jane", "pw").unwrap();

        let a = client.get_valid_token().unwrap();
        let b = client.get_valid_token().unwrap();
        assert_eq!(a, b);
        assert_eq!(client.transport().count_path(LOGIN_PATH), 1);
    }

    #[test]
    fn token_inside_safety_margin_is_renewed() {
        let client = test_client();
        client.transport().push(200, login_body("short-lived", 30));
        client.transport().push(200, login_body("long-lived", 12 * 3600));
        client.authenticate("jane", "pw").unwrap();
        assert!(!client.is_authenticated());

        let token = client.get_valid_token().unwrap();
        assert_eq!(token.value(), "long-lived");
        assert_eq!(client.transport().count_path(LOGIN_PATH), 2);
    }

    #[test]
    fn missing_expiry_uses_default_lifetime() {
        let client = test_client();
        client.transport().push(200, json!({"token": "tok-no-expiry", "uid": "u1"}));
        let token = client.authenticate("jane", "pw").unwrap();
        let remaining = token.expires_in(Utc::now()).num_seconds();
        assert!(remaining > DEFAULT_TOKEN_TTL_SECS - 10 && remaining <= DEFAULT_TOKEN_TTL_SECS);
    }

    #[test]
    fn empty_credentials_fail_without_network() {
        let client = test_client();
        let err = client.authenticate("jane", "").unwrap_err();
        assert!(matches!(err, HeatzyClientError::Authentication(_)));
        assert_eq!(client.transport().request_count(), 0);
    }

    #[test]
    fn rejected_credentials_are_reported_and_not_replayed() {
        let client = test_client();
        client.transport().push(
            400,
            json!({"error_code": 9020, "error_message": "username or password error"}),
        );

        let err = client.authenticate("jane", "wrong").unwrap_err();
        match err {
            HeatzyClientError::Authentication(msg) => assert!(msg.contains("username or password error")),
            other => panic!("unexpected error: {other}"),
        }

        let again = client.get_valid_token().unwrap_err();
        assert!(matches!(again, HeatzyClientError::Authentication(_)));
        assert_eq!(client.transport().request_count(), 1);
    }

    #[test]
    fn login_body_without_token_is_an_authentication_error() {
        let client = test_client();
        client.transport().push(200, json!({"uid": "u1"}));
        let err = client.authenticate("jane", "pw").unwrap_err();
        assert!(matches!(err, HeatzyClientError::Authentication(_)));
    }

    #[test]
    fn login_server_error_is_an_api_error() {
        let client = test_client();
        client.transport().push(502, json!({"error_message": "bad gateway"}));
        let err = client.authenticate("jane", "pw").unwrap_err();
        assert!(matches!(err, HeatzyClientError::Api { status: 502, .. }));
    }

    #[test]
    fn login_transport_failure_is_retried_once() {
        let client = test_client();
        client
            .transport()
            .push_err(TransportError::Timeout("read timed out".to_string()));
        client.transport().push(200, login_body("tok-after-retry", 3600));

        let token = client.authenticate("jane", "pw").unwrap();
        assert_eq!(token.value(), "tok-after-retry");
        assert_eq!(client.transport().count_path(LOGIN_PATH), 2);
    }

    #[test]
    fn two_transport_failures_surface() {
        let client = test_client();
        client.transport().push_err(TransportError::Connection("refused".to_string()));
        client.transport().push_err(TransportError::Connection("refused".to_string()));
        let err = client.authenticate("jane", "pw").unwrap_err();
        assert!(matches!(err, HeatzyClientError::Transport(_)));
        assert_eq!(client.transport().request_count(), 2);
    }

    #[test]
    fn lists_devices_and_maps_unknown_modes_to_off() {
        let client = test_client();
        client.transport().push(200, login_body("tok-list", 3600));
        client.transport().push(200, fixture("bindings.json"));
        client.authenticate("jane", "pw").unwrap();

        let devices = client.list_devices().unwrap();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].device_id, DeviceId(D1.to_string()));
        assert_eq!(devices[0].name, "Salon");
        assert_eq!(devices[0].current_mode, HeatMode::Eco);
        assert!(devices[0].is_online);
        assert_eq!(devices[1].current_mode, HeatMode::Comfort);
        assert!(!devices[1].is_online);
        assert_eq!(devices[2].current_mode, HeatMode::Off);

        let list_request = &client.transport().requests()[1];
        assert_eq!(list_request.path, BINDINGS_PATH);
        assert_eq!(list_request.header_value(USER_TOKEN_HEADER), Some("tok-list"));
    }

    #[test]
    fn listing_transport_failure_is_retried_once() {
        let client = test_client();
        client.transport().push(200, login_body("tok-list", 3600));
        client
            .transport()
            .push_err(TransportError::Connection("connection reset".to_string()));
        client.transport().push(200, fixture("bindings.json"));
        client.authenticate("jane", "pw").unwrap();

        let devices = client.list_devices().unwrap();
        assert_eq!(devices.len(), 3);
        assert_eq!(client.transport().count_path(BINDINGS_PATH), 2);
        assert_eq!(client.transport().count_path(LOGIN_PATH), 1);
    }

    #[test]
    fn device_data_transport_failure_is_retried_once() {
        let client = test_client();
        client.transport().push(200, login_body("a", 3600));
        client
            .transport()
            .push_err(TransportError::Timeout("read timed out".to_string()));
        client
            .transport()
            .push(200, json!({"did": D1, "updated_at": 1_700_000_000, "attr": {"mode": "eco"}}));
        client.authenticate("jane", "pw").unwrap();

        let report = client.get_device_status(&DeviceId(D1.to_string())).unwrap();
        assert_eq!(report.mode, HeatMode::Eco);
        assert_eq!(
            client
                .transport()
                .count_path(&format!("/app/devdata/{}/latest", D1)),
            2
        );
    }

    #[test]
    fn listing_renews_a_rejected_token_once() {
        let client = test_client();
        client.transport().push(200, login_body("stale", 3600));
        client
            .transport()
            .push(401, json!({"error_code": 9004, "error_message": "token invalid"}));
        client.transport().push(200, login_body("fresh", 3600));
        client.transport().push(200, fixture("bindings.json"));
        client.authenticate("jane", "pw").unwrap();

        let devices = client.list_devices().unwrap();
        assert_eq!(devices.len(), 3);
        assert_eq!(client.transport().count_path(LOGIN_PATH), 2);
        assert_eq!(client.transport().count_path(BINDINGS_PATH), 2);
        assert_eq!(
            client.transport().requests()[3].header_value(USER_TOKEN_HEADER),
            Some("fresh")
        );
    }

    #[test]
    fn listing_fails_after_second_token_rejection() {
        let client = test_client();
        client.transport().push(200, login_body("a", 3600));
        client.transport().push(401, json!({}));
        client.transport().push(200, login_body("b", 3600));
        client.transport().push(401, json!({}));
        client.authenticate("jane", "pw").unwrap();

        let err = client.list_devices().unwrap_err();
        assert!(matches!(err, HeatzyClientError::Authentication(_)));
        assert_eq!(client.transport().request_count(), 4);
    }

    #[test]
    fn listing_server_error_is_an_api_error() {
        let client = test_client();
        client.transport().push(200, login_body("a", 3600));
        client.transport().push(503, json!({"error_message": "maintenance"}));
        client.authenticate("jane", "pw").unwrap();

        let err = client.list_device_entries().unwrap_err();
        match err {
            HeatzyClientError::Api { status, message, .. } => {
                assert_eq!(status, 503);
                assert_eq!(message, "maintenance");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn listing_without_devices_array_is_malformed() {
        let client = test_client();
        client.transport().push(200, login_body("a", 3600));
        client.transport().push(200, json!({"bindings": []}));
        client.authenticate("jane", "pw").unwrap();

        let err = client.list_device_entries().unwrap_err();
        assert!(matches!(
            err,
            HeatzyClientError::Transport(TransportError::MalformedBody(_))
        ));
    }

    #[test]
    fn malformed_binding_keeps_its_device_id() {
        let entry = parse_binding(
            &json!({"did": "Kx8Yt2LmQw9RzV4pN7cJdA", "dev_alias": 42, "attr": {"mode": "eco"}}),
            Utc::now(),
        );
        let bad = entry.unwrap_err();
        assert_eq!(bad.device_id, Some(DeviceId("Kx8Yt2LmQw9RzV4pN7cJdA".to_string())));
        assert!(bad.reason.contains("dev_alias"));

        let no_mode = parse_binding(&json!({"did": D1, "dev_alias": "Salon"}), Utc::now()).unwrap_err();
        assert!(no_mode.reason.contains("attr.mode"));

        let short = parse_binding(&json!({"did": "abc", "dev_alias": "x", "attr": {"mode": "eco"}}), Utc::now());
        assert!(short.is_err());
    }

    #[test]
    fn reads_latest_device_data() {
        let client = test_client();
        client.transport().push(200, login_body("a", 3600));
        client
            .transport()
            .push(200, json!({"did": D1, "updated_at": 1_700_000_000, "attr": {"mode": 2}}));
        client.authenticate("jane", "pw").unwrap();

        let report = client.get_device_status(&DeviceId(D1.to_string())).unwrap();
        assert_eq!(report.mode, HeatMode::FrostProtection);
        assert_eq!(report.updated_at.timestamp(), 1_700_000_000);
        assert_eq!(
            client.transport().requests()[1].path,
            format!("/app/devdata/{}/latest", D1)
        );
    }

    #[test]
    fn missing_device_data_is_not_found() {
        let client = test_client();
        client.transport().push(200, login_body("a", 3600));
        client.transport().push(404, json!({"error_code": 9014, "error_message": "device not found"}));
        client.authenticate("jane", "pw").unwrap();

        let err = client.get_device_status(&DeviceId(D1.to_string())).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn command_sends_vendor_code() {
        let client = test_client();
        client.transport().push(200, login_body("a", 3600));
        client.transport().push(200, json!({}));
        client.authenticate("jane", "pw").unwrap();

        let outcome = client.send_command(&DeviceId(D1.to_string()), HeatMode::Comfort).unwrap();
        assert_eq!(outcome, CommandOutcome::Accepted);
        let request = &client.transport().requests()[1];
        assert_eq!(request.path, format!("/app/control/{}", D1));
        assert_eq!(request.body, Some(json!({"attrs": {"mode": "cft"}})));
    }

    #[test]
    fn command_rejection_carries_the_api_reason() {
        let client = test_client();
        client.transport().push(200, login_body("a", 3600));
        client
            .transport()
            .push(400, json!({"error_code": 9042, "error_message": "device offline"}));
        client.authenticate("jane", "pw").unwrap();

        let outcome = client.send_command(&DeviceId(D1.to_string()), HeatMode::Eco).unwrap();
        assert_eq!(
            outcome,
            CommandOutcome::Rejected {
                reason: "device offline".to_string()
            }
        );
    }

    #[test]
    fn command_transport_failure_is_not_resent() {
        let client = test_client();
        client.transport().push(200, login_body("a", 3600));
        client.transport().push_err(TransportError::Timeout("no answer".to_string()));
        client.transport().push(200, json!({}));
        client.authenticate("jane", "pw").unwrap();

        let err = client.send_command(&DeviceId(D1.to_string()), HeatMode::Eco).unwrap_err();
        assert!(matches!(err, HeatzyClientError::Transport(TransportError::Timeout(_))));
        assert_eq!(client.transport().count_path(&format!("/app/control/{}", D1)), 1);
    }

    #[test]
    fn unauthenticated_client_refuses_to_list() {
        let client = test_client();
        let err = client.list_devices().unwrap_err();
        assert!(matches!(err, HeatzyClientError::Authentication(_)));
        assert_eq!(client.transport().request_count(), 0);
    }
}
