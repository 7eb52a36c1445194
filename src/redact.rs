//! Masking of credentials before anything reaches the log.
//!
//! Any JSON object key containing "password" is replaced by `***`; any key
//! containing "token" keeps only its last four characters. Header values
//! follow the same rule by header name.

use serde_json::Value;

const MASK: &str = "***";

fn is_password_key(key: &str) -> bool {
    key.to_ascii_lowercase().contains("password")
}

fn is_token_key(key: &str) -> bool {
    key.to_ascii_lowercase().contains("token")
}

/// `***` plus the last four characters, or only `***` for short secrets.
pub fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 8 {
        return MASK.to_string();
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("{}{}", MASK, tail)
}

/// Deep copy of `value` with credential fields masked.
pub fn redact_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let redacted = if is_password_key(k) {
                        Value::String(MASK.to_string())
                    } else if is_token_key(k) {
                        match v {
                            Value::String(s) => Value::String(mask_secret(s)),
                            Value::Null => Value::Null,
                            _ => Value::String(MASK.to_string()),
                        }
                    } else {
                        redact_json(v)
                    };
                    (k.clone(), redacted)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_json).collect()),
        other => other.clone(),
    }
}

pub fn redact_header(name: &str, value: &str) -> String {
    if is_password_key(name) {
        MASK.to_string()
    } else if is_token_key(name) || name.eq_ignore_ascii_case("authorization") {
        mask_secret(value)
    } else {
        value.to_string()
    }
}

/// Single-line rendering for log messages.
pub fn render_headers(headers: &[(String, String)]) -> String {
    headers
        .iter()
        .map(|(k, v)| format!("{}: {}", k, redact_header(k, v)))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn masks_password_and_token_at_any_depth() {
        let body = json!({
            "username": "jane@example.com",
            "password": "hunter2-long-password",
            "session": {"token": "0123456789abcdef", "nested": [{"user_token": "zzzzzzzzzzwxyz"}]},
        });
        let redacted = redact_json(&body);
        assert_eq!(redacted["username"], "jane@example.com");
        assert_eq!(redacted["password"], "***");
        assert_eq!(redacted["session"]["token"], "***cdef");
        assert_eq!(redacted["session"]["nested"][0]["user_token"], "***wxyz");

        let text = redacted.to_string();
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("0123456789"));
    }

    #[test]
    fn short_secrets_are_fully_masked() {
        assert_eq!(mask_secret("abc"), "***");
        assert_eq!(mask_secret(""), "***");
        assert_eq!(mask_secret("123456789"), "***6789");
    }

    #[test]
    fn non_string_secrets_are_masked() {
        let redacted = redact_json(&json!({"Password": 1234, "token": {"v": 1}}));
        assert_eq!(redacted["Password"], "***");
        assert_eq!(redacted["token"], "***");
    }

    #[test]
    fn headers_are_masked_by_name() {
        let headers = vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("X-Gizwits-User-token".to_string(), "abcdefghijklmnop".to_string()),
        ];
        let rendered = render_headers(&headers);
        assert!(rendered.contains("Accept: application/json"));
        assert!(rendered.contains("X-Gizwits-User-token: ***mnop"));
        assert!(!rendered.contains("abcdefghijkl"));
    }
}
