//! The JSON envelope every endpoint returns.

use serde::Serialize;

/// `{success, data?, error?, message?, isBlocked?, attemptsRemaining?}`
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_blocked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts_remaining: Option<u32>,
}

impl Envelope {
    /// Successful response with a data payload.
    pub fn ok<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            ..Self::default()
        }
    }

    /// Successful response with a human message and no payload.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Failed response with an error string.
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_sets_success_and_data() {
        let envelope = Envelope::ok(serde_json::json!({"x": 1}));
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["x"], 1);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn fail_sets_error_only() {
        let envelope = Envelope::fail("nope");
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "nope");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn blocked_fields_use_camel_case() {
        let envelope = Envelope {
            success: false,
            is_blocked: Some(true),
            attempts_remaining: Some(2),
            ..Envelope::default()
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["isBlocked"], true);
        assert_eq!(json["attemptsRemaining"], 2);
    }
}
