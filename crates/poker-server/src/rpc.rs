use serde::{Deserialize, Serialize};

use poker_core::CoordinatorError;

/// Client request: `{ id, method, params }`.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

/// Response wire format: `{ id, success, result?, error?: { code, message } }`.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub id: Option<serde_json::Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
}

// Transport-level error codes. Coordinator failures use the upper-cased
// `error_kind()` of the error (SESSION_NOT_FOUND, NOT_HOST, ...).
pub const PARSE_ERROR: &str = "PARSE_ERROR";
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";

impl RpcResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<serde_json::Value>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(RpcError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    pub fn coordinator(id: Option<serde_json::Value>, err: &CoordinatorError) -> Self {
        Self::error(id, err.error_kind().to_ascii_uppercase(), err.to_string())
    }

    pub fn method_not_found(id: Option<serde_json::Value>, method: &str) -> Self {
        Self::error(id, METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(id: Option<serde_json::Value>, msg: impl Into<String>) -> Self {
        Self::error(id, INVALID_PARAMS, msg)
    }

    pub fn parse_error() -> Self {
        Self::error(None, PARSE_ERROR, "Parse error")
    }

    /// Error code, if this is an error response.
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

/// Extract a required non-empty string param.
pub fn require_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str, String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required parameter: {key}"))
}

/// Extract an optional string param.
pub fn optional_str<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

/// Extract a required numeric param.
pub fn require_f64(params: &serde_json::Value, key: &str) -> Result<f64, String> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| format!("Missing or non-numeric parameter: {key}"))
}

/// Extract a required boolean param.
pub fn require_bool(params: &serde_json::Value, key: &str) -> Result<bool, String> {
    params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| format!("Missing or non-boolean parameter: {key}"))
}

/// Extract a vote value. Numbers are accepted as their JSON spelling; the
/// session maps them onto the deck token (`5.0` votes `5`).
pub fn require_vote_value(params: &serde_json::Value, key: &str) -> Result<String, String> {
    match params.get(key) {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        _ => Err(format!("Missing required parameter: {key}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rpc_request() {
        let json = r#"{"method":"planningPoker.vote","params":{"projectId":"p1","value":"5"},"id":1}"#;
        let req: RpcRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.method, "planningPoker.vote");
        assert!(req.params.is_some());
        assert_eq!(req.id, Some(serde_json::json!(1)));
    }

    #[test]
    fn success_response_serializes() {
        let resp = RpcResponse::success(Some(serde_json::json!(1)), serde_json::json!({"ok": true}));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"result\""));
        assert!(!json.contains("\"error\""));
        assert!(json.contains("\"success\":true"));
    }

    #[test]
    fn coordinator_errors_use_kind_codes() {
        let resp = RpcResponse::coordinator(Some(serde_json::json!(7)), &CoordinatorError::NotHost);
        assert_eq!(resp.error_code(), Some("NOT_HOST"));
        let resp = RpcResponse::coordinator(None, &CoordinatorError::SessionNotFound);
        assert_eq!(resp.error_code(), Some("SESSION_NOT_FOUND"));
        let resp = RpcResponse::coordinator(None, &CoordinatorError::AdapterFailure("down".into()));
        assert_eq!(resp.error_code(), Some("ADAPTER_FAILURE"));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["error"]["message"].as_str().unwrap().contains("down"));
    }

    #[test]
    fn method_not_found_names_method() {
        let resp = RpcResponse::method_not_found(Some(serde_json::json!(1)), "foo.bar");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("METHOD_NOT_FOUND"));
        assert!(json.contains("foo.bar"));
        assert!(!json.contains("\"result\""));
    }

    #[test]
    fn param_helpers() {
        let params = serde_json::json!({
            "name": "test", "empty": "", "points": 5, "flag": true, "vote": 0.5
        });
        assert_eq!(require_str(&params, "name").unwrap(), "test");
        assert!(require_str(&params, "empty").is_err());
        assert!(require_str(&params, "points").is_err());
        assert_eq!(optional_str(&params, "missing"), None);
        assert_eq!(require_f64(&params, "points").unwrap(), 5.0);
        assert!(require_f64(&params, "name").is_err());
        assert!(require_bool(&params, "flag").unwrap());
        assert!(require_bool(&params, "points").is_err());
    }

    #[test]
    fn vote_values_accept_numbers() {
        let params = serde_json::json!({"a": "?", "b": 8, "c": 0.5, "d": null});
        assert_eq!(require_vote_value(&params, "a").unwrap(), "?");
        assert_eq!(require_vote_value(&params, "b").unwrap(), "8");
        assert_eq!(require_vote_value(&params, "c").unwrap(), "0.5");
        assert!(require_vote_value(&params, "d").is_err());
    }

    #[test]
    fn parse_error_has_no_id() {
        let resp = RpcResponse::parse_error();
        assert!(resp.id.is_none());
        assert_eq!(resp.error_code(), Some(PARSE_ERROR));
        assert!(!resp.success);
    }
}
