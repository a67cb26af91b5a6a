use crate::error::SchoolError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Maps a core error onto the wire. Store failures are logged and reported opaquely.
pub fn fail(id: &str, method: &str, e: &SchoolError) -> serde_json::Value {
    if e.is_internal() {
        tracing::error!(request_id = id, method, error = %e, "request failed");
        return err(id, e.code(), "internal error", None);
    }
    err(id, e.code(), e.to_string(), None)
}

/// Serialises a core result, or maps its error.
pub fn respond<T: serde::Serialize>(
    id: &str,
    method: &str,
    result: crate::error::Result<T>,
) -> serde_json::Value {
    match result {
        Ok(v) => match serde_json::to_value(v) {
            Ok(value) => ok(id, value),
            Err(e) => err(id, "failed", e.to_string(), None),
        },
        Err(e) => fail(id, method, &e),
    }
}
