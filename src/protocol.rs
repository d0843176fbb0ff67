use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct ResponseOk<T: Serialize> {
    pub id: String,
    pub result: T,
}

#[derive(Debug, Serialize)]
pub struct ResponseErr {
    pub id: String,
    pub error: String,
}

pub fn ok<T: Serialize>(id: &str, result: T) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(ResponseOk {
        id: id.to_string(),
        result,
    })?)
}

pub fn err(id: &str, error: impl Into<String>) -> Value {
    // ResponseErr only holds strings, so serialization cannot fail.
    serde_json::to_value(ResponseErr {
        id: id.to_string(),
        error: error.into(),
    })
    .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_params_default_to_null() {
        let req: Request = serde_json::from_str(r#"{"id":"1","method":"hello"}"#).unwrap();
        assert_eq!(req.method, "hello");
        assert!(req.params.is_null());
    }

    #[test]
    fn test_response_shapes() {
        let v = ok("7", serde_json::json!({ "ok": true })).unwrap();
        assert_eq!(v, serde_json::json!({ "id": "7", "result": { "ok": true } }));

        let v = err("8", "boom");
        assert_eq!(v, serde_json::json!({ "id": "8", "error": "boom" }));
    }
}
