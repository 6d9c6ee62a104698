//! Inbound events as handed over by the ingestion layer.
//!
//! The JSON payload is parsed at most once, on first access, and the
//! resulting value tree is shared by every rule evaluated for the event.

use std::collections::HashMap;
use std::sync::OnceLock;

use uuid::Uuid;

use crate::expr::value::Value;

#[derive(Debug)]
pub struct Event {
    id: Uuid,
    subject: String,
    headers: HashMap<String, String>,
    raw: Vec<u8>,
    payload: OnceLock<Value>,
}

impl Event {
    pub fn new(
        subject: impl Into<String>,
        headers: HashMap<String, String>,
        raw_payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: subject.into(),
            headers,
            raw: raw_payload.into(),
            payload: OnceLock::new(),
        }
    }

    /// Build an event from an already-decoded JSON document.
    pub fn from_json(subject: impl Into<String>, payload: serde_json::Value) -> Self {
        let raw = payload.to_string().into_bytes();
        let event = Self::new(subject, HashMap::new(), raw);
        let _ = event.payload.set(Value::from(payload));
        event
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Correlation id used in logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Header lookup; exact name first, then ASCII case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .or_else(|| {
                self.headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }

    pub fn raw_payload(&self) -> &[u8] {
        &self.raw
    }

    /// The parsed payload. Empty or invalid JSON yields `null`.
    pub fn payload(&self) -> &Value {
        self.payload.get_or_init(|| {
            if self.raw.iter().all(u8::is_ascii_whitespace) {
                return Value::Null;
            }
            match serde_json::from_slice::<serde_json::Value>(&self.raw) {
                Ok(json) => Value::from(json),
                Err(e) => {
                    tracing::warn!(
                        event_id = %self.id,
                        subject = %self.subject,
                        error = %e,
                        "Event payload is not valid JSON; treating as null"
                    );
                    Value::Null
                }
            }
        })
    }

    pub fn is_payload_parsed(&self) -> bool {
        self.payload.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_parse() {
        let event = Event::new("a.b", HashMap::new(), br#"{"x": 1}"#.to_vec());
        assert!(!event.is_payload_parsed());
        assert_eq!(event.payload().get("x"), Some(&Value::Number(1.0)));
        assert!(event.is_payload_parsed());
    }

    #[test]
    fn test_invalid_and_empty_payload() {
        let event = Event::new("a", HashMap::new(), b"{not json".to_vec());
        assert!(event.payload().is_null());
        let event = Event::new("a", HashMap::new(), Vec::new());
        assert!(event.payload().is_null());
    }

    #[test]
    fn test_headers_and_ids() {
        let a = Event::from_json("a", serde_json::json!({})).with_header("Content-Type", "json");
        let b = Event::from_json("a", serde_json::json!({}));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.header("content-type"), Some("json"));
        assert_eq!(a.header("Content-Type"), Some("json"));
        assert!(a.is_payload_parsed());
    }
}
