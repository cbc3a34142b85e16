// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Event Model
//!
//! An event is `{ "type": <non-empty string>, "data": <any non-null JSON>,
//! "timestamp": <optional RFC 3339> }`. It travels through the broker as its
//! JSON encoding.

use crate::errors::EventError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const FIELD_TYPE: &str = "type";
pub const FIELD_DATA: &str = "data";
pub const FIELD_TIMESTAMP: &str = "timestamp";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Event {
    pub fn new(kind: impl Into<String>, data: Value) -> Event {
        Event {
            kind: kind.into(),
            data,
            timestamp: None,
        }
    }

    /// Stamps the event with the current time.
    pub fn stamped(mut self) -> Event {
        self.timestamp = Some(Utc::now());
        self
    }

    /// Builds an event from an already parsed JSON document.
    ///
    /// `type` must be a non-empty string and `data` must be present and not
    /// null. A `timestamp` that is present but unreadable makes the payload
    /// malformed.
    pub fn from_value(value: Value) -> Result<Event, EventError> {
        let Value::Object(mut fields) = value else {
            return Err(EventError::MalformedPayload(
                "expected a JSON object".to_owned(),
            ));
        };

        let kind = match fields.remove(FIELD_TYPE) {
            Some(Value::String(kind)) if !kind.is_empty() => kind,
            Some(Value::Null) | None => return Err(EventError::MissingField(FIELD_TYPE)),
            Some(Value::String(_)) => return Err(EventError::MissingField(FIELD_TYPE)),
            Some(other) => {
                return Err(EventError::MalformedPayload(format!(
                    "`type` must be a string, got {other}"
                )))
            }
        };

        let data = match fields.remove(FIELD_DATA) {
            Some(Value::Null) | None => return Err(EventError::MissingField(FIELD_DATA)),
            Some(data) => data,
        };

        let timestamp = match fields.remove(FIELD_TIMESTAMP) {
            Some(Value::Null) | None => None,
            Some(raw) => Some(
                serde_json::from_value::<DateTime<Utc>>(raw)
                    .map_err(|err| EventError::MalformedPayload(err.to_string()))?,
            ),
        };

        Ok(Event {
            kind,
            data,
            timestamp,
        })
    }

    /// Decodes a transport payload.
    pub fn decode(payload: &[u8]) -> Result<Event, EventError> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|err| EventError::MalformedPayload(err.to_string()))?;

        Event::from_value(value)
    }

    /// Encodes the event into its transport payload.
    pub fn encode(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|err| EventError::Encode(err.to_string()))
    }

    /// Checks the invariants a published event must hold.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.kind.is_empty() {
            return Err(EventError::MissingField(FIELD_TYPE));
        }
        if self.data.is_null() {
            return Err(EventError::MissingField(FIELD_DATA));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_a_complete_event() {
        let event = Event::decode(br#"{"type":"signup","data":{"id":42}}"#).unwrap();

        assert_eq!(event.kind, "signup");
        assert_eq!(event.data, json!({"id": 42}));
        assert_eq!(event.timestamp, None);
    }

    #[test]
    fn encoded_event_decodes_to_the_same_fields() {
        let event = Event::new("signup", json!({"id": 42, "tags": ["a", "b"]})).stamped();

        let decoded = Event::decode(&event.encode().unwrap()).unwrap();

        assert_eq!(decoded, event);
    }

    #[test]
    fn timestamp_is_omitted_when_absent() {
        let payload = Event::new("signup", json!(1)).encode().unwrap();

        assert_eq!(payload, br#"{"type":"signup","data":1}"#.to_vec());
    }

    #[test]
    fn rejects_payloads_that_are_not_json_objects() {
        for payload in [&b"not json"[..], b"[1,2]", b"\"signup\"", b""] {
            assert!(matches!(
                Event::decode(payload),
                Err(EventError::MalformedPayload(_))
            ));
        }
    }

    #[test]
    fn rejects_missing_or_empty_type() {
        assert_eq!(
            Event::decode(br#"{"data":{}}"#),
            Err(EventError::MissingField("type"))
        );
        assert_eq!(
            Event::decode(br#"{"type":"","data":{}}"#),
            Err(EventError::MissingField("type"))
        );
        assert_eq!(
            Event::decode(br#"{"type":null,"data":{}}"#),
            Err(EventError::MissingField("type"))
        );
    }

    #[test]
    fn rejects_missing_or_null_data() {
        assert_eq!(
            Event::decode(br#"{"type":"signup"}"#),
            Err(EventError::MissingField("data"))
        );
        assert_eq!(
            Event::decode(br#"{"type":"signup","data":null}"#),
            Err(EventError::MissingField("data"))
        );
    }

    #[test]
    fn falsy_but_present_data_is_accepted() {
        let event = Event::decode(br#"{"type":"flag","data":false}"#).unwrap();
        assert_eq!(event.data, json!(false));
    }

    #[test]
    fn unreadable_timestamp_is_malformed() {
        assert!(matches!(
            Event::decode(br#"{"type":"signup","data":1,"timestamp":"yesterday"}"#),
            Err(EventError::MalformedPayload(_))
        ));
    }

    #[test]
    fn validate_checks_type_and_data() {
        assert!(Event::new("signup", json!({})).validate().is_ok());
        assert_eq!(
            Event::new("", json!({})).validate(),
            Err(EventError::MissingField("type"))
        );
        assert_eq!(
            Event::new("signup", Value::Null).validate(),
            Err(EventError::MissingField("data"))
        );
    }
}
