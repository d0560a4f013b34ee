//! Wire-level value types shared by the gateway, the dispatcher, and clients.
//!
//! A [`MockRequest`] is built once at the HTTP ingress and never mutated
//! afterwards; a [`MockResponse`] is produced by exactly one responder (or
//! synthesized by the dispatcher) and relayed back verbatim.

mod multimap;
mod request;
mod response;

pub use multimap::MultiMap;
pub use request::MockRequest;
pub use response::MockResponse;

/// Base64 (de)serialisation for optional binary bodies.
///
/// `None` means the message carried no body at all — distinct from an empty one.
pub(crate) mod b64_body {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, ser: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => ser.serialize_some(&STANDARD.encode(b)),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(de)?;
        match encoded {
            Some(s) => STANDARD
                .decode(s.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Carrier {
        #[serde(default, with = "b64_body", skip_serializing_if = "Option::is_none")]
        body: Option<Vec<u8>>,
    }

    #[test]
    fn body_roundtrips_as_base64() {
        let c = Carrier { body: Some(vec![0x00, 0xff, 0x10]) };
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.contains("AP8Q"));
        let back: Carrier = serde_json::from_str(&json).unwrap();
        assert_eq!(back.body, Some(vec![0x00, 0xff, 0x10]));
    }

    #[test]
    fn absent_body_stays_absent() {
        let c = Carrier { body: None };
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "{}");
        let back: Carrier = serde_json::from_str("{}").unwrap();
        assert!(back.body.is_none());
    }

    #[test]
    fn empty_body_is_not_absent() {
        let c = Carrier { body: Some(vec![]) };
        let json = serde_json::to_string(&c).unwrap();
        let back: Carrier = serde_json::from_str(&json).unwrap();
        assert_eq!(back.body, Some(vec![]));
    }

    #[test]
    fn request_json_roundtrip() {
        let req = MockRequest::new("get", "/users/42")
            .with_header("X-Trace", "abc")
            .with_query("page", "2")
            .with_body(b"hello".to_vec());
        let json = serde_json::to_string(&req).unwrap();
        let back: MockRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, req.id);
        assert_eq!(back.method, "GET");
        assert_eq!(back.path, "/users/42");
        assert_eq!(back.headers.first("x-trace"), Some("abc"));
        assert_eq!(back.body.as_deref(), Some(b"hello".as_slice()));
        assert_eq!(back.received_at, req.received_at);
    }
}
